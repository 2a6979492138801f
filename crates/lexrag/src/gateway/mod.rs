//! Embedding Gateway: the narrow boundary to the external embedding/LLM
//! capability. The engine depends on exactly three operations — embed,
//! generate, rephrase — never on a provider's wire shapes.

mod http;

pub use http::HttpGateway;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::config::GatewayConfig;
use crate::error::EngineError;

/// External language capability: pure text-in/vector-or-text-out.
#[async_trait]
pub trait LanguageGateway: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    async fn generate(&self, prompt: &str, context: &str) -> anyhow::Result<String>;

    /// Alternative phrasings of a query, for fallback expansion.
    async fn rephrase(&self, query: &str) -> anyhow::Result<Vec<String>>;
}

/// Wraps a provider with explicit deadlines, bounded retries and an LRU
/// cache for query embeddings. Every expiry surfaces as a typed timeout,
/// never a hang.
pub struct GatewayClient {
    inner: Arc<dyn LanguageGateway>,
    timeout: Duration,
    retries: u32,
    embed_cache: RwLock<lru::LruCache<String, Vec<f32>>>,
}

impl GatewayClient {
    pub fn new(inner: Arc<dyn LanguageGateway>, config: &GatewayConfig) -> Self {
        let cache_size =
            NonZeroUsize::new(config.embed_cache_size).unwrap_or(NonZeroUsize::new(1).expect("1 > 0"));
        Self {
            inner,
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.retries,
            embed_cache: RwLock::new(lru::LruCache::new(cache_size)),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        if let Some(vector) = self.embed_cache.write().get(text).cloned() {
            return Ok(vector);
        }

        let vector = self.call(|| self.inner.embed(text)).await?;
        self.embed_cache.write().put(text.to_string(), vector.clone());
        Ok(vector)
    }

    pub async fn generate(&self, prompt: &str, context: &str) -> Result<String, EngineError> {
        self.call(|| self.inner.generate(prompt, context)).await
    }

    pub async fn rephrase(&self, query: &str) -> Result<Vec<String>, EngineError> {
        self.call(|| self.inner.rephrase(query)).await
    }

    /// Run one gateway operation under the configured deadline, retrying
    /// provider errors (not timeouts) up to the configured count.
    async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut last_error = String::new();
        for attempt in 0..=self.retries {
            match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        attempt = attempt,
                        error = %last_error,
                        "gateway call failed"
                    );
                }
                Err(_) => {
                    return Err(EngineError::GatewayTimeout(self.timeout.as_millis() as u64));
                }
            }
        }
        Err(EngineError::GatewayUnavailable(last_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGateway {
        embeds: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl LanguageGateway for CountingGateway {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            let n = self.embeds.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("transient provider error");
            }
            Ok(vec![text.len() as f32, 1.0])
        }

        async fn generate(&self, _prompt: &str, _context: &str) -> anyhow::Result<String> {
            Ok("ok".into())
        }

        async fn rephrase(&self, query: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![format!("{} alt", query)])
        }
    }

    struct HangingGateway;

    #[async_trait]
    impl LanguageGateway for HangingGateway {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
        async fn generate(&self, _p: &str, _c: &str) -> anyhow::Result<String> {
            unreachable!()
        }
        async fn rephrase(&self, _q: &str) -> anyhow::Result<Vec<String>> {
            unreachable!()
        }
    }

    fn config() -> GatewayConfig {
        GatewayConfig {
            timeout_ms: 50,
            retries: 2,
            embed_cache_size: 8,
        }
    }

    #[tokio::test]
    async fn embed_results_are_cached() {
        let inner = Arc::new(CountingGateway {
            embeds: AtomicUsize::new(0),
            fail_first: 0,
        });
        let client = GatewayClient::new(inner.clone(), &config());

        client.embed("hola").await.unwrap();
        client.embed("hola").await.unwrap();
        assert_eq!(inner.embeds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let inner = Arc::new(CountingGateway {
            embeds: AtomicUsize::new(0),
            fail_first: 2,
        });
        let client = GatewayClient::new(inner, &config());
        assert!(client.embed("hola").await.is_ok());
    }

    #[tokio::test]
    async fn exhausted_retries_surface_unavailable() {
        let inner = Arc::new(CountingGateway {
            embeds: AtomicUsize::new(0),
            fail_first: 10,
        });
        let client = GatewayClient::new(inner, &config());
        let err = client.embed("hola").await.unwrap_err();
        assert!(matches!(err, EngineError::GatewayUnavailable(_)));
    }

    #[tokio::test]
    async fn hang_becomes_typed_timeout() {
        let client = GatewayClient::new(Arc::new(HangingGateway), &config());
        let err = client.embed("hola").await.unwrap_err();
        assert!(matches!(err, EngineError::GatewayTimeout(_)));
    }
}
