//! HTTP-backed gateway provider for OpenAI-compatible endpoints.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::LanguageGateway;

pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
    chat_model: String,
    embed_model: String,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
        embed_model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            embed_model: embed_model.into(),
        }
    }

    /// Parse a response body as JSON, returning a clear error if the server
    /// returned HTML (e.g. a gateway error page) instead of valid JSON.
    async fn parse_json_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| anyhow!("failed to read response body from {}: {}", endpoint, e))?;

        let trimmed = body.trim_start();
        if trimmed.starts_with('<') || trimmed.starts_with("<!") {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(anyhow!(
                "endpoint {} returned HTML instead of JSON (HTTP {}): {}",
                endpoint,
                status,
                preview
            ));
        }

        serde_json::from_str::<T>(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            anyhow!(
                "failed to parse JSON from {} (HTTP {}): {}. Body: {}",
                endpoint,
                status,
                e,
                preview
            )
        })
    }

    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let endpoint = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.chat_model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }))
            .send()
            .await?;

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }

        let parsed: ChatResponse = Self::parse_json_response(response, &endpoint).await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat response contained no choices"))
    }
}

#[async_trait]
impl LanguageGateway for HttpGateway {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.embed_model,
                "input": text,
            }))
            .send()
            .await?;

        #[derive(Deserialize)]
        struct EmbedResponse {
            data: Vec<EmbedData>,
        }
        #[derive(Deserialize)]
        struct EmbedData {
            embedding: Vec<f32>,
        }

        let parsed: EmbedResponse = Self::parse_json_response(response, &endpoint).await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("embeddings response contained no data"))
    }

    async fn generate(&self, prompt: &str, context: &str) -> Result<String> {
        let user = if context.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\nContexto:\n{}", prompt, context)
        };
        self.chat(
            "Eres un asistente jurídico. Responde de forma breve y precisa.",
            &user,
        )
        .await
    }

    async fn rephrase(&self, query: &str) -> Result<Vec<String>> {
        let raw = self
            .chat(
                "Reformula la consulta del usuario en hasta 3 variantes de búsqueda, una por línea. \
                 Responde solo con las variantes.",
                query,
            )
            .await?;

        let variants: Vec<String> = raw
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*', '1', '2', '3', '.', ')']).trim())
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect();

        if variants.is_empty() {
            Ok(vec![query.to_string()])
        } else {
            Ok(variants)
        }
    }
}
