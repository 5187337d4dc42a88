//! Ollama HTTP protocol client (spec.md §4.4): `/api/generate` and
//! `/api/embeddings`, always `stream: false`, temperature passed under
//! `options.temperature`. Grounded on the endpoint-inference trick in the
//! teacher's `RemoteLlmProvider::embed` (`llm/remote.rs`) — picking the
//! right path off a single configured base URL rather than wiring a
//! second client.

use std::env;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::LlmClient;

pub struct OllamaClient {
    client: Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, request_timeout_seconds: u64) -> anyhow::Result<Self> {
        // OLLAMA_HOST overrides the configured base_url, matching how the
        // teacher lets an env var win over config for remote endpoints.
        let base_url = env::var("OLLAMA_HOST").unwrap_or_else(|_| base_url.to_string());
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout_seconds))
            .build()
            .context("failed to build ollama http client")?;
        Ok(OllamaClient { client, base_url })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str, temperature: f32) -> anyhow::Result<String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature },
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("ollama generate request failed")?
            .error_for_status()
            .context("ollama generate returned an error status")?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .context("failed to decode ollama generate response")?;
        Ok(parsed.response)
    }

    async fn embed(&self, model: &str, text: &str) -> anyhow::Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let body = EmbeddingsRequest { model, prompt: text };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("ollama embeddings request failed")?
            .error_for_status()
            .context("ollama embeddings returned an error status")?;

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .context("failed to decode ollama embeddings response")?;
        Ok(parsed.embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn generate_posts_stream_false_and_decodes_response() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "llama3",
                "stream": false,
                "options": { "temperature": 0.5 }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"response": "hello world"}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), 10).unwrap();
        let out = client.generate("llama3", "say hi", 0.5).await.unwrap();

        mock.assert_async().await;
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn embed_posts_prompt_and_decodes_vector() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"embedding": [0.1, 0.2, 0.3]}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), 10).unwrap();
        let out = client.embed("nomic-embed-text", "some text").await.unwrap();

        mock.assert_async().await;
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn error_status_surfaces_as_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .with_status(500)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), 10).unwrap();
        let result = client.generate("llama3", "x", 0.1).await;

        mock.assert_async().await;
        assert!(result.is_err());
    }
}
