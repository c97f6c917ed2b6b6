use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::error::ClientError;
use crate::fragments::{decode_fragments, FragmentStream};

pub const DEFAULT_MAX_TOKENS: u32 = 100;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_new_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct EmbedRequest {
    chunks: Vec<String>,
}

/// Client for the standalone generation and embedding model hosts.
#[derive(Clone)]
pub struct PlaygroundClient {
    client: Client,
    generate_url: String,
    embed_url: String,
}

impl PlaygroundClient {
    pub fn new(generate_url: &str, embed_url: &str) -> Self {
        Self {
            client: Client::new(),
            generate_url: generate_url.to_string(),
            embed_url: embed_url.to_string(),
        }
    }

    /// Stream a raw completion from the generation model.
    pub async fn generate(
        &self,
        prompt: &str,
        max_new_tokens: u32,
        temperature: f32,
    ) -> Result<FragmentStream, ClientError> {
        let request = GenerateRequest {
            prompt,
            max_new_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&self.generate_url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::status(&self.generate_url, response.status()));
        }
        Ok(decode_fragments(response.bytes_stream()))
    }

    /// Embed every non-blank line of `text`. The response shape is whatever
    /// the embedding host returns.
    pub async fn embed(&self, text: &str) -> Result<Value, ClientError> {
        let request = EmbedRequest {
            chunks: split_chunks(text),
        };

        let response = self
            .client
            .post(&self.embed_url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::status(&self.embed_url, response.status()));
        }
        Ok(response.json().await?)
    }
}

fn split_chunks(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}
