use std::{env, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use ollama_rs::{
    generation::{
        chat::{request::ChatMessageRequest, ChatMessage},
        embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest},
    },
    Ollama,
};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::settings::{OllamaSettings, OpenAiSettings, Provider, Settings};

const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
const API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A provider-neutral chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Sends one conversation and returns the generated reply.
    async fn generate(&self, messages: &[Message]) -> Result<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds every text in one batch, preserving input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Client for OpenAI-compatible chat-completions and embeddings endpoints.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiClient {
    pub fn new(settings: &OpenAiSettings) -> Result<Self> {
        let api_key = match &settings.api_key {
            Some(key) => key.clone(),
            None => env::var(API_KEY_VAR)
                .with_context(|| format!("no openai.api_key configured and {API_KEY_VAR} not set"))?,
        };
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            chat_model: settings.chat_model.clone(),
            embedding_model: settings.embedding_model.clone(),
        })
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let resp = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            bail!(
                "{endpoint} request failed with {status}: {}",
                resp.text().await.unwrap_or_default()
            );
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let body = ChatRequest {
            model: &self.chat_model,
            messages,
        };
        let resp: ChatResponse = self.post("chat/completions", &body).await?;
        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion returned no content"))?;
        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let mut resp: EmbeddingResponse = self.post("embeddings", &body).await?;
        resp.data.sort_by_key(|d| d.index);
        debug!("Received {} embeddings", resp.data.len());
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Client for a local Ollama server.
pub struct OllamaClient {
    ollama: Ollama,
    chat_model: String,
    embedding_model: String,
}

impl OllamaClient {
    pub fn new(settings: &OllamaSettings) -> Result<Self> {
        let url = Url::parse(&settings.url).context("invalid ollama.url")?;
        let host = url
            .host_str()
            .ok_or_else(|| anyhow!("ollama.url has no host"))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| anyhow!("ollama.url has no port"))?;
        Ok(Self {
            ollama: Ollama::builder()
                .host(format!("{}://{host}", url.scheme()))
                .port(port)
                .build(),
            chat_model: settings.chat_model.clone(),
            embedding_model: settings.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        let messages = messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatMessage::system(m.content.clone()),
                Role::User => ChatMessage::user(m.content.clone()),
            })
            .collect();
        let resp = self
            .ollama
            .send_chat_messages(ChatMessageRequest::new(self.chat_model.clone(), messages))
            .await?;
        Ok(resp.message.content.trim().to_string())
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let resp = self.ollama.generate_embeddings(request).await?;
        Ok(resp.embeddings)
    }
}

/// The configured text-generation and embedding backend.
pub enum ServiceClient {
    OpenAi(OpenAiClient),
    Ollama(OllamaClient),
}

impl ServiceClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(match settings.llm.provider {
            Provider::OpenAi => Self::OpenAi(OpenAiClient::new(&settings.openai)?),
            Provider::Ollama => Self::Ollama(OllamaClient::new(&settings.ollama)?),
        })
    }
}

#[async_trait]
impl TextGenerator for ServiceClient {
    async fn generate(&self, messages: &[Message]) -> Result<String> {
        match self {
            Self::OpenAi(client) => client.generate(messages).await,
            Self::Ollama(client) => client.generate(messages).await,
        }
    }
}

#[async_trait]
impl Embedder for ServiceClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self {
            Self::OpenAi(client) => client.embed(texts).await,
            Self::Ollama(client) => client.embed(texts).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai_settings(api_key: Option<&str>) -> OpenAiSettings {
        OpenAiSettings {
            base_url: "https://api.example.com/v1/".to_string(),
            api_key: api_key.map(str::to_string),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let messages = [Message::system("be candid"), Message::user("hello")];
        let body = serde_json::to_value(ChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "system", "content": "be candid"},
                    {"role": "user", "content": "hello"},
                ]
            })
        );
    }

    #[test]
    fn embedding_response_tolerates_extra_fields() {
        let resp: EmbeddingResponse = serde_json::from_str(
            r#"{"object": "list", "model": "m", "usage": {"prompt_tokens": 2, "total_tokens": 2},
                "data": [{"object": "embedding", "index": 1, "embedding": [0.5]},
                         {"object": "embedding", "index": 0, "embedding": [0.25]}]}"#,
        )
        .unwrap();
        assert_eq!(resp.data.len(), 2);
        assert_eq!(resp.data[0].index, 1);
    }

    #[test]
    fn openai_client_trims_base_url() {
        let client = OpenAiClient::new(&openai_settings(Some("sk-test"))).unwrap();
        assert_eq!(client.base_url, "https://api.example.com/v1");
        assert_eq!(client.api_key, "sk-test");
    }

    #[test]
    fn ollama_client_accepts_default_url() {
        let settings = OllamaSettings {
            url: "http://127.0.0.1:11434".to_string(),
            chat_model: "llama3.1:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
        };
        let client = OllamaClient::new(&settings).unwrap();
        assert_eq!(client.ollama.url_str(), "http://127.0.0.1:11434/");
    }

    #[test]
    fn ollama_client_falls_back_to_scheme_port() {
        let settings = OllamaSettings {
            url: "https://ollama.internal".to_string(),
            chat_model: "llama3.1:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
        };
        let client = OllamaClient::new(&settings).unwrap();
        assert_eq!(client.ollama.url_str(), "https://ollama.internal/");
    }

    #[test]
    fn ollama_client_rejects_malformed_url() {
        let settings = OllamaSettings {
            url: "not a url".to_string(),
            chat_model: "llama3.1:8b".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
        };
        assert!(OllamaClient::new(&settings).is_err());
    }
}
