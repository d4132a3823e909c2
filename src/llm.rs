//! Answer synthesis through a hosted chat-completions endpoint.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const API_KEY_ENV_VAR: &str = "GROQ_API_KEY";
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_LLM_MODEL: &str = "openai/gpt-oss-20b";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Turns a fully assembled prompt into an answer.
pub trait LanguageModel: Send + Sync {
    fn invoke(&self, prompt: &str) -> Result<String>;
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint (Groq by
/// default). One request per call, no retries.
pub struct GroqClient {
    http: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl GroqClient {
    pub fn new(base_url: &str, model: &str, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::MissingCredential(API_KEY_ENV_VAR));
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    /// Build a client using the key from `GROQ_API_KEY`.
    pub fn from_env(base_url: &str, model: &str) -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV_VAR)
            .map_err(|_| Error::MissingCredential(API_KEY_ENV_VAR))?;
        Self::new(base_url, model, api_key)
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl LanguageModel for GroqClient {
    fn invoke(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        debug!(
            model = %self.model,
            prompt_len = prompt.len(),
            "calling language model"
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::LanguageModel(format!("{status}: {body}")));
        }

        parse_answer(response.json()?)
    }
}

fn parse_answer(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| {
            Error::LanguageModel("response contained no message content".into())
        })
}

impl std::fmt::Debug for GroqClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroqClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
