// src/llm_extract.rs

use crate::config::LlmConfig;
use crate::schema::{Described, Form1003};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const PREAMBLE: &str = "What you are seeing is a filled out 1003 loan application form. \
                        Your job is to extract the information from it accurately.";

const POSTAMBLE: &str = "Do not include any explanation in the reply. \
                         Only include the extracted information in the reply.";

/// Greedy decoding; extraction must not be creative.
pub const EXTRACTION_TEMPERATURE: f64 = 0.0;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Communication(#[from] reqwest::Error),
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),
    #[error("empty response from LLM")]
    EmptyResponse,
}

/// A chat-completion backend: one system message, one user message, one reply.
#[async_trait]
pub trait ChatModel {
    async fn complete(&self, system: &str, user: &str, temperature: f64)
    -> Result<String, LlmError>;
}

/// The two messages sent for one extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Build the extraction prompt around the OCR text. The text is embedded as-is.
pub fn build_prompt(extracted_text: &str) -> Prompt {
    let format_instructions = Form1003::schema().describe();
    Prompt {
        system: PREAMBLE.to_string(),
        user: format!("{format_instructions}\n\n{extracted_text}\n\n{POSTAMBLE}"),
    }
}

/// Ask the model to turn OCR text into a serialized [`Form1003`].
///
/// The reply comes back untouched; parsing it is the caller's business.
pub async fn extract_structured_record<M>(model: &M, raw_text: &str) -> Result<String, LlmError>
where
    M: ChatModel + ?Sized,
{
    let prompt = build_prompt(raw_text);
    debug!(
        system_chars = prompt.system.len(),
        user_chars = prompt.user.len(),
        "Sending extraction prompt"
    );
    let reply = model
        .complete(&prompt.system, &prompt.user, EXTRACTION_TEMPERATURE)
        .await?;
    info!(chars = reply.len(), "LLM reply received");
    Ok(reply)
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible `/chat/completions` backend.
pub struct OpenAiChat {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiChat {
    pub fn new(llm: &LlmConfig, api_key: impl Into<String>) -> Self {
        info!(url = %llm.base_url, model = %llm.model, "Using chat completion backend");
        Self {
            client: Client::new(),
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            model: llm.model.clone(),
            api_key: api_key.into(),
        }
    }
}

fn chat_request(model: &str, system: &str, user: &str, temperature: f64) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            },
        ],
        temperature,
    }
}

fn first_choice(body: &str) -> Result<String, LlmError> {
    let chat_response: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    chat_response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(LlmError::EmptyResponse)
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<String, LlmError> {
        let request = chat_request(&self.model, system, user, temperature);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }

        first_choice(&body)
    }
}
