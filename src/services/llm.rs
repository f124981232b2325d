use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::core::config::Config;

/// Text-generation capability. Implementations wrap a concrete provider;
/// errors stay opaque (`anyhow`) because the pipeline classifies them from
/// their rendered message text.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    pub gemini: Option<GeminiTextConfig>,
    pub openai: Option<OpenAiCompatConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiTextConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_text_model")]
    pub model: String,
}

/// Covers the OpenAI API and any server speaking the same protocol (local
/// runtimes expose one); `base_url` overrides the hosted endpoint and
/// `api_key` may be empty for servers that do not check it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAiCompatConfig {
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

fn default_gemini_text_model() -> String {
    "gemini-2.0-flash".to_string()
}

pub fn create_llm(config: &Config) -> Result<Box<dyn LlmClient>> {
    match config.llm.provider.as_str() {
        "gemini" => {
            let cfg = config.llm.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiTextClient::new(&cfg.api_key, &cfg.model)))
        }
        "openai" => {
            let cfg = config.llm.openai.as_ref().context("OpenAI config missing")?;
            Ok(Box::new(OpenAiCompatClient::new(
                &cfg.api_key,
                &cfg.model,
                cfg.base_url.as_deref(),
            )))
        }
        other => Err(anyhow!("Unknown LLM provider: {}", other)),
    }
}

// --- Gemini ---

#[derive(Debug)]
pub struct GeminiTextClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiTextClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct GeminiChatRequest {
    contents: Vec<GeminiTurn>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiInstruction>,
}

#[derive(Serialize)]
struct GeminiTurn {
    role: String,
    parts: Vec<GeminiTextPart>,
}

#[derive(Serialize)]
struct GeminiInstruction {
    parts: Vec<GeminiTextPart>,
}

#[derive(Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiChatResponse {
    candidates: Option<Vec<GeminiChatCandidate>>,
    error: Option<GeminiApiError>,
}

#[derive(Deserialize)]
struct GeminiChatCandidate {
    content: Option<GeminiChatContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiChatContent {
    #[serde(default)]
    parts: Vec<GeminiChatPart>,
}

#[derive(Deserialize)]
struct GeminiChatPart {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiApiError {
    message: String,
}

#[async_trait]
impl LlmClient for GeminiTextClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = GeminiChatRequest {
            contents: vec![GeminiTurn {
                role: "user".to_string(),
                parts: vec![GeminiTextPart {
                    text: user.to_string(),
                }],
            }],
            system_instruction: Some(GeminiInstruction {
                parts: vec![GeminiTextPart {
                    text: system.to_string(),
                }],
            }),
        };

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiChatResponse = serde_json::from_str(&response_text)
            .with_context(|| format!("Failed to parse Gemini response. Body: {}", response_text))?;

        if let Some(err) = result.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        if let Some(candidates) = result.candidates {
            if let Some(first) = candidates.first() {
                if let Some(content) = &first.content {
                    if let Some(part) = content.parts.first() {
                        return Ok(part.text.clone());
                    }
                }
                let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
                return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
            }
        }

        Err(anyhow!(
            "Gemini response format unexpected or empty. Body: {}",
            response_text
        ))
    }
}

// --- OpenAI-compatible ---

#[derive(Debug)]
pub struct OpenAiCompatClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatCompletionRequest {
            model: self.model.clone(),
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
        };

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Chat completion API error: {}", error_text));
        }

        let result: ChatCompletionResponse = resp.json().await?;
        if let Some(choice) = result.choices.first() {
            if let Some(content) = &choice.message.content {
                return Ok(content.clone());
            }
        }

        Err(anyhow!("Chat completion response empty or missing content"))
    }
}
