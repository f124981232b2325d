use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::core::config::Config;
use crate::core::story::{GenerationRequest, ImageData};

/// Image-generation capability. The model is stateless between calls and
/// accepts at most `MAX_REFERENCE_SLOTS` reference images per request.
/// Errors stay opaque (`anyhow`); the interpreter classifies them from their
/// rendered message text.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageModelResponse>;
}

/// Decoded model response: an ordered mix of inline images and prose. The
/// interpreter decides what a given mix means for the page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageModelResponse {
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    Image(ImageData),
    Text(String),
}

impl ImageModelResponse {
    pub fn first_image(&self) -> Option<&ImageData> {
        self.parts.iter().find_map(|p| match p {
            ResponsePart::Image(img) => Some(img),
            ResponsePart::Text(_) => None,
        })
    }

    /// All prose parts joined, used for position hints and for classifying
    /// text-only responses.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ResponsePart::Text(t) => Some(t.as_str()),
                ResponsePart::Image(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Fetches avatar reference bytes for page-1 composition.
#[async_trait]
pub trait AvatarSource: Send + Sync {
    async fn fetch(&self, avatar_url: &str) -> Result<ImageData>;
}

pub struct HttpAvatarSource {
    client: reqwest::Client,
}

impl HttpAvatarSource {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpAvatarSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AvatarSource for HttpAvatarSource {
    async fn fetch(&self, avatar_url: &str) -> Result<ImageData> {
        let parsed = url::Url::parse(avatar_url)
            .with_context(|| format!("Invalid avatar url: {}", avatar_url))?;

        let resp = self.client.get(parsed.as_str()).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!(
                "Avatar fetch failed ({}): {}",
                resp.status(),
                avatar_url
            ));
        }

        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = resp.bytes().await?.to_vec();
        debug!("Fetched avatar ({} bytes) from {}", bytes.len(), avatar_url);
        Ok(ImageData { bytes, mime_type })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_provider")]
    pub provider: String,
    pub gemini: Option<GeminiImageConfig>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: default_image_provider(),
            gemini: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiImageConfig {
    pub api_key: String,
    #[serde(default = "default_image_model")]
    pub model: String,
}

fn default_image_provider() -> String {
    "gemini".to_string()
}

fn default_image_model() -> String {
    "gemini-2.5-flash-image".to_string()
}

pub fn create_image_model(config: &Config) -> Result<Box<dyn ImageModel>> {
    info!(
        "Initializing image model for provider: {}",
        config.image.provider
    );
    match config.image.provider.as_str() {
        "gemini" => {
            let cfg = config
                .image
                .gemini
                .as_ref()
                .context("Gemini image config missing")?;
            Ok(Box::new(GeminiImageClient::new(&cfg.api_key, &cfg.model)))
        }
        other => Err(anyhow!("Unknown image provider: {}", other)),
    }
}

// --- Gemini image generation ---

pub struct GeminiImageClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiImageClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ImageGenRequest {
    contents: Vec<ImageGenContent>,
    #[serde(rename = "generationConfig")]
    generation_config: ImageGenConfigBody,
}

#[derive(Serialize)]
struct ImageGenContent {
    role: String,
    parts: Vec<WirePart>,
}

#[derive(Serialize)]
struct ImageGenConfigBody {
    #[serde(rename = "responseModalities")]
    response_modalities: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct WirePart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(
        rename = "inlineData",
        skip_serializing_if = "Option::is_none",
        default
    )]
    inline_data: Option<WireInlineData>,
}

#[derive(Serialize, Deserialize)]
struct WireInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct ImageGenResponse {
    candidates: Option<Vec<ImageGenCandidate>>,
    error: Option<ImageApiError>,
}

#[derive(Deserialize)]
struct ImageGenCandidate {
    content: Option<ImageGenCandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ImageGenCandidateContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize, Debug)]
struct ImageApiError {
    message: String,
}

#[async_trait]
impl ImageModel for GeminiImageClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<ImageModelResponse> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let mut parts = vec![WirePart {
            text: Some(request.text_prompt.clone()),
            inline_data: None,
        }];
        for image in &request.images {
            parts.push(WirePart {
                text: None,
                inline_data: Some(WireInlineData {
                    mime_type: image.mime_type.clone(),
                    data: BASE64.encode(&image.bytes),
                }),
            });
        }

        let body = ImageGenRequest {
            contents: vec![ImageGenContent {
                role: "user".to_string(),
                parts,
            }],
            generation_config: ImageGenConfigBody {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            },
        };

        debug!(
            "Image generation call: {} reference image(s), {} prompt chars",
            request.images.len(),
            request.text_prompt.len()
        );

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Image API error ({}): {}", status, error_text));
        }

        let response_text = resp.text().await?;
        let result: ImageGenResponse = serde_json::from_str(&response_text).with_context(|| {
            format!("Failed to parse image model response. Body: {}", response_text)
        })?;

        if let Some(err) = result.error {
            return Err(anyhow!("Image API returned error: {}", err.message));
        }

        let candidate = result
            .candidates
            .and_then(|mut c| if c.is_empty() { None } else { Some(c.remove(0)) })
            .ok_or_else(|| anyhow!("Image model returned no candidates"))?;

        let content = match candidate.content {
            Some(content) => content,
            None => {
                let reason = candidate.finish_reason.as_deref().unwrap_or("UNKNOWN");
                return Err(anyhow!(
                    "Image model returned no content. Finish reason: {}",
                    reason
                ));
            }
        };

        let mut out = Vec::new();
        for part in content.parts {
            if let Some(inline) = part.inline_data {
                let bytes = BASE64
                    .decode(inline.data.as_bytes())
                    .context("Invalid base64 in inline image data")?;
                out.push(ResponsePart::Image(ImageData {
                    bytes,
                    mime_type: inline.mime_type,
                }));
            } else if let Some(text) = part.text {
                out.push(ResponsePart::Text(text));
            }
        }

        Ok(ImageModelResponse { parts: out })
    }
}
