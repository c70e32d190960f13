//! Vision-language model clients.
//!
//! Three wire protocols behind one [`VisionBackend`] trait:
//! Ollama `/api/generate`, OpenAI-compatible `/v1/chat/completions`, and
//! Gemini `generateContent`. All calls are blocking; the recognition loop is
//! single-threaded and bounds each request with the client timeout.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors from a VLM client.
#[derive(Debug, thiserror::Error)]
pub enum VlmClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// Server returned an error status.
    #[error("API error {status}: {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Hosted protocol without its API key.
    #[error("API key environment variable {0} is not set")]
    MissingApiKey(String),
    /// Response carried no text.
    #[error("Empty reply from {0}")]
    EmptyReply(&'static str),
    /// Protocol name not recognised.
    #[error("Unknown VLM protocol '{0}' (expected ollama, openai or gemini)")]
    UnknownProtocol(String),
}

/// Wire protocol of a VLM endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VlmProtocol {
    /// Local Ollama server
    #[default]
    Ollama,
    /// OpenAI-compatible chat completions
    #[serde(alias = "openai-compatible")]
    OpenAi,
    /// Google Gemini
    Gemini,
}

impl VlmProtocol {
    /// Stable lowercase name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Conventional base URL
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::Ollama => "http://localhost:11434",
            Self::OpenAi => "https://api.openai.com",
            Self::Gemini => "https://generativelanguage.googleapis.com",
        }
    }

    /// Conventional API key variable
    #[must_use]
    pub const fn default_api_key_env(self) -> &'static str {
        match self {
            Self::Ollama => "",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl std::fmt::Display for VlmProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for VlmProtocol {
    type Err = VlmClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "openai-compatible" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(VlmClientError::UnknownProtocol(other.to_string())),
        }
    }
}

/// Connection settings shared by all protocols
#[derive(Debug, Clone, PartialEq)]
pub struct VlmSettings {
    /// Wire protocol
    pub protocol: VlmProtocol,
    /// Server base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Environment variable holding the API key (hosted protocols)
    pub api_key_env: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Generation limit
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f64,
}

impl Default for VlmSettings {
    fn default() -> Self {
        let protocol = VlmProtocol::default();
        Self {
            protocol,
            base_url: protocol.default_base_url().to_string(),
            model: "qwen2.5vl:7b".to_string(),
            api_key_env: protocol.default_api_key_env().to_string(),
            timeout: Duration::from_secs(30),
            max_tokens: 256,
            temperature: 0.0,
        }
    }
}

/// A VLM endpoint that answers a prompt about one image
pub trait VisionBackend {
    /// Protocol spoken
    fn protocol(&self) -> VlmProtocol;

    /// Raw reply text for a prompt and a PNG image
    fn query(&self, prompt: &str, image_png: &[u8]) -> Result<String, VlmClientError>;
}

/// Build the client for the configured protocol
pub fn connect(settings: &VlmSettings) -> Result<Box<dyn VisionBackend>, VlmClientError> {
    let http = reqwest::blocking::Client::builder()
        .timeout(settings.timeout)
        .build()?;
    let base_url = settings.base_url.trim_end_matches('/').to_string();
    Ok(match settings.protocol {
        VlmProtocol::Ollama => Box::new(OllamaClient {
            http,
            base_url,
            settings: settings.clone(),
        }),
        VlmProtocol::OpenAi => Box::new(OpenAiClient {
            http,
            base_url,
            api_key: api_key(&settings.api_key_env)?,
            settings: settings.clone(),
        }),
        VlmProtocol::Gemini => Box::new(GeminiClient {
            http,
            base_url,
            api_key: api_key(&settings.api_key_env)?,
            settings: settings.clone(),
        }),
    })
}

fn api_key(var: &str) -> Result<String, VlmClientError> {
    match std::env::var(var) {
        Ok(key) if !var.is_empty() && !key.trim().is_empty() => Ok(key),
        _ => Err(VlmClientError::MissingApiKey(var.to_string())),
    }
}

fn post_json<T: Serialize, R: serde::de::DeserializeOwned>(
    request: reqwest::blocking::RequestBuilder,
    body: &T,
) -> Result<R, VlmClientError> {
    let resp = request.json(body).send()?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(VlmClientError::ApiError {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json()?)
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Request body for `/api/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaGenerateRequest {
    /// Model name
    pub model: String,
    /// Prompt text
    pub prompt: String,
    /// Base64 images
    pub images: Vec<String>,
    /// Constrained output format
    pub format: String,
    /// Streaming flag
    pub stream: bool,
    /// Sampling options
    pub options: OllamaOptions,
}

/// Ollama sampling options.
#[derive(Debug, Clone, Serialize)]
pub struct OllamaOptions {
    /// Sampling temperature
    pub temperature: f64,
    /// Token limit
    pub num_predict: u32,
}

/// Response body of `/api/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaGenerateResponse {
    /// Generated text
    #[serde(default)]
    pub response: String,
}

struct OllamaClient {
    http: reqwest::blocking::Client,
    base_url: String,
    settings: VlmSettings,
}

impl OllamaClient {
    fn body(&self, prompt: &str, image_png: &[u8]) -> OllamaGenerateRequest {
        OllamaGenerateRequest {
            model: self.settings.model.clone(),
            prompt: prompt.to_string(),
            images: vec![BASE64.encode(image_png)],
            format: "json".to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: self.settings.temperature,
                num_predict: self.settings.max_tokens,
            },
        }
    }
}

impl VisionBackend for OllamaClient {
    fn protocol(&self) -> VlmProtocol {
        VlmProtocol::Ollama
    }

    fn query(&self, prompt: &str, image_png: &[u8]) -> Result<String, VlmClientError> {
        let url = format!("{}/api/generate", self.base_url);
        let reply: OllamaGenerateResponse =
            post_json(self.http.post(&url), &self.body(prompt, image_png))?;
        non_empty(reply.response, "ollama")
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// One part of a multimodal chat message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text part
    Text {
        /// Text
        text: String,
    },
    /// Image part
    ImageUrl {
        /// Image reference
        image_url: ImageUrl,
    },
}

/// Image reference, here always a data URI.
#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    /// URL or data URI
    pub url: String,
}

/// A user message with text and image parts.
#[derive(Debug, Clone, Serialize)]
pub struct VisionMessage {
    /// Author role
    pub role: String,
    /// Message parts
    pub content: Vec<ContentPart>,
}

/// Request body for `/v1/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct VisionChatRequest {
    /// Model identifier
    pub model: String,
    /// Messages
    pub messages: Vec<VisionMessage>,
    /// Sampling temperature
    pub temperature: f64,
    /// Token limit
    pub max_tokens: u32,
}

/// Message in a chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatReplyMessage {
    /// Generated text
    #[serde(default)]
    pub content: Option<String>,
}

/// A single completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatReplyChoice {
    /// Generated message
    pub message: ChatReplyMessage,
}

/// Response from a chat completion endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    /// Generated choices
    #[serde(default)]
    pub choices: Vec<ChatReplyChoice>,
}

struct OpenAiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    settings: VlmSettings,
}

impl OpenAiClient {
    fn body(&self, prompt: &str, image_png: &[u8]) -> VisionChatRequest {
        VisionChatRequest {
            model: self.settings.model.clone(),
            messages: vec![VisionMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: prompt.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:image/png;base64,{}", BASE64.encode(image_png)),
                        },
                    },
                ],
            }],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        }
    }
}

impl VisionBackend for OpenAiClient {
    fn protocol(&self) -> VlmProtocol {
        VlmProtocol::OpenAi
    }

    fn query(&self, prompt: &str, image_png: &[u8]) -> Result<String, VlmClientError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let reply: ChatReply = post_json(
            self.http.post(&url).bearer_auth(&self.api_key),
            &self.body(prompt, image_png),
        )?;
        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        non_empty(text, "openai")
    }
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

/// One part of a Gemini content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    /// Text part
    Text {
        /// Text
        text: String,
    },
    /// Inline image part
    InlineData {
        /// Image payload
        inline_data: InlineData,
    },
    /// Any other part kind
    Other(serde_json::Value),
}

/// Base64 payload with its MIME type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineData {
    /// MIME type
    pub mime_type: String,
    /// Base64 data
    pub data: String,
}

/// A Gemini content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    /// Parts
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// Gemini generation settings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    /// Output MIME type
    pub response_mime_type: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Token limit
    pub max_output_tokens: u32,
}

/// Request body for `generateContent`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    /// Content blocks
    pub contents: Vec<GeminiContent>,
    /// Generation settings
    pub generation_config: GenerationConfig,
}

/// A response candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiCandidate {
    /// Candidate content
    pub content: Option<GeminiContent>,
}

/// Response body of `generateContent`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateContentResponse {
    /// Candidates
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

impl GenerateContentResponse {
    /// Text of the first part of the first candidate
    #[must_use]
    pub fn first_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .find_map(|p| match p {
                GeminiPart::Text { text } => Some(text),
                GeminiPart::InlineData { .. } | GeminiPart::Other(_) => None,
            })
    }
}

struct GeminiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    settings: VlmSettings,
}

impl GeminiClient {
    fn body(&self, prompt: &str, image_png: &[u8]) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text {
                        text: prompt.to_string(),
                    },
                    GeminiPart::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png".to_string(),
                            data: BASE64.encode(image_png),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_tokens,
            },
        }
    }
}

impl VisionBackend for GeminiClient {
    fn protocol(&self) -> VlmProtocol {
        VlmProtocol::Gemini
    }

    fn query(&self, prompt: &str, image_png: &[u8]) -> Result<String, VlmClientError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.settings.model
        );
        let reply: GenerateContentResponse = post_json(
            self.http.post(&url).header("x-goog-api-key", &self.api_key),
            &self.body(prompt, image_png),
        )?;
        non_empty(reply.first_text().unwrap_or_default(), "gemini")
    }
}

fn non_empty(text: String, protocol: &'static str) -> Result<String, VlmClientError> {
    if text.trim().is_empty() {
        Err(VlmClientError::EmptyReply(protocol))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn settings(protocol: VlmProtocol) -> VlmSettings {
        VlmSettings {
            protocol,
            base_url: "http://localhost:1/".to_string(),
            model: "test-model".to_string(),
            api_key_env: "HALLAR_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..VlmSettings::default()
        }
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("ollama".parse::<VlmProtocol>().unwrap(), VlmProtocol::Ollama);
        assert_eq!("OpenAI".parse::<VlmProtocol>().unwrap(), VlmProtocol::OpenAi);
        assert_eq!("gemini".parse::<VlmProtocol>().unwrap(), VlmProtocol::Gemini);
        assert!(matches!(
            "claude".parse::<VlmProtocol>(),
            Err(VlmClientError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn test_hosted_protocols_need_api_key() {
        for protocol in [VlmProtocol::OpenAi, VlmProtocol::Gemini] {
            let err = connect(&settings(protocol)).err().unwrap();
            assert!(matches!(err, VlmClientError::MissingApiKey(_)));
        }
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let backend = connect(&settings(VlmProtocol::Ollama)).unwrap();
        assert_eq!(backend.protocol(), VlmProtocol::Ollama);
    }

    mod wire_tests {
        use super::*;

        #[test]
        fn test_ollama_request_shape() {
            let client = OllamaClient {
                http: reqwest::blocking::Client::new(),
                base_url: String::new(),
                settings: settings(VlmProtocol::Ollama),
            };
            let body = serde_json::to_value(client.body("find it", b"png")).unwrap();
            assert_eq!(body["model"], "test-model");
            assert_eq!(body["format"], "json");
            assert_eq!(body["stream"], false);
            assert_eq!(body["images"][0], BASE64.encode(b"png"));
            assert_eq!(body["options"]["num_predict"], 256);
        }

        #[test]
        fn test_openai_request_shape() {
            let client = OpenAiClient {
                http: reqwest::blocking::Client::new(),
                base_url: String::new(),
                api_key: "k".to_string(),
                settings: settings(VlmProtocol::OpenAi),
            };
            let body = serde_json::to_value(client.body("find it", b"png")).unwrap();
            let parts = &body["messages"][0]["content"];
            assert_eq!(parts[0]["type"], "text");
            assert_eq!(parts[0]["text"], "find it");
            assert_eq!(parts[1]["type"], "image_url");
            assert!(parts[1]["image_url"]["url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,"));
        }

        #[test]
        fn test_gemini_request_shape() {
            let client = GeminiClient {
                http: reqwest::blocking::Client::new(),
                base_url: String::new(),
                api_key: "k".to_string(),
                settings: settings(VlmProtocol::Gemini),
            };
            let body = serde_json::to_value(client.body("find it", b"png")).unwrap();
            assert_eq!(
                body["generationConfig"]["responseMimeType"],
                "application/json"
            );
            let parts = &body["contents"][0]["parts"];
            assert_eq!(parts[0]["text"], "find it");
            assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        }

        #[test]
        fn test_reply_extraction() {
            let chat: ChatReply = serde_json::from_str(
                r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"{\"found\":true}"}}]}"#,
            )
            .unwrap();
            assert_eq!(
                chat.choices[0].message.content.as_deref(),
                Some("{\"found\":true}")
            );

            let gemini: GenerateContentResponse = serde_json::from_str(
                r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"{}"}]}}]}"#,
            )
            .unwrap();
            assert_eq!(gemini.first_text().as_deref(), Some("{}"));

            let empty: GenerateContentResponse = serde_json::from_str("{}").unwrap();
            assert_eq!(empty.first_text(), None);

            let ollama: OllamaGenerateResponse =
                serde_json::from_str(r#"{"model":"m","response":"{}","done":true}"#).unwrap();
            assert_eq!(ollama.response, "{}");
        }

        #[test]
        fn test_empty_reply_is_error() {
            assert!(matches!(
                non_empty("  ".to_string(), "ollama"),
                Err(VlmClientError::EmptyReply("ollama"))
            ));
        }
    }
}
