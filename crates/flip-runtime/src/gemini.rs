//! Gemini LLM Provider
//!
//! Implementation of `LlmProvider` for the Google generative-language REST API.

use async_trait::async_trait;
use flip_chat::{
    error::{ChatError, Result},
    message::{Message, Role},
    provider::{
        Completion, CompletionStream, FinishReason, GenerationOptions, LlmProvider, ModelInfo,
        ProviderInfo, StreamChunk, TokenUsage,
    },
};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Gemini provider configuration
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,

    /// API host
    pub base_url: String,

    /// API version path segment
    pub api_version: String,

    /// Default model for the widget
    pub model: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com".into(),
            api_version: "v1beta".into(),
            model: flip_chat::provider::DEFAULT_MODEL.into(),
            timeout_secs: 120,
        }
    }
}

impl GeminiConfig {
    /// Reads `GEMINI_API_KEY` (or `API_KEY`), `GEMINI_MODEL` and `GEMINI_API_BASE`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .map_err(|_| ChatError::Config("GEMINI_API_KEY not set".into()))?;
        if api_key.trim().is_empty() {
            return Err(ChatError::Config("GEMINI_API_KEY is empty".into()));
        }

        let defaults = Self::default();
        Ok(Self {
            api_key: api_key.trim().to_string(),
            base_url: std::env::var("GEMINI_API_BASE").unwrap_or(defaults.base_url),
            model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.model),
            ..defaults
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_version,
            path
        )
    }
}

/// Gemini LLM provider
pub struct GeminiProvider {
    client: Client,
    config: GeminiConfig,
}

impl GeminiProvider {
    pub fn from_config(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ChatError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_config(GeminiConfig::from_env()?)
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Split agent messages into the system instruction and the turn list
    fn convert_messages(messages: &[Message]) -> (Option<Content>, Vec<Content>) {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let system_instruction = (!system.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system.join("\n\n"))],
        });

        let contents = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: Some(
                    match m.role {
                        Role::Assistant => "model",
                        _ => "user",
                    }
                    .into(),
                ),
                parts: vec![Part::text(m.content.clone())],
            })
            .collect();

        (system_instruction, contents)
    }

    fn build_request(messages: &[Message], opts: &GenerationOptions) -> GenerateRequest {
        let (system_instruction, contents) = Self::convert_messages(messages);
        GenerateRequest {
            system_instruction,
            contents,
            generation_config: GenerationConfig {
                temperature: opts.temperature,
                top_p: opts.top_p,
                max_output_tokens: opts.max_tokens,
                stop_sequences: opts.stop_sequences.clone(),
            },
        }
    }

    async fn post(&self, path: &str, body: &GenerateRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.config.endpoint(path))
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::ProviderUnavailable(e.to_string()))?;

        check_status(response).await
    }
}

/// Map non-success HTTP answers to chat errors
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);

    tracing::warn!(status = %status, error = %message, "Gemini request failed");

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited(message),
        s if s.is_server_error() => ChatError::ProviderUnavailable(message),
        _ => ChatError::Provider(format!("HTTP {status}: {message}")),
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();

        Ok(ProviderInfo {
            name: "Gemini".into(),
            models,
            supports_streaming: true,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Gemini health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<Completion> {
        let request = Self::build_request(messages, options);
        let path = format!("models/{}:generateContent", options.model);

        let response: GenerateResponse = self
            .post(&path, &request)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Provider(e.to_string()))?;

        response.into_completion(&options.model)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<CompletionStream> {
        let request = Self::build_request(messages, options);
        let path = format!("models/{}:streamGenerateContent?alt=sse", options.model);

        let response = self.post(&path, &request).await?;

        let stream = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, item| {
                let chunks: Vec<Result<StreamChunk>> = match item {
                    Ok(bytes) => decoder
                        .push(&bytes)
                        .iter()
                        .map(|data| parse_stream_event(data))
                        .collect(),
                    Err(e) => vec![Err(ChatError::Provider(e.to_string()))],
                };
                futures::future::ready(Some(futures::stream::iter(chunks)))
            })
            .flatten();

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .client
            .get(self.config.endpoint("models"))
            .header("x-goog-api-key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| ChatError::ProviderUnavailable(e.to_string()))?;

        let list: ModelList = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::Provider(e.to_string()))?;

        Ok(list.into_models())
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop_sequences: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl Part {
    const fn text(text: String) -> Self {
        Self { text: Some(text) }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(u: UsageMetadata) -> Self {
        Self {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

impl GenerateResponse {
    /// Concatenated text of the first candidate
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<FinishReason> {
        if let Some(reason) = self.candidates.first().and_then(|c| c.finish_reason.as_deref()) {
            return Some(FinishReason::from_provider(reason));
        }
        self.prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_ref())
            .map(|_| FinishReason::ContentFilter)
    }

    fn into_completion(self, model: &str) -> Result<Completion> {
        if let Some(err) = self.error {
            return Err(ChatError::Provider(err.message));
        }
        Ok(Completion {
            content: self.text(),
            model: model.to_string(),
            finish_reason: self.finish_reason(),
            usage: self.usage_metadata.map(TokenUsage::from),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<RemoteModel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteModel {
    name: String,
    display_name: Option<String>,
    input_token_limit: Option<u32>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

impl ModelList {
    /// Models that can serve chat completions
    fn into_models(self) -> Vec<ModelInfo> {
        self.models
            .into_iter()
            .filter(|m| {
                m.supported_generation_methods
                    .iter()
                    .any(|g| g == "generateContent")
            })
            .map(|m| {
                let id = m.name.trim_start_matches("models/").to_string();
                ModelInfo {
                    name: m.display_name.unwrap_or_else(|| id.clone()),
                    id,
                    context_length: m.input_token_limit,
                }
            })
            .collect()
    }
}

// ============================================================================
// Server-sent events
// ============================================================================

/// Incremental decoder for `text/event-stream` bodies.
///
/// Network chunks may split events (or UTF-8 sequences) anywhere; only complete
/// events are returned.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed bytes, get the `data` payload of every completed event
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let raw: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let raw = String::from_utf8_lossy(&raw);

            let data: Vec<&str> = raw
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|d| d.strip_prefix(' ').unwrap_or(d))
                .collect();

            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }
        events
    }
}

fn parse_stream_event(data: &str) -> Result<StreamChunk> {
    let response: GenerateResponse = serde_json::from_str(data)?;
    if let Some(err) = response.error {
        return Err(ChatError::Provider(err.message));
    }

    let done = response.finish_reason().is_some();
    let delta = response.text();
    Ok(StreamChunk {
        delta,
        done,
        usage: if done {
            response.usage_metadata.map(TokenUsage::from)
        } else {
            None
        },
    })
}
