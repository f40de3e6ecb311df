//! Gemini REST API連携
//!
//! - テキスト/JSON: generateContent
//! - 画像: generateContent（responseModalities に IMAGE）
//! - 動画: predictLongRunning + オペレーションのポーリング（回数上限あり）

use super::{
    CallFailure, GenerateRequest, GeneratedVideo, GenerationKind, GenerativeBackend, MediaPart,
    RawOutput,
};
use crate::error::{PhotoStoryError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini APIリクエスト
#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

/// Gemini APIレスポンス
#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseInlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

/// `{"error": {"code", "message", "status"}}`
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<i64>,
    #[serde(default)]
    message: String,
    status: Option<String>,
}

/// 長時間ジョブ
#[derive(Deserialize)]
struct Operation {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<ErrorBody>,
    response: Option<Value>,
}

/// 動画生成のポーリング設定
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_secs(10),
        }
    }
}

/// Gemini REST バックエンド
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    endpoint: String,
    poll: PollSettings,
}

impl GeminiBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, poll: PollSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PhotoStoryError::Http(e.to_string()))?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            endpoint,
            poll,
        })
    }

    async fn post_json(&self, api_key: &str, url: &str, body: &impl Serialize) -> std::result::Result<Value, CallFailure> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CallFailure::Transport(e.to_string()))?;
        read_json(response).await
    }

    async fn get_json(&self, api_key: &str, url: &str) -> std::result::Result<Value, CallFailure> {
        let response = self
            .client
            .get(url)
            .header("x-goog-api-key", api_key)
            .send()
            .await
            .map_err(|e| CallFailure::Transport(e.to_string()))?;
        read_json(response).await
    }

    async fn generate_content(&self, api_key: &str, request: &GenerateRequest) -> std::result::Result<RawOutput, CallFailure> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, request.model);
        let body = build_request_body(request);
        let payload = self.post_json(api_key, &url, &body).await?;
        let response: GeminiResponse = serde_json::from_value(payload)
            .map_err(|e| CallFailure::Malformed(e.to_string()))?;

        match request.kind {
            GenerationKind::Image => extract_image(response).map(RawOutput::Image),
            _ => extract_text(response).map(RawOutput::Text),
        }
    }

    async fn generate_video(&self, api_key: &str, request: &GenerateRequest) -> std::result::Result<RawOutput, CallFailure> {
        let url = format!("{}/models/{}:predictLongRunning", self.endpoint, request.model);
        let mut instance = json!({ "prompt": request.prompt });
        if let Some(image) = request.media.first() {
            instance["image"] = json!({
                "bytesBase64Encoded": STANDARD.encode(&image.data),
                "mimeType": image.mime_type,
            });
        }
        let started = self
            .post_json(api_key, &url, &json!({ "instances": [instance] }))
            .await?;
        let operation: Operation = serde_json::from_value(started)
            .map_err(|e| CallFailure::Malformed(e.to_string()))?;
        if operation.done {
            return video_from_operation(operation).map(RawOutput::Video);
        }
        let name = operation
            .name
            .ok_or_else(|| CallFailure::Malformed("オペレーション名がありません".into()))?;

        let url = format!("{}/{}", self.endpoint, name);
        let (this, url) = (self, url.as_str());
        let operation = poll_operation(self.poll, move || async move { this.get_json(api_key, url).await }).await?;
        video_from_operation(operation).map(RawOutput::Video)
    }
}

/// 完了するまでオペレーションを取得し直す
///
/// 取得は `poll.attempts` 回まで。各取得の前に `poll.interval` 待つ。
/// 上限に達したら `PollingExhausted`。取得の失敗はそのまま返す。
async fn poll_operation<F, Fut>(poll: PollSettings, mut fetch: F) -> std::result::Result<Operation, CallFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Value, CallFailure>>,
{
    for attempt in 1..=poll.attempts {
        tokio::time::sleep(poll.interval).await;
        let payload = fetch().await?;
        let operation: Operation = serde_json::from_value(payload)
            .map_err(|e| CallFailure::Malformed(e.to_string()))?;
        if operation.done {
            return Ok(operation);
        }
        debug!(attempt, max = poll.attempts, "動画生成の完了待ち");
    }

    Err(CallFailure::PollingExhausted {
        attempts: poll.attempts,
    })
}

#[async_trait]
impl GenerativeBackend for GeminiBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn generate(
        &self,
        api_key: &str,
        request: &GenerateRequest,
    ) -> std::result::Result<RawOutput, CallFailure> {
        match request.kind {
            GenerationKind::Video => self.generate_video(api_key, request).await,
            _ => self.generate_content(api_key, request).await,
        }
    }
}

async fn read_json(response: reqwest::Response) -> std::result::Result<Value, CallFailure> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| CallFailure::Transport(e.to_string()))?;

    if !status.is_success() {
        return Err(parse_error_body(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| CallFailure::Malformed(e.to_string()))
}

fn build_request_body(request: &GenerateRequest) -> GeminiRequest {
    let mut parts = vec![Part::Text {
        text: request.prompt.clone(),
    }];
    parts.extend(request.media.iter().map(|m| Part::InlineData {
        inline_data: InlineData {
            mime_type: m.mime_type.clone(),
            data: STANDARD.encode(&m.data),
        },
    }));

    let mut config = GenerationConfig {
        temperature: 0.4,
        ..Default::default()
    };
    match request.kind {
        GenerationKind::Json => {
            config.response_mime_type = Some("application/json".to_string());
            config.response_schema = request.schema_hint.clone();
        }
        GenerationKind::Image => {
            config.response_modalities = Some(vec!["TEXT".to_string(), "IMAGE".to_string()]);
        }
        GenerationKind::Text | GenerationKind::Video => {}
    }

    GeminiRequest {
        contents: vec![Content { parts }],
        generation_config: config,
    }
}

fn extract_text(response: GeminiResponse) -> std::result::Result<String, CallFailure> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(CallFailure::Malformed("Empty response".into()));
    }
    Ok(text)
}

fn extract_image(response: GeminiResponse) -> std::result::Result<MediaPart, CallFailure> {
    let inline = response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data)
        .ok_or_else(|| CallFailure::Malformed("画像データがありません".into()))?;

    let data = STANDARD
        .decode(inline.data.as_bytes())
        .map_err(|e| CallFailure::Malformed(format!("Base64 decode error: {}", e)))?;
    Ok(MediaPart {
        mime_type: inline.mime_type,
        data,
    })
}

fn video_from_operation(operation: Operation) -> std::result::Result<GeneratedVideo, CallFailure> {
    if let Some(error) = operation.error {
        return Err(CallFailure::Http {
            status: grpc_to_http(error.code),
            code: error.status,
            message: error.message,
        });
    }

    let response = operation
        .response
        .ok_or_else(|| CallFailure::Malformed("動画レスポンスがありません".into()))?;

    if let Some(uri) = response
        .pointer("/generateVideoResponse/generatedSamples/0/video/uri")
        .and_then(Value::as_str)
    {
        return Ok(GeneratedVideo {
            uri: Some(uri.to_string()),
            media: None,
        });
    }

    if let Some(encoded) = response
        .pointer("/videos/0/bytesBase64Encoded")
        .and_then(Value::as_str)
    {
        let data = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| CallFailure::Malformed(format!("Base64 decode error: {}", e)))?;
        let mime_type = response
            .pointer("/videos/0/mimeType")
            .and_then(Value::as_str)
            .unwrap_or("video/mp4")
            .to_string();
        return Ok(GeneratedVideo {
            uri: None,
            media: Some(MediaPart { mime_type, data }),
        });
    }

    Err(CallFailure::Malformed("動画が見つかりません".into()))
}

/// エラーレスポンスを分類可能な形に変換
pub(crate) fn parse_error_body(status: u16, body: &str) -> CallFailure {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => CallFailure::Http {
            status,
            code: envelope.error.status,
            message: envelope.error.message,
        },
        Err(_) => CallFailure::Http {
            status,
            code: None,
            message: body.chars().take(300).collect(),
        },
    }
}

/// オペレーションの gRPC コードを HTTP ステータスに対応付ける
fn grpc_to_http(code: Option<i64>) -> u16 {
    match code {
        Some(3) => 400,
        Some(5) => 404,
        Some(7) => 403,
        Some(8) => 429,
        Some(14) => 503,
        Some(16) => 401,
        Some(c) if (100..600).contains(&c) => c as u16,
        _ => 500,
    }
}
