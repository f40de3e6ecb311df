//! 生成AIサービスとの境界
//!
//! コアが依存するのは「キーとリクエストを渡すと、結果か分類可能なエラーが返る」
//! という狭い契約だけ。

mod gemini;

pub use gemini::{GeminiBackend, PollSettings, DEFAULT_ENDPOINT};

use async_trait::async_trait;
use thiserror::Error;

/// 生成の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationKind {
    Text,
    Json,
    Image,
    Video,
}

/// プロンプトに添付するメディア
#[derive(Clone, PartialEq, Eq)]
pub struct MediaPart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for MediaPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPart")
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// 1回の論理リクエスト
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub kind: GenerationKind,
    pub model: String,
    pub prompt: String,
    pub media: Vec<MediaPart>,
    pub schema_hint: Option<serde_json::Value>,
}

impl GenerateRequest {
    pub fn new(kind: GenerationKind, model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            prompt: prompt.into(),
            media: Vec::new(),
            schema_hint: None,
        }
    }

    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(GenerationKind::Text, model, prompt)
    }

    pub fn json(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(GenerationKind::Json, model, prompt)
    }

    pub fn with_media(mut self, media: MediaPart) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema_hint = Some(schema);
        self
    }
}

/// 生成された動画
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedVideo {
    pub uri: Option<String>,
    pub media: Option<MediaPart>,
}

/// サービスの生の出力
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutput {
    Text(String),
    Image(MediaPart),
    Video(GeneratedVideo),
}

impl RawOutput {
    pub fn into_text(self) -> Option<String> {
        match self {
            RawOutput::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<MediaPart> {
        match self {
            RawOutput::Image(media) => Some(media),
            _ => None,
        }
    }

    pub fn into_video(self) -> Option<GeneratedVideo> {
        match self {
            RawOutput::Video(video) => Some(video),
            _ => None,
        }
    }
}

/// 1回の試行の失敗（分類前）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// 通信レベルの失敗
    #[error("通信エラー: {0}")]
    Transport(String),

    /// 非2xxレスポンス
    #[error("HTTP {status}{}: {message}", format_code(.code))]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// 長時間ジョブのポーリング上限到達
    #[error("{attempts}回ポーリングしても完了しませんでした")]
    PollingExhausted { attempts: u32 },

    /// 2xxだが中身を読めない
    #[error("レスポンスを解釈できません: {0}")]
    Malformed(String),
}

fn format_code(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" {c}")).unwrap_or_default()
}

/// 生成AIサービス
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// エラー報告用のエンドポイント
    fn endpoint(&self) -> &str;

    async fn generate(
        &self,
        api_key: &str,
        request: &GenerateRequest,
    ) -> std::result::Result<RawOutput, CallFailure>;
}
