use crate::keys::ApiKeySnapshot;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhotoStoryError {
    #[error("設定エラー: {0}")]
    Config(String),

    #[error("APIキーが設定されていません。`photo-story config --add-key YOUR_KEY` で設定してください")]
    NoApiKeys,

    /// モデル名/エンドポイントの誤り。キーを増やしても直らない
    #[error("モデルまたはエンドポイントの設定が誤っています (model: {model}, endpoint: {endpoint}): {message}")]
    ConfigError {
        model: String,
        endpoint: String,
        message: String,
    },

    /// 試行可能なキーが全て失敗した
    #[error("{}", describe_failed_keys(.0))]
    AllKeysFailed(Vec<ApiKeySnapshot>),

    #[error("解析の状態が不正です: {0}")]
    InvalidState(String),

    #[error("スライドを生成できませんでした（レスポンスからスライドを読み取れません）")]
    EmptyStoryboard,

    #[error("想定外のレスポンス: {0}")]
    UnexpectedOutput(String),

    #[error("ファイルが見つかりません: {0}")]
    FileNotFound(String),

    #[error("フォルダが見つかりません: {0}")]
    FolderNotFound(String),

    #[error("画像が見つかりません: {0}")]
    NoImagesFound(String),

    #[error("画像読み込みエラー: {0}")]
    ImageLoad(String),

    #[error("HTTPクライアントエラー: {0}")]
    Http(String),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Common(#[from] photo_story_common::Error),
}

impl PhotoStoryError {
    /// 設定の修正が必要な失敗か（待っても直らない）
    pub fn is_config_error(&self) -> bool {
        matches!(self, PhotoStoryError::ConfigError { .. })
    }

    /// キー枯渇による失敗か（待つかキーを足せば直る）
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, PhotoStoryError::AllKeysFailed(_))
    }

    /// 失敗時点のキー診断
    pub fn key_report(&self) -> Option<&[ApiKeySnapshot]> {
        match self {
            PhotoStoryError::AllKeysFailed(keys) => Some(keys),
            _ => None,
        }
    }
}

fn describe_failed_keys(keys: &[ApiKeySnapshot]) -> String {
    let mut lines = vec![format!(
        "全てのAPIキーで呼び出しに失敗しました（{}件）",
        keys.len()
    )];
    lines.extend(keys.iter().map(|k| format!("  - {}", k)));
    lines.join("\n")
}

pub type Result<T> = std::result::Result<T, PhotoStoryError>;
