//! 進捗イベント
//!
//! コアはイベントを送るだけで、表示方法には関知しない。
//! 受信側がいなければ黙って捨てる。

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// キー試行や解析の進捗
///
/// `key` は常にマスク済み（末尾4文字のみ）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProgressEvent {
    Attempting { key: String, message: String },
    Success { key: String, message: String },
    Failed { key: String, message: String },
    Info { key: Option<String>, message: String },
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        ProgressEvent::Info {
            key: None,
            message: message.into(),
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            ProgressEvent::Attempting { key, .. }
            | ProgressEvent::Success { key, .. }
            | ProgressEvent::Failed { key, .. } => Some(key),
            ProgressEvent::Info { key, .. } => key.as_deref(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProgressEvent::Attempting { message, .. }
            | ProgressEvent::Success { message, .. }
            | ProgressEvent::Failed { message, .. }
            | ProgressEvent::Info { message, .. } => message,
        }
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = match self {
            ProgressEvent::Attempting { .. } => "…",
            ProgressEvent::Success { .. } => "✔",
            ProgressEvent::Failed { .. } => "✖",
            ProgressEvent::Info { .. } => "i",
        };
        match self.key() {
            Some(key) => write!(f, "{} [{}] {}", mark, key, self.message()),
            None => write!(f, "{} {}", mark, self.message()),
        }
    }
}

/// イベント送信口
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<ProgressEvent>>,
}

impl EventSink {
    /// 送信口と受信口のペアを作る
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// 何も送らない送信口
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
