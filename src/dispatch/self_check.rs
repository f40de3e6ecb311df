//! 事前の疎通確認
//!
//! 長い処理を始める前に、モデル名/エンドポイントの誤りだけを先に見つける。
//! それ以外の失敗（1本のキーのクォータ切れなど）はログに残して通す。

use super::dispatcher::CallDispatcher;
use crate::error::{PhotoStoryError, Result};
use crate::events::ProgressEvent;
use crate::keys::{mask_key, FailureKind};
use crate::remote::{GenerateRequest, GenerativeBackend};
use chrono::Utc;
use photo_story_common::build_probe_prompt;
use tracing::{info, warn};

/// 疎通確認の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfCheck {
    /// 応答あり
    Passed { served_by: String },
    /// 設定誤り以外の失敗（処理は続行してよい）
    Inconclusive(String),
    /// 試行可能なキーがないため確認していない
    Skipped,
}

impl<B: GenerativeBackend> CallDispatcher<B> {
    /// 最初の試行可能キーで最小のリクエストを送る
    ///
    /// 設定誤りのときだけ `Err(ConfigError)`。
    pub async fn self_check(&mut self, model: &str) -> Result<SelfCheck> {
        if self.pool.is_empty() {
            return Err(PhotoStoryError::NoApiKeys);
        }

        let Some(key) = self.pool.attempt_order_at(Utc::now()).into_iter().next() else {
            info!(model, "試行可能なキーがないため疎通確認を省略");
            self.events
                .emit(ProgressEvent::info("試行可能なキーがないため疎通確認を省略しました"));
            return Ok(SelfCheck::Skipped);
        };
        let masked = mask_key(&key);

        self.events.emit(ProgressEvent::Attempting {
            key: masked.clone(),
            message: format!("{} の疎通確認", model),
        });

        let probe = GenerateRequest::text(model, build_probe_prompt());
        match self.backend.generate(&key, &probe).await {
            Ok(_) => {
                info!(key = %masked, model, "疎通確認OK");
                self.events.emit(ProgressEvent::Success {
                    key: masked.clone(),
                    message: "疎通確認OK".to_string(),
                });
                Ok(SelfCheck::Passed { served_by: masked })
            }
            Err(failure) => {
                if super::classify(&failure) == FailureKind::ConfigError {
                    self.record_failure(&key, &failure);
                    return Err(PhotoStoryError::ConfigError {
                        model: model.to_string(),
                        endpoint: self.backend.endpoint().to_string(),
                        message: failure.to_string(),
                    });
                }

                let message = failure.to_string();
                warn!(key = %masked, model, error = %message, "疎通確認に失敗（続行）");
                self.events.emit(ProgressEvent::Info {
                    key: Some(masked),
                    message: format!("疎通確認に失敗しましたが続行します: {}", message),
                });
                Ok(SelfCheck::Inconclusive(message))
            }
        }
    }
}
