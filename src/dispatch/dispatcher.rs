//! 1回の論理リクエストをキーを順に試して実行する

use super::classify::classify;
use crate::error::{PhotoStoryError, Result};
use crate::events::{EventSink, ProgressEvent};
use crate::keys::{mask_key, ApiKey, ApiKeySnapshot, FailureKind, KeyOutcome, KeyPool, KeyStatus};
use crate::remote::{CallFailure, GenerateRequest, GenerativeBackend, RawOutput};
use chrono::Utc;
use photo_story_common::build_probe_prompt;
use tracing::{debug, info, instrument, warn};

/// 成功した呼び出しの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub output: RawOutput,
    /// 応答したキー（マスク済み）
    pub served_by: String,
}

/// キープールを所有し、健全性を更新する唯一の場所
pub struct CallDispatcher<B> {
    pub(super) backend: B,
    pub(super) pool: KeyPool,
    pub(super) events: EventSink,
}

impl<B: GenerativeBackend> CallDispatcher<B> {
    pub fn new(backend: B, pool: KeyPool) -> Self {
        Self {
            backend,
            pool,
            events: EventSink::disabled(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// 読み取り専用。状態は次の呼び出しで変わりうる
    pub fn pool(&self) -> &KeyPool {
        &self.pool
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn reinitialize(&mut self, keys: Vec<ApiKey>) {
        self.pool.initialize(keys);
    }

    pub fn reset_key(&mut self, value: &str) -> bool {
        self.pool.reset(value)
    }

    pub fn reset_all(&mut self) {
        self.pool.reset_all();
    }

    pub fn pin(&mut self, value: &str) -> bool {
        self.pool.pin(value)
    }

    pub fn unpin(&mut self) {
        self.pool.unpin();
    }

    /// 1回の論理リクエストを実行
    ///
    /// - 試行可能なキーがなければ通信せずに `AllKeysFailed`
    /// - 設定誤りはその場で `ConfigError`（残りのキーは試さない）
    /// - 全キー失敗なら最終状態のスナップショット付き `AllKeysFailed`
    #[instrument(skip_all, fields(model = %request.model, kind = ?request.kind))]
    pub async fn dispatch(&mut self, request: &GenerateRequest) -> Result<Dispatched> {
        if self.pool.is_empty() {
            return Err(PhotoStoryError::NoApiKeys);
        }

        let order = self.pool.attempt_order_at(Utc::now());
        if order.is_empty() {
            warn!(model = %request.model, "試行可能なAPIキーがありません");
            self.events
                .emit(ProgressEvent::info("試行可能なAPIキーがありません"));
            return Err(PhotoStoryError::AllKeysFailed(self.pool.snapshot()));
        }

        for key in order {
            if !self.pool.is_eligible_at(&key, Utc::now()) {
                continue;
            }
            let masked = mask_key(&key);

            debug!(key = %masked, "API呼び出し");
            self.events.emit(ProgressEvent::Attempting {
                key: masked.clone(),
                message: format!("{} に問い合わせ中", request.model),
            });

            match self.backend.generate(&key, request).await {
                Ok(output) => {
                    self.pool.mark_outcome(&key, &KeyOutcome::Success, Utc::now());
                    info!(key = %masked, model = %request.model, "API呼び出し成功");
                    self.events.emit(ProgressEvent::Success {
                        key: masked.clone(),
                        message: "応答を受信しました".to_string(),
                    });
                    return Ok(Dispatched {
                        output,
                        served_by: masked,
                    });
                }
                Err(failure) => {
                    let kind = self.record_failure(&key, &failure);
                    if kind == FailureKind::ConfigError {
                        return Err(PhotoStoryError::ConfigError {
                            model: request.model.clone(),
                            endpoint: self.backend.endpoint().to_string(),
                            message: failure.to_string(),
                        });
                    }
                }
            }
        }

        Err(PhotoStoryError::AllKeysFailed(self.pool.snapshot()))
    }

    /// 分類して健全性に反映する
    pub(super) fn record_failure(&mut self, key: &str, failure: &CallFailure) -> FailureKind {
        let kind = classify(failure);
        let message = failure.to_string();
        let masked = mask_key(key);

        self.pool.mark_outcome(
            key,
            &KeyOutcome::Failure {
                kind,
                message: message.clone(),
            },
            Utc::now(),
        );

        let status = kind.status();
        warn!(key = %masked, %status, error = %message, "API呼び出し失敗");
        self.events.emit(ProgressEvent::Failed {
            key: masked,
            message: format!("{} ({})", message, status),
        });
        kind
    }

    /// 1つのキーを明示的に検査する（状態に関わらず通信する）
    pub async fn check_key(&mut self, value: &str, model: &str) -> Result<KeyStatus> {
        if self.pool.get(value).is_none() {
            return Err(PhotoStoryError::Config(format!(
                "キーが登録されていません: {}",
                mask_key(value)
            )));
        }

        let masked = mask_key(value);
        self.events.emit(ProgressEvent::Attempting {
            key: masked.clone(),
            message: "疎通確認".to_string(),
        });

        let probe = GenerateRequest::text(model, build_probe_prompt());
        match self.backend.generate(value, &probe).await {
            Ok(_) => {
                self.pool.mark_outcome(value, &KeyOutcome::Success, Utc::now());
                self.events.emit(ProgressEvent::Success {
                    key: masked,
                    message: "疎通確認OK".to_string(),
                });
            }
            Err(failure) => {
                self.record_failure(value, &failure);
            }
        }

        Ok(self
            .pool
            .get(value)
            .map(ApiKey::status)
            .unwrap_or(KeyStatus::Unknown))
    }

    /// 全キーを順に検査してスナップショットを返す
    pub async fn check_all_keys(&mut self, model: &str) -> Result<Vec<ApiKeySnapshot>> {
        if self.pool.is_empty() {
            return Err(PhotoStoryError::NoApiKeys);
        }
        let values: Vec<String> = self.pool.keys().iter().map(|k| k.value().to_string()).collect();
        for value in values {
            self.check_key(&value, model).await?;
        }
        Ok(self.pool.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::CooldownPolicy;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// キーごとに固定の応答を返すバックエンド
    struct FixedBackend {
        failing: Vec<(&'static str, CallFailure)>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl GenerativeBackend for FixedBackend {
        fn endpoint(&self) -> &str {
            "https://example.test/v1beta"
        }

        async fn generate(
            &self,
            api_key: &str,
            _request: &GenerateRequest,
        ) -> std::result::Result<RawOutput, CallFailure> {
            self.calls.lock().unwrap().push(api_key.to_string());
            match self.failing.iter().find(|(k, _)| *k == api_key) {
                Some((_, failure)) => Err(failure.clone()),
                None => Ok(RawOutput::Text("OK".to_string())),
            }
        }
    }

    fn dispatcher(keys: &[&str], failing: Vec<(&'static str, CallFailure)>) -> (CallDispatcher<FixedBackend>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backend = FixedBackend {
            failing,
            calls: calls.clone(),
        };
        let pool = KeyPool::from_values(keys.iter().copied(), None, CooldownPolicy::default());
        (CallDispatcher::new(backend, pool), calls)
    }

    fn http(status: u16, code: &str) -> CallFailure {
        CallFailure::Http {
            status,
            code: Some(code.to_string()),
            message: code.to_lowercase(),
        }
    }

    #[tokio::test]
    async fn test_fails_over_to_next_key() {
        let (mut d, calls) = dispatcher(
            &["key-one-1111", "key-two-2222"],
            vec![("key-one-1111", http(429, "RESOURCE_EXHAUSTED"))],
        );
        let result = d.dispatch(&GenerateRequest::text("m", "p")).await.unwrap();

        assert_eq!(result.served_by, "…2222");
        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(d.pool().get("key-one-1111").unwrap().status(), KeyStatus::Exhausted);
    }

    #[tokio::test]
    async fn test_empty_pool_is_no_api_keys() {
        let (mut d, calls) = dispatcher(&[], vec![]);
        let err = d.dispatch(&GenerateRequest::text("m", "p")).await.unwrap_err();
        assert!(matches!(err, PhotoStoryError::NoApiKeys));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_key_updates_status() {
        let (mut d, _) = dispatcher(
            &["key-one-1111", "key-two-2222"],
            vec![("key-two-2222", http(403, "PERMISSION_DENIED"))],
        );
        assert_eq!(d.check_key("key-one-1111", "m").await.unwrap(), KeyStatus::Active);
        let snapshot = d.check_all_keys("m").await.unwrap();
        assert_eq!(snapshot[1].status, KeyStatus::Invalid);
        assert!(d.check_key("missing-0000", "m").await.is_err());
    }
}
