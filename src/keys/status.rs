//! キーの状態と失敗分類

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// キーの健全性
///
/// 常にどれか1つだけが成り立つ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    #[default]
    Active,
    Exhausted,
    RateLimited,
    Invalid,
    PermissionDenied,
    ConfigError,
    Unknown,
}

impl KeyStatus {
    /// セッション中は二度と試行しない状態
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            KeyStatus::Invalid | KeyStatus::PermissionDenied | KeyStatus::ConfigError
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Exhausted => "exhausted",
            KeyStatus::RateLimited => "rate_limited",
            KeyStatus::Invalid => "invalid",
            KeyStatus::PermissionDenied => "permission_denied",
            KeyStatus::ConfigError => "config_error",
            KeyStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// 1回の試行失敗の分類結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// モデル名/エンドポイントの誤り。キーに依らない
    ConfigError,
    /// 認証拒否・無効なキー
    Invalid,
    /// クォータ枯渇
    Exhausted,
    /// サーバー側5xx
    ServerError,
    /// それ以外（通信エラー含む）
    Unknown,
}

impl FailureKind {
    pub fn status(&self) -> KeyStatus {
        match self {
            FailureKind::ConfigError => KeyStatus::ConfigError,
            FailureKind::Invalid => KeyStatus::Invalid,
            FailureKind::Exhausted => KeyStatus::Exhausted,
            FailureKind::ServerError => KeyStatus::RateLimited,
            FailureKind::Unknown => KeyStatus::Unknown,
        }
    }
}

/// 試行結果（markOutcome の入力）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Success,
    Failure { kind: FailureKind, message: String },
}

/// 一時的な失敗のクールダウン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub exhausted: Duration,
    pub server_error: Duration,
}

impl CooldownPolicy {
    pub const DEFAULT_EXHAUSTED_SECS: i64 = 24 * 60 * 60;
    pub const DEFAULT_SERVER_ERROR_SECS: i64 = 5 * 60;
    /// 設定値の上限（1年）
    pub const MAX_COOLDOWN_SECS: i64 = 365 * 24 * 60 * 60;

    /// 秒数から作る。上限を超える値は上限に丸める
    pub fn from_secs(exhausted_secs: u64, server_error_secs: u64) -> Self {
        Self {
            exhausted: Self::clamped(exhausted_secs),
            server_error: Self::clamped(server_error_secs),
        }
    }

    fn clamped(secs: u64) -> Duration {
        let secs = i64::try_from(secs)
            .unwrap_or(i64::MAX)
            .min(Self::MAX_COOLDOWN_SECS);
        Duration::try_seconds(secs).unwrap_or_else(|| Duration::seconds(Self::MAX_COOLDOWN_SECS))
    }

    /// 分類に対応するクールダウン（恒久的な失敗と不明な失敗は None）
    pub fn cooldown_for(&self, kind: FailureKind) -> Option<Duration> {
        match kind {
            FailureKind::Exhausted => Some(self.exhausted),
            FailureKind::ServerError => Some(self.server_error),
            FailureKind::ConfigError | FailureKind::Invalid | FailureKind::Unknown => None,
        }
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            exhausted: Duration::seconds(Self::DEFAULT_EXHAUSTED_SECS),
            server_error: Duration::seconds(Self::DEFAULT_SERVER_ERROR_SECS),
        }
    }
}
