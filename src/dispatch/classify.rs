//! 失敗の分類
//!
//! メッセージ文字列を見るのはここだけ。以降は `FailureKind` で分岐する。

use crate::keys::FailureKind;
use crate::remote::CallFailure;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref CONFIG_RE: Regex =
        Regex::new(r"(?i)is not found|not supported for|unknown model|model not found").unwrap();
    static ref AUTH_RE: Regex =
        Regex::new(r"(?i)api key not valid|api_key_invalid|invalid api key|permission denied").unwrap();
    static ref QUOTA_RE: Regex =
        Regex::new(r"(?i)quota|resource.?exhausted|rate limit").unwrap();
}

/// 1回の試行失敗を分類する
///
/// 優先順位: 設定誤り > 認証 > クォータ > 5xx > その他
pub fn classify(failure: &CallFailure) -> FailureKind {
    match failure {
        CallFailure::Http {
            status,
            code,
            message,
        } => classify_http(*status, code.as_deref().unwrap_or(""), message),
        CallFailure::Transport(_) | CallFailure::PollingExhausted { .. } | CallFailure::Malformed(_) => {
            FailureKind::Unknown
        }
    }
}

fn classify_http(status: u16, code: &str, message: &str) -> FailureKind {
    if status == 404 || code == "NOT_FOUND" || CONFIG_RE.is_match(message) {
        return FailureKind::ConfigError;
    }
    if matches!(status, 401 | 403)
        || matches!(code, "UNAUTHENTICATED" | "PERMISSION_DENIED")
        || AUTH_RE.is_match(message)
    {
        return FailureKind::Invalid;
    }
    if status == 429 || code == "RESOURCE_EXHAUSTED" || QUOTA_RE.is_match(message) {
        return FailureKind::Exhausted;
    }
    if (500..600).contains(&status) {
        return FailureKind::ServerError;
    }
    FailureKind::Unknown
}
