//! APIキープール
//!
//! キーの健全性を一元管理する。状態を書き換えるのは
//! `mark_outcome`（CallDispatcher経由）と明示的なリセット/ヘルスチェックだけ。

use super::status::{CooldownPolicy, KeyOutcome, KeyStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// キーを末尾4文字だけ見える形にする
pub fn mask_key(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("…{}", tail)
}

/// 認証情報と健全性レコード
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey {
    value: String,
    status: KeyStatus,
    reset_time: Option<DateTime<Utc>>,
    is_pinned: bool,
    last_error: Option<String>,
    last_checked: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKey")
            .field("key", &self.masked())
            .field("status", &self.status)
            .field("reset_time", &self.reset_time)
            .field("is_pinned", &self.is_pinned)
            .finish_non_exhaustive()
    }
}

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into().trim().to_string(),
            status: KeyStatus::Active,
            reset_time: None,
            is_pinned: false,
            last_error: None,
            last_checked: None,
        }
    }

    pub fn pinned(mut self) -> Self {
        self.is_pinned = true;
        self
    }

    /// 保存済み設定から状態を復元する
    pub fn with_state(mut self, status: KeyStatus, reset_time: Option<DateTime<Utc>>) -> Self {
        self.status = status;
        self.reset_time = reset_time;
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn masked(&self) -> String {
        mask_key(&self.value)
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn reset_time(&self) -> Option<DateTime<Utc>> {
        self.reset_time
    }

    pub fn is_pinned(&self) -> bool {
        self.is_pinned
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.last_checked
    }

    pub fn is_permanently_unusable(&self) -> bool {
        self.status.is_permanent()
    }

    /// 時刻 `now` に試行してよいか
    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_permanently_unusable() && self.reset_time.map_or(true, |t| t <= now)
    }

    fn take_health_from(&mut self, other: &ApiKey) {
        self.status = other.status;
        self.reset_time = other.reset_time;
        self.last_error = other.last_error.clone();
        self.last_checked = other.last_checked;
    }

    fn reset(&mut self) {
        self.status = KeyStatus::Active;
        self.reset_time = None;
        self.last_error = None;
    }

    pub fn snapshot(&self) -> ApiKeySnapshot {
        ApiKeySnapshot {
            key: self.masked(),
            status: self.status,
            reset_time: self.reset_time,
            is_pinned: self.is_pinned,
            last_error: self.last_error.clone(),
            last_checked: self.last_checked,
        }
    }
}

/// 表示・診断用のマスク済みコピー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeySnapshot {
    pub key: String,
    pub status: KeyStatus,
    pub reset_time: Option<DateTime<Utc>>,
    pub is_pinned: bool,
    pub last_error: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl std::fmt::Display for ApiKeySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.key, self.status)?;
        if self.is_pinned {
            write!(f, " (固定)")?;
        }
        if let Some(reset) = self.reset_time {
            write!(f, " 再開: {}", reset.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        if let Some(err) = &self.last_error {
            write!(f, " 最終エラー: {}", err)?;
        }
        Ok(())
    }
}

/// キープール
#[derive(Debug, Clone, Default)]
pub struct KeyPool {
    keys: Vec<ApiKey>,
    policy: CooldownPolicy,
}

impl KeyPool {
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            keys: Vec::new(),
            policy,
        }
    }

    /// キー文字列の一覧から作成
    pub fn from_values<I, S>(values: I, pinned: Option<&str>, policy: CooldownPolicy) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pool = Self::new(policy);
        let keys = values
            .into_iter()
            .map(|v| {
                let key = ApiKey::new(v);
                if pinned.is_some_and(|p| p.trim() == key.value) {
                    key.pinned()
                } else {
                    key
                }
            })
            .collect();
        pool.initialize(keys);
        pool
    }

    /// キー一覧を置き換える
    ///
    /// 既存と同じ値のキーは健全性を引き継ぐ（位置ではなく値で突き合わせ）。
    /// 空文字と重複は捨て、固定は最初の1つだけ残す。
    pub fn initialize(&mut self, incoming: Vec<ApiKey>) {
        let mut seen = HashSet::new();
        let mut pinned_taken = false;
        let mut merged = Vec::with_capacity(incoming.len());

        for mut key in incoming {
            if key.value.is_empty() || !seen.insert(key.value.clone()) {
                continue;
            }
            if let Some(existing) = self.keys.iter().find(|k| k.value == key.value) {
                key.take_health_from(existing);
            }
            if key.is_pinned {
                if pinned_taken {
                    key.is_pinned = false;
                } else {
                    pinned_taken = true;
                }
            }
            merged.push(key);
        }

        self.keys = merged;
    }

    pub fn keys(&self) -> &[ApiKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, value: &str) -> Option<&ApiKey> {
        self.keys.iter().find(|k| k.value == value)
    }

    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: CooldownPolicy) {
        self.policy = policy;
    }

    pub fn pinned(&self) -> Option<&ApiKey> {
        self.keys.iter().find(|k| k.is_pinned)
    }

    /// 試行の優先順
    ///
    /// 固定キーがあればそれだけを返す（使えない状態なら空）。
    /// 固定キーは明示的な指定なので、他のキーへは落ちない。
    pub fn ordered_for_attempt(&self) -> Vec<&ApiKey> {
        match self.pinned() {
            Some(pinned) if pinned.is_permanently_unusable() => Vec::new(),
            Some(pinned) => vec![pinned],
            None => self.keys.iter().collect(),
        }
    }

    /// 時刻 `now` で試行可能なキー
    pub fn eligible_at(&self, now: DateTime<Utc>) -> Vec<&ApiKey> {
        self.keys.iter().filter(|k| k.is_eligible_at(now)).collect()
    }

    pub fn eligible_now(&self) -> Vec<&ApiKey> {
        self.eligible_at(Utc::now())
    }

    /// 優先順かつ試行可能なキーの値
    pub fn attempt_order_at(&self, now: DateTime<Utc>) -> Vec<String> {
        self.ordered_for_attempt()
            .into_iter()
            .filter(|k| k.is_eligible_at(now))
            .map(|k| k.value.clone())
            .collect()
    }

    pub fn is_eligible_at(&self, value: &str, now: DateTime<Utc>) -> bool {
        self.get(value).is_some_and(|k| k.is_eligible_at(now))
    }

    /// 試行結果を反映する
    ///
    /// 成功なら active に戻してエラーとクールダウンを消す。
    /// 失敗なら分類に応じた状態とクールダウンを設定する。
    pub fn mark_outcome(&mut self, value: &str, outcome: &KeyOutcome, now: DateTime<Utc>) -> bool {
        let policy = self.policy;
        let Some(key) = self.keys.iter_mut().find(|k| k.value == value) else {
            return false;
        };

        key.last_checked = Some(now);
        match outcome {
            KeyOutcome::Success => key.reset(),
            KeyOutcome::Failure { kind, message } => {
                key.status = kind.status();
                key.reset_time = policy
                    .cooldown_for(*kind)
                    .map(|d| now.checked_add_signed(d).unwrap_or(DateTime::<Utc>::MAX_UTC));
                key.last_error = Some(message.clone());
            }
        }
        true
    }

    /// 指定キーを固定する（他の固定は外れる）
    pub fn pin(&mut self, value: &str) -> bool {
        if self.get(value).is_none() {
            return false;
        }
        for key in &mut self.keys {
            key.is_pinned = key.value == value;
        }
        true
    }

    pub fn unpin(&mut self) {
        for key in &mut self.keys {
            key.is_pinned = false;
        }
    }

    /// 明示的なリセット
    pub fn reset(&mut self, value: &str) -> bool {
        match self.keys.iter_mut().find(|k| k.value == value) {
            Some(key) => {
                key.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&mut self) {
        for key in &mut self.keys {
            key.reset();
        }
    }

    pub fn snapshot(&self) -> Vec<ApiKeySnapshot> {
        self.keys.iter().map(ApiKey::snapshot).collect()
    }
}
