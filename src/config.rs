use crate::error::{PhotoStoryError, Result};
use crate::keys::{ApiKey, CooldownPolicy, KeyPool, KeyStatus};
use crate::remote::{PollSettings, DEFAULT_ENDPOINT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 前回セッションから引き継ぐクールダウン
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCooldown {
    pub status: KeyStatus,
    pub reset_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_keys: Vec<String>,
    pub pinned_key: Option<String>,
    pub endpoint: String,
    pub text_model: String,
    pub image_model: String,
    pub video_model: String,
    pub max_image_size: u32,
    pub exhausted_cooldown_secs: u64,
    pub server_error_cooldown_secs: u64,
    pub video_poll_attempts: u32,
    pub video_poll_interval_secs: u64,
    pub timeout_seconds: u64,
    /// キー値 → クールダウン（一時的な失敗のみ）
    pub key_cooldowns: BTreeMap<String, StoredCooldown>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default_config())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| PhotoStoryError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("photo-story").join("config.json"))
    }

    fn default_config() -> Self {
        Self {
            api_keys: Vec::new(),
            pinned_key: None,
            endpoint: DEFAULT_ENDPOINT.into(),
            text_model: "gemini-2.5-flash".into(),
            image_model: "gemini-2.5-flash-image".into(),
            video_model: "veo-3.0-generate-001".into(),
            max_image_size: 1568,
            exhausted_cooldown_secs: CooldownPolicy::DEFAULT_EXHAUSTED_SECS as u64,
            server_error_cooldown_secs: CooldownPolicy::DEFAULT_SERVER_ERROR_SECS as u64,
            video_poll_attempts: 30,
            video_poll_interval_secs: 10,
            timeout_seconds: 120,
            key_cooldowns: BTreeMap::new(),
        }
    }

    /// 実際に使うキー一覧
    ///
    /// 環境変数を優先（GEMINI_API_KEYS はカンマ区切り、次に GEMINI_API_KEY）
    pub fn api_key_values(&self) -> Vec<String> {
        keys_from_env(
            std::env::var("GEMINI_API_KEYS").ok(),
            std::env::var("GEMINI_API_KEY").ok(),
        )
        .unwrap_or_else(|| self.api_keys.clone())
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        CooldownPolicy::from_secs(self.exhausted_cooldown_secs, self.server_error_cooldown_secs)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            attempts: self.video_poll_attempts,
            interval: Duration::from_secs(self.video_poll_interval_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// 保存済みクールダウンを反映したキー一覧
    pub fn key_entries(&self, values: &[String], now: DateTime<Utc>) -> Vec<ApiKey> {
        values
            .iter()
            .map(|value| {
                let mut key = ApiKey::new(value.as_str());
                if let Some(stored) = self
                    .key_cooldowns
                    .get(value.trim())
                    .filter(|c| c.reset_time > now)
                {
                    key = key.with_state(stored.status, Some(stored.reset_time));
                }
                if self.pinned_key.as_deref().map(str::trim) == Some(value.trim()) {
                    key = key.pinned();
                }
                key
            })
            .collect()
    }

    pub fn build_pool(&self, now: DateTime<Utc>) -> KeyPool {
        let mut pool = KeyPool::new(self.cooldown_policy());
        pool.initialize(self.key_entries(&self.api_key_values(), now));
        pool
    }

    /// 期限内のクールダウンだけを記録する
    ///
    /// invalid などの恒久的な状態はセッション限りなので残さない。
    /// 環境変数で渡されたキーは設定ファイルに書かない。
    pub fn remember_cooldowns(&mut self, pool: &KeyPool, now: DateTime<Utc>) {
        let registered = &self.api_keys;
        let cooldowns = pool
            .keys()
            .iter()
            .filter(|k| !k.is_permanently_unusable())
            .filter(|k| registered.iter().any(|v| v == k.value()))
            .filter_map(|k| {
                k.reset_time().filter(|t| *t > now).map(|reset_time| {
                    (
                        k.value().to_string(),
                        StoredCooldown {
                            status: k.status(),
                            reset_time,
                        },
                    )
                })
            })
            .collect();
        self.key_cooldowns = cooldowns;
    }

    pub fn clear_cooldowns(&mut self) {
        self.key_cooldowns.clear();
    }

    /// キー本体か末尾の文字列から登録済みキーを探す
    pub fn resolve_key(&self, selector: &str) -> Option<String> {
        let selector = selector.trim().trim_start_matches('…');
        if let Some(exact) = self.api_keys.iter().find(|k| *k == selector) {
            return Some(exact.clone());
        }
        if selector.chars().count() < 4 {
            return None;
        }
        let mut matches = self.api_keys.iter().filter(|k| k.ends_with(selector));
        match (matches.next(), matches.next()) {
            (Some(only), None) => Some(only.clone()),
            _ => None,
        }
    }

    pub fn add_api_key(&mut self, key: &str) -> bool {
        let key = key.trim();
        if key.is_empty() || self.api_keys.iter().any(|k| k == key) {
            return false;
        }
        self.api_keys.push(key.to_string());
        true
    }

    pub fn remove_api_key(&mut self, selector: &str) -> Result<String> {
        let key = self
            .resolve_key(selector)
            .ok_or_else(|| PhotoStoryError::Config(format!("キーが見つかりません: {}", selector)))?;
        self.api_keys.retain(|k| *k != key);
        self.key_cooldowns.remove(&key);
        if self.pinned_key.as_deref() == Some(key.as_str()) {
            self.pinned_key = None;
        }
        Ok(key)
    }

    pub fn pin_key(&mut self, selector: &str) -> Result<String> {
        let key = self
            .resolve_key(selector)
            .ok_or_else(|| PhotoStoryError::Config(format!("キーが見つかりません: {}", selector)))?;
        self.pinned_key = Some(key.clone());
        Ok(key)
    }

    pub fn unpin_key(&mut self) {
        self.pinned_key = None;
    }
}

fn keys_from_env(multi: Option<String>, single: Option<String>) -> Option<Vec<String>> {
    let parse = |raw: String| -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };

    multi
        .map(parse)
        .filter(|keys| !keys.is_empty())
        .or_else(|| single.map(parse).filter(|keys| !keys.is_empty()))
}
