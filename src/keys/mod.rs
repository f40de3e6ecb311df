//! APIキーのローテーション管理

mod pool;
mod status;

pub use pool::{mask_key, ApiKey, ApiKeySnapshot, KeyPool};
pub use status::{CooldownPolicy, FailureKind, KeyOutcome, KeyStatus};
