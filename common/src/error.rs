//! エラー型定義

use thiserror::Error;

/// 共通エラー型
///
/// common はIOを持たないので、モデル応答を読めなかった場合だけを表す。
#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, Error>;
