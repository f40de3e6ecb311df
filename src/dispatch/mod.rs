//! キーのローテーションと呼び出しの制御
//!
//! - classify: 失敗の分類
//! - dispatcher: キーを順に試す `CallDispatcher`
//! - self_check: 事前の疎通確認

mod classify;
mod dispatcher;
mod self_check;

pub use classify::classify;
pub use dispatcher::{CallDispatcher, Dispatched};
pub use self_check::SelfCheck;
