//! photo-story
//!
//! 写真を1枚ずつ解析して物語を育て、ナレーション付きのスライドにまとめる。
//! 生成AIの呼び出しは複数のAPIキーを順に試し、失敗の種類に応じてキーを休ませる。

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod keys;
pub mod remote;
pub mod scanner;
pub mod storyboard;

pub use photo_story_common as common;
