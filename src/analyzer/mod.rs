//! 写真の逐次解析とスライド合成
//!
//! 1枚ずつ解析して物語の要約を育て、最後にスライドへまとめる。
//! 各ステップは直前の要約に依存するため並列化しない。

mod cursor;
mod types;

pub use cursor::AnalysisCursor;
pub use types::{
    AnalysisProgress, AnalysisStep, CursorStatus, PauseHandle, PauseInfo, RetryAction, StoryBrief,
    SynthesisInput,
};

use crate::error::Result;
use async_trait::async_trait;
use photo_story_common::{AnalysisStepResult, Slide};

/// 解析と合成を実際に行う側
#[async_trait]
pub trait StoryAnalyst: Send {
    /// 1枚を解析し、説明と更新後の要約を返す
    async fn analyze_image(&mut self, step: AnalysisStep<'_>) -> Result<AnalysisStepResult>;

    /// 要約と解析済み写真からスライドを作る
    async fn synthesize(&mut self, input: SynthesisInput<'_>) -> Result<Vec<Slide>>;
}
