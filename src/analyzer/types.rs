use crate::error::PhotoStoryError;
use photo_story_common::{NarrativePlan, UploadedImage};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 解析全体に共通する前提
#[derive(Debug, Clone, Default)]
pub struct StoryBrief {
    pub concept: String,
    pub plan: Option<NarrativePlan>,
}

impl StoryBrief {
    pub fn new(concept: impl Into<String>) -> Self {
        Self {
            concept: concept.into(),
            plan: None,
        }
    }

    pub fn with_plan(mut self, plan: Option<NarrativePlan>) -> Self {
        self.plan = plan;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Done,
}

/// 一時停止から再開するときにやり直す処理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Analysis { index: usize },
    Synthesis,
}

/// 一時停止の理由
#[derive(Debug)]
pub struct PauseInfo {
    pub action: RetryAction,
    /// None はユーザーによる一時停止
    pub error: Option<PhotoStoryError>,
}

/// UI向けの進捗
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisProgress {
    pub current_index: usize,
    pub total: usize,
    pub action: String,
    pub synthesizing: bool,
}

/// 他のタスクから一時停止を要求するためのハンドル
///
/// 実行中の呼び出しは中断せず、次のステップに入る前に止まる。
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 1枚分の解析入力
#[derive(Debug, Clone, Copy)]
pub struct AnalysisStep<'a> {
    pub brief: &'a StoryBrief,
    pub story_summary: &'a str,
    /// 解析済みの写真（入力順）
    pub previous: &'a [UploadedImage],
    pub image: &'a UploadedImage,
    pub index: usize,
    pub total: usize,
}

/// スライド合成の入力
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub brief: &'a StoryBrief,
    pub story_summary: &'a str,
    pub images: &'a [UploadedImage],
}
