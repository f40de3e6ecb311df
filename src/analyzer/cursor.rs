//! 解析カーソル（状態機械）
//!
//! idle → running → (paused | done)、paused → running は明示的な再開のみ。
//! 失敗しても完了済みのステップは捨てず、同じ位置からやり直す。

use super::types::{
    AnalysisProgress, AnalysisStep, CursorStatus, PauseHandle, PauseInfo, RetryAction, StoryBrief,
    SynthesisInput,
};
use super::StoryAnalyst;
use crate::error::{PhotoStoryError, Result};
use crate::events::{EventSink, ProgressEvent};
use photo_story_common::{normalize_image_bindings, Slide, Storyboard, UploadedImage};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default)]
pub struct AnalysisCursor {
    brief: StoryBrief,
    images: Vec<UploadedImage>,
    current_index: usize,
    status: CursorStatus,
    story_summary: String,
    slides: Vec<Slide>,
    pause: Option<PauseInfo>,
    pause_handle: PauseHandle,
    events: EventSink,
}

impl AnalysisCursor {
    pub fn new(brief: StoryBrief) -> Self {
        Self {
            brief,
            ..Default::default()
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// 解析を最初から始める
    pub fn start(&mut self, images: Vec<UploadedImage>) {
        self.images = images;
        self.current_index = 0;
        self.story_summary.clear();
        self.slides.clear();
        self.pause = None;
        self.pause_handle.clear();
        self.status = CursorStatus::Running;
        info!(total = self.images.len(), "解析を開始");
    }

    /// 止まるか完了するまで進める
    pub async fn run<A>(&mut self, analyst: &mut A) -> Result<CursorStatus>
    where
        A: StoryAnalyst + ?Sized,
    {
        if self.status != CursorStatus::Running {
            return Err(PhotoStoryError::InvalidState(format!(
                "実行中ではありません（{:?}）",
                self.status
            )));
        }

        loop {
            if self.pause_handle.take() {
                let action = self.next_action();
                info!(?action, "一時停止を要求されました");
                self.pause_at(action, None);
                return Ok(self.status);
            }

            if self.current_index < self.images.len() {
                self.analyze_current(analyst).await;
                if self.status == CursorStatus::Paused {
                    return Ok(self.status);
                }
            } else {
                self.synthesize(analyst).await;
                return Ok(self.status);
            }
        }
    }

    #[instrument(skip_all, fields(index = self.current_index))]
    async fn analyze_current<A>(&mut self, analyst: &mut A)
    where
        A: StoryAnalyst + ?Sized,
    {
        let index = self.current_index;
        let total = self.images.len();
        let (previous, rest) = self.images.split_at(index);
        let image = &rest[0];

        debug!(index, total, image = %image.id, "写真を解析");
        self.events.emit(ProgressEvent::info(format!(
            "写真を解析中 ({}/{}): {}",
            index + 1,
            total,
            image.file_name
        )));

        let step = AnalysisStep {
            brief: &self.brief,
            story_summary: &self.story_summary,
            previous,
            image,
            index,
            total,
        };

        match analyst.analyze_image(step).await {
            Ok(result) => {
                self.images[index].description = Some(result.description);
                self.story_summary = result.story_summary;
                self.current_index += 1;
            }
            Err(e) => {
                warn!(index, error = %e, "写真の解析に失敗");
                self.pause_at(RetryAction::Analysis { index }, Some(e));
            }
        }
    }

    #[instrument(skip_all)]
    async fn synthesize<A>(&mut self, analyst: &mut A)
    where
        A: StoryAnalyst + ?Sized,
    {
        self.events.emit(ProgressEvent::info("スライドを構成中"));
        let input = SynthesisInput {
            brief: &self.brief,
            story_summary: &self.story_summary,
            images: &self.images,
        };

        match analyst.synthesize(input).await {
            Ok(mut slides) if !slides.is_empty() => {
                let ids: Vec<&str> = self.images.iter().map(|img| img.id.as_str()).collect();
                normalize_image_bindings(&mut slides, &ids);
                info!(slides = slides.len(), "スライド構成が完了");
                self.events
                    .emit(ProgressEvent::info(format!("{}枚のスライドを作成しました", slides.len())));
                self.slides = slides;
                self.status = CursorStatus::Done;
            }
            Ok(_) => {
                warn!("スライドが空でした");
                self.pause_at(RetryAction::Synthesis, Some(PhotoStoryError::EmptyStoryboard));
            }
            Err(e) => {
                warn!(error = %e, "スライド構成に失敗");
                self.pause_at(RetryAction::Synthesis, Some(e));
            }
        }
    }

    fn pause_at(&mut self, action: RetryAction, error: Option<PhotoStoryError>) {
        if let Some(e) = &error {
            self.events
                .emit(ProgressEvent::info(format!("一時停止しました: {}", e)));
        }
        self.pause = Some(PauseInfo { action, error });
        self.status = CursorStatus::Paused;
    }

    fn next_action(&self) -> RetryAction {
        if self.current_index < self.images.len() {
            RetryAction::Analysis {
                index: self.current_index,
            }
        } else {
            RetryAction::Synthesis
        }
    }

    /// 一時停止中にやり直す処理
    pub fn pending_retry(&self) -> Option<RetryAction> {
        match self.status {
            CursorStatus::Paused => self.pause.as_ref().map(|p| p.action),
            _ => None,
        }
    }

    /// 一時停止時に渡されたリトライを実行する
    ///
    /// 現在の一時停止と一致しない（古い）リトライは拒否する。
    pub async fn retry<A>(&mut self, action: RetryAction, analyst: &mut A) -> Result<CursorStatus>
    where
        A: StoryAnalyst + ?Sized,
    {
        if self.pending_retry() != Some(action) {
            return Err(PhotoStoryError::InvalidState(format!(
                "このリトライは現在の状態に対応していません: {:?}",
                action
            )));
        }

        info!(?action, "再開");
        self.pause = None;
        self.status = CursorStatus::Running;
        self.run(analyst).await
    }

    pub async fn resume<A>(&mut self, analyst: &mut A) -> Result<CursorStatus>
    where
        A: StoryAnalyst + ?Sized,
    {
        let action = self.pending_retry().ok_or_else(|| {
            PhotoStoryError::InvalidState("一時停止していません".to_string())
        })?;
        self.retry(action, analyst).await
    }

    pub fn progress(&self) -> AnalysisProgress {
        let total = self.images.len();
        let synthesizing = (self.current_index >= total && self.status == CursorStatus::Running)
            || self.pending_retry() == Some(RetryAction::Synthesis);

        let action = match self.status {
            CursorStatus::Idle => "待機中".to_string(),
            CursorStatus::Done => "完了".to_string(),
            CursorStatus::Paused => match &self.pause {
                Some(PauseInfo { error: Some(e), .. }) => format!("一時停止中: {}", e),
                _ => "一時停止中".to_string(),
            },
            CursorStatus::Running if self.current_index < total => format!(
                "写真を解析中 ({}/{})",
                self.current_index + 1,
                total
            ),
            CursorStatus::Running => "スライドを構成中".to_string(),
        };

        AnalysisProgress {
            current_index: self.current_index,
            total,
            action,
            synthesizing,
        }
    }

    pub fn pause_handle(&self) -> PauseHandle {
        self.pause_handle.clone()
    }

    pub fn request_pause(&self) {
        self.pause_handle.request();
    }

    pub fn status(&self) -> CursorStatus {
        self.status
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn brief(&self) -> &StoryBrief {
        &self.brief
    }

    pub fn images(&self) -> &[UploadedImage] {
        &self.images
    }

    pub fn story_summary(&self) -> &str {
        &self.story_summary
    }

    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn pause_info(&self) -> Option<&PauseInfo> {
        self.pause.as_ref()
    }

    pub fn last_error(&self) -> Option<&PhotoStoryError> {
        self.pause.as_ref().and_then(|p| p.error.as_ref())
    }

    /// ここまでの結果（途中でも可）
    pub fn to_storyboard(&self) -> Storyboard {
        Storyboard {
            concept: self.brief.concept.clone(),
            plan: self.brief.plan.clone(),
            story_summary: self.story_summary.clone(),
            images: self.images.clone(),
            slides: self.slides.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use photo_story_common::AnalysisStepResult;
    use std::collections::VecDeque;

    /// 台本どおりに応答する解析役
    #[derive(Default)]
    struct ScriptedAnalyst {
        analysis: VecDeque<Result<String>>,
        synthesis: VecDeque<Result<Vec<Slide>>>,
        seen_summaries: Vec<String>,
        log: Vec<String>,
    }

    #[async_trait]
    impl StoryAnalyst for ScriptedAnalyst {
        async fn analyze_image(&mut self, step: AnalysisStep<'_>) -> Result<AnalysisStepResult> {
            self.log.push(format!("analyze:{}", step.index));
            self.seen_summaries.push(step.story_summary.to_string());
            assert_eq!(step.previous.len(), step.index);
            let description = self.analysis.pop_front().unwrap_or_else(|| Ok(format!("img{}", step.index)))?;
            Ok(AnalysisStepResult {
                story_summary: format!("{}{}", step.story_summary, description),
                description,
            })
        }

        async fn synthesize(&mut self, input: SynthesisInput<'_>) -> Result<Vec<Slide>> {
            self.log.push("synthesize".to_string());
            assert!(input.images.iter().all(|img| img.description.is_some()));
            self.synthesis.pop_front().unwrap_or_else(|| {
                Ok(vec![Slide {
                    title: "T".into(),
                    script: "S".into(),
                    image_id: Some(input.images[0].id.clone()),
                    ..Default::default()
                }])
            })
        }
    }

    fn images(n: usize) -> Vec<UploadedImage> {
        (0..n)
            .map(|i| UploadedImage {
                id: format!("id{}", i),
                file_name: format!("{}.jpg", i),
                ..Default::default()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_runs_n_steps_then_synthesis_in_order() {
        let mut cursor = AnalysisCursor::new(StoryBrief::new("旅"));
        let mut analyst = ScriptedAnalyst::default();
        cursor.start(images(3));

        let status = cursor.run(&mut analyst).await.unwrap();

        assert_eq!(status, CursorStatus::Done);
        assert_eq!(analyst.log, vec!["analyze:0", "analyze:1", "analyze:2", "synthesize"]);
        assert_eq!(analyst.seen_summaries, vec!["", "img0", "img0img1"]);
        assert_eq!(cursor.story_summary(), "img0img1img2");
        assert_eq!(cursor.slides().len(), 1);
        assert!(!cursor.progress().synthesizing);
    }

    #[tokio::test]
    async fn test_failure_pauses_at_same_index_and_retry_resumes_there() {
        let mut cursor = AnalysisCursor::new(StoryBrief::new("旅"));
        let mut analyst = ScriptedAnalyst {
            analysis: VecDeque::from(vec![
                Ok("a".to_string()),
                Err(PhotoStoryError::Http("connection reset".into())),
            ]),
            ..Default::default()
        };
        cursor.start(images(3));

        assert_eq!(cursor.run(&mut analyst).await.unwrap(), CursorStatus::Paused);
        assert_eq!(cursor.current_index(), 1);
        assert_eq!(cursor.images()[0].description.as_deref(), Some("a"));
        assert!(cursor.images()[1].description.is_none());
        assert!(matches!(cursor.last_error(), Some(PhotoStoryError::Http(_))));

        let action = cursor.pending_retry().unwrap();
        assert_eq!(action, RetryAction::Analysis { index: 1 });

        assert_eq!(cursor.retry(action, &mut analyst).await.unwrap(), CursorStatus::Done);
        assert_eq!(
            analyst.log,
            vec!["analyze:0", "analyze:1", "analyze:1", "analyze:2", "synthesize"]
        );
        assert_eq!(cursor.story_summary(), "aimg1img2");
    }

    #[tokio::test]
    async fn test_synthesis_failure_retries_synthesis_only() {
        let mut cursor = AnalysisCursor::new(StoryBrief::new("旅"));
        let mut analyst = ScriptedAnalyst {
            synthesis: VecDeque::from(vec![Ok(Vec::new())]),
            ..Default::default()
        };
        cursor.start(images(2));

        assert_eq!(cursor.run(&mut analyst).await.unwrap(), CursorStatus::Paused);
        assert_eq!(cursor.pending_retry(), Some(RetryAction::Synthesis));
        assert!(matches!(cursor.last_error(), Some(PhotoStoryError::EmptyStoryboard)));
        assert!(cursor.progress().synthesizing);

        assert_eq!(cursor.resume(&mut analyst).await.unwrap(), CursorStatus::Done);
        assert_eq!(
            analyst.log,
            vec!["analyze:0", "analyze:1", "synthesize", "synthesize"]
        );
    }

    #[tokio::test]
    async fn test_stale_retry_is_rejected() {
        let mut cursor = AnalysisCursor::new(StoryBrief::new("旅"));
        let mut analyst = ScriptedAnalyst::default();
        cursor.start(images(1));

        let err = cursor
            .retry(RetryAction::Synthesis, &mut analyst)
            .await
            .unwrap_err();
        assert!(matches!(err, PhotoStoryError::InvalidState(_)));
        assert!(analyst.log.is_empty());
    }

    #[tokio::test]
    async fn test_pause_request_stops_before_next_step() {
        let mut cursor = AnalysisCursor::new(StoryBrief::new("旅"));
        let mut analyst = ScriptedAnalyst::default();
        cursor.start(images(2));
        cursor.pause_handle().request();

        assert_eq!(cursor.run(&mut analyst).await.unwrap(), CursorStatus::Paused);
        assert!(analyst.log.is_empty());
        assert!(cursor.last_error().is_none());
        assert_eq!(cursor.progress().action, "一時停止中");

        assert_eq!(cursor.resume(&mut analyst).await.unwrap(), CursorStatus::Done);
    }

    #[tokio::test]
    async fn test_zero_images_goes_straight_to_synthesis() {
        let mut cursor = AnalysisCursor::new(StoryBrief::new("旅"));
        let mut analyst = ScriptedAnalyst {
            synthesis: VecDeque::from(vec![Ok(vec![Slide {
                title: "T".into(),
                script: "S".into(),
                needs_image: true,
                ..Default::default()
            }])]),
            ..Default::default()
        };
        cursor.start(Vec::new());
        assert_eq!(cursor.run(&mut analyst).await.unwrap(), CursorStatus::Done);
        assert_eq!(analyst.log, vec!["synthesize"]);
    }

    #[tokio::test]
    async fn test_run_before_start_is_invalid() {
        let mut cursor = AnalysisCursor::new(StoryBrief::new("旅"));
        let mut analyst = ScriptedAnalyst::default();
        assert!(matches!(
            cursor.run(&mut analyst).await,
            Err(PhotoStoryError::InvalidState(_))
        ));
        assert_eq!(cursor.progress().action, "待機中");
    }
}
