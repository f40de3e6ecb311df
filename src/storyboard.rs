//! ストーリーボードの生成・編集
//!
//! プロンプト生成とレスポンス解析（common）を CallDispatcher につなぐ。

use crate::analyzer::{AnalysisStep, StoryAnalyst, SynthesisInput};
use crate::config::Config;
use crate::dispatch::{CallDispatcher, SelfCheck};
use crate::error::{PhotoStoryError, Result};
use crate::remote::{GenerateRequest, GeneratedVideo, GenerationKind, GenerativeBackend, MediaPart};
use crate::scanner::image_id;
use async_trait::async_trait;
use photo_story_common::{
    build_analysis_prompt, build_edit_prompt, build_illustration_prompt, build_plan_prompt,
    build_synthesis_prompt, build_video_prompt, normalize_image_bindings, parse_analysis_step,
    parse_plan, parse_slides, AnalysisPromptInput, AnalysisStepResult, ImageSource, NarrativePlan,
    Slide, Storyboard, UploadedImage,
};
use serde_json::json;
use std::path::Path;
use tracing::{debug, info};

/// 用途別のモデル名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Models {
    pub text: String,
    pub image: String,
    pub video: String,
}

impl Models {
    pub fn from_config(config: &Config) -> Self {
        Self {
            text: config.text_model.clone(),
            image: config.image_model.clone(),
            video: config.video_model.clone(),
        }
    }
}

pub struct StoryboardService<B> {
    dispatcher: CallDispatcher<B>,
    models: Models,
}

impl<B: GenerativeBackend> StoryboardService<B> {
    pub fn new(dispatcher: CallDispatcher<B>, models: Models) -> Self {
        Self { dispatcher, models }
    }

    pub fn dispatcher(&self) -> &CallDispatcher<B> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut CallDispatcher<B> {
        &mut self.dispatcher
    }

    pub fn models(&self) -> &Models {
        &self.models
    }

    /// テキストモデルの疎通確認
    pub async fn self_check(&mut self) -> Result<SelfCheck> {
        let model = self.models.text.clone();
        self.dispatcher.self_check(&model).await
    }

    async fn request_text(&mut self, request: GenerateRequest) -> Result<String> {
        let dispatched = self.dispatcher.dispatch(&request).await?;
        debug!(served_by = %dispatched.served_by, model = %request.model, "テキスト応答");
        dispatched
            .output
            .into_text()
            .ok_or_else(|| PhotoStoryError::UnexpectedOutput("テキスト以外の応答".to_string()))
    }

    /// コンセプトから構成案を作る
    pub async fn draft_plan(&mut self, concept: &str) -> Result<NarrativePlan> {
        let request = GenerateRequest::json(&self.models.text, build_plan_prompt(concept));
        let text = self.request_text(request).await?;
        Ok(parse_plan(&text)?)
    }

    /// チャット指示でスライドを修正する
    ///
    /// 応答からスライドを読み取れなければ元のスライドは変えずにエラーを返す。
    pub async fn edit_slides(&mut self, storyboard: &Storyboard, instruction: &str) -> Result<Vec<Slide>> {
        let prompt = build_edit_prompt(&storyboard.slides, instruction, &storyboard.images);
        let text = self
            .request_text(GenerateRequest::json(&self.models.text, prompt))
            .await?;

        let mut slides = parse_slides(&text);
        if slides.is_empty() {
            return Err(PhotoStoryError::EmptyStoryboard);
        }
        let ids: Vec<&str> = storyboard.images.iter().map(|img| img.id.as_str()).collect();
        normalize_image_bindings(&mut slides, &ids);
        info!(slides = slides.len(), "スライドを修正");
        Ok(slides)
    }

    /// スライド用の画像を生成する
    pub async fn illustrate(&mut self, slide: &Slide, concept: &str) -> Result<UploadedImage> {
        let request = GenerateRequest::new(
            GenerationKind::Image,
            &self.models.image,
            build_illustration_prompt(slide, concept),
        );
        let dispatched = self.dispatcher.dispatch(&request).await?;
        let media = dispatched
            .output
            .into_image()
            .ok_or_else(|| PhotoStoryError::UnexpectedOutput("画像が返りませんでした".to_string()))?;

        let id = image_id(&media.data);
        let extension = match media.mime_type.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        };
        Ok(UploadedImage {
            file_name: format!("ai-{}.{}", id, extension),
            id,
            mime_type: media.mime_type,
            data: media.data,
            source: ImageSource::Ai,
            description: Some(slide.script.clone()),
            ..Default::default()
        })
    }

    /// スライドの短い動画を生成する（参照画像は任意）
    pub async fn animate(&mut self, slide: &Slide, reference: Option<&UploadedImage>) -> Result<GeneratedVideo> {
        let mut request = GenerateRequest::new(
            GenerationKind::Video,
            &self.models.video,
            build_video_prompt(slide),
        );
        if let Some(image) = reference.filter(|img| !img.data.is_empty()) {
            request = request.with_media(MediaPart {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            });
        }

        let dispatched = self.dispatcher.dispatch(&request).await?;
        dispatched
            .output
            .into_video()
            .ok_or_else(|| PhotoStoryError::UnexpectedOutput("動画が返りませんでした".to_string()))
    }
}

#[async_trait]
impl<B: GenerativeBackend> StoryAnalyst for StoryboardService<B> {
    async fn analyze_image(&mut self, step: AnalysisStep<'_>) -> Result<AnalysisStepResult> {
        let prompt = build_analysis_prompt(&AnalysisPromptInput {
            concept: &step.brief.concept,
            plan: step.brief.plan.as_ref(),
            story_summary: step.story_summary,
            previous: step.previous,
            image: step.image,
            index: step.index,
            total: step.total,
        });

        let mut request = GenerateRequest::json(&self.models.text, prompt).with_schema(json!({
            "type": "OBJECT",
            "properties": {
                "description": { "type": "STRING" },
                "storySummary": { "type": "STRING" }
            },
            "required": ["description", "storySummary"]
        }));
        // 過去の写真は説明文で渡し、送る画像は今回の1枚だけ
        if !step.image.data.is_empty() {
            request = request.with_media(MediaPart {
                mime_type: step.image.mime_type.clone(),
                data: step.image.data.clone(),
            });
        }

        let text = self.request_text(request).await?;
        Ok(parse_analysis_step(&text, step.story_summary)?)
    }

    async fn synthesize(&mut self, input: SynthesisInput<'_>) -> Result<Vec<Slide>> {
        let prompt = build_synthesis_prompt(
            &input.brief.concept,
            input.brief.plan.as_ref(),
            input.story_summary,
            input.images,
        );
        let text = self
            .request_text(GenerateRequest::json(&self.models.text, prompt))
            .await?;
        Ok(parse_slides(&text))
    }
}

/// 生成画像をスライドに割り当てる
pub fn attach_image(storyboard: &mut Storyboard, slide_index: usize, image: UploadedImage) -> Result<()> {
    let slide = storyboard.slides.get_mut(slide_index).ok_or_else(|| {
        PhotoStoryError::InvalidState(format!("スライド{}は存在しません", slide_index + 1))
    })?;
    slide.image_id = Some(image.id.clone());
    slide.needs_image = false;
    if storyboard.find_image(&image.id).is_none() {
        storyboard.images.push(image);
    }
    Ok(())
}

pub fn load_storyboard(path: &Path) -> Result<Storyboard> {
    if !path.exists() {
        return Err(PhotoStoryError::FileNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_storyboard(path: &Path, storyboard: &Storyboard) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(storyboard)?;
    std::fs::write(path, json)?;
    Ok(())
}
