//! プロンプト生成モジュール
//!
//! - build_plan_prompt: コンセプト → 構成案
//! - build_analysis_prompt: 1枚ずつの解析（要約を引き継ぐ）
//! - build_synthesis_prompt: 要約 + 解析済み画像 → スライド配列
//! - build_edit_prompt: チャット指示によるスライド修正
//! - build_illustration_prompt / build_video_prompt: 画像・動画生成

use crate::types::{NarrativePlan, Slide, UploadedImage};

/// スライドJSONの出力形式（合成・編集で共通）
const SLIDE_FORMAT: &str = r#"[
  {
    "title": "スライドタイトル",
    "script": "ナレーション原稿（2〜4文）",
    "imageId": "使用する写真のID（該当なしは null）",
    "speaker": 0,
    "textOverlay": "画面に重ねる短い文言（任意）",
    "podcastScript": "対話形式の原稿（任意）",
    "needsImage": false,
    "suggestions": { "search": "ストック写真検索語", "generate": "画像生成プロンプト" }
  }
]"#;

/// 疎通確認用の最小プロンプト
pub fn build_probe_prompt() -> String {
    "Reply with the single word OK.".to_string()
}

/// 構成案プロンプト生成
pub fn build_plan_prompt(concept: &str) -> String {
    format!(
        r#"あなたは写真から物語を組み立てるスライド構成作家です。
以下のコンセプトについて、写真スライドショーの構成案を作成してください。

## コンセプト
{concept}

## 出力形式（厳密にこのJSONオブジェクト形式で出力）
{{
  "title": "作品タイトル",
  "logline": "一文で表した物語の核",
  "outline": ["起", "承", "転", "結"],
  "photoThemes": ["用意すると良い写真の被写体"]
}}

JSONのみ出力。説明文は不要"#
    )
}

/// 解析プロンプトの入力
#[derive(Debug, Clone, Copy)]
pub struct AnalysisPromptInput<'a> {
    pub concept: &'a str,
    pub plan: Option<&'a NarrativePlan>,
    pub story_summary: &'a str,
    /// 解析済みの写真（入力順）
    pub previous: &'a [UploadedImage],
    pub image: &'a UploadedImage,
    pub index: usize,
    pub total: usize,
}

/// 解析プロンプト生成（1枚分）
///
/// 直前までの要約と解析済み写真の説明を文脈として渡し、
/// この写真の説明と更新後の要約を返させる。
pub fn build_analysis_prompt(input: &AnalysisPromptInput<'_>) -> String {
    let plan_section = input.plan.map(format_plan).unwrap_or_else(|| "なし".to_string());

    let previous = if input.previous.is_empty() {
        "なし（最初の写真）".to_string()
    } else {
        input
            .previous
            .iter()
            .map(|img| {
                format!(
                    "- [{}] {}",
                    img.id,
                    img.description.as_deref().unwrap_or("（説明なし）")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let summary = if input.story_summary.trim().is_empty() {
        "まだありません"
    } else {
        input.story_summary
    };

    format!(
        r#"あなたは写真から物語を組み立てるスライド構成作家です。
写真を1枚ずつ受け取り、物語の要約を育てていきます。

## コンセプト
{concept}

## 構成案
{plan_section}

## これまでの物語の要約
{summary}

## 解析済みの写真
{previous}

## 今回の写真（{position}/{total}枚目）
{meta}

## 出力形式（厳密にこのJSONオブジェクト形式で出力）
{{
  "description": "この写真に写っているものの客観的な説明",
  "storySummary": "この写真を踏まえて更新した物語全体の要約"
}}

## 注意
- 推測せず、見えるものだけを説明に書く
- 要約はこれまでの流れを保ったまま、今回の写真の場面を加える
- JSONのみ出力。説明文は不要"#,
        concept = input.concept,
        position = input.index + 1,
        total = input.total,
        meta = format_image_meta(input.image),
    )
}

/// スライド合成プロンプト生成
pub fn build_synthesis_prompt(
    concept: &str,
    plan: Option<&NarrativePlan>,
    story_summary: &str,
    images: &[UploadedImage],
) -> String {
    let plan_section = plan.map(format_plan).unwrap_or_else(|| "なし".to_string());
    let photo_list = images
        .iter()
        .map(|img| {
            format!(
                "- ID: {} / {}",
                img.id,
                img.description.as_deref().unwrap_or("（説明なし）")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"あなたは写真から物語を組み立てるスライド構成作家です。
物語の要約と写真の一覧から、ナレーション付きのスライド構成を作成してください。

## コンセプト
{concept}

## 構成案
{plan_section}

## 物語の要約
{story_summary}

## 写真一覧
{photo_list}

## 出力形式（厳密にこのJSON配列形式で出力）
{SLIDE_FORMAT}

## 注意
- imageId は写真一覧のIDだけを使う
- 写真が足りない場面は imageId を null、needsImage を true にして suggestions を書く
- speaker は 0 と 1 を交互に使う
- JSON配列のみ出力。説明文は不要"#
    )
}

/// チャット編集プロンプト生成
pub fn build_edit_prompt(slides: &[Slide], instruction: &str, images: &[UploadedImage]) -> String {
    let current = serde_json::to_string_pretty(slides).unwrap_or_default();
    let ids = images
        .iter()
        .map(|img| img.id.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"以下のスライド構成を、ユーザーの指示に従って修正してください。

## 現在のスライド
{current}

## 利用できる写真ID
{ids}

## ユーザーの指示
{instruction}

## 出力形式
修正後のスライド全体を、次のJSON配列形式で出力：
{SLIDE_FORMAT}

JSON配列のみ出力。説明文は不要"#
    )
}

/// 画像生成プロンプト生成
pub fn build_illustration_prompt(slide: &Slide, concept: &str) -> String {
    if let Some(generate) = slide
        .suggestions
        .as_ref()
        .and_then(|s| s.generate.as_deref())
        .filter(|s| !s.trim().is_empty())
    {
        return format!("{generate}\n\nStyle: photographic, consistent with the story \"{concept}\".");
    }

    format!(
        "A photographic illustration for a slide titled \"{}\" in a story about \"{}\". Scene: {}",
        slide.title, concept, slide.script
    )
}

/// 動画生成プロンプト生成
pub fn build_video_prompt(slide: &Slide) -> String {
    format!(
        "A short, gentle cinematic shot for the scene \"{}\". {}",
        slide.title, slide.script
    )
}

fn format_plan(plan: &NarrativePlan) -> String {
    let outline = plan
        .outline
        .iter()
        .map(|o| format!("- {o}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("タイトル: {}\n核: {}\n{}", plan.title, plan.logline, outline)
}

fn format_image_meta(image: &UploadedImage) -> String {
    let mut lines = vec![format!("ID: {}", image.id)];
    if !image.file_name.is_empty() {
        lines.push(format!("ファイル: {}", image.file_name));
    }
    lines.push(format!(
        "撮影: {}",
        image.taken_at.as_deref().unwrap_or("unknown")
    ));
    if let Some(loc) = image.location {
        lines.push(format!("位置: {:.5}, {:.5}", loc.latitude, loc.longitude));
    }
    lines.join("\n")
}
