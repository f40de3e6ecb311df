//! ストーリーボードの型定義
//!
//! CLIとWeb(WASM)で共有される型:
//! - UploadedImage: アップロード/生成された写真（解析で説明文が付く）
//! - NarrativePlan: コンセプトから起こした構成案
//! - Slide: 合成ステップの出力（以後はチャット編集で個別に更新）
//! - Storyboard: 保存用のまとまり

use serde::{Deserialize, Serialize};

/// 画像の出どころ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    #[default]
    User,
    Ai,
}

/// EXIF由来の撮影位置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// アップロード画像
///
/// `data` はセッション中だけ保持し、保存ファイルには書き出さない。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub id: String,

    #[serde(default)]
    pub file_name: String,

    #[serde(default = "default_mime_type")]
    pub mime_type: String,

    #[serde(skip)]
    pub data: Vec<u8>,

    /// 撮影日時（EXIF DateTimeOriginal）
    #[serde(default)]
    pub taken_at: Option<String>,

    #[serde(default)]
    pub location: Option<GeoLocation>,

    #[serde(default)]
    pub source: ImageSource,

    /// 解析ステップで一度だけ設定される
    #[serde(default)]
    pub description: Option<String>,
}

fn default_mime_type() -> String {
    "image/jpeg".to_string()
}

impl UploadedImage {
    pub fn is_analyzed(&self) -> bool {
        self.description.is_some()
    }
}

/// 構成案
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NarrativePlan {
    pub title: String,
    pub logline: String,
    pub outline: Vec<String>,
    pub photo_themes: Vec<String>,
}

/// 画像の検索/生成候補
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlideSuggestions {
    pub search: Option<String>,
    pub generate: Option<String>,
}

/// スライド
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    pub title: String,

    /// ナレーション原稿
    pub script: String,

    #[serde(default)]
    pub image_id: Option<String>,

    /// 話者インデックス
    #[serde(default)]
    pub speaker: u32,

    #[serde(default)]
    pub text_overlay: Option<String>,

    #[serde(default)]
    pub podcast_script: Option<String>,

    #[serde(default)]
    pub needs_image: bool,

    #[serde(default)]
    pub suggestions: Option<SlideSuggestions>,
}

/// 保存用ストーリーボード
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Storyboard {
    pub concept: String,
    pub plan: Option<NarrativePlan>,
    pub story_summary: String,
    pub images: Vec<UploadedImage>,
    pub slides: Vec<Slide>,
}

impl Storyboard {
    pub fn find_image(&self, id: &str) -> Option<&UploadedImage> {
        self.images.iter().find(|img| img.id == id)
    }

    /// 画像が必要なスライドのインデックス
    pub fn slides_needing_images(&self) -> Vec<usize> {
        self.slides
            .iter()
            .enumerate()
            .filter(|(_, s)| s.needs_image || s.image_id.is_none())
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slide_deserialize_missing_fields() {
        let json = r#"{"title": "海辺", "script": "朝の散歩"}"#;
        let slide: Slide = serde_json::from_str(json).expect("デシリアライズ失敗");
        assert_eq!(slide.title, "海辺");
        assert_eq!(slide.image_id, None);
        assert_eq!(slide.speaker, 0);
        assert!(!slide.needs_image);
    }

    #[test]
    fn test_slide_serialize_camel_case() {
        let slide = Slide {
            title: "A".to_string(),
            script: "B".to_string(),
            image_id: Some("img-1".to_string()),
            needs_image: false,
            text_overlay: Some("見出し".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&slide).expect("シリアライズ失敗");
        assert!(json.contains("\"imageId\":\"img-1\""));
        assert!(json.contains("\"needsImage\":false"));
        assert!(json.contains("\"textOverlay\":\"見出し\""));
    }

    #[test]
    fn test_uploaded_image_payload_not_serialized() {
        let image = UploadedImage {
            id: "abc".to_string(),
            file_name: "a.jpg".to_string(),
            data: vec![1, 2, 3],
            description: Some("夕焼け".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_string(&image).expect("シリアライズ失敗");
        assert!(!json.contains("\"data\""));
        assert!(json.contains("\"source\":\"user\""));

        let restored: UploadedImage = serde_json::from_str(&json).expect("デシリアライズ失敗");
        assert!(restored.data.is_empty());
        assert!(restored.is_analyzed());
    }

    #[test]
    fn test_storyboard_slides_needing_images() {
        let board = Storyboard {
            slides: vec![
                Slide {
                    image_id: Some("a".to_string()),
                    ..Default::default()
                },
                Slide {
                    needs_image: true,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        assert_eq!(board.slides_needing_images(), vec![1]);
    }

    #[test]
    fn test_plan_deserialize_partial() {
        let json = r#"{"title": "京都の一日", "outline": ["朝", "昼"]}"#;
        let plan: NarrativePlan = serde_json::from_str(json).expect("デシリアライズ失敗");
        assert_eq!(plan.title, "京都の一日");
        assert_eq!(plan.outline.len(), 2);
        assert!(plan.photo_themes.is_empty());
    }
}
