//! APIレスポンスパーサー
//!
//! モデル出力はスキーマ保証がないため、厳密さよりもデフォルト補完を優先する。
//! - parse_slides: スライド配列（JSON → 見出し区切りMarkdownへフォールバック）
//! - parse_analysis_step: 1枚分の解析結果（説明文 + 更新後ストーリー要約）
//! - parse_plan: 構成案

use crate::error::{Error, Result};
use crate::types::{NarrativePlan, Slide, SlideSuggestions};
use regex::Regex;
use serde_json::{Map, Value};

/// タイトル欠落時のプレースホルダ
pub const DEFAULT_TITLE: &str = "（無題のスライド）";

/// 原稿欠落時のプレースホルダ
pub const DEFAULT_SCRIPT: &str = "（ナレーション未設定）";

lazy_static::lazy_static! {
    // "## Slide 3: タイトル" / "### スライド2 - タイトル"（"Slideshow" などは見出しにしない）
    static ref SLIDE_HEADING_RE: Regex =
        Regex::new(r"(?im)^[ \t]*#{1,6}[ \t]*(?:slide|スライド)(?:[ \t]*\d+|\b)[ \t]*[:：.\-]?[ \t]*(.*)$").unwrap();
    // "[Image: ...]" / "画像: ..." / "![alt](url)"
    static ref IMAGE_DIRECTIVE_RE: Regex =
        Regex::new(r"(?i)^(?:!\[[^\]]*\]\([^)]*\)|\[(?:image|画像)[ \t]*[:：](.*)\]|(?:image|画像)[ \t]*[:：](.*))$").unwrap();
    static ref SCRIPT_LABEL_RE: Regex =
        Regex::new(r"(?i)^(?:\*\*)?(?:narration|script|ナレーション|原稿)(?:\*\*)?[ \t]*[:：](?:\*\*)?[ \t]*").unwrap();
}

/// APIレスポンスからJSON部分を抽出
///
/// 抽出優先順位:
/// 1. ```json ... ``` ブロック
/// 2. 生の [...] 配列 または {...} オブジェクト（先に現れた方）
/// 3. エラー
///
/// # Examples
/// ```
/// use photo_story_common::extract_json;
///
/// let response = "結果: [{\"title\": \"A\"}]";
/// let json = extract_json(response).unwrap();
/// assert_eq!(json, "[{\"title\": \"A\"}]");
/// ```
pub fn extract_json(response: &str) -> Result<&str> {
    if let Some(start_marker) = response.find("```json") {
        let start = start_marker + 7; // "```json" の長さ
        if let Some(end_offset) = response[start..].find("```") {
            let end = start + end_offset;
            return Ok(response[start..end].trim());
        }
    }

    if let Some(start) = response.find(|c: char| c == '[' || c == '{') {
        let close = if response[start..].starts_with('[') { ']' } else { '}' };
        if let Some(end) = response.rfind(close) {
            if end >= start {
                return Ok(&response[start..=end]);
            }
        }
    }

    Err(Error::Parse("JSONが見つかりません".into()))
}

/// モデル出力をスライド配列に変換
///
/// 失敗しない。認識できない入力には空配列を返す。
pub fn parse_slides(text: &str) -> Vec<Slide> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    match parse_slides_json(text) {
        Some(slides) => slides,
        None => parse_slides_markdown(text),
    }
}

fn parse_slides_json(text: &str) -> Option<Vec<Slide>> {
    let json_str = extract_json(text).ok()?;
    let value: Value = serde_json::from_str(json_str.trim()).ok()?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("slides") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    Some(
        items
            .iter()
            .filter_map(Value::as_object)
            .map(slide_from_map)
            .collect(),
    )
}

fn slide_from_map(map: &Map<String, Value>) -> Slide {
    let title = get_string(map, "title")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let script = get_string(map, "script")
        .or_else(|| get_string(map, "narration"))
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SCRIPT.to_string());

    let image_id = get_string(map, "imageId")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let needs_image = get_bool(map, "needsImage").unwrap_or(image_id.is_none());

    let suggestions = map.get("suggestions").and_then(Value::as_object).and_then(|s| {
        let search = get_string(s, "search");
        let generate = get_string(s, "generate");
        if search.is_none() && generate.is_none() {
            None
        } else {
            Some(SlideSuggestions { search, generate })
        }
    });

    Slide {
        title,
        script,
        image_id,
        speaker: get_u32(map, "speaker").unwrap_or(0),
        text_overlay: get_string(map, "textOverlay"),
        podcast_script: get_string(map, "podcastScript"),
        needs_image,
        suggestions,
    }
}

/// 見出し区切りMarkdownのフォールバックパーサー
fn parse_slides_markdown(text: &str) -> Vec<Slide> {
    let headings: Vec<_> = SLIDE_HEADING_RE.captures_iter(text).collect();
    let mut slides = Vec::new();

    for (i, caps) in headings.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        let body_end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let body = &text[whole.end()..body_end];

        let title = caps
            .get(1)
            .map(|m| m.as_str().trim().trim_matches('*').trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        let mut directive = None;
        let mut lines = Vec::new();
        for line in body.lines().map(str::trim) {
            if line.is_empty() {
                continue;
            }
            // スライド以外の見出しで本文は終わり
            if line.starts_with('#') {
                break;
            }
            if let Some(d) = IMAGE_DIRECTIVE_RE.captures(line) {
                if directive.is_none() {
                    directive = d
                        .get(1)
                        .or_else(|| d.get(2))
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|s| !s.is_empty());
                }
                continue;
            }
            lines.push(SCRIPT_LABEL_RE.replace(line, "").trim().to_string());
        }

        let script = lines
            .into_iter()
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if script.is_empty() {
            continue;
        }

        slides.push(Slide {
            title,
            script,
            image_id: None,
            speaker: (slides.len() % 2) as u32,
            needs_image: true,
            suggestions: directive.map(|generate| SlideSuggestions {
                search: None,
                generate: Some(generate),
            }),
            ..Default::default()
        });
    }

    slides
}

/// 1枚分の解析結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisStepResult {
    pub description: String,
    pub story_summary: String,
}

/// 解析ステップのレスポンスをパース
///
/// JSONでない場合は本文全体を説明文として扱い、要約に追記する。
/// 空レスポンスのみエラー。
pub fn parse_analysis_step(text: &str, previous_summary: &str) -> Result<AnalysisStepResult> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::Parse("解析レスポンスが空です".into()));
    }

    if let Some(map) = first_object(trimmed) {
        let description = get_string(&map, "description")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let summary = get_string(&map, "storySummary")
            .or_else(|| get_string(&map, "summary"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if description.is_empty() && summary.is_none() {
            return Err(Error::Parse(
                "解析レスポンスに description / storySummary がありません".into(),
            ));
        }

        let story_summary =
            summary.unwrap_or_else(|| append_summary(previous_summary, &description));
        return Ok(AnalysisStepResult {
            description,
            story_summary,
        });
    }

    Ok(AnalysisStepResult {
        description: trimmed.to_string(),
        story_summary: append_summary(previous_summary, trimmed),
    })
}

fn append_summary(previous: &str, addition: &str) -> String {
    if previous.trim().is_empty() {
        addition.to_string()
    } else {
        format!("{}\n\n{}", previous.trim_end(), addition)
    }
}

/// 構成案レスポンスをパース
pub fn parse_plan(text: &str) -> Result<NarrativePlan> {
    let map = first_object(text.trim())
        .ok_or_else(|| Error::Parse("構成案のJSONが見つかりません".into()))?;

    let plan = NarrativePlan {
        title: get_string(&map, "title").unwrap_or_default(),
        logline: get_string(&map, "logline").unwrap_or_default(),
        outline: get_string_list(&map, "outline"),
        photo_themes: get_string_list(&map, "photoThemes"),
    };

    if plan.title.trim().is_empty() && plan.outline.is_empty() {
        return Err(Error::Parse("構成案にタイトルも構成もありません".into()));
    }
    Ok(plan)
}

/// スライドの画像参照を既知のIDに揃える
///
/// 存在しないIDを指すスライドは未割り当てに戻す。戻した件数を返す。
pub fn normalize_image_bindings(slides: &mut [Slide], known_ids: &[&str]) -> usize {
    let mut fixed = 0;
    for slide in slides.iter_mut() {
        let unknown = slide
            .image_id
            .as_deref()
            .is_some_and(|id| !known_ids.contains(&id));
        if unknown {
            slide.image_id = None;
            slide.needs_image = true;
            fixed += 1;
        }
    }
    fixed
}

fn first_object(text: &str) -> Option<Map<String, Value>> {
    let json_str = extract_json(text).ok()?;
    let value: Value = serde_json::from_str(json_str.trim()).ok()?;
    match value {
        Value::Object(map) => Some(map),
        Value::Array(items) => items.into_iter().find_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        }),
        _ => None,
    }
}

fn get_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    let value = map.get(key)?;
    if let Some(s) = value.as_str() {
        return Some(s.to_string());
    }
    if value.is_null() {
        return None;
    }
    Some(value.to_string())
}

fn get_bool(map: &Map<String, Value>, key: &str) -> Option<bool> {
    let value = map.get(key)?;
    if let Some(b) = value.as_bool() {
        return Some(b);
    }
    if let Some(s) = value.as_str() {
        return Some(matches!(s.to_lowercase().as_str(), "true" | "1" | "yes"));
    }
    None
}

fn get_u32(map: &Map<String, Value>, key: &str) -> Option<u32> {
    let value = map.get(key)?;
    if let Some(n) = value.as_u64() {
        return u32::try_from(n).ok();
    }
    value.as_str().and_then(|s| s.trim().parse().ok())
}

fn get_string_list(map: &Map<String, Value>, key: &str) -> Vec<String> {
    match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(|l| l.trim().trim_start_matches('-').trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =============================================
    // extract_json テスト
    // =============================================

    #[test]
    fn test_extract_json_with_block() {
        let response = "説明です\n```json\n[{\"title\": \"A\"}]\n```\n以上";
        let json = extract_json(response).unwrap();
        assert_eq!(json, "[{\"title\": \"A\"}]");
    }

    #[test]
    fn test_extract_json_object() {
        let response = r#"結果: {"description": "港", "storySummary": "旅の始まり"} です"#;
        let json = extract_json(response).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.ends_with('}'));
    }

    #[test]
    fn test_extract_json_error() {
        let result = extract_json("No JSON here");
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    // =============================================
    // parse_slides テスト（JSON）
    // =============================================

    #[test]
    fn test_parse_slides_empty_array() {
        assert!(parse_slides("[]").is_empty());
    }

    #[test]
    fn test_parse_slides_minimal_element() {
        let slides = parse_slides(r#"[{"title":"A","script":"B"}]"#);
        assert_eq!(slides.len(), 1);
        assert_eq!(slides[0].title, "A");
        assert_eq!(slides[0].script, "B");
        assert_eq!(slides[0].image_id, None);
        assert!(slides[0].needs_image);
        assert_eq!(slides[0].speaker, 0);
    }

    #[test]
    fn test_parse_slides_defaults_for_missing_fields() {
        let slides = parse_slides(r#"[{}, {"title": "  ", "script": null, "imageId": "img-2"}]"#);
        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].title, DEFAULT_TITLE);
        assert_eq!(slides[0].script, DEFAULT_SCRIPT);
        assert_eq!(slides[1].title, DEFAULT_TITLE);
        assert_eq!(slides[1].image_id.as_deref(), Some("img-2"));
        assert!(!slides[1].needs_image);
    }

    #[test]
    fn test_parse_slides_lenient_field_types() {
        let text = r#"```json
[
  {
    "title": "港町",
    "script": "船が出ていく",
    "imageId": 7,
    "speaker": "1",
    "needsImage": "yes",
    "textOverlay": "出航",
    "suggestions": {"search": "harbor sunset", "generate": "夕暮れの港"}
  }
]
```"#;
        let slides = parse_slides(text);
        assert_eq!(slides.len(), 1);
        let s = &slides[0];
        assert_eq!(s.image_id.as_deref(), Some("7"));
        assert_eq!(s.speaker, 1);
        assert!(s.needs_image);
        assert_eq!(s.text_overlay.as_deref(), Some("出航"));
        let suggestions = s.suggestions.as_ref().expect("suggestions");
        assert_eq!(suggestions.search.as_deref(), Some("harbor sunset"));
    }

    #[test]
    fn test_parse_slides_wrapped_object() {
        let slides = parse_slides(r#"{"slides": [{"title": "X", "script": "Y"}]}"#);
        assert_eq!(slides.len(), 1);
        assert_eq!(slides[0].title, "X");
    }

    #[test]
    fn test_parse_slides_skips_non_object_elements() {
        let slides = parse_slides(r#"[1, "text", {"title": "A", "script": "B"}]"#);
        assert_eq!(slides.len(), 1);
    }

    // =============================================
    // parse_slides テスト（Markdownフォールバック）
    // =============================================

    #[test]
    fn test_parse_slides_not_json_without_heading() {
        assert!(parse_slides("not json").is_empty());
        assert!(parse_slides("").is_empty());
    }

    #[test]
    fn test_parse_slides_markdown_fallback() {
        let text = "## Slide 1: 朝の市場\n[Image: 魚が並ぶ市場]\nナレーション: 朝の市場は活気にあふれている。\n\n## Slide 2: **港**\n![港](port.jpg)\n船がゆっくりと出ていく。\n";
        let slides = parse_slides(text);
        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].title, "朝の市場");
        assert_eq!(slides[0].script, "朝の市場は活気にあふれている。");
        assert_eq!(slides[0].speaker, 0);
        assert_eq!(
            slides[0].suggestions.as_ref().and_then(|s| s.generate.as_deref()),
            Some("魚が並ぶ市場")
        );
        assert_eq!(slides[1].title, "港");
        assert_eq!(slides[1].script, "船がゆっくりと出ていく。");
        assert_eq!(slides[1].speaker, 1);
        assert!(slides[1].needs_image);
    }

    #[test]
    fn test_parse_slides_markdown_skips_empty_script() {
        let text = "## Slide 1: 画像だけ\n[Image: 空]\n## スライド2: 本文あり\n本文\n## Slide 3\nもう一枚";
        let slides = parse_slides(text);
        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].title, "本文あり");
        assert_eq!(slides[0].speaker, 0);
        assert_eq!(slides[1].title, DEFAULT_TITLE);
        assert_eq!(slides[1].script, "もう一枚");
        assert_eq!(slides[1].speaker, 1);
    }

    #[test]
    fn test_parse_slides_markdown_requires_slide_word() {
        assert!(parse_slides("## Slideshow notes\nこれは説明\n").is_empty());
        assert!(parse_slides("## スライドショーについて\n説明\n").is_empty());

        let text = "## Slide: 導入\n旅の始まり。\n## Slideshow notes\n表示用のメモ\n## スライド2 - 結び\n帰路につく。";
        let slides = parse_slides(text);
        assert_eq!(slides.len(), 2);
        assert_eq!(slides[0].title, "導入");
        assert_eq!(slides[0].script, "旅の始まり。");
        assert_eq!(slides[1].title, "結び");
    }

    #[test]
    fn test_parse_slides_broken_json_falls_back() {
        let text = "[{\"title\": \"A\",\n## Slide 1: 救済\n本文";
        let slides = parse_slides(text);
        assert_eq!(slides.len(), 1);
        assert_eq!(slides[0].title, "救済");
    }

    // =============================================
    // parse_analysis_step テスト
    // =============================================

    #[test]
    fn test_parse_analysis_step_json() {
        let text = r#"{"description": "灯台と青空", "storySummary": "旅は海辺から始まる"}"#;
        let step = parse_analysis_step(text, "").unwrap();
        assert_eq!(step.description, "灯台と青空");
        assert_eq!(step.story_summary, "旅は海辺から始まる");
    }

    #[test]
    fn test_parse_analysis_step_missing_summary_appends() {
        let text = r#"[{"description": "夕食の屋台"}]"#;
        let step = parse_analysis_step(text, "朝は市場へ").unwrap();
        assert_eq!(step.description, "夕食の屋台");
        assert_eq!(step.story_summary, "朝は市場へ\n\n夕食の屋台");
    }

    #[test]
    fn test_parse_analysis_step_plain_text() {
        let step = parse_analysis_step("  山頂からの眺め  ", "").unwrap();
        assert_eq!(step.description, "山頂からの眺め");
        assert_eq!(step.story_summary, "山頂からの眺め");
    }

    #[test]
    fn test_parse_analysis_step_errors() {
        assert!(parse_analysis_step("   ", "要約").is_err());
        assert!(parse_analysis_step(r#"{"other": 1}"#, "要約").is_err());
    }

    // =============================================
    // parse_plan / normalize_image_bindings テスト
    // =============================================

    #[test]
    fn test_parse_plan() {
        let text = r#"```json
{"title": "祖母の庭", "logline": "四季の記録", "outline": "- 春\n- 夏", "photoThemes": ["花", null, "縁側"]}
```"#;
        let plan = parse_plan(text).unwrap();
        assert_eq!(plan.title, "祖母の庭");
        assert_eq!(plan.outline, vec!["春".to_string(), "夏".to_string()]);
        assert_eq!(plan.photo_themes, vec!["花".to_string(), "縁側".to_string()]);
    }

    #[test]
    fn test_parse_plan_error() {
        assert!(parse_plan("構成案です").is_err());
        assert!(parse_plan(r#"{"logline": "only"}"#).is_err());
    }

    #[test]
    fn test_normalize_image_bindings() {
        let mut slides = vec![
            Slide {
                image_id: Some("a".to_string()),
                ..Default::default()
            },
            Slide {
                image_id: Some("ghost".to_string()),
                ..Default::default()
            },
        ];
        let fixed = normalize_image_bindings(&mut slides, &["a", "b"]);
        assert_eq!(fixed, 1);
        assert_eq!(slides[0].image_id.as_deref(), Some("a"));
        assert_eq!(slides[1].image_id, None);
        assert!(slides[1].needs_image);
    }
}
