//! Photo Story Common Library
//!
//! CLIと将来のWeb(WASM)フロントエンドで共有される型・プロンプト・パーサー。
//! ネットワークやファイルIOには依存しない。

pub mod types;
pub mod error;
pub mod parser;
pub mod prompts;

pub use types::{
    GeoLocation, ImageSource, NarrativePlan, Slide, SlideSuggestions, Storyboard, UploadedImage,
};
pub use error::{Error, Result};
pub use parser::{
    extract_json, normalize_image_bindings, parse_analysis_step, parse_plan, parse_slides,
    AnalysisStepResult, DEFAULT_SCRIPT, DEFAULT_TITLE,
};
pub use prompts::{
    build_analysis_prompt, build_edit_prompt, build_illustration_prompt, build_plan_prompt,
    build_probe_prompt, build_synthesis_prompt, build_video_prompt, AnalysisPromptInput,
};
