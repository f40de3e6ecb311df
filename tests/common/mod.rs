//! テスト用の生成AIバックエンド
//!
//! キーごとに応答の台本を持ち、呼び出しを記録する。

#![allow(dead_code)]

use async_trait::async_trait;
use photo_story::keys::{CooldownPolicy, KeyPool};
use photo_story::remote::{CallFailure, GenerateRequest, GenerationKind, GenerativeBackend, RawOutput};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const ENDPOINT: &str = "https://mock.test/v1beta";

pub type MockReply = Result<RawOutput, CallFailure>;

/// 記録された1回の呼び出し
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub key: String,
    pub kind: GenerationKind,
    pub model: String,
    pub prompt: String,
    pub media_count: usize,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, VecDeque<MockReply>>,
    fallback: HashMap<String, MockReply>,
    calls: Vec<RecordedCall>,
}

/// 複製しても状態を共有する（ディスパッチャに渡した後も検査できる）
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 指定キーの応答を順番に積む
    pub fn script(&self, key: &str, replies: Vec<MockReply>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(key.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// 台本が尽きた後の応答
    pub fn always(&self, key: &str, reply: MockReply) -> &Self {
        self.state
            .lock()
            .unwrap()
            .fallback
            .insert(key.to_string(), reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn keys_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.key).collect()
    }
}

#[async_trait]
impl GenerativeBackend for MockBackend {
    fn endpoint(&self) -> &str {
        ENDPOINT
    }

    async fn generate(&self, api_key: &str, request: &GenerateRequest) -> Result<RawOutput, CallFailure> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(RecordedCall {
            key: api_key.to_string(),
            kind: request.kind,
            model: request.model.clone(),
            prompt: request.prompt.clone(),
            media_count: request.media.len(),
        });

        if let Some(reply) = state.scripts.get_mut(api_key).and_then(VecDeque::pop_front) {
            return reply;
        }
        state
            .fallback
            .get(api_key)
            .cloned()
            .unwrap_or_else(|| Err(CallFailure::Malformed("台本がありません".to_string())))
    }
}

pub fn text(body: &str) -> MockReply {
    Ok(RawOutput::Text(body.to_string()))
}

pub fn http(status: u16, code: &str, message: &str) -> MockReply {
    Err(CallFailure::Http {
        status,
        code: Some(code.to_string()),
        message: message.to_string(),
    })
}

pub fn not_found() -> MockReply {
    http(404, "NOT_FOUND", "models/gemini-typo is not found for API version v1beta")
}

pub fn quota() -> MockReply {
    http(429, "RESOURCE_EXHAUSTED", "Resource has been exhausted (e.g. check quota).")
}

pub fn server_error() -> MockReply {
    http(503, "UNAVAILABLE", "The model is overloaded.")
}

pub fn network_error() -> MockReply {
    Err(CallFailure::Transport("connection reset by peer".to_string()))
}

pub fn pool(keys: &[&str]) -> KeyPool {
    KeyPool::from_values(keys.iter().copied(), None, CooldownPolicy::default())
}
