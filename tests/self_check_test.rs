//! 事前の疎通確認のテスト

mod common;

use chrono::{Duration, Utc};
use common::*;
use photo_story::dispatch::{CallDispatcher, SelfCheck};
use photo_story::error::PhotoStoryError;
use photo_story::keys::{ApiKey, CooldownPolicy, KeyPool, KeyStatus};
use photo_story::remote::GenerateRequest;

const K1: &str = "AIza-key-one-1111";
const K2: &str = "AIza-key-two-2222";

#[tokio::test]
async fn test_config_error_halts_before_workflow() {
    let backend = MockBackend::new();
    backend.always(K1, not_found()).always(K2, not_found());

    let mut dispatcher = CallDispatcher::new(backend.clone(), pool(&[K1, K2]));
    let err = dispatcher.self_check("gemini-typo").await.unwrap_err();

    assert!(err.is_config_error());
    assert!(err.to_string().contains("gemini-typo"));
    // 確認は1本のキーだけ
    assert_eq!(backend.keys_called(), vec![K1]);
    assert_eq!(dispatcher.pool().get(K1).unwrap().status(), KeyStatus::ConfigError);
    assert_eq!(dispatcher.pool().get(K2).unwrap().status(), KeyStatus::Active);
}

#[tokio::test]
async fn test_quota_failure_is_swallowed() {
    let backend = MockBackend::new();
    backend.always(K1, quota()).always(K2, text("OK"));

    let mut dispatcher = CallDispatcher::new(backend.clone(), pool(&[K1, K2]));
    let result = dispatcher.self_check("gemini-test").await.unwrap();

    assert!(matches!(result, SelfCheck::Inconclusive(ref m) if m.contains("429")));
    assert_eq!(dispatcher.pool().get(K1).unwrap().status(), KeyStatus::Active);

    // 本番の呼び出しでは通常どおりローテーションする
    let dispatched = dispatcher
        .dispatch(&GenerateRequest::text("gemini-test", "p"))
        .await
        .unwrap();
    assert_eq!(dispatched.served_by, "…2222");
}

#[tokio::test]
async fn test_passed_reports_masked_key() {
    let backend = MockBackend::new();
    backend.always(K1, text("OK"));

    let mut dispatcher = CallDispatcher::new(backend.clone(), pool(&[K1]));
    let result = dispatcher.self_check("gemini-test").await.unwrap();

    assert_eq!(
        result,
        SelfCheck::Passed {
            served_by: "…1111".to_string()
        }
    );
    assert!(backend.calls()[0].prompt.contains("OK"));
}

#[tokio::test]
async fn test_skipped_when_every_key_is_cooling() {
    let backend = MockBackend::new();
    let mut pool = KeyPool::new(CooldownPolicy::default());
    pool.initialize(vec![ApiKey::new(K1).with_state(KeyStatus::Exhausted, Some(Utc::now() + Duration::hours(3)))]);

    let mut dispatcher = CallDispatcher::new(backend.clone(), pool);
    assert_eq!(dispatcher.self_check("gemini-test").await.unwrap(), SelfCheck::Skipped);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_no_keys() {
    let mut dispatcher = CallDispatcher::new(MockBackend::new(), pool(&[]));
    assert!(matches!(
        dispatcher.self_check("gemini-test").await,
        Err(PhotoStoryError::NoApiKeys)
    ));
}
