//! Tests for RunnableWithFallbacks.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};

use runnable_core::error::Error;
use runnable_core::language_models::{FakeListChatModel, ParrotFakeChatModel};
use runnable_core::runnables::{
    DynRunnable, Runnable, RunnableLambda, RunnableWithFallbacks, to_dyn,
};
use runnable_core::utils::concat_all;

fn failing(message: &'static str) -> DynRunnable<Value, Value> {
    to_dyn(RunnableLambda::new(move |_: Value| -> runnable_core::Result<Value> {
        Err(Error::other(message))
    }))
}

#[tokio::test]
async fn test_invoke_uses_first_successful_fallback() {
    let with_fallbacks = RunnableWithFallbacks::from_dyn()
        .runnable(failing("primary down"))
        .fallbacks(vec![
            failing("secondary down"),
            to_dyn(FakeListChatModel::new(vec!["from fallback".into()])),
            to_dyn(ParrotFakeChatModel::new()),
        ])
        .call();

    let output = with_fallbacks.invoke(json!("hi"), None).await.unwrap();
    assert_eq!(output["content"], json!("from fallback"));
}

#[tokio::test]
async fn test_stream_falls_back_when_first_chunk_fails() {
    let with_fallbacks = FakeListChatModel::new(vec!["never".into()])
        .with_error_on_chunk(0)
        .with_fallbacks(vec![to_dyn(ParrotFakeChatModel::new())]);

    let chunks: Vec<Value> = with_fallbacks
        .stream(json!("a b"), None)
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    let merged = concat_all(&chunks).unwrap().unwrap();
    assert_eq!(merged["content"], json!("Human: a b"));
}

#[tokio::test]
async fn test_stream_does_not_fall_back_after_output_started() {
    let with_fallbacks = FakeListChatModel::new(vec!["abc".into()])
        .with_error_on_chunk(2)
        .with_fallbacks(vec![to_dyn(ParrotFakeChatModel::new())]);

    let chunks: Vec<_> = with_fallbacks.stream(json!("x"), None).collect().await;

    assert_eq!(chunks.len(), 3);
    assert!(chunks[0].is_ok() && chunks[1].is_ok());
    assert_eq!(
        chunks[2].as_ref().unwrap_err().to_string(),
        "FakeListChatModelError"
    );
}

#[tokio::test]
async fn test_stream_all_fail_yields_first_error() {
    let with_fallbacks = RunnableWithFallbacks::from_dyn()
        .runnable(failing("first"))
        .fallbacks(vec![failing("second")])
        .call();

    let chunks: Vec<_> = with_fallbacks.stream(Value::Null, None).collect().await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].as_ref().unwrap_err().to_string(), "first");
}

#[tokio::test]
async fn test_error_predicate_limits_fallbacks() {
    let with_fallbacks = RunnableWithFallbacks::from_dyn()
        .runnable(to_dyn(RunnableLambda::new(
            |_: Value| -> runnable_core::Result<Value> { Err(Error::invalid_input("bad input")) },
        )))
        .fallbacks(vec![to_dyn(RunnableLambda::new(|_: Value| Ok(json!("backup"))))])
        .error_predicate(Arc::new(|error: &Error| !matches!(error, Error::InvalidInput(_))))
        .call();

    let err = with_fallbacks.invoke(Value::Null, None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_exception_key_passes_previous_error() {
    let with_fallbacks = RunnableWithFallbacks::from_dyn()
        .runnable(failing("first failure"))
        .fallbacks(vec![to_dyn(RunnableLambda::new(|x: Value| {
            Ok(x["error"].clone())
        }))])
        .call()
        .with_exception_key("error");

    let output = with_fallbacks
        .invoke(json!({"question": "q"}), None)
        .await
        .unwrap();
    assert_eq!(output, json!("first failure"));
}
