//! Tests for RunnablePassthrough, RunnableAssign and RunnablePick.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};

use runnable_core::error::Error;
use runnable_core::language_models::ParrotFakeChatModel;
use runnable_core::runnables::{
    Runnable, RunnableAssign, RunnableLambda, RunnableLike, RunnableParallel, RunnablePassthrough,
    RunnablePick, RunnableSequence, to_dyn,
};
use runnable_core::utils::concat_all;

#[tokio::test]
async fn test_passthrough_in_parallel() {
    let map = RunnableParallel::new()
        .add("original", RunnablePassthrough::<Value>::new())
        .add("length", RunnableLambda::new(|x: Value| {
            Ok(json!(x.as_str().map(str::len).unwrap_or_default()))
        }));

    assert_eq!(
        map.invoke(json!("abcd"), None).await.unwrap(),
        json!({"original": "abcd", "length": 4})
    );
}

#[tokio::test]
async fn test_passthrough_side_effect_sees_input() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let passthrough = RunnablePassthrough::<Value>::with_func(move |input: &Value, _config| {
        recorder.lock().push(input.clone());
    });

    let output = passthrough.invoke(json!({"a": 1}), None).await.unwrap();
    assert_eq!(output, json!({"a": 1}));
    assert_eq!(*seen.lock(), vec![json!({"a": 1})]);
}

#[tokio::test]
async fn test_assign_merges_mapper_outputs() {
    let assign = RunnablePassthrough::<Value>::assign(RunnableParallel::new().add(
        "total",
        RunnableLambda::new(|x: Value| Ok(json!(x["a"].as_i64().unwrap() + x["b"].as_i64().unwrap()))),
    ));

    assert_eq!(
        assign.invoke(json!({"a": 1, "b": 2}), None).await.unwrap(),
        json!({"a": 1, "b": 2, "total": 3})
    );
    assert_eq!(assign.get_name(None, None), "RunnableAssign<total>");
}

#[tokio::test]
async fn test_assign_overwrites_existing_keys() {
    let assign = RunnableAssign::from_like([("a", RunnableLike::func(|_: Value| Ok(json!("new"))))]);
    assert_eq!(
        assign.invoke(json!({"a": "old", "b": 1}), None).await.unwrap(),
        json!({"a": "new", "b": 1})
    );
}

#[tokio::test]
async fn test_assign_rejects_non_object_input() {
    let assign = RunnableAssign::from_like([("a", RunnableLike::func(Ok))]);
    let err = assign.invoke(json!("text"), None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_assign_stream_yields_passthrough_keys_first() {
    let assign = RunnableAssign::from_like([(
        "reply",
        RunnableLike::runnable(
            RunnableLambda::new(|x: Value| Ok(x["question"].clone())).pipe(ParrotFakeChatModel::new()),
        ),
    )]);
    let input = json!({"question": "why not"});

    let chunks: Vec<Value> = assign
        .stream(input.clone(), None)
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    assert_eq!(chunks[0], json!({"question": "why not"}));
    assert!(chunks[1..].iter().all(|chunk| chunk.get("reply").is_some()));
    assert_eq!(
        concat_all(&chunks).unwrap().unwrap(),
        assign.invoke(input, None).await.unwrap()
    );
}

#[tokio::test]
async fn test_pick_single_and_multiple() {
    let input = json!({"a": 1, "b": 2, "c": 3});

    let single = RunnablePick::new_single("b");
    assert_eq!(single.invoke(input.clone(), None).await.unwrap(), json!(2));
    assert_eq!(single.invoke(json!({}), None).await.unwrap(), Value::Null);

    let multi = RunnablePick::new_multi(["a", "c", "missing"]);
    assert_eq!(
        multi.invoke(input, None).await.unwrap(),
        json!({"a": 1, "c": 3})
    );
    assert_eq!(multi.get_name(None, None), "RunnablePick<a,c,missing>");
}

#[tokio::test]
async fn test_assign_then_pick_in_sequence() {
    let sequence = RunnableSequence::new(vec![
        to_dyn(RunnableAssign::from_like([(
            "doubled",
            RunnableLike::func(|x: Value| Ok(json!(x["n"].as_i64().unwrap() * 2))),
        )])),
        to_dyn(RunnablePick::new_single("doubled")),
    ])
    .unwrap();

    assert_eq!(sequence.invoke(json!({"n": 21}), None).await.unwrap(), json!(42));
}
