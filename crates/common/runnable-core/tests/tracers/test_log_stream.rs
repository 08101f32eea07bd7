//! Tests for streaming a run as run-log patches.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};

use runnable_core::error::Error;
use runnable_core::language_models::ParrotFakeChatModel;
use runnable_core::runnables::{
    Runnable, RunnableConfig, RunnableLambda, RunnableParallel, RunnableSequence, to_dyn,
};
use runnable_core::tracers::{LogStreamConfig, RunLog, RunLogPatch, RunType, stream_log};
use runnable_core::utils::concat_all;

fn echo_chain() -> RunnableSequence {
    RunnableLambda::new(|x: Value| Ok(json!(format!("{} there", x.as_str().unwrap_or_default()))))
        .pipe(ParrotFakeChatModel::new())
}

async fn collect_patches<R>(runnable: &R, input: R::Input, log_config: LogStreamConfig) -> Vec<RunLogPatch>
where
    R: Runnable,
{
    stream_log(runnable, input, None, log_config)
        .map(|patch| patch.unwrap())
        .collect()
        .await
}

// ============================================================================
// Patch sequence
// ============================================================================

#[tokio::test]
async fn test_first_patch_replaces_whole_state() {
    let patches = collect_patches(&echo_chain(), json!("hi"), LogStreamConfig::default()).await;

    let first = &patches[0].ops[0];
    assert_eq!(first.op, "replace");
    assert_eq!(first.path, "");
    let state = first.value.as_ref().unwrap();
    assert_eq!(state["name"], json!("RunnableSequence"));
    assert_eq!(state["streamed_output"], json!([]));
    assert_eq!(state["final_output"], Value::Null);
    assert_eq!(state["logs"], json!({}));
}

#[tokio::test]
async fn test_folded_state_matches_invoke() {
    let chain = echo_chain();
    let patches = collect_patches(&chain, json!("hi"), LogStreamConfig::default()).await;
    let state = RunLog::from_patches(&patches).unwrap().run_state().unwrap();

    let invoked = chain.invoke(json!("hi"), None).await.unwrap();
    let streamed = concat_all(&state.streamed_output).unwrap().unwrap();
    assert_eq!(streamed["content"], invoked["content"]);
    assert_eq!(
        state.final_output.as_ref().unwrap()["content"],
        json!("Human: hi there")
    );

    let keys: Vec<&str> = state.logs.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["RunnableLambda", "ParrotFakeChatModel"]);
    let model = &state.logs["ParrotFakeChatModel"];
    assert_eq!(model.run_type, "chat_model");
    assert_eq!(model.tags, vec!["seq:step:2"]);
    assert!(model.end_time.is_some());
    assert_eq!(model.streamed_output.len(), state.streamed_output.len());
}

#[tokio::test]
async fn test_repeated_names_get_numbered_keys() {
    let sequence = RunnableSequence::new(vec![
        to_dyn(RunnableLambda::new(|x: Value| Ok(x))),
        to_dyn(RunnableLambda::new(|x: Value| Ok(x))),
        to_dyn(RunnableLambda::new(|x: Value| Ok(x))),
    ])
    .unwrap();

    let patches = collect_patches(&sequence, json!(1), LogStreamConfig::default()).await;
    let state = RunLog::from_patches(&patches).unwrap().run_state().unwrap();

    let keys: Vec<&str> = state.logs.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["RunnableLambda", "RunnableLambda:2", "RunnableLambda:3"]);
    assert!(
        state
            .logs
            .values()
            .all(|entry| entry.final_output == Some(json!(1)))
    );
}

#[tokio::test]
async fn test_names_with_slashes_are_escaped_in_paths() {
    let map = RunnableParallel::new().add("x", RunnableLambda::new(|x: Value| Ok(x)).with_name("a/b~c"));

    let patches = collect_patches(&map, json!(1), LogStreamConfig::default()).await;
    assert!(
        patches
            .iter()
            .flat_map(|patch| &patch.ops)
            .any(|op| op.path == "/logs/a~1b~0c")
    );
    let state = RunLog::from_patches(&patches).unwrap().run_state().unwrap();
    assert!(state.logs.contains_key("a/b~c"));
}

#[tokio::test]
async fn test_patches_arrive_while_run_is_in_flight() {
    let slow_done = Arc::new(AtomicBool::new(false));
    let done = slow_done.clone();
    let fast = RunnableLambda::new(|x: Value| Ok(x)).with_name("fast_step");
    let slow = RunnableLambda::new_async(move |x: Value| {
        let done = done.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            done.store(true, Ordering::SeqCst);
            Ok(x)
        }
    })
    .with_name("slow_step");
    let sequence = RunnableSequence::new(vec![to_dyn(fast), to_dyn(slow)]).unwrap();

    let mut patches = stream_log(&sequence, json!(1), None, LogStreamConfig::default());

    let first = patches.next().await.unwrap().unwrap();
    assert_eq!(first.ops[0].op, "replace");
    assert!(!slow_done.load(Ordering::SeqCst));

    let mut seen = vec![first];
    while let Some(patch) = patches.next().await {
        let patch = patch.unwrap();
        let slow_started = patch.ops.iter().any(|op| op.path == "/logs/slow_step");
        seen.push(patch);
        if slow_started {
            break;
        }
    }
    assert!(!slow_done.load(Ordering::SeqCst));
    assert!(
        seen.iter()
            .flat_map(|patch| &patch.ops)
            .any(|op| op.path == "/logs/fast_step/final_output")
    );

    while let Some(patch) = patches.next().await {
        seen.push(patch.unwrap());
    }
    assert!(slow_done.load(Ordering::SeqCst));
    let state = RunLog::from_patches(&seen).unwrap().run_state().unwrap();
    assert_eq!(state.final_output, Some(json!(1)));
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_include_types_filter() {
    let patches = collect_patches(
        &echo_chain(),
        json!("hi"),
        LogStreamConfig {
            include_types: Some(vec![RunType::ChatModel]),
            ..Default::default()
        },
    )
    .await;
    let state = RunLog::from_patches(&patches).unwrap().run_state().unwrap();

    assert_eq!(state.logs.keys().collect::<Vec<_>>(), vec!["ParrotFakeChatModel"]);
}

#[tokio::test]
async fn test_exclude_tags_filter() {
    let patches = collect_patches(
        &echo_chain(),
        json!("hi"),
        LogStreamConfig {
            exclude_tags: Some(vec!["seq:step:2".into()]),
            ..Default::default()
        },
    )
    .await;
    let state = RunLog::from_patches(&patches).unwrap().run_state().unwrap();

    assert_eq!(state.logs.keys().collect::<Vec<_>>(), vec!["RunnableLambda"]);
    assert!(!state.streamed_output.is_empty());
}

#[tokio::test]
async fn test_include_names_with_config_tags() {
    let sequence = echo_chain();
    let patches: Vec<RunLogPatch> = stream_log(
        &sequence,
        json!("hi"),
        Some(RunnableConfig::new().with_tags(vec!["outer".into()])),
        LogStreamConfig {
            include_names: Some(vec!["RunnableLambda".into()]),
            ..Default::default()
        },
    )
    .map(|patch| patch.unwrap())
    .collect()
    .await;
    let state = RunLog::from_patches(&patches).unwrap().run_state().unwrap();

    let entry = &state.logs["RunnableLambda"];
    assert_eq!(state.logs.len(), 1);
    assert!(entry.tags.contains(&"outer".to_string()));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_error_is_yielded_after_patches() {
    let sequence = RunnableSequence::new(vec![
        to_dyn(RunnableLambda::new(|x: Value| Ok(x)).with_name("ok")),
        to_dyn(RunnableLambda::new(|_: Value| -> runnable_core::Result<Value> {
            Err(Error::other("exploded"))
        })),
    ])
    .unwrap();

    let items: Vec<_> = stream_log(&sequence, json!(1), None, LogStreamConfig::default())
        .collect()
        .await;

    let (last, patches) = items.split_last().unwrap();
    assert_eq!(last.as_ref().unwrap_err().to_string(), "exploded");
    assert!(patches.iter().all(Result::is_ok));

    let patches: Vec<RunLogPatch> = patches.iter().map(|p| p.as_ref().unwrap().clone()).collect();
    let state = RunLog::from_patches(&patches).unwrap().run_state().unwrap();
    assert_eq!(state.logs["ok"].final_output, Some(json!(1)));
    assert!(state.streamed_output.is_empty());
}
