//! Tests for streaming a run as flat events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};

use runnable_core::error::Error;
use runnable_core::language_models::ParrotFakeChatModel;
use runnable_core::runnables::{
    Runnable, RunnableConfig, RunnableLambda, RunnableLike, RunnableSequence, to_dyn,
};
use runnable_core::tracers::{LogStreamConfig, RunType, StreamEvent, stream_events};

fn echo_chain() -> RunnableSequence {
    RunnableLambda::new(|x: Value| Ok(json!(format!("{} there", x.as_str().unwrap_or_default()))))
        .pipe(ParrotFakeChatModel::new())
}

async fn collect_events<R>(runnable: &R, input: R::Input, filter: LogStreamConfig) -> Vec<StreamEvent>
where
    R: Runnable,
{
    stream_events(runnable, input, None, filter)
        .map(|event| event.unwrap())
        .collect()
        .await
}

fn event_names(events: &[StreamEvent]) -> Vec<&str> {
    events.iter().map(|event| event.event.as_str()).collect()
}

// ============================================================================
// Event sequence
// ============================================================================

#[tokio::test]
async fn test_root_events_frame_the_stream() {
    let events = collect_events(&echo_chain(), json!("hi"), LogStreamConfig::default()).await;

    let first = events.first().unwrap();
    assert_eq!(first.event, "on_chain_start");
    assert_eq!(first.name, "RunnableSequence");
    assert_eq!(first.data.input, Some(json!("hi")));
    assert!(first.parent_ids.is_empty());

    let last = events.last().unwrap();
    assert_eq!(last.event, "on_chain_end");
    assert_eq!(last.run_id, first.run_id);
    assert_eq!(last.data.input, None);
    assert_eq!(last.data.output.as_ref().unwrap()["content"], json!("Human: hi there"));
}

#[tokio::test]
async fn test_nested_runs_carry_parent_ids() {
    let events = collect_events(&echo_chain(), json!("hi"), LogStreamConfig::default()).await;
    let root = events[0].run_id;

    let model_start = events
        .iter()
        .find(|event| event.event == "on_chat_model_start")
        .unwrap();
    assert_eq!(model_start.name, "ParrotFakeChatModel");
    assert_eq!(model_start.parent_ids, vec![root]);
    assert_eq!(model_start.tags, vec!["seq:step:2"]);

    let model_chunks = events
        .iter()
        .filter(|event| event.event == "on_chat_model_stream")
        .count();
    assert!(model_chunks > 0);
    assert!(
        events
            .iter()
            .filter(|event| event.event == "on_chat_model_stream")
            .all(|event| event.data.chunk.is_some() && event.run_id == model_start.run_id)
    );

    let model_end = events
        .iter()
        .find(|event| event.event == "on_chat_model_end")
        .unwrap();
    assert_eq!(model_end.data.input, Some(json!("hi there")));
}

#[tokio::test]
async fn test_every_start_has_one_end() {
    let events = collect_events(&echo_chain(), json!("hi"), LogStreamConfig::default()).await;

    for start in events.iter().filter(|event| event.event.ends_with("_start")) {
        let ends = events
            .iter()
            .filter(|event| event.run_id == start.run_id && event.event.ends_with("_end"))
            .count();
        assert_eq!(ends, 1, "run {} should end exactly once", start.name);
    }
}

#[tokio::test]
async fn test_events_arrive_while_run_is_in_flight() {
    let slow_done = Arc::new(AtomicBool::new(false));
    let done = slow_done.clone();
    let slow = RunnableLambda::new_async(move |x: Value| {
        let done = done.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            done.store(true, Ordering::SeqCst);
            Ok(x)
        }
    })
    .with_name("slow_step");
    let sequence = RunnableSequence::new(vec![
        to_dyn(RunnableLambda::new(|x: Value| Ok(x))),
        to_dyn(slow),
    ])
    .unwrap();

    let mut events = stream_events(&sequence, json!(1), None, LogStreamConfig::default());

    let first = events.next().await.unwrap().unwrap();
    assert_eq!(first.event, "on_chain_start");
    loop {
        let event = events.next().await.unwrap().unwrap();
        if event.name == "slow_step" {
            assert_eq!(event.event, "on_chain_start");
            break;
        }
    }
    assert!(!slow_done.load(Ordering::SeqCst));

    let rest: Vec<_> = events.collect().await;
    assert!(slow_done.load(Ordering::SeqCst));
    assert!(rest.iter().all(Result::is_ok));
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_include_types_filter() {
    let events = collect_events(
        &echo_chain(),
        json!("hi"),
        LogStreamConfig {
            include_types: Some(vec![RunType::ChatModel]),
            ..Default::default()
        },
    )
    .await;

    assert!(!events.is_empty());
    assert!(events.iter().all(|event| event.event.starts_with("on_chat_model_")));
}

#[tokio::test]
async fn test_exclude_names_filter_drops_root() {
    let events = collect_events(
        &echo_chain(),
        json!("hi"),
        LogStreamConfig {
            exclude_names: Some(vec!["RunnableSequence".into()]),
            ..Default::default()
        },
    )
    .await;

    assert!(events.iter().all(|event| event.name != "RunnableSequence"));
    assert_eq!(event_names(&events).first(), Some(&"on_chain_start"));
    assert_eq!(events[0].name, "RunnableLambda");
}

#[tokio::test]
async fn test_config_tags_reach_every_event() {
    let sequence = echo_chain();
    let events: Vec<StreamEvent> = stream_events(
        &sequence,
        json!("hi"),
        Some(RunnableConfig::new().with_tags(vec!["outer".into()])),
        LogStreamConfig::default(),
    )
    .map(|event| event.unwrap())
    .collect()
    .await;

    assert!(events.iter().all(|event| event.tags.contains(&"outer".to_string())));
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_error_is_yielded_after_events() {
    let sequence = RunnableSequence::new(vec![
        to_dyn(RunnableLambda::new(|x: Value| Ok(x)).with_name("ok")),
        to_dyn(
            RunnableLambda::new(|_: Value| -> runnable_core::Result<Value> {
                Err(Error::other("exploded"))
            })
            .with_name("bad"),
        ),
    ])
    .unwrap();

    let items: Vec<_> = stream_events(&sequence, json!(1), None, LogStreamConfig::default())
        .collect()
        .await;

    let (last, events) = items.split_last().unwrap();
    assert_eq!(last.as_ref().unwrap_err().to_string(), "exploded");
    let events: Vec<&StreamEvent> = events.iter().map(|event| event.as_ref().unwrap()).collect();

    let bad_end = events
        .iter()
        .find(|event| event.name == "bad" && event.event == "on_chain_end")
        .unwrap();
    assert_eq!(bad_end.data.error.as_deref(), Some("exploded"));
    assert_eq!(bad_end.data.output, None);

    let root_end = events.last().unwrap();
    assert_eq!(root_end.name, "RunnableSequence");
    assert_eq!(root_end.data.error.as_deref(), Some("exploded"));
}
