//! Tests for config patching, merging and propagation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use uuid::Uuid;

use runnable_core::callbacks::{BaseCallbackHandler, CallbackManager};
use runnable_core::runnables::{
    Runnable, RunnableConfig, RunnableLambda, RunnableParallel, RunnableSequence, merge_configs,
    patch_config, to_dyn,
};
use runnable_core::tracers::RunCollectorCallbackHandler;

fn collector_config(collector: &Arc<RunCollectorCallbackHandler>) -> RunnableConfig {
    let handler: Arc<dyn BaseCallbackHandler> = collector.clone();
    RunnableConfig::new().with_callbacks(vec![handler])
}

// ============================================================================
// patch_config
// ============================================================================

#[test]
fn test_patch_config_never_shares_collections_with_parent() {
    let parent = RunnableConfig::new()
        .with_tags(vec!["parent".into()])
        .with_metadata(HashMap::from([("k".to_string(), json!(1))]));

    let mut child = patch_config()
        .config(parent.clone())
        .tags(vec!["child".into()])
        .call();
    child.tags.push("mutated".into());
    child.metadata.insert("extra".into(), json!(true));

    assert_eq!(parent.tags, vec!["parent"]);
    assert_eq!(parent.metadata.len(), 1);
    assert_eq!(child.tags, vec!["parent", "child", "mutated"]);
}

#[test]
fn test_patch_config_appends_tags_with_duplicates() {
    let parent = RunnableConfig::new().with_tags(vec!["a".into()]);
    let child = patch_config()
        .config(parent)
        .tags(vec!["a".into(), "b".into()])
        .call();
    assert_eq!(child.tags, vec!["a", "a", "b"]);
}

#[test]
fn test_patch_config_metadata_override_wins() {
    let parent = RunnableConfig::new().with_metadata(HashMap::from([
        ("shared".to_string(), json!("parent")),
        ("kept".to_string(), json!(1)),
    ]));
    let child = patch_config()
        .config(parent)
        .metadata(HashMap::from([("shared".to_string(), json!("child"))]))
        .call();

    assert_eq!(child.metadata["shared"], json!("child"));
    assert_eq!(child.metadata["kept"], json!(1));
}

#[test]
fn test_patch_config_replacing_callbacks_clears_run_identity() {
    let parent = RunnableConfig::new()
        .with_run_name("parent-run")
        .with_run_id(Uuid::new_v4());
    let child = patch_config()
        .config(parent)
        .callbacks(CallbackManager::new())
        .call();

    assert!(child.run_name.is_none());
    assert!(child.run_id.is_none());
}

#[test]
fn test_patch_config_keeps_recursion_limit_unless_set() {
    let parent = RunnableConfig::new().with_recursion_limit(7);
    assert_eq!(patch_config().config(parent.clone()).call().recursion_limit, 7);
    assert_eq!(
        patch_config()
            .config(parent)
            .recursion_limit(3)
            .call()
            .recursion_limit,
        3
    );
}

// ============================================================================
// merge_configs
// ============================================================================

#[test]
fn test_merge_configs_later_values_win() {
    let merged = merge_configs(vec![
        Some(
            RunnableConfig::new()
                .with_tags(vec!["a".into(), "b".into()])
                .with_run_name("first")
                .with_max_concurrency(2),
        ),
        None,
        Some(
            RunnableConfig::new()
                .with_tags(vec!["b".into(), "c".into()])
                .with_run_name("second"),
        ),
    ]);

    assert_eq!(merged.tags, vec!["a", "b", "c"]);
    assert_eq!(merged.run_name.as_deref(), Some("second"));
    assert_eq!(merged.max_concurrency, Some(2));
}

#[test]
fn test_merge_configs_non_default_recursion_limit_wins() {
    let merged = merge_configs(vec![
        Some(RunnableConfig::new().with_recursion_limit(5)),
        Some(RunnableConfig::new()),
    ]);
    assert_eq!(merged.recursion_limit, 5);
}

// ============================================================================
// Propagation through the run tree
// ============================================================================

#[tokio::test]
async fn test_sibling_runs_do_not_see_each_other_tags() {
    let collector = Arc::new(RunCollectorCallbackHandler::new());
    let map = RunnableParallel::new()
        .add("a", RunnableLambda::new(|x: Value| Ok(x)).with_name("left"))
        .add("b", RunnableLambda::new(|x: Value| Ok(x)).with_name("right"));

    map.invoke(
        json!("x"),
        Some(collector_config(&collector).with_tags(vec!["root".into()])),
    )
    .await
    .unwrap();

    let left = &collector.runs_by_name("left")[0];
    let right = &collector.runs_by_name("right")[0];
    assert!(left.tags.contains(&"map:key:a".to_string()));
    assert!(!left.tags.contains(&"map:key:b".to_string()));
    assert!(right.tags.contains(&"map:key:b".to_string()));
    assert!(!right.tags.contains(&"map:key:a".to_string()));
    assert!(left.tags.contains(&"root".to_string()));
    assert!(right.tags.contains(&"root".to_string()));
}

#[tokio::test]
async fn test_step_tags_are_not_inherited_by_grandchildren() {
    let collector = Arc::new(RunCollectorCallbackHandler::new());
    let inner = RunnableSequence::new(vec![
        to_dyn(RunnableLambda::new(|x: Value| Ok(x)).with_name("leaf")),
        to_dyn(RunnableLambda::new(|x: Value| Ok(x))),
    ])
    .unwrap()
    .with_name("inner");
    let outer = RunnableSequence::new(vec![
        to_dyn(RunnableLambda::new(|x: Value| Ok(x))),
        to_dyn(inner),
    ])
    .unwrap();

    outer
        .invoke(json!(1), Some(collector_config(&collector)))
        .await
        .unwrap();

    let inner_run = &collector.runs_by_name("inner")[0];
    let leaf_run = &collector.runs_by_name("leaf")[0];
    assert!(inner_run.tags.contains(&"seq:step:2".to_string()));
    assert_eq!(leaf_run.tags, vec!["seq:step:1"]);
}

#[tokio::test]
async fn test_metadata_reaches_every_run() {
    let collector = Arc::new(RunCollectorCallbackHandler::new());
    let sequence = RunnableSequence::new(vec![
        to_dyn(RunnableLambda::new(|x: Value| Ok(x))),
        to_dyn(RunnableLambda::new(|x: Value| Ok(x))),
    ])
    .unwrap();

    sequence
        .invoke(
            json!(1),
            Some(
                collector_config(&collector)
                    .with_metadata(HashMap::from([("session".to_string(), json!("s-1"))])),
            ),
        )
        .await
        .unwrap();

    let runs = collector.runs();
    assert_eq!(runs.len(), 3);
    assert!(runs.iter().all(|run| run.metadata["session"] == json!("s-1")));
}

#[tokio::test]
async fn test_lambda_receives_config_for_nested_calls() {
    let collector = Arc::new(RunCollectorCallbackHandler::new());
    let inner = Arc::new(RunnableLambda::new(|x: i32| Ok(x + 1)).with_name("inner"));
    let outer = RunnableLambda::new_async_with_config(move |x: i32, config: RunnableConfig| {
        let inner = inner.clone();
        async move { inner.invoke(x, Some(config)).await }
    })
    .with_name("outer");

    let output = outer
        .invoke(1, Some(collector_config(&collector)))
        .await
        .unwrap();

    assert_eq!(output, 2);
    let runs = collector.traced_runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].name, "outer");
    assert_eq!(runs[0].child_runs.len(), 1);
    assert_eq!(runs[0].child_runs[0].name, "inner");
}
