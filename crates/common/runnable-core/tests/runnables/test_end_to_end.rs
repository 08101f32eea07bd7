//! End-to-end tests composing the combinators with the fake chat models.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{Value, json};

use runnable_core::callbacks::BaseCallbackHandler;
use runnable_core::language_models::{FakeListChatModel, ParrotFakeChatModel};
use runnable_core::output_parsers::StrOutputParser;
use runnable_core::runnables::{
    Runnable, RunnableConfig, RunnableLike, RunnablePassthrough, RunnableSequence,
};
use runnable_core::tracers::RunCollectorCallbackHandler;
use runnable_core::utils::concat_all;

const EXPECTED: &str = "Human: context: SOME STUFF, question: Just passing through.";

fn render_prompt(input: Value) -> runnable_core::Result<Value> {
    let context = input["context"].as_str().unwrap_or_default();
    let question = input["question"].as_str().unwrap_or_default();
    Ok(json!(format!("context: {context}, question: {question}")))
}

fn question_answering_chain() -> RunnableSequence {
    RunnableSequence::from_like([
        RunnableLike::func(|question: Value| Ok(json!({"context": "SOME STUFF", "question": question}))),
        RunnableLike::func(render_prompt),
        RunnableLike::runnable(ParrotFakeChatModel::new()),
        RunnableLike::runnable(StrOutputParser::new()),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_chain_invoke_renders_exact_answer() {
    let output = question_answering_chain()
        .invoke(json!("Just passing through."), None)
        .await
        .unwrap();
    assert_eq!(output, json!(EXPECTED));
}

#[tokio::test]
async fn test_chain_stream_folds_to_same_answer() {
    let chunks: Vec<Value> = question_answering_chain()
        .stream(json!("Just passing through."), None)
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    assert!(chunks.iter().all(Value::is_string));
    assert_eq!(concat_all(&chunks).unwrap().unwrap(), json!(EXPECTED));
}

#[tokio::test]
async fn test_chain_ending_in_model_streams_tokens() {
    let chain = RunnableSequence::from_like([
        RunnableLike::func(|question: Value| Ok(json!({"context": "SOME STUFF", "question": question}))),
        RunnableLike::func(render_prompt),
        RunnableLike::runnable(ParrotFakeChatModel::new()),
    ])
    .unwrap();

    let chunks: Vec<Value> = chain
        .stream(json!("Just passing through."), None)
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    assert!(chunks.len() > 1);
    let merged = concat_all(&chunks).unwrap().unwrap();
    assert_eq!(merged["content"], json!(EXPECTED));
}

#[tokio::test]
async fn test_chain_with_parallel_passthrough() {
    let chain = RunnableSequence::from_like([
        RunnableLike::map([
            ("context", RunnableLike::func(|_: Value| Ok(json!("SOME STUFF")))),
            ("question", RunnableLike::runnable(RunnablePassthrough::<Value>::new())),
        ]),
        RunnableLike::func(render_prompt),
        RunnableLike::runnable(ParrotFakeChatModel::new()),
        RunnableLike::runnable(StrOutputParser::new()),
    ])
    .unwrap();

    assert_eq!(
        chain.invoke(json!("Just passing through."), None).await.unwrap(),
        json!(EXPECTED)
    );
}

#[tokio::test]
async fn test_chain_batch_keeps_order() {
    let chain = question_answering_chain();
    let outputs = chain
        .batch(vec![json!("one"), json!("two"), json!("three")], None)
        .await
        .unwrap();

    assert_eq!(
        outputs,
        vec![
            json!("Human: context: SOME STUFF, question: one"),
            json!("Human: context: SOME STUFF, question: two"),
            json!("Human: context: SOME STUFF, question: three"),
        ]
    );
}

#[tokio::test]
async fn test_chain_run_tree() {
    let collector = Arc::new(RunCollectorCallbackHandler::new());
    let handler: Arc<dyn BaseCallbackHandler> = collector.clone();

    question_answering_chain()
        .invoke(
            json!("Just passing through."),
            Some(RunnableConfig::new().with_callbacks(vec![handler])),
        )
        .await
        .unwrap();

    let runs = collector.traced_runs();
    assert_eq!(runs.len(), 1);
    let root = &runs[0];
    assert_eq!(root.name, "RunnableSequence");
    assert_eq!(root.outputs, Some(json!(EXPECTED)));

    let names: Vec<&str> = root.child_runs.iter().map(|run| run.name.as_str()).collect();
    assert_eq!(names.len(), 4);
    assert_eq!(names[2], "ParrotFakeChatModel");
    assert_eq!(names[3], "StrOutputParser");
}

#[tokio::test]
async fn test_model_responses_flow_through_parser() {
    let chain = RunnableSequence::from_like([
        RunnableLike::runnable(FakeListChatModel::new(vec!["first".into(), "second".into()])),
        RunnableLike::runnable(StrOutputParser::new()),
    ])
    .unwrap();

    assert_eq!(chain.invoke(json!("q"), None).await.unwrap(), json!("first"));
    assert_eq!(chain.invoke(json!("q"), None).await.unwrap(), json!("second"));
    assert_eq!(chain.invoke(json!("q"), None).await.unwrap(), json!("first"));
}
