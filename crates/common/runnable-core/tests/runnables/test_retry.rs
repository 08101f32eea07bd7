//! Tests for RunnableRetry.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use runnable_core::callbacks::BaseCallbackHandler;
use runnable_core::error::Error;
use runnable_core::runnables::{
    ExponentialJitterParams, RetryErrorPredicate, Runnable, RunnableConfig, RunnableLambda,
    RunnableRetry, RunnableRetryConfig,
};
use runnable_core::tracers::RunCollectorCallbackHandler;

fn flaky(failures: usize, calls: Arc<AtomicUsize>) -> RunnableLambda<Value, Value> {
    RunnableLambda::new(move |x: Value| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        if call < failures {
            Err(Error::other(format!("failure {}", call + 1)))
        } else {
            Ok(x)
        }
    })
    .with_name("flaky")
}

#[tokio::test]
async fn test_retry_attempts_are_traced_with_tags() {
    let collector = Arc::new(RunCollectorCallbackHandler::new());
    let handler: Arc<dyn BaseCallbackHandler> = collector.clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let retry = RunnableRetry::with_simple(flaky(2, calls.clone()), 3, false);

    let output = retry
        .invoke(json!("ok"), Some(RunnableConfig::new().with_callbacks(vec![handler])))
        .await
        .unwrap();

    assert_eq!(output, json!("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let runs = collector.traced_runs();
    assert_eq!(runs.len(), 1);
    let attempts = &runs[0].child_runs;
    assert_eq!(attempts.len(), 3);
    assert!(attempts[0].tags.is_empty());
    assert_eq!(attempts[1].tags, vec!["retry:attempt:2"]);
    assert_eq!(attempts[2].tags, vec!["retry:attempt:3"]);
    assert!(attempts[0].error.is_some() && attempts[1].error.is_some());
    assert!(runs[0].error.is_none());
}

#[tokio::test]
async fn test_retry_gives_up_with_last_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let retry = RunnableRetry::with_simple(flaky(10, calls.clone()), 2, false);

    let err = retry.invoke(json!(1), None).await.unwrap_err();
    assert_eq!(err.to_string(), "failure 2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_custom_predicate_stops_retrying() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let runnable = RunnableLambda::new(move |_: Value| -> runnable_core::Result<Value> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::invalid_input("not transient"))
    });
    let retry = runnable.with_retry(
        RunnableRetryConfig::builder()
            .retry_predicate(RetryErrorPredicate::Custom(|error| {
                !matches!(error, Error::InvalidInput(_))
            }))
            .wait_exponential_jitter(false)
            .max_attempt_number(5)
            .build(),
    );

    assert!(retry.invoke(json!(1), None).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recursion_limit_is_never_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let runnable = RunnableLambda::new(move |_: Value| -> runnable_core::Result<Value> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::RecursionLimitExceeded { limit: 3 })
    });
    let retry = RunnableRetry::with_simple(runnable, 5, false);

    let err = retry.invoke(json!(1), None).await.unwrap_err();
    assert!(matches!(err, Error::RecursionLimitExceeded { limit: 3 }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_ends_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let retry = RunnableRetry::new(
        flaky(10, calls.clone()),
        RunnableRetryConfig::builder()
            .exponential_jitter_params(
                ExponentialJitterParams::builder()
                    .initial(60.0)
                    .jitter(0.0)
                    .build(),
            )
            .max_attempt_number(5)
            .build(),
    );

    let signal = CancellationToken::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let err = retry
        .invoke(json!(1), Some(RunnableConfig::new().with_signal(signal)))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
