use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use runbook_rs::prelude::*;
use serde_json::json;

fn isolated_run() -> (RunContext, Recorder) {
    let recorder = Recorder::new();
    let run = RunContext::default().with_recorder(recorder.clone());
    (run, recorder)
}

fn flaky(failures: u32) -> (Action, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let action = Action::new("flaky", move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < failures {
                Err(ActionError::failure("transient"))
            } else {
                Ok(json!("finally"))
            }
        }
    });
    (action, calls)
}

#[tokio::test]
async fn retry_recovers_and_duration_covers_delay() {
    let (run, recorder) = isolated_run();
    let delay = Duration::from_millis(30);
    let (action, calls) = flaky(1);
    let action =
        action.with_retry_policy(RetryPolicy::new(1, delay, 2.0, Duration::ZERO).enabled(true));

    let result = action.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!("finally"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // One context for the whole invocation, recovered, with the retry sleep
    // inside the recorded duration.
    let contexts = recorder.get_all();
    assert_eq!(contexts.len(), 1);
    let ctx = &contexts[0];
    assert!(ctx.error.is_none());
    assert_eq!(ctx.result, Some(json!("finally")));
    assert!(ctx.duration().unwrap() >= delay);
}

#[tokio::test]
async fn retry_performs_at_most_max_retries() {
    let (run, recorder) = isolated_run();
    let (action, calls) = flaky(10);
    let action = action.with_retry_policy(
        RetryPolicy::new(2, Duration::from_millis(1), 1.0, Duration::ZERO).enabled(true),
    );

    let err = action.run(Invocation::default(), run).await.unwrap_err();
    assert!(err.to_string().contains("transient"));
    // Initial attempt plus two retries.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(recorder.get_latest().unwrap().error.is_some());
}

#[tokio::test]
async fn disabled_retry_fails_on_first_error() {
    let (run, _recorder) = isolated_run();
    let (action, calls) = flaky(1);

    let err = action.run(Invocation::default(), run).await.unwrap_err();
    assert!(err.to_string().contains("transient"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_reuses_recorded_arguments() {
    let (run, _recorder) = isolated_run();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let action = Action::new("echo_arg", move |inv| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                Err(ActionError::failure("first try fails"))
            } else {
                Ok(inv.args.first().cloned().unwrap_or_default())
            }
        }
    })
    .with_retry_policy(
        RetryPolicy::new(1, Duration::from_millis(1), 1.0, Duration::ZERO).enabled(true),
    );

    let result = action
        .run(Invocation::with_args(vec![json!("kept")]), run)
        .await
        .unwrap();
    assert_eq!(result, json!("kept"));
}
