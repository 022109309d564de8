use runbook_rs::prelude::*;
use serde_json::json;

fn isolated_run() -> (RunContext, Recorder) {
    let recorder = Recorder::new();
    let run = RunContext::default().with_recorder(recorder.clone());
    (run, recorder)
}

fn checksum(inv: Invocation) -> ActionResult<JsonValue> {
    let total: i64 = inv.args.iter().filter_map(JsonValue::as_i64).sum();
    Ok(json!(total))
}

#[tokio::test]
async fn process_action_runs_off_loop() {
    let (run, recorder) = isolated_run();
    let action = ProcessAction::new("sum", checksum).with_args(vec![json!(40), json!(2)]);

    let result = action.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!(42));
    assert_eq!(recorder.get_by_name("sum").len(), 1);
}

#[tokio::test]
async fn process_action_receives_injected_last_result() {
    let (run, _recorder) = isolated_run();
    let chain = ChainedAction::new("compute")
        .add_literal(json!(21))
        .add(
            ProcessAction::new("double", |inv| {
                let n = inv
                    .kwargs
                    .get("last_result")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or(0);
                Ok(json!(n * 2))
            })
            .with_inject_last_result(true),
        );

    let result = chain.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!(42));
}

#[tokio::test]
async fn pool_preserves_per_task_errors_in_results() {
    let (run, _recorder) = isolated_run();
    let pool = ProcessPoolAction::new("fanout")
        .add_task(ProcessTask::new("ok", |_| Ok(json!(1))))
        .add_task(ProcessTask::new("bad", |_| {
            Err(ActionError::failure("task exploded"))
        }))
        .add_task(ProcessTask::new("ok2", |_| Ok(json!(2))));

    let result = pool.run(Invocation::default(), run).await.unwrap();
    let entries = result.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0], json!({ "task": "ok", "result": 1 }));
    assert_eq!(entries[1]["task"], json!("bad"));
    assert!(
        entries[1]["error"]
            .as_str()
            .unwrap()
            .contains("task exploded")
    );
    assert_eq!(entries[2], json!({ "task": "ok2", "result": 2 }));
}

#[tokio::test]
async fn empty_pool_raises_dedicated_error() {
    let (run, _recorder) = isolated_run();
    let pool = ProcessPoolAction::new("hollow");
    let err = pool.run(Invocation::default(), run).await.unwrap_err();
    assert!(matches!(err, ActionError::EmptyPool(_)));
}

#[tokio::test]
async fn pool_tasks_combine_static_and_task_arguments() {
    let (run, _recorder) = isolated_run();
    let pool = ProcessPoolAction::new("sums")
        .add_task(ProcessTask::new("sum_a", checksum).with_args(vec![json!(1), json!(2)]))
        .add_task(ProcessTask::new("sum_b", checksum).with_args(vec![json!(10)]));

    let result = pool
        .run(Invocation::with_args(vec![json!(100)]), run)
        .await
        .unwrap();
    assert_eq!(
        result,
        json!([
            { "task": "sum_a", "result": 103 },
            { "task": "sum_b", "result": 110 }
        ])
    );
}
