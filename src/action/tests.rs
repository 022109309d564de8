use std::sync::{Arc, Mutex};

use serde_json::{Map, json};

use super::*;
use crate::context::{Invocation, RunContext};
use crate::hooks::{HookType, sync_hook};
use crate::registry::Recorder;

fn isolated_run() -> (RunContext, Recorder) {
    let recorder = Recorder::new();
    let run = RunContext::default().with_recorder(recorder.clone());
    (run, recorder)
}

#[tokio::test]
async fn leaf_records_exactly_one_context() {
    let (run, recorder) = isolated_run();
    let action = Action::new("answer", |_| async { Ok(json!(42)) });

    let result = action.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!(42));

    let contexts = recorder.get_all();
    assert_eq!(contexts.len(), 1);
    let ctx = &contexts[0];
    assert_eq!(ctx.name, "answer");
    assert!(ctx.result.is_some());
    assert!(ctx.error.is_none());
    let (start, end) = (ctx.start_time.unwrap(), ctx.end_time.unwrap());
    assert!(start <= end);
}

#[tokio::test]
async fn failed_leaf_records_error_without_result() {
    let (run, recorder) = isolated_run();
    let action = Action::new("broken", |_| async { Err(ActionError::failure("boom")) });

    let err = action.run(Invocation::default(), run).await.unwrap_err();
    assert!(err.to_string().contains("boom"));

    let ctx = recorder.get_latest().unwrap();
    assert!(ctx.result.is_none());
    assert!(ctx.error.is_some());
}

#[tokio::test]
async fn hook_ordering_around_body() {
    let (run, _recorder) = isolated_run();
    let order = Arc::new(Mutex::new(Vec::new()));

    let body_order = order.clone();
    let action = Action::new("ordered", move |_| {
        let body_order = body_order.clone();
        async move {
            body_order.lock().unwrap().push("body");
            Ok(json!(null))
        }
    });
    for (slot, label) in [
        (HookType::Before, "before"),
        (HookType::OnSuccess, "on_success"),
        (HookType::After, "after"),
        (HookType::OnTeardown, "on_teardown"),
    ] {
        let order = order.clone();
        action.hooks().register(
            slot,
            sync_hook(move |_| {
                order.lock().unwrap().push(label);
                Ok(())
            }),
        );
    }

    action.run(Invocation::default(), run).await.unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["before", "body", "on_success", "after", "on_teardown"]
    );
}

#[tokio::test]
async fn on_error_hook_recovers_leaf() {
    let (run, recorder) = isolated_run();
    let action = Action::new("flaky", |_| async { Err(ActionError::failure("boom")) });
    action.hooks().register(
        HookType::OnError,
        sync_hook(|ctx| {
            ctx.error = None;
            ctx.result = Some(json!("recovered"));
            Ok(())
        }),
    );

    let result = action.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!("recovered"));

    let ctx = recorder.get_latest().unwrap();
    assert_eq!(ctx.result, Some(json!("recovered")));
    assert!(ctx.error.is_none());
}

#[tokio::test]
async fn composites_do_not_recover_from_hooks() {
    let (run, _recorder) = isolated_run();
    let chain = ChainedAction::new("pipeline")
        .add_fn("broken", |_| async { Err(ActionError::failure("boom")) });
    chain.hooks().register(
        HookType::OnError,
        sync_hook(|ctx| {
            ctx.error = None;
            ctx.result = Some(json!("nope"));
            Ok(())
        }),
    );

    let err = chain.run(Invocation::default(), run).await.unwrap_err();
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn static_args_compose_with_received() {
    let (run, _recorder) = isolated_run();
    let mut kwargs = Map::new();
    kwargs.insert("mode".to_string(), json!("static"));
    kwargs.insert("kept".to_string(), json!(true));
    let action = Action::new("echo", |inv| async move {
        Ok(json!({ "args": inv.args, "kwargs": inv.kwargs }))
    })
    .with_args(vec![json!("static_arg")])
    .with_kwargs(kwargs);

    let invocation = Invocation::new().arg("received").kwarg("mode", "received");
    let result = action.run(invocation, run).await.unwrap();
    assert_eq!(result["args"], json!(["received", "static_arg"]));
    assert_eq!(result["kwargs"]["mode"], json!("received"));
    assert_eq!(result["kwargs"]["kept"], json!(true));
}

#[tokio::test]
async fn literal_returns_value_unchanged() {
    let (run, _recorder) = isolated_run();
    let literal = LiteralInputAction::new(json!({"port": 8080}));
    let result = literal.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!({"port": 8080}));
}

#[tokio::test]
async fn fallback_without_shared_context_uses_fallback_value() {
    let (run, _recorder) = isolated_run();
    let fallback = FallbackAction::new("default");
    let result = fallback.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!("default"));
}

#[tokio::test]
async fn recursive_hook_registration_reaches_leaves() {
    let (run, _recorder) = isolated_run();
    let counter = Arc::new(Mutex::new(0usize));

    let chain = ChainedAction::new("outer")
        .add_fn("one", |_| async { Ok(json!(1)) })
        .add_fn("two", |_| async { Ok(json!(2)) });
    let count = counter.clone();
    chain.register_hooks_recursively(
        HookType::Before,
        sync_hook(move |_| {
            *count.lock().unwrap() += 1;
            Ok(())
        }),
    );

    chain.run(Invocation::default(), run).await.unwrap();
    // Fires for the chain itself plus each leaf.
    assert_eq!(*counter.lock().unwrap(), 3);
}

#[tokio::test]
async fn factory_context_name_is_tagged() {
    let (run, recorder) = isolated_run();
    let factory = ActionFactory::new("build", |_| async {
        let action: ActionRef = Arc::new(Action::new("generated", |_| async { Ok(json!("made")) }));
        Ok(action)
    });

    let result = factory.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!("made"));

    let names: Vec<String> = recorder
        .get_all()
        .iter()
        .map(|ctx| ctx.name.clone())
        .collect();
    assert_eq!(names, vec!["generated", "build (factory)"]);
}

#[tokio::test]
async fn factory_rejects_failures_through_error_path() {
    let (run, recorder) = isolated_run();
    let factory = ActionFactory::new("build", |_| async {
        Err(ActionError::failure("factory exploded"))
    });

    let err = factory.run(Invocation::default(), run).await.unwrap_err();
    assert!(err.to_string().contains("factory exploded"));
    assert_eq!(recorder.get_by_name("build (factory)").len(), 1);
}

#[tokio::test]
async fn preview_renders_composite_tree() {
    let chain = ChainedAction::new("deploy")
        .add_literal(json!("payload"))
        .add_fn("ship", |_| async { Ok(json!(null)) });
    let lines = chain.preview().await;
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("ChainedAction 'deploy'"));
    assert!(lines[1].contains("LiteralInput"));
    assert!(lines[2].contains("Action 'ship'"));
}
