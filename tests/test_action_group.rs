use runbook_rs::prelude::*;
use serde_json::json;

fn isolated_run() -> (RunContext, Recorder) {
    let recorder = Recorder::new();
    let run = RunContext::default().with_recorder(recorder.clone());
    (run, recorder)
}

#[tokio::test]
async fn partial_failure_raises_aggregate_but_records_children() {
    let (run, recorder) = isolated_run();
    let group = ActionGroup::new("batch")
        .add_fn("ok", |_| async { Ok(json!(1)) })
        .add_fn("fail", |_| async { Err(ActionError::failure("nope")) })
        .add_fn("ok2", |_| async { Ok(json!(2)) });

    let err = group.run(Invocation::default(), run).await.unwrap_err();
    match &err {
        ActionError::GroupFailure { failed, names } => {
            assert_eq!(*failed, 1);
            assert_eq!(names, &vec!["fail".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("fail"));

    // Three children plus the group itself.
    assert_eq!(recorder.get_all().len(), 4);
    assert_eq!(recorder.get_by_name("ok")[0].result, Some(json!(1)));
    assert_eq!(recorder.get_by_name("ok2")[0].result, Some(json!(2)));
    assert!(recorder.get_by_name("fail")[0].error.is_some());
    assert!(recorder.get_by_name("batch")[0].error.is_some());
}

#[tokio::test]
async fn success_returns_one_entry_per_child_in_declaration_order() {
    let (run, _recorder) = isolated_run();
    let group = ActionGroup::new("gather")
        .add_fn("alpha", |_| async { Ok(json!("a")) })
        .add_fn("beta", |_| async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(json!("b"))
        })
        .add_fn("gamma", |_| async { Ok(json!("c")) });

    let result = group.run(Invocation::default(), run).await.unwrap();
    assert_eq!(
        result,
        json!([["alpha", "a"], ["beta", "b"], ["gamma", "c"]])
    );
}

#[tokio::test]
async fn empty_group_raises_dedicated_error() {
    let (run, recorder) = isolated_run();
    let group = ActionGroup::new("hollow");
    let err = group.run(Invocation::default(), run).await.unwrap_err();
    assert!(matches!(err, ActionError::EmptyGroup(_)));
    assert_eq!(recorder.get_all().len(), 1);
}

#[tokio::test]
async fn every_child_sees_the_same_upstream_result() {
    let (run, _recorder) = isolated_run();
    let observer = || {
        Action::new("observer", |inv| async move {
            Ok(inv.kwargs.get("last_result").cloned().unwrap_or_default())
        })
        .with_inject_last_result(true)
    };
    let group = ActionGroup::new("observers")
        .add(observer())
        .add(observer());

    let chain = ChainedAction::new("pipeline")
        .add_literal(json!("upstream"))
        .add(group);

    let result = chain.run(Invocation::default(), run).await.unwrap();
    assert_eq!(
        result,
        json!([["observer", "upstream"], ["observer", "upstream"]])
    );
}

#[tokio::test]
async fn children_are_isolated_from_each_other() {
    let (run, recorder) = isolated_run();
    let group = ActionGroup::new("isolated")
        .add_fn("slow_ok", |_| async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(json!("done"))
        })
        .add_fn("instant_fail", |_| async { Err(ActionError::failure("early")) });

    let _ = group.run(Invocation::default(), run).await.unwrap_err();
    // The failing sibling never interrupted the slow one.
    assert_eq!(recorder.get_by_name("slow_ok")[0].result, Some(json!("done")));
}
