use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use runbook_rs::prelude::*;
use serde_json::json;

fn isolated_run() -> (RunContext, Recorder) {
    let recorder = Recorder::new();
    let run = RunContext::default().with_recorder(recorder.clone());
    (run, recorder)
}

#[tokio::test]
async fn groups_nest_inside_chains() {
    let (run, recorder) = isolated_run();
    let fanout = ActionGroup::new("fanout")
        .add_fn("left", |_| async { Ok(json!("l")) })
        .add_fn("right", |_| async { Ok(json!("r")) });

    let chain = ChainedAction::new("workflow")
        .add_literal(json!("seed"))
        .add(fanout)
        .add(
            Action::new("collect", |inv| async move {
                Ok(inv.kwargs.get("last_result").cloned().unwrap_or_default())
            })
            .with_inject_last_result(true),
        );

    let result = chain.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!([["left", "l"], ["right", "r"]]));
    // input, left, right, fanout, collect, workflow
    assert_eq!(recorder.get_all().len(), 6);
}

/// A leaf that parks a shared counter in the composite scratchpad so its
/// siblings can reuse it.
struct SessionOpener {
    hooks: HookManager,
}

impl SessionOpener {
    fn new() -> Self {
        Self {
            hooks: HookManager::new(),
        }
    }
}

#[async_trait]
impl BaseAction for SessionOpener {
    fn name(&self) -> &str {
        "open_session"
    }

    fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    async fn invoke(
        &self,
        ctx: &mut ExecutionContext,
        _run: &RunContext,
    ) -> ActionResult<JsonValue> {
        if let Some(shared) = &ctx.shared {
            shared.insert_slot("session", Arc::new(AtomicU32::new(7)));
        }
        Ok(json!("opened"))
    }
}

struct SessionReader;

#[async_trait]
impl BaseAction for SessionReader {
    fn name(&self) -> &str {
        "read_session"
    }

    fn hooks(&self) -> &HookManager {
        static HOOKS: std::sync::OnceLock<HookManager> = std::sync::OnceLock::new();
        HOOKS.get_or_init(HookManager::new)
    }

    async fn invoke(
        &self,
        ctx: &mut ExecutionContext,
        _run: &RunContext,
    ) -> ActionResult<JsonValue> {
        let shared = ctx
            .shared
            .as_ref()
            .ok_or_else(|| ActionError::failure("no shared context"))?;
        let session = shared
            .get_slot::<AtomicU32>("session")
            .ok_or_else(|| ActionError::failure("session missing"))?;
        Ok(json!(session.load(Ordering::SeqCst)))
    }
}

#[tokio::test]
async fn shared_slots_carry_resources_between_siblings() {
    let (run, _recorder) = isolated_run();
    let closed = Arc::new(AtomicU32::new(0));

    let chain = ChainedAction::new("session_flow")
        .add(SessionOpener::new())
        .add(SessionReader);
    // The creator of a shared resource closes it once, after all children,
    // via the composite's teardown slot.
    let counter = closed.clone();
    chain.hooks().register_named(
        HookType::OnTeardown,
        "close_session",
        sync_hook(move |ctx| {
            if let Some(shared) = &ctx.shared {
                if shared.remove_slot("session").is_some() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        }),
    );

    let result = chain.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!(7));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn injection_warns_but_overrides_existing_kwarg() {
    let (run, _recorder) = isolated_run();
    let chain = ChainedAction::new("override")
        .add_literal(json!("fresh"))
        .add(
            Action::new("reader", |inv| async move {
                Ok(inv.kwargs.get("last_result").cloned().unwrap_or_default())
            })
            .with_inject_last_result(true)
            .with_kwargs({
                let mut kwargs = serde_json::Map::new();
                kwargs.insert("last_result".to_string(), json!("stale"));
                kwargs
            }),
        );

    let result = chain.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!("fresh"));
}

#[tokio::test]
async fn custom_inject_key_is_honored() {
    let (run, _recorder) = isolated_run();
    let chain = ChainedAction::new("renamed")
        .add_literal(json!(5))
        .add(
            Action::new("consumer", |inv| async move {
                Ok(inv.kwargs.get("previous").cloned().unwrap_or_default())
            })
            .with_inject_last_result(true)
            .with_inject_into("previous"),
        );

    let result = chain.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!(5));
}

#[tokio::test]
async fn factory_generated_action_joins_the_chain_context() {
    let (run, _recorder) = isolated_run();
    let factory = ActionFactory::new("make_reader", |_| async {
        let reader: ActionRef = Arc::new(
            Action::new("generated_reader", |inv| async move {
                Ok(inv.kwargs.get("last_result").cloned().unwrap_or_default())
            })
            .with_inject_last_result(true),
        );
        Ok(reader)
    });

    let chain = ChainedAction::new("dynamic")
        .add_literal(json!("ctx-value"))
        .add(factory);

    let result = chain.run(Invocation::default(), run).await.unwrap();
    assert_eq!(result, json!("ctx-value"));
}
