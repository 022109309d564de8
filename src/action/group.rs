//! Concurrent composite with per-child error isolation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};

use crate::action::{Action, ActionError, ActionRef, ActionResult, BaseAction};
use crate::context::{ExecutionContext, Invocation, RunContext, SharedContext};
use crate::hooks::{Hook, HookManager, HookType};
use crate::parser::ArgumentSpec;
use crate::retry::RetryPolicy;

/// Runs all children concurrently on the same loop.
///
/// Each child executes independently: failures are collected, never
/// interrupting siblings. After all children settle, the group either
/// returns the ordered `(name, result)` pairs — keyed by declaration order,
/// which makes the mapping deterministic regardless of completion order —
/// or raises a single aggregate error naming the failing children.
///
/// Every child observing `last_result` sees the same upstream value through
/// the parallel [`SharedContext`].
pub struct ActionGroup {
    name: String,
    hooks: HookManager,
    actions: Vec<ActionRef>,
    inject_last_result: bool,
    inject_into: String,
}

impl ActionGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: HookManager::new(),
            actions: Vec::new(),
            inject_last_result: false,
            inject_into: super::LAST_RESULT_KEY.to_string(),
        }
    }

    pub fn with_inject_last_result(mut self, inject: bool) -> Self {
        self.inject_last_result = inject;
        self
    }

    pub fn with_inject_into(mut self, key: impl Into<String>) -> Self {
        self.inject_into = key.into();
        self
    }

    /// Append a child action.
    pub fn add<A: BaseAction + 'static>(mut self, action: A) -> Self {
        self.actions.push(Arc::new(action));
        self
    }

    pub fn add_arc(mut self, action: ActionRef) -> Self {
        self.actions.push(action);
        self
    }

    /// Append a bare async function (wrapped into an [`Action`]).
    pub fn add_fn<F, Fut>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ActionResult<Value>> + Send + 'static,
    {
        self.actions.push(Arc::new(Action::new(name, body)));
        self
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn actions(&self) -> &[ActionRef] {
        &self.actions
    }
}

#[async_trait]
impl BaseAction for ActionGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    fn inject_last_result(&self) -> bool {
        self.inject_last_result
    }

    fn inject_into(&self) -> &str {
        &self.inject_into
    }

    fn seed_context(&self, ctx: &mut ExecutionContext, run: &RunContext) {
        let shared = SharedContext::parallel(self.name.clone());
        if let Some(parent) = &run.shared {
            shared.set_shared_result(parent.last_result().unwrap_or(Value::Null));
        }
        ctx.shared = Some(Arc::new(shared));
        ctx.extra.insert("results".to_string(), Value::Array(Vec::new()));
        ctx.extra.insert("errors".to_string(), Value::Array(Vec::new()));
    }

    async fn invoke(&self, ctx: &mut ExecutionContext, run: &RunContext) -> ActionResult<Value> {
        if self.actions.is_empty() {
            return Err(ActionError::EmptyGroup(self.name.clone()));
        }
        let shared = ctx
            .shared
            .clone()
            .ok_or_else(|| ActionError::failure(format!("[{}] missing shared context", self.name)))?;

        let settled = join_all(self.actions.iter().map(|child| {
            let child = child.clone();
            let child_run = run.child(shared.clone());
            let invocation = Invocation {
                args: ctx.args.clone(),
                kwargs: ctx.kwargs.clone(),
            };
            async move {
                let name = child.name().to_string();
                let outcome = child.run(invocation, child_run).await;
                (name, outcome)
            }
        }))
        .await;

        let mut results: Vec<Value> = Vec::new();
        let mut errors: Vec<(String, ActionError)> = Vec::new();
        for (index, (name, outcome)) in settled.into_iter().enumerate() {
            match outcome {
                Ok(value) => {
                    shared.add_result(json!([name, value]));
                    results.push(json!([name, value]));
                }
                Err(child_error) => {
                    shared.add_error(index, child_error.clone());
                    errors.push((name, child_error));
                }
            }
        }

        ctx.extra
            .insert("results".to_string(), Value::Array(results.clone()));
        ctx.extra.insert(
            "errors".to_string(),
            Value::Array(
                errors
                    .iter()
                    .map(|(name, error)| json!([name, error.to_string()]))
                    .collect(),
            ),
        );

        if !errors.is_empty() {
            return Err(ActionError::GroupFailure {
                failed: errors.len(),
                names: errors.into_iter().map(|(name, _)| name).collect(),
            });
        }
        Ok(Value::Array(results))
    }

    fn register_hooks_recursively(&self, slot: HookType, hook: Hook) {
        self.hooks.register(slot, hook.clone());
        for action in &self.actions {
            action.register_hooks_recursively(slot, hook.clone());
        }
    }

    fn enable_retries_recursively(&self, policy: &RetryPolicy) {
        for action in &self.actions {
            action.enable_retries_recursively(policy);
        }
    }

    fn infer_arguments(&self) -> Option<Vec<ArgumentSpec>> {
        // Inference only applies when every child declares the same surface.
        let mut specs: Option<Vec<ArgumentSpec>> = None;
        for action in &self.actions {
            let child_specs = action.infer_arguments()?;
            match &specs {
                None => specs = Some(child_specs),
                Some(existing) if *existing == child_specs => {}
                Some(_) => return None,
            }
        }
        specs
    }

    async fn preview_into(&self, depth: usize, out: &mut Vec<String>) {
        out.push(format!("{}{}", "  ".repeat(depth), self.preview_label()));
        for action in &self.actions {
            action.preview_into(depth + 1, out).await;
        }
    }

    fn preview_label(&self) -> String {
        let mut label = format!("ActionGroup (parallel) '{}'", self.name);
        if self.inject_last_result {
            label.push_str(&format!(" (receives '{}')", self.inject_into));
        }
        label
    }
}

impl std::fmt::Debug for ActionGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionGroup")
            .field("name", &self.name)
            .field(
                "actions",
                &self.actions.iter().map(|a| a.name().to_string()).collect::<Vec<_>>(),
            )
            .field("inject_last_result", &self.inject_last_result)
            .finish()
    }
}
