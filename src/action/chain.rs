//! Sequential composite with rollback and fallback consumption.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::action::{Action, ActionError, ActionRef, ActionResult, BaseAction, LiteralInputAction};
use crate::context::{ExecutionContext, Invocation, RunContext, SharedContext};
use crate::hooks::{Hook, HookManager, HookType};
use crate::parser::ArgumentSpec;
use crate::retry::RetryPolicy;

/// Runs its children one after another, threading a fresh sequential
/// [`SharedContext`] through them.
///
/// Behavior highlights:
/// - After the first child, the original invocation arguments are cleared;
///   downstream children receive only injected data.
/// - With `auto_inject`, every child after the first receives the previous
///   result under its injection key even if it did not opt in.
/// - A failing child followed directly by a [`FallbackAction`]
///   (`crate::action::FallbackAction`) records `null` for the failure, runs
///   the fallback, and skips the fallback's own slot — consuming exactly one
///   error.
/// - Any unhandled failure rolls back the successfully executed children in
///   reverse order before propagating.
/// - `return_list` switches the result between the full ordered list and
///   just the final value.
pub struct ChainedAction {
    name: String,
    hooks: HookManager,
    actions: Vec<ActionRef>,
    inject_last_result: bool,
    inject_into: String,
    auto_inject: bool,
    return_list: bool,
}

impl ChainedAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: HookManager::new(),
            actions: Vec::new(),
            inject_last_result: false,
            inject_into: super::LAST_RESULT_KEY.to_string(),
            auto_inject: false,
            return_list: false,
        }
    }

    /// Inject the previous result into every child after the first.
    pub fn with_auto_inject(mut self, auto_inject: bool) -> Self {
        self.auto_inject = auto_inject;
        self
    }

    /// Return all child results instead of only the last.
    pub fn with_return_list(mut self, return_list: bool) -> Self {
        self.return_list = return_list;
        self
    }

    /// Inject the enclosing composite's last result into this chain itself.
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

    /// Append an already shared child.
    pub fn add_arc(mut self, action: ActionRef) -> Self {
        self.actions.push(action);
        self
    }

    /// Append a literal value (wrapped into a [`LiteralInputAction`]).
    pub fn add_literal(mut self, value: impl Into<Value>) -> Self {
        self.actions.push(Arc::new(LiteralInputAction::new(value)));
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

    async fn rollback(&self, stack: &[ActionRef]) {
        for action in stack.iter().rev() {
            if let Some(handler) = action.rollback_handler() {
                warn!(chain = %self.name, action = %action.name(), "rolling back");
                if let Err(rollback_error) = handler(Invocation::default()).await {
                    error!(
                        chain = %self.name,
                        action = %action.name(),
                        error = %rollback_error,
                        "rollback failed",
                    );
                }
            }
        }
    }
}

#[async_trait]
impl BaseAction for ChainedAction {
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
        let shared = SharedContext::sequential(self.name.clone());
        // A nested chain starts from the parent's last result.
        if let Some(parent) = &run.shared {
            shared.add_result(parent.last_result().unwrap_or(Value::Null));
        }
        ctx.shared = Some(Arc::new(shared));
        ctx.extra.insert("results".to_string(), Value::Array(Vec::new()));
    }

    async fn invoke(&self, ctx: &mut ExecutionContext, run: &RunContext) -> ActionResult<Value> {
        if self.actions.is_empty() {
            return Err(ActionError::EmptyChain(self.name.clone()));
        }
        let shared = ctx
            .shared
            .clone()
            .ok_or_else(|| ActionError::failure(format!("[{}] missing shared context", self.name)))?;

        let mut current_args = ctx.args.clone();
        let mut current_kwargs = ctx.kwargs.clone();
        let mut results: Vec<Value> = Vec::new();
        let mut rollback_stack: Vec<ActionRef> = Vec::new();
        let mut consumed_fallback: Option<usize> = None;

        let mut index = 0;
        while index < self.actions.len() {
            if consumed_fallback == Some(index) {
                debug!(chain = %self.name, index, "skipping consumed fallback");
                index += 1;
                continue;
            }
            let child = self.actions[index].clone();
            shared.set_current_index(index);

            let mut invocation = Invocation {
                args: current_args.clone(),
                kwargs: current_kwargs.clone(),
            };
            if self.auto_inject && index > 0 && !child.inject_last_result() {
                invocation.kwargs.insert(
                    child.inject_into().to_string(),
                    shared.last_result().unwrap_or(Value::Null),
                );
            }

            let result = match child.run(invocation, run.child(shared.clone())).await {
                Ok(value) => value,
                Err(child_error) => {
                    let next_is_fallback = self
                        .actions
                        .get(index + 1)
                        .is_some_and(|next| next.is_fallback());
                    if next_is_fallback {
                        warn!(
                            chain = %self.name,
                            error = %child_error,
                            "fallback triggered; recovering with next action",
                        );
                        shared.add_result(Value::Null);
                        results.push(Value::Null);
                        let fallback = self.actions[index + 1].clone();
                        match fallback.run(Invocation::default(), run.child(shared.clone())).await {
                            Ok(value) => {
                                consumed_fallback = Some(index + 1);
                                value
                            }
                            Err(fallback_error) => {
                                shared.add_error(index, fallback_error.clone());
                                ctx.extra
                                    .insert("results".to_string(), Value::Array(results));
                                self.rollback(&rollback_stack).await;
                                return Err(fallback_error);
                            }
                        }
                    } else {
                        shared.add_error(index, child_error.clone());
                        ctx.extra
                            .insert("results".to_string(), Value::Array(results));
                        self.rollback(&rollback_stack).await;
                        return Err(child_error);
                    }
                }
            };

            // Downstream children see only injected data.
            current_args = Vec::new();
            current_kwargs = Map::new();
            shared.add_result(result.clone());
            results.push(result);
            rollback_stack.push(child);
            index += 1;
        }

        ctx.extra
            .insert("results".to_string(), Value::Array(results.clone()));
        let last = results
            .last()
            .cloned()
            .ok_or_else(|| ActionError::failure(format!("[{}] no results captured", self.name)))?;
        if self.return_list {
            Ok(Value::Array(results))
        } else {
            Ok(last)
        }
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
        self.actions.first().and_then(|first| first.infer_arguments())
    }

    async fn preview_into(&self, depth: usize, out: &mut Vec<String>) {
        out.push(format!("{}{}", "  ".repeat(depth), self.preview_label()));
        for action in &self.actions {
            action.preview_into(depth + 1, out).await;
        }
    }

    fn preview_label(&self) -> String {
        let mut label = format!("ChainedAction '{}'", self.name);
        if self.inject_last_result {
            label.push_str(&format!(" (injects '{}')", self.inject_into));
        }
        label
    }
}

impl std::fmt::Debug for ChainedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedAction")
            .field("name", &self.name)
            .field(
                "actions",
                &self.actions.iter().map(|a| a.name().to_string()).collect::<Vec<_>>(),
            )
            .field("auto_inject", &self.auto_inject)
            .field("return_list", &self.return_list)
            .finish()
    }
}
