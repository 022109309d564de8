//! The action system: composable executable units with a uniform lifecycle.
//!
//! Every action — leaf or composite — runs through the same skeleton:
//!
//! 1. Build an [`ExecutionContext`] from the (merged, possibly injected)
//!    invocation.
//! 2. Start the timer and fire `Before` hooks.
//! 3. Execute the body.
//! 4. On success set `ctx.result` and fire `OnSuccess`; on failure set
//!    `ctx.error` and fire `OnError` (leaves honor hook recovery).
//! 5. Always stop the timer, fire `After` and `OnTeardown`, and record the
//!    context with the run's recorder.
//!
//! The skeleton lives in [`BaseAction::run`]; implementations provide
//! [`BaseAction::invoke`] plus metadata. Composites create a
//! [`SharedContext`](crate::context::SharedContext) in
//! [`BaseAction::seed_context`] and hand children a derived
//! [`RunContext`].
//!
//! Variants:
//! - [`Action`]: wraps an async (or lifted sync) function.
//! - [`LiteralInputAction`]: injects a constant into a chain.
//! - [`FallbackAction`]: supplies a replacement when the previous step
//!   failed or produced null.
//! - [`ChainedAction`]: sequential composite with rollback and fallback
//!   consumption.
//! - [`ActionGroup`]: concurrent composite with error isolation.
//! - [`ProcessAction`] / [`ProcessPoolAction`]: off-loop execution through a
//!   worker pool.
//! - [`ActionFactory`]: builds and immediately runs a dynamic action.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::context::{BodyFn, ExecutionContext, Invocation, RunContext};
use crate::hooks::{Hook, HookManager, HookType};
use crate::parser::ArgumentSpec;
use crate::retry::RetryPolicy;

mod chain;
mod factory;
mod fallback;
mod group;
mod leaf;
mod literal;
mod process;

#[cfg(test)]
mod tests;

pub use chain::ChainedAction;
pub use factory::{ActionFactory, FactoryFn};
pub use fallback::FallbackAction;
pub use group::ActionGroup;
pub use leaf::Action;
pub use literal::LiteralInputAction;
pub use process::{ProcessAction, ProcessPoolAction, ProcessTask};

/// Default kwarg key last results are injected under.
pub const LAST_RESULT_KEY: &str = "last_result";

/// Errors raised by action bodies and composites.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Failure(String),
    /// A chain was run with no children.
    #[error("[{0}] no actions to execute")]
    EmptyChain(String),
    /// A group was run with no children.
    #[error("[{0}] no actions to execute")]
    EmptyGroup(String),
    /// A process pool was run with no tasks.
    #[error("[{0}] no tasks to execute")]
    EmptyPool(String),
    /// Aggregate failure raised by a group after all children settled.
    #[error("{failed} action(s) failed: {}", .names.join(", "))]
    GroupFailure { failed: usize, names: Vec<String> },
    /// An injected value could not cross the worker-pool boundary.
    #[error("cannot inject last result into {0}: value is not serializable")]
    NotSerializable(String),
    /// An on-error hook itself failed; the original error is preserved.
    #[error("{original} (on_error hook '{hook}' failed: {cause})")]
    OnErrorHookFailed {
        original: Box<ActionError>,
        hook: String,
        cause: String,
    },
}

impl ActionError {
    pub fn failure(message: impl Into<String>) -> Self {
        ActionError::Failure(message.into())
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError::Failure(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::Failure(message.to_string())
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(error: serde_json::Error) -> Self {
        ActionError::Failure(format!("serialization error: {error}"))
    }
}

/// Result alias for action bodies.
pub type ActionResult<T> = Result<T, ActionError>;

/// Common contract for every executable unit.
///
/// Implementations provide [`invoke`](Self::invoke) and metadata; callers go
/// through [`run`](Self::run), which owns the hook lifecycle, timing and
/// registry recording for all variants.
#[async_trait]
pub trait BaseAction: Send + Sync {
    fn name(&self) -> &str;

    fn hooks(&self) -> &HookManager;

    /// Whether the run should receive the shared context's last result as a
    /// keyword argument.
    fn inject_last_result(&self) -> bool {
        false
    }

    /// Kwarg key the last result is injected under.
    fn inject_into(&self) -> &str {
        LAST_RESULT_KEY
    }

    /// Leaves honor on-error hook recovery; composites always re-raise.
    fn allows_recovery(&self) -> bool {
        false
    }

    /// Marker consulted by chains for the fallback-consumption protocol.
    fn is_fallback(&self) -> bool {
        false
    }

    /// Suppress confirmation prompts when this action runs under a command.
    fn never_prompt(&self) -> bool {
        false
    }

    /// Name recorded on the execution context.
    fn context_name(&self) -> String {
        self.name().to_string()
    }

    /// Merge statically configured arguments into the received invocation.
    fn merge_invocation(&self, invocation: Invocation) -> Invocation {
        invocation
    }

    /// Attach run-scoped state (shared contexts, retry targets, extras) to a
    /// freshly built execution context before hooks fire.
    fn seed_context(&self, _ctx: &mut ExecutionContext, _run: &RunContext) {}

    /// The execution body. `ctx` carries the merged arguments; composites
    /// find their scratchpad under `ctx.shared`.
    async fn invoke(&self, ctx: &mut ExecutionContext, run: &RunContext) -> ActionResult<Value>;

    /// Undo handler consulted by chain rollback. Only leaves carry one.
    fn rollback_handler(&self) -> Option<BodyFn> {
        None
    }

    /// Register a hook here and on every descendant.
    fn register_hooks_recursively(&self, slot: HookType, hook: Hook) {
        self.hooks().register(slot, hook);
    }

    /// Install `policy` on this action if it is a retryable leaf. Returns
    /// whether retry was enabled.
    fn enable_retry_policy(&self, _policy: RetryPolicy) -> bool {
        false
    }

    /// Walk the tree enabling `policy` on every retryable leaf.
    fn enable_retries_recursively(&self, _policy: &RetryPolicy) {}

    /// Declared argument specs used by command auto-argument inference.
    /// Composites forward to the child that defines their call surface.
    fn infer_arguments(&self) -> Option<Vec<ArgumentSpec>> {
        None
    }

    /// Append this node's preview (and descendants') as indented plain text.
    async fn preview_into(&self, depth: usize, out: &mut Vec<String>) {
        out.push(format!("{}{}", "  ".repeat(depth), self.preview_label()));
    }

    /// One-line preview label.
    fn preview_label(&self) -> String {
        format!("Action '{}'", self.name())
    }

    /// Render the full preview tree.
    async fn preview(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.preview_into(0, &mut lines).await;
        lines
    }

    /// Execute with the full lifecycle. This is the only entry point; the
    /// sequencing here is identical for every action variant.
    async fn run(&self, invocation: Invocation, run: RunContext) -> ActionResult<Value> {
        let Invocation { args, mut kwargs } = self.merge_invocation(invocation);
        if self.inject_last_result() {
            if let Some(shared) = &run.shared {
                let key = self.inject_into().to_string();
                if kwargs.contains_key(&key) {
                    warn!(action = %self.name(), key = %key, "overriding kwarg with last result");
                }
                kwargs.insert(key, shared.last_result().unwrap_or(Value::Null));
            }
        }

        let mut ctx = ExecutionContext::new(self.context_name(), args, kwargs);
        ctx.shared = run.shared.clone();
        self.seed_context(&mut ctx, &run);

        ctx.start_timer(run.clock.as_ref());
        self.hooks().trigger(HookType::Before, &mut ctx).await;

        let outcome = match self.invoke(&mut ctx, &run).await {
            Ok(value) => {
                ctx.result = Some(value.clone());
                self.hooks().trigger(HookType::OnSuccess, &mut ctx).await;
                Ok(value)
            }
            Err(error) => {
                ctx.error = Some(error.clone());
                match self.hooks().trigger_on_error(&mut ctx).await {
                    Err(chained) => Err(chained),
                    Ok(()) => {
                        if self.allows_recovery() && ctx.error.is_none() {
                            info!(action = %ctx.name, "recovered by on_error hook");
                            Ok(ctx.result.clone().unwrap_or(Value::Null))
                        } else {
                            Err(ctx.error.clone().unwrap_or(error))
                        }
                    }
                }
            }
        };

        ctx.stop_timer(run.clock.as_ref());
        self.hooks().trigger(HookType::After, &mut ctx).await;
        self.hooks().trigger(HookType::OnTeardown, &mut ctx).await;

        // Recorded contexts carry exactly one of result / error.
        match &outcome {
            Ok(value) => {
                ctx.error = None;
                if ctx.result.is_none() {
                    ctx.result = Some(value.clone());
                }
            }
            Err(error) => {
                ctx.result = None;
                if ctx.error.is_none() {
                    ctx.error = Some(error.clone());
                }
            }
        }
        run.recorder.record(ctx);
        outcome
    }
}

/// Serializability pre-check for values crossing the worker-pool boundary.
pub(crate) fn ensure_serializable(name: &str, value: &Value) -> ActionResult<()> {
    serde_json::to_vec(value)
        .map(|_| ())
        .map_err(|_| ActionError::NotSerializable(name.to_string()))
}

/// Convenience for storing heterogeneous actions.
pub type ActionRef = Arc<dyn BaseAction>;
