//! Lifecycle hook system.
//!
//! Every action run fires five ordered hook slots around its body:
//! `Before` → body → (`OnSuccess` | `OnError`) → `After` → `OnTeardown`.
//! Hooks are async callables over the run's [`ExecutionContext`]; a sync
//! closure can be lifted with [`sync_hook`].
//!
//! A hook that fails is logged and swallowed so observability code can never
//! break a workflow. The one exception is the `OnError` slot: a failing
//! on-error hook aborts recovery and the original error is re-raised with the
//! hook failure chained onto it. On-error hooks may also *recover*: setting
//! `ctx.result` and clearing `ctx.error` makes a leaf action return the
//! recovered value. When several on-error hooks are registered they run in
//! registration order over the same context, so later hooks observe earlier
//! mutations and the last hook's state wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::action::ActionError;
use crate::context::ExecutionContext;
use crate::runtime::ConsoleSink;

/// The five lifecycle slots, in firing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    Before,
    OnSuccess,
    OnError,
    After,
    OnTeardown,
}

impl HookType {
    /// All slots, in firing order.
    pub const ALL: &'static [HookType] = &[
        Self::Before,
        Self::OnSuccess,
        Self::OnError,
        Self::After,
        Self::OnTeardown,
    ];
}

impl std::fmt::Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Before => "before",
            Self::OnSuccess => "on_success",
            Self::OnError => "on_error",
            Self::After => "after",
            Self::OnTeardown => "on_teardown",
        };
        f.write_str(label)
    }
}

/// Error raised by a hook body.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HookError {
    #[error("{0}")]
    Failure(String),
    /// Raised by [`CircuitBreaker`] while its window is open.
    #[error("circuit open for '{name}' for another {remaining:?}")]
    CircuitOpen { name: String, remaining: Duration },
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        HookError::Failure(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        HookError::Failure(message.to_string())
    }
}

/// An async lifecycle hook.
pub type Hook =
    Arc<dyn for<'a> Fn(&'a mut ExecutionContext) -> BoxFuture<'a, Result<(), HookError>> + Send + Sync>;

/// Lift a synchronous closure into a [`Hook`].
pub fn sync_hook<F>(f: F) -> Hook
where
    F: Fn(&mut ExecutionContext) -> Result<(), HookError> + Send + Sync + 'static,
{
    Arc::new(
        move |ctx: &mut ExecutionContext| -> BoxFuture<'_, Result<(), HookError>> {
            let outcome = f(ctx);
            Box::pin(async move { outcome })
        },
    )
}

#[derive(Clone)]
struct RegisteredHook {
    name: String,
    hook: Hook,
}

/// Stores hooks per slot and fires them in registration order.
pub struct HookManager {
    slots: RwLock<HashMap<HookType, Vec<RegisteredHook>>>,
}

impl HookManager {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Append a hook to a slot.
    pub fn register(&self, slot: HookType, hook: Hook) {
        self.register_named(slot, "hook", hook);
    }

    /// Append a hook with a label used in failure log lines.
    pub fn register_named(&self, slot: HookType, name: impl Into<String>, hook: Hook) {
        self.slots
            .write()
            .expect("hook registry lock poisoned")
            .entry(slot)
            .or_default()
            .push(RegisteredHook {
                name: name.into(),
                hook,
            });
    }

    /// Drop hooks for one slot, or all of them.
    pub fn clear(&self, slot: Option<HookType>) {
        let mut slots = self.slots.write().expect("hook registry lock poisoned");
        match slot {
            Some(slot) => {
                slots.remove(&slot);
            }
            None => slots.clear(),
        }
    }

    pub fn count(&self, slot: HookType) -> usize {
        self.slots
            .read()
            .expect("hook registry lock poisoned")
            .get(&slot)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn snapshot(&self, slot: HookType) -> Vec<RegisteredHook> {
        self.slots
            .read()
            .expect("hook registry lock poisoned")
            .get(&slot)
            .cloned()
            .unwrap_or_default()
    }

    /// Fire a non-error slot. Hook failures are logged and swallowed.
    pub async fn trigger(&self, slot: HookType, ctx: &mut ExecutionContext) {
        for registered in self.snapshot(slot) {
            if let Err(hook_error) = (registered.hook)(ctx).await {
                warn!(
                    hook = %registered.name,
                    slot = %slot,
                    action = %ctx.name,
                    error = %hook_error,
                    "hook raised during lifecycle slot",
                );
            }
        }
    }

    /// Fire the on-error slot. A failing hook aborts the pass and the
    /// original context error is returned with the hook failure chained.
    pub async fn trigger_on_error(&self, ctx: &mut ExecutionContext) -> Result<(), ActionError> {
        for registered in self.snapshot(HookType::OnError) {
            if let Err(hook_error) = (registered.hook)(ctx).await {
                warn!(
                    hook = %registered.name,
                    slot = %HookType::OnError,
                    action = %ctx.name,
                    error = %hook_error,
                    "on_error hook raised; re-raising original error",
                );
                let original = ctx.error.clone().unwrap_or_else(|| {
                    ActionError::failure(format!(
                        "[{}] on_error hook ran without a recorded error",
                        ctx.name
                    ))
                });
                return Err(ActionError::OnErrorHookFailed {
                    original: Box::new(original),
                    hook: registered.name.clone(),
                    cause: hook_error.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for HookManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read().expect("hook registry lock poisoned");
        let mut dbg = f.debug_struct("HookManager");
        for slot in HookType::ALL {
            if let Some(hooks) = slots.get(slot) {
                dbg.field(
                    &slot.to_string(),
                    &hooks.iter().map(|h| h.name.clone()).collect::<Vec<_>>(),
                );
            }
        }
        dbg.finish()
    }
}

/// Register the standard debug logging hooks on a manager: one per slot,
/// each emitting a `tracing` event with the node name and outcome.
pub fn register_debug_hooks(hooks: &HookManager) {
    hooks.register_named(
        HookType::Before,
        "debug_before",
        sync_hook(|ctx| {
            debug!(action = %ctx.name, args = ?ctx.args, kwargs = ?ctx.kwargs, "starting");
            Ok(())
        }),
    );
    hooks.register_named(
        HookType::OnSuccess,
        "debug_on_success",
        sync_hook(|ctx| {
            debug!(action = %ctx.name, result = ?ctx.result, "succeeded");
            Ok(())
        }),
    );
    hooks.register_named(
        HookType::OnError,
        "debug_on_error",
        sync_hook(|ctx| {
            if let Some(err) = &ctx.error {
                debug!(action = %ctx.name, error = %err, "failed");
            }
            Ok(())
        }),
    );
    hooks.register_named(
        HookType::After,
        "debug_after",
        sync_hook(|ctx| {
            let duration = ctx.duration().map(|d| d.as_secs_f64());
            debug!(action = %ctx.name, duration_s = ?duration, "finished");
            Ok(())
        }),
    );
    hooks.register_named(
        HookType::OnTeardown,
        "debug_on_teardown",
        sync_hook(|ctx| {
            debug!(action = %ctx.name, "teardown");
            Ok(())
        }),
    );
}

/// On-success hook that prints a one-line completion message through a
/// console sink. An optional formatter replaces the default `{:?}` rendering
/// of the result.
pub struct ResultReporter {
    formatter: Option<Arc<dyn Fn(&Value) -> String + Send + Sync>>,
    console: Arc<dyn ConsoleSink>,
}

impl ResultReporter {
    pub fn new(console: Arc<dyn ConsoleSink>) -> Self {
        Self {
            formatter: None,
            console,
        }
    }

    pub fn with_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(&Value) -> String + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(formatter));
        self
    }

    /// Turn the reporter into a hook for the `OnSuccess` slot.
    pub fn into_hook(self) -> Hook {
        let ResultReporter { formatter, console } = self;
        sync_hook(move |ctx| {
            if let Some(result) = &ctx.result {
                let text = match &formatter {
                    Some(f) => f(result),
                    None => format!("{result:?}"),
                };
                let duration = ctx
                    .duration()
                    .map(|d| format!("{:.3}s", d.as_secs_f64()))
                    .unwrap_or_else(|| "n/a".to_string());
                console.write_line(&format!("'{}' completed: {} in {}", ctx.name, text, duration));
            }
            Ok(())
        })
    }
}

struct BreakerState {
    failures: u32,
    open_until: Option<Instant>,
}

/// Consecutive-failure circuit breaker built from three hooks.
///
/// The error hook counts failures; at `max_failures` the circuit opens for
/// `reset_timeout` and the before hook raises [`HookError::CircuitOpen`]
/// until the window passes. A completed run resets the count. Callers that
/// want to gate execution outright consult [`CircuitBreaker::is_open`].
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, max_failures: u32, reset_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            max_failures,
            reset_timeout,
            state: Mutex::new(BreakerState {
                failures: 0,
                open_until: None,
            }),
        })
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock().expect("breaker lock poisoned");
        matches!(state.open_until, Some(until) if Instant::now() < until)
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.failures = 0;
        state.open_until = None;
        info!(breaker = %self.name, "circuit reset");
    }

    /// Register the breaker's before/error/after hooks on a manager.
    pub fn install(self: &Arc<Self>, hooks: &HookManager) {
        let breaker = self.clone();
        hooks.register_named(
            HookType::Before,
            "circuit_breaker_before",
            sync_hook(move |_ctx| breaker.before()),
        );
        let breaker = self.clone();
        hooks.register_named(
            HookType::OnError,
            "circuit_breaker_on_error",
            sync_hook(move |ctx| {
                breaker.record_failure(&ctx.name);
                Ok(())
            }),
        );
        let breaker = self.clone();
        hooks.register_named(
            HookType::After,
            "circuit_breaker_after",
            sync_hook(move |ctx| {
                if ctx.success() {
                    breaker.record_success();
                }
                Ok(())
            }),
        );
    }

    fn before(&self) -> Result<(), HookError> {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        if let Some(until) = state.open_until {
            let now = Instant::now();
            if now < until {
                return Err(HookError::CircuitOpen {
                    name: self.name.clone(),
                    remaining: until - now,
                });
            }
            info!(breaker = %self.name, "circuit closed again");
            state.failures = 0;
            state.open_until = None;
        }
        Ok(())
    }

    fn record_failure(&self, action: &str) {
        let mut state = self.state.lock().expect("breaker lock poisoned");
        state.failures += 1;
        warn!(
            breaker = %self.name,
            action = %action,
            failures = state.failures,
            max = self.max_failures,
            "circuit breaker failure",
        );
        if state.failures >= self.max_failures {
            state.open_until = Some(Instant::now() + self.reset_timeout);
            error!(breaker = %self.name, timeout = ?self.reset_timeout, "circuit opened");
        }
    }

    fn record_success(&self) {
        self.state.lock().expect("breaker lock poisoned").failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("test", Vec::new(), Map::new())
    }

    #[tokio::test]
    async fn hooks_fire_in_registration_order() {
        let hooks = HookManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = order.clone();
            hooks.register_named(
                HookType::Before,
                label,
                sync_hook(move |_| {
                    order.lock().unwrap().push(label);
                    Ok(())
                }),
            );
        }
        let mut ctx = ctx();
        hooks.trigger(HookType::Before, &mut ctx).await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn failing_before_hook_is_swallowed() {
        let hooks = HookManager::new();
        hooks.register(HookType::Before, sync_hook(|_| Err("boom".into())));
        let reached = Arc::new(Mutex::new(false));
        let flag = reached.clone();
        hooks.register(
            HookType::Before,
            sync_hook(move |_| {
                *flag.lock().unwrap() = true;
                Ok(())
            }),
        );
        let mut ctx = ctx();
        hooks.trigger(HookType::Before, &mut ctx).await;
        assert!(*reached.lock().unwrap());
    }

    #[tokio::test]
    async fn failing_on_error_hook_chains_original() {
        let hooks = HookManager::new();
        hooks.register_named(
            HookType::OnError,
            "broken",
            sync_hook(|_| Err("hook exploded".into())),
        );
        let mut ctx = ctx();
        ctx.error = Some(ActionError::failure("original failure"));
        let err = hooks.trigger_on_error(&mut ctx).await.unwrap_err();
        match err {
            ActionError::OnErrorHookFailed { original, hook, cause } => {
                assert_eq!(original.to_string(), "original failure");
                assert_eq!(hook, "broken");
                assert!(cause.contains("hook exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn last_on_error_hook_wins() {
        let hooks = HookManager::new();
        hooks.register(
            HookType::OnError,
            sync_hook(|ctx| {
                ctx.error = None;
                ctx.result = Some(serde_json::json!("recovered"));
                Ok(())
            }),
        );
        // The second hook sees the cleared context and overrides the result.
        hooks.register(
            HookType::OnError,
            sync_hook(|ctx| {
                assert!(ctx.error.is_none());
                ctx.result = Some(serde_json::json!("final"));
                Ok(())
            }),
        );
        let mut ctx = ctx();
        ctx.error = Some(ActionError::failure("boom"));
        hooks.trigger_on_error(&mut ctx).await.unwrap();
        assert!(ctx.error.is_none());
        assert_eq!(ctx.result, Some(serde_json::json!("final")));
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_max_failures() {
        let breaker = CircuitBreaker::new("guard", 2, Duration::from_secs(60));
        let hooks = HookManager::new();
        breaker.install(&hooks);

        let mut ctx = ctx();
        ctx.error = Some(ActionError::failure("boom"));
        let _ = hooks.trigger_on_error(&mut ctx).await;
        assert!(!breaker.is_open());
        let _ = hooks.trigger_on_error(&mut ctx).await;
        assert!(breaker.is_open());

        breaker.reset();
        assert!(!breaker.is_open());
    }
}
