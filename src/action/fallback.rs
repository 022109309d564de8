//! Recovery leaf consumed by the chain fallback protocol.

use async_trait::async_trait;
use serde_json::Value;

use crate::action::{ActionResult, BaseAction, LAST_RESULT_KEY};
use crate::context::{ExecutionContext, RunContext};
use crate::hooks::HookManager;

/// Provides a default when the previous step failed or produced null.
///
/// The action injects the chain's last result and passes it through
/// unchanged when it is non-null; otherwise it returns the configured
/// fallback value. Placed directly after a fallible step in a
/// [`ChainedAction`](crate::action::ChainedAction), it consumes exactly one
/// error and lets the chain continue with its output as the new last result.
pub struct FallbackAction {
    name: String,
    hooks: HookManager,
    fallback: Value,
}

impl FallbackAction {
    pub fn new(fallback: impl Into<Value>) -> Self {
        Self {
            name: "fallback".to_string(),
            hooks: HookManager::new(),
            fallback: fallback.into(),
        }
    }

    pub fn fallback(&self) -> &Value {
        &self.fallback
    }
}

#[async_trait]
impl BaseAction for FallbackAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    fn inject_last_result(&self) -> bool {
        true
    }

    fn is_fallback(&self) -> bool {
        true
    }

    async fn invoke(&self, ctx: &mut ExecutionContext, _run: &RunContext) -> ActionResult<Value> {
        let last = ctx.kwargs.get(LAST_RESULT_KEY).cloned().unwrap_or(Value::Null);
        if last.is_null() {
            Ok(self.fallback.clone())
        } else {
            Ok(last)
        }
    }

    fn preview_label(&self) -> String {
        format!("Fallback (uses fallback = {})", self.fallback)
    }
}

impl std::fmt::Debug for FallbackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackAction")
            .field("fallback", &self.fallback)
            .finish()
    }
}
