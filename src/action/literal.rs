//! Constant-producing leaf used to embed values mid-chain.

use async_trait::async_trait;
use serde_json::Value;

use crate::action::{ActionResult, BaseAction};
use crate::context::{ExecutionContext, RunContext};
use crate::hooks::HookManager;

/// Injects a static value into a chain: the body returns the value
/// unchanged, so downstream steps can pick it up as their last result.
pub struct LiteralInputAction {
    name: String,
    hooks: HookManager,
    value: Value,
}

impl LiteralInputAction {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            name: "input".to_string(),
            hooks: HookManager::new(),
            value: value.into(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

#[async_trait]
impl BaseAction for LiteralInputAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn hooks(&self) -> &HookManager {
        &self.hooks
    }

    async fn invoke(&self, _ctx: &mut ExecutionContext, _run: &RunContext) -> ActionResult<Value> {
        Ok(self.value.clone())
    }

    fn preview_label(&self) -> String {
        format!("LiteralInput (value = {})", self.value)
    }
}

impl std::fmt::Debug for LiteralInputAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiteralInputAction")
            .field("value", &self.value)
            .finish()
    }
}
