//! Builds and immediately runs a dynamically produced action.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use crate::action::{ActionRef, ActionResult, BaseAction};
use crate::context::{ExecutionContext, Invocation, RunContext};
use crate::hooks::HookManager;
use crate::parser::ArgumentSpec;

/// Factory callable: receives the invocation and produces a fresh action.
pub type FactoryFn =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, ActionResult<ActionRef>> + Send + Sync>;

/// Creates another action at call time and runs it in place.
///
/// Useful when the shape of the next step depends on runtime values. The
/// generated action inherits the enclosing shared context and options; its
/// run records its own execution context, while the factory records under
/// `"<name> (factory)"`.
pub struct ActionFactory {
    name: String,
    hooks: HookManager,
    factory: FactoryFn,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    inject_last_result: bool,
    inject_into: String,
    preview_invocation: Invocation,
    arguments: Vec<ArgumentSpec>,
}

impl ActionFactory {
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<ActionRef>> + Send + 'static,
    {
        Self {
            name: name.into(),
            hooks: HookManager::new(),
            factory: Arc::new(move |invocation| Box::pin(factory(invocation))),
            args: Vec::new(),
            kwargs: Map::new(),
            inject_last_result: false,
            inject_into: super::LAST_RESULT_KEY.to_string(),
            preview_invocation: Invocation::default(),
            arguments: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_inject_last_result(mut self, inject: bool) -> Self {
        self.inject_last_result = inject;
        self
    }

    pub fn with_inject_into(mut self, key: impl Into<String>) -> Self {
        self.inject_into = key.into();
        self
    }

    /// Invocation used when previewing the generated action.
    pub fn with_preview_invocation(mut self, invocation: Invocation) -> Self {
        self.preview_invocation = invocation;
        self
    }

    /// Declare the argument specs commands infer a parser from.
    pub fn with_arguments(mut self, arguments: Vec<ArgumentSpec>) -> Self {
        self.arguments = arguments;
        self
    }
}

#[async_trait]
impl BaseAction for ActionFactory {
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

    fn context_name(&self) -> String {
        format!("{} (factory)", self.name)
    }

    fn merge_invocation(&self, invocation: Invocation) -> Invocation {
        let Invocation { args, kwargs } = invocation;
        let mut combined_args = self.args.clone();
        combined_args.extend(args);
        let mut combined_kwargs = self.kwargs.clone();
        for (key, value) in kwargs {
            combined_kwargs.insert(key, value);
        }
        Invocation {
            args: combined_args,
            kwargs: combined_kwargs,
        }
    }

    async fn invoke(&self, ctx: &mut ExecutionContext, run: &RunContext) -> ActionResult<Value> {
        let invocation = Invocation {
            args: ctx.args.clone(),
            kwargs: ctx.kwargs.clone(),
        };
        let generated = (self.factory)(invocation).await?;
        debug!(factory = %self.name, generated = %generated.name(), "running generated action");
        // The generated action inherits the enclosing shared context and
        // options through the same run handle.
        generated.run(Invocation::default(), run.clone()).await
    }

    fn infer_arguments(&self) -> Option<Vec<ArgumentSpec>> {
        if self.arguments.is_empty() {
            None
        } else {
            Some(self.arguments.clone())
        }
    }

    async fn preview_into(&self, depth: usize, out: &mut Vec<String>) {
        out.push(format!("{}{}", "  ".repeat(depth), self.preview_label()));
        match (self.factory)(self.preview_invocation.clone()).await {
            Ok(generated) => generated.preview_into(depth + 1, out).await,
            Err(preview_error) => out.push(format!(
                "{}preview failed: {preview_error}",
                "  ".repeat(depth + 1)
            )),
        }
    }

    fn preview_label(&self) -> String {
        format!("ActionFactory '{}'", self.name)
    }
}

impl std::fmt::Debug for ActionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
