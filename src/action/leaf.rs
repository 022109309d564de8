//! The function leaf: wraps an async (or lifted sync) callable into a
//! standard executable unit with static arguments, optional rollback and
//! retry support.

use std::future::Future;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use crate::action::{ActionResult, BaseAction};
use crate::context::{BodyFn, ExecutionContext, Invocation, RetryTarget, RunContext};
use crate::hooks::{HookManager, HookType};
use crate::parser::ArgumentSpec;
use crate::retry::{RetryHandler, RetryPolicy};

/// Wraps a function into a standard executable unit.
///
/// Positional arguments compose as `received + static`; keyword arguments as
/// `static ⊕ received` with the received side winning. With
/// `inject_last_result` enabled the enclosing composite's last result
/// arrives under [`inject_into`](BaseAction::inject_into).
pub struct Action {
    name: String,
    hooks: HookManager,
    body: BodyFn,
    rollback: Option<BodyFn>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    inject_last_result: bool,
    inject_into: String,
    retry_policy: Arc<RwLock<RetryPolicy>>,
    arguments: Vec<ArgumentSpec>,
}

impl Action {
    /// Wrap an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<Value>> + Send + 'static,
    {
        let body: BodyFn = Arc::new(move |invocation| Box::pin(body(invocation)));
        Self::from_body(name, body)
    }

    /// Wrap a synchronous closure into the async body shape.
    pub fn from_sync<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Invocation) -> ActionResult<Value> + Send + Sync + 'static,
    {
        let body: BodyFn = Arc::new(move |invocation| {
            let outcome = body(invocation);
            Box::pin(async move { outcome })
        });
        Self::from_body(name, body)
    }

    fn from_body(name: impl Into<String>, body: BodyFn) -> Self {
        Self {
            name: name.into(),
            hooks: HookManager::new(),
            body,
            rollback: None,
            args: Vec::new(),
            kwargs: Map::new(),
            inject_last_result: false,
            inject_into: super::LAST_RESULT_KEY.to_string(),
            retry_policy: Arc::new(RwLock::new(RetryPolicy::default())),
            arguments: Vec::new(),
        }
    }

    /// Static positional arguments appended to every invocation.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Static keyword arguments; received kwargs override them.
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Attach an undo handler invoked by chain rollback.
    pub fn with_rollback<F, Fut>(mut self, rollback: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult<Value>> + Send + 'static,
    {
        self.rollback = Some(Arc::new(move |invocation| Box::pin(rollback(invocation))));
        self
    }

    /// Enable last-result injection.
    pub fn with_inject_last_result(mut self, inject: bool) -> Self {
        self.inject_last_result = inject;
        self
    }

    /// Change the kwarg key injection uses.
    pub fn with_inject_into(mut self, key: impl Into<String>) -> Self {
        self.inject_into = key.into();
        self
    }

    /// Declare the argument specs commands infer a parser from.
    pub fn with_arguments(mut self, arguments: Vec<ArgumentSpec>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Install a policy; retry is enabled immediately when the policy is.
    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        let enabled = policy.enabled;
        *self.retry_policy.write().expect("retry policy lock poisoned") = policy;
        if enabled {
            self.enable_retry();
        }
        self
    }

    /// Enable retry with the current policy and register the handler hook.
    pub fn with_retry(self, retry: bool) -> Self {
        if retry {
            self.enable_retry();
        }
        self
    }

    /// Enable the policy and register the retry handler on the error slot.
    pub fn enable_retry(&self) {
        self.retry_policy
            .write()
            .expect("retry policy lock poisoned")
            .enable();
        debug!(action = %self.name, "registering retry handler");
        let handler = RetryHandler::new(self.retry_policy.clone());
        self.hooks
            .register_named(HookType::OnError, "retry", handler.into_hook());
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
            .read()
            .expect("retry policy lock poisoned")
            .clone()
    }

    pub(crate) fn body(&self) -> BodyFn {
        self.body.clone()
    }
}

#[async_trait]
impl BaseAction for Action {
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

    fn allows_recovery(&self) -> bool {
        true
    }

    fn merge_invocation(&self, invocation: Invocation) -> Invocation {
        let Invocation { mut args, kwargs } = invocation;
        args.extend(self.args.iter().cloned());
        let mut combined = self.kwargs.clone();
        for (key, value) in kwargs {
            combined.insert(key, value);
        }
        Invocation {
            args,
            kwargs: combined,
        }
    }

    fn seed_context(&self, ctx: &mut ExecutionContext, _run: &RunContext) {
        ctx.retry_target = Some(RetryTarget {
            body: self.body.clone(),
            retryable: true,
        });
    }

    async fn invoke(&self, ctx: &mut ExecutionContext, _run: &RunContext) -> ActionResult<Value> {
        let invocation = Invocation {
            args: ctx.args.clone(),
            kwargs: ctx.kwargs.clone(),
        };
        (self.body)(invocation).await
    }

    fn rollback_handler(&self) -> Option<BodyFn> {
        self.rollback.clone()
    }

    fn enable_retry_policy(&self, policy: RetryPolicy) -> bool {
        *self.retry_policy.write().expect("retry policy lock poisoned") = policy;
        self.enable_retry();
        true
    }

    fn enable_retries_recursively(&self, policy: &RetryPolicy) {
        self.enable_retry_policy(policy.clone());
    }

    fn infer_arguments(&self) -> Option<Vec<ArgumentSpec>> {
        if self.arguments.is_empty() {
            None
        } else {
            Some(self.arguments.clone())
        }
    }

    fn preview_label(&self) -> String {
        let mut label = format!("Action '{}'", self.name);
        if self.inject_last_result {
            label.push_str(&format!(" (injects '{}')", self.inject_into));
        }
        let policy = self.retry_policy();
        if policy.enabled {
            label.push_str(&format!(
                " [retries: {}x, delay {:.1}s, backoff {:.1}x]",
                policy.max_retries,
                policy.delay.as_secs_f64(),
                policy.backoff
            ));
        }
        label
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("retry", &self.retry_policy().enabled)
            .field("rollback", &self.rollback.is_some())
            .finish_non_exhaustive()
    }
}
