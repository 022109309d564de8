//! Off-loop execution through a worker pool.
//!
//! Blocking or CPU-bound bodies must not stall the cooperative scheduler,
//! so these actions dispatch them through the [`WorkerPool`] seam (the
//! default pool runs them on blocking threads). Values injected across the
//! pool boundary are checked for serializability first, so a failure is
//! reported clearly instead of surfacing from deep inside a worker.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value, json};

use crate::action::{ActionError, ActionResult, BaseAction, ensure_serializable};
use crate::context::{BodyFn, ExecutionContext, Invocation, RetryTarget, RunContext, SharedContext};
use crate::hooks::HookManager;
use crate::runtime::{BlockingPool, WorkerPool};

type SyncBody = Arc<dyn Fn(Invocation) -> ActionResult<Value> + Send + Sync>;

/// Runs one blocking function on the worker pool, with the same merge and
/// injection semantics as [`Action`](crate::action::Action).
pub struct ProcessAction {
    name: String,
    hooks: HookManager,
    body: SyncBody,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    pool: Arc<dyn WorkerPool>,
    inject_last_result: bool,
    inject_into: String,
}

impl ProcessAction {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Invocation) -> ActionResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            hooks: HookManager::new(),
            body: Arc::new(body),
            args: Vec::new(),
            kwargs: Map::new(),
            pool: Arc::new(BlockingPool),
            inject_last_result: false,
            inject_into: super::LAST_RESULT_KEY.to_string(),
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

    /// Substitute the worker pool (e.g. a real process pool).
    pub fn with_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = pool;
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

    fn pooled_body(&self) -> BodyFn {
        let pool = self.pool.clone();
        let body = self.body.clone();
        Arc::new(move |invocation| {
            let pool = pool.clone();
            let body = body.clone();
            Box::pin(async move { pool.submit(Box::new(move || body(invocation))).await })
        })
    }
}

#[async_trait]
impl BaseAction for ProcessAction {
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
            body: self.pooled_body(),
            retryable: true,
        });
    }

    async fn invoke(&self, ctx: &mut ExecutionContext, run: &RunContext) -> ActionResult<Value> {
        if self.inject_last_result {
            if let Some(shared) = &run.shared {
                let last = shared.last_result().unwrap_or(Value::Null);
                ensure_serializable(&self.name, &last)?;
            }
        }
        let invocation = Invocation {
            args: ctx.args.clone(),
            kwargs: ctx.kwargs.clone(),
        };
        let body = self.body.clone();
        self.pool
            .submit(Box::new(move || body(invocation)))
            .await
    }

    fn preview_label(&self) -> String {
        let mut label = format!("ProcessAction (worker pool) '{}'", self.name);
        if self.inject_last_result {
            label.push_str(&format!(" (injects '{}')", self.inject_into));
        }
        label
    }
}

impl std::fmt::Debug for ProcessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessAction")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// One unit of work for a [`ProcessPoolAction`].
#[derive(Clone)]
pub struct ProcessTask {
    name: String,
    body: SyncBody,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
}

impl ProcessTask {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Invocation) -> ActionResult<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(body),
            args: Vec::new(),
            kwargs: Map::new(),
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

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ProcessTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessTask")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Fans a list of tasks out over the worker pool and gathers results.
///
/// Per-task failures stay in the result list as `{"task", "error"}` entries;
/// they are never merged into a raise, so callers always see the outcome of
/// every task.
pub struct ProcessPoolAction {
    name: String,
    hooks: HookManager,
    tasks: Vec<ProcessTask>,
    pool: Arc<dyn WorkerPool>,
    inject_last_result: bool,
    inject_into: String,
}

impl ProcessPoolAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: HookManager::new(),
            tasks: Vec::new(),
            pool: Arc::new(BlockingPool),
            inject_last_result: false,
            inject_into: super::LAST_RESULT_KEY.to_string(),
        }
    }

    pub fn add_task(mut self, task: ProcessTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn with_pool(mut self, pool: Arc<dyn WorkerPool>) -> Self {
        self.pool = pool;
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

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl BaseAction for ProcessPoolAction {
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

    fn seed_context(&self, ctx: &mut ExecutionContext, run: &RunContext) {
        let shared = SharedContext::parallel(self.name.clone());
        if let Some(parent) = &run.shared {
            shared.set_shared_result(parent.last_result().unwrap_or(Value::Null));
        }
        ctx.shared = Some(Arc::new(shared));
    }

    async fn invoke(&self, ctx: &mut ExecutionContext, run: &RunContext) -> ActionResult<Value> {
        if self.tasks.is_empty() {
            return Err(ActionError::EmptyPool(self.name.clone()));
        }
        if self.inject_last_result {
            if let Some(parent) = &run.shared {
                let last = parent.last_result().unwrap_or(Value::Null);
                ensure_serializable(&self.name, &last)?;
            }
        }

        let outcomes = join_all(self.tasks.iter().map(|task| {
            let mut args = ctx.args.clone();
            args.extend(task.args.iter().cloned());
            let mut kwargs = ctx.kwargs.clone();
            for (key, value) in &task.kwargs {
                kwargs.insert(key.clone(), value.clone());
            }
            let invocation = Invocation { args, kwargs };
            let body = task.body.clone();
            let pool = self.pool.clone();
            let name = task.name.clone();
            async move {
                let outcome = pool.submit(Box::new(move || body(invocation))).await;
                (name, outcome)
            }
        }))
        .await;

        let results: Vec<Value> = outcomes
            .into_iter()
            .map(|(name, outcome)| match outcome {
                Ok(value) => json!({ "task": name, "result": value }),
                Err(task_error) => json!({ "task": name, "error": task_error.to_string() }),
            })
            .collect();
        Ok(Value::Array(results))
    }

    async fn preview_into(&self, depth: usize, out: &mut Vec<String>) {
        out.push(format!("{}{}", "  ".repeat(depth), self.preview_label()));
        for task in &self.tasks {
            out.push(format!("{}- task '{}'", "  ".repeat(depth + 1), task.name));
        }
    }

    fn preview_label(&self) -> String {
        let mut label = format!("ProcessPoolAction '{}'", self.name);
        if self.inject_last_result {
            label.push_str(&format!(" (receives '{}')", self.inject_into));
        }
        label
    }
}

impl std::fmt::Debug for ProcessPoolAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPoolAction")
            .field("name", &self.name)
            .field(
                "tasks",
                &self.tasks.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}
