//! Execution state threaded through action runs.
//!
//! Three kinds of context cooperate here:
//!
//! - [`Invocation`]: the positional/keyword payload an action is called with.
//! - [`ExecutionContext`]: the per-node record of one run (arguments, result,
//!   error, timing, extras). It is recorded into the registry when the run
//!   finishes and is considered immutable afterwards.
//! - [`SharedContext`]: the per-composite scratchpad a chain or group threads
//!   through its children (ordered results, errors, current index, and the
//!   shared upstream result in parallel mode).
//!
//! [`RunContext`] is the explicit handle passed along with every invocation:
//! it carries the enclosing shared context, the options manager, the recorder
//! the run reports to, and the clock used for timing and sleeps.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::action::ActionError;
use crate::options::OptionsManager;
use crate::registry::Recorder;
use crate::runtime::{Clock, TokioClock};

/// The payload an action is invoked with: positional arguments plus a
/// keyword-argument map. Both sides carry [`Value`]s so heterogeneous data
/// can flow through a workflow without a schema.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl Invocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an invocation from positional arguments only.
    pub fn with_args(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }

    /// Build an invocation from keyword arguments only.
    pub fn with_kwargs(kwargs: Map<String, Value>) -> Self {
        Self {
            args: Vec::new(),
            kwargs,
        }
    }

    /// Append a positional argument (builder style).
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Insert a keyword argument (builder style).
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

/// An async body re-invokable by recovery hooks. Leaf actions store one of
/// these on their execution context so an on-error hook (the retry handler)
/// can call the body again with the recorded arguments.
pub type BodyFn =
    Arc<dyn Fn(Invocation) -> BoxFuture<'static, Result<Value, ActionError>> + Send + Sync>;

/// Back-pointer from an [`ExecutionContext`] to the leaf body that produced
/// it. Only leaf actions set this; composites leave it empty so recovery
/// hooks know there is nothing to re-invoke.
#[derive(Clone)]
pub struct RetryTarget {
    pub body: BodyFn,
    pub retryable: bool,
}

impl std::fmt::Debug for RetryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryTarget")
            .field("retryable", &self.retryable)
            .finish_non_exhaustive()
    }
}

/// Per-invocation record of a single action run.
///
/// Created when the action is entered, filled in as the lifecycle advances,
/// and appended to the registry once teardown hooks have fired. Exactly one
/// of `result` / `error` is set on a recorded context.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub name: String,
    /// Unique id for correlating log lines from one run.
    pub execution_id: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub result: Option<Value>,
    pub error: Option<ActionError>,
    /// Monotonic timestamps taken from the run's [`Clock`].
    pub start_time: Option<Duration>,
    pub end_time: Option<Duration>,
    pub start_wall: Option<DateTime<Utc>>,
    pub end_wall: Option<DateTime<Utc>>,
    /// Free-form extras composites use to expose per-child results/errors.
    pub extra: Map<String, Value>,
    /// The shared context this run participated in, if any.
    pub shared: Option<Arc<SharedContext>>,
    /// Leaf body back-pointer for on-error recovery hooks.
    pub retry_target: Option<RetryTarget>,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            execution_id: Uuid::new_v4().to_string(),
            args,
            kwargs,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
            start_wall: None,
            end_wall: None,
            extra: Map::new(),
            shared: None,
            retry_target: None,
        }
    }

    pub fn start_timer(&mut self, clock: &dyn Clock) {
        self.start_wall = Some(Utc::now());
        self.start_time = Some(clock.monotonic());
    }

    pub fn stop_timer(&mut self, clock: &dyn Clock) {
        self.end_time = Some(clock.monotonic());
        self.end_wall = Some(Utc::now());
    }

    /// Elapsed time between start and stop, if the timer ran.
    pub fn duration(&self) -> Option<Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn status(&self) -> &'static str {
        if self.success() { "OK" } else { "ERROR" }
    }

    /// Structured flat-line format for logging and metrics.
    pub fn to_log_line(&self) -> String {
        let duration = self
            .duration()
            .map(|d| format!("{:.3}s", d.as_secs_f64()))
            .unwrap_or_else(|| "n/a".to_string());
        let outcome = match &self.error {
            Some(error) => format!("exception={error}"),
            None => format!("result={:?}", self.result),
        };
        format!(
            "[{}] status={} duration={} {}",
            self.name,
            self.status(),
            duration,
            outcome
        )
    }
}

#[derive(Default)]
struct SharedState {
    results: Vec<Value>,
    errors: Vec<(usize, ActionError)>,
    current_index: Option<usize>,
    shared_result: Option<Value>,
}

/// Scratchpad a composite threads through its children for the duration of
/// one `_run`.
///
/// Sequential composites append each child result and advance
/// `current_index`; parallel composites expose the upstream last result to
/// every child through `shared_result`. Children observe snapshots through
/// the accessors; they never hold the lock across an await.
pub struct SharedContext {
    name: String,
    is_parallel: bool,
    state: Mutex<SharedState>,
    slots: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl SharedContext {
    pub fn sequential(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_parallel: false,
            state: Mutex::new(SharedState::default()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn parallel(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_parallel: true,
            state: Mutex::new(SharedState::default()),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_parallel(&self) -> bool {
        self.is_parallel
    }

    pub fn add_result(&self, result: Value) {
        self.lock().results.push(result);
    }

    /// Seed the upstream result every child of a parallel composite sees.
    pub fn set_shared_result(&self, result: Value) {
        let mut state = self.lock();
        state.shared_result = Some(result.clone());
        if self.is_parallel {
            state.results.push(result);
        }
    }

    /// The value `last_result` injection resolves to: the shared upstream
    /// result in parallel mode, the most recent child result otherwise.
    pub fn last_result(&self) -> Option<Value> {
        let state = self.lock();
        if self.is_parallel {
            state.shared_result.clone()
        } else {
            state.results.last().cloned()
        }
    }

    pub fn add_error(&self, index: usize, error: ActionError) {
        self.lock().errors.push((index, error));
    }

    pub fn set_current_index(&self, index: usize) {
        self.lock().current_index = Some(index);
    }

    /// Index of the child currently executing; `None` before the first.
    pub fn current_index(&self) -> Option<usize> {
        self.lock().current_index
    }

    pub fn results(&self) -> Vec<Value> {
        self.lock().results.clone()
    }

    pub fn errors(&self) -> Vec<(usize, ActionError)> {
        self.lock().errors.clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.lock().errors.is_empty()
    }

    /// Store a sibling-visible resource (a shared session, a file handle)
    /// under a string key.
    pub fn insert_slot(&self, key: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.slots.lock().expect("slot lock poisoned").insert(key.into(), value);
    }

    /// Fetch a typed resource slot, if present and of the requested type.
    pub fn get_slot<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.slots
            .lock()
            .expect("slot lock poisoned")
            .get(key)
            .cloned()
            .and_then(|slot| slot.downcast::<T>().ok())
    }

    pub fn remove_slot(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.slots.lock().expect("slot lock poisoned").remove(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.state.lock().expect("shared context lock poisoned")
    }
}

impl std::fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SharedContext")
            .field("name", &self.name)
            .field("is_parallel", &self.is_parallel)
            .field("results", &state.results.len())
            .field("errors", &state.errors.len())
            .field("current_index", &state.current_index)
            .finish()
    }
}

/// Everything an action needs from its caller besides the invocation itself.
///
/// Composites hand children a copy with `shared` replaced by the scratchpad
/// they created; top-level callers use [`RunContext::default`], which reports
/// to the process-wide registry and uses the tokio clock.
#[derive(Clone)]
pub struct RunContext {
    pub shared: Option<Arc<SharedContext>>,
    pub options: Option<Arc<OptionsManager>>,
    pub recorder: Recorder,
    pub clock: Arc<dyn Clock>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            shared: None,
            options: None,
            recorder: Recorder::global(),
            clock: Arc::new(TokioClock),
        }
    }
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(mut self, options: Arc<OptionsManager>) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The context a composite passes to a child: same recorder, options and
    /// clock, with the composite's scratchpad attached.
    pub fn child(&self, shared: Arc<SharedContext>) -> Self {
        let mut ctx = self.clone();
        ctx.shared = Some(shared);
        ctx
    }

    /// Last result visible through the attached shared context, if any.
    pub fn last_result(&self) -> Option<Value> {
        self.shared.as_ref().and_then(|shared| shared.last_result())
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("shared", &self.shared)
            .field("has_options", &self.options.is_some())
            .finish_non_exhaustive()
    }
}
