//! Append-only execution history.
//!
//! Every finished action run records its [`ExecutionContext`] through a
//! [`Recorder`] handle. Handles are cheap to clone and are threaded through
//! [`crate::context::RunContext`], so tests and embedders can isolate their
//! history; [`ExecutionRegistry`] is the process-wide convenience built on
//! the global handle.
//!
//! Recorded contexts are shared read-only: consumers get `Arc` clones and
//! never mutate them.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::runtime::ConsoleSink;

#[derive(Default)]
struct Store {
    all: Vec<Arc<ExecutionContext>>,
    by_name: HashMap<String, Vec<Arc<ExecutionContext>>>,
}

/// Cloneable handle onto one execution history.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<RwLock<Store>>,
}

impl Recorder {
    /// A fresh, empty history. Useful for tests and embedded runs that
    /// should not share the process-wide log.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
        }
    }

    /// The process-wide history all default run contexts report to.
    pub fn global() -> Recorder {
        static GLOBAL: OnceLock<Recorder> = OnceLock::new();
        GLOBAL.get_or_init(Recorder::new).clone()
    }

    /// Append a finished context. The context is frozen from here on.
    pub fn record(&self, ctx: ExecutionContext) {
        debug!("{}", ctx.to_log_line());
        let ctx = Arc::new(ctx);
        let mut store = self.write();
        store
            .by_name
            .entry(ctx.name.clone())
            .or_default()
            .push(ctx.clone());
        store.all.push(ctx);
    }

    pub fn get_all(&self) -> Vec<Arc<ExecutionContext>> {
        self.read().all.clone()
    }

    pub fn get_by_name(&self, name: &str) -> Vec<Arc<ExecutionContext>> {
        self.read().by_name.get(name).cloned().unwrap_or_default()
    }

    pub fn get_latest(&self) -> Option<Arc<ExecutionContext>> {
        self.read().all.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.read().all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().all.is_empty()
    }

    pub fn clear(&self) {
        let mut store = self.write();
        store.all.clear();
        store.by_name.clear();
    }

    /// Plain-text history table: one line per record with name, start, end,
    /// duration, status, and the result or exception.
    pub fn summary_lines(&self) -> Vec<String> {
        fn wall(ts: Option<DateTime<Utc>>) -> String {
            ts.map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "n/a".to_string())
        }

        let mut lines = vec![format!(
            "{:<24} {:>8} {:>8} {:>10}  {:<6} {}",
            "Name", "Start", "End", "Duration", "Status", "Result / Exception"
        )];
        for ctx in self.get_all() {
            let duration = ctx
                .duration()
                .map(|d| format!("{:.3}s", d.as_secs_f64()))
                .unwrap_or_else(|| "n/a".to_string());
            let outcome = match &ctx.error {
                Some(error) => error.to_string(),
                None => {
                    let mut text = format!("{:?}", ctx.result);
                    if text.len() > 1000 {
                        text.truncate(1000);
                        text.push_str("...");
                    }
                    text
                }
            };
            lines.push(format!(
                "{:<24} {:>8} {:>8} {:>10}  {:<6} {}",
                ctx.name,
                wall(ctx.start_wall),
                wall(ctx.end_wall),
                duration,
                ctx.status(),
                outcome
            ));
        }
        lines
    }

    /// Render [`Recorder::summary_lines`] through a console sink.
    pub fn render_summary(&self, console: &dyn ConsoleSink) {
        for line in self.summary_lines() {
            console.write_line(&line);
        }
    }

    /// An action that prints the execution summary, for wiring a "history"
    /// entry into a menu.
    pub fn summary_action(&self, console: Arc<dyn ConsoleSink>) -> crate::action::Action {
        let recorder = self.clone();
        crate::action::Action::from_sync("view_execution_history", move |_| {
            recorder.render_summary(console.as_ref());
            Ok(serde_json::Value::Null)
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Store> {
        self.store.read().expect("registry lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Store> {
        self.store.write().expect("registry lock poisoned")
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("records", &self.len())
            .finish()
    }
}

/// Process-wide registry facade over [`Recorder::global`].
pub struct ExecutionRegistry;

impl ExecutionRegistry {
    pub fn record(ctx: ExecutionContext) {
        Recorder::global().record(ctx);
    }

    pub fn get_all() -> Vec<Arc<ExecutionContext>> {
        Recorder::global().get_all()
    }

    pub fn get_by_name(name: &str) -> Vec<Arc<ExecutionContext>> {
        Recorder::global().get_by_name(name)
    }

    pub fn get_latest() -> Option<Arc<ExecutionContext>> {
        Recorder::global().get_latest()
    }

    pub fn clear() {
        Recorder::global().clear();
    }

    pub fn summary_lines() -> Vec<String> {
        Recorder::global().summary_lines()
    }
}
