//! Collaborator seams: clock, worker pool, console and prompt sinks.
//!
//! The core never talks to the OS directly for timing, blocking work, or
//! terminal I/O; it goes through these traits so hosts can substitute their
//! own implementations and tests can fake them. Each trait ships a default:
//! [`TokioClock`], [`BlockingPool`], [`StdoutConsole`], [`StaticPrompt`].

use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::action::ActionError;

/// Monotonic time and sleeping. All timing in the crate goes through a
/// clock so tests can observe and control it.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic offset from an arbitrary fixed epoch.
    fn monotonic(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Default clock backed by `std::time::Instant` and `tokio::time::sleep`.
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn monotonic(&self) -> Duration {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A unit of blocking work submitted to a [`WorkerPool`].
pub type WorkerTask = Box<dyn FnOnce() -> Result<Value, ActionError> + Send + 'static>;

/// Off-loop execution seam used by the process actions. The default keeps
/// the cooperative scheduler responsive by running tasks on the blocking
/// thread pool; hosts needing real process isolation substitute their own.
#[async_trait]
pub trait WorkerPool: Send + Sync {
    async fn submit(&self, task: WorkerTask) -> Result<Value, ActionError>;
}

/// Default pool backed by `tokio::task::spawn_blocking`.
pub struct BlockingPool;

#[async_trait]
impl WorkerPool for BlockingPool {
    async fn submit(&self, task: WorkerTask) -> Result<Value, ActionError> {
        match tokio::task::spawn_blocking(task).await {
            Ok(outcome) => outcome,
            Err(join_error) => Err(ActionError::failure(format!(
                "worker task aborted: {join_error}"
            ))),
        }
    }
}

/// Plain-text output sink for help, previews and summaries. Implementations
/// must not be relied on for color or markup support.
pub trait ConsoleSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Default console writing to stdout.
pub struct StdoutConsole;

impl ConsoleSink for StdoutConsole {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PromptError {
    /// The user aborted the prompt (Ctrl-C or equivalent).
    #[error("prompt interrupted")]
    Interrupted,
    #[error("{0}")]
    Failure(String),
}

/// Async user prompt, used by confirmation and input-style leaves. May
/// return [`PromptError::Interrupted`] to signal a user abort.
#[async_trait]
pub trait PromptSink: Send + Sync {
    /// Free-form prompt returning the raw answer.
    async fn prompt(&self, message: &str) -> Result<String, PromptError>;

    /// Yes/no question built on [`PromptSink::prompt`].
    async fn confirm(&self, message: &str) -> Result<bool, PromptError> {
        let answer = self.prompt(message).await?;
        Ok(matches!(
            answer.trim().to_lowercase().as_str(),
            "y" | "yes" | "true" | "1"
        ))
    }
}

/// Scripted prompt for tests and headless runs: answers from a queue, then
/// falls back to a fixed default.
pub struct StaticPrompt {
    answers: Mutex<VecDeque<String>>,
    fallback: String,
}

impl StaticPrompt {
    pub fn always(answer: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            fallback: if answer { "y" } else { "n" }.to_string(),
        }
    }

    pub fn sequence<I, S>(answers: I, fallback: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            fallback: fallback.into(),
        }
    }
}

#[async_trait]
impl PromptSink for StaticPrompt {
    async fn prompt(&self, _message: &str) -> Result<String, PromptError> {
        let next = self
            .answers
            .lock()
            .expect("prompt lock poisoned")
            .pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}
