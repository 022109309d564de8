//! # runbook-rs
//!
//! A composable, hook-driven action execution core for interactive CLI
//! workflow tools.
//!
//! The crate models work as **actions**: callable units with a uniform async
//! interface and a full lifecycle (before/success/error/after/teardown
//! hooks, timing, registry recording). Actions compose into sequential
//! chains with rollback and fallback recovery, concurrent groups with error
//! isolation, worker-pool offload, and runtime factories. A declarative
//! [`parser::CommandArgumentParser`] — whose argument values can themselves
//! be produced by actions — and the [`command::Command`] wrapper bind it all
//! to user-triggered keys.
//!
//! ## Building blocks
//!
//! - [`action`]: `Action`, `ChainedAction`, `ActionGroup`, `ProcessAction`,
//!   `ProcessPoolAction`, `ActionFactory`, `LiteralInputAction`,
//!   `FallbackAction`
//! - [`context`]: `Invocation`, `ExecutionContext`, `SharedContext`,
//!   `RunContext`
//! - [`hooks`]: `HookManager` and the five lifecycle slots
//! - [`registry`]: append-only execution history
//! - [`retry`]: declarative retry policies with backoff and jitter
//! - [`parser`]: the typed command argument parser
//! - [`command`]: key → action binding with confirmation and spinner policy
//! - [`runtime`] / [`options`]: collaborator seams (clock, worker pool,
//!   console, prompt) and namespaced options
//!
//! ## Example
//!
//! ```
//! use runbook_rs::prelude::*;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let chain = ChainedAction::new("greet")
//!     .with_auto_inject(true)
//!     .add_literal(json!("world"))
//!     .add_fn("hello", |inv| async move {
//!         let name = inv.kwargs.get("last_result").cloned().unwrap_or_default();
//!         Ok(json!(format!("hello {}", name.as_str().unwrap_or("?"))))
//!     });
//!
//! let result = chain
//!     .run(Invocation::default(), RunContext::default())
//!     .await
//!     .unwrap();
//! assert_eq!(result, json!("hello world"));
//! # });
//! ```

pub mod action;
pub mod command;
pub mod context;
pub mod hooks;
pub mod options;
pub mod parser;
pub mod registry;
pub mod retry;
pub mod runtime;

// Core re-exports
pub use action::{
    Action, ActionError, ActionFactory, ActionGroup, ActionRef, ActionResult, BaseAction,
    ChainedAction, FallbackAction, LiteralInputAction, ProcessAction, ProcessPoolAction,
    ProcessTask,
};
pub use command::{ArgMeta, Command, CommandBuilder, CommandError};
pub use context::{ExecutionContext, Invocation, RunContext, SharedContext};
pub use hooks::{Hook, HookError, HookManager, HookType, sync_hook};
pub use options::OptionsManager;
pub use parser::{
    Argument, ArgumentAction, ArgumentSpec, CommandArgumentParser, ConfigError, Nargs, ParseError,
    ValueType, coerce_value,
};
pub use registry::{ExecutionRegistry, Recorder};
pub use retry::{RetryHandler, RetryPolicy};
pub use runtime::{
    BlockingPool, Clock, ConsoleSink, PromptSink, StaticPrompt, StdoutConsole, TokioClock,
    WorkerPool,
};

/// Commonly used external type
pub use serde_json::Value as JsonValue;

/// Convenient re-exports for common types and traits
pub mod prelude {
    pub use crate::JsonValue;
    pub use crate::action::{
        Action, ActionError, ActionFactory, ActionGroup, ActionRef, ActionResult, BaseAction,
        ChainedAction, FallbackAction, LiteralInputAction, ProcessAction, ProcessPoolAction,
        ProcessTask,
    };
    pub use crate::command::{ArgMeta, Command, CommandBuilder, CommandError};
    pub use crate::context::{ExecutionContext, Invocation, RunContext, SharedContext};
    pub use crate::hooks::{Hook, HookError, HookManager, HookType, sync_hook};
    pub use crate::options::OptionsManager;
    pub use crate::parser::{
        Argument, ArgumentAction, ArgumentSpec, CommandArgumentParser, ConfigError, Nargs,
        ParseError, ValueType, coerce_value,
    };
    pub use crate::registry::{ExecutionRegistry, Recorder};
    pub use crate::retry::{RetryHandler, RetryPolicy};
    pub use crate::runtime::{
        BlockingPool, Clock, ConsoleSink, PromptSink, StaticPrompt, StdoutConsole, TokioClock,
        WorkerPool,
    };
}
