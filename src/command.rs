//! The command wrapper: binds a trigger key to an action, its parser, its
//! hooks, and the confirmation/spinner policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::action::{ActionError, ActionRef, BaseAction};
use crate::context::{ExecutionContext, Invocation, RunContext};
use crate::hooks::{HookManager, HookType, register_debug_hooks};
use crate::options::{CLI_ARGS, FORCE_CONFIRM, NEVER_PROMPT, OptionsManager, SKIP_CONFIRM};
use crate::parser::{
    ArgumentSpec, CommandArgumentParser, ConfigError, ParseError, ValueType,
};
use crate::runtime::{ConsoleSink, PromptError, PromptSink, StaticPrompt, StdoutConsole};
use crate::retry::RetryPolicy;

/// Opaque parser fallback: receives raw tokens, returns `(args, kwargs)`.
pub type CustomParser = Arc<
    dyn Fn(Vec<String>) -> Result<(Vec<Value>, Map<String, Value>), ParseError> + Send + Sync,
>;

/// Errors surfaced by command execution and parsing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    /// Non-error: the user declined the confirmation prompt.
    #[error("[{key}] cancelled by confirmation")]
    Cancelled { key: String },
    #[error(transparent)]
    Argument(#[from] ParseError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error("prompt failed: {0}")]
    Prompt(String),
}

impl CommandError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandError::Cancelled { .. })
    }
}

/// Per-dest overrides applied on top of inferred argument specs.
#[derive(Clone, Default)]
pub struct ArgMeta {
    pub help: Option<String>,
    pub choices: Option<Vec<Value>>,
    pub value_type: Option<ValueType>,
}

impl ArgMeta {
    pub fn help(help: impl Into<String>) -> Self {
        Self {
            help: Some(help.into()),
            ..Self::default()
        }
    }

    pub fn with_choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }
}

type ArgumentConfig = Box<dyn FnOnce(&mut CommandArgumentParser) -> Result<(), ConfigError> + Send>;

/// Builder for [`Command`]. Retry wiring and parser construction happen in
/// [`CommandBuilder::build`].
pub struct CommandBuilder {
    key: String,
    description: String,
    action: ActionRef,
    aliases: Vec<String>,
    help_text: String,
    help_epilog: String,
    tags: Vec<String>,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    confirm: bool,
    confirm_message: Option<String>,
    preview_before_confirm: bool,
    spinner: bool,
    spinner_message: String,
    retry: bool,
    retry_all: bool,
    retry_policy: RetryPolicy,
    logging_hooks: bool,
    arguments: Vec<ArgumentSpec>,
    argument_config: Option<ArgumentConfig>,
    custom_parser: Option<CustomParser>,
    auto_args: bool,
    arg_metadata: HashMap<String, ArgMeta>,
    options: Arc<OptionsManager>,
    prompt: Arc<dyn PromptSink>,
    console: Arc<dyn ConsoleSink>,
}

impl CommandBuilder {
    pub fn new<A: BaseAction + 'static>(
        key: impl Into<String>,
        description: impl Into<String>,
        action: A,
    ) -> Self {
        Self::from_arc(key, description, Arc::new(action))
    }

    pub fn from_arc(
        key: impl Into<String>,
        description: impl Into<String>,
        action: ActionRef,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            action,
            aliases: Vec::new(),
            help_text: String::new(),
            help_epilog: String::new(),
            tags: Vec::new(),
            args: Vec::new(),
            kwargs: Map::new(),
            confirm: false,
            confirm_message: None,
            preview_before_confirm: true,
            spinner: false,
            spinner_message: "Processing...".to_string(),
            retry: false,
            retry_all: false,
            retry_policy: RetryPolicy::default(),
            logging_hooks: false,
            arguments: Vec::new(),
            argument_config: None,
            custom_parser: None,
            auto_args: true,
            arg_metadata: HashMap::new(),
            options: Arc::new(OptionsManager::new()),
            prompt: Arc::new(StaticPrompt::always(true)),
            console: Arc::new(StdoutConsole),
        }
    }

    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn help_text(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = help_text.into();
        self
    }

    pub fn help_epilog(mut self, epilog: impl Into<String>) -> Self {
        self.help_epilog = epilog.into();
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Static arguments merged into every execution.
    pub fn static_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn static_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn confirm(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn confirm_message(mut self, message: impl Into<String>) -> Self {
        self.confirm_message = Some(message.into());
        self
    }

    pub fn preview_before_confirm(mut self, preview: bool) -> Self {
        self.preview_before_confirm = preview;
        self
    }

    pub fn spinner(mut self, spinner: bool) -> Self {
        self.spinner = spinner;
        self
    }

    pub fn spinner_message(mut self, message: impl Into<String>) -> Self {
        self.spinner_message = message.into();
        self
    }

    /// Enable retry on the wrapped leaf action.
    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// Enable retry on every leaf in the wrapped composite tree.
    pub fn retry_all(mut self, retry_all: bool) -> Self {
        self.retry_all = retry_all;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Attach the standard debug logging hooks to the action.
    pub fn logging_hooks(mut self, logging_hooks: bool) -> Self {
        self.logging_hooks = logging_hooks;
        self
    }

    /// Explicit argument declarations (overrides inference).
    pub fn arguments(mut self, arguments: Vec<ArgumentSpec>) -> Self {
        self.arguments = arguments;
        self
    }

    /// Configure the parser programmatically instead.
    pub fn argument_config<F>(mut self, config: F) -> Self
    where
        F: FnOnce(&mut CommandArgumentParser) -> Result<(), ConfigError> + Send + 'static,
    {
        self.argument_config = Some(Box::new(config));
        self
    }

    /// Replace the parser entirely with an opaque callable.
    pub fn custom_parser(mut self, parser: CustomParser) -> Self {
        self.custom_parser = Some(parser);
        self
    }

    pub fn auto_args(mut self, auto_args: bool) -> Self {
        self.auto_args = auto_args;
        self
    }

    /// Overlay help/choices/type onto inferred arguments, keyed by dest.
    pub fn arg_metadata(mut self, metadata: HashMap<String, ArgMeta>) -> Self {
        self.arg_metadata = metadata;
        self
    }

    pub fn options(mut self, options: Arc<OptionsManager>) -> Self {
        self.options = options;
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn PromptSink>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    pub fn build(self) -> Result<Command, ConfigError> {
        let Self {
            key,
            description,
            action,
            aliases,
            help_text,
            help_epilog,
            tags,
            args,
            kwargs,
            confirm,
            confirm_message,
            preview_before_confirm,
            spinner,
            spinner_message,
            retry,
            retry_all,
            mut retry_policy,
            logging_hooks,
            arguments,
            argument_config,
            custom_parser,
            auto_args,
            arg_metadata,
            options,
            prompt,
            console,
        } = self;

        if retry || retry_policy.enabled {
            let mut policy = retry_policy.clone();
            policy.enable();
            if !action.enable_retry_policy(policy) {
                warn!(command = %key, "retry requested, but action is not a retryable leaf");
            }
        }
        if retry_all {
            retry_policy.enable();
            action.enable_retries_recursively(&retry_policy);
        }
        if logging_hooks {
            register_debug_hooks(action.hooks());
        }

        let parser = if custom_parser.is_some() {
            None
        } else {
            let mut parser = CommandArgumentParser::for_command(key.clone(), description.clone())
                .with_help_text(help_text.clone())
                .with_epilog(help_epilog.clone())
                .with_aliases(aliases.clone());
            if !arguments.is_empty() {
                for spec in arguments {
                    parser.add_argument(spec)?;
                }
            } else if let Some(config) = argument_config {
                config(&mut parser)?;
            } else if auto_args {
                if let Some(specs) = action.infer_arguments() {
                    for spec in specs {
                        parser.add_argument(apply_metadata(spec, &arg_metadata))?;
                    }
                }
            }
            Some(parser)
        };

        Ok(Command {
            key,
            description,
            aliases,
            help_text,
            tags,
            action,
            args,
            kwargs,
            confirm,
            confirm_message,
            preview_before_confirm,
            spinner,
            spinner_message,
            retry_policy,
            hooks: HookManager::new(),
            parser,
            custom_parser,
            options,
            prompt,
            console,
            last_context: Mutex::new(None),
        })
    }
}

/// Overlay user-provided metadata on an inferred spec.
fn apply_metadata(mut spec: ArgumentSpec, metadata: &HashMap<String, ArgMeta>) -> ArgumentSpec {
    let hint = spec.dest.clone().unwrap_or_else(|| {
        spec.flags
            .iter()
            .find(|flag| flag.starts_with("--"))
            .or_else(|| spec.flags.first())
            .map(|flag| flag.trim_start_matches('-').replace('-', "_").to_lowercase())
            .unwrap_or_default()
    });
    if let Some(meta) = metadata.get(&hint) {
        if let Some(help) = &meta.help {
            spec = spec.help(help.clone());
        }
        if let Some(choices) = &meta.choices {
            spec = spec.choices(choices.clone());
        }
        if let Some(value_type) = &meta.value_type {
            spec = spec.value_type(value_type.clone());
        }
    }
    spec
}

/// A selectable unit of work: key + action + parser + policies.
///
/// Execution runs the full hook lifecycle around the wrapped action,
/// honoring confirmation gating through the options manager
/// (`never_prompt` / `skip_confirm` / `force_confirm` in the `cli_args`
/// namespace) and recording its own execution context in the registry.
pub struct Command {
    pub key: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub help_text: String,
    pub tags: Vec<String>,
    action: ActionRef,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
    confirm: bool,
    confirm_message: Option<String>,
    preview_before_confirm: bool,
    spinner: bool,
    spinner_message: String,
    retry_policy: RetryPolicy,
    pub hooks: HookManager,
    parser: Option<CommandArgumentParser>,
    custom_parser: Option<CustomParser>,
    options: Arc<OptionsManager>,
    prompt: Arc<dyn PromptSink>,
    console: Arc<dyn ConsoleSink>,
    last_context: Mutex<Option<ExecutionContext>>,
}

impl Command {
    pub fn builder<A: BaseAction + 'static>(
        key: impl Into<String>,
        description: impl Into<String>,
        action: A,
    ) -> CommandBuilder {
        CommandBuilder::new(key, description, action)
    }

    pub fn action(&self) -> &ActionRef {
        &self.action
    }

    pub fn options(&self) -> &Arc<OptionsManager> {
        &self.options
    }

    pub fn arg_parser(&self) -> Option<&CommandArgumentParser> {
        self.parser.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Last executed context's result.
    pub fn result(&self) -> Option<Value> {
        self.last_context
            .lock()
            .expect("command context lock poisoned")
            .as_ref()
            .and_then(|ctx| ctx.result.clone())
    }

    pub fn last_context(&self) -> Option<ExecutionContext> {
        self.last_context
            .lock()
            .expect("command context lock poisoned")
            .clone()
    }

    fn should_confirm(&self) -> bool {
        if self.options.get_bool(NEVER_PROMPT, CLI_ARGS)
            || self.options.get_bool(SKIP_CONFIRM, CLI_ARGS)
            || self.action.never_prompt()
        {
            return false;
        }
        self.confirm || self.options.get_bool(FORCE_CONFIRM, CLI_ARGS)
    }

    /// The confirmation message shown before execution.
    pub fn confirmation_prompt(&self) -> String {
        if let Some(message) = &self.confirm_message {
            return message.clone();
        }
        let mut prompt = format!(
            "Confirm execution of {} — {} (calls `{}`)",
            self.key,
            self.description,
            self.action.name()
        );
        if !self.args.is_empty() || !self.kwargs.is_empty() {
            prompt.push_str(&format!(
                " with args={:?}, kwargs={:?}",
                self.args, self.kwargs
            ));
        }
        prompt
    }

    /// Run the command with the full lifecycle: confirmation, hooks, spinner
    /// policy, execution, and registry recording.
    pub async fn execute(&self, invocation: Invocation) -> Result<Value, CommandError> {
        self.execute_with(invocation, RunContext::default()).await
    }

    pub async fn execute_with(
        &self,
        invocation: Invocation,
        run: RunContext,
    ) -> Result<Value, CommandError> {
        let run = run.with_options(self.options.clone());
        let Invocation { args, kwargs } = invocation;
        let mut combined_args = args;
        combined_args.extend(self.args.iter().cloned());
        let mut combined_kwargs = self.kwargs.clone();
        for (key, value) in kwargs {
            combined_kwargs.insert(key, value);
        }

        if self.should_confirm() {
            if self.preview_before_confirm {
                self.preview().await;
            }
            match self.prompt.confirm(&self.confirmation_prompt()).await {
                Ok(true) => {}
                Ok(false) => {
                    info!(command = %self.key, "cancelled by user");
                    return Err(CommandError::Cancelled {
                        key: self.key.clone(),
                    });
                }
                Err(PromptError::Interrupted) => {
                    return Err(CommandError::Cancelled {
                        key: self.key.clone(),
                    });
                }
                Err(prompt_error) => return Err(CommandError::Prompt(prompt_error.to_string())),
            }
        }

        let mut ctx = ExecutionContext::new(
            self.description.clone(),
            combined_args.clone(),
            combined_kwargs.clone(),
        );
        ctx.start_timer(run.clock.as_ref());
        self.hooks.trigger(HookType::Before, &mut ctx).await;

        if self.spinner {
            debug!(command = %self.key, message = %self.spinner_message, "spinner active");
        }
        let outcome = match self
            .action
            .run(
                Invocation {
                    args: combined_args,
                    kwargs: combined_kwargs,
                },
                run.clone(),
            )
            .await
        {
            Ok(value) => {
                ctx.result = Some(value.clone());
                self.hooks.trigger(HookType::OnSuccess, &mut ctx).await;
                Ok(value)
            }
            Err(action_error) => {
                ctx.error = Some(action_error.clone());
                match self.hooks.trigger_on_error(&mut ctx).await {
                    Err(chained) => Err(chained),
                    Ok(()) => Err(action_error),
                }
            }
        };

        ctx.stop_timer(run.clock.as_ref());
        self.hooks.trigger(HookType::After, &mut ctx).await;
        self.hooks.trigger(HookType::OnTeardown, &mut ctx).await;
        match &outcome {
            Ok(value) => {
                ctx.error = None;
                if ctx.result.is_none() {
                    ctx.result = Some(value.clone());
                }
            }
            Err(action_error) => {
                ctx.result = None;
                if ctx.error.is_none() {
                    ctx.error = Some(action_error.clone());
                }
            }
        }
        run.recorder.record(ctx.clone());
        *self
            .last_context
            .lock()
            .expect("command context lock poisoned") = Some(ctx);
        outcome.map_err(CommandError::from)
    }

    /// Parse raw tokens into `(args, kwargs)` through the configured parser.
    pub async fn parse_args(
        &self,
        tokens: &[String],
    ) -> Result<(Vec<Value>, Map<String, Value>), CommandError> {
        if let Some(custom) = &self.custom_parser {
            return custom(tokens.to_vec()).map_err(CommandError::from);
        }
        match &self.parser {
            Some(parser) => parser
                .parse_args_split(tokens)
                .await
                .map_err(CommandError::from),
            None => {
                warn!(command = %self.key, "no argument parser configured");
                Ok((Vec::new(), Map::new()))
            }
        }
    }

    /// Parse a shell-style line (quoting rules apply) and split it.
    pub async fn parse_raw(
        &self,
        line: &str,
    ) -> Result<(Vec<Value>, Map<String, Value>), CommandError> {
        match shell_words::split(line) {
            Ok(tokens) => self.parse_args(&tokens).await,
            Err(split_error) => {
                warn!(command = %self.key, error = %split_error, "failed to split arguments");
                Ok((Vec::new(), Map::new()))
            }
        }
    }

    /// Validation-only parse: lazy resolvers are skipped.
    pub async fn validate_args(&self, tokens: &[String]) -> Result<(), CommandError> {
        if let Some(parser) = &self.parser {
            parser.parse_args_for_validation(tokens).await?;
        }
        Ok(())
    }

    /// Parse a line and execute with the result.
    pub async fn run_line(&self, line: &str) -> Result<Value, CommandError> {
        let (args, kwargs) = self.parse_raw(line).await?;
        self.execute(Invocation { args, kwargs }).await
    }

    /// One-line usage text for listings.
    pub fn usage(&self) -> String {
        match &self.parser {
            Some(parser) => parser.get_usage(),
            None => "No arguments defined.".to_string(),
        }
    }

    /// Render the help block; returns whether anything was shown.
    pub fn show_help(&self) -> bool {
        match &self.parser {
            Some(parser) => {
                parser.render_help(self.console.as_ref());
                true
            }
            None => false,
        }
    }

    /// Write the action preview tree through the console sink.
    pub async fn preview(&self) {
        self.console
            .write_line(&format!("Command: '{}' — {}", self.key, self.description));
        let mut lines = Vec::new();
        self.action.preview_into(1, &mut lines).await;
        for line in &lines {
            self.console.write_line(line);
        }
        if !self.help_text.is_empty() {
            self.console.write_line(&format!("  {}", self.help_text));
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("key", &self.key)
            .field("description", &self.description)
            .field("action", &self.action.name())
            .finish_non_exhaustive()
    }
}
