//! Declarative argument parsing for commands.
//!
//! Not a general argparse: a deterministic, typed parser specialized for
//! single-command workflows. Arguments are registered eagerly (every
//! combination is validated at registration time), tokens are parsed in one
//! left-to-right walk with POSIX bundling expansion, and argument values can
//! be produced by running an action (`ArgumentAction::Action`): the
//! resolver's return value is stored verbatim.
//!
//! Parsing never partially commits: any error surfaces before the result map
//! is handed back. Help is a non-error signal
//! ([`ParseError::HelpRequested`]) callers distinguish from real failures.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::context::{Invocation, RunContext};
use crate::runtime::ConsoleSink;

mod argument;
mod coerce;

#[cfg(test)]
mod tests;

pub use argument::{Argument, ArgumentAction, ArgumentSpec, Nargs};
pub use coerce::{CoerceError, ValueType, coerce_value};

/// Registration-time failures. These indicate a programming error in the
/// command definition and are never caught by the core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("no flags provided")]
    NoFlags,
    #[error("flag '{0}' must be at least 3 characters long")]
    LongFlagTooShort(String),
    #[error("flag '{0}' must be a single character or start with '--'")]
    BadShortFlag(String),
    #[error("positional arguments cannot have multiple flags")]
    PositionalFlagCount,
    #[error("dest '{0}' must be a valid identifier (letters, digits, and underscores only)")]
    InvalidDest(String),
    #[error("dest '{0}' must not start with a digit")]
    DestStartsWithDigit(String),
    #[error("destination '{0}' is already defined; define a unique dest for each argument")]
    DuplicateDest(String),
    #[error("flag '{flag}' is already used by argument '{dest}'")]
    DuplicateFlag { flag: String, dest: String },
    #[error("action '{0}' cannot be used with positional arguments")]
    ActionNotPositional(ArgumentAction),
    #[error("store_bool_optional requires exactly one '--' flag")]
    BoolOptionalFlags,
    #[error("nargs cannot be specified for {0} actions")]
    NargsNotAllowed(ArgumentAction),
    #[error("nargs must be a positive integer")]
    NonPositiveNargs,
    #[error("invalid choice {choice}: not coercible to {expected}: {reason}")]
    BadChoice {
        choice: Value,
        expected: String,
        reason: String,
    },
    #[error("default value {default} for '{dest}' cannot be coerced to {expected}: {reason}")]
    BadDefault {
        default: Value,
        dest: String,
        expected: String,
        reason: String,
    },
    #[error("default value '{default}' not in allowed choices: {choices:?}")]
    DefaultNotInChoices { default: Value, choices: Vec<Value> },
    #[error("resolver must be provided for action arguments")]
    ResolverRequired,
    #[error("resolver should not be provided for action {0}")]
    ResolverNotAllowed(ArgumentAction),
}

/// Parse-time failures surfaced to the caller, plus the help signal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    /// Non-error: the user asked for help. Callers render help and stop.
    #[error("help requested")]
    HelpRequested,
    #[error("unrecognized option '{token}'. Did you mean one of: {}?", .suggestions.join(", "))]
    UnknownOptionSuggest {
        token: String,
        suggestions: Vec<String>,
    },
    #[error("unrecognized option '{token}'. Use --help to see available options")]
    UnknownOption { token: String },
    #[error("invalid value for '{dest}': {reason}")]
    InvalidValue { dest: String, reason: String },
    #[error("argument '{dest}' requires a value. {details}")]
    MissingValue { dest: String, details: String },
    #[error("expected at least one value for '{0}'")]
    ExpectedValue(String),
    #[error("missing required argument '{dest}'{details}")]
    MissingRequired { dest: String, details: String },
    #[error("invalid value for '{dest}': must be one of {{{choices}}}")]
    InvalidChoice { dest: String, choices: String },
    #[error("invalid number of values for '{dest}': {details}")]
    CountMismatch { dest: String, details: String },
    #[error("unexpected positional arguments: {tokens}")]
    ExtraPositionals { count: usize, tokens: String },
    #[error("[{dest}] action failed: {reason}")]
    ResolverFailed { dest: String, reason: String },
}

impl ParseError {
    /// Whether this is the help signal rather than a real failure.
    pub fn is_help(&self) -> bool {
        matches!(self, ParseError::HelpRequested)
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Typed, deterministic argument parser for one command.
///
/// Arguments are kept in registration order for rendering, in a flag map for
/// lookup, and in positional/keyword lists for parsing. A `--help/-h`
/// argument is registered automatically.
pub struct CommandArgumentParser {
    command_key: String,
    command_description: String,
    help_text: String,
    help_epilog: String,
    aliases: Vec<String>,
    arguments: Vec<Arc<Argument>>,
    flag_map: HashMap<String, Arc<Argument>>,
    keyword: HashMap<String, Arc<Argument>>,
    keyword_list: Vec<Arc<Argument>>,
    positional: Vec<Arc<Argument>>,
    dest_set: HashSet<String>,
}

impl CommandArgumentParser {
    pub fn new() -> Self {
        Self::for_command("", "")
    }

    pub fn for_command(key: impl Into<String>, description: impl Into<String>) -> Self {
        let mut parser = Self {
            command_key: key.into(),
            command_description: description.into(),
            help_text: String::new(),
            help_epilog: String::new(),
            aliases: Vec::new(),
            arguments: Vec::new(),
            flag_map: HashMap::new(),
            keyword: HashMap::new(),
            keyword_list: Vec::new(),
            positional: Vec::new(),
            dest_set: HashSet::new(),
        };
        parser
            .add_argument(
                ArgumentSpec::new(["-h", "--help"])
                    .action(ArgumentAction::Help)
                    .dest("help")
                    .help("Show this help message."),
            )
            .expect("help argument registration cannot fail");
        parser
    }

    pub fn with_help_text(mut self, help_text: impl Into<String>) -> Self {
        self.help_text = help_text.into();
        self
    }

    pub fn with_epilog(mut self, epilog: impl Into<String>) -> Self {
        self.help_epilog = epilog.into();
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn command_key(&self) -> &str {
        &self.command_key
    }

    pub fn arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().map(Arc::as_ref)
    }

    pub fn get_argument(&self, dest: &str) -> Option<&Argument> {
        self.arguments
            .iter()
            .find(|arg| arg.dest == dest)
            .map(Arc::as_ref)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register an argument, validating the whole combination eagerly.
    pub fn add_argument(&mut self, spec: ArgumentSpec) -> Result<(), ConfigError> {
        let ArgumentSpec {
            flags,
            action,
            nargs,
            default,
            value_type,
            choices,
            required,
            help,
            dest,
            resolver,
            lazy_resolver,
        } = spec;

        Self::validate_flags(&flags)?;
        let positional = Self::is_positional(&flags)?;
        let dest = Self::derive_dest(&flags, dest)?;
        if self.dest_set.contains(&dest) {
            return Err(ConfigError::DuplicateDest(dest));
        }
        Self::validate_action(action, positional)?;
        if action == ArgumentAction::StoreBoolOptional
            && (flags.len() != 1 || !flags[0].starts_with("--"))
        {
            return Err(ConfigError::BoolOptionalFlags);
        }
        match (action, &resolver) {
            (ArgumentAction::Action, None) => return Err(ConfigError::ResolverRequired),
            (ArgumentAction::Action, Some(_)) => {}
            (other, Some(_)) => return Err(ConfigError::ResolverNotAllowed(other)),
            (_, None) => {}
        }
        let nargs = Self::validate_nargs(nargs, action)?;
        let default = Self::resolve_default(default, action, nargs);
        if matches!(
            action,
            ArgumentAction::Store | ArgumentAction::Append | ArgumentAction::Extend
        ) && !default.is_null()
        {
            Self::validate_default(&default, &value_type, &dest)?;
        }
        let choices = Self::normalize_choices(choices, &value_type)?;
        if !default.is_null() && !choices.is_empty() {
            let members = |value: &Value| choices.contains(value);
            let ok = match &default {
                Value::Array(items) => items.iter().all(members),
                scalar => members(scalar),
            };
            if !ok {
                return Err(ConfigError::DefaultNotInChoices {
                    default: default.clone(),
                    choices: choices.clone(),
                });
            }
        }
        let required = Self::determine_required(required, positional, nargs);

        let negative_flag = (action == ArgumentAction::StoreBoolOptional)
            .then(|| format!("--no-{}", flags[0].trim_start_matches('-')));

        let argument = Arc::new(Argument {
            flags: flags.clone(),
            dest: dest.clone(),
            action,
            value_type,
            default,
            choices,
            required,
            help,
            nargs,
            positional,
            resolver,
            lazy_resolver,
        });

        let mut all_flags: Vec<String> = Vec::new();
        if !positional {
            all_flags.extend(flags.iter().cloned());
            all_flags.extend(negative_flag.clone());
        }
        for flag in &all_flags {
            if let Some(existing) = self.flag_map.get(flag) {
                return Err(ConfigError::DuplicateFlag {
                    flag: flag.clone(),
                    dest: existing.dest.clone(),
                });
            }
        }
        for flag in &all_flags {
            self.flag_map.insert(flag.clone(), argument.clone());
            self.keyword.insert(flag.clone(), argument.clone());
        }
        self.dest_set.insert(dest.clone());
        self.arguments.push(argument.clone());
        if positional {
            self.positional.push(argument);
        } else {
            self.keyword_list.push(argument);
        }
        Ok(())
    }

    fn validate_flags(flags: &[String]) -> Result<(), ConfigError> {
        if flags.is_empty() {
            return Err(ConfigError::NoFlags);
        }
        for flag in flags {
            if flag.starts_with("--") && flag.len() < 3 {
                return Err(ConfigError::LongFlagTooShort(flag.clone()));
            }
            if flag.starts_with('-') && !flag.starts_with("--") && flag.len() > 2 {
                return Err(ConfigError::BadShortFlag(flag.clone()));
            }
        }
        Ok(())
    }

    fn is_positional(flags: &[String]) -> Result<bool, ConfigError> {
        let positional = flags.iter().any(|flag| !flag.starts_with('-'));
        if positional && flags.len() > 1 {
            return Err(ConfigError::PositionalFlagCount);
        }
        Ok(positional)
    }

    fn derive_dest(flags: &[String], explicit: Option<String>) -> Result<String, ConfigError> {
        let raw = match explicit {
            Some(dest) => dest,
            None => {
                let mut derived: Option<&String> = None;
                for flag in flags {
                    if flag.starts_with("--") {
                        derived = Some(flag);
                        break;
                    }
                    derived = Some(flag);
                }
                derived
                    .map(|flag| flag.trim_start_matches('-').to_string())
                    .ok_or(ConfigError::NoFlags)?
            }
        };
        let dest = raw.replace('-', "_").to_lowercase();
        if dest.is_empty() || !dest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::InvalidDest(dest));
        }
        if dest.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ConfigError::DestStartsWithDigit(dest));
        }
        Ok(dest)
    }

    fn validate_action(action: ArgumentAction, positional: bool) -> Result<(), ConfigError> {
        if positional
            && matches!(
                action,
                ArgumentAction::StoreTrue
                    | ArgumentAction::StoreFalse
                    | ArgumentAction::StoreBoolOptional
                    | ArgumentAction::Count
                    | ArgumentAction::Help
            )
        {
            return Err(ConfigError::ActionNotPositional(action));
        }
        Ok(())
    }

    fn validate_nargs(
        nargs: Option<Nargs>,
        action: ArgumentAction,
    ) -> Result<Option<Nargs>, ConfigError> {
        if action.forbids_nargs() {
            return match nargs {
                Some(_) => Err(ConfigError::NargsNotAllowed(action)),
                None => Ok(None),
            };
        }
        if let Some(Nargs::Exact(0)) = nargs {
            return Err(ConfigError::NonPositiveNargs);
        }
        Ok(nargs)
    }

    fn resolve_default(default: Option<Value>, action: ArgumentAction, nargs: Option<Nargs>) -> Value {
        if let Some(value) = default {
            return value;
        }
        match action {
            ArgumentAction::StoreTrue => Value::Bool(false),
            ArgumentAction::StoreFalse => Value::Bool(true),
            ArgumentAction::StoreBoolOptional => Value::Null,
            ArgumentAction::Count => Value::from(0),
            ArgumentAction::Append | ArgumentAction::Extend => Value::Array(Vec::new()),
            _ => match nargs {
                Some(Nargs::Exact(_)) | Some(Nargs::OneOrMore) | Some(Nargs::ZeroOrMore) => {
                    Value::Array(Vec::new())
                }
                _ => Value::Null,
            },
        }
    }

    fn validate_default(
        default: &Value,
        value_type: &ValueType,
        dest: &str,
    ) -> Result<(), ConfigError> {
        let check = |value: &Value| {
            coerce_value(value, value_type).map(|_| ()).map_err(|error| {
                ConfigError::BadDefault {
                    default: default.clone(),
                    dest: dest.to_string(),
                    expected: value_type.type_name(),
                    reason: error.to_string(),
                }
            })
        };
        match default {
            Value::Array(items) => items.iter().try_for_each(check),
            scalar => check(scalar),
        }
    }

    fn normalize_choices(
        choices: Option<Vec<Value>>,
        value_type: &ValueType,
    ) -> Result<Vec<Value>, ConfigError> {
        let Some(choices) = choices else {
            return Ok(Vec::new());
        };
        choices
            .into_iter()
            .map(|choice| {
                coerce_value(&choice, value_type).map_err(|error| ConfigError::BadChoice {
                    choice,
                    expected: value_type.type_name(),
                    reason: error.to_string(),
                })
            })
            .collect()
    }

    fn determine_required(explicit: Option<bool>, positional: bool, nargs: Option<Nargs>) -> bool {
        if let Some(required) = explicit {
            if required {
                return true;
            }
            if !positional {
                return false;
            }
        }
        if positional {
            return match nargs {
                None | Some(Nargs::Exact(_)) | Some(Nargs::OneOrMore) => true,
                Some(Nargs::Optional) | Some(Nargs::ZeroOrMore) => false,
            };
        }
        false
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    /// Parse a token list into a dest → value map.
    pub async fn parse_args(&self, tokens: &[String]) -> Result<Map<String, Value>, ParseError> {
        self.parse_args_inner(tokens, false).await
    }

    /// Validation-only parse: lazy resolvers are skipped and not required.
    pub async fn parse_args_for_validation(
        &self,
        tokens: &[String],
    ) -> Result<Map<String, Value>, ParseError> {
        self.parse_args_inner(tokens, true).await
    }

    /// Parse and split into positional values (declaration order) plus the
    /// keyword map.
    pub async fn parse_args_split(
        &self,
        tokens: &[String],
    ) -> Result<(Vec<Value>, Map<String, Value>), ParseError> {
        let mut parsed = self.parse_args(tokens).await?;
        let mut positional = Vec::new();
        let mut keywords = Map::new();
        for argument in &self.arguments {
            if argument.dest == "help" {
                continue;
            }
            let value = parsed.remove(&argument.dest).unwrap_or(Value::Null);
            if argument.positional {
                positional.push(value);
            } else {
                keywords.insert(argument.dest.clone(), value);
            }
        }
        Ok((positional, keywords))
    }

    async fn parse_args_inner(
        &self,
        input: &[String],
        from_validate: bool,
    ) -> Result<Map<String, Value>, ParseError> {
        let mut tokens: Vec<String> = input.to_vec();
        let mut result: HashMap<String, Value> = self
            .arguments
            .iter()
            .map(|arg| (arg.dest.clone(), arg.default.clone()))
            .collect();
        let mut consumed_positional: HashSet<usize> = HashSet::new();

        let mut i = 0;
        while i < tokens.len() {
            self.expand_posix_bundling(&mut tokens, i)?;
            i = self
                .handle_token(&tokens, i, &mut result, &mut consumed_positional, from_validate)
                .await?;
        }

        self.validate_result(&result, from_validate)?;

        let mut ordered = Map::new();
        for argument in &self.arguments {
            if argument.dest == "help" {
                continue;
            }
            if let Some(value) = result.remove(&argument.dest) {
                ordered.insert(argument.dest.clone(), value);
            }
        }
        Ok(ordered)
    }

    /// Expand `-abc` into `-a -b -c` in place. Every letter must be a
    /// registered short flag, otherwise the whole token is an error and
    /// nothing is consumed.
    fn expand_posix_bundling(&self, tokens: &mut Vec<String>, i: usize) -> Result<(), ParseError> {
        let token = tokens[i].clone();
        if !token.starts_with('-') || token.starts_with("--") || token.len() <= 2 {
            return Ok(());
        }
        if self.flag_map.contains_key(&token) {
            return Ok(());
        }
        let mut expanded = Vec::new();
        for ch in token.chars().skip(1) {
            let flag = format!("-{ch}");
            if !self.flag_map.contains_key(&flag) {
                return Err(self.unknown_option(&flag));
            }
            expanded.push(flag);
        }
        tokens.splice(i..=i, expanded);
        Ok(())
    }

    fn unknown_option(&self, token: &str) -> ParseError {
        let mut suggestions: Vec<String> = self
            .flag_map
            .keys()
            .filter(|flag| flag.starts_with(token))
            .cloned()
            .collect();
        suggestions.sort();
        if suggestions.is_empty() {
            ParseError::UnknownOption {
                token: token.to_string(),
            }
        } else {
            ParseError::UnknownOptionSuggest {
                token: token.to_string(),
                suggestions,
            }
        }
    }

    /// Consume values for `spec` starting at `start`, honoring its nargs.
    /// A token is a value as long as it is not a registered flag.
    fn consume_nargs(
        &self,
        tokens: &[String],
        start: usize,
        spec: &Argument,
    ) -> Result<(Vec<String>, usize), ParseError> {
        let mut i = start;
        match spec.nargs {
            Some(Nargs::Exact(n)) => {
                let end = (start + n).min(tokens.len());
                Ok((tokens[start..end].to_vec(), end))
            }
            Some(Nargs::OneOrMore) => {
                if i >= tokens.len() {
                    return Err(ParseError::ExpectedValue(spec.dest.clone()));
                }
                let mut values = Vec::new();
                while i < tokens.len() && !self.keyword.contains_key(&tokens[i]) {
                    values.push(tokens[i].clone());
                    i += 1;
                }
                if values.is_empty() {
                    return Err(ParseError::ExpectedValue(spec.dest.clone()));
                }
                Ok((values, i))
            }
            Some(Nargs::ZeroOrMore) => {
                let mut values = Vec::new();
                while i < tokens.len() && !self.keyword.contains_key(&tokens[i]) {
                    values.push(tokens[i].clone());
                    i += 1;
                }
                Ok((values, i))
            }
            Some(Nargs::Optional) | None => {
                if i < tokens.len() && !self.keyword.contains_key(&tokens[i]) {
                    Ok((vec![tokens[i].clone()], i + 1))
                } else {
                    Ok((Vec::new(), i))
                }
            }
        }
    }

    fn coerce_all(&self, values: &[String], spec: &Argument) -> Result<Vec<Value>, ParseError> {
        values
            .iter()
            .map(|raw| {
                coerce_value(&Value::String(raw.clone()), &spec.value_type).map_err(|error| {
                    ParseError::InvalidValue {
                        dest: spec.dest.clone(),
                        reason: error.to_string(),
                    }
                })
            })
            .collect()
    }

    async fn run_resolver(
        &self,
        spec: &Argument,
        values: Vec<Value>,
    ) -> Result<Value, ParseError> {
        let resolver = spec
            .resolver
            .as_ref()
            .ok_or_else(|| ParseError::ResolverFailed {
                dest: spec.dest.clone(),
                reason: "no resolver configured".to_string(),
            })?;
        resolver
            .run(Invocation::with_args(values), RunContext::default())
            .await
            .map_err(|error| ParseError::ResolverFailed {
                dest: spec.dest.clone(),
                reason: error.to_string(),
            })
    }

    async fn handle_token(
        &self,
        tokens: &[String],
        i: usize,
        result: &mut HashMap<String, Value>,
        consumed_positional: &mut HashSet<usize>,
        from_validate: bool,
    ) -> Result<usize, ParseError> {
        let token = tokens[i].clone();
        if let Some(spec) = self.keyword.get(&token).cloned() {
            return self
                .handle_flagged(&token, tokens, i, &spec, result, from_validate)
                .await;
        }
        if token.starts_with('-') {
            return Err(self.unknown_option(&token));
        }
        // Positional tail: everything up to the next known flag.
        let mut end = tokens.len();
        for (offset, candidate) in tokens[i..].iter().enumerate() {
            if self.keyword.contains_key(candidate) {
                end = i + offset;
                break;
            }
        }
        let consumed = self
            .consume_all_positional(&tokens[i..end], result, consumed_positional, from_validate)
            .await?;
        Ok(i + consumed)
    }

    async fn handle_flagged(
        &self,
        token: &str,
        tokens: &[String],
        i: usize,
        spec: &Argument,
        result: &mut HashMap<String, Value>,
        from_validate: bool,
    ) -> Result<usize, ParseError> {
        match spec.action {
            ArgumentAction::Help => Err(ParseError::HelpRequested),
            ArgumentAction::StoreTrue => {
                result.insert(spec.dest.clone(), Value::Bool(true));
                Ok(i + 1)
            }
            ArgumentAction::StoreFalse => {
                result.insert(spec.dest.clone(), Value::Bool(false));
                Ok(i + 1)
            }
            ArgumentAction::StoreBoolOptional => {
                result.insert(spec.dest.clone(), Value::Bool(!token.starts_with("--no-")));
                Ok(i + 1)
            }
            ArgumentAction::Count => {
                let current = result
                    .get(&spec.dest)
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                result.insert(spec.dest.clone(), Value::from(current + 1));
                Ok(i + 1)
            }
            ArgumentAction::Action => {
                let (values, new_i) = self.consume_nargs(tokens, i + 1, spec)?;
                let typed = self.coerce_all(&values, spec)?;
                if !(spec.lazy_resolver && from_validate) {
                    let resolved = self.run_resolver(spec, typed).await?;
                    result.insert(spec.dest.clone(), resolved);
                }
                Ok(new_i)
            }
            ArgumentAction::Append => {
                let (values, new_i) = self.consume_nargs(tokens, i + 1, spec)?;
                let typed = self.coerce_all(&values, spec)?;
                if typed.is_empty() {
                    return Err(self.missing_value(spec));
                }
                let entry = result.entry(spec.dest.clone()).or_insert(Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(items) = entry {
                    if spec.nargs.is_none() {
                        items.push(typed[0].clone());
                    } else {
                        items.push(Value::Array(typed));
                    }
                }
                Ok(new_i)
            }
            ArgumentAction::Extend => {
                let (values, new_i) = self.consume_nargs(tokens, i + 1, spec)?;
                let typed = self.coerce_all(&values, spec)?;
                if typed.is_empty() {
                    return Err(self.missing_value(spec));
                }
                let entry = result.entry(spec.dest.clone()).or_insert(Value::Array(Vec::new()));
                if let Value::Array(items) = entry {
                    items.extend(typed);
                }
                Ok(new_i)
            }
            ArgumentAction::Store => {
                let (values, new_i) = self.consume_nargs(tokens, i + 1, spec)?;
                let typed = self.coerce_all(&values, spec)?;
                if typed.is_empty()
                    && !matches!(spec.nargs, Some(Nargs::ZeroOrMore) | Some(Nargs::Optional))
                {
                    return Err(self.missing_value(spec));
                }
                let stored = match spec.nargs {
                    None | Some(Nargs::Exact(1)) | Some(Nargs::Optional) => {
                        if typed.len() == 1 {
                            typed.into_iter().next().unwrap_or(Value::Null)
                        } else {
                            Value::Array(typed)
                        }
                    }
                    _ => Value::Array(typed),
                };
                result.insert(spec.dest.clone(), stored);
                Ok(new_i)
            }
        }
    }

    fn missing_value(&self, spec: &Argument) -> ParseError {
        let mut details = Vec::new();
        if !is_falsy(&spec.default) {
            details.push(format!("default={}", spec.default));
        }
        if !spec.choices.is_empty() {
            details.push(format!(
                "choices={{{}}}",
                spec.choices
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        let details = if !details.is_empty() {
            details.join(", ")
        } else {
            match spec.nargs {
                None => format!("Enter a {} value.", spec.value_type.type_name()),
                Some(nargs) => format!("Expected {nargs} values."),
            }
        };
        ParseError::MissingValue {
            dest: spec.dest.clone(),
            details,
        }
    }

    /// Distribute a flag-free token run over the remaining positional specs
    /// in declaration order. Each non-last spec leaves enough tokens for the
    /// minimum required by the specs after it; the last spec absorbs the
    /// rest.
    async fn consume_all_positional(
        &self,
        tokens: &[String],
        result: &mut HashMap<String, Value>,
        consumed_positional: &mut HashSet<usize>,
        from_validate: bool,
    ) -> Result<usize, ParseError> {
        let remaining_specs: Vec<(usize, Arc<Argument>)> = self
            .positional
            .iter()
            .enumerate()
            .filter(|(j, _)| !consumed_positional.contains(j))
            .map(|(j, spec)| (j, spec.clone()))
            .collect();
        let mut i = 0;

        for (j, spec) in remaining_specs {
            let is_last = j == self.positional.len() - 1;
            let remaining = tokens.len() - i;
            let mut min_required = 0usize;
            for next_spec in self.positional.iter().skip(j + 1) {
                if !is_falsy(&next_spec.default) {
                    continue;
                }
                match next_spec.nargs {
                    None => min_required += 1,
                    Some(Nargs::Exact(n)) => min_required += n,
                    Some(Nargs::OneOrMore) => min_required += 1,
                    Some(Nargs::Optional) | Some(Nargs::ZeroOrMore) => {}
                }
            }

            let slice_end = if is_last {
                tokens.len()
            } else {
                i + remaining.saturating_sub(min_required)
            };
            let (values, used) = self.consume_nargs(&tokens[i..slice_end], 0, &spec)?;
            i += used;

            let typed = match self.coerce_all(&values, &spec) {
                Ok(typed) => typed,
                Err(coerce_error) => {
                    if values.len() == 1 && values[0].starts_with('-') {
                        return Err(self.unknown_option(&values[0]));
                    }
                    return Err(coerce_error);
                }
            };

            match spec.action {
                ArgumentAction::Action => {
                    if !(spec.lazy_resolver && from_validate) {
                        let resolved = self.run_resolver(&spec, typed).await?;
                        result.insert(spec.dest.clone(), resolved);
                    }
                }
                _ if typed.is_empty() && !is_falsy(&spec.default) => {
                    result.insert(spec.dest.clone(), spec.default.clone());
                }
                ArgumentAction::Append => {
                    let entry = result
                        .entry(spec.dest.clone())
                        .or_insert(Value::Array(Vec::new()));
                    if let Value::Array(items) = entry {
                        if spec.nargs.is_none() {
                            if let Some(first) = typed.first() {
                                items.push(first.clone());
                            }
                        } else {
                            items.push(Value::Array(typed));
                        }
                    }
                }
                ArgumentAction::Extend => {
                    let entry = result
                        .entry(spec.dest.clone())
                        .or_insert(Value::Array(Vec::new()));
                    if let Value::Array(items) = entry {
                        items.extend(typed);
                    }
                }
                _ => {
                    let stored = match spec.nargs {
                        None | Some(Nargs::Exact(1)) | Some(Nargs::Optional) => {
                            if typed.len() == 1 {
                                typed.into_iter().next().unwrap_or(Value::Null)
                            } else {
                                Value::Array(typed)
                            }
                        }
                        _ => Value::Array(typed),
                    };
                    result.insert(spec.dest.clone(), stored);
                }
            }

            if !matches!(spec.nargs, Some(Nargs::ZeroOrMore) | Some(Nargs::OneOrMore)) {
                consumed_positional.insert(j);
            }
        }

        if i < tokens.len() {
            let leftovers = &tokens[i..];
            if leftovers.len() == 1 && leftovers[0].starts_with('-') {
                return Err(self.unknown_option(&leftovers[0]));
            }
            return Err(ParseError::ExtraPositionals {
                count: leftovers.len(),
                tokens: leftovers.join(", "),
            });
        }
        Ok(i)
    }

    fn validate_result(
        &self,
        result: &HashMap<String, Value>,
        from_validate: bool,
    ) -> Result<(), ParseError> {
        for spec in &self.arguments {
            if spec.dest == "help" {
                continue;
            }
            let value = result.get(&spec.dest).cloned().unwrap_or(Value::Null);

            if spec.required && is_falsy(&value) {
                if spec.action == ArgumentAction::Action && spec.lazy_resolver && from_validate {
                    continue;
                }
                let mut details = String::new();
                let choice_text = spec.get_choice_text();
                if !choice_text.is_empty() {
                    details.push_str(&format!(": {choice_text}"));
                }
                if !spec.help.is_empty() {
                    details.push_str(&format!(" help: {}", spec.help));
                }
                return Err(ParseError::MissingRequired {
                    dest: spec.dest.clone(),
                    details,
                });
            }

            if !spec.choices.is_empty() && !is_falsy(&value) {
                let member = |candidate: &Value| spec.choices.contains(candidate);
                let ok = match &value {
                    Value::Array(items) => items.iter().all(|item| match item {
                        Value::Array(group) => group.iter().all(member),
                        scalar => member(scalar),
                    }),
                    scalar => member(scalar),
                };
                if !ok {
                    return Err(ParseError::InvalidChoice {
                        dest: spec.dest.clone(),
                        choices: spec
                            .choices
                            .iter()
                            .map(|c| match c {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                }
            }

            if spec.action == ArgumentAction::Action {
                continue;
            }

            if let Some(Nargs::Exact(n)) = spec.nargs {
                if n > 1 {
                    let Value::Array(items) = &value else {
                        return Err(ParseError::CountMismatch {
                            dest: spec.dest.clone(),
                            details: "expected a list of values".to_string(),
                        });
                    };
                    if items.is_empty() && !spec.required {
                        continue;
                    }
                    match spec.action {
                        ArgumentAction::Append => {
                            for group in items {
                                let len = match group {
                                    Value::Array(group) => group.len(),
                                    _ => 1,
                                };
                                if len % n != 0 {
                                    return Err(ParseError::CountMismatch {
                                        dest: spec.dest.clone(),
                                        details: format!("expected a multiple of {n}"),
                                    });
                                }
                            }
                        }
                        ArgumentAction::Extend => {
                            if items.len() % n != 0 {
                                return Err(ParseError::CountMismatch {
                                    dest: spec.dest.clone(),
                                    details: format!("expected a multiple of {n}"),
                                });
                            }
                        }
                        _ => {
                            if items.len() != n {
                                return Err(ParseError::CountMismatch {
                                    dest: spec.dest.clone(),
                                    details: format!("expected {n}, got {}", items.len()),
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Candidate next tokens for a partial token list: not-yet-exhausted
    /// flags, plus the choices of the preceding flag when it has them.
    /// Consumers apply their own longest-common-prefix rules.
    pub fn suggest_next(&self, tokens: &[String]) -> Vec<String> {
        let last = tokens.last().map(String::as_str).unwrap_or("");
        let mut exhausted: HashSet<String> = HashSet::new();
        let prior = tokens.len().saturating_sub(1);
        for token in &tokens[..prior] {
            if let Some(spec) = self.keyword.get(token) {
                if !spec.action.is_repeatable() {
                    exhausted.insert(spec.dest.clone());
                }
            }
        }

        let choice_strings = |spec: &Argument| -> Vec<String> {
            spec.choices
                .iter()
                .map(|choice| match choice {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect()
        };

        // A completed flag: suggest its value space.
        if let Some(spec) = self.keyword.get(last) {
            if !spec.choices.is_empty() {
                return choice_strings(spec);
            }
            if !matches!(
                spec.action,
                ArgumentAction::StoreTrue
                    | ArgumentAction::StoreFalse
                    | ArgumentAction::StoreBoolOptional
                    | ArgumentAction::Count
                    | ArgumentAction::Help
            ) {
                return Vec::new();
            }
            exhausted.insert(spec.dest.clone());
        }

        let flag_candidates = |prefix: &str| -> Vec<String> {
            let mut flags: Vec<String> = self
                .keyword
                .iter()
                .filter(|(flag, spec)| !exhausted.contains(&spec.dest) && flag.starts_with(prefix))
                .map(|(flag, _)| flag.clone())
                .collect();
            flags.sort();
            flags.dedup();
            flags
        };

        // Completing a flag token.
        if last.starts_with('-') && !self.keyword.contains_key(last) {
            return flag_candidates(last);
        }

        // Completing a value for the previous flag, when it has choices.
        if tokens.len() >= 2 {
            if let Some(spec) = self.keyword.get(&tokens[tokens.len() - 2]) {
                if !spec.choices.is_empty() {
                    return choice_strings(spec)
                        .into_iter()
                        .filter(|choice| choice.starts_with(last))
                        .collect();
                }
            }
        }

        flag_candidates("")
    }

    // ------------------------------------------------------------------
    // Help / usage rendering
    // ------------------------------------------------------------------

    pub fn get_command_keys_text(&self) -> String {
        let mut keys = vec![self.command_key.clone()];
        keys.extend(self.aliases.iter().cloned());
        keys.retain(|key| !key.is_empty());
        keys.join(" | ")
    }

    pub fn get_options_text(&self) -> String {
        let mut parts = Vec::new();
        for arg in &self.keyword_list {
            let choice_text = arg.get_choice_text();
            if choice_text.is_empty() {
                parts.push(format!("[{}]", arg.flags[0]));
            } else {
                parts.push(format!("[{} {}]", arg.flags[0], choice_text));
            }
        }
        for arg in &self.positional {
            let choice_text = arg.get_choice_text();
            if let Some(Nargs::Exact(n)) = arg.nargs {
                parts.push(vec![choice_text; n].join(" "));
            } else {
                parts.push(choice_text);
            }
        }
        parts.join(" ")
    }

    /// Usage line: command keys followed by flag/positional placeholders.
    pub fn get_usage(&self) -> String {
        let keys = self.get_command_keys_text();
        let options = self.get_options_text();
        match (keys.is_empty(), options.is_empty()) {
            (false, false) => format!("{keys} {options}"),
            (false, true) => keys,
            (true, _) => options,
        }
    }

    /// The full help block as plain-text lines. Rendering never mutates
    /// parser state.
    pub fn help_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("usage: {}", self.get_usage()), String::new()];
        if !self.help_text.is_empty() {
            lines.push(self.help_text.clone());
            lines.push(String::new());
        } else if !self.command_description.is_empty() {
            lines.push(self.command_description.clone());
            lines.push(String::new());
        }
        if !self.positional.is_empty() {
            lines.push("positional:".to_string());
            for arg in &self.positional {
                lines.push(format!("  {:<30} {}", arg.get_positional_text(), arg.help));
            }
        }
        lines.push("options:".to_string());
        for arg in &self.keyword_list {
            let flags = arg.flags.join(", ");
            let flags_choice = format!("{} {}", flags, arg.get_choice_text());
            lines.push(format!("  {:<30} {}", flags_choice.trim_end(), arg.help));
        }
        if !self.help_epilog.is_empty() {
            lines.push(String::new());
            lines.push(self.help_epilog.clone());
        }
        lines
    }

    /// Write the help block through a console sink.
    pub fn render_help(&self, console: &dyn ConsoleSink) {
        for line in self.help_lines() {
            console.write_line(&line);
        }
    }
}

impl Default for CommandArgumentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandArgumentParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandArgumentParser")
            .field("args", &self.arguments.len())
            .field("flags", &self.flag_map.len())
            .field("positional", &self.positional.len())
            .field("required", &self.arguments.iter().filter(|a| a.required).count())
            .finish()
    }
}
