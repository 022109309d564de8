//! The declarative argument model.

use serde_json::Value;

use crate::action::ActionRef;
use crate::parser::coerce::ValueType;

/// What happens when an argument is encountered on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentAction {
    /// Store the coerced value(s).
    Store,
    StoreTrue,
    StoreFalse,
    /// Registers both `--x` and `--no-x`; unset resolves to null.
    StoreBoolOptional,
    /// Append one value (or one nargs-group) per occurrence.
    Append,
    /// Extend the destination list with the flattened values.
    Extend,
    /// Increment the destination by one per occurrence.
    Count,
    Help,
    /// Run the argument's resolver action over the coerced values and store
    /// its return value verbatim.
    Action,
}

impl ArgumentAction {
    pub const ALL: &'static [ArgumentAction] = &[
        Self::Store,
        Self::StoreTrue,
        Self::StoreFalse,
        Self::StoreBoolOptional,
        Self::Append,
        Self::Extend,
        Self::Count,
        Self::Help,
        Self::Action,
    ];

    /// Flag-toggling and counting actions take no values.
    pub(crate) fn forbids_nargs(&self) -> bool {
        matches!(
            self,
            Self::StoreTrue | Self::StoreFalse | Self::StoreBoolOptional | Self::Count | Self::Help
        )
    }

    /// Actions that may appear more than once on a command line.
    pub(crate) fn is_repeatable(&self) -> bool {
        matches!(self, Self::Append | Self::Extend | Self::Count)
    }
}

impl std::fmt::Display for ArgumentAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Store => "store",
            Self::StoreTrue => "store_true",
            Self::StoreFalse => "store_false",
            Self::StoreBoolOptional => "store_bool_optional",
            Self::Append => "append",
            Self::Extend => "extend",
            Self::Count => "count",
            Self::Help => "help",
            Self::Action => "action",
        };
        f.write_str(label)
    }
}

/// Number-of-values specifier. An argument without one consumes a single
/// optional value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nargs {
    /// Exactly `n` values (n ≥ 1).
    Exact(usize),
    /// `?`: zero or one.
    Optional,
    /// `*`: zero or more.
    ZeroOrMore,
    /// `+`: one or more.
    OneOrMore,
}

impl std::fmt::Display for Nargs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Nargs::Exact(n) => write!(f, "{n}"),
            Nargs::Optional => f.write_str("?"),
            Nargs::ZeroOrMore => f.write_str("*"),
            Nargs::OneOrMore => f.write_str("+"),
        }
    }
}

/// A registered command-line argument.
#[derive(Clone)]
pub struct Argument {
    pub flags: Vec<String>,
    /// Destination key in the parse result.
    pub dest: String,
    pub action: ArgumentAction,
    pub value_type: ValueType,
    /// Resolved default; null when unset.
    pub default: Value,
    /// Coerced allowed values; empty when unrestricted.
    pub choices: Vec<Value>,
    pub required: bool,
    pub help: String,
    pub nargs: Option<Nargs>,
    /// Derived: no flag starts with `-`.
    pub positional: bool,
    /// Action resolving the argument's value (action-valued arguments only).
    pub resolver: Option<ActionRef>,
    /// Skip the resolver during validation-only parses.
    pub lazy_resolver: bool,
}

impl Argument {
    /// Rendering of a positional in the usage line.
    pub fn get_positional_text(&self) -> String {
        if !self.positional {
            return String::new();
        }
        if self.choices.is_empty() {
            self.dest.clone()
        } else {
            format!("{{{}}}", join_values(&self.choices))
        }
    }

    /// Rendering of the value placeholder in the usage line.
    pub fn get_choice_text(&self) -> String {
        let mut text = if !self.choices.is_empty() {
            format!("{{{}}}", join_values(&self.choices))
        } else if matches!(
            self.action,
            ArgumentAction::Store
                | ArgumentAction::Append
                | ArgumentAction::Extend
                | ArgumentAction::Action
        ) {
            if self.positional {
                self.dest.clone()
            } else {
                self.dest.to_uppercase()
            }
        } else {
            String::new()
        };
        match self.nargs {
            Some(Nargs::Optional) => text = format!("[{text}]"),
            Some(Nargs::ZeroOrMore) => text = format!("[{text} ...]"),
            Some(Nargs::OneOrMore) => text = format!("{text} [{text} ...]"),
            _ => {}
        }
        text
    }
}

fn join_values(values: &[Value]) -> String {
    values
        .iter()
        .map(|value| match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

impl PartialEq for Argument {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.dest == other.dest
            && self.action == other.action
            && self.value_type == other.value_type
            && self.choices == other.choices
            && self.required == other.required
            && self.nargs == other.nargs
            && self.positional == other.positional
            && self.default == other.default
            && self.help == other.help
    }
}

impl std::fmt::Debug for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Argument")
            .field("flags", &self.flags)
            .field("dest", &self.dest)
            .field("action", &self.action)
            .field("type", &self.value_type)
            .field("nargs", &self.nargs)
            .field("required", &self.required)
            .field("positional", &self.positional)
            .finish_non_exhaustive()
    }
}

/// Declarative registration request consumed by
/// [`CommandArgumentParser::add_argument`](crate::parser::CommandArgumentParser::add_argument).
///
/// ```
/// use runbook_rs::parser::{ArgumentAction, ArgumentSpec, Nargs};
///
/// let spec = ArgumentSpec::new(["-t", "--tag"])
///     .action(ArgumentAction::Append)
///     .nargs(Nargs::Exact(2))
///     .help("tag pairs");
/// ```
#[derive(Clone)]
pub struct ArgumentSpec {
    pub(crate) flags: Vec<String>,
    pub(crate) action: ArgumentAction,
    pub(crate) nargs: Option<Nargs>,
    pub(crate) default: Option<Value>,
    pub(crate) value_type: ValueType,
    pub(crate) choices: Option<Vec<Value>>,
    pub(crate) required: Option<bool>,
    pub(crate) help: String,
    pub(crate) dest: Option<String>,
    pub(crate) resolver: Option<ActionRef>,
    pub(crate) lazy_resolver: bool,
}

impl ArgumentSpec {
    pub fn new<I, S>(flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flags: flags.into_iter().map(Into::into).collect(),
            action: ArgumentAction::Store,
            nargs: None,
            default: None,
            value_type: ValueType::Str,
            choices: None,
            required: None,
            help: String::new(),
            dest: None,
            resolver: None,
            lazy_resolver: false,
        }
    }

    /// Shorthand for a single positional name.
    pub fn positional(name: impl Into<String>) -> Self {
        Self::new([name.into()])
    }

    pub fn action(mut self, action: ArgumentAction) -> Self {
        self.action = action;
        self
    }

    pub fn nargs(mut self, nargs: Nargs) -> Self {
        self.nargs = Some(nargs);
        self
    }

    pub fn default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    /// Resolve the argument's value by running an action over the coerced
    /// inputs.
    pub fn resolver(mut self, resolver: ActionRef) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Skip the resolver during validation-only parses.
    pub fn lazy_resolver(mut self, lazy: bool) -> Self {
        self.lazy_resolver = lazy;
        self
    }
}

impl PartialEq for ArgumentSpec {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.action == other.action
            && self.nargs == other.nargs
            && self.default == other.default
            && self.value_type == other.value_type
            && self.choices == other.choices
            && self.required == other.required
            && self.help == other.help
            && self.dest == other.dest
    }
}

impl std::fmt::Debug for ArgumentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentSpec")
            .field("flags", &self.flags)
            .field("action", &self.action)
            .field("nargs", &self.nargs)
            .finish_non_exhaustive()
    }
}
