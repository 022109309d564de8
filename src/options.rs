//! Namespaced runtime options.
//!
//! A small key/value store commands and actions consult for global toggles.
//! The core reads the `cli_args` namespace for the confirmation switches
//! (`never_prompt`, `skip_confirm`, `force_confirm`); hosts are free to add
//! their own namespaces.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

/// Namespace the core's own switches live in.
pub const CLI_ARGS: &str = "cli_args";

pub const NEVER_PROMPT: &str = "never_prompt";
pub const SKIP_CONFIRM: &str = "skip_confirm";
pub const FORCE_CONFIRM: &str = "force_confirm";

#[derive(Debug, Clone, thiserror::Error)]
pub enum OptionsError {
    #[error("cannot toggle non-boolean option '{option}' in '{namespace}'")]
    NotBoolean { namespace: String, option: String },
}

/// Thread-safe namespaced option store over [`Value`]s.
pub struct OptionsManager {
    namespaces: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl OptionsManager {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Load a whole namespace at once (e.g. parsed CLI arguments).
    pub fn from_namespace(
        namespace: impl Into<String>,
        values: HashMap<String, Value>,
    ) -> Self {
        let manager = Self::new();
        manager
            .namespaces
            .write()
            .expect("options lock poisoned")
            .insert(namespace.into(), values);
        manager
    }

    pub fn get(&self, option: &str, namespace: &str) -> Option<Value> {
        self.namespaces
            .read()
            .expect("options lock poisoned")
            .get(namespace)
            .and_then(|ns| ns.get(option).cloned())
    }

    /// Truthy read of an option; missing or null counts as `false`.
    pub fn get_bool(&self, option: &str, namespace: &str) -> bool {
        matches!(self.get(option, namespace), Some(Value::Bool(true)))
    }

    pub fn set(&self, option: impl Into<String>, value: impl Into<Value>, namespace: &str) {
        self.namespaces
            .write()
            .expect("options lock poisoned")
            .entry(namespace.to_string())
            .or_default()
            .insert(option.into(), value.into());
    }

    pub fn has_option(&self, option: &str, namespace: &str) -> bool {
        self.namespaces
            .read()
            .expect("options lock poisoned")
            .get(namespace)
            .is_some_and(|ns| ns.contains_key(option))
    }

    /// Flip a boolean option, returning its new value.
    pub fn toggle(&self, option: &str, namespace: &str) -> Result<bool, OptionsError> {
        let mut namespaces = self.namespaces.write().expect("options lock poisoned");
        let ns = namespaces.entry(namespace.to_string()).or_default();
        let current = match ns.get(option) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(OptionsError::NotBoolean {
                    namespace: namespace.to_string(),
                    option: option.to_string(),
                });
            }
        };
        ns.insert(option.to_string(), Value::Bool(!current));
        debug!(option, namespace, value = !current, "toggled option");
        Ok(!current)
    }

    /// Closure that reads an option each time it is called.
    pub fn value_getter(
        self: &Arc<Self>,
        option: impl Into<String>,
        namespace: impl Into<String>,
    ) -> impl Fn() -> Option<Value> + Send + Sync + 'static {
        let manager = self.clone();
        let option = option.into();
        let namespace = namespace.into();
        move || manager.get(&option, &namespace)
    }

    /// Closure that toggles a boolean option each time it is called.
    pub fn toggle_fn(
        self: &Arc<Self>,
        option: impl Into<String>,
        namespace: impl Into<String>,
    ) -> impl Fn() -> Result<bool, OptionsError> + Send + Sync + 'static {
        let manager = self.clone();
        let option = option.into();
        let namespace = namespace.into();
        move || manager.toggle(&option, &namespace)
    }

    /// Snapshot of a whole namespace.
    pub fn namespace(&self, namespace: &str) -> HashMap<String, Value> {
        self.namespaces
            .read()
            .expect("options lock poisoned")
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for OptionsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OptionsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let namespaces = self.namespaces.read().expect("options lock poisoned");
        f.debug_struct("OptionsManager")
            .field("namespaces", &namespaces.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_and_toggle() {
        let options = OptionsManager::new();
        assert_eq!(options.get(NEVER_PROMPT, CLI_ARGS), None);
        options.set(NEVER_PROMPT, true, CLI_ARGS);
        assert!(options.get_bool(NEVER_PROMPT, CLI_ARGS));

        assert!(!options.toggle(NEVER_PROMPT, CLI_ARGS).unwrap());
        assert!(!options.get_bool(NEVER_PROMPT, CLI_ARGS));
    }

    #[test]
    fn toggle_rejects_non_boolean() {
        let options = OptionsManager::new();
        options.set("mode", json!("fast"), CLI_ARGS);
        assert!(matches!(
            options.toggle("mode", CLI_ARGS),
            Err(OptionsError::NotBoolean { .. })
        ));
    }

    #[test]
    fn getter_and_toggler_closures() {
        let options = Arc::new(OptionsManager::new());
        options.set(FORCE_CONFIRM, false, CLI_ARGS);
        let getter = options.value_getter(FORCE_CONFIRM, CLI_ARGS);
        let toggler = options.toggle_fn(FORCE_CONFIRM, CLI_ARGS);

        assert_eq!(getter(), Some(json!(false)));
        toggler().unwrap();
        assert_eq!(getter(), Some(json!(true)));
    }
}
