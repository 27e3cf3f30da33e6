//! Per-connector custom variables and the matching rules used for addressing.

use std::collections::HashMap;

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Authenticated user name.
pub const VAR_USERNAME: &str = "$username";
/// Negotiated subprotocol.
pub const VAR_SUBPROTOCOL: &str = "$subprot";
/// Protocol version.
pub const VAR_VERSION: &str = "$version";
/// Cluster node id.
pub const VAR_NODE_ID: &str = "$nodeid";

/// Concurrent string-keyed bag of JSON values.
#[derive(Debug, Default)]
pub struct VariableBag {
    vars: DashMap<String, Value>,
}

impl VariableBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.vars.get(key).map(|entry| entry.value().clone())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.vars.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .and_then(|entry| entry.value().as_str().map(str::to_string))
    }

    pub fn get_boolean(&self, key: &str) -> Option<bool> {
        self.vars.get(key).and_then(|entry| entry.value().as_bool())
    }

    /// Like [`get_boolean`](Self::get_boolean) but absent or non-boolean reads as `false`.
    pub fn get_bool(&self, key: &str) -> bool {
        self.get_boolean(key).unwrap_or(false)
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.vars.get(key).and_then(|entry| entry.value().as_i64())
    }

    pub fn set_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, Value::String(value.into()));
    }

    pub fn set_boolean(&self, key: impl Into<String>, value: bool) {
        self.set(key, Value::Bool(value));
    }

    pub fn set_integer(&self, key: impl Into<String>, value: i64) {
        self.set(key, Value::from(value));
    }

    /// Copy of all variables.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.vars
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Tests the variable `key` against `matcher`. Absent variables never match.
    pub fn matches(&self, key: &str, matcher: &VarMatcher) -> bool {
        self.vars
            .get(key)
            .is_some_and(|entry| matcher.matches(entry.value()))
    }
}

/// A compiled predicate for one entry of an addressing filter.
///
/// * string variable, string filter: the filter is a regular expression that
///   must match the whole value
/// * boolean variable: equality with the filter value
/// * anything else: JSON equality
///
/// An invalid pattern matches nothing.
#[derive(Debug, Clone)]
pub struct VarMatcher {
    value: Value,
    pattern: Option<Regex>,
}

impl VarMatcher {
    pub fn new(value: impl Into<Value>) -> Self {
        let value = value.into();
        let pattern = match &value {
            Value::String(source) => match Regex::new(&format!("^(?:{source})$")) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!("Invalid connector variable pattern '{}': {}", source, e);
                    None
                }
            },
            _ => None,
        };
        Self { value, pattern }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn matches(&self, stored: &Value) -> bool {
        match (stored, &self.value) {
            (Value::String(stored), Value::String(_)) => self
                .pattern
                .as_ref()
                .is_some_and(|regex| regex.is_match(stored)),
            (Value::Bool(stored), expected) => expected.as_bool() == Some(*stored),
            (stored, expected) => stored == expected,
        }
    }
}
