//! The mutable context dict threaded through a composition's hook chain.

use serde_json::{Map, Value};

/// A shallow JSON object, cheaply convertible to/from a script's stdin/stdout
/// payload. Mirrors the dict the Python pipeline passes to `execute(context, params)`.
#[derive(Clone, Debug, Default)]
pub struct HookContext(Map<String, Value>);

impl HookContext {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Shallow key-overwrite merge — matches the pipeline's `modify_context`
    /// semantics: no recursive merge, later keys win outright.
    pub fn merge(&mut self, patch: &Map<String, Value>) {
        for (k, v) in patch {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for HookContext {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
