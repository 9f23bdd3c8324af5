#![forbid(unsafe_code)]

//! Named parameter tracking.
//!
//! Parameters referenced from expressions (`:name`) are registered as soon as
//! the expression is resolved; values may be supplied any time before a bound
//! query is produced. Literal values handed to restriction terminals get
//! auto-generated positional names (`param_0`, `param_1`, ...). The positional
//! counter is shared down the subquery chain so nested builders never reuse a
//! name.

use rustc_hash::FxHashMap;

use crate::error::{QueryError, Result};
use crate::value::Value;

/// Tracks parameter registrations and bindings for one query tree.
#[derive(Clone, Debug, Default)]
pub struct ParameterManager {
    values: FxHashMap<String, Option<Value>>,
    positional: u32,
}

impl ParameterManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager whose positional counter continues from `next`.
    pub(crate) fn seeded(next: u32) -> Self {
        Self {
            values: FxHashMap::default(),
            positional: next,
        }
    }

    pub(crate) fn next_positional(&self) -> u32 {
        self.positional
    }

    /// Records that a named parameter is referenced by the query.
    pub fn register(&mut self, name: &str) {
        self.values.entry(name.to_owned()).or_insert(None);
    }

    /// Binds a value to a named parameter, registering it if necessary.
    pub fn satisfy(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_owned(), Some(value));
    }

    /// Registers a fresh positional parameter bound to the given value.
    pub fn add_value(&mut self, value: Value) -> String {
        let name = format!("param_{}", self.positional);
        self.positional += 1;
        self.values.insert(name.clone(), Some(value));
        name
    }

    /// Whether the parameter is known at all.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Whether the parameter has a bound value.
    pub fn is_satisfied(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(Some(_)))
    }

    /// Returns the bound value for a parameter, if any.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name).and_then(|v| v.as_ref())
    }

    /// Folds a finished subquery's parameters into this manager.
    pub(crate) fn adopt(&mut self, child: &mut ParameterManager) {
        for (name, value) in child.values.drain() {
            // A name bound in the child wins over a mere registration here.
            match self.values.get(&name) {
                Some(Some(_)) => {}
                _ => {
                    self.values.insert(name, value);
                }
            }
        }
        self.positional = self.positional.max(child.positional);
    }

    /// Produces the full binding set, failing on the first unsatisfied name.
    pub fn bindings(&self) -> Result<Vec<(String, Value)>> {
        let mut out = Vec::with_capacity(self.values.len());
        for (name, value) in &self.values {
            match value {
                Some(v) => out.push((name.clone(), v.clone())),
                None => return Err(QueryError::UnsatisfiedParameter(name.clone())),
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}
