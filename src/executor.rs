#![forbid(unsafe_code)]

//! Contract with the external query executor.
//!
//! The compiler's output is purely textual: a query string plus named
//! parameter bindings. Whatever runs that text (an ORM, a SQL driver, a test
//! double) implements [`QueryExecutor`] and returns rows as flat tuples.

use crate::error::Result;
use crate::value::Value;

/// A row returned by the executor.
pub type Tuple = Vec<Value>;

/// A rendered query together with its parameter bindings.
#[derive(Clone, Debug)]
pub struct BoundQuery {
    /// Rendered query text.
    pub text: String,
    /// Named parameter bindings, sorted by name.
    pub params: Vec<(String, Value)>,
}

impl BoundQuery {
    /// Looks up a bound parameter by name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Offset/limit window applied by the executor, not embedded in query text.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RowRange {
    /// Zero-based index of the first row to return.
    pub first: usize,
    /// Maximum number of rows to return.
    pub max: usize,
}

/// Executes rendered query strings and materializes rows as tuples.
pub trait QueryExecutor {
    /// Runs the query, optionally windowed to the given row range.
    fn query(&self, query: &BoundQuery, range: Option<RowRange>) -> Result<Vec<Tuple>>;

    /// Runs a count query and returns the single scalar result.
    fn count(&self, query: &BoundQuery) -> Result<u64>;
}
