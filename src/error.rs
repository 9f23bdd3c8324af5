#![forbid(unsafe_code)]

//! Structured errors emitted by the query compiler.
//!
//! Syntax errors surface at parse time, structural errors surface
//! synchronously at the offending builder call, and unsatisfied parameters are
//! only detected when a bound query is actually produced. Executor failures
//! pass through unmodified behind the single [`QueryError::Executor`] variant.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QueryError>;

/// Errors raised while building, rendering, or executing a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Malformed expression text.
    #[error("syntax error at position {position}: {message}")]
    Syntax {
        /// Byte offset of the offending input.
        position: usize,
        /// Parser diagnostic.
        message: String,
    },
    /// The alias already resolves somewhere in the scope chain.
    #[error("alias '{0}' already exists")]
    DuplicateAlias(String),
    /// An explicit join was given an empty alias.
    #[error("empty alias")]
    EmptyAlias,
    /// A child builder was started while another child was still open.
    #[error("previous builder was not ended")]
    UnendedBuilder,
    /// A builder was ended that was never started, or ended twice.
    #[error("builder was not started")]
    BuilderNotStarted,
    /// Fetch joins require the root entity to be the selected shape.
    #[error("fetch joins are only possible if the root entity is selected")]
    FetchWithSelect,
    /// Indexed access on an attribute that is neither a collection nor a map.
    #[error("attribute '{0}' is neither a collection nor a map")]
    NotIndexable(String),
    /// An object-valued path leaf was used where a scalar is required.
    #[error("path '{0}' resolves to an object where a scalar is required")]
    ObjectLeafNotAllowed(String),
    /// A path traversed an attribute that does not exist.
    #[error("unknown attribute '{attribute}' on '{entity}'")]
    UnknownAttribute {
        /// Owning entity name.
        entity: String,
        /// Missing attribute name.
        attribute: String,
    },
    /// The FROM target is not a known entity.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    /// A path could not be interpreted against the schema.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// A subquery was used before its FROM target was set.
    #[error("subquery requires a FROM target")]
    MissingFrom,
    /// `between` was called with a null bound.
    #[error("between bounds must not be null")]
    NullBetweenBound,
    /// HAVING is only legal together with GROUP BY.
    #[error("HAVING requires a GROUP BY clause")]
    HavingWithoutGroupBy,
    /// DISTINCT queries cannot be paginated at entity identity level.
    #[error("cannot paginate a DISTINCT query")]
    PaginateDistinct,
    /// GROUP BY queries cannot be paginated at entity identity level.
    #[error("cannot paginate a GROUP BY query")]
    PaginateGroupBy,
    /// A referenced parameter has no bound value.
    #[error("unsatisfied parameter '{0}'")]
    UnsatisfiedParameter(String),
    /// Failure reported by the external query executor, passed through.
    #[error("executor error: {0}")]
    Executor(Box<dyn std::error::Error + Send + Sync>),
}

impl QueryError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Syntax { .. } => "Syntax",
            QueryError::DuplicateAlias(_) => "DuplicateAlias",
            QueryError::EmptyAlias => "EmptyAlias",
            QueryError::UnendedBuilder => "UnendedBuilder",
            QueryError::BuilderNotStarted => "BuilderNotStarted",
            QueryError::FetchWithSelect => "FetchWithSelect",
            QueryError::NotIndexable(_) => "NotIndexable",
            QueryError::ObjectLeafNotAllowed(_) => "ObjectLeafNotAllowed",
            QueryError::UnknownAttribute { .. } => "UnknownAttribute",
            QueryError::UnknownEntity(_) => "UnknownEntity",
            QueryError::InvalidPath(_) => "InvalidPath",
            QueryError::MissingFrom => "MissingFrom",
            QueryError::NullBetweenBound => "NullBetweenBound",
            QueryError::HavingWithoutGroupBy => "HavingWithoutGroupBy",
            QueryError::PaginateDistinct => "PaginateDistinct",
            QueryError::PaginateGroupBy => "PaginateGroupBy",
            QueryError::UnsatisfiedParameter(_) => "UnsatisfiedParameter",
            QueryError::Executor(_) => "Executor",
        }
    }
}
