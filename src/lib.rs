#![forbid(unsafe_code)]

//! Programmatic query construction and compilation.
//!
//! `ombra` builds queries the way application code composes them: a fluent
//! [`CriteriaBuilder`] accepts dotted path expressions, resolves them against
//! a [`Metamodel`] into a join tree, accumulates restrictions through scoped
//! predicate builders, and renders deterministic query text with named
//! parameter bindings. The [`PaginatedCriteriaBuilder`] derives count, id and
//! object queries from one frozen query so result windows stay stable under
//! collection joins, with optional keyset continuation between pages.
//!
//! ```
//! use std::sync::Arc;
//! use ombra::{CriteriaBuilder, SchemaMetadata};
//!
//! let mut schema = SchemaMetadata::new();
//! schema
//!     .entity("Document", "id")
//!     .scalar("Document", "age");
//!
//! let mut cb = CriteriaBuilder::new(Arc::new(schema), "Document", "d").unwrap();
//! cb.r#where("d.age").unwrap().between(20, 30).unwrap();
//! assert_eq!(
//!     cb.query_string().unwrap(),
//!     "SELECT d FROM Document d WHERE d.age BETWEEN :param_0 AND :param_1"
//! );
//! ```

pub mod alias;
pub mod builder;
pub mod clause;
pub mod error;
pub mod executor;
pub mod expr;
pub mod join;
pub mod metadata;
pub mod pagination;
pub mod params;
pub mod predicate;
pub mod render;
pub mod value;

pub use builder::{
    ConjunctionBuilder, CriteriaBuilder, DisjunctionBuilder, JoinOnBuilder, RestrictionBinder,
    SubqueryBuilder,
};
pub use error::{QueryError, Result};
pub use executor::{BoundQuery, QueryExecutor, RowRange, Tuple};
pub use expr::Expression;
pub use join::JoinType;
pub use metadata::{AttributeKind, Metamodel, SchemaMetadata};
pub use pagination::{Keyset, PagedResult, PaginatedCriteriaBuilder};
pub use predicate::Predicate;
pub use value::{TemporalKind, Value};
