#![forbid(unsafe_code)]

//! Hierarchical alias namespace.
//!
//! Every query owns one [`AliasManager`]; a subquery's manager is constructed
//! with an immutable snapshot of its parent's scope so correlated lookups walk
//! the chain without back-pointers. Lookup checks the local scope first and
//! falls back to the parent chain. Auto-postfix counters are inherited through
//! the chain so a subquery never reuses an ancestor's postfix.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{QueryError, Result};

/// What an alias stands for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AliasKind {
    /// The query's FROM target.
    Root,
    /// A join node.
    Join,
    /// A select item alias.
    Select,
}

/// A registered alias and the absolute path it stands for.
#[derive(Clone, Debug)]
pub struct AliasInfo {
    /// The alias text.
    pub alias: String,
    /// Dotted path from the query root (empty for select aliases).
    pub absolute_path: String,
    /// What the alias refers to.
    pub kind: AliasKind,
}

/// Immutable view of an enclosing query's alias scope.
#[derive(Clone, Debug, Default)]
pub struct AliasSnapshot {
    aliases: FxHashMap<String, AliasInfo>,
    counters: FxHashMap<String, u32>,
    parent: Option<Arc<AliasSnapshot>>,
}

impl AliasSnapshot {
    fn resolve(&self, alias: &str) -> Option<&AliasInfo> {
        self.aliases
            .get(alias)
            .or_else(|| self.parent.as_ref().and_then(|p| p.resolve(alias)))
    }

    fn max_counter(&self, base: &str) -> Option<u32> {
        let local = self.counters.get(base).copied();
        let inherited = self.parent.as_ref().and_then(|p| p.max_counter(base));
        match (local, inherited) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Mutable alias scope for one query level.
#[derive(Clone, Debug, Default)]
pub struct AliasManager {
    aliases: FxHashMap<String, AliasInfo>,
    counters: FxHashMap<String, u32>,
    parent: Option<Arc<AliasSnapshot>>,
}

impl AliasManager {
    /// Creates a top-level scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a subquery scope backed by the parent snapshot.
    pub fn with_parent(parent: Arc<AliasSnapshot>) -> Self {
        Self {
            aliases: FxHashMap::default(),
            counters: FxHashMap::default(),
            parent: Some(parent),
        }
    }

    /// Captures the current scope (and its chain) as an immutable snapshot.
    pub fn snapshot(&self) -> Arc<AliasSnapshot> {
        Arc::new(AliasSnapshot {
            aliases: self.aliases.clone(),
            counters: self.counters.clone(),
            parent: self.parent.clone(),
        })
    }

    /// Registers an alias, failing if it resolves anywhere in the chain.
    pub fn register(&mut self, info: AliasInfo) -> Result<()> {
        if info.alias.is_empty() {
            return Err(QueryError::EmptyAlias);
        }
        if self.resolve(&info.alias).is_some() {
            return Err(QueryError::DuplicateAlias(info.alias));
        }
        self.counters.entry(info.alias.clone()).or_insert(0);
        self.aliases.insert(info.alias.clone(), info);
        Ok(())
    }

    /// Resolves an alias, local scope first, then the parent chain.
    pub fn resolve(&self, alias: &str) -> Option<&AliasInfo> {
        self.aliases
            .get(alias)
            .or_else(|| self.parent.as_ref().and_then(|p| p.resolve(alias)))
    }

    /// Resolves an alias in the local scope only.
    pub fn resolve_local(&self, alias: &str) -> Option<&AliasInfo> {
        self.aliases.get(alias)
    }

    /// Whether the alias only resolves through the parent chain.
    pub fn is_outer(&self, alias: &str) -> bool {
        !self.aliases.contains_key(alias)
            && self
                .parent
                .as_ref()
                .is_some_and(|p| p.resolve(alias).is_some())
    }

    /// Returns `base` when unused anywhere in the chain, else `base_N`.
    ///
    /// `N` is one more than the highest counter seen locally or in any
    /// ancestor scope; the new counter is recorded locally.
    pub fn generate_postfixed_alias(&mut self, base: &str) -> String {
        let local = self.counters.get(base).copied();
        let inherited = self.parent.as_ref().and_then(|p| p.max_counter(base));
        let counter = match (local, inherited) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).max(b.unwrap_or(0))),
        };
        let (next, alias) = match counter {
            None => (0, base.to_owned()),
            Some(c) => (c + 1, format!("{base}_{}", c + 1)),
        };
        self.counters.insert(base.to_owned(), next);
        trace!(base, alias = %alias, "generated postfixed alias");
        alias
    }

    /// Removes an alias from the local scope only.
    pub fn unregister(&mut self, alias: &str) {
        self.aliases.remove(alias);
    }
}
