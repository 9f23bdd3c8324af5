#![forbid(unsafe_code)]

//! Nested AND/OR builder discipline.
//!
//! Each restriction clause (WHERE, HAVING, join ON) owns one
//! [`PredicateComposer`]. Compound sub-builders are arena slots addressed by
//! [`BuilderHandle`]; a parent with an open child rejects further additions
//! until that child is ended, and ending a builder folds its accumulated
//! predicate into the parent slot. Freezing the composer yields the final
//! predicate tree and consumes the arena.

use crate::error::{QueryError, Result};
use crate::predicate::Predicate;

/// Whether a builder collects a conjunction or a disjunction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ComposeMode {
    /// Children joined with AND.
    And,
    /// Children joined with OR.
    Or,
}

/// Index of a builder slot inside a [`PredicateComposer`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BuilderHandle(usize);

impl BuilderHandle {
    /// Handle of the clause's root conjunction.
    pub const ROOT: BuilderHandle = BuilderHandle(0);
}

#[derive(Clone, Debug)]
struct ComposerNode {
    mode: ComposeMode,
    children: Vec<Predicate>,
    parent: Option<usize>,
    open_child: Option<usize>,
    ended: bool,
    negate: bool,
}

/// Arena of nested AND/OR builders for one restriction clause.
#[derive(Clone, Debug)]
pub struct PredicateComposer {
    nodes: Vec<ComposerNode>,
}

impl Default for PredicateComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl PredicateComposer {
    /// Creates a composer with an empty root conjunction.
    pub fn new() -> Self {
        Self {
            nodes: vec![ComposerNode {
                mode: ComposeMode::And,
                children: Vec::new(),
                parent: None,
                open_child: None,
                ended: false,
                negate: false,
            }],
        }
    }

    /// Whether the root has collected anything.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.nodes[0].children.is_empty()
    }

    /// Starts a child builder under `parent`.
    pub fn start(&mut self, parent: BuilderHandle, mode: ComposeMode) -> Result<BuilderHandle> {
        self.start_inner(parent, mode, false)
    }

    /// Starts a negated child builder under `parent`.
    pub fn start_negated(
        &mut self,
        parent: BuilderHandle,
        mode: ComposeMode,
    ) -> Result<BuilderHandle> {
        self.start_inner(parent, mode, true)
    }

    fn start_inner(
        &mut self,
        parent: BuilderHandle,
        mode: ComposeMode,
        negate: bool,
    ) -> Result<BuilderHandle> {
        let slot = &self.nodes[parent.0];
        if slot.ended {
            return Err(QueryError::BuilderNotStarted);
        }
        if slot.open_child.is_some() {
            return Err(QueryError::UnendedBuilder);
        }
        let id = self.nodes.len();
        self.nodes.push(ComposerNode {
            mode,
            children: Vec::new(),
            parent: Some(parent.0),
            open_child: None,
            ended: false,
            negate,
        });
        self.nodes[parent.0].open_child = Some(id);
        Ok(BuilderHandle(id))
    }

    /// Adds a finished predicate to a builder.
    pub fn add(&mut self, handle: BuilderHandle, predicate: Predicate) -> Result<()> {
        let slot = &self.nodes[handle.0];
        if slot.ended {
            return Err(QueryError::BuilderNotStarted);
        }
        if slot.open_child.is_some() {
            return Err(QueryError::UnendedBuilder);
        }
        self.nodes[handle.0].children.push(predicate);
        Ok(())
    }

    /// Ends a child builder, folding its predicate into the parent.
    pub fn end(&mut self, handle: BuilderHandle) -> Result<()> {
        if handle.0 == 0 {
            return Err(QueryError::BuilderNotStarted);
        }
        let slot = &self.nodes[handle.0];
        if slot.ended {
            return Err(QueryError::BuilderNotStarted);
        }
        if slot.open_child.is_some() {
            return Err(QueryError::UnendedBuilder);
        }
        let parent = slot.parent.ok_or(QueryError::BuilderNotStarted)?;
        if self.nodes[parent].open_child != Some(handle.0) {
            return Err(QueryError::BuilderNotStarted);
        }
        let node = &mut self.nodes[handle.0];
        node.ended = true;
        let folded = match node.children.len() {
            0 => None,
            1 => Some(node.children.pop().unwrap_or(Predicate::And(Vec::new()))),
            _ => Some(match node.mode {
                ComposeMode::And => Predicate::And(std::mem::take(&mut node.children)),
                ComposeMode::Or => Predicate::Or(std::mem::take(&mut node.children)),
            }),
        };
        let negate = node.negate;
        self.nodes[parent].open_child = None;
        if let Some(pred) = folded {
            let pred = if negate { pred.negated() } else { pred };
            self.nodes[parent].children.push(pred);
        }
        Ok(())
    }

    /// Fails if any child builder is still open.
    pub fn verify_ended(&self) -> Result<()> {
        if self.nodes[0].open_child.is_some() {
            return Err(QueryError::UnendedBuilder);
        }
        Ok(())
    }

    /// Consumes the arena, producing the clause's final predicate.
    pub fn freeze(mut self) -> Result<Option<Predicate>> {
        self.verify_ended()?;
        let root = &mut self.nodes[0];
        Ok(match root.children.len() {
            0 => None,
            1 => root.children.pop(),
            _ => Some(Predicate::And(std::mem::take(&mut root.children))),
        })
    }
}
