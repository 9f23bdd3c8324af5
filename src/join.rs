#![forbid(unsafe_code)]

//! Join tree construction and implicit join resolution.
//!
//! The join tree is an arena of [`JoinNode`]s rooted at a pseudo-node for the
//! query's FROM target. Dotted paths are resolved against the tree: each
//! association hop reuses the default join for its relation or creates one,
//! and the resolved alias is written back into the path expression. Every node
//! remembers which clauses referenced it, which is what lets the pagination
//! compiler re-render the same tree with only the joins a derived query needs.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::alias::{AliasInfo, AliasKind, AliasManager};
use crate::error::{QueryError, Result};
use crate::expr::{Expression, PathElement, PathExpr, ResolvedPath};
use crate::metadata::{AttributeKind, Metamodel};
use crate::predicate::{CompareOp, Predicate};

/// SQL-style join flavor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JoinType {
    /// Plain inner join.
    Inner,
    /// Left outer join.
    Left,
    /// Right outer join.
    Right,
}

impl JoinType {
    /// Rendered join keyword.
    pub fn keyword(&self) -> &'static str {
        match self {
            JoinType::Inner => "JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
        }
    }
}

/// Clause that referenced a join node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClauseKind {
    /// SELECT projection.
    Select,
    /// WHERE restriction.
    Where,
    /// GROUP BY items.
    GroupBy,
    /// HAVING restriction.
    Having,
    /// ORDER BY items.
    OrderBy,
    /// Explicit join construction.
    Join,
}

impl ClauseKind {
    fn bit(self) -> u8 {
        match self {
            ClauseKind::Select => 1 << 0,
            ClauseKind::Where => 1 << 1,
            ClauseKind::GroupBy => 1 << 2,
            ClauseKind::Having => 1 << 3,
            ClauseKind::OrderBy => 1 << 4,
            ClauseKind::Join => 1 << 5,
        }
    }
}

/// Set of clauses that referenced a join node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ClauseSet(u8);

impl ClauseSet {
    /// The empty set.
    pub const EMPTY: ClauseSet = ClauseSet(0);

    /// Builds a set from the given kinds.
    pub fn of(kinds: &[ClauseKind]) -> Self {
        let mut set = ClauseSet::EMPTY;
        for kind in kinds {
            set.insert(*kind);
        }
        set
    }

    /// Adds a clause to the set.
    pub fn insert(&mut self, kind: ClauseKind) {
        self.0 |= kind.bit();
    }

    /// Whether the clause is in the set.
    pub fn contains(&self, kind: ClauseKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Whether the two sets share any clause.
    pub fn intersects(&self, other: ClauseSet) -> bool {
        self.0 & other.0 != 0
    }
}

/// Index of a node in the join tree arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JoinNodeId(usize);

impl JoinNodeId {
    /// The pseudo-root node standing for the FROM target.
    pub const ROOT: JoinNodeId = JoinNodeId(0);
}

/// One join in the tree.
#[derive(Clone, Debug)]
pub struct JoinNode {
    /// Relation attribute on the parent (empty for the root).
    pub relation: String,
    /// Dotted path from the root, with index suffixes.
    pub absolute_path: String,
    /// Alias the node renders under.
    pub alias: String,
    /// Entity the node produces.
    pub entity: String,
    /// Join flavor.
    pub join_type: JoinType,
    /// Whether the join is rendered with FETCH.
    pub fetch: bool,
    /// Whether implicit path resolution may reuse this node.
    pub default_join: bool,
    /// Whether the relation is collection- or map-valued.
    pub collection: bool,
    /// Index expression source for keyed joins, used for deduplication.
    pub index_key: Option<String>,
    /// Extra ON restriction, synthesized for keyed joins or set explicitly.
    pub on_predicate: Option<Predicate>,
    /// Parent node, `None` for the root.
    pub parent: Option<JoinNodeId>,
    /// Children in creation order.
    pub children: Vec<JoinNodeId>,
    /// Clauses that referenced this node.
    pub clauses: ClauseSet,
}

/// How a path resolution call should treat the tree.
#[derive(Clone, Copy, Debug)]
pub struct ResolveContext {
    /// Clause to record on every touched node.
    pub clause: ClauseKind,
    /// Whether an association-valued leaf is acceptable.
    pub allow_object_leaf: bool,
    /// Whether implicitly created joins should be fetched.
    pub fetch: bool,
}

impl ResolveContext {
    /// Context for a scalar-position expression in the given clause.
    pub fn scalar(clause: ClauseKind) -> Self {
        Self {
            clause,
            allow_object_leaf: false,
            fetch: false,
        }
    }

    /// Context for a projection-position expression.
    pub fn object(clause: ClauseKind) -> Self {
        Self {
            clause,
            allow_object_leaf: true,
            fetch: false,
        }
    }
}

/// The query's join tree.
#[derive(Clone, Debug)]
pub struct JoinManager {
    nodes: Vec<JoinNode>,
}

impl JoinManager {
    /// Creates a tree whose root stands for `entity` aliased as `alias`.
    pub fn new(alias: &str, entity: &str) -> Self {
        Self {
            nodes: vec![JoinNode {
                relation: String::new(),
                absolute_path: String::new(),
                alias: alias.to_owned(),
                entity: entity.to_owned(),
                join_type: JoinType::Inner,
                fetch: false,
                default_join: true,
                collection: false,
                index_key: None,
                on_predicate: None,
                parent: None,
                children: Vec::new(),
                clauses: ClauseSet::EMPTY,
            }],
        }
    }

    /// Root alias.
    pub fn root_alias(&self) -> &str {
        &self.nodes[0].alias
    }

    /// Root entity.
    pub fn root_entity(&self) -> &str {
        &self.nodes[0].entity
    }

    /// All nodes in creation order, pseudo-root first.
    pub fn nodes(&self) -> &[JoinNode] {
        &self.nodes
    }

    /// Looks up a node.
    pub fn node(&self, id: JoinNodeId) -> &JoinNode {
        &self.nodes[id.0]
    }

    /// Whether any node carries a fetch marker.
    pub fn has_fetch(&self) -> bool {
        self.nodes.iter().any(|n| n.fetch)
    }

    /// Finds the node registered under a join alias.
    pub fn alias_node(&self, alias: &str) -> Option<JoinNodeId> {
        self.nodes
            .iter()
            .position(|n| n.alias == alias)
            .map(JoinNodeId)
    }

    /// Attaches an ON restriction to a node, conjoining with any existing one.
    pub fn add_on_predicate(&mut self, id: JoinNodeId, predicate: Predicate) {
        let slot = &mut self.nodes[id.0].on_predicate;
        *slot = Some(match slot.take() {
            None => predicate,
            Some(Predicate::And(mut children)) => {
                children.push(predicate);
                Predicate::And(children)
            }
            Some(existing) => Predicate::And(vec![existing, predicate]),
        });
    }

    fn record(&mut self, id: usize, clause: ClauseKind) {
        self.nodes[id].clauses.insert(clause);
    }

    /// Records a clause on the node registered under `alias`, if any.
    pub(crate) fn record_alias(&mut self, alias: &str, clause: ClauseKind) {
        if let Some(id) = self.alias_node(alias) {
            self.record(id.0, clause);
        }
    }

    /// Resolves a dotted path, creating implicit joins as needed.
    ///
    /// The returned expression is the input path annotated with the alias it
    /// renders through, or an [`Expression::Outer`] wrapper when the path is
    /// anchored at an enclosing query's alias.
    pub fn resolve_path(
        &mut self,
        aliases: &mut AliasManager,
        mm: &dyn Metamodel,
        mut path: PathExpr,
        ctx: ResolveContext,
    ) -> Result<Expression> {
        let source = path.source();
        let mut current = 0usize;
        let mut start = 0usize;

        if let PathElement::Property(first) = &path.elements[0] {
            if first == self.root_alias() {
                if path.elements.len() == 1 {
                    self.record(0, ctx.clause);
                    path.resolved = Some(ResolvedPath {
                        alias: self.root_alias().to_owned(),
                        field: None,
                        collection_value: false,
                    });
                    return Ok(Expression::Path(path));
                }
                start = 1;
            } else if let Some(id) = self.alias_node(first) {
                if path.elements.len() == 1 {
                    self.record(id.0, ctx.clause);
                    path.resolved = Some(ResolvedPath {
                        alias: first.clone(),
                        field: None,
                        collection_value: false,
                    });
                    return Ok(Expression::Path(path));
                }
                current = id.0;
                start = 1;
            } else if aliases.is_outer(first) {
                let field = if path.elements.len() > 1 {
                    Some(
                        path.elements[1..]
                            .iter()
                            .map(|el| match el {
                                PathElement::Property(name) => name.clone(),
                                PathElement::Indexed { base, index } => {
                                    format!("{base}[{}]", index.source())
                                }
                            })
                            .collect::<Vec<_>>()
                            .join("."),
                    )
                } else {
                    None
                };
                path.resolved = Some(ResolvedPath {
                    alias: first.clone(),
                    field,
                    collection_value: false,
                });
                return Ok(Expression::Outer(Box::new(Expression::Path(path))));
            } else if matches!(
                aliases.resolve_local(first),
                Some(info) if info.kind == AliasKind::Select
            ) {
                return Err(QueryError::InvalidPath(source));
            }
        }

        let mut indexed_leaf = false;
        for i in start..path.elements.len() {
            let last = i + 1 == path.elements.len();
            let entity = self.nodes[current].entity.clone();
            match &path.elements[i] {
                PathElement::Property(name) => {
                    let kind = mm.attribute(&entity, name).ok_or_else(|| {
                        QueryError::UnknownAttribute {
                            entity: entity.clone(),
                            attribute: name.clone(),
                        }
                    })?;
                    match kind {
                        AttributeKind::Scalar => {
                            if !last {
                                return Err(QueryError::InvalidPath(source));
                            }
                            self.record(current, ctx.clause);
                            path.resolved = Some(ResolvedPath {
                                alias: self.nodes[current].alias.clone(),
                                field: Some(name.clone()),
                                collection_value: false,
                            });
                            return Ok(Expression::Path(path));
                        }
                        assoc => {
                            if last && !ctx.allow_object_leaf {
                                return Err(QueryError::ObjectLeafNotAllowed(source));
                            }
                            let name = name.clone();
                            current =
                                self.implicit_join(aliases, mm, current, &name, None, &assoc, ctx)?;
                        }
                    }
                }
                PathElement::Indexed { base, index } => {
                    let kind = mm.attribute(&entity, base).ok_or_else(|| {
                        QueryError::UnknownAttribute {
                            entity: entity.clone(),
                            attribute: base.clone(),
                        }
                    })?;
                    if !kind.is_collection_or_map() {
                        return Err(QueryError::NotIndexable(base.clone()));
                    }
                    let base = base.clone();
                    let index = index.clone();
                    current = self.implicit_join(
                        aliases,
                        mm,
                        current,
                        &base,
                        Some(&index),
                        &kind,
                        ctx,
                    )?;
                    indexed_leaf = last;
                }
            }
        }

        self.record(current, ctx.clause);
        path.resolved = Some(ResolvedPath {
            alias: self.nodes[current].alias.clone(),
            field: None,
            collection_value: indexed_leaf,
        });
        Ok(Expression::Path(path))
    }

    fn implicit_join(
        &mut self,
        aliases: &mut AliasManager,
        mm: &dyn Metamodel,
        parent: usize,
        relation: &str,
        index: Option<&Expression>,
        kind: &AttributeKind,
        ctx: ResolveContext,
    ) -> Result<usize> {
        let index_key = index.map(Expression::source);
        let existing = self.nodes[parent].children.iter().copied().find(|&id| {
            let n = &self.nodes[id.0];
            n.default_join && n.relation == relation && n.index_key == index_key
        });
        if let Some(id) = existing {
            self.record(id.0, ctx.clause);
            if ctx.fetch {
                self.nodes[id.0].fetch = true;
                self.record(id.0, ClauseKind::Select);
            }
            return Ok(id.0);
        }

        let target = kind
            .association_target()
            .ok_or_else(|| QueryError::InvalidPath(relation.to_owned()))?
            .to_owned();
        let base = match &index_key {
            Some(key) => format!("{relation}_{}", sanitize_index(key)),
            None => relation.to_owned(),
        };
        let alias = aliases.generate_postfixed_alias(&base);
        let segment = match &index_key {
            Some(key) => format!("{relation}[{key}]"),
            None => relation.to_owned(),
        };
        let absolute_path = if self.nodes[parent].absolute_path.is_empty() {
            segment
        } else {
            format!("{}.{}", self.nodes[parent].absolute_path, segment)
        };
        aliases.register(AliasInfo {
            alias: alias.clone(),
            absolute_path: absolute_path.clone(),
            kind: AliasKind::Join,
        })?;
        let join_type = if kind.is_optional_or_to_many() {
            JoinType::Left
        } else {
            JoinType::Inner
        };
        let on_predicate = index.map(|expr| Predicate::Compare {
            op: CompareOp::Eq,
            left: Expression::Literal(mm.map_key_expression(&alias)),
            right: expr.clone(),
        });

        let id = self.nodes.len();
        debug!(alias = %alias, path = %absolute_path, "created implicit join");
        let mut clauses = ClauseSet::EMPTY;
        clauses.insert(ctx.clause);
        if ctx.fetch {
            clauses.insert(ClauseKind::Select);
        }
        self.nodes.push(JoinNode {
            relation: relation.to_owned(),
            absolute_path,
            alias,
            entity: target,
            join_type,
            fetch: ctx.fetch,
            default_join: true,
            collection: kind.is_collection_or_map(),
            index_key,
            on_predicate,
            parent: Some(JoinNodeId(parent)),
            children: Vec::new(),
            clauses,
        });
        self.nodes[parent].children.push(JoinNodeId(id));
        Ok(id)
    }

    /// Creates an explicit join for the last hop of `path` under the given
    /// alias. Intermediate hops resolve like implicit joins.
    pub fn join(
        &mut self,
        aliases: &mut AliasManager,
        mm: &dyn Metamodel,
        path: &PathExpr,
        alias: &str,
        join_type: JoinType,
        fetch: bool,
        default_join: bool,
    ) -> Result<JoinNodeId> {
        let source = path.source();
        let mut current = 0usize;
        let mut start = 0usize;
        if let PathElement::Property(first) = &path.elements[0] {
            if first == self.root_alias() && path.elements.len() > 1 {
                start = 1;
            } else if let Some(id) = self.alias_node(first) {
                if path.elements.len() > 1 {
                    current = id.0;
                    start = 1;
                }
            }
        }
        if start >= path.elements.len() {
            return Err(QueryError::InvalidPath(source));
        }

        let ctx = ResolveContext {
            clause: ClauseKind::Join,
            allow_object_leaf: true,
            fetch,
        };
        for i in start..path.elements.len() - 1 {
            let entity = self.nodes[current].entity.clone();
            let name = path.elements[i].name().to_owned();
            let kind =
                mm.attribute(&entity, &name)
                    .ok_or_else(|| QueryError::UnknownAttribute {
                        entity: entity.clone(),
                        attribute: name.clone(),
                    })?;
            if matches!(kind, AttributeKind::Scalar) {
                return Err(QueryError::InvalidPath(source));
            }
            current = match &path.elements[i] {
                PathElement::Property(_) => {
                    self.implicit_join(aliases, mm, current, &name, None, &kind, ctx)?
                }
                PathElement::Indexed { index, .. } => {
                    let index = index.clone();
                    self.implicit_join(aliases, mm, current, &name, Some(&index), &kind, ctx)?
                }
            };
        }

        let entity = self.nodes[current].entity.clone();
        let relation = path.elements[path.elements.len() - 1].name().to_owned();
        let kind = mm
            .attribute(&entity, &relation)
            .ok_or_else(|| QueryError::UnknownAttribute {
                entity: entity.clone(),
                attribute: relation.clone(),
            })?;
        let target = kind
            .association_target()
            .ok_or_else(|| QueryError::InvalidPath(source.clone()))?
            .to_owned();

        let absolute_path = if self.nodes[current].absolute_path.is_empty() {
            relation.clone()
        } else {
            format!("{}.{}", self.nodes[current].absolute_path, relation)
        };
        aliases.register(AliasInfo {
            alias: alias.to_owned(),
            absolute_path: absolute_path.clone(),
            kind: AliasKind::Join,
        })?;

        if default_join {
            // A new default join takes over implicit resolution for the
            // relation; the previous default keeps its alias but is no longer
            // reused.
            for &child in &self.nodes[current].children.clone() {
                let n = &mut self.nodes[child.0];
                if n.relation == relation && n.index_key.is_none() {
                    n.default_join = false;
                }
            }
        }

        let id = self.nodes.len();
        debug!(alias, path = %absolute_path, "created explicit join");
        let mut clauses = ClauseSet::EMPTY;
        clauses.insert(ClauseKind::Join);
        if fetch {
            clauses.insert(ClauseKind::Select);
        }
        self.nodes.push(JoinNode {
            relation,
            absolute_path,
            alias: alias.to_owned(),
            entity: target,
            join_type,
            fetch,
            default_join,
            collection: kind.is_collection_or_map(),
            index_key: None,
            on_predicate: None,
            parent: Some(JoinNodeId(current)),
            children: Vec::new(),
            clauses,
        });
        self.nodes[current].children.push(JoinNodeId(id));
        Ok(JoinNodeId(id))
    }

    /// Computes the set of nodes a derived query must render.
    ///
    /// Starts from nodes referenced by any clause in `mask`, then closes over
    /// ancestors and over aliases referenced from included nodes' ON
    /// restrictions. `None` means all nodes.
    pub fn included_nodes(&self, mask: Option<ClauseSet>) -> Vec<JoinNodeId> {
        let Some(mask) = mask else {
            return (0..self.nodes.len()).map(JoinNodeId).collect();
        };
        let mut included = vec![false; self.nodes.len()];
        included[0] = true;
        for (i, node) in self.nodes.iter().enumerate().skip(1) {
            if node.clauses.intersects(mask) {
                included[i] = true;
            }
        }

        let alias_to_node: FxHashMap<&str, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.alias.as_str(), i))
            .collect();

        loop {
            let mut changed = false;
            for i in 0..self.nodes.len() {
                if !included[i] {
                    continue;
                }
                if let Some(parent) = self.nodes[i].parent {
                    if !included[parent.0] {
                        included[parent.0] = true;
                        changed = true;
                    }
                }
                if let Some(on) = &self.nodes[i].on_predicate {
                    let mut referenced = Vec::new();
                    on.visit_expressions(&mut |expr| {
                        expr.visit_paths(&mut |path| {
                            if let Some(resolved) = &path.resolved {
                                referenced.push(resolved.alias.clone());
                            }
                        });
                    });
                    for alias in referenced {
                        if let Some(&dep) = alias_to_node.get(alias.as_str()) {
                            if !included[dep] {
                                included[dep] = true;
                                changed = true;
                            }
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }

        (0..self.nodes.len())
            .filter(|&i| included[i])
            .map(JoinNodeId)
            .collect()
    }
}

fn sanitize_index(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}
