#![forbid(unsafe_code)]

//! Fluent query construction.
//!
//! [`CriteriaBuilder`] is the entry point: clause methods mutate internal
//! managers and return `&mut Self` for chaining, restriction methods hand out
//! a [`RestrictionBinder`] that must be finished with a terminal call, and
//! compound AND/OR groups are scoped with closures so a group cannot outlive
//! its parent clause. Subqueries get their own [`SubqueryBuilder`] whose alias
//! and parameter scopes chain back to the enclosing query.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::alias::{AliasInfo, AliasKind, AliasManager, AliasSnapshot};
use crate::clause::{GroupByManager, OrderByItem, OrderByManager, SelectItem, SelectManager};
use crate::error::{QueryError, Result};
use crate::executor::{BoundQuery, QueryExecutor, Tuple};
use crate::expr::{parser, Expression, SubqueryExpr};
use crate::join::{ClauseKind, JoinManager, JoinNodeId, JoinType, ResolveContext};
use crate::metadata::Metamodel;
use crate::pagination::{Keyset, PaginatedCriteriaBuilder};
use crate::params::ParameterManager;
use crate::predicate::composer::{BuilderHandle, ComposeMode, PredicateComposer};
use crate::predicate::{CompareOp, Predicate};
use crate::render;
use crate::value::{TemporalKind, Value};

/// Compiled state of one query level.
///
/// Owned by a [`CriteriaBuilder`] or [`SubqueryBuilder`] while building, and
/// embedded frozen inside [`SubqueryExpr`] and the pagination compiler.
#[derive(Clone)]
pub struct QueryCore {
    pub(crate) mm: Arc<dyn Metamodel>,
    pub(crate) aliases: AliasManager,
    pub(crate) joins: JoinManager,
    pub(crate) selects: SelectManager,
    pub(crate) groups: GroupByManager,
    pub(crate) orders: OrderByManager,
    pub(crate) where_composer: PredicateComposer,
    pub(crate) having_composer: PredicateComposer,
    pub(crate) on_scratch: PredicateComposer,
    pub(crate) where_pred: Option<Predicate>,
    pub(crate) having_pred: Option<Predicate>,
    pub(crate) params: ParameterManager,
}

impl fmt::Debug for QueryCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCore")
            .field("entity", &self.joins.root_entity())
            .field("alias", &self.joins.root_alias())
            .finish_non_exhaustive()
    }
}

/// Which restriction clause a binder or group feeds.
#[derive(Clone, Copy, Debug)]
enum ClauseTarget {
    Where,
    Having,
    On(JoinNodeId),
}

impl ClauseTarget {
    fn clause(self) -> ClauseKind {
        match self {
            ClauseTarget::Where => ClauseKind::Where,
            ClauseTarget::Having => ClauseKind::Having,
            ClauseTarget::On(_) => ClauseKind::Join,
        }
    }
}

impl QueryCore {
    fn new(mm: Arc<dyn Metamodel>, entity: &str, alias: &str) -> Result<Self> {
        Self::with_scopes(mm, entity, alias, AliasManager::new(), ParameterManager::new())
    }

    fn with_parent(
        mm: Arc<dyn Metamodel>,
        entity: &str,
        alias: &str,
        parent: Arc<AliasSnapshot>,
        param_seed: u32,
    ) -> Result<Self> {
        Self::with_scopes(
            mm,
            entity,
            alias,
            AliasManager::with_parent(parent),
            ParameterManager::seeded(param_seed),
        )
    }

    fn with_scopes(
        mm: Arc<dyn Metamodel>,
        entity: &str,
        alias: &str,
        mut aliases: AliasManager,
        params: ParameterManager,
    ) -> Result<Self> {
        if !mm.has_entity(entity) {
            return Err(QueryError::UnknownEntity(entity.to_owned()));
        }
        aliases.register(AliasInfo {
            alias: alias.to_owned(),
            absolute_path: String::new(),
            kind: AliasKind::Root,
        })?;
        Ok(Self {
            joins: JoinManager::new(alias, entity),
            mm,
            aliases,
            selects: SelectManager::default(),
            groups: GroupByManager::default(),
            orders: OrderByManager::default(),
            where_composer: PredicateComposer::new(),
            having_composer: PredicateComposer::new(),
            on_scratch: PredicateComposer::new(),
            where_pred: None,
            having_pred: None,
            params,
        })
    }

    fn composer_mut(&mut self, target: ClauseTarget) -> &mut PredicateComposer {
        match target {
            ClauseTarget::Where => &mut self.where_composer,
            ClauseTarget::Having => &mut self.having_composer,
            ClauseTarget::On(_) => &mut self.on_scratch,
        }
    }

    fn register_parameters(&mut self, expr: &Expression) {
        match expr {
            Expression::Parameter(name) => self.params.register(name),
            Expression::Composite(parts) => {
                for p in parts {
                    self.register_parameters(p);
                }
            }
            Expression::Function { args, .. } => {
                for a in args {
                    self.register_parameters(a);
                }
            }
            Expression::Path(path) => {
                let indexes: Vec<Expression> = path
                    .elements
                    .iter()
                    .filter_map(|el| match el {
                        crate::expr::PathElement::Indexed { index, .. } => {
                            Some((**index).clone())
                        }
                        crate::expr::PathElement::Property(_) => None,
                    })
                    .collect();
                for index in indexes {
                    self.register_parameters(&index);
                }
            }
            Expression::Outer(inner) => self.register_parameters(inner),
            Expression::Case { whens, otherwise } => {
                for arm in whens {
                    self.register_parameters(&arm.condition);
                    self.register_parameters(&arm.result);
                }
                if let Some(e) = otherwise {
                    self.register_parameters(e);
                }
            }
            Expression::Literal(_) | Expression::Subquery(_) => {}
        }
    }

    fn resolve(&mut self, expr: Expression, ctx: ResolveContext) -> Result<Expression> {
        match expr {
            Expression::Path(path) => {
                let as_expr = Expression::Path(path);
                self.register_parameters(&as_expr);
                let Expression::Path(path) = as_expr else {
                    unreachable!()
                };
                let mm = Arc::clone(&self.mm);
                self.joins
                    .resolve_path(&mut self.aliases, mm.as_ref(), path, ctx)
            }
            Expression::Composite(parts) => {
                let parts = parts
                    .into_iter()
                    .map(|p| self.resolve(p, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expression::Composite(parts))
            }
            Expression::Function { name, args } => {
                let args = args
                    .into_iter()
                    .map(|a| self.resolve(a, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expression::Function { name, args })
            }
            Expression::Parameter(name) => {
                self.params.register(&name);
                Ok(Expression::Parameter(name))
            }
            Expression::Case { whens, otherwise } => {
                let whens = whens
                    .into_iter()
                    .map(|arm| {
                        Ok(crate::expr::CaseWhen {
                            condition: self.resolve(arm.condition, ctx)?,
                            result: self.resolve(arm.result, ctx)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let otherwise = match otherwise {
                    Some(e) => Some(Box::new(self.resolve(*e, ctx)?)),
                    None => None,
                };
                Ok(Expression::Case { whens, otherwise })
            }
            done @ (Expression::Literal(_) | Expression::Subquery(_) | Expression::Outer(_)) => {
                Ok(done)
            }
        }
    }

    fn parse_resolve(
        &mut self,
        text: &str,
        ctx: ResolveContext,
        allow_case: bool,
    ) -> Result<Expression> {
        let expr = parser::parse(text, allow_case)?;
        self.resolve(expr, ctx)
    }

    fn build_subquery(
        &mut self,
        build: impl FnOnce(&mut SubqueryBuilder) -> Result<()>,
    ) -> Result<QueryCore> {
        let mut sub = SubqueryBuilder {
            mm: Arc::clone(&self.mm),
            parent: self.aliases.snapshot(),
            param_seed: self.params.next_positional(),
            core: None,
        };
        build(&mut sub)?;
        let mut core = sub.finish()?;
        self.params.adopt(&mut core.params);
        Ok(core)
    }

    /// Clones the core with composers folded into final predicates.
    pub(crate) fn frozen(&self) -> Result<QueryCore> {
        self.where_composer.verify_ended()?;
        self.having_composer.verify_ended()?;
        let mut core = self.clone();
        let where_composer = std::mem::take(&mut core.where_composer);
        if let Some(pred) = where_composer.freeze()? {
            core.where_pred = Some(pred);
        }
        let having_composer = std::mem::take(&mut core.having_composer);
        if let Some(pred) = having_composer.freeze()? {
            core.having_pred = Some(pred);
        }
        Ok(core)
    }
}

/// Fluent builder for a top-level query.
#[derive(Debug)]
pub struct CriteriaBuilder {
    core: QueryCore,
}

impl CriteriaBuilder {
    /// Starts a query over `entity` aliased as `alias`.
    pub fn new(mm: Arc<dyn Metamodel>, entity: &str, alias: &str) -> Result<Self> {
        debug!(entity, alias, "starting query");
        Ok(Self {
            core: QueryCore::new(mm, entity, alias)?,
        })
    }

    /// Adds a projection item.
    ///
    /// Once any item is added the root entity is no longer the selected
    /// shape, which makes fetch joins illegal.
    pub fn select(&mut self, expr: &str) -> Result<&mut Self> {
        self.select_item(expr, None)
    }

    /// Adds a projection item under a select alias.
    pub fn select_as(&mut self, expr: &str, alias: &str) -> Result<&mut Self> {
        self.select_item(expr, Some(alias))
    }

    fn select_item(&mut self, expr: &str, alias: Option<&str>) -> Result<&mut Self> {
        if self.core.joins.has_fetch() {
            return Err(QueryError::FetchWithSelect);
        }
        let expr = self.core.parse_resolve(
            expr,
            ResolveContext::object(ClauseKind::Select),
            true,
        )?;
        if let Some(alias) = alias {
            self.core.aliases.register(AliasInfo {
                alias: alias.to_owned(),
                absolute_path: String::new(),
                kind: AliasKind::Select,
            })?;
        }
        self.core.selects.items.push(SelectItem {
            expr,
            alias: alias.map(str::to_owned),
        });
        Ok(self)
    }

    /// Adds a subquery projection item under a select alias.
    pub fn select_subquery(
        &mut self,
        alias: &str,
        build: impl FnOnce(&mut SubqueryBuilder) -> Result<()>,
    ) -> Result<&mut Self> {
        if self.core.joins.has_fetch() {
            return Err(QueryError::FetchWithSelect);
        }
        let sub = self.core.build_subquery(build)?;
        self.core.aliases.register(AliasInfo {
            alias: alias.to_owned(),
            absolute_path: String::new(),
            kind: AliasKind::Select,
        })?;
        self.core.selects.items.push(SelectItem {
            expr: Expression::Subquery(SubqueryExpr(Box::new(sub))),
            alias: Some(alias.to_owned()),
        });
        Ok(self)
    }

    /// Renders the projection with DISTINCT.
    pub fn distinct(&mut self) -> &mut Self {
        self.core.selects.distinct = true;
        self
    }

    /// Starts a WHERE restriction on the given expression.
    pub fn r#where(&mut self, expr: &str) -> Result<RestrictionBinder<'_>> {
        let left =
            self.core
                .parse_resolve(expr, ResolveContext::scalar(ClauseKind::Where), true)?;
        Ok(RestrictionBinder {
            core: &mut self.core,
            target: ClauseTarget::Where,
            handle: BuilderHandle::ROOT,
            left,
            negated: false,
        })
    }

    /// Adds a WHERE disjunction built inside the closure.
    pub fn where_or(
        &mut self,
        build: impl FnOnce(&mut DisjunctionBuilder<'_>) -> Result<()>,
    ) -> Result<&mut Self> {
        let handle = self
            .core
            .where_composer
            .start(BuilderHandle::ROOT, ComposeMode::Or)?;
        let mut group = DisjunctionBuilder {
            core: &mut self.core,
            target: ClauseTarget::Where,
            handle,
        };
        build(&mut group)?;
        self.core.where_composer.end(handle)?;
        Ok(self)
    }

    /// Starts a WHERE restriction whose left side is a subquery.
    pub fn where_subquery(
        &mut self,
        build: impl FnOnce(&mut SubqueryBuilder) -> Result<()>,
    ) -> Result<RestrictionBinder<'_>> {
        let sub = self.core.build_subquery(build)?;
        Ok(RestrictionBinder {
            core: &mut self.core,
            target: ClauseTarget::Where,
            handle: BuilderHandle::ROOT,
            left: Expression::Subquery(SubqueryExpr(Box::new(sub))),
            negated: false,
        })
    }

    /// Starts a WHERE restriction whose left side is `template` with the
    /// subquery grafted in for `placeholder`.
    ///
    /// The placeholder must appear as a standalone identifier, e.g.
    /// `"FUNCTION('ARRAY_LENGTH', sq)"` with placeholder `"sq"`.
    pub fn where_subquery_in(
        &mut self,
        placeholder: &str,
        template: &str,
        build: impl FnOnce(&mut SubqueryBuilder) -> Result<()>,
    ) -> Result<RestrictionBinder<'_>> {
        let sub = self.core.build_subquery(build)?;
        let template = parser::parse(template, true)?;
        let grafted = template.substitute(
            placeholder,
            &Expression::Subquery(SubqueryExpr(Box::new(sub))),
        );
        let left = self
            .core
            .resolve(grafted, ResolveContext::scalar(ClauseKind::Where))?;
        Ok(RestrictionBinder {
            core: &mut self.core,
            target: ClauseTarget::Where,
            handle: BuilderHandle::ROOT,
            left,
            negated: false,
        })
    }

    /// Adds `EXISTS (subquery)` to the WHERE clause.
    pub fn where_exists(
        &mut self,
        build: impl FnOnce(&mut SubqueryBuilder) -> Result<()>,
    ) -> Result<&mut Self> {
        let sub = self.core.build_subquery(build)?;
        self.core.where_composer.add(
            BuilderHandle::ROOT,
            Predicate::Exists(SubqueryExpr(Box::new(sub))),
        )?;
        Ok(self)
    }

    /// Adds `NOT EXISTS (subquery)` to the WHERE clause.
    pub fn where_not_exists(
        &mut self,
        build: impl FnOnce(&mut SubqueryBuilder) -> Result<()>,
    ) -> Result<&mut Self> {
        let sub = self.core.build_subquery(build)?;
        self.core.where_composer.add(
            BuilderHandle::ROOT,
            Predicate::Exists(SubqueryExpr(Box::new(sub))).negated(),
        )?;
        Ok(self)
    }

    /// Adds a grouping expression.
    pub fn group_by(&mut self, expr: &str) -> Result<&mut Self> {
        let expr =
            self.core
                .parse_resolve(expr, ResolveContext::scalar(ClauseKind::GroupBy), false)?;
        self.core.groups.items.push(expr);
        Ok(self)
    }

    /// Starts a HAVING restriction; requires a GROUP BY clause.
    pub fn having(&mut self, expr: &str) -> Result<RestrictionBinder<'_>> {
        if self.core.groups.items.is_empty() {
            return Err(QueryError::HavingWithoutGroupBy);
        }
        let left =
            self.core
                .parse_resolve(expr, ResolveContext::scalar(ClauseKind::Having), true)?;
        Ok(RestrictionBinder {
            core: &mut self.core,
            target: ClauseTarget::Having,
            handle: BuilderHandle::ROOT,
            left,
            negated: false,
        })
    }

    /// Adds a HAVING disjunction built inside the closure.
    pub fn having_or(
        &mut self,
        build: impl FnOnce(&mut DisjunctionBuilder<'_>) -> Result<()>,
    ) -> Result<&mut Self> {
        if self.core.groups.items.is_empty() {
            return Err(QueryError::HavingWithoutGroupBy);
        }
        let handle = self
            .core
            .having_composer
            .start(BuilderHandle::ROOT, ComposeMode::Or)?;
        let mut group = DisjunctionBuilder {
            core: &mut self.core,
            target: ClauseTarget::Having,
            handle,
        };
        build(&mut group)?;
        self.core.having_composer.end(handle)?;
        Ok(self)
    }

    /// Adds an ORDER BY item.
    ///
    /// A bare identifier matching a select alias orders by that item;
    /// anything else is parsed and resolved as an expression.
    pub fn order_by(&mut self, expr: &str, ascending: bool, nulls_first: bool) -> Result<&mut Self> {
        let item = if self.core.selects.by_alias(expr.trim()).is_some() {
            OrderByItem {
                expr: None,
                select_alias: Some(expr.trim().to_owned()),
                ascending,
                nulls_first,
            }
        } else {
            let expr = self.core.parse_resolve(
                expr,
                ResolveContext::scalar(ClauseKind::OrderBy),
                false,
            )?;
            OrderByItem {
                expr: Some(expr),
                select_alias: None,
                ascending,
                nulls_first,
            }
        };
        self.core.orders.items.push(item);
        Ok(self)
    }

    /// Adds an ascending ORDER BY item with NULLS LAST.
    pub fn order_by_asc(&mut self, expr: &str) -> Result<&mut Self> {
        self.order_by(expr, true, false)
    }

    /// Adds a descending ORDER BY item with NULLS LAST.
    pub fn order_by_desc(&mut self, expr: &str) -> Result<&mut Self> {
        self.order_by(expr, false, false)
    }

    fn add_join(
        &mut self,
        path: &str,
        alias: &str,
        join_type: JoinType,
        fetch: bool,
        default_join: bool,
    ) -> Result<JoinNodeId> {
        if fetch && !self.core.selects.selects_root() {
            return Err(QueryError::FetchWithSelect);
        }
        let parsed = parser::parse(path, false)?;
        let Expression::Path(parsed) = parsed else {
            return Err(QueryError::InvalidPath(path.to_owned()));
        };
        let mm = Arc::clone(&self.core.mm);
        self.core.joins.join(
            &mut self.core.aliases,
            mm.as_ref(),
            &parsed,
            alias,
            join_type,
            fetch,
            default_join,
        )
    }

    /// Adds an explicit join that implicit path resolution will not reuse.
    pub fn join(&mut self, path: &str, alias: &str, join_type: JoinType) -> Result<&mut Self> {
        self.add_join(path, alias, join_type, false, false)?;
        Ok(self)
    }

    /// Adds an explicit join that becomes the default for its relation.
    pub fn join_default(
        &mut self,
        path: &str,
        alias: &str,
        join_type: JoinType,
    ) -> Result<&mut Self> {
        self.add_join(path, alias, join_type, false, true)?;
        Ok(self)
    }

    /// `join` with [`JoinType::Inner`].
    pub fn inner_join(&mut self, path: &str, alias: &str) -> Result<&mut Self> {
        self.join(path, alias, JoinType::Inner)
    }

    /// `join` with [`JoinType::Left`].
    pub fn left_join(&mut self, path: &str, alias: &str) -> Result<&mut Self> {
        self.join(path, alias, JoinType::Left)
    }

    /// `join` with [`JoinType::Right`].
    pub fn right_join(&mut self, path: &str, alias: &str) -> Result<&mut Self> {
        self.join(path, alias, JoinType::Right)
    }

    /// Adds an explicit fetch join; only legal while the root is selected.
    pub fn join_fetch(&mut self, path: &str, alias: &str, join_type: JoinType) -> Result<&mut Self> {
        self.add_join(path, alias, join_type, true, false)?;
        Ok(self)
    }

    /// `join_fetch` with [`JoinType::Inner`].
    pub fn inner_join_fetch(&mut self, path: &str, alias: &str) -> Result<&mut Self> {
        self.join_fetch(path, alias, JoinType::Inner)
    }

    /// `join_fetch` with [`JoinType::Left`].
    pub fn left_join_fetch(&mut self, path: &str, alias: &str) -> Result<&mut Self> {
        self.join_fetch(path, alias, JoinType::Left)
    }

    /// Marks the joins along `path` as fetched, creating them if needed.
    pub fn fetch(&mut self, path: &str) -> Result<&mut Self> {
        if !self.core.selects.selects_root() {
            return Err(QueryError::FetchWithSelect);
        }
        let ctx = ResolveContext {
            clause: ClauseKind::Select,
            allow_object_leaf: true,
            fetch: true,
        };
        self.core.parse_resolve(path, ctx, false)?;
        Ok(self)
    }

    /// Adds an explicit join and opens its ON restriction builder.
    pub fn join_on(
        &mut self,
        path: &str,
        alias: &str,
        join_type: JoinType,
    ) -> Result<JoinOnBuilder<'_>> {
        let node = self.add_join(path, alias, join_type, false, false)?;
        self.core.on_scratch = PredicateComposer::new();
        Ok(JoinOnBuilder {
            core: &mut self.core,
            node,
        })
    }

    /// `join_on` with [`JoinType::Left`].
    pub fn left_join_on(&mut self, path: &str, alias: &str) -> Result<JoinOnBuilder<'_>> {
        self.join_on(path, alias, JoinType::Left)
    }

    /// `join_on` with [`JoinType::Inner`].
    pub fn inner_join_on(&mut self, path: &str, alias: &str) -> Result<JoinOnBuilder<'_>> {
        self.join_on(path, alias, JoinType::Inner)
    }

    /// Binds a value to a named parameter.
    pub fn set_parameter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.core.params.satisfy(name, value.into());
        self
    }

    /// Binds a temporal value to a named parameter.
    pub fn set_temporal_parameter(
        &mut self,
        name: &str,
        epoch_millis: i64,
        kind: TemporalKind,
    ) -> &mut Self {
        self.core.params.satisfy(
            name,
            Value::Temporal {
                epoch_millis,
                kind,
            },
        );
        self
    }

    /// Renders the query text.
    pub fn query_string(&self) -> Result<String> {
        Ok(render::generate(&self.core.frozen()?, None))
    }

    /// Renders the query together with its parameter bindings.
    pub fn build_query(&self) -> Result<BoundQuery> {
        let frozen = self.core.frozen()?;
        Ok(BoundQuery {
            text: render::generate(&frozen, None),
            params: frozen.params.bindings()?,
        })
    }

    /// Renders and runs the query.
    pub fn execute(&self, executor: &dyn QueryExecutor) -> Result<Vec<Tuple>> {
        executor.query(&self.build_query()?, None)
    }

    /// Converts the builder into a paginated query over the given window.
    ///
    /// Consumes the builder; the query shape is frozen from this point on.
    pub fn page(self, first: usize, max: usize) -> Result<PaginatedCriteriaBuilder> {
        PaginatedCriteriaBuilder::new(self.core.frozen()?, first, max, None)
    }

    /// Like [`CriteriaBuilder::page`], seeding keyset continuation from a
    /// previous page's keyset.
    pub fn page_with_keyset(
        self,
        keyset: Keyset,
        first: usize,
        max: usize,
    ) -> Result<PaginatedCriteriaBuilder> {
        PaginatedCriteriaBuilder::new(self.core.frozen()?, first, max, Some(keyset))
    }
}

/// In-progress restriction: a left-hand expression waiting for its terminal.
#[derive(Debug)]
pub struct RestrictionBinder<'a> {
    core: &'a mut QueryCore,
    target: ClauseTarget,
    handle: BuilderHandle,
    left: Expression,
    negated: bool,
}

impl<'a> RestrictionBinder<'a> {
    /// Negates the predicate produced by the terminal.
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    fn push(self, predicate: Predicate) -> Result<()> {
        let predicate = if self.negated {
            predicate.negated()
        } else {
            predicate
        };
        let target = self.target;
        self.core.composer_mut(target).add(self.handle, predicate)
    }

    fn compare_value(self, op: CompareOp, value: Value) -> Result<()> {
        let right = Expression::Parameter(self.core.params.add_value(value));
        let left = self.left.clone();
        self.push(Predicate::Compare { op, left, right })
    }

    fn compare_expr(self, op: CompareOp, expr: &str) -> Result<()> {
        let right =
            self.core
                .parse_resolve(expr, ResolveContext::scalar(self.target.clause()), true)?;
        let left = self.left.clone();
        self.push(Predicate::Compare { op, left, right })
    }

    /// `left = value`.
    pub fn eq(self, value: impl Into<Value>) -> Result<()> {
        self.compare_value(CompareOp::Eq, value.into())
    }

    /// `left <> value`.
    pub fn ne(self, value: impl Into<Value>) -> Result<()> {
        self.compare_value(CompareOp::Ne, value.into())
    }

    /// `left < value`.
    pub fn lt(self, value: impl Into<Value>) -> Result<()> {
        self.compare_value(CompareOp::Lt, value.into())
    }

    /// `left <= value`.
    pub fn le(self, value: impl Into<Value>) -> Result<()> {
        self.compare_value(CompareOp::Le, value.into())
    }

    /// `left > value`.
    pub fn gt(self, value: impl Into<Value>) -> Result<()> {
        self.compare_value(CompareOp::Gt, value.into())
    }

    /// `left >= value`.
    pub fn ge(self, value: impl Into<Value>) -> Result<()> {
        self.compare_value(CompareOp::Ge, value.into())
    }

    /// `left = expr`.
    pub fn eq_expression(self, expr: &str) -> Result<()> {
        self.compare_expr(CompareOp::Eq, expr)
    }

    /// `left <> expr`.
    pub fn ne_expression(self, expr: &str) -> Result<()> {
        self.compare_expr(CompareOp::Ne, expr)
    }

    /// `left < expr`.
    pub fn lt_expression(self, expr: &str) -> Result<()> {
        self.compare_expr(CompareOp::Lt, expr)
    }

    /// `left <= expr`.
    pub fn le_expression(self, expr: &str) -> Result<()> {
        self.compare_expr(CompareOp::Le, expr)
    }

    /// `left > expr`.
    pub fn gt_expression(self, expr: &str) -> Result<()> {
        self.compare_expr(CompareOp::Gt, expr)
    }

    /// `left >= expr`.
    pub fn ge_expression(self, expr: &str) -> Result<()> {
        self.compare_expr(CompareOp::Ge, expr)
    }

    /// `left BETWEEN start AND end`, bounds inclusive.
    pub fn between(self, start: impl Into<Value>, end: impl Into<Value>) -> Result<()> {
        let (start, end) = (start.into(), end.into());
        if start.is_null() || end.is_null() {
            return Err(QueryError::NullBetweenBound);
        }
        let start = Expression::Parameter(self.core.params.add_value(start));
        let end = Expression::Parameter(self.core.params.add_value(end));
        let left = self.left.clone();
        self.push(Predicate::Between { left, start, end })
    }

    /// `NOT left BETWEEN start AND end`.
    pub fn not_between(self, start: impl Into<Value>, end: impl Into<Value>) -> Result<()> {
        self.not().between(start, end)
    }

    /// `left LIKE pattern`, optionally case-insensitive via UPPER wrapping.
    pub fn like(self, pattern: &str, case_sensitive: bool, escape: Option<char>) -> Result<()> {
        let pattern = Expression::Parameter(
            self.core.params.add_value(Value::String(pattern.to_owned())),
        );
        let left = self.left.clone();
        self.push(Predicate::Like {
            left,
            pattern,
            case_sensitive,
            escape,
        })
    }

    /// Negated [`RestrictionBinder::like`].
    pub fn not_like(self, pattern: &str, case_sensitive: bool, escape: Option<char>) -> Result<()> {
        self.not().like(pattern, case_sensitive, escape)
    }

    /// `left IN :param` with the values bound as a single list parameter.
    pub fn in_list(self, values: Vec<Value>) -> Result<()> {
        let name = self.core.params.add_value(Value::List(values));
        let left = self.left.clone();
        self.push(Predicate::In {
            left,
            values: vec![Expression::Parameter(name)],
        })
    }

    /// `left IS NULL`.
    pub fn is_null(self) -> Result<()> {
        let left = self.left.clone();
        self.push(Predicate::IsNull(left))
    }

    /// `left IS NOT NULL`.
    pub fn is_not_null(self) -> Result<()> {
        let left = self.left.clone();
        self.push(Predicate::IsNull(left).negated())
    }
}

/// Builder for an OR group inside a restriction clause.
#[derive(Debug)]
pub struct DisjunctionBuilder<'a> {
    core: &'a mut QueryCore,
    target: ClauseTarget,
    handle: BuilderHandle,
}

impl<'a> DisjunctionBuilder<'a> {
    /// Starts a restriction term of the disjunction.
    pub fn r#where(&mut self, expr: &str) -> Result<RestrictionBinder<'_>> {
        let left =
            self.core
                .parse_resolve(expr, ResolveContext::scalar(self.target.clause()), true)?;
        Ok(RestrictionBinder {
            core: &mut *self.core,
            target: self.target,
            handle: self.handle,
            left,
            negated: false,
        })
    }

    /// Adds a nested AND group as one term of the disjunction.
    pub fn where_and(
        &mut self,
        build: impl FnOnce(&mut ConjunctionBuilder<'_>) -> Result<()>,
    ) -> Result<&mut Self> {
        let handle = self
            .core
            .composer_mut(self.target)
            .start(self.handle, ComposeMode::And)?;
        let mut group = ConjunctionBuilder {
            core: &mut *self.core,
            target: self.target,
            handle,
        };
        build(&mut group)?;
        self.core.composer_mut(self.target).end(handle)?;
        Ok(self)
    }
}

/// Builder for an AND group nested inside a disjunction.
#[derive(Debug)]
pub struct ConjunctionBuilder<'a> {
    core: &'a mut QueryCore,
    target: ClauseTarget,
    handle: BuilderHandle,
}

impl<'a> ConjunctionBuilder<'a> {
    /// Starts a restriction term of the conjunction.
    pub fn r#where(&mut self, expr: &str) -> Result<RestrictionBinder<'_>> {
        let left =
            self.core
                .parse_resolve(expr, ResolveContext::scalar(self.target.clause()), true)?;
        Ok(RestrictionBinder {
            core: &mut *self.core,
            target: self.target,
            handle: self.handle,
            left,
            negated: false,
        })
    }

    /// Adds a nested OR group as one term of the conjunction.
    pub fn where_or(
        &mut self,
        build: impl FnOnce(&mut DisjunctionBuilder<'_>) -> Result<()>,
    ) -> Result<&mut Self> {
        let handle = self
            .core
            .composer_mut(self.target)
            .start(self.handle, ComposeMode::Or)?;
        let mut group = DisjunctionBuilder {
            core: &mut *self.core,
            target: self.target,
            handle,
        };
        build(&mut group)?;
        self.core.composer_mut(self.target).end(handle)?;
        Ok(self)
    }
}

/// Builder for an explicit join's ON restriction.
#[derive(Debug)]
pub struct JoinOnBuilder<'a> {
    core: &'a mut QueryCore,
    node: JoinNodeId,
}

impl<'a> JoinOnBuilder<'a> {
    /// Starts an ON restriction term.
    pub fn on(&mut self, expr: &str) -> Result<RestrictionBinder<'_>> {
        let left =
            self.core
                .parse_resolve(expr, ResolveContext::scalar(ClauseKind::Join), false)?;
        Ok(RestrictionBinder {
            core: &mut *self.core,
            target: ClauseTarget::On(self.node),
            handle: BuilderHandle::ROOT,
            left,
            negated: false,
        })
    }

    /// Adds an ON disjunction built inside the closure.
    pub fn on_or(
        &mut self,
        build: impl FnOnce(&mut DisjunctionBuilder<'_>) -> Result<()>,
    ) -> Result<&mut Self> {
        let handle = self
            .core
            .on_scratch
            .start(BuilderHandle::ROOT, ComposeMode::Or)?;
        let mut group = DisjunctionBuilder {
            core: &mut *self.core,
            target: ClauseTarget::On(self.node),
            handle,
        };
        build(&mut group)?;
        self.core.on_scratch.end(handle)?;
        Ok(self)
    }

    /// Finishes the ON clause, attaching the accumulated restriction.
    pub fn end(self) -> Result<()> {
        let composer = std::mem::take(&mut self.core.on_scratch);
        if let Some(pred) = composer.freeze()? {
            self.core.joins.add_on_predicate(self.node, pred);
        }
        Ok(())
    }
}

/// Fluent builder for a subquery.
///
/// Handed to closures on the parent builder; [`SubqueryBuilder::from`] must be
/// called before any other method.
pub struct SubqueryBuilder {
    mm: Arc<dyn Metamodel>,
    parent: Arc<AliasSnapshot>,
    param_seed: u32,
    core: Option<QueryCore>,
}

impl fmt::Debug for SubqueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubqueryBuilder")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl SubqueryBuilder {
    /// Sets the subquery's FROM target.
    pub fn from(&mut self, entity: &str, alias: &str) -> Result<&mut Self> {
        if self.core.is_some() {
            return Err(QueryError::InvalidPath("FROM target already set".to_owned()));
        }
        self.core = Some(QueryCore::with_parent(
            Arc::clone(&self.mm),
            entity,
            alias,
            Arc::clone(&self.parent),
            self.param_seed,
        )?);
        Ok(self)
    }

    fn core_mut(&mut self) -> Result<&mut QueryCore> {
        self.core.as_mut().ok_or(QueryError::MissingFrom)
    }

    /// Adds a projection item.
    pub fn select(&mut self, expr: &str) -> Result<&mut Self> {
        let core = self.core_mut()?;
        let expr = core.parse_resolve(expr, ResolveContext::object(ClauseKind::Select), true)?;
        core.selects.items.push(SelectItem { expr, alias: None });
        Ok(self)
    }

    /// Starts a WHERE restriction on the given expression.
    ///
    /// Paths anchored at an enclosing query's alias correlate the subquery
    /// instead of creating local joins.
    pub fn r#where(&mut self, expr: &str) -> Result<RestrictionBinder<'_>> {
        let core = self.core_mut()?;
        let left = core.parse_resolve(expr, ResolveContext::scalar(ClauseKind::Where), true)?;
        Ok(RestrictionBinder {
            core,
            target: ClauseTarget::Where,
            handle: BuilderHandle::ROOT,
            left,
            negated: false,
        })
    }

    /// Adds a WHERE disjunction built inside the closure.
    pub fn where_or(
        &mut self,
        build: impl FnOnce(&mut DisjunctionBuilder<'_>) -> Result<()>,
    ) -> Result<&mut Self> {
        let core = self.core_mut()?;
        let handle = core
            .where_composer
            .start(BuilderHandle::ROOT, ComposeMode::Or)?;
        let mut group = DisjunctionBuilder {
            core,
            target: ClauseTarget::Where,
            handle,
        };
        build(&mut group)?;
        self.core_mut()?.where_composer.end(handle)?;
        Ok(self)
    }

    /// Adds a grouping expression.
    pub fn group_by(&mut self, expr: &str) -> Result<&mut Self> {
        let core = self.core_mut()?;
        let expr = core.parse_resolve(expr, ResolveContext::scalar(ClauseKind::GroupBy), false)?;
        core.groups.items.push(expr);
        Ok(self)
    }

    /// Starts a HAVING restriction; requires a GROUP BY clause.
    pub fn having(&mut self, expr: &str) -> Result<RestrictionBinder<'_>> {
        let core = self.core_mut()?;
        if core.groups.items.is_empty() {
            return Err(QueryError::HavingWithoutGroupBy);
        }
        let left = core.parse_resolve(expr, ResolveContext::scalar(ClauseKind::Having), true)?;
        Ok(RestrictionBinder {
            core,
            target: ClauseTarget::Having,
            handle: BuilderHandle::ROOT,
            left,
            negated: false,
        })
    }

    fn finish(self) -> Result<QueryCore> {
        let core = self.core.ok_or(QueryError::MissingFrom)?;
        core.frozen()
    }
}
