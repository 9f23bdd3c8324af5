#![forbid(unsafe_code)]

//! Identity-level pagination.
//!
//! A paginated query is compiled into three derived queries over the frozen
//! core: a count query for the total, an id query that selects the window of
//! root identifiers (offset-based, or keyset-based when a previous page's
//! keyset still applies), and an object query that loads the original
//! projection restricted to those identifiers. Each derived query renders only
//! the joins its clauses reference, so a join used solely by the projection
//! never inflates the count.

use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use tracing::debug;

use crate::builder::QueryCore;
use crate::clause::{OrderByItem, SelectItem};
use crate::error::{QueryError, Result};
use crate::executor::{BoundQuery, QueryExecutor, RowRange, Tuple};
use crate::expr::{Expression, PathElement, PathExpr, ResolvedPath};
use crate::join::{ClauseKind, ClauseSet};
use crate::predicate::{CompareOp, Predicate};
use crate::render;
use crate::value::Value;

/// Ordering boundary values of a fetched page.
///
/// Serializable so a client can round-trip it across requests.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Keyset {
    /// Order-by values of the first row of the page.
    pub lowest: Vec<Value>,
    /// Order-by values of the last row of the page.
    pub highest: Vec<Value>,
    /// Window start the page was fetched with.
    pub first: usize,
    /// Window size the page was fetched with.
    pub max: usize,
}

/// One fetched page.
#[derive(Clone, Debug)]
pub struct PagedResult {
    /// Rows of the object query, in order.
    pub rows: Vec<Tuple>,
    /// Total number of root identities matching the restriction.
    pub total_size: u64,
    /// Keyset for continuing from this page; `None` without an ORDER BY.
    pub keyset: Option<Keyset>,
}

/// How the id query window is computed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Navigation {
    Offset,
    Same,
    Forward,
    Backward,
}

/// A frozen query together with its pagination window.
#[derive(Debug)]
pub struct PaginatedCriteriaBuilder {
    core: QueryCore,
    first: usize,
    max: usize,
    keyset: Option<Keyset>,
    id_field: String,
}

impl PaginatedCriteriaBuilder {
    pub(crate) fn new(
        core: QueryCore,
        first: usize,
        max: usize,
        keyset: Option<Keyset>,
    ) -> Result<Self> {
        if core.selects.distinct {
            return Err(QueryError::PaginateDistinct);
        }
        if !core.groups.items.is_empty() {
            return Err(QueryError::PaginateGroupBy);
        }
        let entity = core.joins.root_entity().to_owned();
        let id_field = core
            .mm
            .id_attribute(&entity)
            .ok_or(QueryError::UnknownAttribute {
                entity,
                attribute: "<id>".to_owned(),
            })?;
        Ok(Self {
            core,
            first,
            max,
            keyset,
            id_field,
        })
    }

    fn id_expr(&self) -> Expression {
        Expression::Path(PathExpr {
            elements: smallvec![PathElement::Property(self.id_field.clone())],
            resolved: Some(ResolvedPath {
                alias: self.core.joins.root_alias().to_owned(),
                field: Some(self.id_field.clone()),
                collection_value: false,
            }),
        })
    }

    /// Derives the id query core plus, for each order item, the key
    /// expression and the id-row column it is selected at. The keys back
    /// keyset boundaries and keyset capture.
    fn id_core(&self) -> (QueryCore, Vec<(Expression, usize)>) {
        let mut core = self.core.clone();
        let id = self.id_expr();
        let mut selects = vec![SelectItem {
            expr: id.clone(),
            alias: None,
        }];
        let mut groups = vec![id];
        let mut orders = Vec::with_capacity(core.orders.items.len());
        let mut keys = Vec::with_capacity(core.orders.items.len());
        for item in &self.core.orders.items {
            match (&item.select_alias, &item.expr) {
                (Some(alias), _) => {
                    let original = self
                        .core
                        .selects
                        .by_alias(alias)
                        .cloned()
                        .unwrap_or(SelectItem {
                            expr: Expression::Literal(alias.clone()),
                            alias: Some(alias.clone()),
                        });
                    if matches!(original.expr, Expression::Subquery(_)) {
                        // A subquery item cannot be inlined into WHERE or
                        // GROUP BY; keep it selected and order by its alias.
                        keys.push((original.expr.clone(), selects.len()));
                        selects.push(original);
                        orders.push(item.clone());
                    } else {
                        let expr = original.expr;
                        expr.visit_paths(&mut |path| {
                            if let Some(resolved) = &path.resolved {
                                core.joins.record_alias(&resolved.alias, ClauseKind::OrderBy);
                            }
                        });
                        let column = Self::key_column(
                            &self.id_field,
                            self.core.joins.root_alias(),
                            &mut selects,
                            &mut groups,
                            &expr,
                        );
                        keys.push((expr.clone(), column));
                        orders.push(OrderByItem {
                            expr: Some(expr),
                            select_alias: None,
                            ascending: item.ascending,
                            nulls_first: item.nulls_first,
                        });
                    }
                }
                (None, Some(expr)) => {
                    let column = Self::key_column(
                        &self.id_field,
                        self.core.joins.root_alias(),
                        &mut selects,
                        &mut groups,
                        expr,
                    );
                    keys.push((expr.clone(), column));
                    orders.push(item.clone());
                }
                (None, None) => {}
            }
        }
        core.selects.items = selects;
        core.selects.distinct = false;
        core.orders.items = orders;
        core.having_pred = None;
        // The id projection always collapses to distinct root identities.
        core.groups.items = groups;
        (core, keys)
    }

    /// Appends an order key to the id projection and grouping, returning the
    /// id-row column it is selected at. A key that is the root id itself
    /// reuses column 0 instead of being selected twice.
    fn key_column(
        id_field: &str,
        root_alias: &str,
        selects: &mut Vec<SelectItem>,
        groups: &mut Vec<Expression>,
        expr: &Expression,
    ) -> usize {
        if let Expression::Path(path) = expr {
            if matches!(
                &path.resolved,
                Some(r) if r.alias == root_alias
                    && r.field.as_deref() == Some(id_field)
                    && !r.collection_value
            ) {
                return 0;
            }
        }
        if !groups.contains(expr) {
            groups.push(expr.clone());
        }
        selects.push(SelectItem {
            expr: expr.clone(),
            alias: None,
        });
        selects.len() - 1
    }

    fn count_core(&self) -> QueryCore {
        let mut core = self.core.clone();
        let fan_out = core
            .joins
            .included_nodes(Some(Self::count_mask()))
            .iter()
            .any(|&id| core.joins.node(id).collection);
        let counted = if fan_out {
            Expression::Composite(vec![
                Expression::Literal("DISTINCT ".to_owned()),
                self.id_expr(),
            ])
        } else {
            self.id_expr()
        };
        core.selects.items = vec![SelectItem {
            expr: Expression::Function {
                name: "COUNT".to_owned(),
                args: vec![counted],
            },
            alias: None,
        }];
        core.selects.distinct = false;
        core.groups.items.clear();
        core.orders.items.clear();
        core.having_pred = None;
        core
    }

    fn object_core(&self) -> QueryCore {
        let mut core = self.core.clone();
        core.params.register("ids");
        core.where_pred = Some(Predicate::In {
            left: self.id_expr(),
            values: vec![Expression::Parameter("ids".to_owned())],
        });
        core.groups.items.clear();
        core.having_pred = None;
        core
    }

    fn id_mask() -> ClauseSet {
        ClauseSet::of(&[ClauseKind::Where, ClauseKind::OrderBy])
    }

    fn count_mask() -> ClauseSet {
        ClauseSet::of(&[ClauseKind::Where])
    }

    fn object_mask() -> ClauseSet {
        ClauseSet::of(&[ClauseKind::Select, ClauseKind::OrderBy])
    }

    /// Renders the count query.
    pub fn page_count_query_string(&self) -> String {
        render::generate(&self.count_core(), Some(Self::count_mask()))
    }

    /// Renders the offset-based id query.
    pub fn page_id_query_string(&self) -> String {
        render::generate(&self.id_core().0, Some(Self::id_mask()))
    }

    /// Renders the object query.
    pub fn query_string(&self) -> String {
        render::generate(&self.object_core(), Some(Self::object_mask()))
    }

    fn navigation(&self, key_count: usize) -> Navigation {
        let Some(prev) = &self.keyset else {
            return Navigation::Offset;
        };
        if key_count == 0
            || prev.max != self.max
            || prev.lowest.len() != key_count
            || prev.highest.len() != key_count
        {
            return Navigation::Offset;
        }
        if self.first == prev.first {
            Navigation::Same
        } else if self.first == prev.first + prev.max {
            Navigation::Forward
        } else if self.first + self.max == prev.first {
            Navigation::Backward
        } else {
            Navigation::Offset
        }
    }

    /// Builds the boundary restriction for keyset navigation.
    ///
    /// Produces `(k1 op :v1) OR (k1 = :v1 AND k2 op :v2) OR ...`; the last
    /// disjunct's comparison is made inclusive when re-fetching the same page.
    fn keyset_predicate(
        core: &mut QueryCore,
        keys: &[(Expression, bool)],
        tuple: &[Value],
        inclusive: bool,
        backward: bool,
    ) -> Predicate {
        let bound: Vec<Expression> = tuple
            .iter()
            .map(|v| Expression::Parameter(core.params.add_value(v.clone())))
            .collect();
        let mut disjuncts = Vec::with_capacity(keys.len());
        for i in 0..keys.len() {
            let mut terms = Vec::with_capacity(i + 1);
            for j in 0..i {
                terms.push(Predicate::Compare {
                    op: CompareOp::Eq,
                    left: keys[j].0.clone(),
                    right: bound[j].clone(),
                });
            }
            let (expr, ascending) = &keys[i];
            let mut op = if *ascending != backward {
                CompareOp::Gt
            } else {
                CompareOp::Lt
            };
            if inclusive && i == keys.len() - 1 {
                op = op.inclusive();
            }
            terms.push(Predicate::Compare {
                op,
                left: expr.clone(),
                right: bound[i].clone(),
            });
            disjuncts.push(if terms.len() == 1 {
                terms.pop().unwrap_or(Predicate::And(Vec::new()))
            } else {
                Predicate::And(terms)
            });
        }
        if disjuncts.len() == 1 {
            disjuncts.pop().unwrap_or(Predicate::And(Vec::new()))
        } else {
            Predicate::Or(disjuncts)
        }
    }

    fn conjoin_where(core: &mut QueryCore, extra: Predicate) {
        core.where_pred = Some(match core.where_pred.take() {
            None => extra,
            Some(Predicate::And(mut children)) => {
                children.push(extra);
                Predicate::And(children)
            }
            Some(existing) => Predicate::And(vec![existing, extra]),
        });
    }

    fn run_count(&self, executor: &dyn QueryExecutor) -> Result<u64> {
        let core = self.count_core();
        let query = BoundQuery {
            text: render::generate(&core, Some(Self::count_mask())),
            params: core.params.bindings()?,
        };
        executor.count(&query)
    }

    /// Runs the three derived queries and assembles the page.
    ///
    /// Execution order is id query, object query, then the count query.
    pub fn fetch_page(&mut self, executor: &dyn QueryExecutor) -> Result<PagedResult> {
        let (mut id_core, key_items) = self.id_core();
        let keys: Vec<(Expression, bool)> = key_items
            .iter()
            .zip(id_core.orders.items.iter().map(|i| i.ascending))
            .map(|((expr, _), ascending)| (expr.clone(), ascending))
            .collect();
        let nav = self.navigation(keys.len());
        debug!(first = self.first, max = self.max, ?nav, "fetching page");

        let range = match (nav, &self.keyset) {
            (Navigation::Same, Some(prev)) => {
                let pred =
                    Self::keyset_predicate(&mut id_core, &keys, &prev.lowest, true, false);
                Self::conjoin_where(&mut id_core, pred);
                RowRange {
                    first: 0,
                    max: self.max,
                }
            }
            (Navigation::Forward, Some(prev)) => {
                let pred =
                    Self::keyset_predicate(&mut id_core, &keys, &prev.highest, false, false);
                Self::conjoin_where(&mut id_core, pred);
                RowRange {
                    first: 0,
                    max: self.max,
                }
            }
            (Navigation::Backward, Some(prev)) => {
                let pred =
                    Self::keyset_predicate(&mut id_core, &keys, &prev.lowest, false, true);
                Self::conjoin_where(&mut id_core, pred);
                for item in &mut id_core.orders.items {
                    item.ascending = !item.ascending;
                    item.nulls_first = !item.nulls_first;
                }
                RowRange {
                    first: 0,
                    max: self.max,
                }
            }
            _ => RowRange {
                first: self.first,
                max: self.max,
            },
        };

        let id_query = BoundQuery {
            text: render::generate(&id_core, Some(Self::id_mask())),
            params: id_core.params.bindings()?,
        };
        let mut id_rows = executor.query(&id_query, Some(range))?;
        if nav == Navigation::Backward {
            id_rows.reverse();
        }
        if id_rows.is_empty() {
            return Ok(PagedResult {
                rows: Vec::new(),
                total_size: self.run_count(executor)?,
                keyset: None,
            });
        }

        let keyset = if key_items.is_empty() {
            None
        } else {
            let capture = |row: &Tuple| -> Vec<Value> {
                key_items
                    .iter()
                    .map(|&(_, column)| row.get(column).cloned().unwrap_or(Value::Null))
                    .collect()
            };
            Some(Keyset {
                lowest: capture(&id_rows[0]),
                highest: capture(&id_rows[id_rows.len() - 1]),
                first: self.first,
                max: self.max,
            })
        };

        let ids: Vec<Value> = id_rows
            .into_iter()
            .filter_map(|mut row| {
                if row.is_empty() {
                    None
                } else {
                    Some(row.swap_remove(0))
                }
            })
            .collect();

        let mut object_core = self.object_core();
        object_core.params.satisfy("ids", Value::List(ids));
        let object_query = BoundQuery {
            text: render::generate(&object_core, Some(Self::object_mask())),
            params: object_core.params.bindings()?,
        };
        let rows = executor.query(&object_query, None)?;
        let total_size = self.run_count(executor)?;

        self.keyset = keyset.clone();
        Ok(PagedResult {
            rows,
            total_size,
            keyset,
        })
    }

    /// Moves the window to another page, keeping the compiled query.
    pub fn window(&mut self, first: usize, max: usize) -> &mut Self {
        self.first = first;
        self.max = max;
        self
    }
}
