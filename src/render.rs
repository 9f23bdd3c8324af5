#![forbid(unsafe_code)]

//! Query string generation.
//!
//! Rendering is a pure function of a compiled query core: clause order is
//! fixed, joins render in creation order (parents always precede children),
//! and an optional clause mask restricts which joins a derived query emits.
//! Parameters render as `:name`; values never appear in the text.

use crate::builder::QueryCore;
use crate::clause::OrderByItem;
use crate::expr::Expression;
use crate::join::{ClauseSet, JoinNodeId};
use crate::predicate::Predicate;

/// Renders a query core to its textual form.
///
/// `join_filter` restricts the rendered joins to the clause mask (closed over
/// ancestors and ON dependencies); `None` renders the full tree.
pub fn generate(core: &QueryCore, join_filter: Option<ClauseSet>) -> String {
    let mut out = String::new();
    out.push_str("SELECT ");
    if core.selects.distinct {
        out.push_str("DISTINCT ");
    }
    if core.selects.selects_root() {
        out.push_str(core.joins.root_alias());
    } else {
        for (i, item) in core.selects.items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            render_expr(&mut out, &item.expr);
            if let Some(alias) = &item.alias {
                out.push_str(" AS ");
                out.push_str(alias);
            }
        }
    }

    out.push_str(" FROM ");
    out.push_str(core.joins.root_entity());
    out.push(' ');
    out.push_str(core.joins.root_alias());

    let included = core.joins.included_nodes(join_filter);
    for id in included {
        if id == JoinNodeId::ROOT {
            continue;
        }
        let node = core.joins.node(id);
        let parent = core.joins.node(node.parent.unwrap_or(JoinNodeId::ROOT));
        out.push(' ');
        out.push_str(node.join_type.keyword());
        if node.fetch {
            out.push_str(" FETCH");
        }
        out.push(' ');
        out.push_str(&parent.alias);
        out.push('.');
        out.push_str(&node.relation);
        out.push(' ');
        out.push_str(&node.alias);
        if let Some(on) = &node.on_predicate {
            out.push_str(" ON ");
            render_predicate(&mut out, on);
        }
    }

    if let Some(pred) = &core.where_pred {
        out.push_str(" WHERE ");
        render_predicate(&mut out, pred);
    }

    if !core.groups.items.is_empty() {
        out.push_str(" GROUP BY ");
        for (i, expr) in core.groups.items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            render_expr(&mut out, expr);
        }
    }

    if let Some(pred) = &core.having_pred {
        out.push_str(" HAVING ");
        render_predicate(&mut out, pred);
    }

    if !core.orders.items.is_empty() {
        out.push_str(" ORDER BY ");
        for (i, item) in core.orders.items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            render_order_item(&mut out, item);
        }
    }

    out
}

fn render_order_item(out: &mut String, item: &OrderByItem) {
    match (&item.select_alias, &item.expr) {
        (Some(alias), _) => out.push_str(alias),
        (None, Some(expr)) => render_expr(out, expr),
        (None, None) => {}
    }
    out.push_str(if item.ascending { " ASC" } else { " DESC" });
    out.push_str(if item.nulls_first {
        " NULLS FIRST"
    } else {
        " NULLS LAST"
    });
}

pub(crate) fn render_expr(out: &mut String, expr: &Expression) {
    match expr {
        Expression::Path(path) => match &path.resolved {
            Some(resolved) => {
                if resolved.collection_value {
                    out.push_str("VALUE(");
                    out.push_str(&resolved.alias);
                    out.push(')');
                } else {
                    out.push_str(&resolved.alias);
                    if let Some(field) = &resolved.field {
                        out.push('.');
                        out.push_str(field);
                    }
                }
            }
            None => out.push_str(&path.source()),
        },
        Expression::Composite(parts) => {
            for part in parts {
                render_expr(out, part);
            }
        }
        Expression::Parameter(name) => {
            out.push(':');
            out.push_str(name);
        }
        Expression::Literal(text) => out.push_str(text),
        Expression::Function { name, args } => {
            out.push_str(name);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_expr(out, arg);
            }
            out.push(')');
        }
        Expression::Subquery(sub) => {
            out.push('(');
            out.push_str(&generate(&sub.0, None));
            out.push(')');
        }
        Expression::Outer(inner) => render_expr(out, inner),
        Expression::Case { whens, otherwise } => {
            out.push_str("CASE");
            for arm in whens {
                out.push_str(" WHEN ");
                render_expr(out, &arm.condition);
                out.push_str(" THEN ");
                render_expr(out, &arm.result);
            }
            if let Some(e) = otherwise {
                out.push_str(" ELSE ");
                render_expr(out, e);
            }
            out.push_str(" END");
        }
    }
}

fn render_compound(out: &mut String, children: &[Predicate], sep: &str, parenthesize_compound: bool) {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        let compound = matches!(child, Predicate::And(_) | Predicate::Or(_));
        if compound && parenthesize_compound {
            out.push('(');
            render_predicate(out, child);
            out.push(')');
        } else {
            render_predicate(out, child);
        }
    }
}

pub(crate) fn render_predicate(out: &mut String, pred: &Predicate) {
    match pred {
        Predicate::And(children) => render_compound(out, children, " AND ", true),
        Predicate::Or(children) => render_compound(out, children, " OR ", true),
        Predicate::Not(inner) => match inner.as_ref() {
            Predicate::IsNull(expr) => {
                render_expr(out, expr);
                out.push_str(" IS NOT NULL");
            }
            Predicate::Exists(sub) => {
                out.push_str("NOT EXISTS (");
                out.push_str(&generate(&sub.0, None));
                out.push(')');
            }
            compound @ (Predicate::And(_) | Predicate::Or(_)) => {
                out.push_str("NOT (");
                render_predicate(out, compound);
                out.push(')');
            }
            other => {
                out.push_str("NOT ");
                render_predicate(out, other);
            }
        },
        Predicate::Compare { op, left, right } => {
            render_expr(out, left);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            render_expr(out, right);
        }
        Predicate::Between { left, start, end } => {
            render_expr(out, left);
            out.push_str(" BETWEEN ");
            render_expr(out, start);
            out.push_str(" AND ");
            render_expr(out, end);
        }
        Predicate::Like {
            left,
            pattern,
            case_sensitive,
            escape,
        } => {
            if *case_sensitive {
                render_expr(out, left);
                out.push_str(" LIKE ");
                render_expr(out, pattern);
            } else {
                out.push_str("UPPER(");
                render_expr(out, left);
                out.push_str(") LIKE UPPER(");
                render_expr(out, pattern);
                out.push(')');
            }
            if let Some(c) = escape {
                out.push_str(" ESCAPE '");
                out.push(*c);
                out.push('\'');
            }
        }
        Predicate::In { left, values } => {
            render_expr(out, left);
            out.push_str(" IN ");
            if let [single @ Expression::Parameter(_)] = values.as_slice() {
                render_expr(out, single);
            } else {
                out.push('(');
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    render_expr(out, value);
                }
                out.push(')');
            }
        }
        Predicate::IsNull(expr) => {
            render_expr(out, expr);
            out.push_str(" IS NULL");
        }
        Predicate::Exists(sub) => {
            out.push_str("EXISTS (");
            out.push_str(&generate(&sub.0, None));
            out.push(')');
        }
    }
}
