#![forbid(unsafe_code)]

//! Projection, grouping, and ordering clause state.

use crate::expr::Expression;

/// One SELECT item.
#[derive(Clone, Debug)]
pub struct SelectItem {
    /// Projected expression.
    pub expr: Expression,
    /// Optional select alias.
    pub alias: Option<String>,
}

/// SELECT clause state.
#[derive(Clone, Debug, Default)]
pub struct SelectManager {
    /// Items in registration order; empty means the root entity is selected.
    pub items: Vec<SelectItem>,
    /// Whether DISTINCT is rendered.
    pub distinct: bool,
}

impl SelectManager {
    /// Whether the query projects the root entity itself.
    pub fn selects_root(&self) -> bool {
        self.items.is_empty()
    }

    /// Finds a select item by alias.
    pub fn by_alias(&self, alias: &str) -> Option<&SelectItem> {
        self.items
            .iter()
            .find(|item| item.alias.as_deref() == Some(alias))
    }
}

/// GROUP BY clause state.
#[derive(Clone, Debug, Default)]
pub struct GroupByManager {
    /// Grouping expressions in registration order.
    pub items: Vec<Expression>,
}

/// One ORDER BY item.
#[derive(Clone, Debug)]
pub struct OrderByItem {
    /// Ordering expression, unset when the item refers to a select alias.
    pub expr: Option<Expression>,
    /// Select alias the item refers to, if any.
    pub select_alias: Option<String>,
    /// Ascending vs descending.
    pub ascending: bool,
    /// NULLS FIRST vs NULLS LAST.
    pub nulls_first: bool,
}

/// ORDER BY clause state.
#[derive(Clone, Debug, Default)]
pub struct OrderByManager {
    /// Items in registration order, which is significant for keysets.
    pub items: Vec<OrderByItem>,
}
