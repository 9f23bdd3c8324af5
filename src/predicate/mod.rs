#![forbid(unsafe_code)]

//! Predicate trees.
//!
//! Predicates are immutable once produced; negation wraps instead of
//! rewriting, and compound predicates own their children. The composer in
//! [`composer`] enforces the start/end discipline for nested AND/OR builders.

pub mod composer;

use crate::expr::{Expression, SubqueryExpr};

/// Binary comparison operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// Rendered operator symbol.
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Inclusive counterpart (`<` becomes `<=`, `>` becomes `>=`).
    pub fn inclusive(self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Le,
            CompareOp::Gt => CompareOp::Ge,
            other => other,
        }
    }
}

/// A boolean restriction over expressions.
#[derive(Clone, Debug)]
pub enum Predicate {
    /// Conjunction of children.
    And(Vec<Predicate>),
    /// Disjunction of children.
    Or(Vec<Predicate>),
    /// Logical negation.
    Not(Box<Predicate>),
    /// Binary comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Expression,
        /// Right operand.
        right: Expression,
    },
    /// Range check, bounds inclusive.
    Between {
        /// Tested expression.
        left: Expression,
        /// Lower bound.
        start: Expression,
        /// Upper bound.
        end: Expression,
    },
    /// Pattern match.
    Like {
        /// Tested expression.
        left: Expression,
        /// Pattern expression.
        pattern: Expression,
        /// When false, both sides are wrapped in `UPPER(...)`.
        case_sensitive: bool,
        /// Escape character, if any.
        escape: Option<char>,
    },
    /// Membership test.
    In {
        /// Tested expression.
        left: Expression,
        /// Candidate expressions; a single parameter renders unparenthesized.
        values: Vec<Expression>,
    },
    /// Null check.
    IsNull(Expression),
    /// Subquery non-emptiness check.
    Exists(SubqueryExpr),
}

impl Predicate {
    /// Wraps the predicate in a negation.
    pub fn negated(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }

    /// Visits every expression in the tree, including nested predicates.
    pub fn visit_expressions<'a>(&'a self, visit: &mut dyn FnMut(&'a Expression)) {
        match self {
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.visit_expressions(visit);
                }
            }
            Predicate::Not(inner) => inner.visit_expressions(visit),
            Predicate::Compare { left, right, .. } => {
                visit(left);
                visit(right);
            }
            Predicate::Between { left, start, end } => {
                visit(left);
                visit(start);
                visit(end);
            }
            Predicate::Like { left, pattern, .. } => {
                visit(left);
                visit(pattern);
            }
            Predicate::In { left, values } => {
                visit(left);
                for value in values {
                    visit(value);
                }
            }
            Predicate::IsNull(expr) => visit(expr),
            Predicate::Exists(_) => {}
        }
    }
}
