#![forbid(unsafe_code)]

//! Expression trees.
//!
//! Expressions enter the compiler as text, get parsed into this tree, and are
//! then resolved in place: every [`PathExpr`] is annotated with the join alias
//! it renders through. Transforms that rewrite expressions (super-expression
//! substitution, keyset predicates) build new trees instead of mutating shared
//! nodes.

pub mod parser;

use smallvec::SmallVec;

/// One dotted segment of a path expression.
#[derive(Clone, Debug, PartialEq)]
pub enum PathElement {
    /// A plain property hop.
    Property(String),
    /// An indexed hop, `base[index]`.
    Indexed {
        /// Attribute being indexed into.
        base: String,
        /// Key or position expression.
        index: Box<Expression>,
    },
}

impl PathElement {
    /// The attribute name of this hop.
    pub fn name(&self) -> &str {
        match self {
            PathElement::Property(name) => name,
            PathElement::Indexed { base, .. } => base,
        }
    }
}

/// Resolution result attached to a path by the join manager.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPath {
    /// Join alias the path renders through.
    pub alias: String,
    /// Trailing field, `None` when the path denotes the joined object itself.
    pub field: Option<String>,
    /// Whether the leaf is a collection element (renders as `VALUE(alias)`).
    pub collection_value: bool,
}

/// A dotted path, optionally resolved against the join tree.
#[derive(Clone, Debug, PartialEq)]
pub struct PathExpr {
    /// Path hops in source order.
    pub elements: SmallVec<[PathElement; 4]>,
    /// Filled in by join resolution; `None` until then.
    pub resolved: Option<ResolvedPath>,
}

impl PathExpr {
    /// Builds an unresolved path from plain property names.
    pub fn from_properties<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            elements: names
                .into_iter()
                .map(|n| PathElement::Property(n.into()))
                .collect(),
            resolved: None,
        }
    }

    /// Source form of the path, e.g. `owner.partnerDocument.name`.
    pub fn source(&self) -> String {
        let mut out = String::new();
        for (i, el) in self.elements.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            match el {
                PathElement::Property(name) => out.push_str(name),
                PathElement::Indexed { base, index } => {
                    out.push_str(base);
                    out.push('[');
                    out.push_str(&index.source());
                    out.push(']');
                }
            }
        }
        out
    }
}

/// One WHEN arm of a CASE expression.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseWhen {
    /// Condition expression (already parsed, comparisons stay composite).
    pub condition: Expression,
    /// Result expression.
    pub result: Expression,
}

/// A subquery embedded in an expression position.
///
/// The payload is the subquery's compiled core, boxed to keep the expression
/// tree small. Rendering parenthesizes the generated text.
#[derive(Clone, Debug)]
pub struct SubqueryExpr(pub Box<crate::builder::QueryCore>);

impl PartialEq for SubqueryExpr {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

/// A parsed expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    /// A dotted path.
    Path(PathExpr),
    /// Concatenation of fragments, e.g. `age + 1` or `a = b`.
    Composite(Vec<Expression>),
    /// A named parameter reference, stored without the leading `:`.
    Parameter(String),
    /// A raw literal or operator fragment, rendered verbatim.
    Literal(String),
    /// A function call.
    Function {
        /// Function name as written.
        name: String,
        /// Argument expressions.
        args: Vec<Expression>,
    },
    /// An embedded subquery, rendered parenthesized.
    Subquery(SubqueryExpr),
    /// A path that resolved to an enclosing query's scope.
    Outer(Box<Expression>),
    /// A CASE WHEN expression.
    Case {
        /// WHEN arms in source order.
        whens: Vec<CaseWhen>,
        /// ELSE arm, if present.
        otherwise: Option<Box<Expression>>,
    },
}

impl Expression {
    /// Builds a path expression from plain property names.
    pub fn path<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expression::Path(PathExpr::from_properties(names))
    }

    /// Collapses a single-element composite into its element.
    pub fn simplify(self) -> Self {
        match self {
            Expression::Composite(mut parts) if parts.len() == 1 => parts.remove(0),
            other => other,
        }
    }

    /// Source form of the expression, used in diagnostics.
    pub fn source(&self) -> String {
        match self {
            Expression::Path(path) => path.source(),
            Expression::Composite(parts) => parts.iter().map(Expression::source).collect(),
            Expression::Parameter(name) => format!(":{name}"),
            Expression::Literal(text) => text.clone(),
            Expression::Function { name, args } => {
                let args = args
                    .iter()
                    .map(Expression::source)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{name}({args})")
            }
            Expression::Subquery(_) => "(subquery)".to_owned(),
            Expression::Outer(inner) => inner.source(),
            Expression::Case { whens, otherwise } => {
                let mut out = String::from("CASE");
                for arm in whens {
                    out.push_str(" WHEN ");
                    out.push_str(&arm.condition.source());
                    out.push_str(" THEN ");
                    out.push_str(&arm.result.source());
                }
                if let Some(e) = otherwise {
                    out.push_str(" ELSE ");
                    out.push_str(&e.source());
                }
                out.push_str(" END");
                out
            }
        }
    }

    /// Returns a copy with every occurrence of `placeholder` (as a standalone
    /// single-hop path) replaced by `replacement`.
    ///
    /// Used to graft a correlated path into a super-expression template such
    /// as `FUNCTION('COUNT', x)`.
    pub fn substitute(&self, placeholder: &str, replacement: &Expression) -> Expression {
        match self {
            Expression::Path(path) => {
                if path.elements.len() == 1 && path.elements[0].name() == placeholder {
                    replacement.clone()
                } else {
                    self.clone()
                }
            }
            Expression::Composite(parts) => Expression::Composite(
                parts
                    .iter()
                    .map(|p| p.substitute(placeholder, replacement))
                    .collect(),
            ),
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| a.substitute(placeholder, replacement))
                    .collect(),
            },
            Expression::Outer(inner) => {
                Expression::Outer(Box::new(inner.substitute(placeholder, replacement)))
            }
            Expression::Case { whens, otherwise } => Expression::Case {
                whens: whens
                    .iter()
                    .map(|arm| CaseWhen {
                        condition: arm.condition.substitute(placeholder, replacement),
                        result: arm.result.substitute(placeholder, replacement),
                    })
                    .collect(),
                otherwise: otherwise
                    .as_ref()
                    .map(|e| Box::new(e.substitute(placeholder, replacement))),
            },
            Expression::Parameter(_) | Expression::Literal(_) | Expression::Subquery(_) => {
                self.clone()
            }
        }
    }

    /// Visits every path in the tree.
    pub fn visit_paths<'a>(&'a self, visit: &mut dyn FnMut(&'a PathExpr)) {
        match self {
            Expression::Path(path) => visit(path),
            Expression::Composite(parts) => {
                for p in parts {
                    p.visit_paths(visit);
                }
            }
            Expression::Function { args, .. } => {
                for a in args {
                    a.visit_paths(visit);
                }
            }
            Expression::Outer(inner) => inner.visit_paths(visit),
            Expression::Case { whens, otherwise } => {
                for arm in whens {
                    arm.condition.visit_paths(visit);
                    arm.result.visit_paths(visit);
                }
                if let Some(e) = otherwise {
                    e.visit_paths(visit);
                }
            }
            Expression::Parameter(_) | Expression::Literal(_) | Expression::Subquery(_) => {}
        }
    }
}
