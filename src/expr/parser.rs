#![forbid(unsafe_code)]

//! Expression text parser.
//!
//! Accepts the path/arithmetic/function expression language used by the
//! builder API: dotted paths with optional `[index]` hops, `:name` parameters,
//! numeric and single-quoted string literals, `NAME(arg, ...)` function calls,
//! infix arithmetic and comparison chains, and (where permitted) `CASE WHEN`
//! blocks. Operator fragments are kept verbatim, so rendering reproduces the
//! input shape instead of re-deriving precedence.

use chumsky::prelude::*;

use crate::error::{QueryError, Result};
use crate::expr::{CaseWhen, Expression, PathElement, PathExpr};

type Extra<'src> = extra::Err<Rich<'src, char>>;

fn kw<'src>(word: &'static str) -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    text::keyword::<&str, _, Extra<'src>>(word).ignored()
}

fn expression<'src>() -> impl Parser<'src, &'src str, Expression, Extra<'src>> {
    recursive(|expr| {
        let ident = any()
            .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
            .then(
                any()
                    .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
                    .repeated(),
            )
            .to_slice()
            .map(str::to_owned);

        let number = any()
            .filter(char::is_ascii_digit)
            .repeated()
            .at_least(1)
            .then(
                just('.')
                    .then(any().filter(char::is_ascii_digit).repeated().at_least(1))
                    .or_not(),
            )
            .to_slice()
            .map(|s: &str| Expression::Literal(s.to_owned()));

        let string = just('\'')
            .then(none_of('\'').repeated())
            .then(just('\''))
            .to_slice()
            .map(|s: &str| Expression::Literal(s.to_owned()));

        let parameter = just(':')
            .ignore_then(ident.clone())
            .map(Expression::Parameter);

        let args = expr
            .clone()
            .separated_by(just(',').padded())
            .collect::<Vec<Expression>>();

        let function = ident
            .clone()
            .then(args.delimited_by(just('(').padded(), just(')').padded()))
            .map(|(name, args)| Expression::Function { name, args });

        let element = ident
            .clone()
            .then(
                expr.clone()
                    .delimited_by(just('[').padded(), just(']').padded())
                    .or_not(),
            )
            .map(|(base, index)| match index {
                Some(index) => PathElement::Indexed {
                    base,
                    index: Box::new(index),
                },
                None => PathElement::Property(base),
            });

        let path = element
            .separated_by(just('.'))
            .at_least(1)
            .collect::<Vec<PathElement>>()
            .map(|elements| {
                Expression::Path(PathExpr {
                    elements: elements.into_iter().collect(),
                    resolved: None,
                })
            });

        let when_arm = kw("WHEN")
            .padded()
            .ignore_then(expr.clone())
            .then_ignore(kw("THEN").padded())
            .then(expr.clone())
            .map(|(condition, result)| CaseWhen { condition, result });

        let case = kw("CASE")
            .padded()
            .ignore_then(when_arm.repeated().at_least(1).collect::<Vec<CaseWhen>>())
            .then(kw("ELSE").padded().ignore_then(expr.clone()).or_not())
            .then_ignore(kw("END").padded())
            .map(|(whens, otherwise)| Expression::Case {
                whens,
                otherwise: otherwise.map(Box::new),
            });

        let grouped = expr
            .clone()
            .delimited_by(just('(').padded(), just(')').padded())
            .map(|inner| {
                Expression::Composite(vec![
                    Expression::Literal("(".to_owned()),
                    inner,
                    Expression::Literal(")".to_owned()),
                ])
            });

        let atom = choice((case, function, parameter, string, number, grouped, path)).padded();

        let op = choice((
            just("<="),
            just(">="),
            just("<>"),
            just("="),
            just("<"),
            just(">"),
            just("+"),
            just("-"),
            just("*"),
            just("/"),
        ))
        .padded()
        .map(|sym: &str| Expression::Literal(format!(" {sym} ")));

        atom.clone()
            .then(op.then(atom).repeated().collect::<Vec<_>>())
            .map(|(first, rest)| {
                if rest.is_empty() {
                    return first;
                }
                let mut parts = vec![first];
                for (op, operand) in rest {
                    parts.push(op);
                    parts.push(operand);
                }
                Expression::Composite(parts)
            })
    })
}

fn contains_case(expr: &Expression) -> bool {
    match expr {
        Expression::Case { .. } => true,
        Expression::Composite(parts) => parts.iter().any(contains_case),
        Expression::Function { args, .. } => args.iter().any(contains_case),
        Expression::Outer(inner) => contains_case(inner),
        Expression::Path(path) => path.elements.iter().any(|el| match el {
            PathElement::Indexed { index, .. } => contains_case(index),
            PathElement::Property(_) => false,
        }),
        Expression::Parameter(_) | Expression::Literal(_) | Expression::Subquery(_) => false,
    }
}

/// Parses expression text into an [`Expression`] tree.
///
/// `allow_case` gates `CASE WHEN` blocks; join conditions and paths reject
/// them while select and predicate positions accept them.
pub fn parse(input: &str, allow_case: bool) -> Result<Expression> {
    if input.trim().is_empty() {
        return Err(QueryError::Syntax {
            position: 0,
            message: "empty expression".to_owned(),
        });
    }
    let parsed = expression()
        .then_ignore(end())
        .parse(input)
        .into_result()
        .map_err(|errors| {
            let first = &errors[0];
            QueryError::Syntax {
                position: first.span().start,
                message: first.to_string(),
            }
        })?;
    let parsed = parsed.simplify();
    if !allow_case && contains_case(&parsed) {
        return Err(QueryError::Syntax {
            position: 0,
            message: "CASE expressions are not allowed here".to_owned(),
        });
    }
    Ok(parsed)
}
