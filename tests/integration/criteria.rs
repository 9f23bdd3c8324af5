//! Restriction, projection, and ordering behavior of the fluent builder.

mod util;

use ombra::{QueryError, Result, Value};
use util::document_builder;

#[test]
fn default_projection_is_the_root_entity() -> Result<()> {
    let cb = document_builder()?;
    assert_eq!(cb.query_string()?, "SELECT d FROM Document d");
    Ok(())
}

#[test]
fn explicit_projection_renders_in_order() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("d.name")?.select("d.age")?;
    assert_eq!(cb.query_string()?, "SELECT d.name, d.age FROM Document d");
    Ok(())
}

#[test]
fn distinct_projection() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("d.name")?.distinct();
    assert_eq!(cb.query_string()?, "SELECT DISTINCT d.name FROM Document d");
    Ok(())
}

#[test]
fn select_alias_renders_as() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select_as("d.name", "docName")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d.name AS docName FROM Document d"
    );
    Ok(())
}

#[test]
fn between_binds_two_positional_parameters() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.age")?.between(20, 30)?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE d.age BETWEEN :param_0 AND :param_1"
    );
    let bound = cb.build_query()?;
    assert_eq!(bound.param("param_0"), Some(&Value::Int(20)));
    assert_eq!(bound.param("param_1"), Some(&Value::Int(30)));
    Ok(())
}

#[test]
fn not_between_prefixes_not() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.age")?.not_between(20, 30)?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE NOT d.age BETWEEN :param_0 AND :param_1"
    );
    Ok(())
}

#[test]
fn between_rejects_null_bounds() -> Result<()> {
    let mut cb = document_builder()?;
    let err = cb.r#where("d.age")?.between(Value::Null, 30).unwrap_err();
    assert_eq!(err.code(), "NullBetweenBound");
    Ok(())
}

#[test]
fn case_insensitive_like_wraps_both_sides_in_upper() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.name")?.like("pete%", false, None)?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE UPPER(d.name) LIKE UPPER(:param_0)"
    );
    Ok(())
}

#[test]
fn case_sensitive_like_with_escape() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.name")?.like("50!%%", true, Some('!'))?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE d.name LIKE :param_0 ESCAPE '!'"
    );
    Ok(())
}

#[test]
fn in_list_binds_one_list_parameter() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.id")?
        .in_list(vec![Value::Int(1), Value::Int(2)])?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE d.id IN :param_0"
    );
    let bound = cb.build_query()?;
    assert_eq!(
        bound.param("param_0"),
        Some(&Value::List(vec![Value::Int(1), Value::Int(2)]))
    );
    Ok(())
}

#[test]
fn null_checks() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.name")?.is_null()?;
    cb.r#where("d.age")?.is_not_null()?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE d.name IS NULL AND d.age IS NOT NULL"
    );
    Ok(())
}

#[test]
fn comparison_against_expression() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.age")?.eq_expression("d.id + 1")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE d.age = d.id + 1"
    );
    Ok(())
}

#[test]
fn case_expression_in_projection() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("CASE WHEN d.age > 2 THEN d.name ELSE 'unknown' END")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT CASE WHEN d.age > 2 THEN d.name ELSE 'unknown' END FROM Document d"
    );
    Ok(())
}

#[test]
fn disjunction_with_nested_conjunction() -> Result<()> {
    let mut cb = document_builder()?;
    cb.where_or(|or| {
        or.r#where("d.age")?.eq(25)?;
        or.where_and(|and| {
            and.r#where("d.name")?.eq("pete")?;
            and.r#where("d.age")?.gt(30)?;
            Ok(())
        })?;
        Ok(())
    })?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE d.age = :param_0 OR (d.name = :param_1 AND d.age > :param_2)"
    );
    Ok(())
}

#[test]
fn failed_group_closure_leaves_the_builder_unusable() -> Result<()> {
    let mut cb = document_builder()?;
    let err = cb
        .where_or(|or| {
            or.r#where("d.age")?.eq(25)?;
            Err(QueryError::EmptyAlias)
        })
        .unwrap_err();
    assert_eq!(err.code(), "EmptyAlias");
    // The OR group was never ended, so rendering must refuse.
    let err = cb.query_string().unwrap_err();
    assert_eq!(err.code(), "UnendedBuilder");
    Ok(())
}

#[test]
fn negated_restriction_renders_not_prefix() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.name")?.not().eq("pete")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE NOT d.name = :param_0"
    );
    Ok(())
}

#[test]
fn order_by_renders_direction_and_null_precedence() -> Result<()> {
    let mut cb = document_builder()?;
    cb.order_by_asc("d.name")?.order_by("d.age", false, true)?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d ORDER BY d.name ASC NULLS LAST, d.age DESC NULLS FIRST"
    );
    Ok(())
}

#[test]
fn order_by_select_alias_renders_the_alias() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select_as("d.name", "n")?.order_by_desc("n")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d.name AS n FROM Document d ORDER BY n DESC NULLS LAST"
    );
    Ok(())
}

#[test]
fn group_by_and_having() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("d.age")?.group_by("d.age")?;
    cb.having("FUNCTION('COUNT', d.id)")?.gt(2)?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d.age FROM Document d GROUP BY d.age HAVING FUNCTION('COUNT', d.id) > :param_0"
    );
    Ok(())
}

#[test]
fn having_without_group_by_fails() -> Result<()> {
    let mut cb = document_builder()?;
    let err = cb.having("d.age").unwrap_err();
    assert_eq!(err.code(), "HavingWithoutGroupBy");
    Ok(())
}

#[test]
fn named_parameters_must_be_satisfied_before_binding() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.age")?.gt_expression(":minAge")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE d.age > :minAge"
    );
    let err = cb.build_query().unwrap_err();
    assert_eq!(err.code(), "UnsatisfiedParameter");
    cb.set_parameter("minAge", 18);
    assert_eq!(
        cb.build_query()?.param("minAge"),
        Some(&Value::Int(18))
    );
    Ok(())
}

#[test]
fn unknown_entity_and_attribute_fail_eagerly() -> Result<()> {
    let err = ombra::CriteriaBuilder::new(
        std::sync::Arc::new(util::schema()),
        "Nope",
        "n",
    )
    .unwrap_err();
    assert_eq!(err.code(), "UnknownEntity");

    let mut cb = document_builder()?;
    let err = cb.r#where("d.nope").unwrap_err();
    assert_eq!(err.code(), "UnknownAttribute");
    Ok(())
}

#[test]
fn empty_expression_is_a_syntax_error() -> Result<()> {
    let mut cb = document_builder()?;
    let err = cb.select("").unwrap_err();
    assert_eq!(err.code(), "Syntax");
    Ok(())
}
