//! Subquery construction, correlation, and parameter scoping.

mod util;

use ombra::{Result, Value};
use util::document_builder;

#[test]
fn exists_subquery_correlates_through_the_outer_alias() -> Result<()> {
    let mut cb = document_builder()?;
    cb.where_exists(|sub| {
        sub.from("Person", "p")?.select("p.id")?;
        sub.r#where("p.partnerDocument.id")?.eq_expression("d.id")?;
        Ok(())
    })?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE EXISTS (\
         SELECT p.id FROM Person p \
         LEFT JOIN p.partnerDocument partnerDocument \
         WHERE partnerDocument.id = d.id)"
    );
    Ok(())
}

#[test]
fn not_exists_subquery() -> Result<()> {
    let mut cb = document_builder()?;
    cb.where_not_exists(|sub| {
        sub.from("Person", "p")?.select("p.id")?;
        sub.r#where("p.name")?.eq_expression("d.name")?;
        Ok(())
    })?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE NOT EXISTS (\
         SELECT p.id FROM Person p WHERE p.name = d.name)"
    );
    Ok(())
}

#[test]
fn subquery_requires_a_from_target() -> Result<()> {
    let mut cb = document_builder()?;
    let err = cb.where_exists(|_sub| Ok(())).unwrap_err();
    assert_eq!(err.code(), "MissingFrom");
    Ok(())
}

#[test]
fn subquery_as_the_left_side_of_a_restriction() -> Result<()> {
    let mut cb = document_builder()?;
    cb.where_subquery(|sub| {
        sub.from("Person", "p")?
            .select("FUNCTION('COUNT', p.id)")?;
        sub.r#where("p.partnerDocument.id")?.eq_expression("d.id")?;
        Ok(())
    })?
    .gt(2)?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE (\
         SELECT FUNCTION('COUNT', p.id) FROM Person p \
         LEFT JOIN p.partnerDocument partnerDocument \
         WHERE partnerDocument.id = d.id) > :param_0"
    );
    Ok(())
}

#[test]
fn subquery_grafted_into_a_surrounding_expression() -> Result<()> {
    let mut cb = document_builder()?;
    cb.where_subquery_in("sq", "1 + sq", |sub| {
        sub.from("Person", "p")?.select("p.id")?;
        sub.r#where("p.name")?.eq_expression("d.name")?;
        Ok(())
    })?
    .gt(2)?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d WHERE 1 + (\
         SELECT p.id FROM Person p WHERE p.name = d.name) > :param_0"
    );
    Ok(())
}

#[test]
fn select_subquery_orders_by_its_alias() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("d.name")?;
    cb.select_subquery("partners", |sub| {
        sub.from("Person", "p")?
            .select("FUNCTION('COUNT', p.id)")?;
        sub.r#where("p.partnerDocument.id")?.eq_expression("d.id")?;
        Ok(())
    })?;
    cb.order_by_desc("partners")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d.name, (\
         SELECT FUNCTION('COUNT', p.id) FROM Person p \
         LEFT JOIN p.partnerDocument partnerDocument \
         WHERE partnerDocument.id = d.id) AS partners \
         FROM Document d ORDER BY partners DESC NULLS LAST"
    );
    Ok(())
}

#[test]
fn id_query_keeps_subquery_order_items_selected() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("d.name")?;
    cb.select_subquery("partners", |sub| {
        sub.from("Person", "p")?
            .select("FUNCTION('COUNT', p.id)")?;
        sub.r#where("p.partnerDocument.id")?.eq_expression("d.id")?;
        Ok(())
    })?;
    cb.order_by_desc("partners")?;
    let paginated = cb.page(0, 10)?;
    // The subquery cannot be inlined into the id query's WHERE, so it stays
    // selected under its alias.
    assert_eq!(
        paginated.page_id_query_string(),
        "SELECT d.id, (\
         SELECT FUNCTION('COUNT', p.id) FROM Person p \
         LEFT JOIN p.partnerDocument partnerDocument \
         WHERE partnerDocument.id = d.id) AS partners \
         FROM Document d GROUP BY d.id ORDER BY partners DESC NULLS LAST"
    );
    Ok(())
}

#[test]
fn positional_parameters_stay_unique_across_scopes() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.age")?.eq(1)?;
    cb.where_exists(|sub| {
        sub.from("Person", "p")?.select("p.id")?;
        sub.r#where("p.name")?.eq("pete")?;
        Ok(())
    })?;
    cb.r#where("d.name")?.eq("doc")?;

    let bound = cb.build_query()?;
    assert_eq!(bound.param("param_0"), Some(&Value::Int(1)));
    assert_eq!(
        bound.param("param_1"),
        Some(&Value::String("pete".to_owned()))
    );
    assert_eq!(
        bound.param("param_2"),
        Some(&Value::String("doc".to_owned()))
    );
    assert!(bound.text.contains(":param_1"));
    Ok(())
}

#[test]
fn subquery_aliases_shadowing_the_parent_fail() -> Result<()> {
    let mut cb = document_builder()?;
    // Sibling subqueries are independent scopes, so both may use "p".
    cb.where_exists(|sub| {
        sub.from("Person", "p")?.select("p.id")?;
        sub.r#where("p.name")?.eq_expression("d.name")?;
        Ok(())
    })?;
    cb.where_exists(|sub| {
        sub.from("Person", "p")?.select("p.id")?;
        Ok(())
    })?;

    // Reusing the enclosing query's alias is ambiguous and refused.
    let err = cb
        .where_exists(|sub| {
            sub.from("Person", "d")?.select("d.id")?;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.code(), "DuplicateAlias");
    Ok(())
}
