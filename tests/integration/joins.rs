//! Implicit and explicit join behavior.

mod util;

use ombra::{JoinType, Result, Value};
use proptest::prelude::*;
use util::document_builder;

#[test]
fn implicit_join_is_created_once_per_relation() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("d.owner.name")?;
    cb.r#where("d.owner.name")?.eq("pete")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT owner.name FROM Document d JOIN d.owner owner WHERE owner.name = :param_0"
    );
    Ok(())
}

#[test]
fn optional_and_collection_hops_use_left_joins() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.owner.partnerDocument.name")?.eq("x")?;
    cb.r#where("d.contacts.name")?.eq("y")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d \
         JOIN d.owner owner \
         LEFT JOIN owner.partnerDocument partnerDocument \
         LEFT JOIN d.contacts contacts \
         WHERE partnerDocument.name = :param_0 AND contacts.name = :param_1"
    );
    Ok(())
}

#[test]
fn indexed_access_joins_with_a_key_restriction() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.contacts[:contactNr].name")?.eq("pete")?;
    cb.set_parameter("contactNr", 1);
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d \
         LEFT JOIN d.contacts contacts_contactNr ON KEY(contacts_contactNr) = :contactNr \
         WHERE contacts_contactNr.name = :param_0"
    );
    let bound = cb.build_query()?;
    assert_eq!(bound.param("contactNr"), Some(&Value::Int(1)));
    Ok(())
}

#[test]
fn indexed_leaf_renders_as_value() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.owner.localized[1]")?.eq("de")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d \
         JOIN d.owner owner \
         LEFT JOIN owner.localized localized_1 ON KEY(localized_1) = 1 \
         WHERE VALUE(localized_1) = :param_0"
    );
    Ok(())
}

#[test]
fn indexing_a_scalar_attribute_fails() -> Result<()> {
    let mut cb = document_builder()?;
    let err = cb.r#where("d.name[1]").unwrap_err();
    assert_eq!(err.code(), "NotIndexable");
    Ok(())
}

#[test]
fn object_leaf_is_rejected_in_restrictions() -> Result<()> {
    let mut cb = document_builder()?;
    let err = cb.r#where("d.owner").unwrap_err();
    assert_eq!(err.code(), "ObjectLeafNotAllowed");
    Ok(())
}

#[test]
fn explicit_default_join_captures_later_paths() -> Result<()> {
    let mut cb = document_builder()?;
    cb.join_default("d.owner", "o", JoinType::Left)?;
    cb.r#where("d.owner.name")?.eq("pete")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d LEFT JOIN d.owner o WHERE o.name = :param_0"
    );
    Ok(())
}

#[test]
fn non_default_join_keeps_its_own_alias() -> Result<()> {
    let mut cb = document_builder()?;
    cb.left_join("d.contacts", "c")?;
    cb.r#where("d.contacts.name")?.eq("pete")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d \
         LEFT JOIN d.contacts c \
         LEFT JOIN d.contacts contacts \
         WHERE contacts.name = :param_0"
    );
    Ok(())
}

#[test]
fn join_alias_collisions_fail() -> Result<()> {
    let mut cb = document_builder()?;
    let err = cb.inner_join("d.owner", "d").unwrap_err();
    assert_eq!(err.code(), "DuplicateAlias");

    cb.left_join("d.contacts", "c")?;
    let err = cb.left_join("d.contacts", "c").unwrap_err();
    assert_eq!(err.code(), "DuplicateAlias");
    Ok(())
}

#[test]
fn join_on_attaches_the_restriction() -> Result<()> {
    let mut cb = document_builder()?;
    let mut on = cb.left_join_on("d.contacts", "c")?;
    on.on("c.name")?.eq("pete")?;
    on.end()?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d LEFT JOIN d.contacts c ON c.name = :param_0"
    );
    Ok(())
}

#[test]
fn fetch_requires_the_root_projection() -> Result<()> {
    let mut cb = document_builder()?;
    cb.fetch("d.owner")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d JOIN FETCH d.owner owner"
    );
    let err = cb.select("d.name").unwrap_err();
    assert_eq!(err.code(), "FetchWithSelect");

    let mut cb = document_builder()?;
    cb.select("d.name")?;
    let err = cb.fetch("d.owner").unwrap_err();
    assert_eq!(err.code(), "FetchWithSelect");
    Ok(())
}

#[test]
fn explicit_fetch_join_renders_fetch_keyword() -> Result<()> {
    let mut cb = document_builder()?;
    cb.left_join_fetch("d.contacts", "c")?;
    assert_eq!(
        cb.query_string()?,
        "SELECT d FROM Document d LEFT JOIN FETCH d.contacts c"
    );
    Ok(())
}

proptest! {
    // Resolving the same path any number of times never grows the join tree
    // or changes the rendered query.
    #[test]
    fn repeated_resolution_is_idempotent(n in 1usize..8) {
        let mut cb = document_builder().unwrap();
        for _ in 0..n {
            cb.r#where("d.owner.partnerDocument.name").unwrap().is_not_null().unwrap();
        }
        let text = cb.query_string().unwrap();
        let joins = text.matches("JOIN").count();
        prop_assert_eq!(joins, 2);
    }

    // Generated aliases for one base stay pairwise distinct.
    #[test]
    fn generated_aliases_never_collide(n in 1usize..16) {
        let mut scope = ombra::alias::AliasManager::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..n {
            let alias = scope.generate_postfixed_alias("owner");
            prop_assert!(seen.insert(alias));
        }
    }
}
