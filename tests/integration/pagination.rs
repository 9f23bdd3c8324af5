//! Pagination: derived query shapes and end-to-end paging with a mock
//! executor.

mod util;

use std::cell::RefCell;

use ombra::{BoundQuery, Keyset, QueryExecutor, Result, RowRange, Tuple, Value};
use util::document_builder;

/// In-memory executor over `(id, name)` documents.
///
/// Understands just enough of the rendered text to honor name filters, keyset
/// boundaries on `d.name`, ordering direction, and id restrictions; every
/// received query is recorded for assertions.
struct MockExecutor {
    docs: Vec<(i64, &'static str)>,
    calls: RefCell<Vec<(BoundQuery, Option<RowRange>)>>,
}

impl MockExecutor {
    fn new() -> Self {
        Self {
            docs: vec![
                (1, "doc1"),
                (2, "Doc2"),
                (3, "doC3"),
                (4, "dOc4"),
                (5, "DOC5"),
            ],
            calls: RefCell::new(Vec::new()),
        }
    }

    fn filtered(&self) -> Vec<(i64, &'static str)> {
        let mut rows: Vec<_> = self
            .docs
            .iter()
            .copied()
            .filter(|(_, name)| name.to_lowercase().starts_with("doc"))
            .collect();
        rows.sort_by_key(|(_, name)| name.to_lowercase());
        rows
    }

    fn bound(query: &BoundQuery, op: &str) -> Option<String> {
        let pattern = format!("d.name {op} :");
        let at = query.text.find(&pattern)?;
        let rest = &query.text[at + pattern.len()..];
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        match query.param(&name) {
            Some(Value::String(s)) => Some(s.to_lowercase()),
            _ => None,
        }
    }

    fn id_query_call(&self) -> (BoundQuery, Option<RowRange>) {
        self.calls
            .borrow()
            .iter()
            .rev()
            .find(|(q, _)| q.param("ids").is_none() && !q.text.starts_with("SELECT COUNT("))
            .cloned()
            .expect("no id query recorded")
    }
}

impl QueryExecutor for MockExecutor {
    fn query(&self, query: &BoundQuery, range: Option<RowRange>) -> Result<Vec<Tuple>> {
        self.calls.borrow_mut().push((query.clone(), range));
        let mut rows = self.filtered();

        if let Some(ids) = query.param("ids") {
            let Value::List(ids) = ids else {
                panic!("ids must bind a list");
            };
            rows.retain(|(id, _)| ids.contains(&Value::Int(*id)));
        }
        if let Some(v) = Self::bound(query, ">=") {
            rows.retain(|(_, name)| name.to_lowercase() >= v);
        } else if let Some(v) = Self::bound(query, ">") {
            rows.retain(|(_, name)| name.to_lowercase() > v);
        }
        if let Some(v) = Self::bound(query, "<=") {
            rows.retain(|(_, name)| name.to_lowercase() <= v);
        } else if let Some(v) = Self::bound(query, "<") {
            rows.retain(|(_, name)| name.to_lowercase() < v);
        }
        if query.text.contains("d.name DESC") {
            rows.reverse();
        }
        if let Some(range) = range {
            rows = rows
                .into_iter()
                .skip(range.first)
                .take(range.max)
                .collect();
        }
        Ok(rows
            .into_iter()
            .map(|(id, name)| vec![Value::Int(id), Value::String(name.to_owned())])
            .collect())
    }

    fn count(&self, query: &BoundQuery) -> Result<u64> {
        self.calls.borrow_mut().push((query.clone(), None));
        Ok(self.filtered().len() as u64)
    }
}

fn names(rows: &[Tuple]) -> Vec<&str> {
    rows.iter()
        .map(|row| match &row[1] {
            Value::String(s) => s.as_str(),
            other => panic!("expected name, got {other:?}"),
        })
        .collect()
}

fn paged_by_name() -> Result<ombra::PaginatedCriteriaBuilder> {
    let mut cb = document_builder()?;
    cb.r#where("d.name")?.like("doc%", false, None)?;
    cb.order_by_asc("d.name")?;
    cb.page(0, 2)
}

#[test]
fn derived_queries_share_the_restriction_and_split_the_joins() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("d.owner.name")?;
    cb.r#where("d.age")?.ge(18)?;
    cb.order_by_asc("d.name")?;
    let paginated = cb.page(0, 10)?;

    assert_eq!(
        paginated.page_count_query_string(),
        "SELECT COUNT(d.id) FROM Document d WHERE d.age >= :param_0"
    );
    // The owner join only serves the projection, so the id query skips it.
    assert_eq!(
        paginated.page_id_query_string(),
        "SELECT d.id, d.name FROM Document d WHERE d.age >= :param_0 \
         GROUP BY d.id, d.name ORDER BY d.name ASC NULLS LAST"
    );
    assert_eq!(
        paginated.query_string(),
        "SELECT owner.name FROM Document d JOIN d.owner owner \
         WHERE d.id IN :ids ORDER BY d.name ASC NULLS LAST"
    );
    Ok(())
}

#[test]
fn collection_join_in_the_restriction_counts_distinct_ids() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.contacts.name")?.eq("pete")?;
    cb.order_by_asc("d.name")?;
    let paginated = cb.page(0, 10)?;

    assert_eq!(
        paginated.page_count_query_string(),
        "SELECT COUNT(DISTINCT d.id) FROM Document d \
         LEFT JOIN d.contacts contacts WHERE contacts.name = :param_0"
    );
    assert_eq!(
        paginated.page_id_query_string(),
        "SELECT d.id, d.name FROM Document d \
         LEFT JOIN d.contacts contacts WHERE contacts.name = :param_0 \
         GROUP BY d.id, d.name ORDER BY d.name ASC NULLS LAST"
    );
    Ok(())
}

#[test]
fn id_query_groups_by_the_root_id_even_without_collection_joins() -> Result<()> {
    let mut cb = document_builder()?;
    cb.r#where("d.owner.name")?.eq("pete")?;
    cb.order_by_asc("d.id")?;
    let paginated = cb.page(0, 10)?;

    // The id is both the projection and the order key, so it is selected
    // once; the GROUP BY is always present.
    assert_eq!(
        paginated.page_id_query_string(),
        "SELECT d.id FROM Document d JOIN d.owner owner \
         WHERE owner.name = :param_0 \
         GROUP BY d.id ORDER BY d.id ASC NULLS LAST"
    );
    Ok(())
}

#[test]
fn count_query_runs_after_the_id_and_object_queries() -> Result<()> {
    let executor = MockExecutor::new();
    let mut paginated = paged_by_name()?;
    paginated.fetch_page(&executor)?;

    let calls = executor.calls.borrow();
    assert_eq!(calls.len(), 3);
    assert!(
        calls[0].0.param("ids").is_none() && !calls[0].0.text.starts_with("SELECT COUNT("),
        "first call must be the id query: {}",
        calls[0].0.text
    );
    assert!(
        calls[1].0.param("ids").is_some(),
        "second call must be the object query: {}",
        calls[1].0.text
    );
    assert!(
        calls[2].0.text.starts_with("SELECT COUNT("),
        "last call must be the count query: {}",
        calls[2].0.text
    );
    Ok(())
}

#[test]
fn distinct_and_grouped_queries_refuse_pagination() -> Result<()> {
    let mut cb = document_builder()?;
    cb.select("d.name")?.distinct();
    let err = cb.page(0, 10).unwrap_err();
    assert_eq!(err.code(), "PaginateDistinct");

    let mut cb = document_builder()?;
    cb.select("d.age")?.group_by("d.age")?;
    let err = cb.page(0, 10).unwrap_err();
    assert_eq!(err.code(), "PaginateGroupBy");
    Ok(())
}

#[test]
fn offset_paging_walks_all_pages() -> Result<()> {
    let executor = MockExecutor::new();
    let mut paginated = paged_by_name()?;

    let page = paginated.fetch_page(&executor)?;
    assert_eq!(page.total_size, 5);
    assert_eq!(names(&page.rows), ["doc1", "Doc2"]);

    // Jumping two pages ahead is not adjacent to the keyset, so the window
    // falls back to an offset fetch.
    let page = paginated.window(4, 2).fetch_page(&executor)?;
    assert_eq!(names(&page.rows), ["DOC5"]);
    let (_, range) = executor.id_query_call();
    assert_eq!(range, Some(RowRange { first: 4, max: 2 }));
    Ok(())
}

#[test]
fn keyset_navigation_replaces_the_offset() -> Result<()> {
    let executor = MockExecutor::new();
    let mut paginated = paged_by_name()?;

    let page = paginated.fetch_page(&executor)?;
    assert_eq!(names(&page.rows), ["doc1", "Doc2"]);
    let keyset = page.keyset.expect("ordered page must produce a keyset");
    assert_eq!(keyset.lowest, vec![Value::String("doc1".to_owned())]);
    assert_eq!(keyset.highest, vec![Value::String("Doc2".to_owned())]);

    // Next page: boundary predicate on the highest key, no offset.
    let page = paginated.window(2, 2).fetch_page(&executor)?;
    assert_eq!(names(&page.rows), ["doC3", "dOc4"]);
    let (query, range) = executor.id_query_call();
    assert!(query.text.contains("d.name > :"), "text: {}", query.text);
    assert_eq!(range, Some(RowRange { first: 0, max: 2 }));

    // Previous page: flipped comparison and reversed scan.
    let page = paginated.window(0, 2).fetch_page(&executor)?;
    assert_eq!(names(&page.rows), ["doc1", "Doc2"]);
    let (query, _) = executor.id_query_call();
    assert!(query.text.contains("d.name < :"), "text: {}", query.text);
    assert!(query.text.contains("d.name DESC"), "text: {}", query.text);

    // Same page again: inclusive boundary on the lowest key.
    let page = paginated.fetch_page(&executor)?;
    assert_eq!(names(&page.rows), ["doc1", "Doc2"]);
    let (query, _) = executor.id_query_call();
    assert!(query.text.contains("d.name >= :"), "text: {}", query.text);
    Ok(())
}

#[test]
fn keyset_can_resume_on_a_fresh_builder() -> Result<()> {
    let executor = MockExecutor::new();
    let keyset = Keyset {
        lowest: vec![Value::String("doc1".to_owned())],
        highest: vec![Value::String("Doc2".to_owned())],
        first: 0,
        max: 2,
    };
    let mut cb = document_builder()?;
    cb.r#where("d.name")?.like("doc%", false, None)?;
    cb.order_by_asc("d.name")?;
    let mut paginated = cb.page_with_keyset(keyset, 2, 2)?;

    let page = paginated.fetch_page(&executor)?;
    assert_eq!(names(&page.rows), ["doC3", "dOc4"]);
    let (query, range) = executor.id_query_call();
    assert!(query.text.contains("d.name > :"), "text: {}", query.text);
    assert_eq!(range, Some(RowRange { first: 0, max: 2 }));
    Ok(())
}

#[test]
fn changed_page_size_invalidates_the_keyset() -> Result<()> {
    let executor = MockExecutor::new();
    let mut paginated = paged_by_name()?;
    paginated.fetch_page(&executor)?;

    let page = paginated.window(2, 3).fetch_page(&executor)?;
    assert_eq!(names(&page.rows), ["doC3", "dOc4", "DOC5"]);
    let (query, range) = executor.id_query_call();
    assert!(!query.text.contains("d.name > :"), "text: {}", query.text);
    assert_eq!(range, Some(RowRange { first: 2, max: 3 }));
    Ok(())
}

#[test]
fn empty_page_produces_no_keyset() -> Result<()> {
    let executor = MockExecutor::new();
    let mut cb = document_builder()?;
    cb.r#where("d.name")?.like("doc%", false, None)?;
    cb.order_by_asc("d.name")?;
    let mut paginated = cb.page(10, 2)?;
    let page = paginated.fetch_page(&executor)?;
    assert!(page.rows.is_empty());
    assert!(page.keyset.is_none());
    assert_eq!(page.total_size, 5);
    Ok(())
}

#[test]
fn keyset_round_trips_through_serde() -> Result<()> {
    let keyset = Keyset {
        lowest: vec![Value::String("doc1".to_owned())],
        highest: vec![Value::String("Doc2".to_owned()), Value::Int(2)],
        first: 0,
        max: 2,
    };
    let json = serde_json::to_string(&keyset).expect("serialize");
    let back: Keyset = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, keyset);
    Ok(())
}
