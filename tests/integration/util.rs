//! Shared schema fixture for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use ombra::{CriteriaBuilder, Result, SchemaMetadata};

/// Document/Person schema used across the integration tests.
pub fn schema() -> SchemaMetadata {
    let mut schema = SchemaMetadata::new();
    schema
        .entity("Document", "id")
        .scalar("Document", "name")
        .scalar("Document", "age")
        .to_one("Document", "owner", "Person", false)
        .to_many("Document", "contacts", "Person", true)
        .entity("Person", "id")
        .scalar("Person", "name")
        .to_one("Person", "partnerDocument", "Document", true)
        .to_many("Person", "localized", "String", true);
    schema
}

/// Builder over Document aliased `d`.
pub fn document_builder() -> Result<CriteriaBuilder> {
    CriteriaBuilder::new(Arc::new(schema()), "Document", "d")
}
