#![forbid(unsafe_code)]

//! Metadata resolution bridging attribute names to schema information.
//!
//! The join manager needs to know whether an attribute is a scalar, an
//! optional to-one association, or a collection/map in order to pick INNER vs
//! LEFT joins and to validate indexed access. That knowledge lives behind the
//! [`Metamodel`] trait so the compiler stays independent of any concrete
//! schema source; [`SchemaMetadata`] is the in-memory implementation used by
//! tests and embedders without a catalog of their own.

use rustc_hash::FxHashMap;

/// Kind of an entity attribute as reported by the metadata provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttributeKind {
    /// Plain scalar column.
    Scalar,
    /// Single-valued association.
    ToOne {
        /// Target entity name.
        target: String,
        /// Whether the association may be absent.
        optional: bool,
    },
    /// Collection- or map-valued association.
    ToMany {
        /// Target entity (or element type) name.
        target: String,
        /// Whether the collection is keyed (a map).
        map: bool,
    },
}

impl AttributeKind {
    /// True when traversing the attribute requires a LEFT join.
    pub fn is_optional_or_to_many(&self) -> bool {
        match self {
            AttributeKind::Scalar => false,
            AttributeKind::ToOne { optional, .. } => *optional,
            AttributeKind::ToMany { .. } => true,
        }
    }

    /// True when the attribute supports `base[index]` access.
    pub fn is_collection_or_map(&self) -> bool {
        matches!(self, AttributeKind::ToMany { .. })
    }

    /// Target entity name for associations, `None` for scalars.
    pub fn association_target(&self) -> Option<&str> {
        match self {
            AttributeKind::Scalar => None,
            AttributeKind::ToOne { target, .. } | AttributeKind::ToMany { target, .. } => {
                Some(target)
            }
        }
    }
}

/// Provides schema information for join resolution and validation.
pub trait Metamodel {
    /// Whether the given entity name is known.
    fn has_entity(&self, entity: &str) -> bool;

    /// Looks up an attribute on the given entity.
    fn attribute(&self, entity: &str, attribute: &str) -> Option<AttributeKind>;

    /// Name of the identifier attribute of the given entity.
    fn id_attribute(&self, entity: &str) -> Option<String>;

    /// Textual projection of the map key for a join alias.
    fn map_key_expression(&self, alias: &str) -> String {
        format!("KEY({alias})")
    }
}

#[derive(Clone, Debug, Default)]
struct EntityDef {
    id_attribute: String,
    attributes: FxHashMap<String, AttributeKind>,
}

/// In-memory [`Metamodel`] built through a registration API.
#[derive(Clone, Debug, Default)]
pub struct SchemaMetadata {
    entities: FxHashMap<String, EntityDef>,
}

impl SchemaMetadata {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity with the name of its identifier attribute.
    ///
    /// The identifier attribute is registered as a scalar as well.
    pub fn entity(&mut self, name: &str, id_attribute: &str) -> &mut Self {
        let def = self.entities.entry(name.to_owned()).or_default();
        def.id_attribute = id_attribute.to_owned();
        def.attributes
            .insert(id_attribute.to_owned(), AttributeKind::Scalar);
        self
    }

    /// Registers a scalar attribute.
    pub fn scalar(&mut self, entity: &str, attribute: &str) -> &mut Self {
        self.insert(entity, attribute, AttributeKind::Scalar)
    }

    /// Registers a single-valued association.
    pub fn to_one(&mut self, entity: &str, attribute: &str, target: &str, optional: bool) -> &mut Self {
        self.insert(
            entity,
            attribute,
            AttributeKind::ToOne {
                target: target.to_owned(),
                optional,
            },
        )
    }

    /// Registers a collection- or map-valued association.
    pub fn to_many(&mut self, entity: &str, attribute: &str, target: &str, map: bool) -> &mut Self {
        self.insert(
            entity,
            attribute,
            AttributeKind::ToMany {
                target: target.to_owned(),
                map,
            },
        )
    }

    fn insert(&mut self, entity: &str, attribute: &str, kind: AttributeKind) -> &mut Self {
        self.entities
            .entry(entity.to_owned())
            .or_default()
            .attributes
            .insert(attribute.to_owned(), kind);
        self
    }
}

impl Metamodel for SchemaMetadata {
    fn has_entity(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    fn attribute(&self, entity: &str, attribute: &str) -> Option<AttributeKind> {
        self.entities
            .get(entity)
            .and_then(|def| def.attributes.get(attribute))
            .cloned()
    }

    fn id_attribute(&self, entity: &str) -> Option<String> {
        self.entities
            .get(entity)
            .filter(|def| !def.id_attribute.is_empty())
            .map(|def| def.id_attribute.clone())
    }
}
