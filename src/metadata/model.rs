use std::any::Any;
use std::collections::{HashMap, HashSet};

use crate::criteria::model::WireValue;
use crate::error::DynaQueryError;

/// The logical type of a property, as understood by the marshaller (§4.C).
///
/// `Other` covers any user type that only ever reaches the wire through a
/// `ValueConverter` — the marshaller never has to guess its shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    String,
    Integer,
    Floating,
    Boolean,
    Instant,
    Date,
    Bytes,
    Other,
}

/// One property of an [`EntityDescriptor`]: its Rust-side name, its wire
/// attribute name, and the logical type the marshaller dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRef {
    pub property: &'static str,
    pub attribute: &'static str,
    pub logical_type: LogicalType,
}

/// A user-supplied value transformer bound to a property via
/// `#[entity(converter = "...")]`.
///
/// Property types vary per field, so the descriptor can't hold a
/// monomorphic trait object; instead it holds a factory that produces a
/// type-erased converter, and callers downcast the `&dyn Any` they pass in
/// against the concrete type they know at the call site.
pub trait ValueConverter: Send + Sync {
    fn to_wire(&self, value: &dyn Any) -> Option<WireValue>;
    fn from_wire(&self, value: &WireValue) -> Box<dyn Any>;
}

#[derive(Clone, Copy)]
pub struct ConverterHandle {
    pub type_name: &'static str,
    pub factory: fn() -> Box<dyn ValueConverter>,
}

impl std::fmt::Debug for ConverterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterHandle")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Projects a composite identifier (a single Rust type standing in for the
/// partition+sort key pair) down to its two wire values.
pub trait CompositeKey: Send + Sync {
    fn hash_of(&self, id: &dyn Any) -> WireValue;
    fn range_of(&self, id: &dyn Any) -> WireValue;
}

#[derive(Clone, Copy)]
pub struct CompositeIdSpec {
    pub property: &'static str,
    pub factory: fn() -> Box<dyn CompositeKey>,
}

impl std::fmt::Debug for CompositeIdSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeIdSpec")
            .field("property", &self.property)
            .finish()
    }
}

/// Immutable, build-once description of a user entity type (§3,
/// `EntityDescriptor`). Produced by `T::describe()` (generated by
/// `#[derive(Entity)]`) and cached by [`crate::registry::Registry`].
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub name: &'static str,
    pub table_name: Option<&'static str>,
    pub partition_key: PropertyRef,
    pub sort_key: Option<PropertyRef>,
    pub properties: Vec<PropertyRef>,
    pub attribute_name_by_property: HashMap<&'static str, &'static str>,
    pub converter_by_property: HashMap<&'static str, ConverterHandle>,
    pub indexes_by_property: HashMap<&'static str, Vec<&'static str>>,
    pub index_hash_key_properties: HashSet<&'static str>,
    pub index_range_key_properties: HashSet<&'static str>,
    pub version_property: Option<PropertyRef>,
    pub composite_id: Option<CompositeIdSpec>,
}

impl EntityDescriptor {
    pub fn table_name(&self) -> &str {
        self.table_name.unwrap_or(self.name)
    }

    pub fn property(&self, name: &str) -> Option<&PropertyRef> {
        self.properties.iter().find(|p| p.property == name)
    }

    pub fn is_partition_key(&self, property: &str) -> bool {
        self.partition_key.property == property
    }

    pub fn is_sort_key(&self, property: &str) -> bool {
        self.sort_key.map(|sk| sk.property == property).unwrap_or(false)
    }

    /// Indexes whose key-property set exactly equals `properties`.
    pub fn indexes_matching_exactly<'a>(
        &'a self,
        properties: &HashSet<&str>,
    ) -> Vec<&'a str> {
        self.all_index_names()
            .into_iter()
            .filter(|index| self.key_properties_of(index) == *properties)
            .collect()
    }

    /// Indexes whose key-property set is a superset of `properties`.
    pub fn indexes_matching_partially<'a>(
        &'a self,
        properties: &HashSet<&str>,
    ) -> Vec<&'a str> {
        self.all_index_names()
            .into_iter()
            .filter(|index| properties.is_subset(&self.key_properties_of(index)))
            .collect()
    }

    pub fn all_index_names(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for names in self.indexes_by_property.values() {
            for name in names {
                if !seen.contains(name) {
                    seen.push(*name);
                }
            }
        }
        seen
    }

    pub fn key_properties_of(&self, index: &str) -> HashSet<&str> {
        self.indexes_by_property
            .iter()
            .filter(|(_, names)| names.iter().any(|n| *n == index))
            .map(|(prop, _)| *prop)
            .collect()
    }

    pub fn hash_key_of(&self, index: &str) -> Option<&str> {
        self.indexes_by_property
            .iter()
            .find(|(prop, names)| {
                names.iter().any(|n| *n == index) && self.index_hash_key_properties.contains(*prop)
            })
            .map(|(prop, _)| *prop)
    }

    pub fn range_key_of(&self, index: &str) -> Option<&str> {
        self.indexes_by_property
            .iter()
            .find(|(prop, names)| {
                names.iter().any(|n| *n == index) && self.index_range_key_properties.contains(*prop)
            })
            .map(|(prop, _)| *prop)
    }

    /// True when `index`'s partition key is the main table's partition key
    /// (making it an LSI rather than a GSI, §4.D step 4).
    pub fn is_local_index(&self, index: &str) -> bool {
        self.hash_key_of(index) == Some(self.partition_key.property)
    }
}

/// Implemented by `#[derive(dynaquery_derive::Entity)]` (§4.A).
pub trait Entity: Send + Sync + 'static {
    fn describe() -> EntityDescriptor;
}

/// Validations that require seeing the fully assembled descriptor (as
/// opposed to the per-field checks the derive macro can make at expansion
/// time). Run once by [`crate::registry::Registry::describe`].
pub fn validate(descriptor: &EntityDescriptor) -> Result<(), DynaQueryError> {
    if descriptor.sort_key.map(|sk| sk.property) == Some(descriptor.partition_key.property) {
        return Err(DynaQueryError::Metadata {
            entity: descriptor.name,
            message: "sort key must be distinct from partition key".to_string(),
        });
    }

    let mut seen_properties = HashSet::new();
    for p in &descriptor.properties {
        if !seen_properties.insert(p.property) {
            return Err(DynaQueryError::Metadata {
                entity: descriptor.name,
                message: format!("duplicate property {}", p.property),
            });
        }
    }

    for property in descriptor.indexes_by_property.keys() {
        if descriptor.property(property).is_none() {
            return Err(DynaQueryError::Metadata {
                entity: descriptor.name,
                message: format!("index-bearing property {property} is not in properties"),
            });
        }
    }

    for index in descriptor.all_index_names() {
        let mut attribute_names = HashSet::new();
        for property in descriptor.key_properties_of(index) {
            let attribute = descriptor
                .attribute_name_by_property
                .get(property)
                .copied()
                .unwrap_or(property);
            if !attribute_names.insert(attribute) {
                return Err(DynaQueryError::Metadata {
                    entity: descriptor.name,
                    message: format!(
                        "index {index} has two key properties aliasing wire attribute {attribute}"
                    ),
                });
            }
        }
    }

    Ok(())
}
