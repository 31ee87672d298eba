//! The "global mutable state" collaborator of §9: a single registry object
//! owning the descriptor cache and the shared transport client, generalizing
//! a `Repository { client: Arc<Client> }` facade that only cached the client
//! into one that additionally caches `EntityDescriptor`s per type (§5:
//! "a process-wide mapping from type to descriptor, populated lazily under a
//! mutex that protects only insertion").

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::criteria::marshal::MarshalConfig;
use crate::dispatcher::Dispatcher;
use crate::error::DynaQueryError;
use crate::metadata::{validate, Entity, EntityDescriptor};
use crate::transport::Transport;

/// Owns the transport client and the descriptor cache. Constructed once
/// at startup with an injected [`Transport`] and shared (typically behind
/// an `Arc`) by every repository the host application resolves.
///
/// `RwLock` gives concurrent, mutex-free-enough reads; true wait-free
/// reads would need `arc-swap`, which isn't in this crate's dependency
/// stack, so `RwLock` is the idiomatic stdlib approximation (see
/// DESIGN.md).
pub struct Registry<T: Transport> {
    transport: Arc<T>,
    descriptors: RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>,
    marshal_config: MarshalConfig,
}

impl<T: Transport> Registry<T> {
    pub fn new(transport: T, marshal_config: MarshalConfig) -> Self {
        Self {
            transport: Arc::new(transport),
            descriptors: RwLock::new(HashMap::new()),
            marshal_config,
        }
    }

    /// `describe(Type T) -> EntityDescriptor` (§4.A "Contract"). Idempotent;
    /// the result is cached by `T` for the life of the registry.
    pub fn describe<E: Entity>(&self) -> Result<Arc<EntityDescriptor>, DynaQueryError> {
        let type_id = TypeId::of::<E>();
        if let Some(descriptor) = self.descriptors.read().expect("descriptor cache poisoned").get(&type_id) {
            return Ok(descriptor.clone());
        }

        let descriptor = E::describe();
        validate(&descriptor)?;
        let descriptor = Arc::new(descriptor);

        let mut write_guard = self.descriptors.write().expect("descriptor cache poisoned");
        let descriptor = write_guard.entry(type_id).or_insert(descriptor).clone();
        Ok(descriptor)
    }

    /// Builds a [`Dispatcher`] for `E`, resolving (and caching) its
    /// descriptor first.
    pub fn dispatcher<E: Entity>(&self) -> Result<Dispatcher<T>, DynaQueryError> {
        let descriptor = self.describe::<E>()?;
        Ok(Dispatcher::new(self.transport.clone(), descriptor, self.marshal_config))
    }

    pub fn transport(&self) -> Arc<T> {
        self.transport.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{LogicalType, PropertyRef};
    use crate::testing::InMemoryTransport;
    use std::collections::HashSet;

    struct Widget;

    impl Entity for Widget {
        fn describe() -> EntityDescriptor {
            EntityDescriptor {
                name: "Widget",
                table_name: None,
                partition_key: PropertyRef { property: "id", attribute: "id", logical_type: LogicalType::String },
                sort_key: None,
                properties: vec![PropertyRef { property: "id", attribute: "id", logical_type: LogicalType::String }],
                attribute_name_by_property: HashMap::new(),
                converter_by_property: HashMap::new(),
                indexes_by_property: HashMap::new(),
                index_hash_key_properties: HashSet::new(),
                index_range_key_properties: HashSet::new(),
                version_property: None,
                composite_id: None,
            }
        }
    }

    #[test]
    fn describe_is_idempotent() {
        let registry = Registry::new(InMemoryTransport::new(), MarshalConfig::default());
        let first = registry.describe::<Widget>().unwrap();
        let second = registry.describe::<Widget>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
