//! dynaquery: a query-derivation pipeline for a DynamoDB-family key-value
//! store.
//!
//! An entity type derives [`Entity`](metadata::Entity) (`#[derive(Entity)]`,
//! re-exported below from `dynaquery_derive`, following the
//! `serde`/`serde_derive` split) describing its table, keys, and indexes.
//! A [`Registry`] caches each type's [`EntityDescriptor`](metadata::EntityDescriptor)
//! and hands out a [`Dispatcher`](dispatcher::Dispatcher) bound to it. The
//! dispatcher turns Spring-Data-style finder method names
//! (`findByCustomerIdAndOrderDateBetween`) into an index choice and a
//! synthesized request, and executes it against a [`Transport`](transport::Transport) —
//! `DynamoDbTransport` in production, `testing::InMemoryTransport` in tests.
//!
//! Pipeline, end to end:
//! 1. [`parser`] parses a finder method name into a [`parser::PartTree`].
//! 2. [`criteria`] binds the call arguments to the parsed predicates,
//!    producing a [`criteria::Criteria`].
//! 3. [`index`] chooses a [`index::Plan`] (point-get, a Query against the
//!    main table or a GSI/LSI, or a Scan) from the criteria's key
//!    properties.
//! 4. [`expression`] synthesizes the wire-level request
//!    (`GetRequest`/`QueryRequest`/`ScanRequest`) for that plan.
//! 5. [`dispatcher`] executes it through a [`transport::Transport`],
//!    paginating, retrying, and decoding results back into the entity type.

pub mod criteria;
pub mod dispatcher;
pub mod error;
pub mod expression;
pub mod index;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod testing;
pub mod transport;

static LOGGER_INIT: std::sync::Once = std::sync::Once::new();

/// Installs the global `tracing` subscriber, once per process. Safe to call
/// from every binary entry point and every test; later calls are no-ops.
pub fn init_logger() {
    LOGGER_INIT.call_once(|| {
        tracing_subscriber::fmt::init();
    });
}

pub use dispatcher::Dispatcher;
// `Entity` the derive macro and `Entity` the trait live in separate
// namespaces (macro vs. type), so both re-export to the same path here —
// exactly how `serde`/`serde_derive` re-export `Serialize` twice.
pub use dynaquery_derive::Entity;
pub use error::{DynaQueryError, TransportError};
pub use metadata::{Entity, EntityDescriptor};
pub use registry::Registry;
pub use transport::{DynamoDbTransport, Transport};
