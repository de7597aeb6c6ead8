//! Potion REST: declarative hypermedia resources served over axum.
//!
//! A resource couples a [`FieldSet`] schema, a [`Manager`] backend and a list of
//! [`Route`]s. Resources are registered with an [`Api`], which resolves
//! references between them and builds one router exposing JSON Hyper-Schema
//! descriptions next to the CRUD, relation and custom endpoints.

pub mod api;
mod case;
pub mod config;
pub mod error;
pub mod extractors;
pub mod fields;
pub mod filters;
mod handlers;
pub mod manager;
pub mod natural_keys;
pub mod pagination;
pub mod permissions;
pub mod resource;
pub mod response;
pub mod routes;
pub mod schema;
pub mod signals;
pub mod sql;
pub mod state;

/// A stored item: backend attribute name to JSON value.
pub type Item = serde_json::Map<String, serde_json::Value>;

pub use api::{Api, Decorator, Registry};
pub use config::{ApiConfig, IdFieldKind, ModelDefinition, NeedsConfig, ResourceConfig};
pub use error::{ApiError, ConfigError};
pub use extractors::{trust_identity_headers, Identity};
pub use fields::{Field, FieldKind, FieldType, Io};
pub use filters::{Condition, Filter, FilterOp, FilterTable, Sort};
pub use manager::{Manager, ManagerContext, ManagerFactory, MemoryBackend, MemoryManager, PostgresBackend};
pub use pagination::Pagination;
pub use resource::{Resource, ResourceDefinition};
pub use routes::{ItemAttributeRoute, Relation, Route, RouteRequest};
pub use schema::{Context, FieldSet, SchemaValidator};
pub use signals::{SignalEvent, SignalKind, Signals};
