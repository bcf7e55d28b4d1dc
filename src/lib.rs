//! Data API SDK: metadata-driven CRUD resource endpoints over a document store.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod handlers;
pub mod params;
pub mod query;
pub mod registry;
pub mod response;
pub mod routes;
pub mod service;
pub mod sql;
pub mod state;
pub mod store;

pub use config::{load_from_path, resolve, resolve_into, FullConfig};
pub use descriptor::{
    AccessMode, Accessor, EndpointBinding, FieldDescriptor, ForeignRef, Listable, Operation, ResourceDescriptor,
    Validator,
};
pub use error::{AppError, ConfigError, StoreError};
pub use params::RequestContext;
pub use registry::{Registry, RegistryBuilder};
pub use routes::{common_routes, resource_routes};
pub use service::{ContainerModifier, CrudService, OperationOutput};
pub use state::AppState;
pub use store::{DocumentStore, MemoryStore, PgDocumentStore, TableSchema};
