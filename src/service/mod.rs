//! CrudService: the five operations over the descriptor, query compiler and document store.

mod crud;
pub mod modifier;
pub mod projection;
mod validation;
pub use crud::{CrudService, ListPage, OperationOutput};
pub use modifier::ContainerModifier;
pub use validation::RequestValidator;
