//! HTTP handlers for resource endpoints.

pub mod resource;
pub use resource::*;
