//! Declarative JSON resource configuration: types, validation and loading into a registry builder.

pub mod loader;
pub mod types;
pub mod validator;

pub use loader::*;
pub use types::*;
pub use validator::*;
