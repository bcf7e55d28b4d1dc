//! SQL for the PostgreSQL document store. Names come from resource configuration, request values are bound.

mod builder;
pub mod params;
pub use builder::*;
pub use params::*;
