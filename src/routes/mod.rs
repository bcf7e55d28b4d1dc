//! Routers: common service routes and generated resource routes.

mod common;
mod resource;
pub use common::common_routes;
pub use resource::{resource_routes, MAX_BODY_BYTES};
