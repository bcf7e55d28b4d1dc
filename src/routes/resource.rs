//! Resource routes built from every registered endpoint binding.
//! Each binding is mounted at `<location>/<endpoint>` with its operation's method.

use crate::descriptor::Operation;
use crate::handlers::resource::{handle, BoundEndpoint};
use crate::registry::route_path;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::{MethodFilter, MethodRouter},
    Router,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Request bodies above this size are rejected with 413.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

fn method_filter(operation: Operation) -> MethodFilter {
    match operation {
        Operation::Get | Operation::List => MethodFilter::GET,
        Operation::New => MethodFilter::POST,
        Operation::Edit => MethodFilter::PUT,
        Operation::Delete => MethodFilter::DELETE,
    }
}

pub fn resource_routes(state: AppState) -> Router {
    let mut by_path: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();
    for (name, resource) in state.registry.iter() {
        let descriptor = resource.descriptor();
        for (_, binding) in descriptor.endpoints() {
            let path = route_path(descriptor.location(), &binding.endpoint);
            let endpoint = Arc::new(BoundEndpoint {
                resource: name.to_string(),
                operation: binding.operation,
                options: binding.options.clone(),
            });
            let handler = move |State(state): State<AppState>,
                                Query(query): Query<Vec<(String, String)>>,
                                body: Bytes| async move {
                handle(&state, &endpoint, query, body).await
            };
            tracing::debug!(method = binding.operation.method(), path = %path, "route");
            let router = by_path.remove(&path).unwrap_or_default();
            by_path.insert(path, router.on(method_filter(binding.operation), handler));
        }
    }
    tracing::info!(routes = by_path.len(), "resource routes mounted");

    let mut router = Router::new();
    for (path, method_router) in by_path {
        router = router.route(&path, method_router);
    }
    router
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
