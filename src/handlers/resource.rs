//! Resource endpoint handler: HTTP request to request context, then one CRUD operation.

use crate::descriptor::Operation;
use crate::error::AppError;
use crate::params::RequestContext;
use crate::service::{CrudService, OperationOutput};
use crate::state::AppState;
use crate::store::Document;
use axum::body::Bytes;

/// What a mounted route dispatches to: a resource, an operation and the binding's option overrides.
#[derive(Clone, Debug)]
pub struct BoundEndpoint {
    pub resource: String,
    pub operation: Operation,
    pub options: Document,
}

pub async fn handle(
    state: &AppState,
    endpoint: &BoundEndpoint,
    query: Vec<(String, String)>,
    body: Bytes,
) -> Result<OperationOutput, AppError> {
    let resource = state.registry.resource(&endpoint.resource)?;
    let ctx = RequestContext::new(query, body.to_vec()).with_options(endpoint.options.clone());
    tracing::debug!(
        resource = %endpoint.resource,
        operation = endpoint.operation.as_str(),
        "dispatch"
    );
    CrudService::dispatch(&state.registry, resource, endpoint.operation, &ctx).await
}
