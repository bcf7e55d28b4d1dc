//! Container modifiers: reversible transforms applied to a record before storage and after retrieval.

use crate::error::{AppError, ConfigError};
use crate::registry::{Registry, Resource};
use crate::store::Document;
use async_trait::async_trait;
use serde_json::Value;

/// A transform keyed by an opaque per-resource key (e.g. field encryption).
/// `unlock(key, lock(key, r))` must give back `r`.
#[async_trait]
pub trait ContainerModifier: Send + Sync {
    /// Name resources use to declare which property holds this modifier's key.
    fn kind(&self) -> &str;

    async fn lock(&self, key: &Value, record: &mut Document) -> Result<(), AppError>;

    async fn unlock(&self, key: &Value, record: &mut Document) -> Result<(), AppError>;
}

fn key_for(resource: &Resource, kind: &str) -> Value {
    resource.modifier_key(kind).cloned().unwrap_or(Value::Null)
}

/// Runs every declared modifier's `lock` over a record about to be written.
pub async fn lock(registry: &Registry, resource: &Resource, record: &mut Document) -> Result<(), AppError> {
    for (kind, _) in resource.descriptor().modifier_keys() {
        let modifier = registry
            .modifier(kind)
            .ok_or_else(|| ConfigError::MissingModifier(kind.to_string()))?;
        modifier.lock(&key_for(resource, kind), record).await?;
    }
    Ok(())
}

/// Runs every declared modifier's `unlock` over a fetched row and the rows inlined in its foreign fields.
pub async fn unlock(registry: &Registry, resource: &Resource, row: &mut Document) -> Result<(), AppError> {
    for (kind, _) in resource.descriptor().modifier_keys() {
        let modifier = registry
            .modifier(kind)
            .ok_or_else(|| ConfigError::MissingModifier(kind.to_string()))?;
        let key = key_for(resource, kind);
        modifier.unlock(&key, row).await?;
        for (name, field) in resource.descriptor().fields() {
            if field.foreign.is_none() {
                continue;
            }
            match row.get_mut(field.column(name)) {
                Some(Value::Object(inner)) => modifier.unlock(&key, inner).await?,
                Some(Value::Array(items)) => {
                    for item in items.iter_mut() {
                        if let Value::Object(inner) = item {
                            modifier.unlock(&key, inner).await?;
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}
