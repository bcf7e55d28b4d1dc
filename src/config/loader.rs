//! Turns a resource configuration into descriptor calls on a registry builder, or loads it from disk.

use crate::config::validator::ancestry;
use crate::config::{validate, FieldConfig, FullConfig, ResourceConfig, SortableConfig};
use crate::descriptor::{EndpointBinding, ResourceDescriptor};
use crate::error::ConfigError;
use crate::registry::RegistryBuilder;
use crate::service::RequestValidator;
use crate::store::DocumentStore;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// File read from the config directory.
pub const RESOURCES_FILE: &str = "resources.json";

/// Declares every resource of `config` on a fresh builder, every model bound to `store`.
/// Inheritance is applied once all resources are declared, parents first.
pub fn resolve(config: &FullConfig, store: Arc<dyn DocumentStore>) -> Result<RegistryBuilder, ConfigError> {
    let mut builder = RegistryBuilder::new();
    resolve_into(&mut builder, config, store)?;
    Ok(builder)
}

/// Like [`resolve`], on an existing builder (e.g. one holding Rust-declared filters and accessors).
pub fn resolve_into(
    builder: &mut RegistryBuilder,
    config: &FullConfig,
    store: Arc<dyn DocumentStore>,
) -> Result<(), ConfigError> {
    validate(config)?;

    for r in &config.resources {
        declare(builder, r)?;
        let instance = builder.instance(&r.name);
        instance.set_model(r.model_key.clone(), store.clone());
        for (name, value) in &r.properties {
            instance.set_value(name.clone(), value.clone());
        }
    }

    let by_name: HashMap<&str, &ResourceConfig> =
        config.resources.iter().map(|r| (r.name.as_str(), r)).collect();
    let mut order: Vec<(usize, &ResourceConfig)> = Vec::with_capacity(config.resources.len());
    for r in &config.resources {
        order.push((ancestry(&by_name, &r.name)?.len(), r));
    }
    // shallower resources first, so a parent is complete before its children copy it
    order.sort_by_key(|(depth, _)| *depth);
    for (_, r) in order {
        if let Some(parent) = &r.extends {
            builder.extend(&r.name, parent)?;
        }
    }
    Ok(())
}

fn declare(builder: &mut RegistryBuilder, r: &ResourceConfig) -> Result<(), ConfigError> {
    let d = builder.resource(&r.name);
    if let Some(location) = &r.location {
        d.set_location(location.clone());
    }
    if let Some(table) = &r.table {
        d.bind_table(r.schema.as_deref(), table.clone());
    }
    d.set_model_key(r.model_key.clone());
    for (kind, property) in &r.modifier_keys {
        d.set_modifier_key(property.clone(), kind.clone());
    }
    for f in &r.fields {
        declare_field(d, f)?;
    }
    if r.default_endpoints {
        d.with_default_endpoints();
    }
    for e in &r.endpoints {
        let binding = EndpointBinding::new(e.endpoint.clone().unwrap_or_else(|| e.key.clone()), e.operation)
            .with_options(e.options.clone());
        d.add_endpoint(&e.key, Some(binding));
    }
    for key in &r.remove_endpoints {
        d.remove_endpoint(key);
    }
    Ok(())
}

fn declare_field(d: &mut ResourceDescriptor, f: &FieldConfig) -> Result<(), ConfigError> {
    let name = f.name.as_str();
    if let Some(db_name) = &f.db_name {
        d.set_db_name(name, db_name.clone());
    }
    if let Some(access) = f.access {
        d.set_mode(name, access);
    }
    for (mode, listable) in &f.listable {
        d.set_listable(name, listable.clone(), mode);
    }
    if let Some(ops) = &f.mandatory {
        d.set_mandatory(name, ops.iter().cloned());
    }
    match &f.sortable {
        Some(SortableConfig::Flag(active)) => {
            d.set_sortable(name, *active, false);
        }
        Some(SortableConfig::Options { no_index }) => {
            d.set_sortable(name, true, *no_index);
        }
        None => {}
    }
    if let Some(foreign) = &f.foreign {
        d.set_foreign(name, foreign.clone());
    }
    if let Some(filter) = &f.filter {
        d.set_filter(name, None, filter.use_index);
    }
    if let Some(default) = &f.default {
        d.set_default(name, default.clone());
    }
    if let Some(rule) = &f.validation {
        d.set_validator(name, Some(RequestValidator::from_rule(rule)?));
    }
    Ok(())
}

/// Reads `resources.json` from a config directory.
pub fn load_from_path(dir: impl AsRef<Path>) -> Result<FullConfig, ConfigError> {
    let path = dir.as_ref().join(RESOURCES_FILE);
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let config: FullConfig =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    tracing::info!(path = %path.display(), resources = config.resources.len(), "config loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AccessMode, Operation};
    use crate::store::MemoryStore;
    use serde_json::json;

    fn shop() -> FullConfig {
        serde_json::from_value(json!({"resources": [
            {
                "name": "base",
                "table": {"name": "orders", "indexes": [{"name": "by_customer", "columns": ["customer"]}]},
                "schema": "shop",
                "default_endpoints": false,
                "fields": [
                    {"name": "created", "access": "read_only", "listable": {"list": true}, "sortable": true}
                ]
            },
            {
                "name": "orders",
                "extends": "base",
                "location": "/shop/orders",
                "fields": [
                    {"name": "customer", "access": "read_write", "filter": {"use_index": true},
                     "mandatory": ["new"], "validation": {"format": "email"}},
                    {"name": "total", "db_name": "amount", "access": "read_write",
                     "sortable": {"no_index": true}, "default": 0},
                    {"name": "created", "access": "read_write"}
                ],
                "endpoints": [
                    {"key": "list", "endpoint": "search", "operation": "list", "options": {"maxPage": 10}}
                ],
                "remove_endpoints": ["delete"]
            }
        ]}))
        .unwrap()
    }

    #[test]
    fn resolves_fields_inheritance_and_endpoints() {
        let builder = resolve(&shop(), Arc::new(MemoryStore::new())).unwrap();
        let registry = builder.seal().unwrap();
        let orders = registry.resource("orders").unwrap().descriptor();

        assert_eq!(orders.location(), "/shop/orders");
        assert_eq!(orders.schema_name(), Some("shop"));
        assert_eq!(orders.table().unwrap().name, "orders");
        assert!(orders.field("customer").unwrap().indexable);
        assert!(orders.field("customer").unwrap().is_mandatory_for("new"));
        assert!(orders.field("customer").unwrap().validator.is_some());
        assert_eq!(orders.field("total").unwrap().column("total"), "amount");
        assert_eq!(orders.field("created").unwrap().access, Some(AccessMode::ReadWrite));
        // the child's own `created` wins over the parent's, listability included
        assert!(orders.pluck("list").unwrap().is_empty());

        let list = orders.endpoint("list").unwrap();
        assert_eq!(list.endpoint, "search");
        assert_eq!(list.operation, Operation::List);
        assert_eq!(list.options["maxPage"], json!(10));
        assert!(orders.endpoint("delete").is_none());
        assert!(orders.endpoint("get").is_some());
        assert!(registry.resource("orders").unwrap().model().is_ok());
    }

    #[test]
    fn bad_rule_is_a_config_error() {
        let config: FullConfig = serde_json::from_value(json!({"resources": [
            {"name": "a", "table": {"name": "t"}, "fields": [{"name": "x", "validation": {"pattern": "("}}]}
        ]}))
        .unwrap();
        assert!(resolve(&config, Arc::new(MemoryStore::new())).is_err());
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let err = load_from_path("/nonexistent/config/dir").err().unwrap();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
