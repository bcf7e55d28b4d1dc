//! Resource registry: mutable while resources are being declared, sealed and shared read-only afterwards.

use crate::descriptor::{Operation, ResourceDescriptor};
use crate::error::{AppError, ConfigError, StoreError};
use crate::query::TableRef;
use crate::service::ContainerModifier;
use crate::store::{DocumentStore, TableSchema};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A value held by a resource instance: the store model it is bound to, or a plain value such as a modifier key.
#[derive(Clone)]
pub enum Property {
    Model(Arc<dyn DocumentStore>),
    Value(Value),
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Property::Model(_) => f.write_str("Property::Model"),
            Property::Value(v) => write!(f, "Property::Value({})", v),
        }
    }
}

/// Per-resource property bag.
#[derive(Clone, Debug, Default)]
pub struct ResourceInstance {
    properties: BTreeMap<String, Property>,
}

impl ResourceInstance {
    pub fn set_model(&mut self, name: impl Into<String>, store: Arc<dyn DocumentStore>) -> &mut Self {
        self.properties.insert(name.into(), Property::Model(store));
        self
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.properties.insert(name.into(), Property::Value(value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    fn inherit(&mut self, parent: &ResourceInstance) {
        for (name, property) in &parent.properties {
            self.properties.entry(name.clone()).or_insert_with(|| property.clone());
        }
    }
}

/// The store and table a resource reads and writes.
pub struct Model<'a> {
    pub store: &'a dyn DocumentStore,
    pub table: TableRef,
    pub schema: &'a TableSchema,
}

#[derive(Debug)]
pub struct Resource {
    descriptor: ResourceDescriptor,
    instance: ResourceInstance,
}

impl Resource {
    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn instance(&self) -> &ResourceInstance {
        &self.instance
    }

    /// Resolves the model bound under the descriptor's model key.
    pub fn model(&self) -> Result<Model<'_>, ConfigError> {
        let key = self.descriptor.model_key().ok_or(ConfigError::MissingModelKey)?;
        let store = match self.instance.get(key) {
            Some(Property::Model(store)) => store.as_ref(),
            _ => return Err(ConfigError::UnboundModel(key.to_string())),
        };
        let schema = self
            .descriptor
            .table()
            .ok_or_else(|| ConfigError::MissingTable(self.descriptor.name().to_string()))?;
        Ok(Model {
            store,
            table: TableRef::new(self.descriptor.schema_name(), &schema.name),
            schema,
        })
    }

    /// Key for a container modifier kind, read from the instance property the descriptor names.
    pub fn modifier_key(&self, kind: &str) -> Option<&Value> {
        let (_, property) = self.descriptor.modifier_keys().find(|(k, _)| *k == kind)?;
        match self.instance.get(property)? {
            Property::Value(v) => Some(v),
            Property::Model(_) => None,
        }
    }
}

/// Full mount path of an endpoint under a resource location; repeated slashes collapse.
pub fn route_path(location: &str, endpoint: &str) -> String {
    let joined = format!("/{}/{}", location, endpoint);
    let mut out = String::with_capacity(joined.len());
    for c in joined.chars() {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

#[derive(Default)]
pub struct RegistryBuilder {
    resources: BTreeMap<String, Resource>,
    modifiers: HashMap<String, Arc<dyn ContainerModifier>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, name: &str) -> &mut Resource {
        self.resources.entry(name.to_string()).or_insert_with(|| Resource {
            descriptor: ResourceDescriptor::new(name),
            instance: ResourceInstance::default(),
        })
    }

    /// Descriptor for `name`, created on first reference.
    pub fn resource(&mut self, name: &str) -> &mut ResourceDescriptor {
        &mut self.entry(name).descriptor
    }

    pub fn instance(&mut self, name: &str) -> &mut ResourceInstance {
        &mut self.entry(name).instance
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Merges `parent` into `child`, descriptor and instance alike.
    pub fn extend(&mut self, child: &str, parent: &str) -> Result<&mut Self, ConfigError> {
        let (descriptor, instance) = self
            .resources
            .get(parent)
            .map(|p| (p.descriptor.clone(), p.instance.clone()))
            .ok_or_else(|| ConfigError::UnknownResource(parent.to_string()))?;
        let entry = self.entry(child);
        entry.descriptor.inherit(&descriptor);
        entry.instance.inherit(&instance);
        Ok(self)
    }

    pub fn register_modifier(&mut self, modifier: Arc<dyn ContainerModifier>) -> &mut Self {
        self.modifiers.insert(modifier.kind().to_string(), modifier);
        self
    }

    /// Freezes every descriptor. Fails on clashing routes or modifier kinds nobody registered.
    pub fn seal(self) -> Result<Registry, ConfigError> {
        let mut routes: HashSet<(&'static str, String)> = HashSet::new();
        for resource in self.resources.values() {
            let descriptor = &resource.descriptor;
            for (_, binding) in descriptor.endpoints() {
                let method = binding.operation.method();
                let path = route_path(descriptor.location(), &binding.endpoint);
                if !routes.insert((method, path.clone())) {
                    return Err(ConfigError::DuplicateRoute { method, path });
                }
            }
            for (kind, _) in descriptor.modifier_keys() {
                if !self.modifiers.contains_key(kind) {
                    return Err(ConfigError::MissingModifier(kind.to_string()));
                }
            }
            tracing::info!(
                resource = %descriptor.name(),
                location = %descriptor.location(),
                endpoints = descriptor.endpoints().count(),
                "resource registered"
            );
        }
        Ok(Registry {
            resources: self
                .resources
                .into_iter()
                .map(|(name, resource)| (name, Arc::new(resource)))
                .collect(),
            modifiers: self.modifiers,
        })
    }
}

/// Sealed, read-only set of resources.
pub struct Registry {
    resources: BTreeMap<String, Arc<Resource>>,
    modifiers: HashMap<String, Arc<dyn ContainerModifier>>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    pub fn resource(&self, name: &str) -> Result<&Arc<Resource>, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownResource(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Resource>)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn modifier(&self, kind: &str) -> Option<&Arc<dyn ContainerModifier>> {
        self.modifiers.get(kind)
    }

    /// Every (method, path, operation) triple the registry exposes, for logging and introspection.
    pub fn routes(&self) -> Vec<(&'static str, String, Operation)> {
        self.resources
            .values()
            .flat_map(|r| {
                let location = r.descriptor.location().to_string();
                r.descriptor
                    .endpoints()
                    .map(move |(_, b)| (b.operation.method(), route_path(&location, &b.endpoint), b.operation))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Creates every bound resource table (and its indexes) in its store.
    pub async fn ensure_tables(&self) -> Result<(), AppError> {
        for resource in self.resources.values() {
            if resource.descriptor.model_key().is_none() {
                continue;
            }
            let model = resource.model()?;
            model.store.ensure_table(&model.table, model.schema).await?;
        }
        Ok(())
    }

    /// Pings the store behind every bound resource.
    pub async fn ping(&self) -> Result<(), StoreError> {
        for resource in self.resources.values() {
            if let Ok(model) = resource.model() {
                model.store.ping().await?;
            }
        }
        Ok(())
    }
}
