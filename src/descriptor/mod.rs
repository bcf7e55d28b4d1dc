//! Resource descriptor: everything the CRUD engine knows about one resource type.
//!
//! Built once through chained `set_*` calls (from Rust or from the JSON resource
//! configuration), optionally merged with a parent via [`ResourceDescriptor::inherit`],
//! then frozen inside the sealed registry.

pub mod access;
pub mod field;

pub use access::{Readable, Writable};
pub use field::{
    AccessMode, Accessor, FieldDescriptor, ForeignRef, Getter, Listable, ReadView, Setter, Sortable, Validator,
    WriteView,
};

use crate::error::AppError;
use crate::params::RequestContext;
use crate::query::expr::{coerce_literal, Comparison, Expr};
use crate::store::{Document, TableSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Everything a filter callback gets to build its predicate from.
pub struct FilterInput<'a> {
    pub ctx: &'a RequestContext,
    /// Filter name, as in `filter_<key>`.
    pub key: &'a str,
    pub value: &'a str,
    pub mode: Comparison,
    /// The filtered field's store column.
    pub field: Expr,
    pub row: Expr,
}

pub type FilterFn = Arc<dyn Fn(&FilterInput<'_>) -> Result<Expr, AppError> + Send + Sync>;

#[derive(Clone)]
pub struct FilterDef {
    pub func: Option<FilterFn>,
    pub use_index: bool,
    /// Resolved single-column index; set only when `use_index` and the table has exactly one.
    pub index: Option<String>,
}

impl FilterDef {
    /// Builds the predicate: the custom callback, or `field <mode> literal`.
    pub fn build(&self, input: &FilterInput<'_>) -> Result<Expr, AppError> {
        match &self.func {
            Some(func) => func(input),
            None => Ok(input.field.clone().compare(input.mode, coerce_literal(input.value))),
        }
    }

    pub fn is_default(&self) -> bool {
        self.func.is_none()
    }
}

impl fmt::Debug for FilterDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterDef")
            .field("custom", &self.func.is_some())
            .field("use_index", &self.use_index)
            .field("index", &self.index)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    List,
    New,
    Edit,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Get,
        Operation::List,
        Operation::New,
        Operation::Edit,
        Operation::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::List => "list",
            Operation::New => "new",
            Operation::Edit => "edit",
            Operation::Delete => "delete",
        }
    }

    pub fn method(self) -> &'static str {
        match self {
            Operation::Get | Operation::List => "GET",
            Operation::New => "POST",
            Operation::Edit => "PUT",
            Operation::Delete => "DELETE",
        }
    }
}

/// One mounted endpoint: path segment under the resource location, operation and option overrides.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointBinding {
    pub endpoint: String,
    pub operation: Operation,
    pub options: Document,
}

impl EndpointBinding {
    pub fn new(endpoint: impl Into<String>, operation: Operation) -> Self {
        EndpointBinding {
            endpoint: endpoint.into(),
            operation,
            options: Document::new(),
        }
    }

    /// Merges option overrides; later keys replace earlier ones.
    pub fn with_options(mut self, options: Document) -> Self {
        self.options.extend(options);
        self
    }

    pub fn option(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// The five canonical endpoints, each mounted under its operation name.
    pub fn defaults() -> Vec<(String, EndpointBinding)> {
        Operation::ALL
            .iter()
            .map(|op| (op.as_str().to_string(), EndpointBinding::new(op.as_str(), *op)))
            .collect()
    }
}

#[derive(Clone, Debug)]
pub struct ResourceDescriptor {
    name: String,
    location: String,
    fields: Vec<(String, FieldDescriptor)>,
    filters: Vec<(String, FilterDef)>,
    pluck: BTreeMap<String, Vec<String>>,
    model_key: Option<String>,
    modifier_keys: BTreeMap<String, String>,
    schema_name: Option<String>,
    table: Option<TableSchema>,
    readable: Readable,
    writable: Writable,
    endpoints: BTreeMap<String, EndpointBinding>,
}

impl ResourceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        ResourceDescriptor {
            location: format!("/{}", name),
            name,
            fields: Vec::new(),
            filters: Vec::new(),
            pluck: BTreeMap::new(),
            model_key: None,
            modifier_keys: BTreeMap::new(),
            schema_name: None,
            table: None,
            readable: Readable::default(),
            writable: Writable::default(),
            endpoints: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn filters(&self) -> impl Iterator<Item = (&str, &FilterDef)> {
        self.filters.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn filter(&self, name: &str) -> Option<&FilterDef> {
        self.filters.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Column set for a list mode; `None` when the mode was never declared.
    pub fn pluck(&self, mode: &str) -> Option<&[String]> {
        self.pluck.get(mode).map(Vec::as_slice)
    }

    pub fn pluck_modes(&self) -> impl Iterator<Item = &str> {
        self.pluck.keys().map(String::as_str)
    }

    pub fn model_key(&self) -> Option<&str> {
        self.model_key.as_deref()
    }

    pub fn modifier_keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.modifier_keys.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema_name.as_deref()
    }

    pub fn table(&self) -> Option<&TableSchema> {
        self.table.as_ref()
    }

    pub fn readable(&self) -> &Readable {
        &self.readable
    }

    pub fn writable(&self) -> &Writable {
        &self.writable
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (&str, &EndpointBinding)> {
        self.endpoints.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn endpoint(&self, key: &str) -> Option<&EndpointBinding> {
        self.endpoints.get(key)
    }

    fn field_mut(&mut self, name: &str) -> &mut FieldDescriptor {
        let idx = match self.fields.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.fields.push((name.to_string(), FieldDescriptor::default()));
                self.fields.len() - 1
            }
        };
        &mut self.fields[idx].1
    }

    fn recompute_access(&mut self) {
        let (readable, writable) = access::partition(&self.fields);
        self.readable = readable;
        self.writable = writable;
    }

    fn recompute_listable(&mut self) {
        self.pluck = access::pluck_sets(&self.fields, &self.pluck);
    }

    fn recompute_indexes(&mut self) {
        for (name, filter) in self.filters.iter_mut() {
            filter.index = None;
            if !filter.use_index {
                continue;
            }
            let Some(table) = &self.table else {
                continue;
            };
            let column = self
                .fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(n, f)| f.column(n).to_string())
                .unwrap_or_else(|| name.clone());
            let mut candidates = table.single_column_indexes(&column);
            if let (Some(only), None) = (candidates.next(), candidates.next()) {
                filter.index = Some(only.name.clone());
            }
        }
        for (name, field) in self.fields.iter_mut() {
            field.indexable = self
                .filters
                .iter()
                .any(|(f, def)| f == name && def.index.is_some());
        }
    }

    pub fn set_location(&mut self, location: impl Into<String>) -> &mut Self {
        let location = location.into();
        self.location = if location.starts_with('/') {
            location
        } else {
            format!("/{}", location)
        };
        self
    }

    pub fn set_mode(&mut self, name: &str, mode: AccessMode) -> &mut Self {
        self.field_mut(name).access = Some(mode);
        self.recompute_access();
        self.recompute_listable();
        self
    }

    pub fn set_listable(&mut self, name: &str, required: Listable, mode: &str) -> &mut Self {
        self.field_mut(name)
            .listable
            .get_or_insert_with(BTreeMap::new)
            .insert(mode.to_string(), required);
        self.recompute_listable();
        self
    }

    /// Replaces the set of operations requiring this field. Empty means optional.
    pub fn set_mandatory<I, S>(&mut self, name: &str, operations: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ops: BTreeSet<String> = operations.into_iter().map(Into::into).collect();
        self.field_mut(name).mandatory = Some(ops);
        self
    }

    pub fn set_sortable(&mut self, name: &str, active: bool, no_index: bool) -> &mut Self {
        self.field_mut(name).sortable = active.then_some(Sortable { indexed: !no_index });
        self
    }

    pub fn set_foreign(&mut self, name: &str, foreign: ForeignRef) -> &mut Self {
        self.field_mut(name).foreign = Some(foreign);
        self
    }

    pub fn set_validator(&mut self, name: &str, validator: Option<Validator>) -> &mut Self {
        self.field_mut(name).validator = validator;
        self
    }

    pub fn set_descriptor(&mut self, name: &str, accessor: Option<Accessor>) -> &mut Self {
        self.field_mut(name).accessor = accessor;
        self.recompute_access();
        self.recompute_listable();
        self
    }

    pub fn set_db_name(&mut self, name: &str, db_name: impl Into<String>) -> &mut Self {
        self.field_mut(name).db_name = Some(db_name.into());
        self.recompute_listable();
        self.recompute_indexes();
        self
    }

    pub fn set_default(&mut self, name: &str, value: Value) -> &mut Self {
        self.field_mut(name).default = Some(value);
        self
    }

    /// Registers filter `name`. `None` installs the default comparison filter on the field's column.
    pub fn set_filter(&mut self, name: &str, func: Option<FilterFn>, use_index: bool) -> &mut Self {
        self.field_mut(name);
        let def = FilterDef {
            func,
            use_index,
            index: None,
        };
        match self.filters.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = def,
            None => self.filters.push((name.to_string(), def)),
        }
        self.recompute_listable();
        self.recompute_indexes();
        self
    }

    pub fn set_model_key(&mut self, name: impl Into<String>) -> &mut Self {
        self.model_key = Some(name.into());
        self
    }

    pub fn set_modifier_key(&mut self, property: impl Into<String>, kind: impl Into<String>) -> &mut Self {
        self.modifier_keys.insert(kind.into(), property.into());
        self
    }

    /// Adds or replaces a binding; `None` removes it.
    pub fn add_endpoint(&mut self, key: &str, binding: Option<EndpointBinding>) -> &mut Self {
        match binding {
            Some(binding) => {
                self.endpoints.insert(key.to_string(), binding);
            }
            None => {
                self.endpoints.remove(key);
            }
        }
        self
    }

    pub fn remove_endpoint(&mut self, key: &str) -> &mut Self {
        self.add_endpoint(key, None)
    }

    pub fn with_default_endpoints(&mut self) -> &mut Self {
        for (key, binding) in EndpointBinding::defaults() {
            self.endpoints.entry(key).or_insert(binding);
        }
        self
    }

    pub fn bind_table(&mut self, schema: Option<&str>, table: TableSchema) -> &mut Self {
        self.schema_name = schema.map(str::to_string);
        self.table = Some(table);
        self.recompute_indexes();
        self
    }

    /// Merges a parent's metadata. Entries already present here win; derived views are rebuilt.
    pub fn inherit(&mut self, parent: &ResourceDescriptor) -> &mut Self {
        for (name, filter) in &parent.filters {
            if !self.filters.iter().any(|(n, _)| n == name) {
                self.filters.push((name.clone(), filter.clone()));
            }
        }
        for (name, field) in &parent.fields {
            if !self.fields.iter().any(|(n, _)| n == name) {
                self.fields.push((name.clone(), field.clone()));
            }
        }
        for mode in parent.pluck.keys() {
            self.pluck.entry(mode.clone()).or_default();
        }
        if self.model_key.is_none() {
            self.model_key = parent.model_key.clone();
        }
        for (kind, property) in &parent.modifier_keys {
            self.modifier_keys.entry(kind.clone()).or_insert_with(|| property.clone());
        }
        for (key, binding) in &parent.endpoints {
            self.endpoints.entry(key.clone()).or_insert_with(|| binding.clone());
        }
        if self.table.is_none() {
            self.table = parent.table.clone();
            self.schema_name = parent.schema_name.clone();
        }
        self.recompute_access();
        self.recompute_listable();
        self.recompute_indexes();
        self
    }
}
