//! Raw config types matching the JSON resource configuration (`resources.json`).

use crate::descriptor::{AccessMode, ForeignRef, Listable, Operation};
use crate::store::{Document, TableSchema};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

fn default_model_key() -> String {
    "table".to_string()
}

/// Declarative per-field validator. Every check is optional; null values always pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ValidationRule {
    /// JSON type: string, number, integer, boolean, array, object.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// email, uuid, date (YYYY-MM-DD) or date-time (RFC 3339).
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SortableConfig {
    Flag(bool),
    Options {
        #[serde(default)]
        no_index: bool,
    },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub use_index: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub access: Option<AccessMode>,
    /// List mode → `true`, `false` or the store columns the field needs.
    #[serde(default)]
    pub listable: BTreeMap<String, Listable>,
    /// Operations (`new`, `edit`) for which the field must be present.
    #[serde(default)]
    pub mandatory: Option<Vec<String>>,
    #[serde(default)]
    pub sortable: Option<SortableConfig>,
    #[serde(default)]
    pub foreign: Option<ForeignRef>,
    /// Installs the default comparison filter `filter_<name>`.
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub validation: Option<ValidationRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub key: String,
    /// Path segment under the resource location. Defaults to `key`.
    #[serde(default)]
    pub endpoint: Option<String>,
    pub operation: Operation,
    #[serde(default)]
    pub options: Document,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,
    /// Mount location. Defaults to `/<name>`.
    #[serde(default)]
    pub location: Option<String>,
    /// Parent resource whose metadata is merged in (first writer wins).
    #[serde(default)]
    pub extends: Option<String>,
    /// Schema of the backing table; the store's default schema when absent.
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<TableSchema>,
    /// Instance property the store model is bound under.
    #[serde(default = "default_model_key")]
    pub model_key: String,
    /// Container modifier kind → instance property holding its key.
    #[serde(default)]
    pub modifier_keys: BTreeMap<String, String>,
    /// Plain instance properties (e.g. modifier keys).
    #[serde(default)]
    pub properties: Document,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    /// Mount get/list/new/edit/delete under their own names.
    #[serde(default = "default_true")]
    pub default_endpoints: bool,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub remove_endpoints: Vec<String>,
}

/// All resources in one struct for in-memory loading.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FullConfig {
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}
