//! Per-field metadata: access mode, listability, sorting, foreign references, validators and accessors.

use crate::error::AppError;
use crate::store::Document;
use futures::future::{self, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Bitmask access mode. `ReadWrite` is `ReadOnly | WriteOnly`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    const READ: u8 = 0b01;
    const WRITE: u8 = 0b10;

    pub fn bits(self) -> u8 {
        match self {
            AccessMode::ReadOnly => Self::READ,
            AccessMode::WriteOnly => Self::WRITE,
            AccessMode::ReadWrite => Self::READ | Self::WRITE,
        }
    }

    pub fn can_read(self) -> bool {
        self.bits() & Self::READ != 0
    }

    pub fn can_write(self) -> bool {
        self.bits() & Self::WRITE != 0
    }
}

/// Columns a field contributes to a list mode.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listable {
    /// `true`: the field's own store column. `false`: nothing.
    Flag(bool),
    Columns(Vec<String>),
}

impl Listable {
    pub fn columns(&self, own_column: &str) -> Vec<String> {
        match self {
            Listable::Flag(true) => vec![own_column.to_string()],
            Listable::Flag(false) => Vec::new(),
            Listable::Columns(columns) => columns.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Listable::Flag(flag) => !flag,
            Listable::Columns(columns) => columns.is_empty(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sortable {
    pub indexed: bool,
}

/// Reference to rows of another table, keyed by this field's value(s).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForeignRef {
    pub table: String,
    /// Schema of the referenced table. Defaults to the owning resource's schema.
    #[serde(default)]
    pub table_type: Option<String>,
    /// Secondary index on the referenced table; primary key when absent.
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub pluck: Option<Vec<String>>,
}

impl ForeignRef {
    pub fn new(table: impl Into<String>) -> Self {
        ForeignRef {
            table: table.into(),
            table_type: None,
            index: None,
            multi: false,
            pluck: None,
        }
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    pub fn pluck<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pluck = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Acceptance predicate over a field value.
#[derive(Clone)]
pub enum Validator {
    Sync(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
    Async(Arc<dyn Fn(Value) -> BoxFuture<'static, bool> + Send + Sync>),
}

impl Validator {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Validator::Sync(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Validator::Async(Arc::new(move |v| f(v).boxed()))
    }

    pub async fn check(&self, value: &Value) -> bool {
        match self {
            Validator::Sync(f) => f(value),
            Validator::Async(f) => f(value.clone()).await,
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Sync(_) => f.write_str("Validator::Sync"),
            Validator::Async(_) => f.write_str("Validator::Async"),
        }
    }
}

/// What a getter sees: the plain props already projected, and the raw stored row.
#[derive(Clone, Debug, Default)]
pub struct ReadView {
    pub props: Document,
    pub row: Document,
}

/// What a setter sees: the record being written and the client input.
pub struct WriteView<'a> {
    pub record: &'a mut Document,
    pub input: &'a Document,
}

pub type Getter = Arc<dyn Fn(&ReadView) -> BoxFuture<'static, Result<Value, AppError>> + Send + Sync>;
pub type Setter = Arc<dyn Fn(&mut WriteView<'_>, Value) -> Result<(), AppError> + Send + Sync>;

/// Computed get/set behavior. A field without an accessor is a plain stored prop.
#[derive(Clone, Default)]
pub struct Accessor {
    pub get: Option<Getter>,
    pub set: Option<Setter>,
}

impl Accessor {
    pub fn getter<F>(f: F) -> Self
    where
        F: Fn(&ReadView) -> Result<Value, AppError> + Send + Sync + 'static,
    {
        Accessor {
            get: Some(Arc::new(move |view| future::ready(f(view)).boxed())),
            set: None,
        }
    }

    pub fn async_getter<F, Fut>(f: F) -> Self
    where
        F: Fn(&ReadView) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
    {
        Accessor {
            get: Some(Arc::new(move |view| f(view).boxed())),
            set: None,
        }
    }

    pub fn setter<F>(f: F) -> Self
    where
        F: Fn(&mut WriteView<'_>, Value) -> Result<(), AppError> + Send + Sync + 'static,
    {
        Accessor {
            get: None,
            set: Some(Arc::new(f)),
        }
    }

    pub fn with_setter<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut WriteView<'_>, Value) -> Result<(), AppError> + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("get", &self.get.is_some())
            .field("set", &self.set.is_some())
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FieldDescriptor {
    pub db_name: Option<String>,
    pub access: Option<AccessMode>,
    pub listable: Option<BTreeMap<String, Listable>>,
    pub mandatory: Option<BTreeSet<String>>,
    pub sortable: Option<Sortable>,
    pub foreign: Option<ForeignRef>,
    pub validator: Option<Validator>,
    pub indexable: bool,
    pub accessor: Option<Accessor>,
    pub default: Option<Value>,
}

impl FieldDescriptor {
    /// Store column, falling back to the field name.
    pub fn column<'a>(&'a self, name: &'a str) -> &'a str {
        self.db_name.as_deref().unwrap_or(name)
    }

    pub fn has_getter(&self) -> bool {
        self.accessor.as_ref().is_some_and(|a| a.get.is_some())
    }

    pub fn has_setter(&self) -> bool {
        self.accessor.as_ref().is_some_and(|a| a.set.is_some())
    }

    pub fn is_listable_in(&self, mode: &str) -> bool {
        self.listable
            .as_ref()
            .and_then(|modes| modes.get(mode))
            .is_some_and(|l| !l.is_empty())
    }

    pub fn is_mandatory_for(&self, operation: &str) -> bool {
        self.mandatory.as_ref().is_some_and(|ops| ops.contains(operation))
    }
}
