//! Store query plans: a single-row value or a row stream, each carrying its own transform chain.

use crate::query::expr::Expr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Table address: optional schema (namespace) plus table name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        TableRef {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// How a single row is located: by primary key, or first match of a secondary index.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup {
    Primary(Value),
    Index { index: String, key: Value },
}

/// Replaces the key(s) stored in `field` with the referenced row(s).
#[derive(Clone, Debug, PartialEq)]
pub struct ForeignJoin {
    pub field: String,
    pub table: TableRef,
    pub index: Option<String>,
    pub multi: bool,
    pub pluck: Option<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transform {
    ResolveForeign(Vec<ForeignJoin>),
    Pluck(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RowQuery {
    pub table: TableRef,
    pub lookup: Lookup,
    pub transforms: Vec<Transform>,
}

impl RowQuery {
    pub fn new(table: TableRef, lookup: Lookup) -> Self {
        RowQuery {
            table,
            lookup,
            transforms: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamSource {
    Scan,
    /// Rows whose index (primary key when `None`) equals one of `keys`.
    GetAll { index: Option<String>, keys: Vec<Value> },
}

#[derive(Clone, Debug, PartialEq)]
pub enum StreamOp {
    OrderBy {
        field: String,
        direction: SortDirection,
        use_index: bool,
    },
    Filter(Expr),
    Map(Transform),
    Slice { offset: u64, limit: Option<u64> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreamQuery {
    pub table: TableRef,
    pub source: StreamSource,
    pub ops: Vec<StreamOp>,
}

impl StreamQuery {
    pub fn scan(table: TableRef) -> Self {
        StreamQuery {
            table,
            source: StreamSource::Scan,
            ops: Vec::new(),
        }
    }

    pub fn get_all(table: TableRef, index: Option<String>, keys: Vec<Value>) -> Self {
        StreamQuery {
            table,
            source: StreamSource::GetAll { index, keys },
            ops: Vec::new(),
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection, use_index: bool) -> Self {
        self.ops.push(StreamOp::OrderBy {
            field: field.into(),
            direction,
            use_index,
        });
        self
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.ops.push(StreamOp::Filter(predicate));
        self
    }

    pub fn slice(mut self, offset: u64, limit: Option<u64>) -> Self {
        self.ops.push(StreamOp::Slice { offset, limit });
        self
    }

    pub fn pluck(self, fields: Vec<String>) -> Self {
        self.transform(Transform::Pluck(fields))
    }
}

/// Shared surface of both query shapes: attach a per-row transform.
/// A `RowQuery` applies it to its one value, a `StreamQuery` maps it over every row.
pub trait Transformable: Sized {
    fn transform(self, transform: Transform) -> Self;
}

impl Transformable for RowQuery {
    fn transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }
}

impl Transformable for StreamQuery {
    fn transform(mut self, transform: Transform) -> Self {
        self.ops.push(StreamOp::Map(transform));
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Row(RowQuery),
    Stream(StreamQuery),
}

impl Selection {
    pub fn table(&self) -> &TableRef {
        match self {
            Selection::Row(q) => &q.table,
            Selection::Stream(q) => &q.table,
        }
    }
}

impl Transformable for Selection {
    fn transform(self, transform: Transform) -> Self {
        match self {
            Selection::Row(q) => Selection::Row(q.transform(transform)),
            Selection::Stream(q) => Selection::Stream(q.transform(transform)),
        }
    }
}
