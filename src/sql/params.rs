//! Typed bind values for generated PostgreSQL queries.

use crate::error::StoreError;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::Arguments;

/// A value bound to a `$n` placeholder. The builder casts placeholders to match.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlParam {
    Text(String),
    TextArray(Vec<String>),
    Json(Value),
    BigInt(i64),
}

impl From<&str> for SqlParam {
    fn from(s: &str) -> Self {
        SqlParam::Text(s.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(s: String) -> Self {
        SqlParam::Text(s)
    }
}

impl From<Vec<String>> for SqlParam {
    fn from(v: Vec<String>) -> Self {
        SqlParam::TextArray(v)
    }
}

impl From<Value> for SqlParam {
    fn from(v: Value) -> Self {
        SqlParam::Json(v)
    }
}

/// Binds every parameter in placeholder order.
pub fn bind_all(params: &[SqlParam]) -> Result<PgArguments, StoreError> {
    let mut args = PgArguments::default();
    for p in params {
        let added = match p {
            SqlParam::Text(s) => args.add(s.clone()),
            SqlParam::TextArray(v) => args.add(v.clone()),
            SqlParam::Json(v) => args.add(v.clone()),
            SqlParam::BigInt(n) => args.add(*n),
        };
        added.map_err(|e| StoreError::Db(sqlx::Error::Encode(e)))?;
    }
    Ok(args)
}
