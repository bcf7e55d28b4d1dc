//! Compiles store plans into parameterized PostgreSQL over JSONB document tables.
//!
//! Every table has the layout `(seq BIGSERIAL, id TEXT PRIMARY KEY, doc JSONB NOT NULL)`.
//! Identifiers come from resource configuration only; request values are always parameters.

use super::params::SqlParam;
use crate::error::StoreError;
use crate::query::expr::Expr;
use crate::query::plan::{
    ForeignJoin, Lookup, RowQuery, Selection, SortDirection, StreamOp, StreamQuery, StreamSource, TableRef,
    Transform,
};
use crate::store::{key_text, IndexDef, TableSchema};
use serde_json::Value;
use std::collections::HashMap;

/// Known table schemas, used to resolve index columns.
pub type Catalog = HashMap<TableRef, TableSchema>;

const MAIN_ALIAS: &str = "main";
const CMP_FUNCTION: &str = "data_api_cmp";
const RANK_FUNCTION: &str = "data_api_rank";
const NUM_FUNCTION: &str = "data_api_num";
const TEXT_FUNCTION: &str = "data_api_text";
const SIZE_FUNCTION: &str = "data_api_size";

/// Text that `data_api_rank` treats as a number; same grammar as `query::expr::numeric_text`.
const NUMERIC_TEXT: &str = r"^\s*[-+]?([0-9]+\.?[0-9]*|\.[0-9]+)([eE][-+]?[0-9]+)?\s*$";

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// String literal for names that must appear verbatim, e.g. inside index expressions.
fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Full qualified table name; tables without a schema live in `default_schema`.
pub fn qualified_table(default_schema: &str, table: &TableRef) -> String {
    let schema = table.schema.as_deref().unwrap_or(default_schema);
    format!("{}.{}", quoted(schema), quoted(&table.name))
}

/// Index lookups match on the stored text form, so integral floats are bound as integers.
fn index_key(key: &Value) -> Value {
    match key.as_f64() {
        Some(f) if !key.is_i64() && !key.is_u64() && f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
            Value::from(f as i64)
        }
        _ => key.clone(),
    }
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlParam>,
    aliases: u32,
}

impl QueryBuf {
    fn new() -> Self {
        Self::default()
    }

    fn push_param(&mut self, v: impl Into<SqlParam>) -> u32 {
        self.params.push(v.into());
        self.params.len() as u32
    }

    fn alias(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        format!("{}{}", prefix, self.aliases)
    }
}

enum Projection {
    Doc,
    Id,
}

/// Writes SQL for one store: its default schema plus the catalog of bound tables.
pub struct PlanWriter<'a> {
    pub default_schema: &'a str,
    pub catalog: &'a Catalog,
}

impl<'a> PlanWriter<'a> {
    pub fn new(default_schema: &'a str, catalog: &'a Catalog) -> Self {
        PlanWriter {
            default_schema,
            catalog,
        }
    }

    pub fn qualified_table(&self, table: &TableRef) -> String {
        qualified_table(self.default_schema, table)
    }

    fn function(&self, name: &str) -> String {
        format!("{}.{}", quoted(self.default_schema), name)
    }

    /// ORDER BY keys reproducing `data_api_cmp` for the jsonb expression `v`.
    fn sort_keys(&self, v: &str, direction: SortDirection) -> String {
        let (dir, rev) = match direction {
            SortDirection::Asc => ("ASC", "DESC"),
            SortDirection::Desc => ("DESC", "ASC"),
        };
        let text = format!("{}({})", self.function(TEXT_FUNCTION), v);
        [
            format!("{}({}) {}", self.function(RANK_FUNCTION), v, dir),
            format!("{}({}) {}", self.function(NUM_FUNCTION), v, dir),
            format!("lower({}) COLLATE \"C\" {}", text, dir),
            format!("{} COLLATE \"C\" {}", text, rev),
            format!("{}({}) {}", self.function(SIZE_FUNCTION), v, dir),
            format!("{} {}", v, dir),
        ]
        .join(", ")
    }

    fn index_def(&self, table: &TableRef, index: &str) -> Result<&'a IndexDef, StoreError> {
        self.catalog
            .get(table)
            .and_then(|schema| schema.index(index))
            .ok_or_else(|| StoreError::UnknownIndex {
                table: table.to_string(),
                index: index.to_string(),
            })
    }

    /// Condition matching rows of `alias` whose index value equals the jsonb expression `key`.
    fn index_match(&self, table: &TableRef, index: &str, alias: &str, key: &str) -> Result<String, StoreError> {
        let def = self.index_def(table, index)?;
        match def.columns.as_slice() {
            [column] if def.multi => Ok(format!("({}.doc -> {}) @> {}", alias, literal(column), key)),
            [column] => Ok(format!("({}.doc ->> {}) = ({} #>> '{{}}')", alias, literal(column), key)),
            _ => Err(StoreError::Unsupported(format!("compound index '{}' lookup", index))),
        }
    }

    fn lookup_cond(
        &self,
        q: &mut QueryBuf,
        table: &TableRef,
        lookup: &Lookup,
        alias: &str,
    ) -> Result<String, StoreError> {
        match lookup {
            Lookup::Primary(key) => {
                let n = q.push_param(key_text(key));
                Ok(format!("{}.id = ${}", alias, n))
            }
            Lookup::Index { index, key } => {
                let n = q.push_param(index_key(key));
                self.index_match(table, index, alias, &format!("${}::jsonb", n))
            }
        }
    }

    fn source_cond(&self, q: &mut QueryBuf, query: &StreamQuery) -> Result<Option<String>, StoreError> {
        match &query.source {
            StreamSource::Scan => Ok(None),
            StreamSource::GetAll { index: None, keys } => {
                let n = q.push_param(keys.iter().map(key_text).collect::<Vec<_>>());
                Ok(Some(format!("{}.id = ANY(${}::text[])", MAIN_ALIAS, n)))
            }
            StreamSource::GetAll { index: Some(index), keys } => {
                let mut any = Vec::with_capacity(keys.len());
                for key in keys {
                    let n = q.push_param(index_key(key));
                    any.push(self.index_match(&query.table, index, MAIN_ALIAS, &format!("${}::jsonb", n))?);
                }
                if any.is_empty() {
                    return Ok(Some("FALSE".into()));
                }
                Ok(Some(format!("({})", any.join(" OR "))))
            }
        }
    }

    /// jsonb-valued SQL for an expression evaluated against `row` (a jsonb expression).
    fn value_sql(&self, q: &mut QueryBuf, expr: &Expr, row: &str) -> Result<String, StoreError> {
        match expr {
            Expr::Row => Ok(row.to_string()),
            Expr::Field(path) => {
                let n = q.push_param(path.clone());
                Ok(format!("COALESCE({} #> ${}::text[], 'null'::jsonb)", row, n))
            }
            Expr::Literal(v) => {
                let n = q.push_param(v.clone());
                Ok(format!("${}::jsonb", n))
            }
            other => Ok(format!("to_jsonb({})", self.bool_sql(q, other, row)?)),
        }
    }

    /// Boolean SQL for a predicate. Non-boolean values use truthiness: only null and false are false.
    pub fn bool_sql(&self, q: &mut QueryBuf, expr: &Expr, row: &str) -> Result<String, StoreError> {
        match expr {
            Expr::Compare { op, lhs, rhs } => {
                let l = self.value_sql(q, lhs, row)?;
                let r = self.value_sql(q, rhs, row)?;
                Ok(format!("({}({}, {}) {} 0)", self.function(CMP_FUNCTION), l, r, op.sql_operator()))
            }
            Expr::And(all) if all.is_empty() => Ok("TRUE".into()),
            Expr::Or(any) if any.is_empty() => Ok("FALSE".into()),
            Expr::And(all) => {
                let parts = all
                    .iter()
                    .map(|e| self.bool_sql(q, e, row))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" AND ")))
            }
            Expr::Or(any) => {
                let parts = any
                    .iter()
                    .map(|e| self.bool_sql(q, e, row))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(format!("({})", parts.join(" OR ")))
            }
            Expr::Not(e) => Ok(format!("(NOT {})", self.bool_sql(q, e, row)?)),
            Expr::Matches { expr, pattern } => {
                let v = self.value_sql(q, expr, row)?;
                let n = q.push_param(pattern.as_str());
                Ok(format!(
                    "(jsonb_typeof({v}) = 'string' AND ({v} #>> '{{}}') ~ ${n})",
                    v = v,
                    n = n
                ))
            }
            Expr::Contains { expr, value } => {
                let v = self.value_sql(q, expr, row)?;
                let n = q.push_param(value.clone());
                Ok(format!(
                    "(CASE jsonb_typeof({v}) \
                     WHEN 'array' THEN {v} @> jsonb_build_array(${n}::jsonb) \
                     WHEN 'string' THEN (jsonb_typeof(${n}::jsonb) = 'string' AND strpos({v} #>> '{{}}', ${n}::jsonb #>> '{{}}') > 0) \
                     ELSE FALSE END)",
                    v = v,
                    n = n
                ))
            }
            value => {
                let v = self.value_sql(q, value, row)?;
                Ok(format!("(NOT ({v} = 'null'::jsonb OR {v} = 'false'::jsonb))", v = v))
            }
        }
    }

    fn pluck_sql(&self, q: &mut QueryBuf, doc: &str, columns: &[String]) -> String {
        let p = q.alias("p");
        let n = q.push_param(columns.to_vec());
        format!(
            "(SELECT COALESCE(jsonb_object_agg({p}.key, {p}.value), '{{}}'::jsonb) FROM jsonb_each({doc}) AS {p} WHERE {p}.key = ANY(${n}::text[]))",
            p = p,
            doc = doc,
            n = n
        )
    }

    /// The referenced row for the jsonb key expression `key`, or JSON null.
    fn resolve_one_sql(&self, q: &mut QueryBuf, join: &ForeignJoin, key: &str) -> Result<String, StoreError> {
        let f = q.alias("f");
        let cond = match &join.index {
            Some(index) => self.index_match(&join.table, index, &f, key)?,
            None => format!("{}.id = ({} #>> '{{}}')", f, key),
        };
        let doc = format!("{}.doc", f);
        let projected = match &join.pluck {
            Some(columns) => self.pluck_sql(q, &doc, columns),
            None => doc,
        };
        Ok(format!(
            "COALESCE((SELECT {} FROM {} {} WHERE {} ORDER BY {}.seq LIMIT 1), 'null'::jsonb)",
            projected,
            self.qualified_table(&join.table),
            f,
            cond,
            f
        ))
    }

    fn transform_sql(&self, q: &mut QueryBuf, transform: &Transform, doc: String) -> Result<String, StoreError> {
        match transform {
            Transform::Pluck(columns) => Ok(self.pluck_sql(q, &doc, columns)),
            Transform::ResolveForeign(joins) => {
                let mut pairs = Vec::with_capacity(joins.len());
                for join in joins {
                    let key = format!("({} -> {})", doc, literal(&join.field));
                    let resolved = if join.multi {
                        let e = q.alias("e");
                        let element = format!("{}.value", e);
                        let one = self.resolve_one_sql(q, join, &element)?;
                        format!(
                            "(CASE WHEN jsonb_typeof({key}) = 'array' THEN \
                             (SELECT COALESCE(jsonb_agg({one} ORDER BY {e}.ord), '[]'::jsonb) \
                             FROM jsonb_array_elements({key}) WITH ORDINALITY AS {e}(value, ord)) \
                             ELSE '[]'::jsonb END)",
                            key = key,
                            one = one,
                            e = e
                        )
                    } else {
                        self.resolve_one_sql(q, join, &key)?
                    };
                    pairs.push(format!("{}, {}", literal(&join.field), resolved));
                }
                Ok(format!("({} || jsonb_build_object({}))", doc, pairs.join(", ")))
            }
        }
    }

    pub fn select_row(&self, query: &RowQuery) -> Result<QueryBuf, StoreError> {
        let mut q = QueryBuf::new();
        let cond = self.lookup_cond(&mut q, &query.table, &query.lookup, MAIN_ALIAS)?;
        let mut doc = format!("{}.doc", MAIN_ALIAS);
        for transform in &query.transforms {
            doc = self.transform_sql(&mut q, transform, doc)?;
        }
        q.sql = format!(
            "SELECT {} AS doc FROM {} {} WHERE {} ORDER BY {}.seq LIMIT 1",
            doc,
            self.qualified_table(&query.table),
            MAIN_ALIAS,
            cond,
            MAIN_ALIAS
        );
        Ok(q)
    }

    fn stream_sql(&self, q: &mut QueryBuf, query: &StreamQuery, projection: Projection) -> Result<String, StoreError> {
        let mut conds: Vec<String> = self.source_cond(q, query)?.into_iter().collect();
        let mut order: Vec<String> = Vec::new();
        let mut maps: Vec<&Transform> = Vec::new();
        let mut offset: u64 = 0;
        let mut limit: Option<u64> = None;
        let mut paged = false;
        let row = format!("{}.doc", MAIN_ALIAS);

        for op in &query.ops {
            match op {
                StreamOp::OrderBy { field, direction, .. } => {
                    if paged || !maps.is_empty() {
                        return Err(StoreError::Unsupported("sort after map or slice".into()));
                    }
                    let value = format!("COALESCE({} -> {}, 'null'::jsonb)", row, literal(field));
                    // A later sort is the primary key; earlier ones break its ties.
                    order.insert(0, self.sort_keys(&value, *direction));
                }
                StreamOp::Filter(predicate) => {
                    if paged || !maps.is_empty() {
                        return Err(StoreError::Unsupported("filter after map or slice".into()));
                    }
                    conds.push(self.bool_sql(q, predicate, &row)?);
                }
                StreamOp::Map(transform) => maps.push(transform),
                StreamOp::Slice { offset: o, limit: l } => {
                    limit = match (limit, l) {
                        (None, l) => *l,
                        (Some(current), l) => {
                            let left = current.saturating_sub(*o);
                            Some(l.map_or(left, |l| l.min(left)))
                        }
                    };
                    offset += o;
                    paged = true;
                }
            }
        }

        let select = match projection {
            Projection::Id => format!("{}.id", MAIN_ALIAS),
            Projection::Doc => {
                let mut doc = row.clone();
                for transform in maps {
                    doc = self.transform_sql(q, transform, doc)?;
                }
                format!("{} AS doc", doc)
            }
        };
        order.push(format!("{}.seq", MAIN_ALIAS));
        let where_clause = if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        };
        let limit_clause = limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
        let offset_clause = if offset > 0 {
            format!(" OFFSET {}", offset)
        } else {
            String::new()
        };
        Ok(format!(
            "SELECT {} FROM {} {}{} ORDER BY {}{}{}",
            select,
            self.qualified_table(&query.table),
            MAIN_ALIAS,
            where_clause,
            order.join(", "),
            limit_clause,
            offset_clause
        ))
    }

    pub fn select_stream(&self, query: &StreamQuery) -> Result<QueryBuf, StoreError> {
        let mut q = QueryBuf::new();
        let sql = self.stream_sql(&mut q, query, Projection::Doc)?;
        q.sql = sql;
        Ok(q)
    }

    pub fn count(&self, query: &StreamQuery) -> Result<QueryBuf, StoreError> {
        let mut q = QueryBuf::new();
        let inner = self.stream_sql(&mut q, query, Projection::Id)?;
        q.sql = format!("SELECT COUNT(*) FROM ({}) AS counted", inner);
        Ok(q)
    }

    pub fn delete(&self, selection: &Selection) -> Result<QueryBuf, StoreError> {
        let mut q = QueryBuf::new();
        let table = selection.table();
        let ids = match selection {
            Selection::Row(row) => {
                let cond = self.lookup_cond(&mut q, &row.table, &row.lookup, MAIN_ALIAS)?;
                format!(
                    "SELECT {m}.id FROM {t} {m} WHERE {c} ORDER BY {m}.seq LIMIT 1",
                    m = MAIN_ALIAS,
                    t = self.qualified_table(&row.table),
                    c = cond
                )
            }
            Selection::Stream(stream) => self.stream_sql(&mut q, stream, Projection::Id)?,
        };
        q.sql = format!("DELETE FROM {} WHERE id IN ({})", self.qualified_table(table), ids);
        Ok(q)
    }

    pub fn insert(&self, table: &TableRef, id: String, doc: Value) -> QueryBuf {
        let mut q = QueryBuf::new();
        let id_n = q.push_param(id);
        let doc_n = q.push_param(doc);
        q.sql = format!(
            "INSERT INTO {} (id, doc) VALUES (${}, ${}::jsonb) ON CONFLICT (id) DO NOTHING",
            self.qualified_table(table),
            id_n,
            doc_n
        );
        q
    }

    /// Whether the row already contains `patch`; no row when the key is unknown.
    pub fn contains_patch(&self, table: &TableRef, key: &Value, patch: Value) -> QueryBuf {
        let mut q = QueryBuf::new();
        let id_n = q.push_param(key_text(key));
        let patch_n = q.push_param(patch);
        q.sql = format!(
            "SELECT doc @> ${}::jsonb FROM {} WHERE id = ${}",
            patch_n,
            self.qualified_table(table),
            id_n
        );
        q
    }

    pub fn update(&self, table: &TableRef, key: &Value, patch: Value) -> QueryBuf {
        let mut q = QueryBuf::new();
        let id_n = q.push_param(key_text(key));
        let patch_n = q.push_param(patch);
        q.sql = format!(
            "UPDATE {} SET doc = doc || ${}::jsonb WHERE id = ${}",
            self.qualified_table(table),
            patch_n,
            id_n
        );
        q
    }
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(schema))
}

pub fn create_table(qualified: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (seq BIGSERIAL, id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
        qualified
    )
}

/// Expression index matching the lookups `PlanWriter` generates for `index`.
pub fn create_index(qualified: &str, table: &TableSchema, index: &IndexDef) -> String {
    let name = quoted(&format!("{}_{}", table.name, index.name));
    match index.columns.as_slice() {
        [column] if index.multi => format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN ((doc -> {}))",
            name,
            qualified,
            literal(column)
        ),
        columns => {
            let exprs: Vec<String> = columns.iter().map(|c| format!("(doc ->> {})", literal(c))).collect();
            format!("CREATE INDEX IF NOT EXISTS {} ON {} ({})", name, qualified, exprs.join(", "))
        }
    }
}

/// Ordering helpers, one statement each. Values rank null, text, numbers (numeric text included),
/// booleans, arrays, objects. Numbers compare by value; text case-insensitively, lowercase first on ties;
/// containers by size, then natively.
pub fn helper_functions(schema: &str) -> Vec<String> {
    let s = quoted(schema);
    vec![
        format!(
            r#"CREATE OR REPLACE FUNCTION {s}.{rank}(v jsonb) RETURNS integer
            LANGUAGE sql IMMUTABLE AS $fn$
            SELECT CASE jsonb_typeof(COALESCE(v, 'null'::jsonb))
                WHEN 'null' THEN 0
                WHEN 'string' THEN CASE WHEN (v #>> '{{}}') ~ '{re}' THEN 2 ELSE 1 END
                WHEN 'number' THEN 2
                WHEN 'boolean' THEN 3
                WHEN 'array' THEN 4
                ELSE 5 END
            $fn$"#,
            s = s,
            rank = RANK_FUNCTION,
            re = NUMERIC_TEXT
        ),
        format!(
            r#"CREATE OR REPLACE FUNCTION {s}.{num}(v jsonb) RETURNS numeric
            LANGUAGE sql IMMUTABLE AS $fn$
            SELECT CASE WHEN {s}.{rank}(v) = 2 THEN (v #>> '{{}}')::numeric END
            $fn$"#,
            s = s,
            num = NUM_FUNCTION,
            rank = RANK_FUNCTION
        ),
        format!(
            r#"CREATE OR REPLACE FUNCTION {s}.{text}(v jsonb) RETURNS text
            LANGUAGE sql IMMUTABLE AS $fn$
            SELECT CASE WHEN {s}.{rank}(v) = 1 THEN v #>> '{{}}' END
            $fn$"#,
            s = s,
            text = TEXT_FUNCTION,
            rank = RANK_FUNCTION
        ),
        format!(
            r#"CREATE OR REPLACE FUNCTION {s}.{size}(v jsonb) RETURNS integer
            LANGUAGE sql IMMUTABLE AS $fn$
            SELECT CASE jsonb_typeof(v)
                WHEN 'array' THEN jsonb_array_length(v)
                WHEN 'object' THEN (SELECT count(*)::integer FROM jsonb_object_keys(v))
                END
            $fn$"#,
            s = s,
            size = SIZE_FUNCTION
        ),
        format!(
            r#"CREATE OR REPLACE FUNCTION {s}.{cmp}(a jsonb, b jsonb) RETURNS integer
            LANGUAGE plpgsql IMMUTABLE AS $fn$
            DECLARE
                ra integer := {s}.{rank}(a);
                rb integer := {s}.{rank}(b);
                ta text;
                tb text;
                x numeric;
                y numeric;
            BEGIN
                a := COALESCE(a, 'null'::jsonb);
                b := COALESCE(b, 'null'::jsonb);
                IF ra <> rb THEN
                    RETURN CASE WHEN ra < rb THEN -1 ELSE 1 END;
                END IF;
                IF ra = 2 THEN
                    x := {s}.{num}(a);
                    y := {s}.{num}(b);
                    RETURN CASE WHEN x < y THEN -1 WHEN x > y THEN 1 ELSE 0 END;
                END IF;
                IF ra = 1 THEN
                    ta := a #>> '{{}}';
                    tb := b #>> '{{}}';
                    IF lower(ta) COLLATE "C" < lower(tb) COLLATE "C" THEN RETURN -1; END IF;
                    IF lower(ta) COLLATE "C" > lower(tb) COLLATE "C" THEN RETURN 1; END IF;
                    RETURN CASE WHEN ta COLLATE "C" > tb COLLATE "C" THEN -1
                                WHEN ta COLLATE "C" < tb COLLATE "C" THEN 1 ELSE 0 END;
                END IF;
                IF ra IN (4, 5) AND {s}.{size}(a) <> {s}.{size}(b) THEN
                    RETURN CASE WHEN {s}.{size}(a) < {s}.{size}(b) THEN -1 ELSE 1 END;
                END IF;
                RETURN CASE WHEN a < b THEN -1 WHEN a > b THEN 1 ELSE 0 END;
            END
            $fn$"#,
            s = s,
            cmp = CMP_FUNCTION,
            rank = RANK_FUNCTION,
            num = NUM_FUNCTION,
            size = SIZE_FUNCTION
        ),
    ]
}
