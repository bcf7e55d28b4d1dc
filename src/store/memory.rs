//! In-process document store. Evaluates plans directly over JSON rows; used by tests and the demo server.

use super::{key_text, Document, DocumentStore, InsertResult, TableSchema, WriteResult};
use crate::error::StoreError;
use crate::query::expr::{compare_values, values_equal, Expr};
use crate::query::plan::{
    ForeignJoin, Lookup, RowQuery, Selection, SortDirection, StreamOp, StreamQuery, StreamSource, TableRef,
    Transform,
};
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct MemTable {
    schema: TableSchema,
    rows: Vec<Document>,
}

type Tables = HashMap<TableRef, MemTable>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn table<'a>(tables: &'a Tables, table: &TableRef) -> Result<&'a MemTable, StoreError> {
    tables
        .get(table)
        .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
}

fn field_path<'a>(row: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(row, |v, segment| v.get(segment.as_str()))
}

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

/// Patterns compiled once per filter pass.
#[derive(Default)]
struct Patterns(HashMap<String, Regex>);

impl Patterns {
    fn get(&mut self, pattern: &str) -> Result<&Regex, StoreError> {
        if !self.0.contains_key(pattern) {
            self.0.insert(pattern.to_string(), Regex::new(pattern)?);
        }
        self.0
            .get(pattern)
            .ok_or_else(|| StoreError::Unsupported(format!("pattern '{}'", pattern)))
    }
}

fn eval(expr: &Expr, row: &Value, patterns: &mut Patterns) -> Result<Value, StoreError> {
    Ok(match expr {
        Expr::Row => row.clone(),
        Expr::Field(path) => field_path(row, path).cloned().unwrap_or(Value::Null),
        Expr::Literal(v) => v.clone(),
        Expr::Compare { op, lhs, rhs } => {
            let l = eval(lhs, row, patterns)?;
            let r = eval(rhs, row, patterns)?;
            Value::Bool(op.holds(compare_values(&l, &r)))
        }
        Expr::And(all) => {
            for e in all {
                if !truthy(&eval(e, row, patterns)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Value::Bool(true)
        }
        Expr::Or(any) => {
            for e in any {
                if truthy(&eval(e, row, patterns)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Value::Bool(false)
        }
        Expr::Not(e) => Value::Bool(!truthy(&eval(e, row, patterns)?)),
        Expr::Matches { expr, pattern } => match eval(expr, row, patterns)? {
            Value::String(s) => Value::Bool(patterns.get(pattern)?.is_match(&s)),
            _ => Value::Bool(false),
        },
        Expr::Contains { expr, value } => match eval(expr, row, patterns)? {
            Value::Array(items) => Value::Bool(items.iter().any(|i| values_equal(i, value))),
            Value::String(s) => Value::Bool(value.as_str().is_some_and(|needle| s.contains(needle))),
            _ => Value::Bool(false),
        },
    })
}

/// Whether `row` is reachable under `key` through `index`.
fn index_matches(schema: &TableSchema, index: &str, row: &Document, key: &Value) -> Result<bool, StoreError> {
    let def = schema.index(index).ok_or_else(|| StoreError::UnknownIndex {
        table: schema.name.clone(),
        index: index.to_string(),
    })?;
    if let [column] = def.columns.as_slice() {
        let value = row.get(column).unwrap_or(&Value::Null);
        return Ok(match value {
            Value::Array(items) if def.multi => items.iter().any(|i| values_equal(i, key)),
            other => values_equal(other, key),
        });
    }
    let Value::Array(parts) = key else {
        return Ok(false);
    };
    Ok(parts.len() == def.columns.len()
        && def
            .columns
            .iter()
            .zip(parts)
            .all(|(c, k)| values_equal(row.get(c).unwrap_or(&Value::Null), k)))
}

fn primary_matches(schema: &TableSchema, row: &Document, key: &Value) -> bool {
    row.get(&schema.primary_key)
        .is_some_and(|v| key_text(v) == key_text(key))
}

fn find_row<'a>(t: &'a MemTable, lookup: &Lookup) -> Result<Option<&'a Document>, StoreError> {
    match lookup {
        Lookup::Primary(key) => Ok(t.rows.iter().find(|r| primary_matches(&t.schema, r, key))),
        Lookup::Index { index, key } => {
            for row in &t.rows {
                if index_matches(&t.schema, index, row, key)? {
                    return Ok(Some(row));
                }
            }
            Ok(None)
        }
    }
}

fn pluck(row: Value, columns: &[String]) -> Value {
    match row {
        Value::Object(doc) => Value::Object(doc.into_iter().filter(|(k, _)| columns.contains(k)).collect()),
        other => other,
    }
}

fn resolve_one(tables: &Tables, join: &ForeignJoin, key: &Value) -> Result<Value, StoreError> {
    if key.is_null() {
        return Ok(Value::Null);
    }
    let target = table(tables, &join.table)?;
    let lookup = match &join.index {
        Some(index) => Lookup::Index {
            index: index.clone(),
            key: key.clone(),
        },
        None => Lookup::Primary(key.clone()),
    };
    let found = find_row(target, &lookup)?.cloned().map(Value::Object);
    Ok(match (found, &join.pluck) {
        (Some(row), Some(columns)) => pluck(row, columns),
        (Some(row), None) => row,
        (None, _) => Value::Null,
    })
}

fn apply_transform(tables: &Tables, transform: &Transform, row: Value) -> Result<Value, StoreError> {
    match transform {
        Transform::Pluck(columns) => Ok(pluck(row, columns)),
        Transform::ResolveForeign(joins) => {
            let Value::Object(mut doc) = row else {
                return Ok(row);
            };
            for join in joins {
                let current = doc.get(&join.field).cloned().unwrap_or(Value::Null);
                let resolved = if join.multi {
                    match current {
                        Value::Array(keys) => Value::Array(
                            keys.iter()
                                .map(|k| resolve_one(tables, join, k))
                                .collect::<Result<_, _>>()?,
                        ),
                        _ => Value::Array(Vec::new()),
                    }
                } else {
                    resolve_one(tables, join, &current)?
                };
                doc.insert(join.field.clone(), resolved);
            }
            Ok(Value::Object(doc))
        }
    }
}

fn run_stream(tables: &Tables, query: &StreamQuery) -> Result<Vec<Value>, StoreError> {
    let t = table(tables, &query.table)?;
    let mut rows: Vec<Value> = match &query.source {
        StreamSource::Scan => t.rows.iter().cloned().map(Value::Object).collect(),
        StreamSource::GetAll { index, keys } => {
            let mut out = Vec::new();
            for row in &t.rows {
                let mut hit = false;
                for key in keys {
                    hit = match index {
                        Some(index) => index_matches(&t.schema, index, row, key)?,
                        None => primary_matches(&t.schema, row, key),
                    };
                    if hit {
                        break;
                    }
                }
                if hit {
                    out.push(Value::Object(row.clone()));
                }
            }
            out
        }
    };
    for op in &query.ops {
        rows = match op {
            StreamOp::OrderBy { field, direction, .. } => {
                let mut sorted = rows;
                sorted.sort_by(|a, b| {
                    let ord = compare_values(
                        a.get(field.as_str()).unwrap_or(&Value::Null),
                        b.get(field.as_str()).unwrap_or(&Value::Null),
                    );
                    match direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    }
                });
                sorted
            }
            StreamOp::Filter(predicate) => {
                let mut patterns = Patterns::default();
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows {
                    if truthy(&eval(predicate, &row, &mut patterns)?) {
                        kept.push(row);
                    }
                }
                kept
            }
            StreamOp::Map(transform) => rows
                .into_iter()
                .map(|row| apply_transform(tables, transform, row))
                .collect::<Result<_, _>>()?,
            StreamOp::Slice { offset, limit } => {
                let skipped = rows.into_iter().skip(*offset as usize);
                match limit {
                    Some(limit) => skipped.take(*limit as usize).collect(),
                    None => skipped.collect(),
                }
            }
        };
    }
    Ok(rows)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_table(&self, table: &TableRef, schema: &TableSchema) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.entry(table.clone()).or_insert_with(|| MemTable {
            schema: schema.clone(),
            rows: Vec::new(),
        });
        Ok(())
    }

    async fn fetch_row(&self, query: &RowQuery) -> Result<Option<Value>, StoreError> {
        let tables = self.tables.read().await;
        let t = table(&tables, &query.table)?;
        let Some(row) = find_row(t, &query.lookup)? else {
            return Ok(None);
        };
        let mut value = Value::Object(row.clone());
        for transform in &query.transforms {
            value = apply_transform(&tables, transform, value)?;
        }
        Ok(Some(value))
    }

    async fn fetch_stream(&self, query: &StreamQuery) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read().await;
        run_stream(&tables, query)
    }

    async fn count(&self, query: &StreamQuery) -> Result<u64, StoreError> {
        let tables = self.tables.read().await;
        Ok(run_stream(&tables, query)?.len() as u64)
    }

    async fn insert(&self, table_ref: &TableRef, docs: Vec<Document>) -> Result<InsertResult, StoreError> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table_ref)
            .ok_or_else(|| StoreError::UnknownTable(table_ref.to_string()))?;
        let pk = t.schema.primary_key.clone();
        let mut result = InsertResult::default();
        for mut doc in docs {
            let key = match doc.get(&pk) {
                Some(key) if !key.is_null() => key.clone(),
                _ => {
                    let generated = Value::String(uuid::Uuid::new_v4().to_string());
                    doc.insert(pk.clone(), generated.clone());
                    result.generated_keys.push(generated.clone());
                    generated
                }
            };
            if t.rows.iter().any(|r| primary_matches(&t.schema, r, &key)) {
                result.errors += 1;
                result
                    .first_error
                    .get_or_insert_with(|| format!("Duplicate primary key `{}`: {}", pk, key_text(&key)));
                continue;
            }
            t.rows.push(doc);
            result.inserted += 1;
        }
        Ok(result)
    }

    async fn update(&self, table_ref: &TableRef, key: &Value, patch: Document) -> Result<WriteResult, StoreError> {
        let mut tables = self.tables.write().await;
        let t = tables
            .get_mut(table_ref)
            .ok_or_else(|| StoreError::UnknownTable(table_ref.to_string()))?;
        let schema = t.schema.clone();
        let mut result = WriteResult::default();
        match t.rows.iter_mut().find(|r| primary_matches(&schema, r, key)) {
            Some(row) => {
                let before = row.clone();
                row.extend(patch);
                if *row == before {
                    result.unchanged = 1;
                } else {
                    result.replaced = 1;
                }
            }
            None => result.skipped = 1,
        }
        Ok(result)
    }

    async fn delete(&self, selection: &Selection) -> Result<WriteResult, StoreError> {
        let mut tables = self.tables.write().await;
        let keys: Vec<Value> = match selection {
            Selection::Row(q) => {
                let t = table(&tables, &q.table)?;
                find_row(t, &q.lookup)?
                    .and_then(|r| r.get(&t.schema.primary_key).cloned())
                    .into_iter()
                    .collect()
            }
            Selection::Stream(q) => {
                let pk = table(&tables, &q.table)?.schema.primary_key.clone();
                run_stream(&tables, q)?
                    .into_iter()
                    .filter_map(|r| r.get(&pk).cloned())
                    .collect()
            }
        };
        let table_ref = selection.table();
        let t = tables
            .get_mut(table_ref)
            .ok_or_else(|| StoreError::UnknownTable(table_ref.to_string()))?;
        let schema = t.schema.clone();
        let before = t.rows.len();
        t.rows.retain(|r| !keys.iter().any(|k| primary_matches(&schema, r, k)));
        let mut result = WriteResult {
            deleted: (before - t.rows.len()) as u64,
            ..Default::default()
        };
        if result.deleted == 0 {
            result.skipped = 1;
        }
        Ok(result)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::plan::Transformable;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(d) => d,
            _ => panic!("not an object"),
        }
    }

    async fn seeded() -> (MemoryStore, TableRef) {
        let store = MemoryStore::new();
        let items = TableRef::new(None, "items");
        store
            .ensure_table(&items, &TableSchema::new("items").with_index("by_name", &["name"]))
            .await
            .unwrap();
        store
            .insert(
                &items,
                vec![
                    doc(json!({"id": "a", "name": "Item A", "price": 50, "tags": ["t1"]})),
                    doc(json!({"id": "b", "name": "Item B", "price": 150, "tags": ["t1", "t9"]})),
                    doc(json!({"id": "c", "name": "Item C", "price": 100, "_internal": {"v": 1}})),
                ],
            )
            .await
            .unwrap();
        let tags = TableRef::new(None, "tags");
        store.ensure_table(&tags, &TableSchema::new("tags")).await.unwrap();
        store
            .insert(&tags, vec![doc(json!({"id": "t1", "label": "red", "_internal": 1}))])
            .await
            .unwrap();
        (store, items)
    }

    #[tokio::test]
    async fn filter_sort_slice() {
        let (store, items) = seeded().await;
        let q = StreamQuery::scan(items.clone())
            .filter(Expr::field("price").ge(json!(100)))
            .order_by("price", SortDirection::Desc, false)
            .slice(0, Some(1));
        let rows = store.fetch_stream(&q).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Item B");

        let total = StreamQuery::scan(items).filter(Expr::field("name").ne("Item A"));
        assert_eq!(store.count(&total).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn index_lookup_and_get_all() {
        let (store, items) = seeded().await;
        let row = store
            .fetch_row(&RowQuery::new(
                items.clone(),
                Lookup::Index {
                    index: "by_name".into(),
                    key: json!("Item C"),
                },
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["id"], "c");

        let q = StreamQuery::get_all(items.clone(), None, vec![json!("a"), json!("c")]);
        assert_eq!(store.fetch_stream(&q).await.unwrap().len(), 2);

        let bad = RowQuery::new(items, Lookup::Index { index: "nope".into(), key: json!(1) });
        assert!(matches!(store.fetch_row(&bad).await, Err(StoreError::UnknownIndex { .. })));
    }

    #[tokio::test]
    async fn resolves_foreign_with_defaults() {
        let (store, items) = seeded().await;
        let tags = TableRef::new(None, "tags");
        let joins = vec![
            ForeignJoin {
                field: "tags".into(),
                table: tags.clone(),
                index: None,
                multi: true,
                pluck: Some(vec!["_internal".into(), "label".into()]),
            },
            ForeignJoin {
                field: "owner".into(),
                table: tags,
                index: None,
                multi: false,
                pluck: None,
            },
        ];
        let b = store
            .fetch_row(&RowQuery::new(items.clone(), Lookup::Primary(json!("b"))).transform(Transform::ResolveForeign(joins.clone())))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b["tags"], json!([{"_internal": 1, "label": "red"}, null]));
        assert_eq!(b["owner"], Value::Null);

        let c = store
            .fetch_row(&RowQuery::new(items, Lookup::Primary(json!("c"))).transform(Transform::ResolveForeign(joins)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c["tags"], json!([]));
    }

    #[tokio::test]
    async fn insert_generates_keys_and_rejects_duplicates() {
        let (store, items) = seeded().await;
        let res = store
            .insert(&items, vec![doc(json!({"name": "Item D"})), doc(json!({"id": "a"}))])
            .await
            .unwrap();
        assert_eq!(res.inserted, 1);
        assert_eq!(res.generated_keys.len(), 1);
        assert_eq!(res.errors, 1);
    }

    #[tokio::test]
    async fn update_merges_and_delete_reports() {
        let (store, items) = seeded().await;
        let res = store
            .update(&items, &json!("a"), doc(json!({"price": 75})))
            .await
            .unwrap();
        assert_eq!(res.replaced, 1);
        let row = store
            .fetch_row(&RowQuery::new(items.clone(), Lookup::Primary(json!("a"))))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row["price"], 75);
        assert_eq!(row["name"], "Item A");

        let missing = store.update(&items, &json!("zz"), Document::new()).await.unwrap();
        assert_eq!(missing.skipped, 1);

        let del = store
            .delete(&Selection::Stream(StreamQuery::get_all(items.clone(), None, vec![json!("a"), json!("b")])))
            .await
            .unwrap();
        assert_eq!(del.deleted, 2);
        let none = store
            .delete(&Selection::Row(RowQuery::new(items, Lookup::Primary(json!("a")))))
            .await
            .unwrap();
        assert_eq!(none.deleted, 0);
    }

    #[tokio::test]
    async fn matches_and_contains() {
        let (store, items) = seeded().await;
        let q = StreamQuery::scan(items.clone()).filter(Expr::field("name").matches("^Item [AB]$"));
        assert_eq!(store.count(&q).await.unwrap(), 2);
        let q = StreamQuery::scan(items).filter(Expr::field("tags").contains("t9"));
        assert_eq!(store.count(&q).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pattern_filters_reuse_one_compiled_regex() {
        let (store, items) = seeded().await;
        let q = StreamQuery::scan(items.clone()).filter(Expr::field("name").matches("^Item [AC]$"));
        let rows = store.fetch_stream(&q).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let mut patterns = Patterns::default();
        patterns.get("^a").unwrap();
        patterns.get("^a").unwrap();
        assert_eq!(patterns.0.len(), 1);

        let bad = StreamQuery::scan(items).filter(Expr::field("name").matches("("));
        assert!(matches!(store.fetch_stream(&bad).await, Err(StoreError::Pattern(_))));
    }

    #[tokio::test]
    async fn sorts_text_case_insensitively() {
        let store = MemoryStore::new();
        let fruit = TableRef::new(None, "fruit");
        store.ensure_table(&fruit, &TableSchema::new("fruit")).await.unwrap();
        let docs = ["cherry", "Banana", "apple"]
            .into_iter()
            .map(|name| doc(json!({ "name": name })))
            .collect();
        store.insert(&fruit, docs).await.unwrap();

        for (direction, expected) in [
            (SortDirection::Asc, vec!["apple", "Banana", "cherry"]),
            (SortDirection::Desc, vec!["cherry", "Banana", "apple"]),
        ] {
            let q = StreamQuery::scan(fruit.clone()).order_by("name", direction, false);
            let rows = store.fetch_stream(&q).await.unwrap();
            let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
            assert_eq!(names, expected);
        }
    }
}
