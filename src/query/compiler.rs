//! Compiles typed request parameters against a descriptor into store plans.

use crate::descriptor::{FilterInput, ResourceDescriptor};
use crate::error::{AppError, ConfigError};
use crate::params::{ListParameters, RequestContext};
use crate::query::expr::{coerce_literal, Comparison, Expr};
use crate::query::plan::{
    ForeignJoin, Lookup, RowQuery, Selection, StreamQuery, TableRef, Transform, Transformable,
};
use crate::store::INTERNAL_FIELD;
use serde_json::Value;

pub const DEFAULT_LIST_MODE: &str = "list";

/// Page query plus the unpaginated count query over the same filtered stream.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledList {
    pub page: StreamQuery,
    pub total: StreamQuery,
    pub offset: u64,
    pub limit: Option<u64>,
    /// Active list mode, `None` when plucking is suppressed.
    pub mode: Option<String>,
}

/// Primary-key lookup, or the first row of a secondary index.
pub fn lookup(table: TableRef, id: &str, index: Option<&str>) -> RowQuery {
    let key = Value::String(id.to_string());
    let lookup = match index {
        Some(index) => Lookup::Index {
            index: index.to_string(),
            key,
        },
        None => Lookup::Primary(key),
    };
    RowQuery::new(table, lookup)
}

/// Replaces every foreign field with its referenced row(s). With `pluck`, only fields in that set are resolved.
pub fn attach_foreign<Q: Transformable>(query: Q, descriptor: &ResourceDescriptor, pluck: Option<&[String]>) -> Q {
    let joins: Vec<ForeignJoin> = descriptor
        .fields()
        .filter_map(|(name, field)| {
            let foreign = field.foreign.as_ref()?;
            let column = field.column(name);
            if let Some(set) = pluck {
                if !set.iter().any(|c| c == column || c == name) {
                    return None;
                }
            }
            let schema = foreign.table_type.as_deref().or(descriptor.schema_name());
            Some(ForeignJoin {
                field: column.to_string(),
                table: TableRef::new(schema, &foreign.table),
                index: foreign.index.clone(),
                multi: foreign.multi,
                pluck: foreign.pluck.as_ref().map(|cols| with_internal(cols)),
            })
        })
        .collect();
    if joins.is_empty() {
        query
    } else {
        query.transform(Transform::ResolveForeign(joins))
    }
}

fn with_internal(columns: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(columns.len() + 1);
    out.push(INTERNAL_FIELD.to_string());
    out.extend(columns.iter().filter(|c| *c != INTERNAL_FIELD).cloned());
    out
}

/// Sort, filter, resolve, paginate and pluck a list request.
pub fn compile_list(
    ctx: &RequestContext,
    descriptor: &ResourceDescriptor,
    table: TableRef,
    params: &ListParameters,
) -> Result<CompiledList, AppError> {
    let mode = params.pluck_mode.as_deref().unwrap_or(DEFAULT_LIST_MODE);
    let pluck = if params.no_pluck {
        None
    } else {
        Some(
            descriptor
                .pluck(mode)
                .ok_or_else(|| ConfigError::UndeclaredPluckMode(mode.to_string()))?,
        )
    };

    let sort = match &params.sort_key {
        Some(key) => {
            let field = descriptor
                .field(key)
                .filter(|f| f.sortable.is_some())
                .ok_or_else(|| AppError::Validation("Field is not sortable.".into()))?;
            let indexed = field.sortable.is_some_and(|s| s.indexed);
            Some((field.column(key).to_string(), indexed))
        }
        None => None,
    };
    let direction = params.sort_direction.unwrap_or_default();

    let mut predicates = Vec::with_capacity(params.filters.len());
    let mut index_source = None;
    for (i, requested) in params.filters.iter().enumerate() {
        let Some(def) = descriptor.filter(&requested.name) else {
            continue;
        };
        let column = descriptor
            .field(&requested.name)
            .map(|f| f.column(&requested.name).to_string())
            .unwrap_or_else(|| requested.name.clone());
        let input = FilterInput {
            ctx,
            key: &requested.name,
            value: &requested.value,
            mode: requested.mode,
            field: Expr::field(column),
            row: Expr::Row,
        };
        if i == 0 && def.is_default() && requested.mode == Comparison::Eq {
            if let Some(index) = &def.index {
                index_source = Some((index.clone(), coerce_literal(&requested.value)));
            }
        }
        predicates.push(def.build(&input)?);
    }

    let indexed_sort = sort.as_ref().is_some_and(|(_, indexed)| *indexed);
    let mut stream = match index_source {
        Some((index, key)) if !indexed_sort => StreamQuery::get_all(table, Some(index), vec![key]),
        _ => StreamQuery::scan(table),
    };
    if let Some((column, true)) = &sort {
        stream = stream.order_by(column.clone(), direction, true);
    }
    for predicate in predicates {
        stream = stream.filter(predicate);
    }
    if let Some((column, false)) = &sort {
        stream = stream.order_by(column.clone(), direction, false);
    }

    let total = stream.clone();

    if !params.no_foreign {
        stream = attach_foreign(stream, descriptor, pluck);
    }
    let limit = params.effective_limit();
    stream = stream.slice(params.offset, limit);
    if let Some(columns) = pluck {
        stream = stream.pluck(with_internal(columns));
    }

    tracing::debug!(resource = %descriptor.name(), plan = ?stream, "compiled list");

    Ok(CompiledList {
        page: stream,
        total,
        offset: params.offset,
        limit,
        mode: pluck.map(|_| mode.to_string()),
    })
}

/// A single id deletes one row; several ids delete all of them.
pub fn delete_selection(table: TableRef, ids: &[String]) -> Selection {
    match ids {
        [single] => Selection::Row(RowQuery::new(table, Lookup::Primary(Value::String(single.clone())))),
        many => Selection::Stream(StreamQuery::get_all(
            table,
            None,
            many.iter().cloned().map(Value::String).collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AccessMode, ForeignRef, Listable};
    use crate::params::FilterValue;
    use crate::query::plan::{SortDirection, StreamOp, StreamSource};
    use crate::store::TableSchema;
    use std::sync::Arc;

    fn orders() -> ResourceDescriptor {
        let mut d = ResourceDescriptor::new("orders");
        d.bind_table(None, TableSchema::new("orders").with_index("by_customer", &["customer"]))
            .set_mode("name", AccessMode::ReadWrite)
            .set_listable("name", Listable::Flag(true), "list")
            .set_mode("customer", AccessMode::ReadWrite)
            .set_listable("customer", Listable::Flag(true), "list")
            .set_foreign("customer", ForeignRef::new("customers").pluck(["name"]))
            .set_mode("tags", AccessMode::ReadWrite)
            .set_foreign("tags", ForeignRef::new("tags").multi())
            .set_filter("customer", None, true)
            .set_filter("name", None, false)
            .set_sortable("name", true, false)
            .set_sortable("price", true, true);
        d
    }

    fn table() -> TableRef {
        TableRef::new(None, "orders")
    }

    fn filter(name: &str, mode: Comparison, value: &str) -> FilterValue {
        FilterValue {
            name: name.into(),
            value: value.into(),
            mode,
        }
    }

    #[test]
    fn lookup_by_index_or_primary() {
        let q = lookup(table(), "abc", Some("by_customer"));
        assert!(matches!(q.lookup, Lookup::Index { ref index, .. } if index == "by_customer"));
        assert!(matches!(lookup(table(), "abc", None).lookup, Lookup::Primary(_)));
    }

    #[test]
    fn foreign_respects_pluck_set() {
        let d = orders();
        let all = attach_foreign(RowQuery::new(table(), Lookup::Primary("a".into())), &d, None);
        match &all.transforms[0] {
            Transform::ResolveForeign(joins) => {
                assert_eq!(joins.len(), 2);
                assert_eq!(joins[0].pluck.as_deref(), Some(&["_internal".to_string(), "name".to_string()][..]));
                assert!(joins[1].multi);
            }
            other => panic!("unexpected {:?}", other),
        }

        let only_customer = attach_foreign(StreamQuery::scan(table()), &d, Some(&["customer".to_string()]));
        match &only_customer.ops[0] {
            StreamOp::Map(Transform::ResolveForeign(joins)) => assert_eq!(joins.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn indexed_sort_precedes_filters() {
        let d = orders();
        let params = ListParameters {
            sort_key: Some("name".into()),
            filters: vec![filter("name", Comparison::Ne, "x")],
            no_foreign: true,
            ..Default::default()
        };
        let c = compile_list(&RequestContext::default(), &d, table(), &params).unwrap();
        assert!(matches!(c.page.ops[0], StreamOp::OrderBy { use_index: true, .. }));
        assert!(matches!(c.page.ops[1], StreamOp::Filter(_)));
    }

    #[test]
    fn unindexed_sort_follows_filters() {
        let d = orders();
        let params = ListParameters {
            sort_key: Some("price".into()),
            sort_direction: Some(SortDirection::Desc),
            filters: vec![filter("name", Comparison::Eq, "x")],
            no_foreign: true,
            ..Default::default()
        };
        let c = compile_list(&RequestContext::default(), &d, table(), &params).unwrap();
        assert!(matches!(c.total.ops[0], StreamOp::Filter(_)));
        assert!(matches!(
            c.total.ops[1],
            StreamOp::OrderBy { use_index: false, direction: SortDirection::Desc, .. }
        ));
        assert!(!c.total.ops.iter().any(|op| matches!(op, StreamOp::Slice { .. })));
    }

    #[test]
    fn first_indexable_eq_filter_uses_index() {
        let d = orders();
        let params = ListParameters {
            filters: vec![filter("customer", Comparison::Eq, "c1")],
            ..Default::default()
        };
        let c = compile_list(&RequestContext::default(), &d, table(), &params).unwrap();
        assert_eq!(
            c.page.source,
            StreamSource::GetAll {
                index: Some("by_customer".into()),
                keys: vec![Value::from("c1")]
            }
        );
        assert!(matches!(c.page.ops[0], StreamOp::Filter(_)));

        let ne = ListParameters {
            filters: vec![filter("customer", Comparison::Ne, "c1")],
            ..Default::default()
        };
        let c = compile_list(&RequestContext::default(), &d, table(), &ne).unwrap();
        assert_eq!(c.page.source, StreamSource::Scan);
    }

    #[test]
    fn pagination_and_pluck_close_the_plan() {
        let d = orders();
        let params = ListParameters {
            offset: 2,
            limit: Some(5),
            ..Default::default()
        };
        let c = compile_list(&RequestContext::default(), &d, table(), &params).unwrap();
        let n = c.page.ops.len();
        assert_eq!(c.page.ops[n - 2], StreamOp::Slice { offset: 2, limit: Some(5) });
        assert_eq!(
            c.page.ops[n - 1],
            StreamOp::Map(Transform::Pluck(vec!["_internal".into(), "name".into(), "customer".into()]))
        );
        assert_eq!(c.mode.as_deref(), Some("list"));
    }

    #[test]
    fn undeclared_mode_is_config_error() {
        let d = orders();
        let params = ListParameters {
            pluck_mode: Some("detailed".into()),
            ..Default::default()
        };
        let err = compile_list(&RequestContext::default(), &d, table(), &params).unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::UndeclaredPluckMode(_))));
        let suppressed = ListParameters {
            pluck_mode: Some("detailed".into()),
            no_pluck: true,
            ..Default::default()
        };
        assert!(compile_list(&RequestContext::default(), &d, table(), &suppressed).is_ok());
    }

    #[test]
    fn custom_filter_receives_request() {
        let mut d = orders();
        d.set_filter(
            "search",
            Some(Arc::new(|input: &FilterInput<'_>| {
                let prefix = input.ctx.get("prefix").unwrap_or("");
                Ok(Expr::field("name").matches(format!("^{}{}", prefix, input.value)))
            })),
            false,
        );
        let params = ListParameters {
            filters: vec![filter("search", Comparison::Eq, "It")],
            no_foreign: true,
            no_pluck: true,
            ..Default::default()
        };
        let ctx = RequestContext::from_pairs([("prefix", "")]);
        let c = compile_list(&ctx, &d, table(), &params).unwrap();
        assert_eq!(c.page.ops[0], StreamOp::Filter(Expr::field("name").matches("^It")));
    }

    #[test]
    fn delete_single_or_many() {
        assert!(matches!(delete_selection(table(), &["a".into()]), Selection::Row(_)));
        match delete_selection(table(), &["a".into(), "b".into()]) {
            Selection::Stream(q) => assert!(matches!(q.source, StreamSource::GetAll { index: None, ref keys } if keys.len() == 2)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
