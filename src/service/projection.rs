//! Mapping between stored rows and client-facing objects through the readable/writable partitions.

use crate::descriptor::{ReadView, ResourceDescriptor, WriteView};
use crate::error::AppError;
use crate::store::{Document, INTERNAL_FIELD};
use serde_json::Value;

/// Projects a stored row onto the readable fields. Props are copied first, then getters
/// run against the props collected so far. With `list_mode`, only fields listable in that mode appear.
pub async fn read_properties(
    descriptor: &ResourceDescriptor,
    row: &Document,
    list_mode: Option<&str>,
) -> Result<Document, AppError> {
    let included = |name: &str| match (list_mode, descriptor.field(name)) {
        (None, Some(_)) => true,
        (Some(mode), Some(field)) => field.is_listable_in(mode),
        (_, None) => false,
    };

    let mut props = Document::new();
    for name in &descriptor.readable().props {
        if !included(name.as_str()) {
            continue;
        }
        let Some(field) = descriptor.field(name) else {
            continue;
        };
        if let Some(value) = row.get(field.column(name)) {
            props.insert(name.clone(), value.clone());
        }
    }

    let mut out = props.clone();
    let view = ReadView {
        props,
        row: row.clone(),
    };
    for name in &descriptor.readable().getters {
        if !included(name.as_str()) {
            continue;
        }
        let Some(get) = descriptor.field(name).and_then(|f| f.accessor.as_ref()).and_then(|a| a.get.as_ref())
        else {
            continue;
        };
        out.insert(name.clone(), get(&view).await?);
    }
    Ok(out)
}

/// Builds the record to store from client input. `previous` is the stored row on edit;
/// on create the declared defaults seed the record instead.
pub fn write_properties(
    descriptor: &ResourceDescriptor,
    input: &Document,
    previous: Option<Document>,
) -> Result<Document, AppError> {
    let creating = previous.is_none();
    let mut record = previous.unwrap_or_default();
    if creating {
        for (name, field) in descriptor.fields() {
            if let Some(default) = &field.default {
                record.insert(field.column(name).to_string(), default.clone());
            }
        }
    }

    for name in &descriptor.writable().props {
        let (Some(field), Some(value)) = (descriptor.field(name), input.get(name)) else {
            continue;
        };
        record.insert(field.column(name).to_string(), value.clone());
    }

    for name in &descriptor.writable().setters {
        let Some(value) = input.get(name) else {
            continue;
        };
        let Some(set) = descriptor.field(name).and_then(|f| f.accessor.as_ref()).and_then(|a| a.set.as_ref())
        else {
            continue;
        };
        let mut view = WriteView {
            record: &mut record,
            input,
        };
        set(&mut view, value.clone())?;
    }
    Ok(record)
}

/// Drops `_internal` from a projected object and from the rows inlined in its foreign fields.
pub fn clear_internal(descriptor: &ResourceDescriptor, obj: &mut Document) {
    obj.remove(INTERNAL_FIELD);
    for (name, field) in descriptor.fields() {
        if field.foreign.is_none() {
            continue;
        }
        match obj.get_mut(name) {
            Some(Value::Object(inner)) => {
                inner.remove(INTERNAL_FIELD);
            }
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    if let Value::Object(inner) = item {
                        inner.remove(INTERNAL_FIELD);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AccessMode, Accessor, ForeignRef, Listable};
    use serde_json::json;

    fn doc(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    fn users() -> ResourceDescriptor {
        let mut d = ResourceDescriptor::new("users");
        d.set_mode("name", AccessMode::ReadWrite)
            .set_db_name("name", "full_name")
            .set_listable("name", Listable::Flag(true), "list")
            .set_mode("password", AccessMode::WriteOnly)
            .set_mode("role", AccessMode::ReadOnly)
            .set_default("role", json!("member"))
            .set_mode("secret", AccessMode::ReadWrite)
            .set_mode("initials", AccessMode::ReadWrite)
            .set_descriptor(
                "initials",
                Some(
                    Accessor::getter(|view| {
                        let name = view.props.get("name").and_then(Value::as_str).unwrap_or("");
                        Ok(json!(name.split(' ').filter_map(|w| w.chars().next()).collect::<String>()))
                    })
                    .with_setter(|view, value| {
                        view.record.insert("initials_raw".into(), value);
                        Ok(())
                    }),
                ),
            )
            .set_listable("initials", Listable::Columns(vec!["full_name".into()]), "list");
        d
    }

    #[tokio::test]
    async fn read_uses_db_names_and_getters() {
        let d = users();
        let row = doc(json!({"id": "1", "full_name": "Ada Lovelace", "password": "x", "role": "admin"}));
        let out = read_properties(&d, &row, None).await.unwrap();
        assert_eq!(out, doc(json!({"name": "Ada Lovelace", "role": "admin", "initials": "AL"})));

        let listed = read_properties(&d, &row, Some("list")).await.unwrap();
        assert_eq!(listed, doc(json!({"name": "Ada Lovelace", "initials": "AL"})));
    }

    #[test]
    fn write_seeds_defaults_and_skips_read_only() {
        let d = users();
        let input = doc(json!({"name": "Ada", "password": "pw", "role": "admin", "initials": "A", "extra": 1}));
        let record = write_properties(&d, &input, None).unwrap();
        assert_eq!(
            record,
            doc(json!({"role": "member", "full_name": "Ada", "password": "pw", "initials_raw": "A"}))
        );
    }

    #[test]
    fn write_merges_into_previous_row() {
        let d = users();
        let previous = doc(json!({"id": "1", "full_name": "Ada", "role": "admin", "secret": "s"}));
        let record = write_properties(&d, &doc(json!({"secret": null})), Some(previous)).unwrap();
        assert_eq!(record, doc(json!({"id": "1", "full_name": "Ada", "role": "admin", "secret": null})));
    }

    #[test]
    fn internal_is_stripped_from_foreign_objects() {
        let mut d = users();
        d.set_mode("team", AccessMode::ReadOnly)
            .set_foreign("team", ForeignRef::new("teams"))
            .set_mode("tags", AccessMode::ReadOnly)
            .set_foreign("tags", ForeignRef::new("tags").multi());
        let mut obj = doc(json!({
            "_internal": 1,
            "team": {"id": "t", "_internal": 2},
            "tags": [{"id": "a", "_internal": 3}, null]
        }));
        clear_internal(&d, &mut obj);
        assert_eq!(obj, doc(json!({"team": {"id": "t"}, "tags": [{"id": "a"}, null]})));
    }
}
