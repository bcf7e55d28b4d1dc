//! Derived views of a descriptor's fields. Always rebuilt in full, never patched.

use super::field::FieldDescriptor;
use std::collections::BTreeMap;

/// Field names split by how they are read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Readable {
    pub getters: Vec<String>,
    pub props: Vec<String>,
}

/// Field names split by how they are written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Writable {
    pub setters: Vec<String>,
    pub props: Vec<String>,
}

/// Fields without an access mode land in neither partition.
pub fn partition(fields: &[(String, FieldDescriptor)]) -> (Readable, Writable) {
    let mut readable = Readable::default();
    let mut writable = Writable::default();
    for (name, field) in fields {
        let Some(mode) = field.access else {
            continue;
        };
        if mode.can_read() {
            if field.has_getter() {
                readable.getters.push(name.clone());
            } else {
                readable.props.push(name.clone());
            }
        }
        if mode.can_write() {
            if field.has_setter() {
                writable.setters.push(name.clone());
            } else {
                writable.props.push(name.clone());
            }
        }
    }
    (readable, writable)
}

/// Rebuilds every list mode's column set. Modes already known stay present even when they end up empty.
pub fn pluck_sets(
    fields: &[(String, FieldDescriptor)],
    previous: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<String>> {
    let mut sets: BTreeMap<String, Vec<String>> =
        previous.keys().map(|mode| (mode.clone(), Vec::new())).collect();
    for (name, field) in fields {
        let Some(modes) = &field.listable else {
            continue;
        };
        for (mode, listable) in modes {
            let set = sets.entry(mode.clone()).or_default();
            for column in listable.columns(field.column(name)) {
                if !set.contains(&column) {
                    set.push(column);
                }
            }
        }
    }
    sets
}
