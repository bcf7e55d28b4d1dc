//! Config validation: referential integrity of resources, inheritance and foreign tables.

use crate::config::{FullConfig, ResourceConfig};
use crate::error::ConfigError;
use std::collections::{HashMap, HashSet};

/// Walks `extends` from `name` up to the root. Errors on unknown parents and cycles.
pub fn ancestry<'a>(
    by_name: &HashMap<&'a str, &'a ResourceConfig>,
    name: &'a str,
) -> Result<Vec<&'a ResourceConfig>, ConfigError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = name;
    loop {
        if !seen.insert(current) {
            return Err(ConfigError::Validation(format!("inheritance cycle through '{}'", current)));
        }
        let resource = by_name.get(current).ok_or_else(|| ConfigError::MissingReference {
            kind: "resource",
            id: current.to_string(),
        })?;
        chain.push(*resource);
        match resource.extends.as_deref() {
            Some(parent) => current = parent,
            None => return Ok(chain),
        }
    }
}

pub fn validate(config: &FullConfig) -> Result<(), ConfigError> {
    let mut by_name: HashMap<&str, &ResourceConfig> = HashMap::new();
    for r in &config.resources {
        if r.name.is_empty() {
            return Err(ConfigError::Validation("resource name must not be empty".into()));
        }
        if by_name.insert(r.name.as_str(), r).is_some() {
            return Err(ConfigError::Validation(format!("duplicate resource '{}'", r.name)));
        }
    }

    let table_names: HashSet<&str> = config
        .resources
        .iter()
        .filter_map(|r| r.table.as_ref().map(|t| t.name.as_str()))
        .collect();

    for r in &config.resources {
        let chain = ancestry(&by_name, &r.name)?;
        if !chain.iter().any(|c| c.table.is_some()) {
            return Err(ConfigError::MissingTable(r.name.clone()));
        }
        if let Some(table) = &r.table {
            for index in &table.indexes {
                if index.columns.is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "index '{}' on table '{}' has no columns",
                        index.name, table.name
                    )));
                }
            }
        }

        let mut field_names = HashSet::new();
        for f in &r.fields {
            if !field_names.insert(f.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate field '{}' in resource '{}'",
                    f.name, r.name
                )));
            }
            if let Some(foreign) = &f.foreign {
                if !table_names.contains(foreign.table.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "table",
                        id: foreign.table.clone(),
                    });
                }
            }
            if let Some(ops) = &f.mandatory {
                for op in ops {
                    if op != "new" && op != "edit" {
                        return Err(ConfigError::Validation(format!(
                            "field '{}.{}': mandatory operation must be 'new' or 'edit', got '{}'",
                            r.name, f.name, op
                        )));
                    }
                }
            }
        }

        for property in r.modifier_keys.values() {
            if !chain.iter().any(|c| c.properties.contains_key(property)) {
                return Err(ConfigError::MissingReference {
                    kind: "property",
                    id: format!("{}.{}", r.name, property),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(v: serde_json::Value) -> FullConfig {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn accepts_inherited_table() {
        let c = config(json!({"resources": [
            {"name": "base", "table": {"name": "items"}},
            {"name": "archived", "extends": "base"}
        ]}));
        validate(&c).unwrap();
    }

    #[test]
    fn rejects_bad_references() {
        let cycle = config(json!({"resources": [
            {"name": "a", "extends": "b", "table": {"name": "t"}},
            {"name": "b", "extends": "a"}
        ]}));
        assert!(matches!(validate(&cycle), Err(ConfigError::Validation(m)) if m.contains("cycle")));

        let no_table = config(json!({"resources": [{"name": "a"}]}));
        assert!(matches!(validate(&no_table), Err(ConfigError::MissingTable(_))));

        let foreign = config(json!({"resources": [
            {"name": "a", "table": {"name": "t"}, "fields": [{"name": "b", "foreign": {"table": "nope"}}]}
        ]}));
        assert!(matches!(
            validate(&foreign),
            Err(ConfigError::MissingReference { kind: "table", .. })
        ));

        let dup = config(json!({"resources": [
            {"name": "a", "table": {"name": "t"}},
            {"name": "a", "table": {"name": "u"}}
        ]}));
        assert!(validate(&dup).is_err());

        let missing_key = config(json!({"resources": [
            {"name": "a", "table": {"name": "t"}, "modifier_keys": {"encrypt": "crypt"}}
        ]}));
        assert!(validate(&missing_key).is_err());
    }
}
