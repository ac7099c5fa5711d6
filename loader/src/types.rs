// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use serde_yaml::Value;

use crate::error::{LoadError, Provenance, Result};

pub mod symbol {
    pub const FILENAME: &str = "filename";
    pub const TYPE: &str = "type";
    pub const JUNCTION: &str = "junction";
    pub const STRICT: &str = "strict";
    pub const BUILD: &str = "build";
    pub const RUNTIME: &str = "runtime";
    pub const ALL: &str = "all";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyType {
    Build,
    Runtime,
    /// Both build and runtime; only valid before a list is split into the two queues.
    All,
}

/// One entry of an element's `depends`/`build-depends`/`runtime-depends` list, parsed per the
/// string-shorthand-or-mapping rules.
#[derive(Debug, Clone)]
pub struct Dependency {
    pub name: String,
    pub dep_type: DependencyType,
    pub junction: Option<String>,
    pub strict: bool,
    pub provenance: Provenance,
}

impl Dependency {
    /// `default_dep_type` is `Some` when parsing `build-depends`/`runtime-depends` (where a
    /// mapping entry may not specify `type`); `None` when parsing the untyped `depends` list
    /// (where `type` is read from the mapping, defaulting to `all`).
    pub fn parse(
        value: &Value,
        provenance: Provenance,
        default_dep_type: Option<DependencyType>,
    ) -> Result<Dependency> {
        let (name, dep_type, junction, strict) = match value {
            Value::String(s) => (
                s.clone(),
                default_dep_type.unwrap_or(DependencyType::All),
                None,
                false,
            ),
            Value::Mapping(map) => {
                let allowed: &[&str] = if default_dep_type.is_some() {
                    &["filename", "junction", "strict"]
                } else {
                    &["filename", "type", "junction", "strict"]
                };
                validate_keys(map, allowed, &provenance)?;

                let dep_type = if let Some(default) = default_dep_type {
                    default
                } else {
                    match get_str(map, symbol::TYPE) {
                        None => DependencyType::All,
                        Some(t) if t == symbol::ALL => DependencyType::All,
                        Some(t) if t == symbol::BUILD => DependencyType::Build,
                        Some(t) if t == symbol::RUNTIME => DependencyType::Runtime,
                        Some(other) => {
                            return Err(LoadError::InvalidData {
                                provenance,
                                message: format!(
                                    "dependency type '{other}' is not 'build', 'runtime' or 'all'"
                                ),
                            })
                        }
                    }
                };

                let name = get_str(map, symbol::FILENAME).ok_or_else(|| LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "dependency mapping is missing 'filename'".to_string(),
                })?;
                let junction = get_str(map, symbol::JUNCTION);
                let strict = get_bool(map, symbol::STRICT).unwrap_or(false);

                // Explicitly setting strict: false is rejected so a future project-wide default
                // of strict dependencies is free to treat its absence differently from an
                // explicit override.
                if !strict && map.contains_key(Value::String(symbol::STRICT.to_string())) {
                    return Err(LoadError::InvalidData {
                        provenance,
                        message: "setting 'strict' to false is unsupported".to_string(),
                    });
                }

                (name.to_string(), dep_type, junction, strict)
            }
            _ => {
                return Err(LoadError::InvalidData {
                    provenance,
                    message: "dependency is not specified as a string or a mapping".to_string(),
                })
            }
        };

        if strict && dep_type == DependencyType::Runtime {
            return Err(LoadError::InvalidData {
                provenance,
                message: format!("runtime dependency {name} specified as `strict`; only build-time dependencies may be strict"),
            });
        }

        if junction.is_some() && name.contains(':') {
            return Err(LoadError::InvalidData {
                provenance,
                message: format!(
                    "dependency {name} contains `:` in its name, which is not allowed when `junction` is specified explicitly"
                ),
            });
        }

        if name.matches(':').count() > 1 {
            return Err(LoadError::InvalidData {
                provenance,
                message: format!(
                    "dependency {name} contains multiple `:`; recursive cross-junction lookups are not allowed"
                ),
            });
        }

        // Split `junction:name` when no junction was given explicitly.
        let (junction, name) = match junction {
            Some(j) => (Some(j), name),
            None => match name.split_once(':') {
                Some((j, n)) => (Some(j.to_string()), n.to_string()),
                None => (None, name),
            },
        };

        Ok(Dependency {
            name,
            dep_type,
            junction,
            strict,
            provenance,
        })
    }
}

fn get_str(map: &serde_yaml::Mapping, key: &str) -> Option<String> {
    map.get(Value::String(key.to_string()))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn get_bool(map: &serde_yaml::Mapping, key: &str) -> Option<bool> {
    map.get(Value::String(key.to_string()))
        .and_then(Value::as_bool)
}

fn validate_keys(map: &serde_yaml::Mapping, allowed: &[&str], provenance: &Provenance) -> Result<()> {
    for key in map.keys() {
        let Some(key) = key.as_str() else { continue };
        if !allowed.contains(&key) {
            return Err(LoadError::InvalidData {
                provenance: provenance.clone(),
                message: format!("unknown key '{key}' in dependency declaration"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prov() -> Provenance {
        Provenance::new("test.bst")
    }

    #[test]
    fn parses_string_shorthand() {
        let value: Value = serde_yaml::from_str("foo.bst").unwrap();
        let dep = Dependency::parse(&value, prov(), None).unwrap();
        assert_eq!(dep.name, "foo.bst");
        assert_eq!(dep.dep_type, DependencyType::All);
        assert!(dep.junction.is_none());
    }

    #[test]
    fn splits_junction_colon_name() {
        let value: Value = serde_yaml::from_str("sub:foo.bst").unwrap();
        let dep = Dependency::parse(&value, prov(), None).unwrap();
        assert_eq!(dep.junction.as_deref(), Some("sub"));
        assert_eq!(dep.name, "foo.bst");
    }

    #[test]
    fn rejects_multiple_colons() {
        let value: Value = serde_yaml::from_str("a:b:c.bst").unwrap();
        assert!(Dependency::parse(&value, prov(), None).is_err());
    }

    #[test]
    fn rejects_strict_runtime_dependency() {
        let value: Value = serde_yaml::from_str("filename: foo.bst\ntype: runtime\nstrict: true").unwrap();
        assert!(Dependency::parse(&value, prov(), None).is_err());
    }

    #[test]
    fn rejects_explicit_strict_false() {
        let value: Value = serde_yaml::from_str("filename: foo.bst\nstrict: false").unwrap();
        assert!(Dependency::parse(&value, prov(), None).is_err());
    }

    #[test]
    fn mapping_with_default_dep_type_disallows_type_key() {
        let value: Value = serde_yaml::from_str("filename: foo.bst\ntype: build").unwrap();
        assert!(Dependency::parse(&value, prov(), Some(DependencyType::Build)).is_err());
    }
}
