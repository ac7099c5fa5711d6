// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::error::{LoadError, Provenance, Result};

/// A resolved, typed option value. Projects declare options as bool/enum/string; the loader
/// resolves them against defaults, user config, and `-o` overrides before composition runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Bool(bool),
    /// One of a declared set of allowed string values.
    Enum(String),
    String(String),
}

#[derive(Debug, Clone)]
enum OptionDeclaration {
    Bool { default: bool },
    Enum { default: String, allowed: Vec<String> },
    String { default: String },
}

/// The project's `options` declaration table, used to validate and default incoming overrides.
#[derive(Debug, Clone, Default)]
pub struct OptionDeclarations {
    declarations: BTreeMap<String, OptionDeclaration>,
}

impl OptionDeclarations {
    pub fn parse(value: &Value, provenance: &Provenance) -> Result<OptionDeclarations> {
        let mut declarations = BTreeMap::new();
        let Value::Mapping(map) = value else {
            return Err(LoadError::InvalidData {
                provenance: provenance.clone(),
                message: "'options' must be a mapping".to_string(),
            });
        };
        for (key, decl) in map {
            let name = key.as_str().ok_or_else(|| LoadError::InvalidData {
                provenance: provenance.clone(),
                message: "option name must be a string".to_string(),
            })?;
            let Value::Mapping(decl_map) = decl else {
                return Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: format!("option '{name}' declaration must be a mapping"),
                });
            };
            let kind = decl_map
                .get(Value::String("type".to_string()))
                .and_then(Value::as_str)
                .ok_or_else(|| LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: format!("option '{name}' is missing 'type'"),
                })?;
            let declaration = match kind {
                "bool" => {
                    let default = decl_map
                        .get(Value::String("default".to_string()))
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    OptionDeclaration::Bool { default }
                }
                "enum" => {
                    let allowed: Vec<String> = decl_map
                        .get(Value::String("values".to_string()))
                        .and_then(Value::as_sequence)
                        .map(|seq| {
                            seq.iter()
                                .filter_map(Value::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    let default = decl_map
                        .get(Value::String("default".to_string()))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    if !allowed.is_empty() && !allowed.contains(&default) {
                        return Err(LoadError::InvalidData {
                            provenance: provenance.clone(),
                            message: format!(
                                "option '{name}' default '{default}' is not one of {allowed:?}"
                            ),
                        });
                    }
                    OptionDeclaration::Enum { default, allowed }
                }
                "str" => {
                    let default = decl_map
                        .get(Value::String("default".to_string()))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    OptionDeclaration::String { default }
                }
                other => {
                    return Err(LoadError::InvalidData {
                        provenance: provenance.clone(),
                        message: format!("option '{name}' has unknown type '{other}'"),
                    })
                }
            };
            declarations.insert(name.to_string(), declaration);
        }
        Ok(OptionDeclarations { declarations })
    }

    /// Merges project defaults, then `user_config` overrides, then CLI `-o` overrides, in that
    /// priority order, validating each override's type and (for enums) allowed values.
    pub fn resolve(
        &self,
        user_config: &BTreeMap<String, String>,
        cli_overrides: &BTreeMap<String, String>,
        provenance: &Provenance,
    ) -> Result<BTreeMap<String, OptionValue>> {
        let mut resolved = BTreeMap::new();
        for (name, decl) in &self.declarations {
            let mut raw = match decl {
                OptionDeclaration::Bool { default } => default.to_string(),
                OptionDeclaration::Enum { default, .. } => default.clone(),
                OptionDeclaration::String { default } => default.clone(),
            };
            if let Some(value) = user_config.get(name) {
                raw = value.clone();
            }
            if let Some(value) = cli_overrides.get(name) {
                raw = value.clone();
            }
            let value = match decl {
                OptionDeclaration::Bool { .. } => {
                    let parsed = parse_bool(&raw).ok_or_else(|| LoadError::InvalidData {
                        provenance: provenance.clone(),
                        message: format!("option '{name}' value '{raw}' is not a boolean"),
                    })?;
                    OptionValue::Bool(parsed)
                }
                OptionDeclaration::Enum { allowed, .. } => {
                    if !allowed.is_empty() && !allowed.contains(&raw) {
                        return Err(LoadError::InvalidData {
                            provenance: provenance.clone(),
                            message: format!(
                                "option '{name}' value '{raw}' is not one of {allowed:?}"
                            ),
                        });
                    }
                    OptionValue::Enum(raw)
                }
                OptionDeclaration::String { .. } => OptionValue::String(raw),
            };
            resolved.insert(name.clone(), value);
        }
        for name in user_config.keys().chain(cli_overrides.keys()) {
            if !resolved.contains_key(name) {
                return Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: format!("undeclared option '{name}' in override"),
                });
            }
        }
        Ok(resolved)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" | "True" | "1" => Some(true),
        "false" | "False" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prov() -> Provenance {
        Provenance::new("project.conf")
    }

    #[test]
    fn defaults_apply_when_no_override_given() {
        let value: Value = serde_yaml::from_str("debug:\n  type: bool\n  default: false").unwrap();
        let decls = OptionDeclarations::parse(&value, &prov()).unwrap();
        let resolved = decls
            .resolve(&BTreeMap::new(), &BTreeMap::new(), &prov())
            .unwrap();
        assert_eq!(resolved.get("debug"), Some(&OptionValue::Bool(false)));
    }

    #[test]
    fn cli_override_wins_over_user_config() {
        let value: Value = serde_yaml::from_str("debug:\n  type: bool\n  default: false").unwrap();
        let decls = OptionDeclarations::parse(&value, &prov()).unwrap();
        let mut user_config = BTreeMap::new();
        user_config.insert("debug".to_string(), "false".to_string());
        let mut cli = BTreeMap::new();
        cli.insert("debug".to_string(), "true".to_string());
        let resolved = decls.resolve(&user_config, &cli, &prov()).unwrap();
        assert_eq!(resolved.get("debug"), Some(&OptionValue::Bool(true)));
    }

    #[test]
    fn enum_value_must_be_allowed() {
        let value: Value =
            serde_yaml::from_str("arch:\n  type: enum\n  values: [x86_64, aarch64]\n  default: x86_64")
                .unwrap();
        let decls = OptionDeclarations::parse(&value, &prov()).unwrap();
        let mut cli = BTreeMap::new();
        cli.insert("arch".to_string(), "riscv".to_string());
        assert!(decls.resolve(&BTreeMap::new(), &cli, &prov()).is_err());
    }

    #[test]
    fn undeclared_override_is_an_error() {
        let value: Value = serde_yaml::from_str("debug:\n  type: bool\n  default: false").unwrap();
        let decls = OptionDeclarations::parse(&value, &prov()).unwrap();
        let mut cli = BTreeMap::new();
        cli.insert("unknown".to_string(), "true".to_string());
        assert!(decls.resolve(&BTreeMap::new(), &cli, &prov()).is_err());
    }
}
