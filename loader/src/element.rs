// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::error::{LoadError, Provenance, Result};
use crate::types::Dependency;
use crate::variables::Variables;

const ALLOWED_ELEMENT_KEYS: &[&str] = &[
    "kind",
    "sources",
    "depends",
    "build-depends",
    "runtime-depends",
    "variables",
    "environment",
    "environment-nocache",
    "config",
    "public",
    "sandbox",
    "description",
];

/// Observed state of a single declared source, per the Source contract's `get_consistency()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceConsistency {
    /// No ref has been resolved yet; `track()` must run before this source can be fetched.
    Inconsistent,
    /// A ref is known but the content is not necessarily present locally yet.
    Resolved,
    /// The content for the current ref is present in the local mirror.
    Cached,
}

#[derive(Debug, Clone)]
pub struct SourceDeclaration {
    pub kind: String,
    pub config: Value,
    pub consistency: SourceConsistency,
}

/// A single loaded element, with its YAML composition fully resolved but its cache keys not
/// necessarily computed yet (that happens in topological order once sources are consistent).
#[derive(Debug, Clone)]
pub struct Element {
    pub name: String,
    pub kind: String,
    pub sources: Vec<SourceDeclaration>,
    pub dependencies: Vec<Dependency>,
    pub variables: Variables,
    pub environment: BTreeMap<String, String>,
    pub environment_nocache: Vec<String>,
    pub config: Value,
    pub public: Value,
    pub sandbox: Value,
    pub provenance: Provenance,
    pub strong_key: Option<String>,
    pub weak_key: Option<String>,
}

impl Element {
    pub fn parse(
        name: &str,
        value: &Value,
        provenance: Provenance,
        base_variables: &Variables,
    ) -> Result<Element> {
        let Value::Mapping(map) = value else {
            return Err(LoadError::InvalidData {
                provenance,
                message: "element document must be a mapping".to_string(),
            });
        };

        for key in map.keys() {
            if let Some(key) = key.as_str() {
                if !ALLOWED_ELEMENT_KEYS.contains(&key) {
                    return Err(LoadError::InvalidData {
                        provenance,
                        message: format!("unknown key '{key}' in element '{name}'"),
                    });
                }
            }
        }

        let kind = map
            .get(Value::String("kind".to_string()))
            .and_then(Value::as_str)
            .ok_or_else(|| LoadError::InvalidData {
                provenance: provenance.clone(),
                message: format!("element '{name}' is missing 'kind'"),
            })?
            .to_string();

        let sources = parse_sources(map, &provenance)?;
        let dependencies = parse_dependencies(map, &provenance)?;

        let mut variables = base_variables.clone();
        if let Some(var_map) = map
            .get(Value::String("variables".to_string()))
            .and_then(Value::as_mapping)
        {
            for (k, v) in var_map {
                if let (Some(k), Some(v)) = (k.as_str(), scalar_to_string(v)) {
                    variables.insert(k, v);
                }
            }
        }
        variables.resolve_all(&provenance)?;

        let environment = map
            .get(Value::String("environment".to_string()))
            .and_then(Value::as_mapping)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| Some((k.as_str()?.to_string(), scalar_to_string(v)?)))
                    .collect()
            })
            .unwrap_or_default();

        let environment_nocache = map
            .get(Value::String("environment-nocache".to_string()))
            .and_then(Value::as_sequence)
            .map(|seq| seq.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let config = map
            .get(Value::String("config".to_string()))
            .cloned()
            .unwrap_or(Value::Mapping(Default::default()));
        let public = map
            .get(Value::String("public".to_string()))
            .cloned()
            .unwrap_or(Value::Mapping(Default::default()));
        let sandbox = map
            .get(Value::String("sandbox".to_string()))
            .cloned()
            .unwrap_or(Value::Mapping(Default::default()));

        Ok(Element {
            name: name.to_string(),
            kind,
            sources,
            dependencies,
            variables,
            environment,
            environment_nocache,
            config,
            public,
            sandbox,
            provenance,
            strong_key: None,
            weak_key: None,
        })
    }

    /// `true` once every declared source has resolved content, meaning the cache-key resolver
    /// may compute this element's keys.
    pub fn sources_consistent(&self) -> bool {
        self.sources
            .iter()
            .all(|s| s.consistency != SourceConsistency::Inconsistent)
    }

    pub fn build_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|d| matches!(d.dep_type, crate::types::DependencyType::Build | crate::types::DependencyType::All))
    }

    pub fn runtime_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|d| {
            matches!(
                d.dep_type,
                crate::types::DependencyType::Runtime | crate::types::DependencyType::All
            )
        })
    }
}

fn parse_sources(map: &serde_yaml::Mapping, provenance: &Provenance) -> Result<Vec<SourceDeclaration>> {
    let Some(seq) = map
        .get(Value::String("sources".to_string()))
        .and_then(Value::as_sequence)
    else {
        return Ok(Vec::new());
    };
    seq.iter()
        .map(|entry| {
            let Value::Mapping(entry_map) = entry else {
                return Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "source declaration must be a mapping".to_string(),
                });
            };
            let kind = entry_map
                .get(Value::String("kind".to_string()))
                .and_then(Value::as_str)
                .ok_or_else(|| LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "source declaration is missing 'kind'".to_string(),
                })?
                .to_string();
            Ok(SourceDeclaration {
                kind,
                config: entry.clone(),
                consistency: SourceConsistency::Inconsistent,
            })
        })
        .collect()
}

fn parse_dependencies(map: &serde_yaml::Mapping, provenance: &Provenance) -> Result<Vec<Dependency>> {
    let mut dependencies = Vec::new();
    if let Some(seq) = map
        .get(Value::String("depends".to_string()))
        .and_then(Value::as_sequence)
    {
        for entry in seq {
            dependencies.push(Dependency::parse(entry, provenance.clone(), None)?);
        }
    }
    if let Some(seq) = map
        .get(Value::String("build-depends".to_string()))
        .and_then(Value::as_sequence)
    {
        for entry in seq {
            dependencies.push(Dependency::parse(
                entry,
                provenance.clone(),
                Some(crate::types::DependencyType::Build),
            )?);
        }
    }
    if let Some(seq) = map
        .get(Value::String("runtime-depends".to_string()))
        .and_then(Value::as_sequence)
    {
        for entry in seq {
            dependencies.push(Dependency::parse(
                entry,
                provenance.clone(),
                Some(crate::types::DependencyType::Runtime),
            )?);
        }
    }
    Ok(dependencies)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prov() -> Provenance {
        Provenance::new("foo.bst")
    }

    #[test]
    fn parses_minimal_element() {
        let value: Value = serde_yaml::from_str("kind: manual\n").unwrap();
        let element = Element::parse("foo.bst", &value, prov(), &Variables::default()).unwrap();
        assert_eq!(element.kind, "manual");
        assert!(element.sources.is_empty());
        assert!(element.sources_consistent());
    }

    #[test]
    fn rejects_unknown_key() {
        let value: Value = serde_yaml::from_str("kind: manual\nbogus: true\n").unwrap();
        assert!(Element::parse("foo.bst", &value, prov(), &Variables::default()).is_err());
    }

    #[test]
    fn splits_dependencies_by_type() {
        let value: Value = serde_yaml::from_str(
            "kind: manual\nbuild-depends: [a.bst]\nruntime-depends: [b.bst]\n",
        )
        .unwrap();
        let element = Element::parse("foo.bst", &value, prov(), &Variables::default()).unwrap();
        assert_eq!(element.build_dependencies().count(), 1);
        assert_eq!(element.runtime_dependencies().count(), 1);
    }

    #[test]
    fn inconsistent_source_marks_element_inconsistent() {
        let value: Value = serde_yaml::from_str("kind: manual\nsources:\n  - kind: local\n    path: foo\n").unwrap();
        let element = Element::parse("foo.bst", &value, prov(), &Variables::default()).unwrap();
        assert!(!element.sources_consistent());
    }
}
