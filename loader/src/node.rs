// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! YAML composition: `(@)` includes, `overrides` merge, and `(?)` option conditionals.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::{LoadError, Provenance, Result};
use crate::options::OptionValue;

const INCLUDE_KEY: &str = "(@)";
const CONDITIONAL_KEY: &str = "(?)";

/// Reads and parses a single YAML file, attaching file-only provenance to load errors.
pub fn load_yaml_file(path: &Path) -> Result<Value> {
    let provenance = Provenance::new(path);
    let text = std::fs::read_to_string(path).map_err(|_| LoadError::MissingFile {
        provenance: provenance.clone(),
        path: path.display().to_string(),
    })?;
    serde_yaml::from_str(&text).map_err(|err| LoadError::InvalidYaml {
        provenance,
        message: err.to_string(),
    })
}

/// Recursively resolves `(@) <path>` includes, relative to `base_dir`, depth first: an included
/// file's own includes are resolved before it is merged into the including node.
pub fn resolve_includes(value: Value, base_dir: &Path, provenance: &Provenance) -> Result<Value> {
    match value {
        Value::Mapping(mut map) => {
            let include_paths = take_include_paths(&mut map, provenance)?;
            let mut merged = Value::Mapping(Mapping::new());
            for rel_path in include_paths {
                let full_path = base_dir.join(&rel_path);
                let included = load_yaml_file(&full_path)?;
                let included_prov = Provenance::new(full_path.clone());
                let resolved = resolve_includes(
                    included,
                    full_path.parent().unwrap_or(base_dir),
                    &included_prov,
                )?;
                merged = merge(merged, resolved);
            }
            let mut resolved_fields = Mapping::new();
            for (key, v) in map {
                let resolved_v = resolve_includes(v, base_dir, provenance)?;
                resolved_fields.insert(key, resolved_v);
            }
            Ok(merge(merged, Value::Mapping(resolved_fields)))
        }
        Value::Sequence(seq) => {
            let resolved: Result<Vec<Value>> = seq
                .into_iter()
                .map(|v| resolve_includes(v, base_dir, provenance))
                .collect();
            Ok(Value::Sequence(resolved?))
        }
        other => Ok(other),
    }
}

fn take_include_paths(map: &mut Mapping, provenance: &Provenance) -> Result<Vec<PathBuf>> {
    let key = Value::String(INCLUDE_KEY.to_string());
    let Some(value) = map.remove(key) else {
        return Ok(Vec::new());
    };
    match value {
        Value::String(s) => Ok(vec![PathBuf::from(s)]),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(PathBuf::from(s)),
                _ => Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "(@) entries must be strings".to_string(),
                }),
            })
            .collect(),
        _ => Err(LoadError::InvalidData {
            provenance: provenance.clone(),
            message: "(@) must be a string or list of strings".to_string(),
        }),
    }
}

/// Field-level merge of two mapping nodes: mapping values merge recursively, everything else
/// (scalars, lists) in `overlay` replaces the corresponding value in `base`.
pub fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Applies a project's `overrides` table (a mapping of element name to a node merged over that
/// element's own node) to one element node.
pub fn apply_override(base: Value, overrides: Option<&Value>) -> Value {
    match overrides {
        Some(overlay) => merge(base, overlay.clone()),
        None => base,
    }
}

/// Recursively evaluates and strips `(?)` conditional blocks: `(?): [[expr, then-node], ...]`.
/// Each `then-node` whose `expr` evaluates true is merged into the enclosing mapping, in list
/// order, after which the `(?)` key itself is removed.
pub fn apply_option_conditionals(
    value: Value,
    options: &BTreeMap<String, OptionValue>,
    provenance: &Provenance,
) -> Result<Value> {
    match value {
        Value::Mapping(map) => {
            let mut resolved = Mapping::new();
            let mut conditional_node = Value::Mapping(Mapping::new());
            for (key, v) in map {
                if key.as_str() == Some(CONDITIONAL_KEY) {
                    let branches = parse_conditional_branches(&v, provenance)?;
                    for (expr, then_node) in branches {
                        if eval_expr(&expr, options, provenance)? {
                            let then_resolved =
                                apply_option_conditionals(then_node, options, provenance)?;
                            conditional_node = merge(conditional_node, then_resolved);
                        }
                    }
                } else {
                    let resolved_v = apply_option_conditionals(v, options, provenance)?;
                    resolved.insert(key, resolved_v);
                }
            }
            Ok(merge(Value::Mapping(resolved), conditional_node))
        }
        Value::Sequence(seq) => {
            let resolved: Result<Vec<Value>> = seq
                .into_iter()
                .map(|v| apply_option_conditionals(v, options, provenance))
                .collect();
            Ok(Value::Sequence(resolved?))
        }
        other => Ok(other),
    }
}

fn parse_conditional_branches(value: &Value, provenance: &Provenance) -> Result<Vec<(String, Value)>> {
    let Value::Sequence(entries) = value else {
        return Err(LoadError::InvalidData {
            provenance: provenance.clone(),
            message: "(?) must be a list of [expr, then-node] pairs".to_string(),
        });
    };
    entries
        .iter()
        .map(|entry| {
            let Value::Sequence(pair) = entry else {
                return Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "(?) entry must be a [expr, then-node] pair".to_string(),
                });
            };
            let [expr, then_node] = <[Value; 2]>::try_from(pair.clone()).map_err(|_| {
                LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "(?) entry must have exactly two elements".to_string(),
                }
            })?;
            let expr = expr.as_str().ok_or_else(|| LoadError::InvalidData {
                provenance: provenance.clone(),
                message: "(?) expression must be a string".to_string(),
            })?;
            Ok((expr.to_string(), then_node))
        })
        .collect()
}

/// Evaluates a boolean expression over declared options: identifiers, `not`, `and`, `or`, and
/// parenthesized grouping.
fn eval_expr(expr: &str, options: &BTreeMap<String, OptionValue>, provenance: &Provenance) -> Result<bool> {
    let tokens = tokenize(expr);
    let mut pos = 0;
    let result = parse_or(&tokens, &mut pos, options, provenance)?;
    if pos != tokens.len() {
        return Err(LoadError::InvalidData {
            provenance: provenance.clone(),
            message: format!("could not fully parse option expression '{expr}'"),
        });
    }
    Ok(result)
}

fn tokenize(expr: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in expr.chars() {
        match ch {
            '(' | ')' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(ch.to_string());
            }
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_or(
    tokens: &[String],
    pos: &mut usize,
    options: &BTreeMap<String, OptionValue>,
    provenance: &Provenance,
) -> Result<bool> {
    let mut value = parse_and(tokens, pos, options, provenance)?;
    while tokens.get(*pos).map(String::as_str) == Some("or") {
        *pos += 1;
        let rhs = parse_and(tokens, pos, options, provenance)?;
        value = value || rhs;
    }
    Ok(value)
}

fn parse_and(
    tokens: &[String],
    pos: &mut usize,
    options: &BTreeMap<String, OptionValue>,
    provenance: &Provenance,
) -> Result<bool> {
    let mut value = parse_unary(tokens, pos, options, provenance)?;
    while tokens.get(*pos).map(String::as_str) == Some("and") {
        *pos += 1;
        let rhs = parse_unary(tokens, pos, options, provenance)?;
        value = value && rhs;
    }
    Ok(value)
}

fn parse_unary(
    tokens: &[String],
    pos: &mut usize,
    options: &BTreeMap<String, OptionValue>,
    provenance: &Provenance,
) -> Result<bool> {
    if tokens.get(*pos).map(String::as_str) == Some("not") {
        *pos += 1;
        return Ok(!parse_unary(tokens, pos, options, provenance)?);
    }
    parse_atom(tokens, pos, options, provenance)
}

fn parse_atom(
    tokens: &[String],
    pos: &mut usize,
    options: &BTreeMap<String, OptionValue>,
    provenance: &Provenance,
) -> Result<bool> {
    match tokens.get(*pos).map(String::as_str) {
        Some("(") => {
            *pos += 1;
            let value = parse_or(tokens, pos, options, provenance)?;
            if tokens.get(*pos).map(String::as_str) != Some(")") {
                return Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: "unbalanced parentheses in option expression".to_string(),
                });
            }
            *pos += 1;
            Ok(value)
        }
        Some(name) => {
            *pos += 1;
            match options.get(name) {
                Some(OptionValue::Bool(b)) => Ok(*b),
                Some(OptionValue::Enum(v)) | Some(OptionValue::String(v)) => Ok(!v.is_empty()),
                None => Err(LoadError::InvalidData {
                    provenance: provenance.clone(),
                    message: format!("undeclared option '{name}' used in conditional"),
                }),
            }
        }
        None => Err(LoadError::InvalidData {
            provenance: provenance.clone(),
            message: "unexpected end of option expression".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prov() -> Provenance {
        Provenance::new("test.bst")
    }

    #[test]
    fn merge_overwrites_scalars_and_recurses_into_mappings() {
        let base: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n  d: 3").unwrap();
        let overlay: Value = serde_yaml::from_str("b:\n  c: 9\ne: 5").unwrap();
        let merged = merge(base, overlay);
        let text = serde_yaml::to_string(&merged).unwrap();
        assert!(text.contains("a: 1"));
        assert!(text.contains("c: 9"));
        assert!(text.contains("d: 3"));
        assert!(text.contains("e: 5"));
    }

    #[test]
    fn conditional_true_branch_is_merged_and_key_removed() {
        let mut options = BTreeMap::new();
        options.insert("debug".to_string(), OptionValue::Bool(true));
        let value: Value = serde_yaml::from_str(
            "config:\n  (?):\n    - [debug, {config: {strip: false}}]\n",
        )
        .unwrap();
        let resolved = apply_option_conditionals(value, &options, &prov()).unwrap();
        let text = serde_yaml::to_string(&resolved).unwrap();
        assert!(text.contains("strip: false"));
        assert!(!text.contains("(?)"));
    }

    #[test]
    fn conditional_false_branch_is_dropped() {
        let mut options = BTreeMap::new();
        options.insert("debug".to_string(), OptionValue::Bool(false));
        let value: Value = serde_yaml::from_str(
            "config:\n  (?):\n    - [debug, {config: {strip: false}}]\n",
        )
        .unwrap();
        let resolved = apply_option_conditionals(value, &options, &prov()).unwrap();
        let text = serde_yaml::to_string(&resolved).unwrap();
        assert!(!text.contains("strip"));
    }

    #[test]
    fn eval_expr_supports_not_and_or() {
        let mut options = BTreeMap::new();
        options.insert("a".to_string(), OptionValue::Bool(true));
        options.insert("b".to_string(), OptionValue::Bool(false));
        assert!(eval_expr("a and not b", &options, &prov()).unwrap());
        assert!(eval_expr("b or a", &options, &prov()).unwrap());
        assert!(!eval_expr("b and a", &options, &prov()).unwrap());
    }
}
