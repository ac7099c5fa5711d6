// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
//! Strong/weak cache key computation.
//!
//! Mirrors `original_source/buildstream/_cachekey.py`'s `generate_key`: sanitize a value into
//! map-keys-sorted form, serialize it deterministically, and take the SHA-256 hex digest. Python
//! sanitizes then `pickle.dumps`es a sorted dict; here `serde_json::Map` is backed by a
//! `BTreeMap` (no `preserve_order` feature), so inserting into it during sanitization already
//! yields sorted keys, and `serde_json::to_vec` serializes deterministically from there.

#![deny(clippy::all)]

use std::collections::BTreeMap;

use hashing::Fingerprint;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// The inputs to one element's cache key computation, per the declaration order they appear in.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInputs {
    pub kind: String,
    pub variables: BTreeMap<String, String>,
    /// `environment` with `environment-nocache` keys already removed by the caller.
    pub cacheable_environment: BTreeMap<String, String>,
    pub config: Value,
    pub public: Value,
    pub sandbox_config: Value,
    /// `(source kind, unique_key)` pairs in source declaration order.
    pub source_fingerprints: Vec<(String, Value)>,
}

/// Computes the SHA-256 hex digest of a sanitized, deterministically serialized value.
pub fn generate_key<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_value(value).expect("cache key input must be serializable");
    let sanitized = sanitize(json);
    let bytes = serde_json::to_vec(&sanitized).expect("sanitized value must serialize");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Fingerprint::from_bytes(hasher.finalize()).to_hex()
}

/// Strong key: the full tuple with build dependencies identified by their own strong keys, so
/// any change anywhere in the dependency closure changes this element's strong key too.
pub fn strong_key(inputs: &KeyInputs, build_dependency_strong_keys: &[String]) -> String {
    let mut sorted_deps = build_dependency_strong_keys.to_vec();
    sorted_deps.sort();
    generate_key(&(inputs, sorted_deps))
}

/// Weak key: the same tuple with build dependencies identified by name instead of key, so it
/// stays stable across dependency rebuilds that don't change the dependency's own interface.
pub fn weak_key(inputs: &KeyInputs, build_dependency_names: &[String]) -> String {
    let mut sorted_deps = build_dependency_names.to_vec();
    sorted_deps.sort();
    generate_key(&(inputs, sorted_deps))
}

fn sanitize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = Map::new();
            for (k, v) in map {
                sorted.insert(k, sanitize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sanitize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(kind: &str) -> KeyInputs {
        KeyInputs {
            kind: kind.to_string(),
            variables: BTreeMap::new(),
            cacheable_environment: BTreeMap::new(),
            config: Value::Null,
            public: Value::Null,
            sandbox_config: Value::Null,
            source_fingerprints: Vec::new(),
        }
    }

    #[test]
    fn same_inputs_produce_same_key() {
        let a = strong_key(&inputs("manual"), &[]);
        let b = strong_key(&inputs("manual"), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_kind_changes_key() {
        let a = strong_key(&inputs("manual"), &[]);
        let b = strong_key(&inputs("autotools"), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn key_insensitive_to_map_insertion_order() {
        let mut first = Map::new();
        first.insert("a".to_string(), Value::from(1));
        first.insert("b".to_string(), Value::from(2));
        let mut second = Map::new();
        second.insert("b".to_string(), Value::from(2));
        second.insert("a".to_string(), Value::from(1));
        assert_eq!(
            generate_key(&Value::Object(first)),
            generate_key(&Value::Object(second))
        );
    }

    #[test]
    fn strong_key_depends_on_build_dependency_keys() {
        let a = strong_key(&inputs("manual"), &["dep-key-1".to_string()]);
        let b = strong_key(&inputs("manual"), &["dep-key-2".to_string()]);
        assert_ne!(a, b);
    }

    #[test]
    fn weak_key_ignores_dependency_key_changes_for_same_name() {
        let a = weak_key(&inputs("manual"), &["dep".to_string()]);
        let b = weak_key(&inputs("manual"), &["dep".to_string()]);
        assert_eq!(a, b);
    }
}
