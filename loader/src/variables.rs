// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{LoadError, Provenance, Result};

static VARIABLE_MATCH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\%\{([a-zA-Z][a-zA-Z0-9_-]*)\}").unwrap());

/// A flat, resolved `%{name}` substitution table for one element.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    values: BTreeMap<String, String>,
}

impl Variables {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        let mut vars = Variables { values };
        // `notparallel` forces single-job builds; applied the same way the
        // build-element config it feeds into reads `max-jobs`.
        if vars.values.get("notparallel").map(String::as_str) == Some("True") {
            vars.values.insert("max-jobs".to_string(), "1".to_string());
        }
        vars
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// A snapshot of every resolved value, for feeding into the cache key.
    pub fn as_map(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Single substitution pass; returns the names of any `%{...}` references that had no
    /// matching value.
    fn subst_once(&self, template: &str) -> (String, HashSet<String>) {
        let mut unmatched = HashSet::new();
        let result = VARIABLE_MATCH
            .replace_all(template, |caps: &regex::Captures| {
                let name = &caps[1];
                match self.values.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        unmatched.insert(name.to_string());
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();
        (result, unmatched)
    }

    /// Expand every `%{name}` reference in `template`, repeating until the string stops
    /// changing. A reference that remains unmatched after the set of unresolved names stabilizes
    /// between two iterations is a cyclic or undefined reference.
    pub fn resolve(&self, template: &str, provenance: &Provenance) -> Result<String> {
        let mut current = template.to_string();
        let mut previous_unmatched: Option<HashSet<String>> = None;

        loop {
            let (next, unmatched) = self.subst_once(&current);
            if unmatched.is_empty() {
                return Ok(next);
            }
            if next == current {
                // No substitution happened this pass and some reference is still unmatched.
                if previous_unmatched.as_ref() == Some(&unmatched) {
                    let mut names: Vec<_> = unmatched.into_iter().collect();
                    names.sort();
                    return Err(LoadError::UnresolvedVariable {
                        name: names.join(", "),
                        provenance: provenance.clone(),
                    });
                }
            }
            current = next;
            previous_unmatched = Some(unmatched);
        }
    }

    /// Resolve every value in the table against itself, so that values may reference each
    /// other regardless of declaration order.
    pub fn resolve_all(&mut self, provenance: &Provenance) -> Result<()> {
        let names: Vec<String> = self.values.keys().cloned().collect();
        for name in names {
            let template = self.values.get(&name).cloned().unwrap_or_default();
            let resolved = self.resolve(&template, provenance)?;
            self.values.insert(name, resolved);
        }
        Ok(())
    }

    pub fn find_references(template: &str) -> Vec<String> {
        VARIABLE_MATCH
            .captures_iter(template)
            .map(|c| c[1].to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prov() -> Provenance {
        Provenance::new("test.bst")
    }

    #[test]
    fn substitutes_simple_reference() {
        let mut values = BTreeMap::new();
        values.insert("prefix".to_string(), "/usr".to_string());
        let vars = Variables::new(values);
        assert_eq!(vars.resolve("%{prefix}/bin", &prov()).unwrap(), "/usr/bin");
    }

    #[test]
    fn substitutes_transitively() {
        let mut values = BTreeMap::new();
        values.insert("prefix".to_string(), "/usr".to_string());
        values.insert("bindir".to_string(), "%{prefix}/bin".to_string());
        let vars = Variables::new(values);
        assert_eq!(vars.resolve("%{bindir}", &prov()).unwrap(), "/usr/bin");
    }

    #[test]
    fn undefined_reference_is_an_error() {
        let vars = Variables::new(BTreeMap::new());
        assert!(vars.resolve("%{missing}", &prov()).is_err());
    }

    #[test]
    fn cyclic_reference_is_an_error() {
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), "%{b}".to_string());
        values.insert("b".to_string(), "%{a}".to_string());
        let vars = Variables::new(values);
        assert!(vars.resolve("%{a}", &prov()).is_err());
    }

    #[test]
    fn notparallel_forces_single_job() {
        let mut values = BTreeMap::new();
        values.insert("notparallel".to_string(), "True".to_string());
        values.insert("max-jobs".to_string(), "8".to_string());
        let vars = Variables::new(values);
        assert_eq!(vars.get("max-jobs"), Some("1"));
    }

    #[test]
    fn find_references_lists_names() {
        assert_eq!(
            Variables::find_references("%{a}-%{b}"),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
