// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::element::Element;
use crate::error::{LoadError, Provenance, Result};
use crate::graph::{ElementId, Graph};
use crate::node;
use crate::options::OptionValue;
use crate::project::Project;
use crate::types::Dependency;
use crate::variables::Variables;

/// Where to find the checked-out sources of a junction subproject. Staging a junction's sources
/// into a directory is the sandbox/scheduler's job; the loader only needs the resulting path.
pub trait JunctionResolver {
    fn resolve(&self, junction_element: &str) -> Result<PathBuf>;
}

/// Loads one project's elements into a `Graph`, recursively constructing a subordinate `Loader`
/// per distinct junction and sharing this loader's cache lifetime with it.
pub struct Loader<'r> {
    project: Project,
    options: BTreeMap<String, OptionValue>,
    graph: Graph,
    junctions: HashMap<String, Loader<'r>>,
    resolver: &'r dyn JunctionResolver,
}

impl<'r> Loader<'r> {
    pub fn new(
        project_dir: &Path,
        user_config: &BTreeMap<String, String>,
        cli_overrides: &BTreeMap<String, String>,
        resolver: &'r dyn JunctionResolver,
    ) -> Result<Loader<'r>> {
        let project = Project::load(project_dir)?;
        let provenance = Provenance::new(project_dir.join("project.conf"));
        let options = project
            .option_declarations
            .resolve(user_config, cli_overrides, &provenance)?;
        Ok(Loader {
            project,
            options,
            graph: Graph::new(),
            junctions: HashMap::new(),
            resolver,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Consumes the loader, handing the resolved graph to a caller that needs to own it (e.g. to
    /// share it across scheduler workers behind an `Arc`).
    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// Loads `targets` (element names relative to the project's element path) and everything
    /// they transitively depend on, then validates the result (cycle detection, stable ordering).
    pub fn load_targets(&mut self, targets: &[String]) -> Result<Vec<ElementId>> {
        let mut roots = Vec::new();
        for target in targets {
            roots.push(self.load_element(None, target)?);
        }
        self.graph.detect_cycles(&roots)?;
        Ok(self.graph.stable_order(roots))
    }

    fn load_element(&mut self, junction_chain: Option<&str>, name: &str) -> Result<ElementId> {
        let key = dedup_key(junction_chain, name);
        if let Some(id) = self.graph.get(&key) {
            return Ok(id);
        }

        let path = self.project.element_path.join(name);
        let provenance = Provenance::new(path.clone());
        let raw = node::load_yaml_file(&path)?;
        let included = node::resolve_includes(raw, path.parent().unwrap(), &provenance)?;
        let conditioned = node::apply_option_conditionals(included, &self.options, &provenance)?;

        let mut project_variables = BTreeMap::new();
        for (k, v) in &self.options {
            project_variables.insert(k.clone(), option_value_as_string(v));
        }
        let base_variables = Variables::new(project_variables);

        let element = Element::parse(name, &conditioned, provenance, &base_variables)?;
        let dependencies = element.dependencies.clone();
        let id = self.graph.get_or_insert(&key, element);

        for dep in &dependencies {
            self.load_dependency(id, junction_chain, dep)?;
        }

        Ok(id)
    }

    fn load_dependency(
        &mut self,
        from: ElementId,
        junction_chain: Option<&str>,
        dep: &Dependency,
    ) -> Result<()> {
        let dep_id = match &dep.junction {
            None => self.load_element(junction_chain, &dep.name)?,
            Some(junction) => {
                let full_junction = match junction_chain {
                    Some(chain) => format!("{chain}:{junction}"),
                    None => junction.clone(),
                };
                self.ensure_junction_loaded(&full_junction)?;
                let sub = self.junctions.get_mut(&full_junction).ok_or_else(|| {
                    LoadError::ConflictingJunction {
                        name: full_junction.clone(),
                        message: "junction failed to load".to_string(),
                    }
                })?;
                sub.load_element(None, &dep.name)?
            }
        };
        self.graph.add_dependency(from, dep_id, dep.dep_type);
        Ok(())
    }

    fn ensure_junction_loaded(&mut self, full_junction: &str) -> Result<()> {
        if self.junctions.contains_key(full_junction) {
            return Ok(());
        }
        let junction_element = full_junction.rsplit(':').next().unwrap_or(full_junction);
        let sub_path = self.resolver.resolve(junction_element)?;
        let sub_loader = Loader::new(&sub_path, &BTreeMap::new(), &BTreeMap::new(), self.resolver)?;
        self.junctions.insert(full_junction.to_string(), sub_loader);
        Ok(())
    }
}

fn dedup_key(junction_chain: Option<&str>, name: &str) -> String {
    match junction_chain {
        Some(chain) => format!("{chain}:{name}"),
        None => name.to_string(),
    }
}

fn option_value_as_string(value: &OptionValue) -> String {
    match value {
        OptionValue::Bool(b) => b.to_string(),
        OptionValue::Enum(s) | OptionValue::String(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct NoJunctions;
    impl JunctionResolver for NoJunctions {
        fn resolve(&self, junction_element: &str) -> Result<PathBuf> {
            Err(LoadError::ConflictingJunction {
                name: junction_element.to_string(),
                message: "no junctions available in this test".to_string(),
            })
        }
    }

    fn write_file(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn loads_a_single_element_with_no_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("project.conf"), "name: test\n");
        write_file(&dir.path().join("a.bst"), "kind: manual\n");
        let resolver = NoJunctions;
        let mut loader = Loader::new(dir.path(), &BTreeMap::new(), &BTreeMap::new(), &resolver).unwrap();
        let ids = loader.load_targets(&["a.bst".to_string()]).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(loader.graph().element(ids[0]).name, "a.bst");
    }

    #[test]
    fn loads_transitive_dependencies_in_stable_order() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("project.conf"), "name: test\n");
        write_file(&dir.path().join("a.bst"), "kind: manual\ndepends: [b.bst]\n");
        write_file(&dir.path().join("b.bst"), "kind: manual\n");
        let resolver = NoJunctions;
        let mut loader = Loader::new(dir.path(), &BTreeMap::new(), &BTreeMap::new(), &resolver).unwrap();
        let ids = loader.load_targets(&["a.bst".to_string()]).unwrap();
        assert_eq!(ids.len(), 2);
        let names: Vec<_> = ids.iter().map(|&id| loader.graph().element(id).name.clone()).collect();
        assert_eq!(names, vec!["b.bst".to_string(), "a.bst".to_string()]);
    }

    #[test]
    fn circular_dependency_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("project.conf"), "name: test\n");
        write_file(&dir.path().join("a.bst"), "kind: manual\ndepends: [b.bst]\n");
        write_file(&dir.path().join("b.bst"), "kind: manual\ndepends: [a.bst]\n");
        let resolver = NoJunctions;
        let mut loader = Loader::new(dir.path(), &BTreeMap::new(), &BTreeMap::new(), &resolver).unwrap();
        assert!(loader.load_targets(&["a.bst".to_string()]).is_err());
    }

    #[test]
    fn missing_element_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("project.conf"), "name: test\n");
        let resolver = NoJunctions;
        let mut loader = Loader::new(dir.path(), &BTreeMap::new(), &BTreeMap::new(), &resolver).unwrap();
        assert!(loader.load_targets(&["missing.bst".to_string()]).is_err());
    }
}
