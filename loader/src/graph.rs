// Copyright 2024 BuildStream contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::element::Element;
use crate::error::{LoadError, Result};
use crate::types::DependencyType;

/// Identifies a loaded element. Stable across the lifetime of one `Loader` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub NodeIndex);

/// The resolved dependency DAG: one node per distinct `(junction-chain, name)` element, edges
/// from dependent to dependency.
pub struct Graph {
    graph: DiGraph<Element, DependencyType>,
    by_key: HashMap<String, ElementId>,
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            graph: DiGraph::new(),
            by_key: HashMap::new(),
        }
    }

    /// Inserts an element keyed by its fully-qualified `(junction-chain, name)` string,
    /// returning its existing id if already present (dependency deduplication).
    pub fn get_or_insert(&mut self, key: &str, element: Element) -> ElementId {
        if let Some(&id) = self.by_key.get(key) {
            return id;
        }
        let id = ElementId(self.graph.add_node(element));
        self.by_key.insert(key.to_string(), id);
        id
    }

    pub fn get(&self, key: &str) -> Option<ElementId> {
        self.by_key.get(key).copied()
    }

    pub fn element(&self, id: ElementId) -> &Element {
        &self.graph[id.0]
    }

    pub fn element_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.graph[id.0]
    }

    pub fn add_dependency(&mut self, from: ElementId, to: ElementId, dep_type: DependencyType) {
        self.graph.add_edge(from.0, to.0, dep_type);
    }

    pub fn dependencies(&self, id: ElementId) -> impl Iterator<Item = ElementId> + '_ {
        self.graph
            .neighbors_directed(id.0, Direction::Outgoing)
            .map(ElementId)
    }

    /// Depth-first walk marking nodes gray (on the current path) then black (fully explored).
    /// Revisiting a gray node is a cycle; the returned chain starts and ends at the repeated
    /// node, in traversal order.
    pub fn detect_cycles(&self, roots: &[ElementId]) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            White,
            Gray,
            Black,
        }
        let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();
        let mut path: Vec<ElementId> = Vec::new();

        fn visit(
            graph: &Graph,
            id: ElementId,
            marks: &mut HashMap<NodeIndex, Mark>,
            path: &mut Vec<ElementId>,
        ) -> Result<()> {
            match marks.get(&id.0).copied().unwrap_or(Mark::White) {
                Mark::Black => return Ok(()),
                Mark::Gray => {
                    let start = path.iter().position(|&p| p == id).unwrap_or(0);
                    let mut names: Vec<String> = path[start..]
                        .iter()
                        .map(|&p| graph.element(p).name.clone())
                        .collect();
                    names.push(graph.element(id).name.clone());
                    return Err(LoadError::CircularDependency {
                        cycle: names.join(" -> "),
                    });
                }
                Mark::White => {}
            }
            marks.insert(id.0, Mark::Gray);
            path.push(id);
            for dep in graph.dependencies(id) {
                visit(graph, dep, marks, path)?;
            }
            path.pop();
            marks.insert(id.0, Mark::Black);
            Ok(())
        }

        for &root in roots {
            visit(self, root, &mut marks, &mut path)?;
        }
        Ok(())
    }

    /// Sorts `ids` per the stable tiebreak: dependency order first (a depends on b ⇒ a after
    /// b), then build-type before runtime-only, then name ascending. Junction-qualified names
    /// are not distinguished from local ones here; nothing using this loader resolves junction
    /// subprojects yet, so two elements sharing a bare name never reach this comparison.
    pub fn stable_order(&self, mut ids: Vec<ElementId>) -> Vec<ElementId> {
        let depth: HashMap<ElementId, usize> = ids
            .iter()
            .map(|&id| (id, self.dependency_depth(id)))
            .collect();
        ids.sort_by(|&a, &b| {
            depth[&a]
                .cmp(&depth[&b])
                .then_with(|| self.dep_type_rank(a).cmp(&self.dep_type_rank(b)))
                .then_with(|| self.element(a).name.cmp(&self.element(b).name))
        });
        ids
    }

    fn dependency_depth(&self, id: ElementId) -> usize {
        self.dependencies(id)
            .map(|dep| 1 + self.dependency_depth(dep))
            .max()
            .unwrap_or(0)
    }

    fn dep_type_rank(&self, id: ElementId) -> u8 {
        if self.element(id).build_dependencies().count() > 0 {
            0
        } else {
            1
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Provenance;
    use crate::variables::Variables;

    fn element(name: &str) -> Element {
        let value: serde_yaml::Value = serde_yaml::from_str("kind: manual\n").unwrap();
        Element::parse(name, &value, Provenance::new(name), &Variables::default()).unwrap()
    }

    #[test]
    fn dedups_by_key() {
        let mut graph = Graph::new();
        let a1 = graph.get_or_insert("a.bst", element("a.bst"));
        let a2 = graph.get_or_insert("a.bst", element("a.bst"));
        assert_eq!(a1, a2);
    }

    #[test]
    fn detects_direct_cycle() {
        let mut graph = Graph::new();
        let a = graph.get_or_insert("a.bst", element("a.bst"));
        let b = graph.get_or_insert("b.bst", element("b.bst"));
        graph.add_dependency(a, b, DependencyType::All);
        graph.add_dependency(b, a, DependencyType::All);
        assert!(graph.detect_cycles(&[a]).is_err());
    }

    #[test]
    fn accepts_acyclic_graph() {
        let mut graph = Graph::new();
        let a = graph.get_or_insert("a.bst", element("a.bst"));
        let b = graph.get_or_insert("b.bst", element("b.bst"));
        graph.add_dependency(a, b, DependencyType::All);
        assert!(graph.detect_cycles(&[a]).is_ok());
    }

    #[test]
    fn stable_order_puts_dependencies_first() {
        let mut graph = Graph::new();
        let a = graph.get_or_insert("a.bst", element("a.bst"));
        let b = graph.get_or_insert("b.bst", element("b.bst"));
        graph.add_dependency(a, b, DependencyType::All);
        let ordered = graph.stable_order(vec![a, b]);
        assert_eq!(ordered, vec![b, a]);
    }
}
