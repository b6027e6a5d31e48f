use std::collections::HashMap;

/// Dependency graph for traversal.
///
/// Edges point from a dependency to its dependent: `(a, b)` means `b`
/// depends on `a`, so `a` runs first on create and last on delete.
#[derive(Debug, Clone, Default)]
pub struct Graph {
  /// Adjacency list: node_id -> list of dependent node_ids.
  adjacency: HashMap<String, Vec<String>>,
  /// Reverse adjacency: node_id -> list of dependency node_ids.
  reverse_adjacency: HashMap<String, Vec<String>>,
  /// Nodes with no dependencies, in node order.
  entry_points: Vec<String>,
  /// Nodes nothing depends on, in node order.
  exit_points: Vec<String>,
}

impl Graph {
  /// Build a graph from node ids and `(dependency, dependent)` edges.
  ///
  /// Edges touching unknown nodes are kept; validation happens in the planner.
  pub fn new(node_ids: &[String], edges: &[(String, String)]) -> Self {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut reverse_adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for node_id in node_ids {
      adjacency.entry(node_id.clone()).or_default();
      reverse_adjacency.entry(node_id.clone()).or_default();
    }

    for (from, to) in edges {
      let downstream = adjacency.entry(from.clone()).or_default();
      if !downstream.contains(to) {
        downstream.push(to.clone());
      }
      let upstream = reverse_adjacency.entry(to.clone()).or_default();
      if !upstream.contains(from) {
        upstream.push(from.clone());
      }
    }

    let entry_points = node_ids
      .iter()
      .filter(|id| reverse_adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    let exit_points = node_ids
      .iter()
      .filter(|id| adjacency.get(*id).is_none_or(|v| v.is_empty()))
      .cloned()
      .collect();

    Self {
      adjacency,
      reverse_adjacency,
      entry_points,
      exit_points,
    }
  }

  /// Nodes with no dependencies.
  pub fn entry_points(&self) -> &[String] {
    &self.entry_points
  }

  /// Nodes that nothing depends on; the first to go on teardown.
  pub fn exit_points(&self) -> &[String] {
    &self.exit_points
  }

  /// Nodes that depend on the given node.
  pub fn downstream(&self, node_id: &str) -> &[String] {
    self
      .adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Nodes the given node depends on.
  pub fn upstream(&self, node_id: &str) -> &[String] {
    self
      .reverse_adjacency
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// All `(dependency, dependent)` edges.
  pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
    self
      .adjacency
      .iter()
      .flat_map(|(from, tos)| tos.iter().map(move |to| (from.as_str(), to.as_str())))
  }
}
