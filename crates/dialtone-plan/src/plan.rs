use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use dialtone_config::{Lifecycle, LifecycleVariant, OperationDef};
use tracing::debug;

use crate::error::PlanError;
use crate::graph::Graph;

/// Traversal direction through a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  /// Dependencies before dependents (create, update).
  Forward,
  /// Dependents before dependencies (delete).
  Reverse,
}

impl From<Lifecycle> for Direction {
  fn from(lifecycle: Lifecycle) -> Self {
    match lifecycle {
      Lifecycle::Create | Lifecycle::Update => Direction::Forward,
      Lifecycle::Delete => Direction::Reverse,
    }
  }
}

/// A validated set of operations in topological order.
#[derive(Debug, Clone)]
pub struct Plan {
  name: String,
  /// Operations in execution order.
  operations: Vec<Arc<OperationDef>>,
  /// node_id -> position in `operations`.
  positions: HashMap<String, usize>,
  graph: Graph,
}

impl Plan {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn len(&self) -> usize {
    self.operations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.operations.is_empty()
  }

  /// Operations in forward execution order.
  pub fn operations(&self) -> &[Arc<OperationDef>] {
    &self.operations
  }

  /// Operation ids in forward execution order.
  pub fn order(&self) -> Vec<&str> {
    self.operations.iter().map(|op| op.id.as_str()).collect()
  }

  /// Operation ids in teardown order.
  pub fn reverse_order(&self) -> Vec<&str> {
    self.operations.iter().rev().map(|op| op.id.as_str()).collect()
  }

  pub fn get(&self, id: &str) -> Option<&Arc<OperationDef>> {
    self.positions.get(id).map(|&i| &self.operations[i])
  }

  /// Position of an operation in forward order.
  pub fn position(&self, id: &str) -> Option<usize> {
    self.positions.get(id).copied()
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  /// The nodes that must be terminal before `id` may run in `direction`.
  pub fn prerequisites(&self, id: &str, direction: Direction) -> &[String] {
    match direction {
      Direction::Forward => self.graph.upstream(id),
      Direction::Reverse => self.graph.downstream(id),
    }
  }

  /// Operations not yet in `done` whose prerequisites are all in `done`, in
  /// traversal order.
  pub fn ready(&self, direction: Direction, done: &HashSet<String>) -> Vec<&Arc<OperationDef>> {
    let is_ready = |op: &&Arc<OperationDef>| {
      !done.contains(&op.id)
        && self
          .prerequisites(&op.id, direction)
          .iter()
          .all(|p| done.contains(p))
    };

    match direction {
      Direction::Forward => self.operations.iter().filter(is_ready).collect(),
      Direction::Reverse => self.operations.iter().rev().filter(is_ready).collect(),
    }
  }
}

/// Validate operations and order them for execution.
pub fn submit<I>(operations: I) -> Result<Plan, PlanError>
where
  I: IntoIterator<Item = OperationDef>,
{
  let operations: Vec<OperationDef> = operations.into_iter().collect();

  // Submission index per id
  let mut index: HashMap<&str, usize> = HashMap::with_capacity(operations.len());
  for (i, op) in operations.iter().enumerate() {
    if index.insert(op.id.as_str(), i).is_some() {
      return Err(PlanError::DuplicateOperation(op.id.clone()));
    }
  }

  for op in &operations {
    if op.variant == LifecycleVariant::CreateUpdateDelete && op.on_delete.is_none() {
      return Err(PlanError::MissingDeleteHook(op.id.clone()));
    }
    let hooks = [
      (Lifecycle::Update, op.on_update.is_some()),
      (Lifecycle::Delete, op.on_delete.is_some()),
    ];
    for (lifecycle, present) in hooks {
      if present && !op.variant.supports(lifecycle) {
        return Err(PlanError::UnusedHook {
          operation: op.id.clone(),
          lifecycle,
        });
      }
    }
  }

  // Dependencies per node, validated
  let mut deps: HashMap<&str, Vec<&str>> = HashMap::with_capacity(operations.len());
  for op in &operations {
    let op_deps = op.dependencies();
    for dep in &op_deps {
      if !index.contains_key(dep) {
        return Err(PlanError::DanglingDependency {
          operation: op.id.clone(),
          missing: dep.to_string(),
        });
      }
    }
    deps.insert(op.id.as_str(), op_deps);
  }

  if let Some(members) = find_cycle(&operations, &deps) {
    return Err(PlanError::Cycle { members });
  }

  let node_ids: Vec<String> = operations.iter().map(|op| op.id.clone()).collect();
  let edges: Vec<(String, String)> = operations
    .iter()
    .flat_map(|op| {
      deps[op.id.as_str()]
        .iter()
        .map(move |dep| (dep.to_string(), op.id.clone()))
    })
    .collect();
  let graph = Graph::new(&node_ids, &edges);

  let order = topological_order(&operations, &index, &graph);
  debug!(order = ?order, "plan ordered");

  let mut slots: Vec<Option<OperationDef>> = operations.into_iter().map(Some).collect();
  let ordered: Vec<Arc<OperationDef>> = order
    .iter()
    .filter_map(|&i| slots[i].take().map(Arc::new))
    .collect();
  let positions = ordered
    .iter()
    .enumerate()
    .map(|(pos, op)| (op.id.clone(), pos))
    .collect();

  Ok(Plan {
    name: "default".to_string(),
    operations: ordered,
    positions,
    graph,
  })
}

/// Kahn's algorithm; among ready nodes the earliest submitted goes first.
fn topological_order(
  operations: &[OperationDef],
  index: &HashMap<&str, usize>,
  graph: &Graph,
) -> Vec<usize> {
  let mut in_degree: Vec<usize> = operations
    .iter()
    .map(|op| graph.upstream(&op.id).len())
    .collect();

  let mut ready: BinaryHeap<Reverse<usize>> = in_degree
    .iter()
    .enumerate()
    .filter(|(_, degree)| **degree == 0)
    .map(|(i, _)| Reverse(i))
    .collect();

  let mut order = Vec::with_capacity(operations.len());
  while let Some(Reverse(i)) = ready.pop() {
    order.push(i);
    for dependent in graph.downstream(&operations[i].id) {
      if let Some(&j) = index.get(dependent.as_str()) {
        in_degree[j] -= 1;
        if in_degree[j] == 0 {
          ready.push(Reverse(j));
        }
      }
    }
  }

  order
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
  Unvisited,
  OnStack,
  Done,
}

/// Depth-first search over dependency edges with an explicit recursion stack.
/// Returns the members of the first cycle found.
fn find_cycle(operations: &[OperationDef], deps: &HashMap<&str, Vec<&str>>) -> Option<Vec<String>> {
  fn visit<'a>(
    node: &'a str,
    deps: &HashMap<&'a str, Vec<&'a str>>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
  ) -> Option<Vec<String>> {
    marks.insert(node, Mark::OnStack);
    stack.push(node);

    for &dep in deps.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
      match marks.get(dep).copied().unwrap_or(Mark::Unvisited) {
        Mark::OnStack => {
          // Back edge: the cycle is the stack from `dep` to the top
          let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
          return Some(stack[start..].iter().map(|s| s.to_string()).collect());
        }
        Mark::Unvisited => {
          if let Some(cycle) = visit(dep, deps, marks, stack) {
            return Some(cycle);
          }
        }
        Mark::Done => {}
      }
    }

    stack.pop();
    marks.insert(node, Mark::Done);
    None
  }

  let mut marks: HashMap<&str, Mark> = HashMap::with_capacity(operations.len());
  let mut stack: Vec<&str> = Vec::new();

  for op in operations {
    if marks.get(op.id.as_str()).is_none() {
      if let Some(cycle) = visit(op.id.as_str(), deps, &mut marks, &mut stack) {
        return Some(cycle);
      }
    }
  }

  None
}
