//! Dependency graph over the subtasks of one task.
//!
//! Nodes live in an arena indexed by position; edges are stored as indices
//! in both directions. The graph is validated once, at plan acceptance,
//! and never holds references into the task itself.
//!
//! # Invariants (after `build` succeeds)
//! - Subtask ids are unique
//! - Every dependency names a sibling, and none names itself
//! - The dependency relation is acyclic

use std::collections::{HashMap, HashSet, VecDeque};

use super::subtask::{SubtaskDraft, SubtaskId};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<SubtaskId>,
    /// `dependencies[i]` = nodes that must complete before `i`
    dependencies: Vec<Vec<usize>>,
    /// `dependents[i]` = nodes waiting on `i`
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Build and validate a graph from `(id, dependencies)` pairs.
    ///
    /// # Errors
    /// Returns `Err` on duplicate ids, self dependencies, dangling ids or
    /// cycles.
    pub fn build<'a, I>(nodes: I) -> Result<Self, PlanningError>
    where
        I: IntoIterator<Item = (SubtaskId, &'a [SubtaskId])>,
    {
        let nodes: Vec<(SubtaskId, &[SubtaskId])> = nodes.into_iter().collect();

        let mut index = HashMap::with_capacity(nodes.len());
        for (i, (id, _)) in nodes.iter().enumerate() {
            if index.insert(*id, i).is_some() {
                return Err(PlanningError::DuplicateSubtask(*id));
            }
        }

        let n = nodes.len();
        let mut dependencies: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, (id, deps)) in nodes.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in deps.iter() {
                if dep == id {
                    return Err(PlanningError::SelfDependency(*id));
                }
                let Some(&d) = index.get(dep) else {
                    return Err(PlanningError::DanglingDependency {
                        subtask: *id,
                        dependency: *dep,
                    });
                };
                if seen.insert(d) {
                    dependencies[i].push(d);
                    dependents[d].push(i);
                }
            }
        }

        let order = topological_order(&dependencies, &dependents).map_err(|stuck| {
            PlanningError::Cycle {
                subtasks: stuck.into_iter().map(|i| nodes[i].0).collect(),
            }
        })?;

        Ok(Self {
            ids: nodes.iter().map(|(id, _)| *id).collect(),
            dependencies,
            dependents,
            order,
        })
    }

    pub fn from_drafts(drafts: &[SubtaskDraft]) -> Result<Self, PlanningError> {
        Self::build(drafts.iter().map(|d| (d.id, d.dependencies.as_slice())))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn id(&self, node: usize) -> SubtaskId {
        self.ids[node]
    }

    pub fn dependencies(&self, node: usize) -> &[usize] {
        &self.dependencies[node]
    }

    pub fn dependents(&self, node: usize) -> &[usize] {
        &self.dependents[node]
    }

    /// Nodes with no dependencies, in declaration order.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.dependencies[i].is_empty())
            .collect()
    }

    /// A valid execution order (dependencies first, declaration order among
    /// peers).
    pub fn execution_order(&self) -> &[usize] {
        &self.order
    }

    /// Dependents of `node` whose dependencies are now all satisfied.
    pub fn unlocked_by(&self, node: usize, is_completed: impl Fn(usize) -> bool) -> Vec<usize> {
        self.dependents[node]
            .iter()
            .copied()
            .filter(|&d| self.dependencies[d].iter().all(|&dep| is_completed(dep)))
            .collect()
    }

    /// Every node that transitively depends on `node`, in BFS order.
    pub fn downstream_of(&self, node: usize) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut queue: VecDeque<usize> = self.dependents[node].iter().copied().collect();
        let mut out = Vec::new();
        while let Some(next) = queue.pop_front() {
            if std::mem::replace(&mut seen[next], true) {
                continue;
            }
            out.push(next);
            queue.extend(self.dependents[next].iter().copied());
        }
        out
    }
}

/// Kahn's algorithm; returns the nodes left with nonzero in-degree on a cycle.
fn topological_order(
    dependencies: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> Result<Vec<usize>, Vec<usize>> {
    let n = dependencies.len();
    let mut in_degree: Vec<usize> = dependencies.iter().map(|d| d.len()).collect();

    let mut queue: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(n);

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &next in &dependents[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n).filter(|&i| in_degree[i] > 0).collect())
    }
}

/// Errors in plan acceptance. A task whose plan fails validation is created
/// and immediately marked Failed with this cause.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanningError {
    #[error("Subtask id {0} appears more than once")]
    DuplicateSubtask(SubtaskId),

    #[error("Subtask {0} depends on itself")]
    SelfDependency(SubtaskId),

    #[error("Subtask {subtask} depends on unknown subtask {dependency}")]
    DanglingDependency {
        subtask: SubtaskId,
        dependency: SubtaskId,
    },

    #[error("Circular dependency detected among {} subtasks", .subtasks.len())]
    Cycle { subtasks: Vec<SubtaskId> },

    #[error("Plan has {count} subtasks, more than the maximum of {max}")]
    TooManySubtasks { count: usize, max: usize },

    #[error("Planner produced no subtasks")]
    EmptyPlan,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::CapabilityType;

    fn draft(cap: CapabilityType) -> SubtaskDraft {
        SubtaskDraft::new(cap, "step")
    }

    #[test]
    fn test_roots_and_order_respect_dependencies() {
        let research = draft(CapabilityType::WebResearch);
        let analysis = draft(CapabilityType::DataAnalysis).with_dependency(research.id);
        let code = draft(CapabilityType::CodeGeneration);
        let write = draft(CapabilityType::ContentCreation)
            .with_dependencies([research.id, analysis.id, code.id]);
        let drafts = vec![research, analysis, code, write];

        let graph = DependencyGraph::from_drafts(&drafts).unwrap();
        assert_eq!(graph.roots(), vec![0, 2]);

        let order = graph.execution_order();
        let pos = |i: usize| order.iter().position(|&n| n == i).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(3));
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut a = draft(CapabilityType::WebResearch);
        let b = draft(CapabilityType::DataAnalysis).with_dependency(a.id);
        a = a.with_dependency(b.id);
        let c = draft(CapabilityType::ContentCreation);

        let err = DependencyGraph::from_drafts(&[a.clone(), b.clone(), c]).unwrap_err();
        match err {
            PlanningError::Cycle { subtasks } => {
                assert_eq!(subtasks.len(), 2);
                assert!(subtasks.contains(&a.id));
                assert!(subtasks.contains(&b.id));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_and_self_dependencies_are_rejected() {
        let ghost = SubtaskId::new();
        let a = draft(CapabilityType::WebResearch).with_dependency(ghost);
        assert_eq!(
            DependencyGraph::from_drafts(&[a.clone()]).unwrap_err(),
            PlanningError::DanglingDependency {
                subtask: a.id,
                dependency: ghost
            }
        );

        let mut b = draft(CapabilityType::WebResearch);
        b.dependencies.push(b.id);
        assert_eq!(
            DependencyGraph::from_drafts(&[b.clone()]).unwrap_err(),
            PlanningError::SelfDependency(b.id)
        );
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let a = draft(CapabilityType::WebResearch);
        let err = DependencyGraph::from_drafts(&[a.clone(), a.clone()]).unwrap_err();
        assert_eq!(err, PlanningError::DuplicateSubtask(a.id));
    }

    #[test]
    fn test_unlocked_by_waits_for_every_dependency() {
        let a = draft(CapabilityType::WebResearch);
        let b = draft(CapabilityType::DataAnalysis);
        let c = draft(CapabilityType::ContentCreation).with_dependencies([a.id, b.id]);
        let graph = DependencyGraph::from_drafts(&[a, b, c]).unwrap();

        assert!(graph.unlocked_by(0, |i| i == 0).is_empty());
        assert_eq!(graph.unlocked_by(0, |i| i <= 1), vec![2]);
    }

    #[test]
    fn test_downstream_is_transitive() {
        let a = draft(CapabilityType::WebResearch);
        let b = draft(CapabilityType::DataAnalysis).with_dependency(a.id);
        let c = draft(CapabilityType::ContentCreation).with_dependency(b.id);
        let d = draft(CapabilityType::CodeGeneration);
        let graph = DependencyGraph::from_drafts(&[a, b, c, d]).unwrap();

        assert_eq!(graph.downstream_of(0), vec![1, 2]);
        assert!(graph.downstream_of(3).is_empty());
    }
}
