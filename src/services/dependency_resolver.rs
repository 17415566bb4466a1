//! Dependency graph bookkeeping: eligibility, cycle rejection, and
//! failure cascades.
//!
//! The resolver owns the dependency DAG. Cycles are rejected fail-fast at
//! registration time, so runtime deadlock cannot arise from dependencies.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};

/// Tracks dependency edges between tasks and derives which tasks become
/// eligible (or must be cancelled) as their upstreams finish.
///
/// The resolver is a pure data structure; the task queue drives it under
/// its own lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyResolver {
    /// All task ids ever registered
    known: HashSet<Uuid>,
    /// task -> its declared dependencies (kept for cycle checks)
    deps: HashMap<Uuid, HashSet<Uuid>>,
    /// task -> dependencies not yet completed
    pending_deps: HashMap<Uuid, HashSet<Uuid>>,
    /// dependency -> tasks that list it
    dependents: HashMap<Uuid, HashSet<Uuid>>,
    /// tasks that reached `completed`
    completed: HashSet<Uuid>,
}

/// Depth-first search from `node` towards `target` along dependency
/// edges, recording the path when found.
fn find_path(
    node: Uuid,
    target: Uuid,
    deps: &HashMap<Uuid, HashSet<Uuid>>,
    visited: &mut HashSet<Uuid>,
    path: &mut Vec<Uuid>,
) -> bool {
    if !visited.insert(node) {
        return false;
    }
    path.push(node);
    if node == target {
        return true;
    }
    if let Some(neighbors) = deps.get(&node) {
        for &next in neighbors {
            if find_path(next, target, deps, visited, path) {
                return true;
            }
        }
    }
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the task id has been registered.
    pub fn contains(&self, task_id: Uuid) -> bool {
        self.known.contains(&task_id)
    }

    /// Register a task and its dependencies.
    ///
    /// Fails with `Validation` if a dependency id is unknown, or with
    /// `CycleDetected` if the edges would close a cycle. On error the
    /// graph is left unchanged.
    pub fn register(&mut self, task_id: Uuid, depends_on: &[Uuid]) -> OrchestratorResult<()> {
        for &dep in depends_on {
            if !self.known.contains(&dep) {
                return Err(OrchestratorError::Validation(format!(
                    "unknown dependency id: {dep}"
                )));
            }
        }

        // Adding edges task_id -> dep closes a cycle iff task_id is already
        // reachable from any new dependency.
        for &dep in depends_on {
            let mut visited = HashSet::new();
            let mut path = vec![task_id];
            if find_path(dep, task_id, &self.deps, &mut visited, &mut path) {
                return Err(OrchestratorError::CycleDetected(path));
            }
        }

        self.known.insert(task_id);
        let dep_set: HashSet<Uuid> = depends_on.iter().copied().collect();
        let pending: HashSet<Uuid> = dep_set
            .iter()
            .copied()
            .filter(|d| !self.completed.contains(d))
            .collect();

        for &dep in &dep_set {
            self.dependents.entry(dep).or_default().insert(task_id);
        }
        self.deps.insert(task_id, dep_set);
        self.pending_deps.insert(task_id, pending);
        Ok(())
    }

    /// Whether all of the task's dependencies have completed.
    pub fn is_satisfied(&self, task_id: Uuid) -> bool {
        self.pending_deps.get(&task_id).is_none_or(HashSet::is_empty)
    }

    /// Record a completion; returns the ids whose pending-dependency count
    /// just reached zero.
    pub fn on_task_completed(&mut self, task_id: Uuid) -> Vec<Uuid> {
        self.completed.insert(task_id);
        let mut newly_satisfied = Vec::new();
        if let Some(dependents) = self.dependents.get(&task_id) {
            for &dependent in dependents {
                if let Some(pending) = self.pending_deps.get_mut(&dependent) {
                    if pending.remove(&task_id) && pending.is_empty() {
                        newly_satisfied.push(dependent);
                    }
                }
            }
        }
        newly_satisfied
    }

    /// Record a terminal failure; returns every direct and transitive
    /// dependent, which must be cancelled (no implicit retry of dependents).
    pub fn on_task_failed(&mut self, task_id: Uuid) -> Vec<Uuid> {
        let mut affected = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier = VecDeque::from([task_id]);
        while let Some(current) = frontier.pop_front() {
            if let Some(dependents) = self.dependents.get(&current) {
                for &dependent in dependents {
                    if seen.insert(dependent) {
                        affected.push(dependent);
                        frontier.push_back(dependent);
                    }
                }
            }
        }
        affected
    }

    /// Drop a task from the graph (cancelled or archived).
    pub fn remove(&mut self, task_id: Uuid) {
        if let Some(deps) = self.deps.remove(&task_id) {
            for dep in deps {
                if let Some(set) = self.dependents.get_mut(&dep) {
                    set.remove(&task_id);
                }
            }
        }
        self.pending_deps.remove(&task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unknown_dependency_rejected() {
        let mut resolver = DependencyResolver::new();
        let task = Uuid::new_v4();
        let ghost = Uuid::new_v4();
        let err = resolver.register(task, &[ghost]).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(!resolver.contains(task));
    }

    #[test]
    fn test_chain_becomes_satisfied_in_order() {
        let mut resolver = DependencyResolver::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        resolver.register(a, &[]).unwrap();
        resolver.register(b, &[a]).unwrap();
        resolver.register(c, &[b]).unwrap();

        assert!(resolver.is_satisfied(a));
        assert!(!resolver.is_satisfied(b));

        assert_eq!(resolver.on_task_completed(a), vec![b]);
        assert!(resolver.is_satisfied(b));
        assert!(!resolver.is_satisfied(c));

        assert_eq!(resolver.on_task_completed(b), vec![c]);
    }

    #[test]
    fn test_diamond_waits_for_both_parents() {
        let mut resolver = DependencyResolver::new();
        let root = Uuid::new_v4();
        let left = Uuid::new_v4();
        let right = Uuid::new_v4();
        let join = Uuid::new_v4();

        resolver.register(root, &[]).unwrap();
        resolver.register(left, &[root]).unwrap();
        resolver.register(right, &[root]).unwrap();
        resolver.register(join, &[left, right]).unwrap();

        let mut unblocked = resolver.on_task_completed(root);
        unblocked.sort();
        assert_eq!(unblocked.len(), 2);

        assert!(resolver.on_task_completed(left).is_empty());
        assert_eq!(resolver.on_task_completed(right), vec![join]);
    }

    #[test]
    fn test_cycle_rejected_graph_unchanged() {
        let mut resolver = DependencyResolver::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        resolver.register(a, &[]).unwrap();
        resolver.register(b, &[a]).unwrap();
        resolver.register(c, &[b]).unwrap();

        // Re-registering a with a dep on c would close a -> c -> b -> a
        let err = resolver.register(a, &[c]).unwrap_err();
        assert!(matches!(err, OrchestratorError::CycleDetected(_)));

        // Graph unchanged on rejection: a still has no pending deps, and
        // completing c does not unblock anything through the rejected edge.
        assert!(resolver.is_satisfied(a));
        assert!(resolver.on_task_completed(c).is_empty());
    }

    #[test]
    fn test_cycle_path_reported() {
        let mut resolver = DependencyResolver::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        resolver.register(a, &[]).unwrap();
        resolver.register(b, &[a]).unwrap();

        match resolver.register(a, &[b]) {
            Err(OrchestratorError::CycleDetected(path)) => {
                assert!(path.contains(&a));
                assert!(path.contains(&b));
            }
            other => panic!("Expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_failure_cascades_transitively() {
        let mut resolver = DependencyResolver::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let unrelated = Uuid::new_v4();

        resolver.register(a, &[]).unwrap();
        resolver.register(b, &[a]).unwrap();
        resolver.register(c, &[b]).unwrap();
        resolver.register(unrelated, &[]).unwrap();

        let affected = resolver.on_task_failed(a);
        assert_eq!(affected.len(), 2);
        assert!(affected.contains(&b));
        assert!(affected.contains(&c));
        assert!(!affected.contains(&unrelated));
    }

    #[test]
    fn test_dependency_on_already_completed_task() {
        let mut resolver = DependencyResolver::new();
        let done = Uuid::new_v4();
        resolver.register(done, &[]).unwrap();
        resolver.on_task_completed(done);

        let late = Uuid::new_v4();
        resolver.register(late, &[done]).unwrap();
        assert!(resolver.is_satisfied(late));
    }

    #[test]
    fn test_remove_detaches_dependent() {
        let mut resolver = DependencyResolver::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        resolver.register(a, &[]).unwrap();
        resolver.register(b, &[a]).unwrap();

        resolver.remove(b);
        assert!(resolver.on_task_completed(a).is_empty());
    }
}
