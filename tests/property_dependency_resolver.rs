//! Property tests for the dependency resolver and retry backoff.

use proptest::prelude::*;
use std::collections::HashSet;
use uuid::Uuid;

use taskhive::domain::models::RetryConfig;
use taskhive::services::DependencyResolver;

/// Build a random DAG: each node may depend only on earlier nodes, so the
/// graph is acyclic by construction.
fn random_dag(size: usize, edge_seed: u64) -> (Vec<Uuid>, Vec<Vec<Uuid>>) {
    let ids: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
    let mut deps = Vec::with_capacity(size);
    let mut state = edge_seed.wrapping_add(1);
    for i in 0..size {
        let mut node_deps = Vec::new();
        for (j, &candidate) in ids.iter().enumerate().take(i) {
            // Cheap deterministic pseudo-random edge selection.
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(j as u64 + 1);
            if state % 3 == 0 {
                node_deps.push(candidate);
            }
        }
        deps.push(node_deps);
    }
    (ids, deps)
}

proptest! {
    /// Any acyclic graph registers without error.
    #[test]
    fn prop_acyclic_graphs_always_accepted(
        size in 1usize..40,
        edge_seed in any::<u64>(),
    ) {
        let (ids, deps) = random_dag(size, edge_seed);
        let mut resolver = DependencyResolver::new();
        for (i, &id) in ids.iter().enumerate() {
            prop_assert!(resolver.register(id, &deps[i]).is_ok());
        }
    }

    /// Completing tasks in registration order eventually satisfies every
    /// task, and a task is never satisfied before all of its dependencies
    /// have completed.
    #[test]
    fn prop_satisfaction_respects_dependencies(
        size in 1usize..30,
        edge_seed in any::<u64>(),
    ) {
        let (ids, deps) = random_dag(size, edge_seed);
        let mut resolver = DependencyResolver::new();
        for (i, &id) in ids.iter().enumerate() {
            resolver.register(id, &deps[i]).unwrap();
        }

        let mut completed: HashSet<Uuid> = HashSet::new();
        for (i, &id) in ids.iter().enumerate() {
            // All deps of id are earlier and completed: must be satisfied.
            prop_assert!(resolver.is_satisfied(id));
            // Unsatisfied iff some dependency not yet completed.
            for (j, &later) in ids.iter().enumerate().skip(i + 1) {
                let unmet = deps[j].iter().any(|d| !completed.contains(d));
                prop_assert_eq!(resolver.is_satisfied(later), !unmet);
            }
            resolver.on_task_completed(id);
            completed.insert(id);
        }
    }

    /// A rejected cyclic edge leaves the graph fully functional: every
    /// previously registered task still resolves as before.
    #[test]
    fn prop_cycle_rejection_preserves_graph(
        size in 2usize..20,
        edge_seed in any::<u64>(),
    ) {
        let (ids, deps) = random_dag(size, edge_seed);
        let mut resolver = DependencyResolver::new();
        for (i, &id) in ids.iter().enumerate() {
            resolver.register(id, &deps[i]).unwrap();
        }

        // A self-edge is the minimal cycle and must always be rejected.
        let first = ids[0];
        prop_assert!(resolver.register(first, &[first]).is_err());

        // Graph is unchanged: completing in registration order still
        // satisfies every task exactly as the original edges dictate.
        for &id in &ids {
            prop_assert!(resolver.is_satisfied(id));
            resolver.on_task_completed(id);
        }
    }

    /// A terminal failure cascade reaches exactly the transitive closure
    /// of dependents.
    #[test]
    fn prop_failure_cascade_is_transitive_closure(
        size in 1usize..30,
        edge_seed in any::<u64>(),
    ) {
        let (ids, deps) = random_dag(size, edge_seed);
        let mut resolver = DependencyResolver::new();
        for (i, &id) in ids.iter().enumerate() {
            resolver.register(id, &deps[i]).unwrap();
        }

        // Reference closure computed directly from the edge list.
        let failed = ids[0];
        let mut expected: HashSet<Uuid> = HashSet::new();
        loop {
            let mut grew = false;
            for (i, &id) in ids.iter().enumerate() {
                if expected.contains(&id) {
                    continue;
                }
                if deps[i].iter().any(|d| *d == failed || expected.contains(d)) {
                    expected.insert(id);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        let affected: HashSet<Uuid> = resolver.on_task_failed(failed).into_iter().collect();
        prop_assert_eq!(affected, expected);
    }

    /// Backoff is deterministic, non-decreasing in the attempt number,
    /// and never exceeds the cap.
    #[test]
    fn prop_backoff_monotonic_and_capped(
        initial in 1u64..10_000,
        cap in 1u64..1_000_000,
        attempt in 0u32..128,
    ) {
        let retry = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: initial,
            max_backoff_ms: cap,
        };
        let delay = retry.backoff_ms(attempt);
        prop_assert!(delay <= cap);
        prop_assert_eq!(delay, retry.backoff_ms(attempt));
        if attempt > 0 {
            prop_assert!(delay >= retry.backoff_ms(attempt - 1));
        }
    }
}
