//! Dependency ordering for a phase's units.
//!
//! Produces a stable topological order: among units whose dependencies are
//! satisfied, the one declared first runs first. Cycles never stall the
//! pipeline; every unit on a cycle is demoted to independent.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::Unit;
use crate::errors::CycleDetectedError;

/// Result of ordering a unit set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Unit ids in execution order; each input id appears exactly once.
    pub order: Vec<String>,
    /// Each broken cycle, as the ids of its members in declaration order.
    pub broken_cycles: Vec<CycleDetectedError>,
}

impl Resolution {
    /// Ids of every unit whose dependencies must be cleared.
    #[must_use]
    pub fn demoted(&self) -> HashSet<&str> {
        self.broken_cycles
            .iter()
            .flat_map(|c| c.cycle.iter().map(String::as_str))
            .collect()
    }
}

/// Orders units so that each follows its dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Orders units given as `(id, dependencies)` pairs in declaration order.
    ///
    /// Dependencies on ids outside the set count as satisfied externals.
    /// Repeated ids keep their first declaration.
    #[must_use]
    pub fn resolve<'a, I, D>(&self, units: I) -> Resolution
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let mut ids: Vec<&str> = Vec::new();
        let mut raw_deps: Vec<Vec<&str>> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (id, deps) in units {
            if index.contains_key(id) {
                continue;
            }
            index.insert(id, ids.len());
            ids.push(id);
            raw_deps.push(deps.into_iter().collect());
        }

        // Internal edges only: dep -> dependent.
        let mut deps: Vec<BTreeSet<usize>> = raw_deps
            .iter()
            .map(|list| list.iter().filter_map(|d| index.get(d).copied()).collect())
            .collect();

        let mut broken_cycles = Vec::new();
        let (mut order, stalled) = kahn(&deps);
        if !stalled.is_empty() {
            let groups = cyclic_groups(&deps, &stalled);
            for group in &groups {
                for &node in group {
                    deps[node].clear();
                }
                let members: Vec<String> = group.iter().map(|&n| ids[n].to_string()).collect();
                tracing::warn!(cycle = ?members, "Breaking dependency cycle");
                broken_cycles.push(CycleDetectedError::new(members));
            }
            let (reordered, still_stalled) = kahn(&deps);
            debug_assert!(still_stalled.is_empty());
            order = reordered;
        }

        Resolution {
            order: order.into_iter().map(|n| ids[n].to_string()).collect(),
            broken_cycles,
        }
    }

    /// Orders a phase's units.
    #[must_use]
    pub fn resolve_units(&self, units: &[Unit]) -> Resolution {
        self.resolve(
            units
                .iter()
                .map(|u| (u.id.as_str(), u.dependencies.iter().map(String::as_str))),
        )
    }
}

/// Kahn's algorithm with lowest-index-first tie-break.
///
/// Returns the order found and the nodes that could not be scheduled.
fn kahn(deps: &[BTreeSet<usize>]) -> (Vec<usize>, Vec<usize>) {
    let n = deps.len();
    let mut in_degree: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node, list) in deps.iter().enumerate() {
        for &dep in list {
            dependents[dep].push(node);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &child in &dependents[node] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    let scheduled: HashSet<usize> = order.iter().copied().collect();
    let stalled = (0..n).filter(|i| !scheduled.contains(i)).collect();
    (order, stalled)
}

/// Groups the stalled nodes that lie on a cycle into strongly connected sets.
///
/// Stalled nodes that merely depend on a cycle are left out; they become
/// schedulable once the cycle members lose their dependencies.
fn cyclic_groups(deps: &[BTreeSet<usize>], stalled: &[usize]) -> Vec<Vec<usize>> {
    let in_stalled: HashSet<usize> = stalled.iter().copied().collect();
    let reach: HashMap<usize, HashSet<usize>> = stalled
        .iter()
        .map(|&start| {
            let mut seen = HashSet::new();
            let mut stack: Vec<usize> = deps[start].iter().copied().collect();
            while let Some(node) = stack.pop() {
                if in_stalled.contains(&node) && seen.insert(node) {
                    stack.extend(deps[node].iter().copied());
                }
            }
            (start, seen)
        })
        .collect();

    let mut assigned = HashSet::new();
    let mut groups = Vec::new();
    for &node in stalled {
        if assigned.contains(&node) || !reach[&node].contains(&node) {
            continue;
        }
        let group: Vec<usize> = stalled
            .iter()
            .copied()
            .filter(|&other| reach[&node].contains(&other) && reach[&other].contains(&node))
            .collect();
        assigned.extend(group.iter().copied());
        groups.push(group);
    }
    groups
}
