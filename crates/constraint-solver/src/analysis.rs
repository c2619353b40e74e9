//! Structural pre-solve analysis: DOF census, connected-component
//! decomposition, and matching-based over-determination detection.
//!
//! The bipartite graph pairs constraint equations against entity
//! parameters. A maximum matching that leaves equations unmatched proves
//! the system structurally over-determined, and the alternating-path
//! reachability from an unmatched equation yields the minimal constraint
//! set responsible — the working equivalent of a Dulmage-Mendelsohn
//! decomposition for this purpose.

use std::collections::{BTreeSet, HashSet};

use anvil_types::ConstraintId;

use crate::model::{dof_removed, SolverConstraint, SolverEntity};
use crate::residual::ParamLayout;

/// Overall determination of a constraint system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Determination {
    WellDetermined,
    UnderDetermined,
    OverDetermined,
}

/// One independently solvable subsystem.
#[derive(Debug, Clone)]
pub struct Subsystem {
    /// Indices into the entity slice.
    pub entities: Vec<usize>,
    /// Indices into the constraint slice.
    pub constraints: Vec<usize>,
}

/// Output of the structural pass.
#[derive(Debug, Clone)]
pub struct StructuralReport {
    /// Sum of entity DOF contributions.
    pub total_dof: i64,
    /// Sum of constraint DOF removals.
    pub dof_removed: i64,
    /// `total_dof - dof_removed`; negative means over-determined.
    pub dof_remaining: i64,
    pub determination: Determination,
    pub subsystems: Vec<Subsystem>,
    /// Minimal constraint sets that over-determine their variables.
    pub overdetermined_sets: Vec<Vec<ConstraintId>>,
    /// Constraints participating in a dependency cycle of length ≥ 2.
    pub cyclic: Vec<ConstraintId>,
}

/// Run the structural pass over a constraint system.
pub fn analyze(entities: &[SolverEntity], constraints: &[SolverConstraint]) -> StructuralReport {
    let total_dof: i64 = entities.iter().map(|e| i64::from(e.kind.dof())).sum();
    let removed: i64 = constraints
        .iter()
        .map(|c| {
            let kinds: Vec<_> = c.entities.iter().map(|&i| entities[i].kind).collect();
            i64::from(dof_removed(c.kind, &kinds))
        })
        .sum();
    let remaining = total_dof - removed;

    let subsystems = connected_components(entities.len(), constraints);
    let overdetermined_sets = overdetermined(entities, constraints);
    let cyclic = cycle_members(entities.len(), constraints);

    let determination = if !overdetermined_sets.is_empty() || remaining < 0 {
        Determination::OverDetermined
    } else if remaining > 0 {
        Determination::UnderDetermined
    } else {
        Determination::WellDetermined
    };

    StructuralReport {
        total_dof,
        dof_removed: removed,
        dof_remaining: remaining,
        determination,
        subsystems,
        overdetermined_sets,
        cyclic,
    }
}

/// Union-find split of the system into independent subsystems.
pub fn connected_components(
    entity_count: usize,
    constraints: &[SolverConstraint],
) -> Vec<Subsystem> {
    let mut parent: Vec<usize> = (0..entity_count).collect();
    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }
    for c in constraints {
        for pair in c.entities.windows(2) {
            let (a, b) = (find(&mut parent, pair[0]), find(&mut parent, pair[1]));
            parent[a] = b;
        }
    }

    let mut subsystems: Vec<Subsystem> = Vec::new();
    let mut root_index: Vec<Option<usize>> = vec![None; entity_count];
    for i in 0..entity_count {
        let root = find(&mut parent, i);
        let idx = match root_index[root] {
            Some(idx) => idx,
            None => {
                subsystems.push(Subsystem {
                    entities: Vec::new(),
                    constraints: Vec::new(),
                });
                root_index[root] = Some(subsystems.len() - 1);
                subsystems.len() - 1
            }
        };
        subsystems[idx].entities.push(i);
    }
    for (ci, c) in constraints.iter().enumerate() {
        if let Some(&first) = c.entities.first() {
            let root = find(&mut parent, first);
            if let Some(idx) = root_index[root] {
                subsystems[idx].constraints.push(ci);
            }
        }
    }
    // Drop subsystems with no constraints: free entities need no solving.
    subsystems.retain(|s| !s.constraints.is_empty());
    subsystems
}

/// Equation-to-parameter maximum matching (Kuhn's augmenting paths).
/// Returns, per unmatched equation, the minimal over-determining
/// constraint set found by alternating reachability.
fn overdetermined(
    entities: &[SolverEntity],
    constraints: &[SolverConstraint],
) -> Vec<Vec<ConstraintId>> {
    let layout = ParamLayout::new(entities);
    // Equation rows: (owning constraint index, adjacent parameter columns).
    let mut rows: Vec<(usize, Vec<usize>)> = Vec::new();
    for (ci, c) in constraints.iter().enumerate() {
        let kinds: Vec<_> = c.entities.iter().map(|&i| entities[i].kind).collect();
        let k = dof_removed(c.kind, &kinds) as usize;
        let mut cols = Vec::new();
        for &ei in &c.entities {
            let off = layout.offsets[ei];
            for j in 0..entities[ei].params.len() {
                cols.push(off + j);
            }
        }
        for _ in 0..k {
            rows.push((ci, cols.clone()));
        }
    }

    let n_cols = layout.total;
    let mut col_match: Vec<Option<usize>> = vec![None; n_cols];

    fn try_augment(
        row: usize,
        rows: &[(usize, Vec<usize>)],
        col_match: &mut Vec<Option<usize>>,
        visited: &mut Vec<bool>,
    ) -> bool {
        for &col in &rows[row].1 {
            if visited[col] {
                continue;
            }
            visited[col] = true;
            match col_match[col] {
                None => {
                    col_match[col] = Some(row);
                    return true;
                }
                Some(other) => {
                    if try_augment(other, rows, col_match, visited) {
                        col_match[col] = Some(row);
                        return true;
                    }
                }
            }
        }
        false
    }

    let mut unmatched_rows = Vec::new();
    for row in 0..rows.len() {
        let mut visited = vec![false; n_cols];
        if !try_augment(row, &rows, &mut col_match, &mut visited) {
            unmatched_rows.push(row);
        }
    }

    let mut sets: Vec<Vec<ConstraintId>> = Vec::new();
    let mut seen: HashSet<Vec<ConstraintId>> = HashSet::new();
    for row in unmatched_rows {
        // Alternating reachability from the unmatched equation: every row
        // reachable via matched columns competes for the same parameters.
        let mut reachable_rows: BTreeSet<usize> = BTreeSet::new();
        let mut visited_cols = vec![false; n_cols];
        let mut stack = vec![row];
        while let Some(r) = stack.pop() {
            if !reachable_rows.insert(r) {
                continue;
            }
            for &col in &rows[r].1 {
                if visited_cols[col] {
                    continue;
                }
                visited_cols[col] = true;
                if let Some(other) = col_match[col] {
                    stack.push(other);
                }
            }
        }
        let mut ids: Vec<ConstraintId> = reachable_rows
            .into_iter()
            .map(|r| constraints[rows[r].0].id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        if seen.insert(ids.clone()) {
            sets.push(ids);
        }
    }
    sets
}

/// Constraints that sit on a cycle of the entity/constraint adjacency
/// graph. A cycle of length ≥ 2 closes a rigid chain and is a potential
/// conflict source worth surfacing to callers.
fn cycle_members(entity_count: usize, constraints: &[SolverConstraint]) -> Vec<ConstraintId> {
    // An edge (constraint) is on a cycle iff removing it keeps its
    // endpoints connected.
    let mut on_cycle = Vec::new();
    for (skip, c) in constraints.iter().enumerate() {
        if c.entities.len() < 2 || c.entities[0] == c.entities[1] {
            continue;
        }
        let (from, to) = (c.entities[0], c.entities[1]);
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); entity_count];
        for (ci, other) in constraints.iter().enumerate() {
            if ci == skip {
                continue;
            }
            for pair in other.entities.windows(2) {
                adjacency[pair[0]].push(pair[1]);
                adjacency[pair[1]].push(pair[0]);
            }
        }
        let mut visited = vec![false; entity_count];
        let mut stack = vec![from];
        let mut connected = false;
        while let Some(v) = stack.pop() {
            if v == to {
                connected = true;
                break;
            }
            if visited[v] {
                continue;
            }
            visited[v] = true;
            stack.extend(adjacency[v].iter().copied());
        }
        if connected {
            on_cycle.push(c.id.clone());
        }
    }
    on_cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_types::{ConstraintId, ConstraintKind, EntityId, EntityKind};

    fn point(id: &str, x: f64, y: f64) -> SolverEntity {
        SolverEntity {
            id: EntityId(format!("main:point2d_{id}")),
            kind: EntityKind::Point2d,
            params: vec![x, y],
        }
    }

    fn distance(id: &str, a: usize, b: usize, value: f64) -> SolverConstraint {
        SolverConstraint {
            id: ConstraintId(format!("main:constraint_{id}")),
            kind: ConstraintKind::Distance,
            entities: vec![a, b],
            value: Some(value),
            tolerance: 1e-4,
        }
    }

    #[test]
    fn census_counts_dofs() {
        let entities = vec![point("a", 0.0, 0.0), point("b", 1.0, 0.0)];
        let constraints = vec![distance("d", 0, 1, 5.0)];
        let report = analyze(&entities, &constraints);
        assert_eq!(report.total_dof, 4);
        assert_eq!(report.dof_removed, 1);
        assert_eq!(report.dof_remaining, 3);
        assert_eq!(report.determination, Determination::UnderDetermined);
    }

    #[test]
    fn disconnected_pairs_make_two_subsystems() {
        let entities = vec![
            point("a", 0.0, 0.0),
            point("b", 1.0, 0.0),
            point("c", 5.0, 5.0),
            point("d", 6.0, 5.0),
        ];
        let constraints = vec![distance("ab", 0, 1, 2.0), distance("cd", 2, 3, 2.0)];
        let report = analyze(&entities, &constraints);
        assert_eq!(report.subsystems.len(), 2);
    }

    #[test]
    fn duplicate_coincident_is_structurally_overdetermined() {
        // Three coincident constraints over two 2d points: 4 params but
        // 6 equations, so matching must leave rows unmatched.
        let entities = vec![point("a", 0.0, 0.0), point("b", 1.0, 0.0)];
        let mk = |id: &str| SolverConstraint {
            id: ConstraintId(format!("main:constraint_{id}")),
            kind: ConstraintKind::Coincident,
            entities: vec![0, 1],
            value: None,
            tolerance: 1e-4,
        };
        let constraints = vec![mk("c1"), mk("c2"), mk("c3")];
        let report = analyze(&entities, &constraints);
        assert_eq!(report.determination, Determination::OverDetermined);
        assert!(!report.overdetermined_sets.is_empty());
        let set = &report.overdetermined_sets[0];
        assert!(set.len() >= 2, "minimal set should involve both duplicates");
    }

    #[test]
    fn triangle_of_distances_is_cyclic() {
        let entities = vec![
            point("a", 0.0, 0.0),
            point("b", 1.0, 0.0),
            point("c", 0.0, 1.0),
        ];
        let constraints = vec![
            distance("ab", 0, 1, 1.0),
            distance("bc", 1, 2, 1.0),
            distance("ca", 2, 0, 1.0),
        ];
        let report = analyze(&entities, &constraints);
        assert_eq!(report.cyclic.len(), 3);
    }
}
