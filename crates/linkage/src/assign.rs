//! Contention resolution between sources competing for the same targets.
//!
//! Candidates form a bipartite graph; each connected component is one
//! neighbourhood. Small neighbourhoods are solved exactly with the
//! Hungarian (Kuhn–Munkres) algorithm. Neighbourhoods larger than
//! `exact_solver_limit` fall back to a greedy pass that repeatedly takes the
//! cheapest remaining pair. The greedy pass is an approximation and can miss
//! the optimum.

use std::collections::{BTreeMap, BTreeSet};

use ordered_float::OrderedFloat;

use crate::matcher::Candidate;
use crate::model::MatchMethod;

/// Cost for a disallowed pair. Larger than any real cost, finite so the
/// solver's potentials stay well-defined.
const DISALLOWED: f64 = 1.0e6;

#[derive(Debug, Clone)]
pub struct Assignment {
    pub candidate: Candidate,
    pub method: MatchMethod,
    /// Distinct sources in the neighbourhood.
    pub group_sources: usize,
    /// Distinct targets in the neighbourhood.
    pub group_targets: usize,
}

impl Assignment {
    pub fn cardinality(&self) -> usize {
        self.group_sources.max(self.group_targets)
    }

    pub fn is_single(&self) -> bool {
        self.group_sources == 1 && self.group_targets == 1
    }
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub assignments: Vec<Assignment>,
    /// Sources that had viable candidates but received no target.
    pub infeasible: Vec<usize>,
}

/// Resolve all candidates of one batch into at most one target per source
/// and one source per target.
///
/// In a contended neighbourhood a candidate without a capacity ratio must
/// carry `name_score >= min_name_score`; a lone source/target pair needs no
/// name agreement.
pub fn resolve(candidates: Vec<Candidate>, exact_solver_limit: usize, min_name_score: f64) -> Resolution {
    let mut out = Resolution::default();

    for mut group in neighbourhoods(candidates) {
        let sources: BTreeSet<usize> = group.iter().map(|c| c.source).collect();
        let targets: BTreeSet<usize> = group.iter().map(|c| c.target).collect();
        let (n_src, n_tgt) = (sources.len(), targets.len());

        if n_src == 1 && n_tgt == 1 {
            out.assignments.push(Assignment {
                candidate: group.swap_remove(0),
                method: MatchMethod::SingleCandidate,
                group_sources: 1,
                group_targets: 1,
            });
            continue;
        }

        let viable: Vec<Candidate> = group
            .into_iter()
            .filter(|c| {
                c.capacity_ratio.is_some() || c.name_score.is_some_and(|s| s >= min_name_score)
            })
            .collect();

        let n = n_src.max(n_tgt);
        let (chosen, method) = if n <= exact_solver_limit {
            (solve_exact(&viable, &sources, &targets), MatchMethod::Hungarian)
        } else {
            (solve_greedy(&viable), MatchMethod::Greedy)
        };
        tracing::debug!(sources = n_src, targets = n_tgt, %method, assigned = chosen.len(), "neighbourhood resolved");

        let assigned: BTreeSet<usize> = chosen.iter().map(|c| c.source).collect();
        out.infeasible.extend(sources.iter().filter(|s| !assigned.contains(s)));
        out.assignments.extend(chosen.into_iter().map(|candidate| Assignment {
            candidate,
            method,
            group_sources: n_src,
            group_targets: n_tgt,
        }));
    }

    out.assignments.sort_by_key(|a| a.candidate.source);
    out.infeasible.sort_unstable();
    out
}

/// Connected components of the candidate graph, ordered by their smallest
/// source index.
fn neighbourhoods(candidates: Vec<Candidate>) -> Vec<Vec<Candidate>> {
    // Union-find over source nodes; targets are mapped to the first source
    // that reached them.
    let mut parent: BTreeMap<usize, usize> = BTreeMap::new();
    let mut target_owner: BTreeMap<usize, usize> = BTreeMap::new();

    fn find(parent: &mut BTreeMap<usize, usize>, x: usize) -> usize {
        let mut root = x;
        while let Some(&p) = parent.get(&root) {
            if p == root {
                break;
            }
            root = p;
        }
        let mut cur = x;
        while cur != root {
            let next = parent[&cur];
            parent.insert(cur, root);
            cur = next;
        }
        root
    }

    for c in &candidates {
        parent.entry(c.source).or_insert(c.source);
        match target_owner.get(&c.target) {
            Some(&owner) => {
                let a = find(&mut parent, owner);
                let b = find(&mut parent, c.source);
                if a != b {
                    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                    parent.insert(hi, lo);
                }
            }
            None => {
                target_owner.insert(c.target, c.source);
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<Candidate>> = BTreeMap::new();
    for c in candidates {
        let root = find(&mut parent, c.source);
        groups.entry(root).or_default().push(c);
    }
    groups.into_values().collect()
}

fn solve_exact(
    viable: &[Candidate],
    sources: &BTreeSet<usize>,
    targets: &BTreeSet<usize>,
) -> Vec<Candidate> {
    let rows: Vec<usize> = sources.iter().copied().collect();
    let cols: Vec<usize> = targets.iter().copied().collect();
    let n = rows.len().max(cols.len());

    // Padding rows/columns cost 0: with n = max(rows, cols) only the larger
    // side is ever padded, so every real row or column on the smaller side
    // is assigned and DISALLOWED pairs are avoided whenever possible.
    let mut cost = vec![vec![0.0; n]; n];
    for row in cost.iter_mut().take(rows.len()) {
        for cell in row.iter_mut().take(cols.len()) {
            *cell = DISALLOWED;
        }
    }
    let mut pick: BTreeMap<(usize, usize), &Candidate> = BTreeMap::new();
    for c in viable {
        let (Ok(r), Ok(k)) = (rows.binary_search(&c.source), cols.binary_search(&c.target)) else {
            continue;
        };
        cost[r][k] = c.cost;
        pick.insert((r, k), c);
    }

    hungarian(&cost)
        .into_iter()
        .enumerate()
        .filter_map(|(r, k)| pick.get(&(r, k)).map(|c| (*c).clone()))
        .collect()
}

fn solve_greedy(viable: &[Candidate]) -> Vec<Candidate> {
    let mut order: Vec<&Candidate> = viable.iter().collect();
    order.sort_by_key(|c| (OrderedFloat(c.cost), c.source, c.target));

    let mut used_sources = BTreeSet::new();
    let mut used_targets = BTreeSet::new();
    let mut chosen = Vec::new();
    for c in order {
        if used_sources.contains(&c.source) || used_targets.contains(&c.target) {
            continue;
        }
        used_sources.insert(c.source);
        used_targets.insert(c.target);
        chosen.push(c.clone());
    }
    chosen
}

/// Minimum-cost perfect assignment on a square matrix of finite costs.
/// Returns `assignment[row] = column`. O(n³).
pub fn hungarian(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    if n == 0 {
        return Vec::new();
    }

    // 1-indexed potentials; column 0 is the virtual start column.
    let mut u = vec![0.0; n + 1];
    let mut v = vec![0.0; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(source: usize, target: usize, cost: f64) -> Candidate {
        Candidate {
            source,
            target,
            distance_km: 0.5,
            capacity_ratio: Some(cost.exp()),
            name_score: None,
            cost,
        }
    }

    fn pairs(res: &Resolution) -> Vec<(usize, usize)> {
        res.assignments
            .iter()
            .map(|a| (a.candidate.source, a.candidate.target))
            .collect()
    }

    fn brute_force(cost: &[Vec<f64>]) -> f64 {
        fn go(row: usize, cost: &[Vec<f64>], used: &mut Vec<bool>) -> f64 {
            if row == cost.len() {
                return 0.0;
            }
            let mut best = f64::INFINITY;
            for c in 0..cost.len() {
                if !used[c] {
                    used[c] = true;
                    best = best.min(cost[row][c] + go(row + 1, cost, used));
                    used[c] = false;
                }
            }
            best
        }
        go(0, cost, &mut vec![false; cost.len()])
    }

    #[test]
    fn hungarian_matches_brute_force() {
        let matrices = vec![
            vec![vec![4.0, 1.0, 3.0], vec![2.0, 0.0, 5.0], vec![3.0, 2.0, 2.0]],
            vec![
                vec![9.0, 2.0, 7.0, 8.0],
                vec![6.0, 4.0, 3.0, 7.0],
                vec![5.0, 8.0, 1.0, 8.0],
                vec![7.0, 6.0, 9.0, 4.0],
            ],
            vec![vec![0.5]],
        ];
        for m in matrices {
            let a = hungarian(&m);
            let total: f64 = a.iter().enumerate().map(|(r, &c)| m[r][c]).sum();
            assert!((total - brute_force(&m)).abs() < 1e-9, "matrix {m:?}");
            let mut cols = a.clone();
            cols.sort_unstable();
            cols.dedup();
            assert_eq!(cols.len(), m.len());
        }
    }

    #[test]
    fn single_pair_accepted_without_name() {
        let mut c = cand(0, 7, 0.5);
        c.capacity_ratio = None;
        let res = resolve(vec![c], 8, 0.5);
        assert_eq!(pairs(&res), vec![(0, 7)]);
        assert_eq!(res.assignments[0].method, MatchMethod::SingleCandidate);
        assert!(res.assignments[0].is_single());
    }

    #[test]
    fn contended_target_goes_to_cheaper_source() {
        let res = resolve(vec![cand(0, 0, 0.30), cand(1, 0, 0.03)], 8, 0.5);
        assert_eq!(pairs(&res), vec![(1, 0)]);
        assert_eq!(res.infeasible, vec![0]);
        assert_eq!(res.assignments[0].method, MatchMethod::Hungarian);
        assert_eq!(res.assignments[0].cardinality(), 2);
    }

    #[test]
    fn exact_solver_beats_first_found() {
        // Source 0 prefers target 0, but only source 0 can use target 1.
        let cands = vec![cand(0, 0, 0.01), cand(0, 1, 0.20), cand(1, 0, 0.05)];
        let res = resolve(cands.clone(), 8, 0.5);
        assert_eq!(pairs(&res), vec![(0, 1), (1, 0)]);
        assert!(res.infeasible.is_empty());

        // The greedy fallback takes the cheapest pair first and strands source 1.
        let greedy = resolve(cands, 1, 0.5);
        assert_eq!(pairs(&greedy), vec![(0, 0)]);
        assert_eq!(greedy.infeasible, vec![1]);
        assert_eq!(greedy.assignments[0].method, MatchMethod::Greedy);
    }

    #[test]
    fn contended_unknown_capacity_needs_name() {
        let mut weak = cand(0, 0, 0.69);
        weak.capacity_ratio = None;
        weak.name_score = Some(0.2);
        let mut named = cand(1, 0, 0.69);
        named.capacity_ratio = None;
        named.name_score = Some(1.0);
        let res = resolve(vec![weak, named], 8, 0.5);
        assert_eq!(pairs(&res), vec![(1, 0)]);
        assert_eq!(res.infeasible, vec![0]);
    }

    #[test]
    fn disjoint_neighbourhoods_resolved_independently() {
        let res = resolve(
            vec![cand(0, 0, 0.1), cand(1, 5, 0.1), cand(2, 5, 0.2), cand(3, 9, 0.1)],
            8,
            0.5,
        );
        assert_eq!(pairs(&res), vec![(0, 0), (1, 5), (3, 9)]);
        assert_eq!(res.infeasible, vec![2]);
        let methods: Vec<MatchMethod> = res.assignments.iter().map(|a| a.method).collect();
        assert_eq!(
            methods,
            vec![MatchMethod::SingleCandidate, MatchMethod::Hungarian, MatchMethod::SingleCandidate]
        );
    }

    #[test]
    fn chained_contention_forms_one_group() {
        // 0-0, 1-0, 1-1, 2-1: one component of 3 sources / 2 targets.
        let res = resolve(
            vec![cand(0, 0, 0.1), cand(1, 0, 0.12), cand(1, 1, 0.1), cand(2, 1, 0.05)],
            8,
            0.5,
        );
        assert_eq!(res.assignments.len(), 2);
        assert!(res.assignments.iter().all(|a| a.group_sources == 3 && a.group_targets == 2));
        assert_eq!(pairs(&res), vec![(0, 0), (2, 1)]);
        assert_eq!(res.infeasible, vec![1]);
    }
}
