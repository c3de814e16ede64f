use crate::Energy;

/// Returns `true` if `table` (indexed by member subsets of a `k`-clique) is submodular.
///
/// Checks the local exchange inequalities
/// `f(S + i) + f(S + j) >= f(S + i + j) + f(S)`, which are equivalent to the
/// general definition.
pub fn is_submodular(k: usize, table: &[Energy]) -> bool {
    debug_assert_eq!(table.len(), 1 << k);
    first_violation(k, table).is_none()
}

fn first_violation(k: usize, table: &[Energy]) -> Option<(usize, usize, usize, Energy)> {
    for s in 0..table.len() {
        for i in 0..k {
            if s & (1 << i) != 0 {
                continue;
            }
            for j in (i + 1)..k {
                if s & (1 << j) != 0 {
                    continue;
                }
                let si = s | (1 << i);
                let sj = s | (1 << j);
                let deficit = (table[si | sj] + table[s]) - (table[si] + table[sj]);
                if deficit > 0 {
                    return Some((s, i, j, deficit));
                }
            }
        }
    }
    None
}

/// Submodular function `g >= f` with `g(∅) = f(∅)` and `g(V) = f(V)`.
///
/// Violations are repaired by raising one of the two middle sets of the
/// failing square; those are never the empty or the full set. If the repair
/// does not settle within the sweep budget, every set other than the two
/// corners takes the table maximum instead.
pub fn submodular_upper_bound(k: usize, table: &[Energy]) -> Vec<Energy> {
    debug_assert_eq!(table.len(), 1 << k);
    let mut bound = table.to_vec();
    if k < 2 || is_submodular(k, table) {
        return bound;
    }
    let max_sweeps = k * table.len();
    for _ in 0..max_sweeps {
        let mut changed = false;
        for s in 0..bound.len() {
            for i in 0..k {
                if s & (1 << i) != 0 {
                    continue;
                }
                for j in (i + 1)..k {
                    if s & (1 << j) != 0 {
                        continue;
                    }
                    let si = s | (1 << i);
                    let sj = s | (1 << j);
                    let deficit = (bound[si | sj] + bound[s]) - (bound[si] + bound[sj]);
                    if deficit > 0 {
                        bound[si] += deficit;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            debug_assert!(is_submodular(k, &bound));
            return bound;
        }
    }
    constant_envelope(k, table)
}

fn constant_envelope(k: usize, table: &[Energy]) -> Vec<Energy> {
    let full = (1usize << k) - 1;
    let ceiling = table.iter().copied().max().unwrap_or(0);
    (0..table.len())
        .map(|s| if s == 0 || s == full { table[s] } else { ceiling })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn dominates(bound: &[Energy], table: &[Energy]) -> bool {
        bound.iter().zip(table).all(|(g, f)| g >= f)
    }

    #[test]
    fn recognizes_cut_functions() {
        // two-node cut: f(∅)=f(V)=0, f({0})=f({1})=3
        assert!(is_submodular(2, &[0, 3, 3, 0]));
        assert!(!is_submodular(2, &[3, 0, 0, 3]));
    }

    #[test]
    fn modular_tables_are_submodular() {
        let table: Vec<Energy> = (0..8).map(|s: usize| s.count_ones() as Energy * 5).collect();
        assert!(is_submodular(3, &table));
    }

    #[test]
    fn upper_bound_leaves_submodular_tables_alone() {
        let table = vec![0, 3, 1, 2, 0, 2, 0, 0];
        assert!(is_submodular(3, &table));
        assert_eq!(submodular_upper_bound(3, &table), table);
    }

    #[test]
    fn upper_bound_repairs_pairwise_violation() {
        let table = vec![4, 0, 1, 4];
        let bound = submodular_upper_bound(2, &table);
        assert!(is_submodular(2, &bound));
        assert!(dominates(&bound, &table));
        assert_eq!(bound[0], 4);
        assert_eq!(bound[3], 4);
    }

    #[test]
    fn upper_bound_properties_on_random_tables() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..500 {
            let k = rng.gen_range(1..=5);
            let table: Vec<Energy> = (0..(1 << k)).map(|_| rng.gen_range(-20..=20)).collect();
            let bound = submodular_upper_bound(k, &table);
            let full = (1 << k) - 1;
            assert!(is_submodular(k, &bound), "table {table:?} bound {bound:?}");
            assert!(dominates(&bound, &table));
            assert_eq!(bound[0], table[0]);
            assert_eq!(bound[full], table[full]);
        }
    }

    #[test]
    fn constant_envelope_is_submodular() {
        let table = vec![0, -7, 9, -3, 2, 11, -1, 5];
        let envelope = constant_envelope(3, &table);
        assert!(is_submodular(3, &envelope));
        assert!(dominates(&envelope, &table));
        assert_eq!(envelope[7], 5);
    }
}
