use crate::{check_cost, Assignment, Energy, Label, NodeId, SosError, MAX_CLIQUE_SIZE};

/// Linear part removed from a clique table by [`EnergyTableClique::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalization {
    pub constant: Energy,
    /// Per-member cost of flipping from 1 to 0; folded into the unary terms.
    pub marginals: Vec<Energy>,
}

/// Binary higher-order term: a cost for every subset of members labeled 1,
/// plus the flow currently routed through the clique.
#[derive(Debug)]
pub struct EnergyTableClique {
    nodes: Vec<NodeId>,
    table: Vec<Energy>,
    alpha: Vec<Energy>,
}

impl EnergyTableClique {
    pub fn new(nodes: Vec<NodeId>, table: Vec<Energy>) -> Result<Self, SosError> {
        let k = nodes.len();
        if k > MAX_CLIQUE_SIZE {
            return Err(SosError::CliqueTooLarge {
                size: k,
                max: MAX_CLIQUE_SIZE,
            });
        }
        if table.len() != 1 << k {
            return Err(SosError::TableSize {
                expected: 1 << k,
                actual: table.len(),
            });
        }
        for &value in &table {
            check_cost(value)?;
        }
        Ok(Self {
            alpha: vec![0; k],
            nodes,
            table,
        })
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn table(&self) -> &[Energy] {
        &self.table
    }

    /// Flow pushed out of each member through this clique.
    pub fn alpha(&self) -> &[Energy] {
        &self.alpha
    }

    pub fn energy(&self, assignment: Assignment) -> Energy {
        self.table[assignment as usize]
    }

    /// Energy under a labeling of the whole graph.
    pub fn energy_of(&self, labels: &[Label]) -> Energy {
        self.energy(self.assignment_of(labels))
    }

    pub fn assignment_of(&self, labels: &[Label]) -> Assignment {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| labels[node.0] == 1)
            .fold(0, |acc, (idx, _)| acc | (1 << idx))
    }

    /// Subtracts a constant and a modular function so that the table is zero
    /// at the empty and the full set.
    ///
    /// The marginals follow the chain that clears bit 0, then bit 1, and so
    /// on, starting from the full set. For a submodular table the remainder
    /// is non-negative everywhere. An already normalized table yields a zero
    /// `Normalization` and is left untouched.
    pub fn normalize(&mut self) -> Normalization {
        let k = self.size();
        let full = self.table.len() - 1;
        let constant = self.table[full];
        let mut marginals = Vec::with_capacity(k);
        let mut assignment = full;
        for i in 0..k {
            let next = assignment ^ (1 << i);
            marginals.push(self.table[assignment] - self.table[next]);
            assignment = next;
        }
        for (s, value) in self.table.iter_mut().enumerate() {
            *value -= constant;
            for (i, &marginal) in marginals.iter().enumerate() {
                if s & (1 << i) == 0 {
                    *value += marginal;
                }
            }
        }
        Normalization {
            constant,
            marginals,
        }
    }

    /// Residual capacity of the arc from member `u` to member `v`:
    /// `min over S ∋ u, S ∌ v of table[S] - alpha(S)`.
    pub fn exchange_capacity(&self, u: usize, v: usize) -> Energy {
        let k = self.size();
        if u == v || k < 2 {
            return Energy::MAX;
        }
        let rest: Vec<usize> = (0..k).filter(|&i| i != u && i != v).collect();
        let base = 1usize << u;
        let mut best = Energy::MAX;
        for sub in 0..(1usize << rest.len()) {
            let mut subset = base;
            let mut alpha_sum = self.alpha[u];
            for (bit, &member) in rest.iter().enumerate() {
                if sub & (1 << bit) != 0 {
                    subset |= 1 << member;
                    alpha_sum += self.alpha[member];
                }
            }
            best = best.min(self.table[subset] - alpha_sum);
        }
        best
    }

    /// Routes `delta` units from member `u` to member `v`.
    pub fn push(&mut self, u: usize, v: usize, delta: Energy) {
        assert!(delta > 0, "clique push of non-positive amount {delta}");
        self.alpha[u] += delta;
        self.alpha[v] -= delta;
    }

    pub fn reset_flow(&mut self) {
        self.alpha.iter_mut().for_each(|a| *a = 0);
    }

    /// Reduced cost `table[S] - alpha(S)` of a member subset.
    pub(crate) fn residual(&self, subset: usize) -> Energy {
        let alpha_sum: Energy = self
            .alpha
            .iter()
            .enumerate()
            .filter(|(i, _)| subset & (1 << i) != 0)
            .map(|(_, a)| *a)
            .sum();
        self.table[subset] - alpha_sum
    }
}
