use crate::clique::Clique;
use crate::{check_cost, check_members, CliqueId, Energy, Label, NodeId, SosError};

/// Multi-label energy: a constant, per-node unary costs and higher-order cliques.
#[derive(Debug)]
pub struct MultiLabelEnergy {
    num_labels: usize,
    constant: Energy,
    unary: Vec<Vec<Energy>>,
    cliques: Vec<Box<dyn Clique>>,
}

impl MultiLabelEnergy {
    pub fn new(num_labels: usize) -> Result<Self, SosError> {
        if num_labels == 0 {
            return Err(SosError::InvalidLabelCount { num_labels });
        }
        Ok(Self {
            num_labels,
            constant: 0,
            unary: Vec::new(),
            cliques: Vec::new(),
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn node_count(&self) -> usize {
        self.unary.len()
    }

    pub fn add_node(&mut self, count: usize) -> NodeId {
        let first = self.unary.len();
        self.unary
            .resize_with(first + count, || vec![0; self.num_labels]);
        NodeId(first)
    }

    pub fn add_constant_term(&mut self, c: Energy) {
        self.constant += c;
    }

    pub fn constant_term(&self) -> Energy {
        self.constant
    }

    /// Adds `coeffs[l]` to the cost of `node` taking label `l`.
    pub fn add_unary_term(&mut self, node: NodeId, coeffs: &[Energy]) -> Result<(), SosError> {
        if node.0 >= self.node_count() {
            return Err(SosError::NodeOutOfRange {
                node: node.0,
                node_count: self.node_count(),
            });
        }
        if coeffs.len() != self.num_labels {
            return Err(SosError::TableSize {
                expected: self.num_labels,
                actual: coeffs.len(),
            });
        }
        for &c in coeffs {
            check_cost(c)?;
        }
        for (cost, &c) in self.unary[node.0].iter_mut().zip(coeffs) {
            *cost += c;
        }
        Ok(())
    }

    pub fn unary(&self, node: NodeId) -> &[Energy] {
        &self.unary[node.0]
    }

    pub fn add_clique(&mut self, clique: Box<dyn Clique>) -> Result<CliqueId, SosError> {
        check_members(clique.nodes(), self.node_count())?;
        if let Some(supported) = clique.num_labels() {
            if supported < self.num_labels {
                return Err(SosError::InvalidInput(format!(
                    "clique evaluates {supported} labels, energy has {}",
                    self.num_labels
                )));
            }
        }
        let zero_cost = clique.energy(&vec![0; clique.size()]);
        if zero_cost < 0 {
            return Err(SosError::InvalidInput(format!(
                "clique energies must be non-negative, got {zero_cost}"
            )));
        }
        self.cliques.push(clique);
        Ok(CliqueId(self.cliques.len() - 1))
    }

    pub fn cliques(&self) -> &[Box<dyn Clique>] {
        &self.cliques
    }

    /// For every node, the `(clique, position)` pairs it takes part in.
    pub fn node_cliques(&self) -> Vec<Vec<(usize, usize)>> {
        let mut lists = vec![Vec::new(); self.node_count()];
        for (c, clique) in self.cliques.iter().enumerate() {
            for (pos, node) in clique.nodes().iter().enumerate() {
                lists[node.0].push((c, pos));
            }
        }
        lists
    }

    /// Largest curvature bound over all cliques, at least 1.
    pub fn rho(&self) -> f64 {
        self.cliques.iter().map(|c| c.rho()).fold(1.0, f64::max)
    }

    pub fn validate_labeling(&self, labels: &[Label]) -> Result<(), SosError> {
        if labels.len() != self.node_count() {
            return Err(SosError::InvalidInput(format!(
                "labeling has {} entries for {} nodes",
                labels.len(),
                self.node_count()
            )));
        }
        let out_of_range = labels.iter().enumerate().find(|(_, &l)| l >= self.num_labels);
        if let Some((node, &label)) = out_of_range {
            return Err(SosError::LabelOutOfRange {
                node,
                label,
                num_labels: self.num_labels,
            });
        }
        Ok(())
    }

    /// Cost of clique `c` under a labeling of the whole problem.
    pub fn clique_energy(&self, c: usize, labels: &[Label], buf: &mut Vec<Label>) -> Energy {
        let clique = &self.cliques[c];
        buf.clear();
        buf.extend(clique.nodes().iter().map(|n| labels[n.0]));
        clique.energy(buf)
    }

    pub fn compute_energy(&self, labels: &[Label]) -> Energy {
        let mut buf = Vec::new();
        let higher: Energy = (0..self.cliques.len())
            .map(|c| self.clique_energy(c, labels, &mut buf))
            .sum();
        let unary: Energy = labels
            .iter()
            .zip(&self.unary)
            .map(|(&l, costs)| costs[l])
            .sum();
        self.constant + unary + higher
    }

    /// Labeling that minimizes every unary term on its own; ties go to the lowest label.
    pub fn unary_minimizer(&self) -> Vec<Label> {
        self.unary
            .iter()
            .map(|costs| {
                let mut best = 0;
                for (l, &c) in costs.iter().enumerate() {
                    if c < costs[best] {
                        best = l;
                    }
                }
                best
            })
            .collect()
    }
}
