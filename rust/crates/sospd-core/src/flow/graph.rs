use crate::flow::clique::EnergyTableClique;
use crate::submodular::is_submodular;
use crate::{check_cost, check_members, CliqueId, Energy, Label, NodeId, SosError};

/// Binary energy as a flow network: terminal capacities per node and
/// higher-order cliques acting as hyperedges.
///
/// Labels follow the cut: label 1 means the node ends on the source side.
/// A node pays `c_si` when it takes label 0 and `c_it` when it takes label 1.
#[derive(Debug, Default)]
pub struct FlowGraph {
    pub(crate) c_si: Vec<Energy>,
    pub(crate) c_it: Vec<Energy>,
    pub(crate) phi_si: Vec<Energy>,
    pub(crate) phi_it: Vec<Energy>,
    pub(crate) cliques: Vec<EnergyTableClique>,
    pub(crate) neighbors: Vec<Vec<usize>>,
    pub(crate) labels: Vec<Label>,
    constant: Energy,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` nodes and returns the id of the first one.
    pub fn add_node(&mut self, count: usize) -> NodeId {
        let first = self.node_count();
        let total = first + count;
        self.c_si.resize(total, 0);
        self.c_it.resize(total, 0);
        self.phi_si.resize(total, 0);
        self.phi_it.resize(total, 0);
        self.neighbors.resize_with(total, Vec::new);
        self.labels.resize(total, 0);
        NodeId(first)
    }

    pub fn node_count(&self) -> usize {
        self.c_si.len()
    }

    pub fn add_constant_term(&mut self, c: Energy) {
        self.constant += c;
    }

    pub fn constant_term(&self) -> Energy {
        self.constant
    }

    /// Adds cost `e0` for label 0 and `e1` for label 1.
    ///
    /// Negative costs are shifted into the constant so that both terminal
    /// capacities stay non-negative.
    pub fn add_unary_term(&mut self, node: NodeId, e0: Energy, e1: Energy) -> Result<(), SosError> {
        self.check_node(node)?;
        check_cost(e0)?;
        check_cost(e1)?;
        self.add_unary_unchecked(node.0, e0, e1);
        Ok(())
    }

    fn add_unary_unchecked(&mut self, i: usize, mut e0: Energy, mut e1: Energy) {
        if e0 < 0 {
            self.constant += e0;
            e1 -= e0;
            e0 = 0;
        }
        if e1 < 0 {
            self.constant += e1;
            e0 -= e1;
            e1 = 0;
        }
        self.c_si[i] += e0;
        self.c_it[i] += e1;
    }

    /// Adds a submodular clique over `nodes` and normalizes it right away.
    ///
    /// `table[a]` is the cost when bit `i` of `a` marks member `i` as labeled 1.
    pub fn add_clique(
        &mut self,
        nodes: &[NodeId],
        table: Vec<Energy>,
    ) -> Result<CliqueId, SosError> {
        check_members(nodes, self.node_count())?;
        let id = self.cliques.len();
        let mut clique = EnergyTableClique::new(nodes.to_vec(), table)?;
        if !is_submodular(clique.size(), clique.table()) {
            return Err(SosError::NotSubmodular { clique: id });
        }
        let norm = clique.normalize();
        self.constant += norm.constant;
        for (node, &marginal) in nodes.iter().zip(&norm.marginals) {
            self.add_unary_unchecked(node.0, -marginal, 0);
            self.neighbors[node.0].push(id);
        }
        self.cliques.push(clique);
        Ok(CliqueId(id))
    }

    pub fn cliques(&self) -> &[EnergyTableClique] {
        &self.cliques
    }

    pub fn neighbor_cliques(&self, node: NodeId) -> &[usize] {
        &self.neighbors[node.0]
    }

    /// Drops every unary term, keeping cliques and the constant.
    pub fn clear_unaries(&mut self) {
        self.c_si.iter_mut().for_each(|c| *c = 0);
        self.c_it.iter_mut().for_each(|c| *c = 0);
        self.reset_flow();
    }

    pub fn reset_flow(&mut self) {
        self.phi_si.iter_mut().for_each(|f| *f = 0);
        self.phi_it.iter_mut().for_each(|f| *f = 0);
        self.cliques.iter_mut().for_each(EnergyTableClique::reset_flow);
    }

    pub fn source_capacity(&self, node: NodeId) -> Energy {
        self.c_si[node.0]
    }

    pub fn sink_capacity(&self, node: NodeId) -> Energy {
        self.c_it[node.0]
    }

    /// Terminal flows within capacity and every clique arc with
    /// non-negative residual capacity.
    pub fn check_capacity_invariants(&self) -> bool {
        let terminals_ok = (0..self.node_count()).all(|i| {
            0 <= self.phi_si[i]
                && self.phi_si[i] <= self.c_si[i]
                && 0 <= self.phi_it[i]
                && self.phi_it[i] <= self.c_it[i]
        });
        terminals_ok
            && self.cliques.iter().all(|c| {
                (0..c.size()).all(|u| {
                    (0..c.size()).all(|v| u == v || c.exchange_capacity(u, v) >= 0)
                })
            })
    }

    /// Label of `node` after the last solve (0 or 1).
    pub fn label(&self, node: NodeId) -> Label {
        self.labels[node.0]
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn compute_energy(&self) -> Energy {
        self.compute_energy_of(&self.labels)
    }

    pub fn compute_energy_of(&self, labels: &[Label]) -> Energy {
        debug_assert_eq!(labels.len(), self.node_count());
        let unary: Energy = labels
            .iter()
            .enumerate()
            .map(|(i, &l)| if l == 1 { self.c_it[i] } else { self.c_si[i] })
            .sum();
        let higher: Energy = self.cliques.iter().map(|c| c.energy_of(labels)).sum();
        self.constant + unary + higher
    }

    fn check_node(&self, node: NodeId) -> Result<(), SosError> {
        if node.0 >= self.node_count() {
            return Err(SosError::NodeOutOfRange {
                node: node.0,
                node_count: self.node_count(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_node_returns_first_id() {
        let mut g = FlowGraph::new();
        assert_eq!(g.add_node(3), NodeId(0));
        assert_eq!(g.add_node(2), NodeId(3));
        assert_eq!(g.node_count(), 5);
    }

    #[test]
    fn negative_unaries_move_into_constant() {
        let mut g = FlowGraph::new();
        g.add_node(1);
        g.add_unary_term(NodeId(0), -4, 3).unwrap();
        assert_eq!(g.constant_term(), -4);
        assert_eq!(g.source_capacity(NodeId(0)), 0);
        assert_eq!(g.sink_capacity(NodeId(0)), 7);
        g.add_unary_term(NodeId(0), 2, -5).unwrap();
        assert_eq!(g.constant_term(), -9);
        assert_eq!(g.source_capacity(NodeId(0)), 7);
        assert_eq!(g.sink_capacity(NodeId(0)), 7);
        assert_eq!(g.compute_energy_of(&[0]), -2);
        assert_eq!(g.compute_energy_of(&[1]), -2);
    }

    #[test]
    fn clique_normalization_preserves_energy() {
        let table = vec![3, 6, 5, 6, 4, 6, 5, 5];
        let mut g = FlowGraph::new();
        g.add_node(3);
        g.add_clique(&[NodeId(0), NodeId(1), NodeId(2)], table.clone())
            .unwrap();
        for a in 0..8usize {
            let labels: Vec<Label> = (0..3).map(|i| (a >> i) & 1).collect();
            assert_eq!(g.compute_energy_of(&labels), table[a]);
        }
        assert!(g.cliques()[0].table().iter().all(|&v| v >= 0));
    }

    #[test]
    fn rejects_non_submodular_clique() {
        let mut g = FlowGraph::new();
        g.add_node(2);
        let err = g.add_clique(&[NodeId(0), NodeId(1)], vec![0, 1, 1, 5]).unwrap_err();
        assert_eq!(err, SosError::NotSubmodular { clique: 0 });
        assert!(g.cliques().is_empty());
        assert_eq!(g.constant_term(), 0);
    }

    #[test]
    fn rejects_bad_clique_members() {
        let mut g = FlowGraph::new();
        g.add_node(2);
        assert!(matches!(
            g.add_clique(&[NodeId(0), NodeId(2)], vec![0; 4]),
            Err(SosError::NodeOutOfRange { .. })
        ));
        assert!(matches!(
            g.add_clique(&[NodeId(1), NodeId(1)], vec![0; 4]),
            Err(SosError::DuplicateNode { node: 1 })
        ));
        assert!(matches!(
            g.add_unary_term(NodeId(5), 1, 1),
            Err(SosError::NodeOutOfRange { .. })
        ));
    }

    #[test]
    fn clear_unaries_keeps_cliques() {
        let mut g = FlowGraph::new();
        g.add_node(2);
        g.add_unary_term(NodeId(0), 5, 1).unwrap();
        g.add_clique(&[NodeId(0), NodeId(1)], vec![0, 2, 2, 0]).unwrap();
        g.clear_unaries();
        assert_eq!(g.source_capacity(NodeId(0)), 0);
        assert_eq!(g.cliques().len(), 1);
        assert_eq!(g.neighbor_cliques(NodeId(1)), &[0]);
        assert!(g.check_capacity_invariants());
    }
}
