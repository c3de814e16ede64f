pub(crate) mod arcs;
pub mod clique;
pub mod graph;
pub mod ibfs;
pub mod push_relabel;

pub use clique::{EnergyTableClique, Normalization};
pub use graph::FlowGraph;
pub use ibfs::{Ibfs, NodeState};
pub use push_relabel::PushRelabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverKind {
    #[default]
    Ibfs,
    PushRelabel,
}

#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Enables the per-augmentation feasibility checks and tree-state asserts.
    pub check_invariants: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            check_invariants: cfg!(debug_assertions),
        }
    }
}

/// Work counters of one max-flow solve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub augmentations: usize,
    pub pushes: usize,
    pub relabels: usize,
    pub global_relabels: usize,
    pub orphans: usize,
    pub shortcuts: usize,
    pub restarts: usize,
    /// Total flow sent from source to sink.
    pub flow: i64,
}

/// A max-flow algorithm over a [`FlowGraph`]. Leaves the min-cut labels in the graph.
pub trait MaxFlow {
    fn solve(&mut self, graph: &mut FlowGraph) -> FlowStats;
}

impl FlowGraph {
    /// Computes a minimum cut with the chosen algorithm and stores the labels.
    pub fn solve(&mut self, kind: SolverKind) -> FlowStats {
        self.solve_with(kind, &FlowOptions::default())
    }

    pub fn solve_with(&mut self, kind: SolverKind, options: &FlowOptions) -> FlowStats {
        let stats = match kind {
            SolverKind::Ibfs => Ibfs::new(options.clone()).solve(self),
            SolverKind::PushRelabel => PushRelabel::new().solve(self),
        };
        tracing::debug!(
            ?kind,
            nodes = self.node_count(),
            cliques = self.cliques().len(),
            flow = stats.flow,
            augmentations = stats.augmentations,
            relabels = stats.relabels,
            restarts = stats.restarts,
            "max-flow solve finished"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Label, NodeId};

    fn brute_force_minimum(g: &FlowGraph) -> i64 {
        let n = g.node_count();
        (0..(1usize << n))
            .map(|a| {
                let labels: Vec<Label> = (0..n).map(|i| (a >> i) & 1).collect();
                g.compute_energy_of(&labels)
            })
            .min()
            .unwrap()
    }

    fn small_graph() -> FlowGraph {
        let mut g = FlowGraph::new();
        g.add_node(4);
        g.add_unary_term(NodeId(0), 9, 2).unwrap();
        g.add_unary_term(NodeId(1), 1, 6).unwrap();
        g.add_unary_term(NodeId(2), 4, 4).unwrap();
        g.add_unary_term(NodeId(3), 2, 7).unwrap();
        g.add_clique(&[NodeId(0), NodeId(1), NodeId(2)], vec![0, 5, 4, 6, 3, 6, 5, 0])
            .unwrap();
        g.add_clique(&[NodeId(2), NodeId(3)], vec![0, 3, 3, 0]).unwrap();
        g
    }

    #[test]
    fn both_solvers_reach_brute_force_minimum() {
        for kind in [SolverKind::Ibfs, SolverKind::PushRelabel] {
            let mut g = small_graph();
            let expected = brute_force_minimum(&g);
            let stats = g.solve(kind);
            assert_eq!(g.compute_energy(), expected, "{kind:?}");
            assert!(g.check_capacity_invariants(), "{kind:?}");
            assert!(stats.flow >= 0);
        }
    }

    #[test]
    fn default_options_follow_build_profile() {
        assert_eq!(FlowOptions::default().check_invariants, cfg!(debug_assertions));
        assert_eq!(SolverKind::default(), SolverKind::Ibfs);
    }
}
