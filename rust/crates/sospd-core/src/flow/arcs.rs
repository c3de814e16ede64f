use crate::flow::clique::EnergyTableClique;
use crate::Energy;

/// Directed clique-internal arc stored at its tail node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CliqueArc {
    pub(crate) to: usize,
    pub(crate) clique: usize,
    /// Position of the tail node inside the clique.
    pub(crate) from_idx: usize,
    /// Position of `to` inside the clique.
    pub(crate) to_idx: usize,
    /// Index of the mirrored arc in `to`'s list.
    pub(crate) rev: usize,
}

impl CliqueArc {
    pub(crate) fn forward_capacity(&self, cliques: &[EnergyTableClique]) -> Energy {
        cliques[self.clique].exchange_capacity(self.from_idx, self.to_idx)
    }

    pub(crate) fn backward_capacity(&self, cliques: &[EnergyTableClique]) -> Energy {
        cliques[self.clique].exchange_capacity(self.to_idx, self.from_idx)
    }
}

/// One arc list per node, holding an arc to every other member of every
/// clique the node belongs to.
pub(crate) fn build_arcs(node_count: usize, cliques: &[EnergyTableClique]) -> Vec<Vec<CliqueArc>> {
    let mut arcs: Vec<Vec<CliqueArc>> = vec![Vec::new(); node_count];
    for (clique_idx, clique) in cliques.iter().enumerate() {
        let nodes = clique.nodes();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let (a, b) = (nodes[i].0, nodes[j].0);
                let a_index = arcs[a].len();
                let b_index = arcs[b].len();
                arcs[a].push(CliqueArc {
                    to: b,
                    clique: clique_idx,
                    from_idx: i,
                    to_idx: j,
                    rev: b_index,
                });
                arcs[b].push(CliqueArc {
                    to: a,
                    clique: clique_idx,
                    from_idx: j,
                    to_idx: i,
                    rev: a_index,
                });
            }
        }
    }
    arcs
}
