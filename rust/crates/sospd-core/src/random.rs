//! Seeded random submodular instances built from truncated-sum cliques.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use crate::flow::FlowGraph;
use crate::quadratic::{PairwiseGraph, TruncatedSum};
use crate::{Energy, Label, NodeId, SosError, MAX_CLIQUE_SIZE};

#[derive(Debug, Clone)]
pub struct RandomSubmodularProblem {
    /// `[cost of label 0, cost of label 1]` per node.
    pub unary: Vec<[Energy; 2]>,
    /// Each clique holds a plain and a complemented term over the same members.
    pub cliques: Vec<[TruncatedSum; 2]>,
}

impl RandomSubmodularProblem {
    pub fn generate(
        seed: u64,
        nodes: usize,
        cliques: usize,
        clique_size: usize,
    ) -> Result<Self, SosError> {
        if clique_size > MAX_CLIQUE_SIZE {
            return Err(SosError::CliqueTooLarge {
                size: clique_size,
                max: MAX_CLIQUE_SIZE,
            });
        }
        if clique_size > nodes || clique_size == 0 {
            return Err(SosError::InvalidInput(format!(
                "cannot draw cliques of size {clique_size} from {nodes} nodes"
            )));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let unary = (0..nodes)
            .map(|_| [rng.gen_range(100..=1600), rng.gen_range(100..=1600)])
            .collect();
        let mut terms = Vec::with_capacity(cliques);
        for _ in 0..cliques {
            let members: Vec<NodeId> = sample(&mut rng, nodes, clique_size)
                .into_iter()
                .map(NodeId)
                .collect();
            let plain = random_term(&mut rng, members.clone(), false)?;
            let complement = random_term(&mut rng, members, true)?;
            terms.push([plain, complement]);
        }
        Ok(Self {
            unary,
            cliques: terms,
        })
    }

    pub fn node_count(&self) -> usize {
        self.unary.len()
    }

    pub fn energy(&self, labels: &[Label]) -> Energy {
        let unary: Energy = self.unary.iter().zip(labels).map(|(u, &l)| u[l]).sum();
        let higher: Energy = self
            .cliques
            .iter()
            .flatten()
            .map(|term| {
                let assignment = term
                    .nodes
                    .iter()
                    .enumerate()
                    .filter(|(_, node)| labels[node.0] == 1)
                    .fold(0usize, |acc, (i, _)| acc | (1 << i));
                term.value(assignment)
            })
            .sum();
        unary + higher
    }

    /// The problem with each clique's two terms merged into one table.
    pub fn flow_graph(&self) -> Result<FlowGraph, SosError> {
        let mut graph = FlowGraph::new();
        graph.add_node(self.node_count());
        for (i, &[e0, e1]) in self.unary.iter().enumerate() {
            graph.add_unary_term(NodeId(i), e0, e1)?;
        }
        for [plain, complement] in &self.cliques {
            let table: Vec<Energy> = plain
                .table()
                .into_iter()
                .zip(complement.table())
                .map(|(a, b)| a + b)
                .collect();
            graph.add_clique(&plain.nodes, table)?;
        }
        Ok(graph)
    }

    /// The problem reduced to pairwise terms, one auxiliary node per term.
    pub fn pairwise_graph(&self) -> Result<PairwiseGraph, SosError> {
        let mut graph = PairwiseGraph::new();
        graph.add_node(self.node_count());
        for (i, &[e0, e1]) in self.unary.iter().enumerate() {
            graph.add_unary_term(NodeId(i), e0, e1)?;
        }
        for term in self.cliques.iter().flatten() {
            term.reduce_into(&mut graph)?;
        }
        Ok(graph)
    }
}

fn random_term(
    rng: &mut StdRng,
    members: Vec<NodeId>,
    complement: bool,
) -> Result<TruncatedSum, SosError> {
    let weights = members.iter().map(|_| rng.gen_range(100..=800)).collect();
    let cap = rng.gen_range(800..=1600);
    TruncatedSum::new(members, weights, cap, complement)
}
