//! Independent instances solved in parallel on the rayon pool.

use rayon::prelude::*;

use crate::energy::MultiLabelEnergy;
use crate::flow::{FlowGraph, FlowStats, SolverKind};
use crate::fusion::{DualGuidedFusionMove, FusionOptions, FusionStats};
use crate::{Energy, Label, SosError};

#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub labels: Vec<Label>,
    pub energy: Energy,
    pub stats: FusionStats,
}

/// Runs the fusion move with the default height proposal on every energy.
/// Results keep the input order.
pub fn solve_fusion_batch(
    energies: Vec<MultiLabelEnergy>,
    options: &FusionOptions,
) -> Vec<Result<FusionOutcome, SosError>> {
    tracing::debug!(
        instances = energies.len(),
        threads = rayon::current_num_threads(),
        "solving fusion batch"
    );
    energies
        .into_par_iter()
        .map(|energy| {
            let mut fusion = DualGuidedFusionMove::new(energy, options.clone());
            let stats = fusion.solve()?;
            Ok(FusionOutcome {
                labels: fusion.labels().to_vec(),
                energy: fusion.compute_energy(),
                stats,
            })
        })
        .collect()
}

/// Solves every graph with `kind` and hands the graphs back with their labels set.
pub fn solve_flow_batch(graphs: Vec<FlowGraph>, kind: SolverKind) -> Vec<(FlowGraph, FlowStats)> {
    graphs
        .into_par_iter()
        .map(|mut graph| {
            let stats = graph.solve(kind);
            (graph, stats)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::RandomSubmodularProblem;

    #[test]
    fn flow_batch_matches_sequential_solves() {
        let problems: Vec<RandomSubmodularProblem> = (0..6)
            .map(|seed| RandomSubmodularProblem::generate(seed, 40, 30, 4).unwrap())
            .collect();
        let graphs = problems.iter().map(|p| p.flow_graph().unwrap()).collect();
        let solved = solve_flow_batch(graphs, SolverKind::Ibfs);
        assert_eq!(solved.len(), problems.len());
        for (problem, (graph, _)) in problems.iter().zip(&solved) {
            let mut sequential = problem.flow_graph().unwrap();
            sequential.solve(SolverKind::PushRelabel);
            assert_eq!(graph.compute_energy(), sequential.compute_energy());
        }
    }
}
