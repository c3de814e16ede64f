pub mod alpha_expansion;
pub mod batch;
pub mod clique;
pub mod energy;
pub mod flow;
pub mod fusion;
pub mod quadratic;
pub mod random;
pub mod submodular;

use std::fmt;

pub use crate::alpha_expansion::{AlphaExpansion, AlphaExpansionOptions, AlphaExpansionStats};
pub use crate::batch::{solve_flow_batch, solve_fusion_batch, FusionOutcome};
pub use crate::clique::{
    Clique, PottsClique, SeparableClique, StereoClique, StereoParams, TableClique,
};
pub use crate::energy::MultiLabelEnergy;
pub use crate::flow::{FlowGraph, FlowOptions, FlowStats, SolverKind};
pub use crate::fusion::{DualGuidedFusionMove, FusionOptions, FusionStats, IterationStat};
pub use crate::fusion::proposal::ProposalStrategy;
pub use crate::quadratic::{PairwiseGraph, TruncatedSum};
pub use crate::random::RandomSubmodularProblem;

/// Fixed-point cost. Callers pre-scale real-valued energies.
pub type Energy = i64;

pub type Label = usize;

/// Bitmask over the members of a clique; bit `i` set means member `i` is labeled 1.
pub type Assignment = u32;

/// Cliques are indexed by an `Assignment`, so their size is bounded by its width.
pub const MAX_CLIQUE_SIZE: usize = 31;

/// Largest magnitude accepted for a single unary or clique cost.
pub const MAX_ABS_COST: Energy = 1 << 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CliqueId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SosError {
    InvalidInput(String),
    CliqueTooLarge { size: usize, max: usize },
    NodeOutOfRange { node: usize, node_count: usize },
    TableSize { expected: usize, actual: usize },
    DuplicateNode { node: usize },
    NotSubmodular { clique: usize },
    LabelOutOfRange { node: usize, label: Label, num_labels: usize },
    InvalidLabelCount { num_labels: usize },
    CostOutOfRange { value: Energy, limit: Energy },
}

impl fmt::Display for SosError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SosError::InvalidInput(message) => write!(f, "invalid input: {message}"),
            SosError::CliqueTooLarge { size, max } => {
                write!(f, "clique of size {size} exceeds the maximum of {max}")
            }
            SosError::NodeOutOfRange { node, node_count } => {
                write!(f, "node {node} outside of 0..{node_count}")
            }
            SosError::TableSize { expected, actual } => {
                write!(f, "energy table has {actual} entries, expected {expected}")
            }
            SosError::DuplicateNode { node } => {
                write!(f, "node {node} appears more than once in a clique")
            }
            SosError::NotSubmodular { clique } => {
                write!(f, "energy table of clique {clique} is not submodular")
            }
            SosError::LabelOutOfRange {
                node,
                label,
                num_labels,
            } => write!(
                f,
                "label {label} of node {node} outside of 0..{num_labels}"
            ),
            SosError::InvalidLabelCount { num_labels } => {
                write!(f, "an energy needs at least one label, got {num_labels}")
            }
            SosError::CostOutOfRange { value, limit } => {
                write!(f, "cost {value} exceeds the representable range ±{limit}")
            }
        }
    }
}

impl std::error::Error for SosError {}

pub(crate) fn check_cost(value: Energy) -> Result<(), SosError> {
    if value.checked_abs().map_or(true, |abs| abs > MAX_ABS_COST) {
        return Err(SosError::CostOutOfRange {
            value,
            limit: MAX_ABS_COST,
        });
    }
    Ok(())
}

/// Validates a clique's member list against the node range and the assignment width.
pub(crate) fn check_members(nodes: &[NodeId], node_count: usize) -> Result<(), SosError> {
    if nodes.len() > MAX_CLIQUE_SIZE {
        return Err(SosError::CliqueTooLarge {
            size: nodes.len(),
            max: MAX_CLIQUE_SIZE,
        });
    }
    for (idx, node) in nodes.iter().enumerate() {
        if node.0 >= node_count {
            return Err(SosError::NodeOutOfRange {
                node: node.0,
                node_count,
            });
        }
        if nodes[..idx].contains(node) {
            return Err(SosError::DuplicateNode { node: node.0 });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_members_rejects_out_of_range_nodes() {
        let err = check_members(&[NodeId(0), NodeId(3)], 3).unwrap_err();
        assert_eq!(
            err,
            SosError::NodeOutOfRange {
                node: 3,
                node_count: 3
            }
        );
    }

    #[test]
    fn check_members_rejects_duplicates() {
        let err = check_members(&[NodeId(1), NodeId(2), NodeId(1)], 3).unwrap_err();
        assert_eq!(err, SosError::DuplicateNode { node: 1 });
    }

    #[test]
    fn check_members_rejects_wide_cliques() {
        let nodes: Vec<NodeId> = (0..32).map(NodeId).collect();
        let err = check_members(&nodes, 64).unwrap_err();
        assert!(matches!(err, SosError::CliqueTooLarge { size: 32, .. }));
    }

    #[test]
    fn check_cost_guards_the_fixed_point_range() {
        assert!(check_cost(MAX_ABS_COST).is_ok());
        assert!(check_cost(-MAX_ABS_COST).is_ok());
        assert!(check_cost(MAX_ABS_COST + 1).is_err());
        assert!(check_cost(Energy::MIN).is_err());
    }

    #[test]
    fn errors_render_their_context() {
        let err = SosError::TableSize {
            expected: 8,
            actual: 7,
        };
        assert_eq!(err.to_string(), "energy table has 7 entries, expected 8");
    }
}
