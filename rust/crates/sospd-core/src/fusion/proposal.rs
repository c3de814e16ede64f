use std::fmt;

use rand::rngs::StdRng;
use rand::Rng;

use crate::energy::MultiLabelEnergy;
use crate::fusion::dual::DualTable;
use crate::{Energy, Label, SosError};

/// Driver-supplied proposal: receives the iteration number and the current labels.
pub type ProposalFn = Box<dyn FnMut(usize, &[Label]) -> Vec<Label> + Send>;

/// How the fusion move picks the candidate labeling of each round.
#[derive(Default)]
pub enum ProposalStrategy {
    /// Every node takes its minimum-height label.
    #[default]
    Height,
    /// Label `iteration mod L` everywhere.
    AlphaExpansion,
    /// The single label with the largest total height drop, everywhere.
    HeightAlpha,
    Random(StdRng),
    Callback(ProposalFn),
}

impl fmt::Debug for ProposalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStrategy::Height => f.write_str("Height"),
            ProposalStrategy::AlphaExpansion => f.write_str("AlphaExpansion"),
            ProposalStrategy::HeightAlpha => f.write_str("HeightAlpha"),
            ProposalStrategy::Random(_) => f.write_str("Random"),
            ProposalStrategy::Callback(_) => f.write_str("Callback"),
        }
    }
}

impl ProposalStrategy {
    /// Consecutive unchanged rounds after which the loop is considered converged.
    pub fn default_stall_rounds(&self, num_labels: usize) -> usize {
        match self {
            ProposalStrategy::Height
            | ProposalStrategy::HeightAlpha
            | ProposalStrategy::Callback(_) => 1,
            ProposalStrategy::AlphaExpansion | ProposalStrategy::Random(_) => num_labels.max(1),
        }
    }

    pub(crate) fn propose(
        &mut self,
        iteration: usize,
        labels: &[Label],
        energy: &MultiLabelEnergy,
        duals: &DualTable,
    ) -> Result<Vec<Label>, SosError> {
        let n = labels.len();
        let num_labels = energy.num_labels();
        match self {
            ProposalStrategy::Height => {
                Ok((0..n).map(|i| min_height_label(energy, duals, i)).collect())
            }
            ProposalStrategy::AlphaExpansion => Ok(vec![iteration % num_labels; n]),
            ProposalStrategy::HeightAlpha => {
                let alpha = best_height_alpha(energy, duals, labels);
                Ok(vec![alpha; n])
            }
            ProposalStrategy::Random(rng) => {
                Ok((0..n).map(|_| rng.gen_range(0..num_labels)).collect())
            }
            ProposalStrategy::Callback(f) => {
                let proposed = f(iteration, labels);
                if proposed.len() != n {
                    return Err(SosError::InvalidInput(format!(
                        "proposal has {} labels for {n} nodes",
                        proposed.len()
                    )));
                }
                let out_of_range = proposed.iter().enumerate().find(|(_, &l)| l >= num_labels);
                if let Some((node, &label)) = out_of_range {
                    return Err(SosError::InvalidInput(format!(
                        "proposal gives node {node} label {label}, only {num_labels} labels exist"
                    )));
                }
                Ok(proposed)
            }
        }
    }
}

fn min_height_label(energy: &MultiLabelEnergy, duals: &DualTable, node: usize) -> Label {
    let mut best = 0;
    let mut best_height = duals.height(energy, node, 0);
    for l in 1..energy.num_labels() {
        let h = duals.height(energy, node, l);
        if h < best_height {
            best = l;
            best_height = h;
        }
    }
    best
}

fn best_height_alpha(energy: &MultiLabelEnergy, duals: &DualTable, labels: &[Label]) -> Label {
    let mut best = 0;
    let mut best_gain: Energy = -1;
    for alpha in 0..energy.num_labels() {
        let gain: Energy = labels
            .iter()
            .enumerate()
            .map(|(i, &x)| duals.height_diff(energy, i, x, alpha).max(0))
            .sum();
        if gain > best_gain {
            best = alpha;
            best_gain = gain;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeId;
    use rand::SeedableRng;

    fn energy() -> MultiLabelEnergy {
        let mut e = MultiLabelEnergy::new(3).unwrap();
        e.add_node(2);
        e.add_unary_term(NodeId(0), &[4, 1, 1]).unwrap();
        e.add_unary_term(NodeId(1), &[2, 9, 0]).unwrap();
        e
    }

    #[test]
    fn height_proposal_prefers_lowest_label_on_ties() {
        let e = energy();
        let duals = DualTable::new(&e);
        let proposal = ProposalStrategy::Height.propose(0, &[0, 0], &e, &duals).unwrap();
        assert_eq!(proposal, vec![1, 2]);
    }

    #[test]
    fn alpha_expansion_cycles_labels() {
        let e = energy();
        let duals = DualTable::new(&e);
        let mut s = ProposalStrategy::AlphaExpansion;
        assert_eq!(s.propose(4, &[0, 0], &e, &duals).unwrap(), vec![1, 1]);
        assert_eq!(s.default_stall_rounds(3), 3);
    }

    #[test]
    fn height_alpha_picks_largest_total_drop() {
        let e = energy();
        let duals = DualTable::new(&e);
        // from [0, 0]: label 1 drops 3 + 0, label 2 drops 3 + 2
        let proposal = ProposalStrategy::HeightAlpha.propose(0, &[0, 0], &e, &duals).unwrap();
        assert_eq!(proposal, vec![2, 2]);
    }

    #[test]
    fn random_proposals_are_reproducible() {
        let e = energy();
        let duals = DualTable::new(&e);
        let mut a = ProposalStrategy::Random(StdRng::seed_from_u64(7));
        let mut b = ProposalStrategy::Random(StdRng::seed_from_u64(7));
        for it in 0..5 {
            let pa = a.propose(it, &[0, 0], &e, &duals).unwrap();
            assert_eq!(pa, b.propose(it, &[0, 0], &e, &duals).unwrap());
            assert!(pa.iter().all(|&l| l < 3));
        }
    }

    #[test]
    fn callback_output_is_validated() {
        let e = energy();
        let duals = DualTable::new(&e);
        let mut short = ProposalStrategy::Callback(Box::new(|_: usize, _: &[Label]| vec![0]));
        assert!(matches!(
            short.propose(0, &[0, 0], &e, &duals),
            Err(SosError::InvalidInput(_))
        ));
        let mut wide = ProposalStrategy::Callback(Box::new(|_: usize, _: &[Label]| vec![0, 3]));
        assert!(wide.propose(0, &[0, 0], &e, &duals).is_err());
        let mut ok = ProposalStrategy::Callback(Box::new(
            |it: usize, labels: &[Label]| -> Vec<Label> {
                labels.iter().map(|&l| (l + it) % 3).collect()
            },
        ));
        assert_eq!(ok.propose(2, &[0, 1], &e, &duals).unwrap(), vec![2, 0]);
        assert_eq!(ok.default_stall_rounds(3), 1);
    }
}
