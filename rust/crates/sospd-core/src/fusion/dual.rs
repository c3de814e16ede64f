use std::fmt;

use crate::energy::MultiLabelEnergy;
use crate::{Energy, Label, NodeId};

/// Per-clique, per-member, per-label dual variables `λ[c][i][l]` together
/// with the node to `(clique, member)` incidence used for heights.
#[derive(Debug, Clone)]
pub struct DualTable {
    duals: Vec<Vec<Vec<Energy>>>,
    node_cliques: Vec<Vec<(usize, usize)>>,
}

impl DualTable {
    /// All-zero duals shaped after `energy`.
    pub fn new(energy: &MultiLabelEnergy) -> Self {
        let num_labels = energy.num_labels();
        let duals = energy
            .cliques()
            .iter()
            .map(|c| vec![vec![0; num_labels]; c.size()])
            .collect();
        Self {
            duals,
            node_cliques: energy.node_cliques(),
        }
    }

    pub fn get(&self, clique: usize, member: usize, label: Label) -> Energy {
        self.duals[clique][member][label]
    }

    /// Duals of one clique, indexed by member then label.
    pub fn clique(&self, clique: usize) -> &[Vec<Energy>] {
        &self.duals[clique]
    }

    pub(crate) fn add(&mut self, clique: usize, member: usize, label: Label, delta: Energy) {
        self.duals[clique][member][label] += delta;
    }

    /// Spreads `energy` over the members' duals at `labels`, integer average
    /// first and one extra unit for each of the first `energy mod k` members.
    pub(crate) fn distribute(&mut self, clique: usize, labels: &[Label], energy: Energy) {
        let k = labels.len() as Energy;
        let avg = energy.div_euclid(k);
        let remainder = energy.rem_euclid(k);
        for (i, (&l, dual)) in labels.iter().zip(&mut self.duals[clique]).enumerate() {
            dual[l] = avg + Energy::from((i as Energy) < remainder);
        }
    }

    /// `Height(i, l)`: unary cost plus every incident dual at label `l`.
    pub fn height(&self, energy: &MultiLabelEnergy, node: usize, label: Label) -> Energy {
        let unary = energy.unary(NodeId(node))[label];
        unary
            + self.node_cliques[node]
                .iter()
                .map(|&(c, i)| self.duals[c][i][label])
                .sum::<Energy>()
    }

    /// `Height(i, a) - Height(i, b)` without materializing either height.
    pub fn height_diff(
        &self,
        energy: &MultiLabelEnergy,
        node: usize,
        a: Label,
        b: Label,
    ) -> Energy {
        let unary = energy.unary(NodeId(node));
        unary[a] - unary[b]
            + self.node_cliques[node]
                .iter()
                .map(|&(c, i)| self.duals[c][i][a] - self.duals[c][i][b])
                .sum::<Energy>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Duals at the current labels do not add up to the clique energy.
    Label {
        clique: usize,
        energy: Energy,
        dual_sum: Energy,
    },
    DualBound {
        clique: usize,
        member: usize,
        label: Label,
        dual: Energy,
        bound: Energy,
    },
    /// Negative dual at the member's current label.
    Active {
        clique: usize,
        member: usize,
        dual: Energy,
    },
    /// A label strictly lower than the current one in height.
    Height {
        node: usize,
        label: Label,
        height: Energy,
        lower_label: Label,
        lower_height: Energy,
    },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::Label {
                clique,
                energy,
                dual_sum,
            } => write!(
                f,
                "clique {clique}: duals sum to {dual_sum} but energy is {energy}"
            ),
            InvariantViolation::DualBound {
                clique,
                member,
                label,
                dual,
                bound,
            } => write!(
                f,
                "clique {clique} member {member} label {label}: dual {dual} exceeds f_max {bound}"
            ),
            InvariantViolation::Active {
                clique,
                member,
                dual,
            } => write!(
                f,
                "clique {clique} member {member}: negative dual {dual} at current label"
            ),
            InvariantViolation::Height {
                node,
                label,
                height,
                lower_label,
                lower_height,
            } => write!(
                f,
                "node {node}: label {label} has height {height}, \
                 label {lower_label} has {lower_height}"
            ),
        }
    }
}

impl std::error::Error for InvariantViolation {}

pub fn check_label_invariant(
    energy: &MultiLabelEnergy,
    duals: &DualTable,
    labels: &[Label],
) -> Result<(), InvariantViolation> {
    let mut buf = Vec::new();
    for (c, clique) in energy.cliques().iter().enumerate() {
        let value = energy.clique_energy(c, labels, &mut buf);
        let dual_sum: Energy = clique
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, node)| duals.get(c, i, labels[node.0]))
            .sum();
        if dual_sum != value {
            return Err(InvariantViolation::Label {
                clique: c,
                energy: value,
                dual_sum,
            });
        }
    }
    Ok(())
}

pub fn check_dual_bound_invariant(
    energy: &MultiLabelEnergy,
    duals: &DualTable,
) -> Result<(), InvariantViolation> {
    for (c, clique) in energy.cliques().iter().enumerate() {
        let bound = clique.f_max();
        for (member, per_label) in duals.clique(c).iter().enumerate() {
            if let Some((label, &dual)) = per_label.iter().enumerate().find(|(_, &d)| d > bound) {
                return Err(InvariantViolation::DualBound {
                    clique: c,
                    member,
                    label,
                    dual,
                    bound,
                });
            }
        }
    }
    Ok(())
}

pub fn check_active_invariant(
    energy: &MultiLabelEnergy,
    duals: &DualTable,
    labels: &[Label],
) -> Result<(), InvariantViolation> {
    for (c, clique) in energy.cliques().iter().enumerate() {
        for (member, node) in clique.nodes().iter().enumerate() {
            let dual = duals.get(c, member, labels[node.0]);
            if dual < 0 {
                return Err(InvariantViolation::Active {
                    clique: c,
                    member,
                    dual,
                });
            }
        }
    }
    Ok(())
}

/// Only expected to hold once the fusion loop has reached a fixed point.
pub fn check_height_invariant(
    energy: &MultiLabelEnergy,
    duals: &DualTable,
    labels: &[Label],
) -> Result<(), InvariantViolation> {
    for (node, &label) in labels.iter().enumerate() {
        let height = duals.height(energy, node, label);
        for other in (0..energy.num_labels()).filter(|&l| l != label) {
            let other_height = duals.height(energy, node, other);
            if other_height < height {
                return Err(InvariantViolation::Height {
                    node,
                    label,
                    height,
                    lower_label: other,
                    lower_height: other_height,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clique::PottsClique;

    fn triangle() -> MultiLabelEnergy {
        let mut e = MultiLabelEnergy::new(2).unwrap();
        e.add_node(3);
        e.add_unary_term(NodeId(0), &[0, 3]).unwrap();
        e.add_clique(Box::new(
            PottsClique::new(vec![NodeId(0), NodeId(1), NodeId(2)], 0, 5).unwrap(),
        ))
        .unwrap();
        e
    }

    #[test]
    fn distribute_spreads_remainder_to_leading_members() {
        let e = triangle();
        let mut duals = DualTable::new(&e);
        duals.distribute(0, &[0, 1, 1], 5);
        assert_eq!(duals.get(0, 0, 0), 2);
        assert_eq!(duals.get(0, 1, 1), 2);
        assert_eq!(duals.get(0, 2, 1), 1);
        assert_eq!(duals.get(0, 0, 1), 0);
        assert!(check_label_invariant(&e, &duals, &[0, 1, 1]).is_ok());
        assert!(check_active_invariant(&e, &duals, &[0, 1, 1]).is_ok());
    }

    #[test]
    fn heights_add_unary_and_incident_duals() {
        let e = triangle();
        let mut duals = DualTable::new(&e);
        duals.add(0, 0, 1, 4);
        assert_eq!(duals.height(&e, 0, 1), 7);
        assert_eq!(duals.height(&e, 0, 0), 0);
        assert_eq!(duals.height_diff(&e, 0, 1, 0), 7);
        assert_eq!(
            check_height_invariant(&e, &duals, &[1, 0, 0]),
            Err(InvariantViolation::Height {
                node: 0,
                label: 1,
                height: 7,
                lower_label: 0,
                lower_height: 0,
            })
        );
    }

    #[test]
    fn violations_name_the_offending_entry() {
        let e = triangle();
        let mut duals = DualTable::new(&e);
        assert!(matches!(
            check_label_invariant(&e, &duals, &[0, 1, 0]),
            Err(InvariantViolation::Label { clique: 0, energy: 5, dual_sum: 0 })
        ));
        duals.add(0, 2, 1, 6);
        assert!(matches!(
            check_dual_bound_invariant(&e, &duals),
            Err(InvariantViolation::DualBound { member: 2, label: 1, dual: 6, bound: 5, .. })
        ));
        duals.add(0, 1, 0, -1);
        let err = check_active_invariant(&e, &duals, &[0, 0, 0]).unwrap_err();
        assert_eq!(err.to_string(), "clique 0 member 1: negative dual -1 at current label");
    }
}
