use std::fmt;
use std::sync::Arc;

use crate::{check_cost, Assignment, Energy, Label, NodeId, SosError, MAX_CLIQUE_SIZE};

/// Multi-label higher-order term.
///
/// Implementations are owned by a [`crate::MultiLabelEnergy`] behind a
/// `Box<dyn Clique>` and are never cloned.
pub trait Clique: fmt::Debug + Send + Sync {
    fn nodes(&self) -> &[NodeId];

    /// Cost of the clique when member `i` takes `labels[i]`.
    fn energy(&self, labels: &[Label]) -> Energy;

    fn size(&self) -> usize {
        self.nodes().len()
    }

    /// Smallest non-zero cost; together with `f_max` bounds the curvature.
    fn f_min(&self) -> Energy {
        1
    }

    /// Largest cost the clique can take.
    fn f_max(&self) -> Energy {
        1
    }

    fn rho(&self) -> f64 {
        self.size() as f64 * self.f_max() as f64 / self.f_min() as f64
    }

    /// Number of labels the clique can evaluate, if it is bounded.
    fn num_labels(&self) -> Option<usize> {
        None
    }
}

fn check_size(nodes: &[NodeId]) -> Result<(), SosError> {
    if nodes.len() > MAX_CLIQUE_SIZE {
        return Err(SosError::CliqueTooLarge {
            size: nodes.len(),
            max: MAX_CLIQUE_SIZE,
        });
    }
    if nodes.is_empty() {
        return Err(SosError::InvalidInput("clique without members".to_string()));
    }
    Ok(())
}

fn check_non_negative(value: Energy) -> Result<(), SosError> {
    check_cost(value)?;
    if value < 0 {
        return Err(SosError::InvalidInput(format!(
            "clique costs must be non-negative, got {value}"
        )));
    }
    Ok(())
}

/// `same_cost` when all members agree, `diff_cost` otherwise.
#[derive(Debug)]
pub struct PottsClique {
    nodes: Vec<NodeId>,
    same_cost: Energy,
    diff_cost: Energy,
}

impl PottsClique {
    pub fn new(nodes: Vec<NodeId>, same_cost: Energy, diff_cost: Energy) -> Result<Self, SosError> {
        check_size(&nodes)?;
        check_cost(diff_cost)?;
        if same_cost < 0 || diff_cost < same_cost {
            return Err(SosError::InvalidInput(format!(
                "potts costs must satisfy 0 <= same ({same_cost}) <= diff ({diff_cost})"
            )));
        }
        Ok(Self {
            nodes,
            same_cost,
            diff_cost,
        })
    }
}

impl Clique for PottsClique {
    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn energy(&self, labels: &[Label]) -> Energy {
        let first = labels[0];
        if labels[1..].iter().all(|&l| l == first) {
            self.same_cost
        } else {
            self.diff_cost
        }
    }

    fn f_min(&self) -> Energy {
        let smallest = if self.same_cost == 0 {
            self.diff_cost
        } else {
            self.same_cost
        };
        smallest.max(1)
    }

    fn f_max(&self) -> Energy {
        self.diff_cost
    }
}

/// Sum over labels of a set function of the members holding that label.
///
/// `tables[l][a]` is the cost when exactly the members in `a` have label `l`.
#[derive(Debug)]
pub struct SeparableClique {
    nodes: Vec<NodeId>,
    tables: Vec<Vec<Energy>>,
}

impl SeparableClique {
    pub fn new(nodes: Vec<NodeId>, tables: Vec<Vec<Energy>>) -> Result<Self, SosError> {
        check_size(&nodes)?;
        let expected = 1usize << nodes.len();
        for table in &tables {
            if table.len() != expected {
                return Err(SosError::TableSize {
                    expected,
                    actual: table.len(),
                });
            }
            for &value in table {
                check_non_negative(value)?;
            }
        }
        Ok(Self { nodes, tables })
    }
}

impl Clique for SeparableClique {
    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn energy(&self, labels: &[Label]) -> Energy {
        let mut per_label: Vec<Assignment> = vec![0; self.tables.len()];
        for (i, &l) in labels.iter().enumerate() {
            per_label[l] |= 1 << i;
        }
        self.tables
            .iter()
            .zip(&per_label)
            .map(|(table, &a)| table[a as usize])
            .sum()
    }

    fn f_max(&self) -> Energy {
        let total: Energy = self
            .tables
            .iter()
            .map(|t| t.iter().copied().max().unwrap_or(0))
            .sum();
        total.max(1)
    }

    fn num_labels(&self) -> Option<usize> {
        Some(self.tables.len())
    }
}

/// Dense table over all `L^k` joint labelings; member 0 is the least
/// significant digit of the index.
#[derive(Debug)]
pub struct TableClique {
    nodes: Vec<NodeId>,
    num_labels: usize,
    table: Vec<Energy>,
}

impl TableClique {
    pub fn new(
        nodes: Vec<NodeId>,
        num_labels: usize,
        table: Vec<Energy>,
    ) -> Result<Self, SosError> {
        check_size(&nodes)?;
        let expected = u32::try_from(nodes.len())
            .ok()
            .and_then(|k| num_labels.checked_pow(k))
            .ok_or_else(|| SosError::InvalidInput("dense clique table too large".to_string()))?;
        if table.len() != expected {
            return Err(SosError::TableSize {
                expected,
                actual: table.len(),
            });
        }
        for &value in &table {
            check_non_negative(value)?;
        }
        Ok(Self {
            nodes,
            num_labels,
            table,
        })
    }
}

impl Clique for TableClique {
    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn energy(&self, labels: &[Label]) -> Energy {
        let index = labels
            .iter()
            .rev()
            .fold(0, |acc, &l| acc * self.num_labels + l);
        self.table[index]
    }

    fn f_max(&self) -> Energy {
        self.table.iter().copied().max().unwrap_or(0).max(1)
    }

    fn num_labels(&self) -> Option<usize> {
        Some(self.num_labels)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoParams {
    /// Truncation of the squared curvature.
    pub kappa: f32,
    /// Largest disparity jump between neighbors before the term saturates.
    pub alpha: f32,
    pub scale: f32,
}

impl Default for StereoParams {
    fn default() -> Self {
        Self {
            kappa: 0.001,
            alpha: 10.0,
            scale: 20000.0,
        }
    }
}

/// Second-order smoothness prior over three collinear pixels whose labels
/// select among per-pixel disparity proposals.
#[derive(Debug)]
pub struct StereoClique {
    nodes: [NodeId; 3],
    /// `proposals[label][node]` is the disparity that `label` assigns to `node`.
    proposals: Arc<Vec<Vec<f32>>>,
    params: StereoParams,
}

impl StereoClique {
    pub fn new(
        nodes: [NodeId; 3],
        proposals: Arc<Vec<Vec<f32>>>,
        params: StereoParams,
    ) -> Result<Self, SosError> {
        if params.kappa <= 0.0 {
            return Err(SosError::InvalidInput("stereo kappa must be positive".to_string()));
        }
        for node in nodes {
            if proposals.iter().any(|p| p.len() <= node.0) {
                return Err(SosError::InvalidInput(format!(
                    "proposal does not cover node {}",
                    node.0
                )));
            }
        }
        Ok(Self {
            nodes,
            proposals,
            params,
        })
    }
}

impl Clique for StereoClique {
    fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    fn energy(&self, labels: &[Label]) -> Energy {
        let StereoParams {
            kappa,
            alpha,
            scale,
        } = self.params;
        let d: Vec<f32> = labels
            .iter()
            .zip(&self.nodes)
            .map(|(&l, node)| self.proposals[l][node.0])
            .collect();
        let cost = if (d[1] - d[0]).abs() > alpha || (d[2] - d[1]).abs() > alpha {
            kappa
        } else {
            let curvature = d[0] - 2.0 * d[1] + d[2];
            (curvature * curvature).min(kappa)
        };
        (f64::from(cost) / f64::from(kappa) * f64::from(scale)) as Energy
    }

    fn f_max(&self) -> Energy {
        self.params.scale as Energy
    }

    fn num_labels(&self) -> Option<usize> {
        Some(self.proposals.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ids(raw: &[usize]) -> Vec<NodeId> {
        raw.iter().map(|&i| NodeId(i)).collect()
    }

    #[test]
    fn potts_energy_and_curvature() {
        let c = PottsClique::new(ids(&[0, 1, 2]), 0, 6).unwrap();
        assert_eq!(c.energy(&[2, 2, 2]), 0);
        assert_eq!(c.energy(&[2, 1, 2]), 6);
        assert_eq!(c.f_min(), 6);
        assert_eq!(c.f_max(), 6);
        assert_relative_eq!(c.rho(), 3.0);

        let c = PottsClique::new(ids(&[0, 1]), 2, 8).unwrap();
        assert_eq!(c.f_min(), 2);
        assert_relative_eq!(c.rho(), 8.0);
    }

    #[test]
    fn potts_rejects_inverted_costs() {
        assert!(PottsClique::new(ids(&[0, 1]), 5, 2).is_err());
        assert!(PottsClique::new(ids(&[0, 1]), -1, 2).is_err());
    }

    #[test]
    fn separable_sums_per_label_tables() {
        // label 0 table charges 1 per member, label 1 table charges 10 when both hold it
        let tables = vec![vec![0, 1, 1, 2], vec![0, 0, 0, 10]];
        let c = SeparableClique::new(ids(&[4, 7]), tables).unwrap();
        assert_eq!(c.num_labels(), Some(2));
        assert_eq!(c.energy(&[0, 0]), 2);
        assert_eq!(c.energy(&[0, 1]), 1);
        assert_eq!(c.energy(&[1, 1]), 10);
        assert_eq!(c.f_max(), 12);
    }

    #[test]
    fn table_clique_indexes_member_zero_first() {
        let table: Vec<Energy> = (0..9).collect();
        let c = TableClique::new(ids(&[0, 1]), 3, table).unwrap();
        assert_eq!(c.energy(&[1, 0]), 1);
        assert_eq!(c.energy(&[0, 1]), 3);
        assert_eq!(c.energy(&[2, 2]), 8);
        assert!(TableClique::new(ids(&[0, 1]), 3, vec![0; 8]).is_err());
        assert!(TableClique::new(ids(&[0]), 2, vec![0, -1]).is_err());
    }

    #[test]
    fn stereo_clique_penalizes_curvature() {
        let proposals = Arc::new(vec![
            vec![1.0, 1.0, 1.0],
            vec![1.0, 1.01, 1.0],
            vec![1.0, 30.0, 1.0],
        ]);
        let nodes = ids(&[0, 1, 2]).try_into().unwrap();
        let c = StereoClique::new(nodes, proposals, StereoParams::default()).unwrap();
        assert_eq!(c.energy(&[0, 0, 0]), 0);
        // jump larger than alpha saturates at kappa, scaled to `scale`
        assert_eq!(c.energy(&[0, 2, 0]), 20000);
        let curved = c.energy(&[0, 1, 0]);
        assert!(curved > 0 && curved < 20000, "{curved}");
        assert_eq!(c.f_max(), 20000);
    }

    #[test]
    fn empty_cliques_are_rejected() {
        assert!(matches!(
            PottsClique::new(Vec::new(), 0, 1),
            Err(SosError::InvalidInput(_))
        ));
    }
}
