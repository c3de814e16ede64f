//! Dual-guided fusion move for multi-label higher-order energies.
//!
//! Every round fuses the current labeling with a proposal through one
//! binary submodular flow problem, keeping per-clique duals that guide the
//! next proposal.

pub mod dual;
pub mod proposal;

use std::time::{Duration, Instant};

use crate::clique::Clique;
use crate::energy::MultiLabelEnergy;
use crate::flow::{FlowGraph, FlowOptions, SolverKind};
use crate::submodular::{is_submodular, submodular_upper_bound};
use crate::{Energy, Label, NodeId, SosError};

use self::dual::{
    check_active_invariant, check_dual_bound_invariant, check_height_invariant,
    check_label_invariant, DualTable,
};
use self::proposal::ProposalStrategy;

#[derive(Debug, Clone)]
pub struct FusionOptions {
    /// Upper bound on rounds across all calls to `solve`.
    pub max_iterations: usize,
    /// Consecutive unchanged rounds before stopping; `None` picks the
    /// proposal strategy's default.
    pub stall_rounds: Option<usize>,
    pub check_invariants: bool,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            stall_rounds: None,
            check_invariants: cfg!(debug_assertions),
        }
    }
}

/// Record of one fusion round.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationStat {
    pub iteration: usize,
    pub start_energy: Energy,
    pub end_energy: Energy,
    pub labels_changed: usize,
    /// Cliques whose fusion table had to be replaced by an upper bound.
    pub relaxed_cliques: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionStats {
    pub iterations: Vec<IterationStat>,
    pub converged: bool,
}

impl FusionStats {
    pub fn final_energy(&self) -> Option<Energy> {
        self.iterations.last().map(|it| it.end_energy)
    }
}

pub struct DualGuidedFusionMove {
    energy: MultiLabelEnergy,
    options: FusionOptions,
    proposal: ProposalStrategy,
    labels: Vec<Label>,
    duals: DualTable,
    flow_options: FlowOptions,
    initialized: bool,
    warm_start: bool,
    iteration: usize,
    stalled: usize,
    converged: bool,
    relaxed_seen: bool,
}

impl std::fmt::Debug for DualGuidedFusionMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualGuidedFusionMove")
            .field("nodes", &self.energy.node_count())
            .field("num_labels", &self.energy.num_labels())
            .field("proposal", &self.proposal)
            .field("iteration", &self.iteration)
            .field("converged", &self.converged)
            .finish()
    }
}

impl DualGuidedFusionMove {
    pub fn new(energy: MultiLabelEnergy, options: FusionOptions) -> Self {
        let duals = DualTable::new(&energy);
        let flow_options = FlowOptions {
            check_invariants: options.check_invariants,
        };
        Self {
            labels: vec![0; energy.node_count()],
            energy,
            options,
            proposal: ProposalStrategy::default(),
            duals,
            flow_options,
            initialized: false,
            warm_start: false,
            iteration: 0,
            stalled: 0,
            converged: false,
            relaxed_seen: false,
        }
    }

    pub fn set_proposal(&mut self, proposal: ProposalStrategy) {
        self.proposal = proposal;
        self.stalled = 0;
        self.converged = false;
    }

    /// Starts the next solve from `labels` instead of the unary minimizer.
    /// The duals are rebuilt around them.
    pub fn set_labels(&mut self, labels: &[Label]) -> Result<(), SosError> {
        self.energy.validate_labeling(labels)?;
        self.labels.copy_from_slice(labels);
        self.warm_start = true;
        self.initialized = false;
        self.stalled = 0;
        self.converged = false;
        Ok(())
    }

    pub fn energy(&self) -> &MultiLabelEnergy {
        &self.energy
    }

    pub fn label(&self, node: NodeId) -> Label {
        self.labels[node.0]
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn compute_energy(&self) -> Energy {
        self.energy.compute_energy(&self.labels)
    }

    pub fn rho(&self) -> f64 {
        self.energy.rho()
    }

    pub fn dual(&self) -> &DualTable {
        &self.duals
    }

    pub fn height(&self, node: NodeId, label: Label) -> Energy {
        self.duals.height(&self.energy, node.0, label)
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Runs rounds until convergence or until `max_iterations` rounds have
    /// been spent in total.
    pub fn solve(&mut self) -> Result<FusionStats, SosError> {
        let remaining = self.options.max_iterations.saturating_sub(self.iteration);
        self.solve_for(remaining)
    }

    /// Runs at most `rounds` more rounds; later calls resume where this one stopped.
    pub fn solve_for(&mut self, rounds: usize) -> Result<FusionStats, SosError> {
        if !self.initialized {
            self.initialize();
        }
        let stall_limit = self
            .options
            .stall_rounds
            .unwrap_or_else(|| self.proposal.default_stall_rounds(self.energy.num_labels()));
        let mut stats = FusionStats::default();
        for _ in 0..rounds {
            if self.converged || self.iteration >= self.options.max_iterations {
                break;
            }
            let stat = self.round()?;
            tracing::trace!(
                iteration = stat.iteration,
                energy = stat.end_energy,
                changed = stat.labels_changed,
                relaxed = stat.relaxed_cliques,
                "fusion round"
            );
            if stat.labels_changed == 0 {
                self.stalled += 1;
            } else {
                self.stalled = 0;
            }
            stats.iterations.push(stat);
            if self.stalled >= stall_limit {
                self.converged = true;
            }
        }
        if self.converged && self.options.check_invariants {
            let height = check_height_invariant(&self.energy, &self.duals, &self.labels);
            if let Err(violation) = height {
                tracing::debug!(%violation, "height invariant does not hold at the fixed point");
            }
        }
        self.dual_fit();
        stats.converged = self.converged;
        tracing::info!(
            rounds = stats.iterations.len(),
            energy = self.compute_energy(),
            converged = stats.converged,
            "fusion move finished"
        );
        Ok(stats)
    }

    fn initialize(&mut self) {
        if !self.warm_start {
            self.labels = self.energy.unary_minimizer();
        }
        self.duals = DualTable::new(&self.energy);
        self.average_duals();
        self.initialized = true;
        self.relaxed_seen = false;
        self.check_invariants(true);
    }

    /// Resets each clique's duals at the current labels to an even split of
    /// its current energy.
    fn average_duals(&mut self) {
        let mut buf = Vec::new();
        for c in 0..self.energy.cliques().len() {
            let value = self.energy.clique_energy(c, &self.labels, &mut buf);
            self.duals.distribute(c, &buf, value);
        }
    }

    fn round(&mut self) -> Result<IterationStat, SosError> {
        let started = Instant::now();
        let iteration = self.iteration;
        let start_energy = self.compute_energy();
        let proposed = self
            .proposal
            .propose(iteration, &self.labels, &self.energy, &self.duals)?;
        let (labels_changed, relaxed_cliques) = if proposed == self.labels {
            (0, 0)
        } else {
            self.pre_edit_dual(&proposed);
            self.check_invariants(false);
            let outcome = self.update_primal_dual(&proposed)?;
            self.relaxed_seen |= outcome.1 > 0;
            self.average_duals();
            self.check_invariants(true);
            outcome
        };
        self.iteration += 1;
        let end_energy = self.compute_energy();
        debug_assert!(end_energy <= start_energy, "fusion increased energy");
        Ok(IterationStat {
            iteration,
            start_energy,
            end_energy,
            labels_changed,
            relaxed_cliques,
            elapsed: started.elapsed(),
        })
    }

    /// Shifts the duals at the proposed labels so that the residual clique
    /// energy stays zero along the chain that switches members from last to first.
    fn pre_edit_dual(&mut self, proposed: &[Label]) {
        let mut buf = Vec::new();
        let mut psi = Vec::new();
        for (c, clique) in self.energy.cliques().iter().enumerate() {
            let nodes = clique.nodes();
            buf.clear();
            buf.extend(nodes.iter().map(|n| self.labels[n.0]));
            let mut lambda_current: Energy = buf
                .iter()
                .enumerate()
                .map(|(i, &l)| self.duals.get(c, i, l))
                .sum();
            let mut lambda_proposed: Energy = 0;
            let mut old_g = clique.energy(&buf) - lambda_current;
            psi.clear();
            psi.resize(nodes.len(), 0);
            for i in (0..nodes.len()).rev() {
                let alpha = proposed[nodes[i].0];
                lambda_current -= self.duals.get(c, i, buf[i]);
                lambda_proposed += self.duals.get(c, i, alpha);
                buf[i] = alpha;
                let new_g = clique.energy(&buf) - lambda_current - lambda_proposed;
                psi[i] = old_g - new_g;
                old_g = new_g;
            }
            for (i, node) in nodes.iter().enumerate() {
                self.duals.add(c, i, proposed[node.0], -psi[i]);
            }
        }
    }

    /// Solves the binary fusion problem, moves the nodes that switch and
    /// folds the clique flows into the duals. Returns the number of changed
    /// labels and of relaxed cliques.
    fn update_primal_dual(&mut self, proposed: &[Label]) -> Result<(usize, usize), SosError> {
        let n = self.labels.len();
        let mut graph = FlowGraph::new();
        graph.add_node(n);
        for i in 0..n {
            if self.labels[i] == proposed[i] {
                continue;
            }
            let diff = self.duals.height_diff(&self.energy, i, self.labels[i], proposed[i]);
            if diff > 0 {
                graph.add_unary_term(NodeId(i), diff, 0)?;
            } else {
                graph.add_unary_term(NodeId(i), 0, -diff)?;
            }
        }

        let mut relaxed = 0;
        // (energy clique, positions of the members that can switch)
        let mut added: Vec<(usize, Vec<usize>)> = Vec::new();
        let mut current = Vec::new();
        let mut target = Vec::new();
        for (c, clique) in self.energy.cliques().iter().enumerate() {
            let nodes = clique.nodes();
            current.clear();
            current.extend(nodes.iter().map(|node| self.labels[node.0]));
            target.clear();
            target.extend(nodes.iter().map(|node| proposed[node.0]));
            let differing: Vec<usize> =
                (0..nodes.len()).filter(|&i| current[i] != target[i]).collect();
            if differing.len() < 2 {
                continue;
            }
            let mut table = fusion_table(
                clique.as_ref(),
                &current,
                &target,
                &differing,
                Some(self.duals.clique(c)),
            );
            if !is_submodular(differing.len(), &table) {
                table = submodular_upper_bound(differing.len(), &table);
                relaxed += 1;
            }
            let members: Vec<NodeId> = differing.iter().map(|&i| nodes[i]).collect();
            // left unnormalized: add_clique folds the marginals into the unaries
            graph.add_clique(&members, table)?;
            added.push((c, differing));
        }

        graph.solve_with(SolverKind::Ibfs, &self.flow_options);

        let mut changed = 0;
        for i in 0..n {
            if graph.label(NodeId(i)) == 1 && self.labels[i] != proposed[i] {
                self.labels[i] = proposed[i];
                changed += 1;
            }
        }
        for ((c, differing), flow_clique) in added.iter().zip(graph.cliques()) {
            let nodes = self.energy.cliques()[*c].nodes();
            for (&pos, &alpha) in differing.iter().zip(flow_clique.alpha()) {
                self.duals.add(*c, pos, proposed[nodes[pos].0], alpha);
            }
        }
        if relaxed > 0 {
            tracing::trace!(relaxed, "fusion tables replaced by submodular upper bounds");
        }
        Ok((changed, relaxed))
    }

    /// Rescaling the duals into a feasible dual solution needs fractional
    /// values; with integer duals this is left as a no-op.
    fn dual_fit(&mut self) {}

    /// Label and active invariants always panic when violated. The dual
    /// bound is only checked once the duals have been re-averaged, and only
    /// panics while no fusion table has needed relaxation.
    fn check_invariants(&self, with_dual_bound: bool) {
        if !self.options.check_invariants {
            return;
        }
        let checks = check_label_invariant(&self.energy, &self.duals, &self.labels)
            .and_then(|()| check_active_invariant(&self.energy, &self.duals, &self.labels));
        if let Err(violation) = checks {
            panic!("fusion invariant violated: {violation}");
        }
        if !with_dual_bound {
            return;
        }
        if let Err(violation) = check_dual_bound_invariant(&self.energy, &self.duals) {
            if self.relaxed_seen {
                tracing::warn!(%violation, "dual bound exceeded after relaxed fusion rounds");
            } else {
                panic!("fusion invariant violated: {violation}");
            }
        }
    }
}

/// Binary fusion table over the members in `differing`: bit `j` set means
/// member `differing[j]` takes its `target` label instead of `current`.
/// When `duals` is given, the members' duals at the chosen labels are
/// subtracted. Entries are filled in Gray-code order so that each step
/// changes a single member.
pub(crate) fn fusion_table(
    clique: &dyn Clique,
    current: &[Label],
    target: &[Label],
    differing: &[usize],
    duals: Option<&[Vec<Energy>]>,
) -> Vec<Energy> {
    let d = differing.len();
    let mut buf = current.to_vec();
    let mut lambda: Energy = duals.map_or(0, |duals| {
        current.iter().enumerate().map(|(i, &l)| duals[i][l]).sum()
    });
    let mut table = vec![0; 1 << d];
    table[0] = clique.energy(&buf) - lambda;
    for step in 1..(1usize << d) {
        let bit = step.trailing_zeros() as usize;
        let gray = step ^ (step >> 1);
        let pos = differing[bit];
        let (from, to) = if gray & (1 << bit) != 0 {
            (current[pos], target[pos])
        } else {
            (target[pos], current[pos])
        };
        buf[pos] = to;
        if let Some(duals) = duals {
            lambda += duals[pos][to] - duals[pos][from];
        }
        table[gray] = clique.energy(&buf) - lambda;
    }
    table
}
