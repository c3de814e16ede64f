//! Exact minimization of binary pairwise submodular energies by max-flow.
//!
//! Used as a reference for the higher-order solvers: concave-of-modular
//! clique terms reduce to pairwise terms with one auxiliary node each.

use std::collections::VecDeque;

use crate::{check_cost, Energy, Label, NodeId, SosError};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Edge {
    pub(crate) to: usize,
    pub(crate) rev: usize,
    pub(crate) cap: Energy,
}

/// Dinic's blocking-flow max-flow on a residual adjacency list.
#[derive(Debug)]
pub(crate) struct Dinic {
    pub(crate) graph: Vec<Vec<Edge>>,
    level: Vec<usize>,
    next_edge: Vec<usize>,
}

impl Dinic {
    pub(crate) fn new(nodes: usize) -> Self {
        Self {
            graph: vec![Vec::new(); nodes],
            level: vec![usize::MAX; nodes],
            next_edge: vec![0; nodes],
        }
    }

    pub(crate) fn add_edge(&mut self, from: usize, to: usize, cap: Energy) -> (usize, usize) {
        let from_index = self.graph[from].len();
        let to_index = self.graph[to].len();
        self.graph[from].push(Edge {
            to,
            rev: to_index,
            cap,
        });
        self.graph[to].push(Edge {
            to: from,
            rev: from_index,
            cap: 0,
        });
        (from_index, to_index)
    }

    fn build_levels(&mut self, source: usize, sink: usize) -> bool {
        self.level.iter_mut().for_each(|l| *l = usize::MAX);
        self.level[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for edge in &self.graph[u] {
                if edge.cap > 0 && self.level[edge.to] == usize::MAX {
                    self.level[edge.to] = self.level[u] + 1;
                    queue.push_back(edge.to);
                }
            }
        }
        self.level[sink] != usize::MAX
    }

    fn augment(&mut self, u: usize, sink: usize, limit: Energy) -> Energy {
        if u == sink {
            return limit;
        }
        while self.next_edge[u] < self.graph[u].len() {
            let idx = self.next_edge[u];
            let Edge { to, rev, cap } = self.graph[u][idx];
            if cap > 0 && self.level[to] == self.level[u] + 1 {
                let pushed = self.augment(to, sink, limit.min(cap));
                if pushed > 0 {
                    self.graph[u][idx].cap -= pushed;
                    self.graph[to][rev].cap += pushed;
                    return pushed;
                }
            }
            self.next_edge[u] += 1;
        }
        0
    }

    pub(crate) fn max_flow(&mut self, source: usize, sink: usize) -> Energy {
        let mut flow = 0;
        while self.build_levels(source, sink) {
            self.next_edge.iter_mut().for_each(|e| *e = 0);
            loop {
                let pushed = self.augment(source, sink, Energy::MAX);
                if pushed == 0 {
                    break;
                }
                flow += pushed;
            }
        }
        flow
    }

    /// Nodes reachable from `source` in the residual graph.
    pub(crate) fn source_side(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.graph.len()];
        seen[source] = true;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for edge in &self.graph[u] {
                if edge.cap > 0 && !seen[edge.to] {
                    seen[edge.to] = true;
                    queue.push_back(edge.to);
                }
            }
        }
        seen
    }
}

#[derive(Debug, Clone, Copy)]
struct PairTerm {
    i: usize,
    j: usize,
    /// `[e00, e01, e10, e11]`, first index for node `i`.
    costs: [Energy; 4],
}

/// Binary energy with unary and submodular pairwise terms.
///
/// Nodes left on the source side of the minimum cut take label 0.
#[derive(Debug, Default, Clone)]
pub struct PairwiseGraph {
    unary: Vec<[Energy; 2]>,
    pairs: Vec<PairTerm>,
    constant: Energy,
    labels: Vec<Label>,
}

impl PairwiseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, count: usize) -> NodeId {
        let first = self.unary.len();
        self.unary.resize(first + count, [0, 0]);
        self.labels.resize(first + count, 0);
        NodeId(first)
    }

    pub fn node_count(&self) -> usize {
        self.unary.len()
    }

    pub fn add_constant_term(&mut self, c: Energy) {
        self.constant += c;
    }

    pub fn add_unary_term(&mut self, node: NodeId, e0: Energy, e1: Energy) -> Result<(), SosError> {
        self.check_node(node)?;
        check_cost(e0)?;
        check_cost(e1)?;
        self.unary[node.0][0] += e0;
        self.unary[node.0][1] += e1;
        Ok(())
    }

    /// Adds `e_ab` for `x_i = a, x_j = b`; requires `e01 + e10 >= e00 + e11`.
    pub fn add_pairwise_term(
        &mut self,
        i: NodeId,
        j: NodeId,
        e00: Energy,
        e01: Energy,
        e10: Energy,
        e11: Energy,
    ) -> Result<(), SosError> {
        self.check_node(i)?;
        self.check_node(j)?;
        if i == j {
            return Err(SosError::DuplicateNode { node: i.0 });
        }
        for c in [e00, e01, e10, e11] {
            check_cost(c)?;
        }
        if e01 + e10 < e00 + e11 {
            return Err(SosError::InvalidInput(format!(
                "pairwise term on ({}, {}) is not submodular",
                i.0, j.0
            )));
        }
        self.pairs.push(PairTerm {
            i: i.0,
            j: j.0,
            costs: [e00, e01, e10, e11],
        });
        Ok(())
    }

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
        let unary: Energy = self.unary.iter().zip(labels).map(|(u, &l)| u[l]).sum();
        let pairwise: Energy = self
            .pairs
            .iter()
            .map(|p| p.costs[2 * labels[p.i] + labels[p.j]])
            .sum();
        self.constant + unary + pairwise
    }

    /// Minimizes the energy, stores the labels and returns the minimum.
    pub fn solve(&mut self) -> Energy {
        let n = self.node_count();
        let (s, t) = (n, n + 1);
        let mut constant = self.constant;
        // cost of label 0 and of label 1 per node, shifted to be non-negative
        let mut terminal: Vec<[Energy; 2]> = self.unary.clone();
        let mut dinic = Dinic::new(n + 2);
        for p in &self.pairs {
            let [a, b, c, d] = p.costs;
            // E = a + (c - a) x_i + (d - c) x_j + (b + c - a - d) (1 - x_i) x_j
            constant += a;
            terminal[p.i][1] += c - a;
            terminal[p.j][1] += d - c;
            let coupling = b + c - a - d;
            if coupling > 0 {
                dinic.add_edge(p.i, p.j, coupling);
            }
        }
        for (i, [e0, e1]) in terminal.into_iter().enumerate() {
            let shift = e0.min(e1);
            constant += shift;
            if e1 > shift {
                dinic.add_edge(s, i, e1 - shift);
            }
            if e0 > shift {
                dinic.add_edge(i, t, e0 - shift);
            }
        }
        let flow = dinic.max_flow(s, t);
        let source_side = dinic.source_side(s);
        for (label, &on_source) in self.labels.iter_mut().zip(&source_side) {
            *label = if on_source { 0 } else { 1 };
        }
        let minimum = constant + flow;
        debug_assert_eq!(minimum, self.compute_energy());
        minimum
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

/// `min(Σ w_i x_i, cap)`, or `min(Σ w_i (1 - x_i), cap)` when `complement` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedSum {
    pub nodes: Vec<NodeId>,
    pub weights: Vec<Energy>,
    pub cap: Energy,
    pub complement: bool,
}

impl TruncatedSum {
    pub fn new(
        nodes: Vec<NodeId>,
        weights: Vec<Energy>,
        cap: Energy,
        complement: bool,
    ) -> Result<Self, SosError> {
        if nodes.len() != weights.len() {
            return Err(SosError::InvalidInput(format!(
                "{} weights for {} nodes",
                weights.len(),
                nodes.len()
            )));
        }
        if cap < 0 || weights.iter().any(|&w| w < 0) {
            return Err(SosError::InvalidInput(
                "truncated sum needs non-negative weights and cap".to_string(),
            ));
        }
        Ok(Self {
            nodes,
            weights,
            cap,
            complement,
        })
    }

    /// Value when bit `i` of `assignment` gives member `i` label 1.
    pub fn value(&self, assignment: usize) -> Energy {
        let sum: Energy = self
            .weights
            .iter()
            .enumerate()
            .filter(|(i, _)| (assignment >> i & 1 == 1) != self.complement)
            .map(|(_, &w)| w)
            .sum();
        sum.min(self.cap)
    }

    pub fn table(&self) -> Vec<Energy> {
        (0..1usize << self.nodes.len()).map(|a| self.value(a)).collect()
    }

    /// Adds the term to `graph` through one auxiliary node `z`:
    /// `min_z cap·z + Σ w_i x_i (1 - z)`, or
    /// `min_z cap·(1 - z) + Σ w_i (1 - x_i) z` for the complement.
    pub fn reduce_into(&self, graph: &mut PairwiseGraph) -> Result<NodeId, SosError> {
        let z = graph.add_node(1);
        if self.complement {
            graph.add_unary_term(z, self.cap, 0)?;
        } else {
            graph.add_unary_term(z, 0, self.cap)?;
        }
        for (&node, &w) in self.nodes.iter().zip(&self.weights) {
            if self.complement {
                graph.add_pairwise_term(node, z, 0, w, 0, 0)?;
            } else {
                graph.add_pairwise_term(node, z, 0, 0, w, 0)?;
            }
        }
        Ok(z)
    }
}
