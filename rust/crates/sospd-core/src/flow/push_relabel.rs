use std::collections::VecDeque;

use crate::flow::arcs::build_arcs;
use crate::flow::{FlowGraph, FlowStats, MaxFlow};
use crate::Energy;

#[derive(Debug, Clone, Copy)]
enum ArcKind {
    FromSource,
    ToSource,
    ToSink,
    FromSink,
    Clique {
        clique: usize,
        from_idx: usize,
        to_idx: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct Arc {
    to: usize,
    rev: usize,
    kind: ArcKind,
}

/// Highest-label preflow-push over the terminal and clique arcs.
///
/// Kept as a reference solver for cross-checking [`crate::flow::Ibfs`].
#[derive(Debug, Default)]
pub struct PushRelabel {
    arcs: Vec<Vec<Arc>>,
    dis: Vec<usize>,
    excess: Vec<Energy>,
    buckets: Vec<Vec<usize>>,
    active: Vec<bool>,
    top: usize,
    work: usize,
    stats: FlowStats,
}

impl PushRelabel {
    pub fn new() -> Self {
        Self::default()
    }

    fn source(&self) -> usize {
        self.arcs.len() - 2
    }

    fn sink(&self) -> usize {
        self.arcs.len() - 1
    }

    fn max_height(&self) -> usize {
        2 * self.arcs.len() + 1
    }

    fn build(&mut self, graph: &FlowGraph) {
        let n = graph.node_count();
        let (s, t) = (n, n + 1);
        let clique_arcs = build_arcs(n, &graph.cliques);
        let mut arcs: Vec<Vec<Arc>> = vec![Vec::new(); n + 2];
        for i in 0..n {
            arcs[i].push(Arc {
                to: s,
                rev: i,
                kind: ArcKind::ToSource,
            });
            arcs[i].push(Arc {
                to: t,
                rev: i,
                kind: ArcKind::ToSink,
            });
            arcs[s].push(Arc {
                to: i,
                rev: 0,
                kind: ArcKind::FromSource,
            });
            arcs[t].push(Arc {
                to: i,
                rev: 1,
                kind: ArcKind::FromSink,
            });
        }
        for (i, list) in clique_arcs.into_iter().enumerate() {
            arcs[i].extend(list.into_iter().map(|a| Arc {
                to: a.to,
                rev: a.rev + 2,
                kind: ArcKind::Clique {
                    clique: a.clique,
                    from_idx: a.from_idx,
                    to_idx: a.to_idx,
                },
            }));
        }
        self.arcs = arcs;
        let total = n + 2;
        self.dis = vec![0; total];
        self.excess = vec![0; total];
        self.active = vec![false; total];
        self.buckets = vec![Vec::new(); self.max_height() + 1];
        self.top = 0;
        self.work = 0;
        self.stats = FlowStats::default();
    }

    fn residual(&self, graph: &FlowGraph, u: usize, arc: &Arc) -> Energy {
        match arc.kind {
            ArcKind::FromSource => graph.c_si[arc.to] - graph.phi_si[arc.to],
            ArcKind::ToSource => graph.phi_si[u],
            ArcKind::ToSink => graph.c_it[u] - graph.phi_it[u],
            ArcKind::FromSink => graph.phi_it[arc.to],
            ArcKind::Clique {
                clique,
                from_idx,
                to_idx,
            } => graph.cliques[clique].exchange_capacity(from_idx, to_idx),
        }
    }

    /// Residual capacity of the arc pointing back at `v` from `arc.to`.
    fn reverse_residual(&self, graph: &FlowGraph, arc: &Arc) -> Energy {
        let back = &self.arcs[arc.to][arc.rev];
        self.residual(graph, arc.to, back)
    }

    fn activate(&mut self, v: usize) {
        if v >= self.source() {
            return;
        }
        if self.excess[v] > 0 && self.dis[v] < self.max_height() {
            self.buckets[self.dis[v]].push(v);
            self.active[v] = true;
            self.top = self.top.max(self.dis[v]);
        }
    }

    /// Exact distances to the sink, or back to the source for nodes that can
    /// no longer reach it.
    fn global_relabel(&mut self, graph: &FlowGraph) {
        let (s, t) = (self.source(), self.sink());
        let max_height = self.max_height();
        self.dis.iter_mut().for_each(|d| *d = max_height);
        for (root, root_dis) in [(t, 0), (s, self.arcs.len())] {
            self.dis[root] = root_dis;
            let mut queue = VecDeque::from([root]);
            while let Some(v) = queue.pop_front() {
                for arc in &self.arcs[v] {
                    let u = arc.to;
                    if u >= s || self.dis[u] != max_height {
                        continue;
                    }
                    if self.reverse_residual(graph, arc) > 0 {
                        self.dis[u] = self.dis[v] + 1;
                        queue.push_back(u);
                    }
                }
            }
        }
        self.buckets.iter_mut().for_each(Vec::clear);
        self.top = 0;
        for v in 0..s {
            self.active[v] = false;
            self.activate(v);
        }
        self.stats.global_relabels += 1;
    }

    fn discharge(&mut self, graph: &mut FlowGraph, u: usize) {
        let mut admissible = None;
        for (idx, arc) in self.arcs[u].iter().enumerate() {
            if self.dis[u] != self.dis[arc.to] + 1 {
                continue;
            }
            let residual = self.residual(graph, u, arc);
            if residual > 0 {
                admissible = Some((idx, residual));
                break;
            }
        }
        match admissible {
            Some((idx, residual)) => {
                let arc = self.arcs[u][idx];
                let delta = self.excess[u].min(residual);
                match arc.kind {
                    ArcKind::ToSource => graph.phi_si[u] -= delta,
                    ArcKind::ToSink => graph.phi_it[u] += delta,
                    ArcKind::Clique {
                        clique,
                        from_idx,
                        to_idx,
                    } => graph.cliques[clique].push(from_idx, to_idx, delta),
                    ArcKind::FromSource | ArcKind::FromSink => {
                        unreachable!("terminals are never discharged")
                    }
                }
                self.excess[u] -= delta;
                self.excess[arc.to] += delta;
                self.stats.pushes += 1;
                if !self.active[arc.to] {
                    self.activate(arc.to);
                }
            }
            None => {
                self.stats.relabels += 1;
                self.work += 12;
                let mut lowest = self.max_height();
                for arc in &self.arcs[u] {
                    self.work += 1;
                    if self.residual(graph, u, arc) > 0 {
                        lowest = lowest.min(self.dis[arc.to] + 1);
                    }
                }
                debug_assert!(
                    lowest < self.max_height(),
                    "node {u} has excess but no residual arc"
                );
                self.dis[u] = lowest;
            }
        }
        if self.excess[u] > 0 {
            self.activate(u);
        }
    }

    /// Nodes that still reach the sink through residual arcs take label 0.
    fn compute_min_cut(&self, graph: &mut FlowGraph) {
        let (s, t) = (self.source(), self.sink());
        let mut reached = vec![false; self.arcs.len()];
        reached[t] = true;
        let mut queue = VecDeque::from([t]);
        while let Some(v) = queue.pop_front() {
            for arc in &self.arcs[v] {
                let u = arc.to;
                if u >= s || reached[u] {
                    continue;
                }
                if self.reverse_residual(graph, arc) > 0 {
                    reached[u] = true;
                    queue.push_back(u);
                }
            }
        }
        for (label, &hit) in graph.labels.iter_mut().zip(&reached) {
            *label = if hit { 0 } else { 1 };
        }
    }
}

impl MaxFlow for PushRelabel {
    fn solve(&mut self, graph: &mut FlowGraph) -> FlowStats {
        graph.reset_flow();
        self.build(graph);
        let n = graph.node_count();
        let s = self.source();
        for i in 0..n {
            let cap = graph.c_si[i];
            graph.phi_si[i] = cap;
            self.excess[i] += cap;
            self.excess[s] -= cap;
        }
        let arc_count: usize =
            2 * n + graph.cliques.iter().map(|c| c.size() * c.size()).sum::<usize>();
        let budget = 6 * self.arcs.len() + arc_count;
        self.global_relabel(graph);
        loop {
            while self.top > 0 && self.buckets[self.top].is_empty() {
                self.top -= 1;
            }
            let Some(u) = self.buckets[self.top].pop() else {
                break;
            };
            if !self.active[u] || self.dis[u] != self.top || self.excess[u] <= 0 {
                continue;
            }
            self.active[u] = false;
            self.discharge(graph, u);
            if self.work > budget {
                self.global_relabel(graph);
                self.work = 0;
            }
        }
        self.compute_min_cut(graph);
        self.stats.flow = self.excess[self.sink()];
        std::mem::take(&mut self.stats)
    }
}
