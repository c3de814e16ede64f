use std::collections::VecDeque;

use crate::flow::arcs::{build_arcs, CliqueArc};
use crate::flow::{FlowGraph, FlowOptions, FlowStats, MaxFlow};
use crate::Energy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Free,
    Source,
    Sink,
    SourceOrphan,
    SinkOrphan,
}

impl NodeState {
    fn orphan(self) -> Self {
        match self {
            NodeState::Source => NodeState::SourceOrphan,
            NodeState::Sink => NodeState::SinkOrphan,
            other => other,
        }
    }

    fn opposite(self) -> Self {
        match self {
            NodeState::Source => NodeState::Sink,
            NodeState::Sink => NodeState::Source,
            other => other,
        }
    }

    /// Free nodes join a tree, tree nodes become orphans of that tree, and
    /// orphans either rejoin their tree or fall back to free.
    fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (NodeState::Free, NodeState::Source | NodeState::Sink)
                | (NodeState::Source, NodeState::SourceOrphan)
                | (NodeState::Sink, NodeState::SinkOrphan)
                | (NodeState::SourceOrphan, NodeState::Source | NodeState::Free)
                | (NodeState::SinkOrphan, NodeState::Sink | NodeState::Free)
        )
    }
}

/// Parent marker for nodes attached directly to their terminal.
const TERMINAL: usize = usize::MAX;

/// A layer slot stays valid while the node keeps the state, distance and
/// generation it was added with.
#[derive(Debug, Clone, Copy)]
struct LayerEntry {
    node: usize,
    generation: u32,
}

#[derive(Debug, Clone, Copy)]
struct PathArc {
    tail: usize,
    head: usize,
    clique: usize,
    tail_idx: usize,
    head_idx: usize,
}

/// Incremental breadth-first search max-flow for graphs with clique hyperedges.
///
/// Grows a source tree and a sink tree layer by layer. A residual arc between
/// the two trees yields an augmenting path; nodes whose tree arc saturates
/// become orphans and are re-adopted or relabeled.
#[derive(Debug, Default)]
pub struct Ibfs {
    options: FlowOptions,
    arcs: Vec<Vec<CliqueArc>>,
    state: Vec<NodeState>,
    dist: Vec<usize>,
    parent: Vec<usize>,
    /// Index into the node's arc list; equal to its length for a terminal parent.
    parent_arc: Vec<usize>,
    generation: Vec<u32>,
    source_layers: Vec<Vec<LayerEntry>>,
    sink_layers: Vec<Vec<LayerEntry>>,
    source_orphans: VecDeque<usize>,
    sink_orphans: VecDeque<usize>,
    source_depth: usize,
    sink_depth: usize,
    stats: FlowStats,
}

impl Ibfs {
    pub fn new(options: FlowOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Tree state of `node` after the last solve.
    pub fn state(&self, node: usize) -> NodeState {
        self.state[node]
    }

    fn depth(&self, tree: NodeState) -> usize {
        match tree {
            NodeState::Source => self.source_depth,
            _ => self.sink_depth,
        }
    }

    fn layers(&self, tree: NodeState) -> &Vec<Vec<LayerEntry>> {
        match tree {
            NodeState::Source => &self.source_layers,
            _ => &self.sink_layers,
        }
    }

    fn layers_mut(&mut self, tree: NodeState) -> &mut Vec<Vec<LayerEntry>> {
        match tree {
            NodeState::Source => &mut self.source_layers,
            _ => &mut self.sink_layers,
        }
    }

    fn arc_capacity(&self, graph: &FlowGraph, v: usize, a: usize, forward: bool) -> Energy {
        let arc = &self.arcs[v][a];
        if forward {
            arc.forward_capacity(&graph.cliques)
        } else {
            arc.backward_capacity(&graph.cliques)
        }
    }

    /// Capacity of the tree arc joining `v` to the neighbor at arc `a`, in the
    /// direction flow travels in that tree.
    fn tree_capacity(&self, graph: &FlowGraph, v: usize, a: usize, tree: NodeState) -> Energy {
        self.arc_capacity(graph, v, a, tree == NodeState::Sink)
    }

    fn add_to_layer(&mut self, v: usize) {
        self.generation[v] = self.generation[v].wrapping_add(1);
        let entry = LayerEntry {
            node: v,
            generation: self.generation[v],
        };
        let d = self.dist[v];
        let tree = self.state[v];
        let layers = self.layers_mut(tree);
        if layers.len() <= d {
            layers.resize_with(d + 1, Vec::new);
        }
        layers[d].push(entry);
    }

    fn is_live(&self, entry: LayerEntry, tree: NodeState, d: usize) -> bool {
        let v = entry.node;
        self.state[v] == tree && self.dist[v] == d && self.generation[v] == entry.generation
    }

    fn live_count(&self, tree: NodeState) -> usize {
        let d = self.depth(tree);
        self.layers(tree)
            .get(d)
            .map_or(0, |layer| layer.iter().filter(|e| self.is_live(**e, tree, d)).count())
    }

    fn set_state(&mut self, v: usize, next: NodeState) {
        if self.options.check_invariants {
            let current = self.state[v];
            assert!(
                current.can_become(next),
                "node {v} cannot move from {current:?} to {next:?}"
            );
        }
        self.state[v] = next;
    }

    fn make_orphan(&mut self, v: usize) {
        match self.state[v] {
            NodeState::Source => self.source_orphans.push_back(v),
            NodeState::Sink => self.sink_orphans.push_back(v),
            _ => return,
        }
        self.set_state(v, self.state[v].orphan());
        self.stats.orphans += 1;
    }

    /// Routes as much flow as possible straight from source to sink through
    /// each node, then seeds both trees with the nodes whose terminal arcs
    /// still have residual capacity. Existing flow is kept.
    fn init(&mut self, graph: &mut FlowGraph) {
        let n = graph.node_count();
        self.state = vec![NodeState::Free; n];
        self.dist = vec![0; n];
        self.parent = vec![TERMINAL; n];
        self.parent_arc = self.arcs.iter().map(Vec::len).collect();
        self.generation = vec![0; n];
        self.source_layers = vec![Vec::new(); 2];
        self.sink_layers = vec![Vec::new(); 2];
        self.source_orphans.clear();
        self.sink_orphans.clear();
        for i in 0..n {
            let through = (graph.c_si[i] - graph.phi_si[i]).min(graph.c_it[i] - graph.phi_it[i]);
            graph.phi_si[i] += through;
            graph.phi_it[i] += through;
            self.stats.flow += through;
            if graph.c_si[i] > graph.phi_si[i] {
                self.set_state(i, NodeState::Source);
            } else if graph.c_it[i] > graph.phi_it[i] {
                self.set_state(i, NodeState::Sink);
            } else {
                continue;
            }
            self.dist[i] = 1;
            self.add_to_layer(i);
        }
        self.source_depth = 1;
        self.sink_depth = 1;
    }

    fn search(&mut self, graph: &mut FlowGraph) {
        loop {
            let source_live = self.live_count(NodeState::Source);
            let sink_live = self.live_count(NodeState::Sink);
            if source_live == 0 && sink_live == 0 {
                break;
            }
            let tree = if sink_live == 0 || (source_live > 0 && source_live <= sink_live) {
                NodeState::Source
            } else {
                NodeState::Sink
            };
            self.scan_layer(graph, tree);
        }
    }

    fn scan_layer(&mut self, graph: &mut FlowGraph, tree: NodeState) {
        let d = self.depth(tree);
        let mut idx = 0;
        while idx < self.layers(tree).get(d).map_or(0, Vec::len) {
            let entry = self.layers(tree)[d][idx];
            idx += 1;
            if !self.is_live(entry, tree, d) {
                continue;
            }
            let v = entry.node;
            let mut a = 0;
            while a < self.arcs[v].len() {
                let arc = self.arcs[v][a];
                if self.arc_capacity(graph, v, a, tree == NodeState::Source) <= 0 {
                    a += 1;
                    continue;
                }
                let w = arc.to;
                let w_state = self.state[w];
                if w_state == tree {
                    if self.dist[w] == d + 1 && arc.rev < self.parent_arc[w] {
                        self.parent[w] = v;
                        self.parent_arc[w] = arc.rev;
                    }
                    a += 1;
                } else if w_state == NodeState::Free {
                    self.set_state(w, tree);
                    self.dist[w] = d + 1;
                    self.parent[w] = v;
                    self.parent_arc[w] = arc.rev;
                    self.add_to_layer(w);
                    a += 1;
                } else {
                    assert_eq!(
                        w_state,
                        tree.opposite(),
                        "orphan {w} left over outside of adoption"
                    );
                    if tree == NodeState::Source {
                        self.augment(graph, v, a);
                    } else {
                        self.augment(graph, w, arc.rev);
                    }
                    self.adopt(graph);
                    if !self.is_live(entry, tree, d) {
                        break;
                    }
                }
            }
        }
        match tree {
            NodeState::Source => self.source_depth += 1,
            _ => self.sink_depth += 1,
        }
    }

    /// Augments along source root → `u` → (arc `a`) → sink root.
    fn augment(&mut self, graph: &mut FlowGraph, u: usize, a: usize) {
        let mut path = Vec::new();
        let mut c = u;
        while self.parent[c] != TERMINAL {
            debug_assert_eq!(self.state[c], NodeState::Source);
            let arc = self.arcs[c][self.parent_arc[c]];
            path.push(PathArc {
                tail: arc.to,
                head: c,
                clique: arc.clique,
                tail_idx: arc.to_idx,
                head_idx: arc.from_idx,
            });
            c = arc.to;
        }
        let source_root = c;
        path.reverse();

        let bridge = self.arcs[u][a];
        path.push(PathArc {
            tail: u,
            head: bridge.to,
            clique: bridge.clique,
            tail_idx: bridge.from_idx,
            head_idx: bridge.to_idx,
        });
        let mut c = bridge.to;
        while self.parent[c] != TERMINAL {
            debug_assert_eq!(self.state[c], NodeState::Sink);
            let arc = self.arcs[c][self.parent_arc[c]];
            path.push(PathArc {
                tail: c,
                head: arc.to,
                clique: arc.clique,
                tail_idx: arc.from_idx,
                head_idx: arc.to_idx,
            });
            c = arc.to;
        }
        let sink_root = c;

        self.shortcut(graph, &mut path);

        let mut bottleneck = (graph.c_si[source_root] - graph.phi_si[source_root])
            .min(graph.c_it[sink_root] - graph.phi_it[sink_root]);
        for arc in &path {
            bottleneck = bottleneck
                .min(graph.cliques[arc.clique].exchange_capacity(arc.tail_idx, arc.head_idx));
        }
        if self.options.check_invariants {
            check_joint_feasibility(graph, &path, bottleneck);
        }
        assert!(bottleneck > 0, "augmenting path with bottleneck {bottleneck}");

        for arc in &path {
            graph.cliques[arc.clique].push(arc.tail_idx, arc.head_idx, bottleneck);
            for m in 0..graph.cliques[arc.clique].size() {
                let member = graph.cliques[arc.clique].nodes()[m].0;
                let member_state = self.state[member];
                if member_state != NodeState::Source && member_state != NodeState::Sink {
                    continue;
                }
                let pa = self.parent_arc[member];
                if pa == self.arcs[member].len() || self.arcs[member][pa].clique != arc.clique {
                    continue;
                }
                if self.tree_capacity(graph, member, pa, member_state) <= 0 {
                    self.make_orphan(member);
                }
            }
        }

        graph.phi_si[source_root] += bottleneck;
        if graph.phi_si[source_root] == graph.c_si[source_root] {
            self.make_orphan(source_root);
        }
        graph.phi_it[sink_root] += bottleneck;
        if graph.phi_it[sink_root] == graph.c_it[sink_root] {
            self.make_orphan(sink_root);
        }
        self.stats.flow += bottleneck;
        self.stats.augmentations += 1;
    }

    /// Replaces a stretch of the path that enters and leaves the same clique
    /// by a single exchange arc whenever that arc has capacity.
    fn shortcut(&mut self, graph: &FlowGraph, path: &mut Vec<PathArc>) {
        'restart: loop {
            for i in 0..path.len() {
                for j in ((i + 1)..path.len()).rev() {
                    if path[j].clique != path[i].clique {
                        continue;
                    }
                    let clique = &graph.cliques[path[i].clique];
                    if clique.exchange_capacity(path[i].tail_idx, path[j].head_idx) > 0 {
                        let merged = PathArc {
                            tail: path[i].tail,
                            head: path[j].head,
                            clique: path[i].clique,
                            tail_idx: path[i].tail_idx,
                            head_idx: path[j].head_idx,
                        };
                        path.drain(i + 1..=j);
                        path[i] = merged;
                        self.stats.shortcuts += 1;
                        continue 'restart;
                    }
                }
            }
            break;
        }
    }

    fn adopt(&mut self, graph: &FlowGraph) {
        loop {
            let (v, tree) = if let Some(v) = self.source_orphans.pop_front() {
                (v, NodeState::Source)
            } else if let Some(v) = self.sink_orphans.pop_front() {
                (v, NodeState::Sink)
            } else {
                break;
            };
            if self.state[v] != tree.orphan() {
                continue;
            }
            self.adopt_one(graph, v, tree);
        }
    }

    /// Reattaches orphan `v` at its old distance if possible, otherwise relabels it.
    ///
    /// Parents still waiting for adoption are accepted as well. This relaxed
    /// rule only keeps tree distances approximately monotone along a path;
    /// cut certification in `solve` catches a search that closes too early.
    fn adopt_one(&mut self, graph: &FlowGraph, v: usize, tree: NodeState) {
        let orphan = tree.orphan();
        let old_dist = self.dist[v];
        let len = self.arcs[v].len();
        let in_tree = |s: NodeState| s == tree || s == orphan;

        let mut pa = self.parent_arc[v];
        while pa < len {
            let p = self.arcs[v][pa].to;
            if in_tree(self.state[p])
                && self.dist[p] + 1 == old_dist
                && self.tree_capacity(graph, v, pa, tree) > 0
            {
                self.parent_arc[v] = pa;
                self.parent[v] = p;
                self.set_state(v, tree);
                return;
            }
            pa += 1;
        }

        self.stats.relabels += 1;
        let mut best: Option<(usize, usize)> = None;
        for a in 0..len {
            let p = self.arcs[v][a].to;
            if !in_tree(self.state[p]) || self.tree_capacity(graph, v, a, tree) <= 0 {
                continue;
            }
            if best.map_or(true, |(b, _)| self.dist[p] < self.dist[b]) {
                best = Some((p, a));
            }
        }
        let cutoff = self.depth(tree) + 1;
        let increased = match best {
            Some((p, a)) if self.dist[p] + 1 <= cutoff => {
                self.parent[v] = p;
                self.parent_arc[v] = a;
                self.dist[v] = self.dist[p] + 1;
                self.set_state(v, tree);
                self.add_to_layer(v);
                self.dist[v] > old_dist
            }
            _ => {
                self.set_state(v, NodeState::Free);
                self.parent[v] = TERMINAL;
                self.parent_arc[v] = len;
                true
            }
        };
        if increased {
            for a in 0..len {
                let child = self.arcs[v][a].to;
                if self.state[child] == tree && self.parent[child] == v {
                    self.make_orphan(child);
                }
            }
        }
    }

    /// The source tree is closed: no residual sink arc and no residual arc
    /// leaving it.
    fn certify(&self, graph: &FlowGraph) -> bool {
        (0..graph.node_count())
            .filter(|&v| self.state[v] == NodeState::Source)
            .all(|v| {
                graph.c_it[v] == graph.phi_it[v]
                    && self.arcs[v].iter().all(|arc| {
                        self.state[arc.to] == NodeState::Source
                            || arc.forward_capacity(&graph.cliques) <= 0
                    })
            })
    }
}

/// Checks that pushing `bottleneck` along every arc of `path` keeps each
/// clique's reduced costs non-negative.
fn check_joint_feasibility(graph: &FlowGraph, path: &[PathArc], bottleneck: Energy) {
    let mut seen = Vec::new();
    for arc in path {
        if seen.contains(&arc.clique) {
            continue;
        }
        seen.push(arc.clique);
        let clique = &graph.cliques[arc.clique];
        let mut demand = vec![0 as Energy; clique.size()];
        for other in path.iter().filter(|o| o.clique == arc.clique) {
            demand[other.tail_idx] += 1;
            demand[other.head_idx] -= 1;
        }
        for subset in 0..(1usize << clique.size()) {
            let load: Energy = demand
                .iter()
                .enumerate()
                .filter(|(i, _)| subset & (1 << i) != 0)
                .map(|(_, d)| *d)
                .sum();
            if load > 0 {
                assert!(
                    clique.residual(subset) >= load * bottleneck,
                    "clique {} cannot carry {} units on subset {subset:#b}",
                    arc.clique,
                    bottleneck
                );
            }
        }
    }
}

impl Ibfs {
    /// Searches from the current trees until the source tree is closed,
    /// reinitializing from the current flow after every failed certification.
    fn search_until_closed(&mut self, graph: &mut FlowGraph) {
        loop {
            self.search(graph);
            if self.certify(graph) {
                return;
            }
            self.stats.restarts += 1;
            tracing::warn!(
                restarts = self.stats.restarts,
                "source tree not closed after search; restarting from current flow"
            );
            self.init(graph);
        }
    }

    fn finish(&mut self, graph: &mut FlowGraph) -> FlowStats {
        for (label, state) in graph.labels.iter_mut().zip(&self.state) {
            *label = if *state == NodeState::Source { 1 } else { 0 };
        }
        std::mem::take(&mut self.stats)
    }
}

impl MaxFlow for Ibfs {
    fn solve(&mut self, graph: &mut FlowGraph) -> FlowStats {
        graph.reset_flow();
        self.arcs = build_arcs(graph.node_count(), &graph.cliques);
        self.stats = FlowStats::default();
        self.init(graph);
        self.search_until_closed(graph);
        self.finish(graph)
    }
}
