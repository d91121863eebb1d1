//! Min-cost max-flow by successive shortest paths.
//!
//! Dijkstra runs on reduced costs with Johnson potentials, so every arc cost
//! added with [`FlowNetwork::add_edge`] must be non-negative. The array form
//! of Dijkstra is O(V^2) per augmentation, which suits the dense bipartite
//! graphs built by the EMD engines.

use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

/// Numeric type used for both capacities and costs.
pub trait FlowValue:
    Copy
    + Debug
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
{
    const ZERO: Self;
    /// Residual capacity at or below this is treated as saturated.
    const EPSILON: Self;
    const INFINITY: Self;
}

impl FlowValue for i64 {
    const ZERO: Self = 0;
    const EPSILON: Self = 0;
    const INFINITY: Self = i64::MAX / 4;
}

impl FlowValue for f64 {
    const ZERO: Self = 0.0;
    const EPSILON: Self = 1e-12;
    const INFINITY: Self = f64::INFINITY;
}

fn min_value<F: FlowValue>(a: F, b: F) -> F {
    if b < a {
        b
    } else {
        a
    }
}

#[derive(Clone, Copy, Debug)]
struct ResidualArc<F> {
    to: usize,
    cap: F,
    cost: F,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FlowResult<F> {
    pub flow: F,
    pub cost: F,
}

/// Residual graph; arc `2k` is a forward arc and `2k + 1` its reverse.
#[derive(Clone, Debug)]
pub struct FlowNetwork<F> {
    arcs: Vec<ResidualArc<F>>,
    adjacency: Vec<Vec<usize>>,
}

impl<F: FlowValue> FlowNetwork<F> {
    pub fn new(nodes: usize) -> Self {
        Self {
            arcs: Vec::new(),
            adjacency: vec![Vec::new(); nodes],
        }
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.arcs.len() / 2
    }

    /// Add an arc and return its id for [`FlowNetwork::flow_on`].
    pub fn add_edge(&mut self, from: usize, to: usize, cap: F, cost: F) -> usize {
        debug_assert!(cost >= F::ZERO, "arc costs must be non-negative");
        let id = self.arcs.len();
        self.arcs.push(ResidualArc { to, cap, cost });
        self.arcs.push(ResidualArc {
            to: from,
            cap: F::ZERO,
            cost: -cost,
        });
        self.adjacency[from].push(id);
        self.adjacency[to].push(id + 1);
        id
    }

    /// Flow currently routed over the arc returned by `add_edge`.
    pub fn flow_on(&self, edge: usize) -> F {
        self.arcs[edge ^ 1].cap
    }

    /// Push as much flow as possible from `source` to `sink` at minimum cost.
    pub fn min_cost_max_flow(&mut self, source: usize, sink: usize) -> FlowResult<F> {
        let n = self.node_count();
        let mut potential = vec![F::ZERO; n];
        let mut dist = vec![F::INFINITY; n];
        let mut prev_arc = vec![usize::MAX; n];
        let mut done = vec![false; n];
        let mut total_flow = F::ZERO;
        let mut total_cost = F::ZERO;

        if source == sink {
            return FlowResult {
                flow: total_flow,
                cost: total_cost,
            };
        }

        loop {
            dist.fill(F::INFINITY);
            prev_arc.fill(usize::MAX);
            done.fill(false);
            dist[source] = F::ZERO;

            for _ in 0..n {
                let mut u = usize::MAX;
                for v in 0..n {
                    if !done[v] && dist[v] < F::INFINITY && (u == usize::MAX || dist[v] < dist[u]) {
                        u = v;
                    }
                }
                if u == usize::MAX {
                    break;
                }
                done[u] = true;
                for &a in &self.adjacency[u] {
                    let arc = self.arcs[a];
                    if arc.cap <= F::EPSILON || done[arc.to] {
                        continue;
                    }
                    let reduced = arc.cost + potential[u] - potential[arc.to];
                    let candidate = dist[u] + reduced;
                    if candidate < dist[arc.to] {
                        dist[arc.to] = candidate;
                        prev_arc[arc.to] = a;
                    }
                }
            }

            if !(dist[sink] < F::INFINITY) {
                break;
            }
            for v in 0..n {
                if dist[v] < F::INFINITY {
                    potential[v] = potential[v] + dist[v];
                }
            }

            let mut push = F::INFINITY;
            let mut v = sink;
            while v != source {
                let a = prev_arc[v];
                push = min_value(push, self.arcs[a].cap);
                v = self.arcs[a ^ 1].to;
            }

            let mut path_cost = F::ZERO;
            let mut v = sink;
            while v != source {
                let a = prev_arc[v];
                self.arcs[a].cap = self.arcs[a].cap - push;
                self.arcs[a ^ 1].cap = self.arcs[a ^ 1].cap + push;
                path_cost = path_cost + self.arcs[a].cost;
                v = self.arcs[a ^ 1].to;
            }
            total_flow = total_flow + push;
            total_cost = total_cost + push * path_cost;
        }

        FlowResult {
            flow: total_flow,
            cost: total_cost,
        }
    }
}
