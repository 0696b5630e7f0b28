use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::analysis::FormulaInfo;

/// The formula batch cannot be ordered: some assignment chain reads its
/// own output. Fatal for the whole batch; no partial schedule exists.
#[derive(Debug, Clone, thiserror::Error)]
#[error("formula batch contains a cyclic dependency")]
pub struct CycleError;

// ── Directed graph ───────────────────────────────────────────────────

/// Adjacency-list digraph over dense vertex indices.
#[derive(Debug, Clone)]
pub struct Digraph {
    adj: Vec<Vec<usize>>,
    indegree: Vec<usize>,
    edges: usize,
}

impl Digraph {
    pub fn new(vertices: usize) -> Self {
        Digraph {
            adj: vec![Vec::new(); vertices],
            indegree: vec![0; vertices],
            edges: 0,
        }
    }

    pub fn v(&self) -> usize {
        self.adj.len()
    }

    pub fn e(&self) -> usize {
        self.edges
    }

    pub fn add_edge(&mut self, u: usize, v: usize) {
        self.adj[u].push(v);
        self.indegree[v] += 1;
        self.edges += 1;
    }

    pub fn adj(&self, v: usize) -> &[usize] {
        &self.adj[v]
    }

    pub fn indegree(&self, v: usize) -> usize {
        self.indegree[v]
    }
}

impl fmt::Display for Digraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} vertices, {} edges", self.v(), self.e())?;
        for v in 0..self.v() {
            write!(f, "{}: ", v)?;
            for w in &self.adj[v] {
                write!(f, "{} ", w)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Kahn's algorithm. Returns the vertex order, or `None` when fewer
/// vertices drain than exist, i.e. the graph has a cycle.
pub fn topological_order(graph: &Digraph) -> Option<Vec<usize>> {
    let mut indegree: Vec<usize> = (0..graph.v()).map(|v| graph.indegree(v)).collect();
    let mut queue: VecDeque<usize> = (0..graph.v()).filter(|&v| indegree[v] == 0).collect();
    let mut order = Vec::with_capacity(graph.v());

    while let Some(u) = queue.pop_front() {
        order.push(u);
        for &v in graph.adj(u) {
            indegree[v] -= 1;
            if indegree[v] == 0 {
                queue.push_back(v);
            }
        }
    }

    (order.len() == graph.v()).then_some(order)
}

// ── Variable nodes ───────────────────────────────────────────────────

#[derive(Debug)]
struct Node {
    name: String,
    /// Batch position of the formula that first wrote this variable.
    formula: Option<usize>,
}

/// Interns variable names to dense indices in first-seen order.
#[derive(Debug, Default)]
struct NodeSet {
    index: HashMap<String, usize>,
    nodes: Vec<Node>,
}

impl NodeSet {
    fn intern(&mut self, name: &str) -> usize {
        if let Some(&ix) = self.index.get(name) {
            return ix;
        }
        let ix = self.nodes.len();
        self.index.insert(name.to_string(), ix);
        self.nodes.push(Node { name: name.to_string(), formula: None });
        ix
    }

    fn get(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }
}

// ── Scheduler ────────────────────────────────────────────────────────

/// Builds the variable dependency graph of a batch and produces an
/// execution order in which producers run before consumers.
///
/// Only assignment formulas participate: each one contributes an edge
/// from every variable it reads to every variable it writes. The first
/// formula to write a variable is attached to that variable's node;
/// later writers of the same name keep the original attachment and are
/// therefore dropped from the sorted portion of the schedule.
pub struct Scheduler {
    nodes: NodeSet,
    graph: Option<Digraph>,
}

impl Scheduler {
    pub fn build(infos: &[FormulaInfo]) -> Self {
        let mut nodes = NodeSet::default();

        for (position, info) in infos.iter().enumerate() {
            if !info.is_assign() {
                continue;
            }
            for name in info.precursors() {
                nodes.intern(name);
            }
            let mut first = true;
            for name in info.successors() {
                let ix = nodes.intern(name);
                if first && nodes.nodes[ix].formula.is_none() {
                    nodes.nodes[ix].formula = Some(position);
                }
                first = false;
            }
        }

        let graph = if nodes.len() == 0 {
            None
        } else {
            let mut graph = Digraph::new(nodes.len());
            for info in infos {
                if !info.is_assign() {
                    continue;
                }
                for precursor in info.precursors() {
                    let Some(u) = nodes.get(precursor) else { continue };
                    for successor in info.successors() {
                        let Some(v) = nodes.get(successor) else { continue };
                        graph.add_edge(u, v);
                    }
                }
            }
            Some(graph)
        };

        Scheduler { nodes, graph }
    }

    /// Whether the batch contains at least one assignment formula.
    pub fn has_assign(&self) -> bool {
        self.graph.as_ref().is_some_and(|g| g.v() > 0)
    }

    pub fn graph(&self) -> Option<&Digraph> {
        self.graph.as_ref()
    }

    /// The execution order as positions into the batch slice: attached
    /// assignment formulas in topological node order, then every
    /// non-assignment formula in its original relative order.
    pub fn plan(&self, infos: &[FormulaInfo]) -> Result<Vec<usize>, CycleError> {
        let Some(graph) = &self.graph else {
            return Ok((0..infos.len()).collect());
        };

        let order = topological_order(graph).ok_or(CycleError)?;

        let mut result = Vec::with_capacity(infos.len());
        for node_ix in order {
            if let Some(position) = self.nodes.nodes[node_ix].formula {
                result.push(position);
            }
        }
        for (position, info) in infos.iter().enumerate() {
            if !info.is_assign() {
                result.push(position);
            }
        }
        Ok(result)
    }
}
