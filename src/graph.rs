use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stable handle into the world's agent arena.
pub type AgentHandle = usize;

/// Scale-free contact graph of one region.
///
/// Nodes carry stable integer ids and each owns exactly one agent handle.
/// Residents get their nodes at construction via preferential attachment;
/// inbound travelers get a node on first visit which is kept for reuse on
/// later visits (the code map prevents duplicate nodes per agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactGraph {
    adjacency: Vec<Vec<usize>>,
    occupants: Vec<AgentHandle>,
    /// Number of resident nodes; nodes past this index belong to visitors.
    resident_count: usize,
    node_by_code: HashMap<String, usize>,
}

impl ContactGraph {
    /// Build the resident graph by preferential attachment.
    ///
    /// Each new node connects to `m` distinct existing nodes chosen with
    /// degree-proportional probability (the first `m + 1` nodes form a
    /// complete seed).
    pub fn preferential_attachment(
        residents: &[(AgentHandle, String)],
        m: usize,
        rng: &mut ChaCha12Rng,
    ) -> Result<Self> {
        let n = residents.len();
        if n == 0 {
            bail!("cannot build a contact graph without residents");
        }
        if m == 0 || m >= n {
            bail!("attachment parameter must be in 1..{n}, but is {m}");
        }

        let mut graph = Self {
            adjacency: vec![Vec::new(); n],
            occupants: residents.iter().map(|(handle, _)| *handle).collect(),
            resident_count: n,
            node_by_code: residents
                .iter()
                .enumerate()
                .map(|(node, (_, code))| (code.clone(), node))
                .collect(),
        };

        // Endpoint list repeated by degree; sampling from it is
        // degree-proportional.
        let mut endpoints: Vec<usize> = Vec::new();

        let seed = (m + 1).min(n);
        for u in 0..seed {
            for v in (u + 1)..seed {
                graph.add_edge(u, v);
                endpoints.push(u);
                endpoints.push(v);
            }
        }

        for node in seed..n {
            let mut targets: Vec<usize> = Vec::with_capacity(m);
            while targets.len() < m {
                let &candidate = endpoints
                    .choose(rng)
                    .context("endpoint list is unexpectedly empty")?;
                if candidate != node && !targets.contains(&candidate) {
                    targets.push(candidate);
                }
            }
            for target in targets {
                graph.add_edge(node, target);
                endpoints.push(node);
                endpoints.push(target);
            }
        }

        Ok(graph)
    }

    fn add_edge(&mut self, u: usize, v: usize) {
        if u == v || self.adjacency[u].contains(&v) {
            return;
        }
        self.adjacency[u].push(v);
        self.adjacency[v].push(u);
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn resident_count(&self) -> usize {
        self.resident_count
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        &self.adjacency[node]
    }

    pub fn agent_at(&self, node: usize) -> AgentHandle {
        self.occupants[node]
    }

    pub fn node_of_code(&self, code: &str) -> Option<usize> {
        self.node_by_code.get(code).copied()
    }

    /// All agent handles with a node in this graph (residents + past
    /// visitors); presence must be checked against the agent itself.
    pub fn handles(&self) -> impl Iterator<Item = AgentHandle> + '_ {
        self.occupants.iter().copied()
    }

    /// Undirected edge list, each edge reported once.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.adjacency
            .iter()
            .enumerate()
            .flat_map(|(u, nbrs)| nbrs.iter().filter(move |&&v| u < v).map(move |&v| (u, v)))
    }

    /// Link a visiting agent into the graph.
    ///
    /// On a first visit a new node is created and wired to a randomly
    /// chosen resident plus that resident's neighbors (preserving local
    /// clustering); on a repeat visit the existing node is reused.
    pub fn insert_visitor(
        &mut self,
        handle: AgentHandle,
        code: &str,
        rng: &mut ChaCha12Rng,
    ) -> Result<usize> {
        if let Some(node) = self.node_of_code(code) {
            return Ok(node);
        }

        let host = rng.random_range(0..self.resident_count);
        let node = self.adjacency.len();
        self.adjacency.push(Vec::new());
        self.occupants.push(handle);
        self.node_by_code.insert(code.to_owned(), node);

        self.add_edge(node, host);
        let host_neighbors: Vec<usize> = self.adjacency[host].clone();
        for neighbor in host_neighbors {
            self.add_edge(node, neighbor);
        }

        Ok(node)
    }
}
