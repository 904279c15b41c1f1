use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::types::EffectiveConfig;

/// Dependency graph over the enabled instances of one stack. Nodes live in
/// an arena keyed by instance id; edges are indices into it.
pub struct DependencyGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// edges[i] lists the nodes instance i depends on.
    edges: Vec<Vec<usize>>,
}

/// A dependency pointing at an instance that is absent or disabled. Reported
/// as a warning, not an error, so a partial stack still applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrippedDependency {
    pub from: String,
    pub to: String,
}

impl DependencyGraph {
    /// Build from effective configs. Edges to targets outside the set are
    /// stripped and reported.
    pub fn build(configs: &[EffectiveConfig]) -> (Self, Vec<StrippedDependency>) {
        let nodes: Vec<String> = configs.iter().map(|c| c.instance_id.clone()).collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut edges = vec![Vec::new(); nodes.len()];
        let mut stripped = Vec::new();
        for (i, config) in configs.iter().enumerate() {
            for dep in &config.depends_on {
                match index.get(dep) {
                    Some(&target) if target != i => edges[i].push(target),
                    Some(_) => {
                        // self-edge, drop silently
                    }
                    None => stripped.push(StrippedDependency {
                        from: config.instance_id.clone(),
                        to: dep.clone(),
                    }),
                }
            }
        }

        (
            Self {
                nodes,
                index,
                edges,
            },
            stripped,
        )
    }

    /// Dependencies of one instance that survived stripping.
    pub fn deps_of(&self, instance_id: &str) -> Vec<&str> {
        match self.index.get(instance_id) {
            Some(&i) => self.edges[i]
                .iter()
                .map(|&t| self.nodes[t].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Topological order: dependencies before dependents, lexicographic
    /// among the ready set so the order is deterministic. A cycle is a
    /// `validation` error naming its members.
    pub fn topo_order(&self) -> Result<Vec<String>> {
        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        // dependents[t] lists nodes that depend on t.
        let mut dependents = vec![Vec::new(); n];
        for (i, deps) in self.edges.iter().enumerate() {
            indegree[i] = deps.len();
            for &t in deps {
                dependents[t].push(i);
            }
        }

        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        ready.sort_by(|&a, &b| self.nodes[a].cmp(&self.nodes[b]));

        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.first().copied() {
            ready.remove(0);
            order.push(self.nodes[next].clone());
            for &dependent in &dependents[next] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    let pos = ready
                        .binary_search_by(|&x| self.nodes[x].cmp(&self.nodes[dependent]))
                        .unwrap_or_else(|p| p);
                    ready.insert(pos, dependent);
                }
            }
        }

        if order.len() < n {
            let mut cycle: Vec<&str> = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.nodes[i].as_str())
                .collect();
            cycle.sort_unstable();
            return Err(Error::validation(format!(
                "dependency cycle among instances: {}",
                cycle.join(" -> ")
            ))
            .with_field("depends_on"));
        }
        Ok(order)
    }
}
