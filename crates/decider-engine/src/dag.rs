//! DAG resolution for the jobs of a decision run.

use crate::registry::JobRegistry;
use decider_core::JobRef;
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Dependency cycle between jobs: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),
    #[error("Job \"{job}\" depends on unknown job \"{dependency}\"")]
    UnknownDependency { job: String, dependency: String },
}

impl From<DagError> for decider_core::Error {
    fn from(err: DagError) -> Self {
        match err {
            DagError::CycleDetected(jobs) => decider_core::Error::DependencyCycle { jobs },
            DagError::UnknownDependency { job, dependency } => {
                decider_core::Error::UnresolvedDependency { job, dependency }
            }
        }
    }
}

/// A node in the job DAG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub logical_name: String,
    /// Position of the job in registration order.
    pub position: usize,
}

/// Directed acyclic graph of job dependencies. Edges point from a producer
/// to the jobs that consume it.
#[derive(Debug)]
pub struct JobDag {
    graph: DiGraph<DagNode, ()>,
    name_to_index: HashMap<String, NodeIndex>,
}

impl JobDag {
    /// Jobs with no in-run dependencies.
    pub fn roots(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
                    == 0
            })
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Jobs that consume the given job.
    pub fn successors(&self, logical_name: &str) -> Vec<&DagNode> {
        self.neighbors(logical_name, Direction::Outgoing)
    }

    /// Jobs the given job depends on.
    pub fn predecessors(&self, logical_name: &str) -> Vec<&DagNode> {
        self.neighbors(logical_name, Direction::Incoming)
    }

    /// Jobs sorted so that every job comes after its dependencies.
    pub fn topological_order(&self) -> Result<Vec<&DagNode>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|cycle| DagError::CycleDetected(self.cycle_through(cycle.node_id())))
    }

    pub fn jobs(&self) -> Vec<&DagNode> {
        self.graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn neighbors(&self, logical_name: &str, direction: Direction) -> Vec<&DagNode> {
        self.name_to_index
            .get(logical_name)
            .map(|&idx| {
                let mut nodes: Vec<&DagNode> = self
                    .graph
                    .neighbors_directed(idx, direction)
                    .filter_map(|n| self.graph.node_weight(n))
                    .collect();
                nodes.sort_by_key(|node| node.position);
                nodes
            })
            .unwrap_or_default()
    }

    /// Names of the jobs in the strongly connected component containing
    /// `node`, in registration order, with the first repeated at the end.
    fn cycle_through(&self, node: NodeIndex) -> Vec<String> {
        let component = tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| scc.contains(&node))
            .unwrap_or_else(|| vec![node]);

        let mut members: Vec<&DagNode> = component
            .iter()
            .filter_map(|&idx| self.graph.node_weight(idx))
            .collect();
        members.sort_by_key(|node| node.position);

        let mut names: Vec<String> = members.iter().map(|n| n.logical_name.clone()).collect();
        if let Some(first) = names.first().cloned() {
            names.push(first);
        }
        names
    }
}

/// Builder for constructing job DAGs.
pub struct DagBuilder;

impl DagBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build the DAG of every job in the registry.
    ///
    /// Reused jobs are nodes without incoming edges: what they depended on
    /// ran in an earlier run. Already-resolved references point outside the
    /// run and add no edge.
    pub fn build(&self, registry: &JobRegistry) -> Result<JobDag, DagError> {
        let mut graph = DiGraph::new();
        let mut name_to_index = HashMap::new();

        for (position, entry) in registry.entries().iter().enumerate() {
            let node = DagNode {
                logical_name: entry.logical_name().to_string(),
                position,
            };
            let idx = graph.add_node(node);
            name_to_index.insert(entry.logical_name().to_string(), idx);
        }

        for entry in registry.entries().iter().filter(|e| e.completed().is_none()) {
            let job_idx = name_to_index[entry.logical_name()];
            for dependency in &entry.descriptor().dependencies {
                let JobRef::Pending(name) = dependency else {
                    continue;
                };
                let dep_idx =
                    name_to_index
                        .get(name)
                        .ok_or_else(|| DagError::UnknownDependency {
                            job: entry.logical_name().to_string(),
                            dependency: name.clone(),
                        })?;
                graph.add_edge(*dep_idx, job_idx, ());
            }
        }

        let dag = JobDag {
            graph,
            name_to_index,
        };

        // Verify no cycles
        dag.topological_order()?;

        Ok(dag)
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
