//! Network topologies governing agent adjacency and routing.
//!
//! A topology is a pure graph abstraction: given a set of agents and a
//! shape, it computes neighbor sets, message paths, task-routing targets,
//! and aggregate network metrics. It has no knowledge of memory or
//! workflows; callers feed it snapshots of agent status and load through
//! [`Topology::update_agent`].

mod hierarchical;
mod mesh;
mod star;

pub use hierarchical::HierarchicalTopology;
pub use mesh::MeshTopology;
pub use star::StarTopology;

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SwarmError;
use crate::task::Task;
use crate::types::{AgentStatus, AgentType};

/// Modeled latency per hop, in milliseconds.
pub const HOP_LATENCY_MS: u64 = 5;

/// Connection-count multiple above the network average at which an agent is
/// reported as a bottleneck.
pub const BOTTLENECK_FACTOR: f64 = 1.5;

/// Shape tag for a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyShape {
    /// Agents partitioned into ordered layers with parent/child/peer links.
    Hierarchical,
    /// Every agent pair directly adjacent.
    Mesh,
    /// All spokes linked only to a single coordinator.
    Star,
}

/// Construction parameters for a topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Which shape to build.
    pub shape: TopologyShape,
    /// Maximum number of member agents.
    pub max_agents: usize,
    /// Coordinator agent id. Mandatory for star topologies.
    pub coordinator: Option<Uuid>,
    /// Number of layers. Hierarchical only; defaults to 3.
    pub layer_count: Option<usize>,
}

/// The slice of agent state a topology needs for routing decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyAgent {
    /// Agent identifier.
    pub id: Uuid,
    /// Capability type, used for layer placement and task preference.
    pub agent_type: AgentType,
    /// Lifecycle status snapshot.
    pub status: AgentStatus,
    /// Number of tasks currently held.
    pub current_load: usize,
    /// Concurrency limit.
    pub capacity: usize,
}

/// Result of routing a message through the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRoute {
    /// Agent ids along the route, source first.
    pub path: Vec<Uuid>,
    /// Number of hops taken.
    pub hops: usize,
    /// Modeled latency: `hops * HOP_LATENCY_MS`.
    pub latency_ms: u64,
}

impl MessageRoute {
    fn from_path(path: Vec<Uuid>) -> Self {
        let hops = path.len().saturating_sub(1);
        Self {
            path,
            hops,
            latency_ms: hops as u64 * HOP_LATENCY_MS,
        }
    }
}

/// Aggregate network metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkMetrics {
    /// 1.0 iff the agent graph is connected, else 0.0.
    pub connectivity: f64,
    /// Mean shortest-path length over all reachable agent pairs.
    pub average_path_length: f64,
    /// `1 / (1 + stddev)` of per-agent routed-task counts; 1.0 is perfectly
    /// balanced.
    pub load_balance_score: f64,
    /// Agents whose connection count exceeds [`BOTTLENECK_FACTOR`] times the
    /// network average.
    pub bottlenecks: Vec<Uuid>,
}

/// Routing and adjacency contract shared by all shapes.
pub trait Topology: Send + Sync {
    /// The configured shape.
    fn shape(&self) -> TopologyShape;

    /// Add an agent, keeping the adjacency structure consistent with the
    /// shape. Re-adding a known id refreshes its snapshot without rewiring.
    fn add_agent(&mut self, agent: TopologyAgent) -> Result<(), SwarmError>;

    /// Remove an agent. Removing an unknown id is a no-op.
    fn remove_agent(&mut self, id: Uuid);

    /// Refresh an agent's status/load snapshot.
    fn update_agent(&mut self, id: Uuid, status: AgentStatus, current_load: usize);

    /// Whether the agent is a member.
    fn contains(&self, id: Uuid) -> bool;

    /// Number of member agents.
    fn agent_count(&self) -> usize;

    /// Ids of all member agents, sorted.
    fn member_ids(&self) -> Vec<Uuid>;

    /// Compute the path for a direct send (`to` given) or a broadcast
    /// (`to` absent; the path visits every reachable agent in BFS order).
    fn route_message(&self, from: Uuid, to: Option<Uuid>) -> Result<MessageRoute, SwarmError>;

    /// Choose an agent for the task: idle agents of the task's type first,
    /// then any idle agent, then the least-loaded member. Returns `None`
    /// for an empty topology. Increments the chosen agent's routed-task
    /// counter.
    fn route_task(&mut self, task: &Task) -> Option<Uuid>;

    /// Direct neighbors of an agent.
    fn neighbors(&self, id: Uuid) -> Vec<Uuid>;

    /// Compute aggregate network metrics.
    fn calculate_metrics(&self) -> NetworkMetrics;

    /// Shape-specific reset (e.g. mesh round restart).
    fn reorganize(&mut self);
}

/// Build a topology from its configuration.
///
/// Fails with a validation error when a star topology is missing its
/// coordinator.
pub fn build_topology(config: TopologyConfig) -> Result<Box<dyn Topology>, SwarmError> {
    match config.shape {
        TopologyShape::Hierarchical => Ok(Box::new(HierarchicalTopology::new(config))),
        TopologyShape::Mesh => Ok(Box::new(MeshTopology::new(config))),
        TopologyShape::Star => {
            let coordinator = config.coordinator.ok_or_else(|| {
                SwarmError::Validation("star topology requires a coordinator".into())
            })?;
            Ok(Box::new(StarTopology::new(config, coordinator)))
        }
    }
}

// ---------------------------------------------------------------------------
// Shared graph helpers
// ---------------------------------------------------------------------------

pub(crate) type Links = HashMap<Uuid, HashSet<Uuid>>;

/// Shortest path between two nodes by BFS, inclusive of both endpoints.
pub(crate) fn bfs_path(links: &Links, from: Uuid, to: Uuid) -> Option<Vec<Uuid>> {
    if from == to {
        return Some(vec![from]);
    }
    let mut visited: HashSet<Uuid> = HashSet::from([from]);
    let mut parents: HashMap<Uuid, Uuid> = HashMap::new();
    let mut queue: VecDeque<Uuid> = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        let mut nexts: Vec<Uuid> = links
            .get(&current)
            .map(|n| n.iter().copied().collect())
            .unwrap_or_default();
        nexts.sort();
        for next in nexts {
            if visited.insert(next) {
                parents.insert(next, current);
                if next == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&parent) = parents.get(&cursor) {
                        path.push(parent);
                        cursor = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
    }
    None
}

/// All nodes reachable from `from`, in BFS order (including `from`).
pub(crate) fn bfs_order(links: &Links, from: Uuid) -> Vec<Uuid> {
    let mut visited: HashSet<Uuid> = HashSet::from([from]);
    let mut order = vec![from];
    let mut queue: VecDeque<Uuid> = VecDeque::from([from]);
    while let Some(current) = queue.pop_front() {
        let mut nexts: Vec<Uuid> = links
            .get(&current)
            .map(|n| n.iter().copied().collect())
            .unwrap_or_default();
        nexts.sort();
        for next in nexts {
            if visited.insert(next) {
                order.push(next);
                queue.push_back(next);
            }
        }
    }
    order
}

/// Whether the graph over `links` is connected. Empty and single-node
/// graphs count as connected.
pub(crate) fn is_connected(links: &Links) -> bool {
    let Some(&start) = links.keys().min() else {
        return true;
    };
    bfs_order(links, start).len() == links.len()
}

/// Mean shortest-path length over all reachable ordered pairs.
pub(crate) fn average_path_length(links: &Links) -> f64 {
    let nodes: Vec<Uuid> = links.keys().copied().collect();
    if nodes.len() < 2 {
        return 0.0;
    }
    let mut total = 0usize;
    let mut pairs = 0usize;
    for &from in &nodes {
        for &to in &nodes {
            if from == to {
                continue;
            }
            if let Some(path) = bfs_path(links, from, to) {
                total += path.len() - 1;
                pairs += 1;
            }
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total as f64 / pairs as f64
    }
}

/// `1 / (1 + stddev)` over per-agent routed-task counts.
pub(crate) fn load_balance_score(task_counts: &HashMap<Uuid, usize>) -> f64 {
    if task_counts.is_empty() {
        return 1.0;
    }
    let n = task_counts.len() as f64;
    let mean = task_counts.values().sum::<usize>() as f64 / n;
    let variance = task_counts
        .values()
        .map(|&c| (c as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    1.0 / (1.0 + variance.sqrt())
}

/// Agents whose connection count exceeds `BOTTLENECK_FACTOR` times the
/// network average.
pub(crate) fn find_bottlenecks(links: &Links) -> Vec<Uuid> {
    if links.is_empty() {
        return Vec::new();
    }
    let avg = links.values().map(|n| n.len()).sum::<usize>() as f64 / links.len() as f64;
    let mut out: Vec<Uuid> = links
        .iter()
        .filter(|(_, n)| n.len() as f64 > BOTTLENECK_FACTOR * avg)
        .map(|(&id, _)| id)
        .collect();
    out.sort();
    out
}

/// Shared task-routing preference: idle agents of the task's type, then any
/// idle agent, then the least-loaded member. Ties break on the routed-task
/// counter, then deterministically on id.
pub(crate) fn prefer_agent(
    agents: &HashMap<Uuid, TopologyAgent>,
    task_counts: &HashMap<Uuid, usize>,
    task_type: AgentType,
) -> Option<Uuid> {
    let count_of = |id: &Uuid| task_counts.get(id).copied().unwrap_or(0);

    let pick_min = |candidates: Vec<&TopologyAgent>| -> Option<Uuid> {
        candidates
            .into_iter()
            .min_by_key(|a| (count_of(&a.id), a.current_load, a.id))
            .map(|a| a.id)
    };

    let idle_of_type: Vec<&TopologyAgent> = agents
        .values()
        .filter(|a| a.status == AgentStatus::Idle && a.agent_type == task_type)
        .collect();
    if !idle_of_type.is_empty() {
        return pick_min(idle_of_type);
    }

    let idle: Vec<&TopologyAgent> = agents
        .values()
        .filter(|a| a.status == AgentStatus::Idle)
        .collect();
    if !idle.is_empty() {
        return pick_min(idle);
    }

    agents
        .values()
        .min_by_key(|a| (a.current_load, count_of(&a.id), a.id))
        .map(|a| a.id)
}

#[cfg(test)]
pub(crate) fn test_agent(agent_type: AgentType) -> TopologyAgent {
    TopologyAgent {
        id: Uuid::new_v4(),
        agent_type,
        status: AgentStatus::Idle,
        current_load: 0,
        capacity: 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_graph() -> (Vec<Uuid>, Links) {
        // a - b - c
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut links: Links = HashMap::new();
        links.insert(ids[0], HashSet::from([ids[1]]));
        links.insert(ids[1], HashSet::from([ids[0], ids[2]]));
        links.insert(ids[2], HashSet::from([ids[1]]));
        (ids, links)
    }

    #[test]
    fn test_bfs_path_on_line() {
        let (ids, links) = line_graph();
        let path = bfs_path(&links, ids[0], ids[2]).unwrap();
        assert_eq!(path, vec![ids[0], ids[1], ids[2]]);
    }

    #[test]
    fn test_connectivity() {
        let (_, links) = line_graph();
        assert!(is_connected(&links));

        let mut disconnected = links.clone();
        disconnected.insert(Uuid::new_v4(), HashSet::new());
        assert!(!is_connected(&disconnected));
    }

    #[test]
    fn test_average_path_length_line() {
        let (_, links) = line_graph();
        // Ordered pairs: a-b 1, a-c 2, b-a 1, b-c 1, c-a 2, c-b 1 -> 8/6.
        let avg = average_path_length(&links);
        assert!((avg - 8.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_load_balance_score_uniform_is_one() {
        let mut counts = HashMap::new();
        counts.insert(Uuid::new_v4(), 2);
        counts.insert(Uuid::new_v4(), 2);
        assert!((load_balance_score(&counts) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bottleneck_detection() {
        // Star-like graph: hub connected to 3 spokes.
        let hub = Uuid::new_v4();
        let spokes: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let mut links: Links = HashMap::new();
        links.insert(hub, spokes.iter().copied().collect());
        for &s in &spokes {
            links.insert(s, HashSet::from([hub]));
        }
        // Average connections = 6/4 = 1.5; hub has 3 > 1.5 * 1.5.
        assert_eq!(find_bottlenecks(&links), vec![hub]);
    }

    #[test]
    fn test_star_requires_coordinator() {
        let config = TopologyConfig {
            shape: TopologyShape::Star,
            max_agents: 10,
            coordinator: None,
            layer_count: None,
        };
        assert!(matches!(
            build_topology(config),
            Err(SwarmError::Validation(_))
        ));
    }
}
