//! Mesh topology: every agent pair directly adjacent.

use std::collections::HashMap;

use uuid::Uuid;

use crate::errors::SwarmError;
use crate::task::Task;
use crate::types::AgentStatus;

use super::{
    average_path_length, bfs_order, bfs_path, find_bottlenecks, is_connected, load_balance_score,
    prefer_agent, Links, MessageRoute, NetworkMetrics, Topology, TopologyAgent, TopologyConfig,
    TopologyShape,
};

/// Fully connected topology. Joining an agent links it bidirectionally to
/// every existing member; task routing tracks a per-agent assignment
/// counter and always picks the minimum. [`Topology::reorganize`] resets
/// the counters (a round restart) rather than rewiring.
pub struct MeshTopology {
    config: TopologyConfig,
    agents: HashMap<Uuid, TopologyAgent>,
    links: Links,
    task_counts: HashMap<Uuid, usize>,
}

impl MeshTopology {
    /// Create an empty mesh.
    pub fn new(config: TopologyConfig) -> Self {
        Self {
            config,
            agents: HashMap::new(),
            links: HashMap::new(),
            task_counts: HashMap::new(),
        }
    }
}

impl Topology for MeshTopology {
    fn shape(&self) -> TopologyShape {
        TopologyShape::Mesh
    }

    fn add_agent(&mut self, agent: TopologyAgent) -> Result<(), SwarmError> {
        if let Some(existing) = self.agents.get_mut(&agent.id) {
            *existing = agent;
            return Ok(());
        }
        if self.agents.len() >= self.config.max_agents {
            return Err(SwarmError::Capacity(format!(
                "mesh topology is at its maximum of {} agents",
                self.config.max_agents
            )));
        }

        let id = agent.id;
        let others: Vec<Uuid> = self.links.keys().copied().collect();
        for other in others {
            self.links.entry(other).or_default().insert(id);
            self.links.entry(id).or_default().insert(other);
        }
        self.links.entry(id).or_default();
        self.agents.insert(id, agent);
        self.task_counts.insert(id, 0);
        Ok(())
    }

    fn remove_agent(&mut self, id: Uuid) {
        if self.agents.remove(&id).is_none() {
            return;
        }
        self.links.remove(&id);
        for neighbors in self.links.values_mut() {
            neighbors.remove(&id);
        }
        self.task_counts.remove(&id);
    }

    fn update_agent(&mut self, id: Uuid, status: AgentStatus, current_load: usize) {
        if let Some(agent) = self.agents.get_mut(&id) {
            agent.status = status;
            agent.current_load = current_load;
        }
    }

    fn contains(&self, id: Uuid) -> bool {
        self.agents.contains_key(&id)
    }

    fn agent_count(&self) -> usize {
        self.agents.len()
    }

    fn member_ids(&self) -> Vec<Uuid> {
        let mut out: Vec<Uuid> = self.agents.keys().copied().collect();
        out.sort();
        out
    }

    fn route_message(&self, from: Uuid, to: Option<Uuid>) -> Result<MessageRoute, SwarmError> {
        if !self.agents.contains_key(&from) {
            return Err(SwarmError::NotFound { kind: "agent", id: from.to_string() });
        }
        match to {
            Some(to) => {
                if !self.agents.contains_key(&to) {
                    return Err(SwarmError::NotFound { kind: "agent", id: to.to_string() });
                }
                let path = bfs_path(&self.links, from, to).ok_or_else(|| {
                    SwarmError::Validation(format!("no route from {} to {}", from, to))
                })?;
                Ok(MessageRoute::from_path(path))
            }
            None => Ok(MessageRoute::from_path(bfs_order(&self.links, from))),
        }
    }

    fn route_task(&mut self, task: &Task) -> Option<Uuid> {
        let chosen = prefer_agent(&self.agents, &self.task_counts, task.agent_type)?;
        *self.task_counts.entry(chosen).or_insert(0) += 1;
        Some(chosen)
    }

    fn neighbors(&self, id: Uuid) -> Vec<Uuid> {
        let mut out: Vec<Uuid> = self
            .links
            .get(&id)
            .map(|n| n.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    fn calculate_metrics(&self) -> NetworkMetrics {
        NetworkMetrics {
            connectivity: if is_connected(&self.links) { 1.0 } else { 0.0 },
            average_path_length: average_path_length(&self.links),
            load_balance_score: load_balance_score(&self.task_counts),
            bottlenecks: find_bottlenecks(&self.links),
        }
    }

    fn reorganize(&mut self) {
        for count in self.task_counts.values_mut() {
            *count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_agent;
    use super::*;
    use crate::types::AgentType;

    fn mesh_with(n: usize) -> (MeshTopology, Vec<Uuid>) {
        let config = TopologyConfig {
            shape: TopologyShape::Mesh,
            max_agents: 16,
            coordinator: None,
            layer_count: None,
        };
        let mut mesh = MeshTopology::new(config);
        let mut ids = Vec::new();
        for _ in 0..n {
            let agent = test_agent(AgentType::Implementation);
            ids.push(agent.id);
            mesh.add_agent(agent).unwrap();
        }
        (mesh, ids)
    }

    #[test]
    fn test_full_adjacency() {
        let (mesh, ids) = mesh_with(4);
        for &id in &ids {
            assert_eq!(mesh.neighbors(id).len(), 3);
        }
        let metrics = mesh.calculate_metrics();
        assert_eq!(metrics.connectivity, 1.0);
        assert!((metrics.average_path_length - 1.0).abs() < 1e-9);
        assert!(metrics.bottlenecks.is_empty());
    }

    #[test]
    fn test_route_task_picks_minimum_counter() {
        let (mut mesh, ids) = mesh_with(3);
        let task = Task::new("work", AgentType::Implementation, 3);

        let mut chosen = Vec::new();
        for _ in 0..3 {
            chosen.push(mesh.route_task(&task).unwrap());
        }
        // Each agent routed exactly once before any repeats.
        let unique: std::collections::HashSet<_> = chosen.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn test_reorganize_resets_counters() {
        let (mut mesh, _) = mesh_with(2);
        let task = Task::new("work", AgentType::Implementation, 3);
        mesh.route_task(&task).unwrap();
        mesh.route_task(&task).unwrap();
        mesh.reorganize();
        assert!(mesh.task_counts.values().all(|&c| c == 0));
    }

    #[test]
    fn test_remove_agent_idempotent() {
        let (mut mesh, ids) = mesh_with(2);
        mesh.remove_agent(ids[0]);
        assert_eq!(mesh.agent_count(), 1);
        // Second removal is a no-op.
        mesh.remove_agent(ids[0]);
        assert_eq!(mesh.agent_count(), 1);
        assert!(mesh.neighbors(ids[1]).is_empty());
    }

    #[test]
    fn test_capacity_enforced() {
        let (mut mesh, _) = mesh_with(16);
        let err = mesh.add_agent(test_agent(AgentType::Research));
        assert!(matches!(err, Err(SwarmError::Capacity(_))));
    }
}
