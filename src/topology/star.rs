//! Star topology: one coordinator, spokes linked only to it.

use std::collections::HashMap;

use uuid::Uuid;

use crate::errors::SwarmError;
use crate::task::Task;
use crate::types::AgentStatus;

use super::{
    average_path_length, bfs_order, find_bottlenecks, is_connected, load_balance_score,
    prefer_agent, Links, MessageRoute, NetworkMetrics, Topology, TopologyAgent, TopologyConfig,
    TopologyShape,
};

/// Hub-and-spoke topology. The coordinator id is mandatory at
/// construction; every other agent links only to the coordinator, so a
/// spoke-to-spoke message is two hops through the hub. Losing the
/// coordinator elects the agent with the highest `capacity - current_load`
/// and rebuilds the graph around it.
pub struct StarTopology {
    config: TopologyConfig,
    coordinator: Uuid,
    agents: HashMap<Uuid, TopologyAgent>,
    links: Links,
    task_counts: HashMap<Uuid, usize>,
}

impl StarTopology {
    /// Create a star around the given coordinator id. The coordinator
    /// becomes a member once an agent with that id is added.
    pub fn new(config: TopologyConfig, coordinator: Uuid) -> Self {
        Self {
            config,
            coordinator,
            agents: HashMap::new(),
            links: HashMap::new(),
            task_counts: HashMap::new(),
        }
    }

    /// The current coordinator id.
    pub fn coordinator(&self) -> Uuid {
        self.coordinator
    }

    /// Wire every member to the coordinator and nothing else.
    fn rebuild_links(&mut self) {
        self.links.clear();
        for &id in self.agents.keys() {
            self.links.entry(id).or_default();
            if id != self.coordinator && self.agents.contains_key(&self.coordinator) {
                self.links.entry(id).or_default().insert(self.coordinator);
                self.links
                    .entry(self.coordinator)
                    .or_default()
                    .insert(id);
            }
        }
    }

    /// Elect the member with the highest `capacity - current_load`,
    /// breaking ties deterministically by id.
    fn elect_coordinator(&self) -> Option<Uuid> {
        self.agents
            .values()
            .max_by(|a, b| {
                let score_a = a.capacity as i64 - a.current_load as i64;
                let score_b = b.capacity as i64 - b.current_load as i64;
                score_a.cmp(&score_b).then_with(|| b.id.cmp(&a.id))
            })
            .map(|a| a.id)
    }
}

impl Topology for StarTopology {
    fn shape(&self) -> TopologyShape {
        TopologyShape::Star
    }

    fn add_agent(&mut self, agent: TopologyAgent) -> Result<(), SwarmError> {
        if let Some(existing) = self.agents.get_mut(&agent.id) {
            *existing = agent;
            return Ok(());
        }
        if self.agents.len() >= self.config.max_agents {
            return Err(SwarmError::Capacity(format!(
                "star topology is at its maximum of {} agents",
                self.config.max_agents
            )));
        }
        let id = agent.id;
        self.agents.insert(id, agent);
        self.task_counts.insert(id, 0);
        self.rebuild_links();
        Ok(())
    }

    fn remove_agent(&mut self, id: Uuid) {
        if self.agents.remove(&id).is_none() {
            return;
        }
        self.task_counts.remove(&id);
        if id == self.coordinator {
            if let Some(new_coordinator) = self.elect_coordinator() {
                log::info!(
                    "star coordinator {} lost, electing {}",
                    id,
                    new_coordinator
                );
                self.coordinator = new_coordinator;
            }
        }
        self.rebuild_links();
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
                let path = if from == to {
                    vec![from]
                } else if from == self.coordinator || to == self.coordinator {
                    vec![from, to]
                } else {
                    // Spoke to spoke relays through the hub.
                    vec![from, self.coordinator, to]
                };
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
        self.rebuild_links();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_agent;
    use super::*;
    use crate::types::AgentType;

    fn star() -> (StarTopology, Uuid, Uuid, Uuid) {
        let coordinator = test_agent(AgentType::Architect);
        let c = coordinator.id;
        let config = TopologyConfig {
            shape: TopologyShape::Star,
            max_agents: 16,
            coordinator: Some(c),
            layer_count: None,
        };
        let mut topology = StarTopology::new(config, c);
        topology.add_agent(coordinator).unwrap();

        let spoke_a = test_agent(AgentType::Research);
        let spoke_b = test_agent(AgentType::Implementation);
        let (a, b) = (spoke_a.id, spoke_b.id);
        topology.add_agent(spoke_a).unwrap();
        topology.add_agent(spoke_b).unwrap();
        (topology, c, a, b)
    }

    #[test]
    fn test_spoke_to_spoke_relays_through_hub() {
        let (topology, c, a, b) = star();

        let route = topology.route_message(a, Some(b)).unwrap();
        assert_eq!(route.path, vec![a, c, b]);
        assert_eq!(route.hops, 2);

        let route = topology.route_message(c, Some(a)).unwrap();
        assert_eq!(route.path, vec![c, a]);
        assert_eq!(route.hops, 1);
    }

    #[test]
    fn test_spokes_link_only_to_coordinator() {
        let (topology, c, a, b) = star();
        assert_eq!(topology.neighbors(a), vec![c]);
        let mut hub_neighbors = topology.neighbors(c);
        hub_neighbors.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(hub_neighbors, expected);
    }

    #[test]
    fn test_coordinator_loss_triggers_election() {
        let (mut topology, c, a, b) = star();
        // Load the spokes unevenly so the election is deterministic.
        topology.update_agent(a, AgentStatus::Busy, 2);
        topology.update_agent(b, AgentStatus::Idle, 0);

        topology.remove_agent(c);
        assert_eq!(topology.coordinator(), b);

        // Graph is rebuilt around the new hub.
        let route = topology.route_message(a, Some(b)).unwrap();
        assert_eq!(route.path, vec![a, b]);
    }

    #[test]
    fn test_broadcast_covers_all_members() {
        let (topology, c, _, _) = star();
        let route = topology.route_message(c, None).unwrap();
        assert_eq!(route.path.len(), 3);
        assert_eq!(route.path[0], c);
    }
}
