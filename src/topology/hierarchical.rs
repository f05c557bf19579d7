//! Hierarchical topology: agents partitioned into ordered layers.

use std::collections::HashMap;

use uuid::Uuid;

use crate::errors::SwarmError;
use crate::task::Task;
use crate::types::{AgentStatus, AgentType};

use super::{
    average_path_length, bfs_order, bfs_path, find_bottlenecks, is_connected, load_balance_score,
    prefer_agent, Links, MessageRoute, NetworkMetrics, Topology, TopologyAgent, TopologyConfig,
    TopologyShape,
};

/// Default number of layers when the configuration does not specify one.
pub const DEFAULT_LAYER_COUNT: usize = 3;

/// Layered topology. Placement is a deterministic rule on capability type:
/// the coordinating role sits in layer 0, reviewing and documenting roles
/// in layer 1, everything else in the bottom layer. Each agent links to the
/// full parent layer, the full child layer, and its same-layer peers. The
/// first layer-0 agent acts as coordinator; removing it promotes the next
/// remaining layer-0 agent.
pub struct HierarchicalTopology {
    config: TopologyConfig,
    layer_count: usize,
    agents: HashMap<Uuid, TopologyAgent>,
    /// Layer index per member.
    layers: HashMap<Uuid, usize>,
    /// Layer-0 members in insertion order; the head is the coordinator.
    top_layer_order: Vec<Uuid>,
    links: Links,
    task_counts: HashMap<Uuid, usize>,
}

impl HierarchicalTopology {
    /// Create an empty hierarchy.
    pub fn new(config: TopologyConfig) -> Self {
        let layer_count = config.layer_count.unwrap_or(DEFAULT_LAYER_COUNT).max(1);
        Self {
            config,
            layer_count,
            agents: HashMap::new(),
            layers: HashMap::new(),
            top_layer_order: Vec::new(),
            links: HashMap::new(),
            task_counts: HashMap::new(),
        }
    }

    /// The current coordinator: the first remaining layer-0 agent.
    pub fn coordinator(&self) -> Option<Uuid> {
        self.top_layer_order.first().copied()
    }

    /// Layer index for an agent type.
    fn layer_for(&self, agent_type: AgentType) -> usize {
        match agent_type {
            AgentType::Architect => 0,
            AgentType::Review | AgentType::Documentation => 1.min(self.layer_count - 1),
            _ => self.layer_count - 1,
        }
    }

    /// Recompute adjacency: parent layer, child layer, and same-layer peers.
    fn rebuild_links(&mut self) {
        self.links.clear();
        for &id in self.agents.keys() {
            self.links.entry(id).or_default();
        }
        let members: Vec<(Uuid, usize)> =
            self.layers.iter().map(|(&id, &layer)| (id, layer)).collect();
        for &(id, layer) in &members {
            for &(other, other_layer) in &members {
                if id == other {
                    continue;
                }
                let delta = layer.abs_diff(other_layer);
                if delta <= 1 {
                    self.links.entry(id).or_default().insert(other);
                    self.links.entry(other).or_default().insert(id);
                }
            }
        }
    }
}

impl Topology for HierarchicalTopology {
    fn shape(&self) -> TopologyShape {
        TopologyShape::Hierarchical
    }

    fn add_agent(&mut self, agent: TopologyAgent) -> Result<(), SwarmError> {
        if let Some(existing) = self.agents.get_mut(&agent.id) {
            *existing = agent;
            return Ok(());
        }
        if self.agents.len() >= self.config.max_agents {
            return Err(SwarmError::Capacity(format!(
                "hierarchical topology is at its maximum of {} agents",
                self.config.max_agents
            )));
        }
        let id = agent.id;
        let layer = self.layer_for(agent.agent_type);
        self.layers.insert(id, layer);
        if layer == 0 {
            self.top_layer_order.push(id);
        }
        self.agents.insert(id, agent);
        self.task_counts.insert(id, 0);
        self.rebuild_links();
        Ok(())
    }

    fn remove_agent(&mut self, id: Uuid) {
        if self.agents.remove(&id).is_none() {
            return;
        }
        let was_coordinator = self.coordinator() == Some(id);
        self.layers.remove(&id);
        self.top_layer_order.retain(|&t| t != id);
        self.task_counts.remove(&id);
        if was_coordinator {
            if let Some(next) = self.coordinator() {
                log::info!("hierarchy coordinator {} lost, promoting {}", id, next);
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
        self.rebuild_links();
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_agent;
    use super::*;

    fn hierarchy() -> HierarchicalTopology {
        HierarchicalTopology::new(TopologyConfig {
            shape: TopologyShape::Hierarchical,
            max_agents: 16,
            coordinator: None,
            layer_count: Some(3),
        })
    }

    #[test]
    fn test_layer_placement_by_role() {
        let topology = hierarchy();
        assert_eq!(topology.layer_for(AgentType::Architect), 0);
        assert_eq!(topology.layer_for(AgentType::Review), 1);
        assert_eq!(topology.layer_for(AgentType::Documentation), 1);
        assert_eq!(topology.layer_for(AgentType::Implementation), 2);
        assert_eq!(topology.layer_for(AgentType::Research), 2);
    }

    #[test]
    fn test_adjacent_layers_linked_skip_layers_not() {
        let mut topology = hierarchy();
        let architect = test_agent(AgentType::Architect);
        let reviewer = test_agent(AgentType::Review);
        let worker = test_agent(AgentType::Implementation);
        let (top, mid, bottom) = (architect.id, reviewer.id, worker.id);
        topology.add_agent(architect).unwrap();
        topology.add_agent(reviewer).unwrap();
        topology.add_agent(worker).unwrap();

        assert_eq!(topology.neighbors(top), vec![mid]);
        assert!(topology.neighbors(mid).contains(&top));
        assert!(topology.neighbors(mid).contains(&bottom));
        // Layer 0 and layer 2 are not directly linked.
        assert!(!topology.neighbors(top).contains(&bottom));

        // Messages from top to bottom traverse the middle layer.
        let route = topology.route_message(top, Some(bottom)).unwrap();
        assert_eq!(route.path, vec![top, mid, bottom]);
        assert_eq!(route.hops, 2);
    }

    #[test]
    fn test_coordinator_promotion_on_removal() {
        let mut topology = hierarchy();
        let first = test_agent(AgentType::Architect);
        let second = test_agent(AgentType::Architect);
        let (a, b) = (first.id, second.id);
        topology.add_agent(first).unwrap();
        topology.add_agent(second).unwrap();

        assert_eq!(topology.coordinator(), Some(a));
        topology.remove_agent(a);
        assert_eq!(topology.coordinator(), Some(b));
    }

    #[test]
    fn test_same_layer_peers_linked() {
        let mut topology = hierarchy();
        let w1 = test_agent(AgentType::Implementation);
        let w2 = test_agent(AgentType::Testing);
        let (a, b) = (w1.id, w2.id);
        topology.add_agent(w1).unwrap();
        topology.add_agent(w2).unwrap();
        assert_eq!(topology.neighbors(a), vec![b]);
    }
}
