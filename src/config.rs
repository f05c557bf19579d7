//! Swarm configuration with documented defaults.

use serde::{Deserialize, Serialize};

use crate::pool::LoadBalancingStrategy;
use crate::types::AgentType;

/// Configuration for the orchestration core.
///
/// All intervals are in seconds. Defaults mirror a small single-process
/// deployment; every field can be overridden before constructing the swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Maximum number of agents per capability type.
    pub max_agents_per_type: usize,
    /// Agent types spawned when the swarm is initialized.
    pub default_agent_types: Vec<AgentType>,
    /// Load-balancing strategy used when none is given at pool creation.
    pub load_balance_strategy: LoadBalancingStrategy,

    /// Whether the boomerang refinement loop is enabled.
    pub enable_boomerang: bool,
    /// Whether the five-phase project workflow is enabled.
    pub enable_phased_workflows: bool,
    /// Maximum refinement cycles per boomerang task.
    pub max_refinements: u32,

    /// Interval between pool auto-scale checks, in seconds.
    pub autoscale_interval_secs: u64,
    /// Interval between memory maintenance sweeps, in seconds.
    pub memory_maintenance_interval_secs: u64,
    /// Interval between boomerang timeout sweeps, in seconds.
    pub boomerang_sweep_interval_secs: u64,

    /// Per-call timeout for collaborator integrations, in seconds.
    pub integration_timeout_secs: u64,
    /// Retry attempts for collaborator calls before reporting failure.
    pub integration_max_retries: u32,

    /// Capacity of the working memory tier.
    pub working_memory_capacity: usize,
    /// Capacity of the episodic memory tier.
    pub episodic_memory_capacity: usize,
    /// Capacity of the persistent memory tier.
    pub persistent_memory_capacity: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_agents_per_type: 10,
            default_agent_types: vec![
                AgentType::Research,
                AgentType::Architect,
                AgentType::Implementation,
                AgentType::Testing,
                AgentType::Review,
            ],
            load_balance_strategy: LoadBalancingStrategy::LeastLoaded,
            enable_boomerang: true,
            enable_phased_workflows: true,
            max_refinements: 3,
            autoscale_interval_secs: 30,
            memory_maintenance_interval_secs: 60,
            boomerang_sweep_interval_secs: 30,
            integration_timeout_secs: 30,
            integration_max_retries: 3,
            working_memory_capacity: 100,
            episodic_memory_capacity: 1_000,
            persistent_memory_capacity: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SwarmConfig::default();
        assert_eq!(config.max_agents_per_type, 10);
        assert_eq!(config.default_agent_types.len(), 5);
        assert!(config.enable_boomerang);
        assert_eq!(config.max_refinements, 3);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = SwarmConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SwarmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.episodic_memory_capacity, 1_000);
    }
}
