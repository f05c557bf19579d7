//! # Hivemind
//!
//! Multi-agent swarm orchestration: pluggable network topologies, worker
//! pools with load balancing and auto-scaling, tiered memory with
//! score-driven promotion, a boomerang feedback-refinement loop, and a
//! five-phase project workflow state machine.
//!
//! All state lives in a single process. Agents are opaque execution slots
//! identified by capability type; real work happens behind the
//! [`orchestrator::TaskExecutor`] hook, and everything that must survive a
//! restart goes through the [`persistence::DurableStore`] boundary.

pub mod agent;
pub mod boomerang;
pub mod config;
pub mod errors;
pub mod events;
pub mod integrations;
pub mod memory;
pub mod orchestrator;
pub mod persistence;
pub mod pool;
pub mod surface;
pub mod swarm;
pub mod task;
pub mod topology;
pub mod types;
pub mod workflow;

pub use agent::Agent;
pub use boomerang::{BoomerangManager, BoomerangStatus, BoomerangTask, RefinementCategory};
pub use config::SwarmConfig;
pub use errors::SwarmError;
pub use events::{EventBus, SwarmEvent};
pub use memory::{MemoryEntry, MemoryTier, TieredMemory};
pub use orchestrator::{AgentOrchestrator, ExecutionOutcome, TaskExecutor};
pub use persistence::{DurableStore, InMemoryStore, SqliteStore};
pub use pool::{LoadBalancingStrategy, WorkerPoolManager};
pub use swarm::Swarm;
pub use task::Task;
pub use topology::{Topology, TopologyConfig, TopologyShape};
pub use types::{AgentStatus, AgentType, SwarmStats, TaskStatus};
pub use workflow::{Phase, PhaseWorkflow, PhaseWorkflowManager, WorkflowStatus};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
