//! Typed event bus for cross-component notification.
//!
//! Producers post a [`SwarmEvent`] through an [`EventBus`] handle; consumers
//! subscribe and receive their own copy of every event. The bus is an
//! explicit channel passed to each component at construction; there is no
//! global listener registry.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::memory::MemoryTier;
use crate::types::AgentType;
use crate::workflow::Phase;

/// Default capacity of the broadcast channel backing an [`EventBus`].
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the orchestration core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SwarmEvent {
    /// An agent was spawned into a pool or the orchestrator registry.
    AgentSpawned {
        agent_id: Uuid,
        agent_type: AgentType,
    },
    /// An idle agent was retired during scale-down.
    AgentRetired { agent_id: Uuid },
    /// A task was bound to an agent.
    TaskAssigned { task_id: Uuid, agent_id: Uuid },
    /// A task completed with the given quality score.
    TaskCompleted {
        task_id: Uuid,
        agent_id: Uuid,
        quality: f64,
    },
    /// A task failed; the agent slot has been released.
    TaskFailed {
        task_id: Uuid,
        agent_id: Option<Uuid>,
        message: String,
    },
    /// A task entered a pool queue because no worker was eligible.
    TaskQueued { task_id: Uuid, pool_id: Uuid },
    /// A pool was resized by the auto-scaler.
    PoolScaled {
        pool_id: Uuid,
        from: usize,
        to: usize,
    },
    /// A memory entry moved up one tier.
    MemoryPromoted {
        key: String,
        from: MemoryTier,
        to: MemoryTier,
    },
    /// A memory entry was evicted or expired.
    MemoryEvicted { key: String, tier: MemoryTier },
    /// A boomerang refinement request was sent to an agent.
    BoomerangSent {
        boomerang_id: Uuid,
        task_id: Uuid,
        category: String,
    },
    /// A boomerang loop terminated successfully.
    BoomerangCompleted {
        boomerang_id: Uuid,
        refinements: u32,
    },
    /// A boomerang loop terminated in failure (timeout or cancellation).
    BoomerangFailed { boomerang_id: Uuid, reason: String },
    /// A workflow advanced to the next phase.
    PhaseAdvanced { workflow_id: Uuid, phase: Phase },
    /// A workflow finished all phases.
    WorkflowCompleted { workflow_id: Uuid },
    /// A workflow failed a quality gate with refinements exhausted.
    WorkflowFailed { workflow_id: Uuid, reason: String },
}

/// Cloneable handle to the swarm's event channel.
///
/// Emission never blocks: if no subscriber is attached the event is dropped
/// (the channel error is logged at debug level and otherwise ignored).
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SwarmEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Post an event to all current subscribers.
    pub fn emit(&self, event: SwarmEvent) {
        log::debug!("event: {:?}", event);
        if self.sender.send(event).is_err() {
            // No subscribers attached; the event is intentionally dropped.
        }
    }

    /// Open a new subscription. Each subscriber receives every event emitted
    /// after the call.
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let agent_id = Uuid::new_v4();
        bus.emit(SwarmEvent::AgentSpawned {
            agent_id,
            agent_type: AgentType::Research,
        });

        match rx.recv().await.unwrap() {
            SwarmEvent::AgentSpawned { agent_id: id, .. } => assert_eq!(id, agent_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        // Must not panic or error.
        bus.emit(SwarmEvent::WorkflowCompleted {
            workflow_id: Uuid::new_v4(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_each_subscriber_gets_a_copy() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(SwarmEvent::AgentRetired {
            agent_id: Uuid::new_v4(),
        });

        assert!(matches!(rx1.recv().await.unwrap(), SwarmEvent::AgentRetired { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), SwarmEvent::AgentRetired { .. }));
    }
}
