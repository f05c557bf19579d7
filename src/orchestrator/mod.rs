//! Agent orchestrator: composite-score agent selection, task delegation
//! through a pluggable execution hook, and assignment tracking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::agent::Agent;
use crate::errors::SwarmError;
use crate::events::{EventBus, SwarmEvent};
use crate::pool::WorkerPoolManager;
use crate::task::Task;
use crate::topology::{Topology, TopologyAgent};
use crate::types::{AgentStatus, AgentType, SwarmStats, TaskStatus};

/// Default wall-clock bound on a single task execution.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Weight of the performance term in the selection score.
const SCORE_PERFORMANCE_WEIGHT: f64 = 50.0;
/// Weight of the spare-capacity term in the selection score.
const SCORE_CAPACITY_WEIGHT: f64 = 30.0;
/// Maximum recency bonus, decaying by one point per idle hour.
const SCORE_RECENCY_CAP: f64 = 20.0;

/// Optional filters applied before scoring candidate agents.
#[derive(Debug, Clone, Default)]
pub struct SelectionCriteria {
    /// Capability tags the agent must carry.
    pub required_capabilities: Vec<String>,
    /// Ceiling on `current_load / max_concurrent_tasks`.
    pub max_load: Option<f64>,
    /// Floor on the agent's performance score for the task type.
    pub min_performance: Option<f64>,
    /// Agent must have been active at or after this instant.
    pub active_since: Option<DateTime<Utc>>,
}

/// Result of one task execution.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// The produced output.
    pub output: String,
    /// Caller-supplied or computed quality signal in [0, 1].
    pub quality_score: f64,
}

/// Capability-typed execution hook invoked with the task payload.
///
/// This is the seam where real work happens; the orchestrator only manages
/// selection, slots, and bookkeeping around it.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Execute the task on behalf of the agent.
    async fn execute(&self, agent: &Agent, task: &Task) -> Result<ExecutionOutcome, SwarmError>;
}

/// Executor wrapping a synchronous closure. Useful for tests and for
/// callers whose execution is not naturally async.
pub struct FnExecutor {
    f: Box<dyn Fn(&Agent, &Task) -> Result<ExecutionOutcome, SwarmError> + Send + Sync>,
}

impl FnExecutor {
    /// Wrap a closure as an executor.
    pub fn new(
        f: impl Fn(&Agent, &Task) -> Result<ExecutionOutcome, SwarmError> + Send + Sync + 'static,
    ) -> Self {
        Self { f: Box::new(f) }
    }

    /// Executor that echoes the task description with a fixed quality score.
    pub fn echo(quality: f64) -> Self {
        Self::new(move |agent, task| {
            Ok(ExecutionOutcome {
                output: format!("[{}] {}", agent.name, task.description),
                quality_score: quality,
            })
        })
    }
}

#[async_trait]
impl TaskExecutor for FnExecutor {
    async fn execute(&self, agent: &Agent, task: &Task) -> Result<ExecutionOutcome, SwarmError> {
        (self.f)(agent, task)
    }
}

/// Selects agents, delegates tasks, and tracks active assignments.
///
/// The orchestrator owns the task registry and the topology; worker agents
/// are owned by the embedded [`WorkerPoolManager`] and reached only through
/// its public operations.
pub struct AgentOrchestrator {
    pools: WorkerPoolManager,
    topology: Box<dyn Topology>,
    tasks: HashMap<Uuid, Task>,
    /// `task id -> agent id` for in-flight delegations.
    assignments: HashMap<Uuid, Uuid>,
    executor: Arc<dyn TaskExecutor>,
    execution_timeout: Duration,
    events: EventBus,
}

impl AgentOrchestrator {
    /// Create an orchestrator over the given pools, topology, and executor.
    pub fn new(
        pools: WorkerPoolManager,
        topology: Box<dyn Topology>,
        executor: Arc<dyn TaskExecutor>,
        events: EventBus,
    ) -> Self {
        Self {
            pools,
            topology,
            tasks: HashMap::new(),
            assignments: HashMap::new(),
            executor,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            events,
        }
    }

    /// Override the per-task execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// The embedded pool manager.
    pub fn pools(&self) -> &WorkerPoolManager {
        &self.pools
    }

    /// Mutable access to the embedded pool manager.
    pub fn pools_mut(&mut self) -> &mut WorkerPoolManager {
        &mut self.pools
    }

    /// The active topology.
    pub fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }

    // -----------------------------------------------------------------------
    // Task registry
    // -----------------------------------------------------------------------

    /// Register a new pending task and return its id.
    pub fn create_task(
        &mut self,
        description: impl Into<String>,
        agent_type: AgentType,
        priority: u8,
        dependencies: Vec<Uuid>,
    ) -> Uuid {
        let task = Task::new(description, agent_type, priority).with_dependencies(dependencies);
        let id = task.id;
        log::info!("created task {} ({}, priority {})", id, task.agent_type, task.priority);
        self.tasks.insert(id, task);
        id
    }

    /// Register an externally built task (workflow-generated tasks enter
    /// through this path).
    pub fn register_task(&mut self, task: Task) -> Uuid {
        let id = task.id;
        self.tasks.insert(id, task);
        id
    }

    /// Snapshot of a task.
    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.get(&task_id).cloned()
    }

    /// Snapshot of tasks, optionally filtered by status and type.
    pub fn list_tasks(&self, status: Option<TaskStatus>, agent_type: Option<AgentType>) -> Vec<Task> {
        let mut out: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| status.map(|s| t.status == s).unwrap_or(true))
            .filter(|t| agent_type.map(|a| t.agent_type == a).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        out
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Find the best available agent for a task type.
    ///
    /// Filters to agents that are idle-or-learning, under their concurrency
    /// limit, and matching all given criteria, then scores the survivors as
    /// `50*performance + 30*(spare/max) + max(0, 20 - hoursSinceActive)`
    /// and returns the top score. Ties break deterministically on id.
    pub fn find_available_agent(
        &self,
        agent_type: AgentType,
        criteria: Option<&SelectionCriteria>,
    ) -> Option<Agent> {
        let candidates = self.pools.agents_snapshot(Some(agent_type));
        let mut best: Option<(f64, Agent)> = None;
        for agent in candidates {
            if !agent.is_available() {
                continue;
            }
            if let Some(criteria) = criteria {
                if !criteria
                    .required_capabilities
                    .iter()
                    .all(|cap| agent.capabilities.contains(cap))
                {
                    continue;
                }
                if let Some(max_load) = criteria.max_load {
                    let load = agent.current_load() as f64 / agent.max_concurrent_tasks as f64;
                    if load > max_load {
                        continue;
                    }
                }
                if let Some(floor) = criteria.min_performance {
                    if agent.performance_for(agent_type) < floor {
                        continue;
                    }
                }
                if let Some(cutoff) = criteria.active_since {
                    if agent.last_active_at < cutoff {
                        continue;
                    }
                }
            }
            let score = selection_score(&agent, agent_type);
            let better = match &best {
                None => true,
                Some((best_score, best_agent)) => {
                    score > *best_score || (score == *best_score && agent.id < best_agent.id)
                }
            };
            if better {
                best = Some((score, agent));
            }
        }
        best.map(|(_, agent)| agent)
    }

    /// Mirror the pool manager's agent registry into the topology so routing
    /// decisions see current membership, status, and load.
    pub fn sync_topology(&mut self) {
        let agents = self.pools.agents_snapshot(None);
        let mut keep: std::collections::HashSet<Uuid> =
            std::collections::HashSet::with_capacity(agents.len());
        for agent in &agents {
            keep.insert(agent.id);
            let snapshot = TopologyAgent {
                id: agent.id,
                agent_type: agent.agent_type,
                status: agent.status,
                current_load: agent.current_load(),
                capacity: agent.max_concurrent_tasks,
            };
            if let Err(err) = self.topology.add_agent(snapshot) {
                log::warn!("topology rejected agent {}: {}", agent.id, err);
            }
        }
        // Drop members the pools no longer know.
        for id in self.topology.member_ids() {
            if !keep.contains(&id) {
                self.topology.remove_agent(id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Delegation
    // -----------------------------------------------------------------------

    /// Delegate a task to an agent and drive it to completion through the
    /// execution hook.
    ///
    /// With no explicit agent the topology's routing preference is consulted
    /// first, falling back to composite-score selection. Executor failures
    /// are caught at the task boundary: the task is marked `failed`, the
    /// agent goes to `error` with its slot freed, and a failure event is
    /// emitted. The error is not propagated to the caller.
    pub async fn delegate_task(
        &mut self,
        task_id: Uuid,
        agent_id: Option<Uuid>,
    ) -> Result<Task, SwarmError> {
        let task = self
            .tasks
            .get(&task_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "task", id: task_id.to_string() })?
            .clone();
        if task.is_terminal() || task.status == TaskStatus::Running {
            return Err(SwarmError::Validation(format!(
                "task {} cannot be delegated from status {}",
                task_id, task.status
            )));
        }

        self.sync_topology();
        let chosen = match agent_id {
            Some(id) => id,
            None => {
                let routed = self
                    .topology
                    .route_task(&task)
                    .and_then(|id| self.pools.agent(id))
                    .filter(|a| a.is_available() && a.agent_type == task.agent_type)
                    .map(|a| a.id);
                match routed.or_else(|| self.find_available_agent(task.agent_type, None).map(|a| a.id)) {
                    Some(id) => id,
                    None => {
                        return Err(SwarmError::Capacity(format!(
                            "no available {} agent for task {}",
                            task.agent_type, task_id
                        )))
                    }
                }
            }
        };

        let agent = self
            .pools
            .agent(chosen)
            .ok_or_else(|| SwarmError::NotFound { kind: "agent", id: chosen.to_string() })?;
        if !agent.is_available() {
            return Err(SwarmError::Capacity(format!("agent {} is not available", chosen)));
        }

        self.pools.assign_agent(chosen, task_id)?;
        self.assignments.insert(task_id, chosen);
        {
            let task = self.tasks.get_mut(&task_id).expect("fetched above");
            task.mark_assigned(chosen);
            task.mark_running();
        }
        self.events.emit(SwarmEvent::TaskAssigned { task_id, agent_id: chosen });
        log::info!("delegated task {} to agent {} ({})", task_id, chosen, agent.name);

        let running = self.tasks.get(&task_id).expect("fetched above").clone();
        let result =
            tokio::time::timeout(self.execution_timeout, self.executor.execute(&agent, &running))
                .await
                .unwrap_or_else(|_| {
                    Err(SwarmError::Timeout(format!(
                        "task {} exceeded {:?}",
                        task_id, self.execution_timeout
                    )))
                });

        match result {
            Ok(outcome) => Ok(self.finish_task(task_id, outcome)),
            Err(err) => Ok(self.fail_task(task_id, err.to_string())),
        }
    }

    /// Record successful completion: update the task, free the agent slot,
    /// fold the outcome into the agent's history, and emit an event.
    fn finish_task(&mut self, task_id: Uuid, outcome: ExecutionOutcome) -> Task {
        let agent_id = self.assignments.remove(&task_id);
        let task = self.tasks.get_mut(&task_id).expect("task exists while running");
        task.mark_completed(outcome.output, outcome.quality_score);
        let duration = task.execution_duration_ms().unwrap_or(0);
        let snapshot = task.clone();

        if let Some(agent_id) = agent_id {
            if let Err(err) = self.pools.release_agent(
                agent_id,
                task_id,
                snapshot.agent_type,
                true,
                duration,
                snapshot.quality_score.unwrap_or(0.0),
            ) {
                log::warn!("failed to release agent {}: {}", agent_id, err);
            }
            self.events.emit(SwarmEvent::TaskCompleted {
                task_id,
                agent_id,
                quality: snapshot.quality_score.unwrap_or(0.0),
            });
        }
        snapshot
    }

    /// Record a failed execution: the task carries the message, the agent
    /// enters `error` with its slot freed, and a failure event is emitted.
    fn fail_task(&mut self, task_id: Uuid, message: String) -> Task {
        let agent_id = self.assignments.remove(&task_id);
        let task = self.tasks.get_mut(&task_id).expect("task exists while running");
        task.mark_failed(message.clone());
        let duration = task.execution_duration_ms().unwrap_or(0);
        let snapshot = task.clone();

        if let Some(agent_id) = agent_id {
            if let Err(err) = self.pools.release_agent(
                agent_id,
                task_id,
                snapshot.agent_type,
                false,
                duration,
                0.0,
            ) {
                log::warn!("failed to release agent {}: {}", agent_id, err);
            }
            if let Err(err) = self.pools.set_agent_status(agent_id, AgentStatus::Error) {
                log::warn!("failed to flag agent {}: {}", agent_id, err);
            }
        }
        log::warn!("task {} failed: {}", task_id, message);
        self.events.emit(SwarmEvent::TaskFailed { task_id, agent_id, message });
        snapshot
    }

    /// Move an assigned task to a newly selected agent.
    pub fn reassign_task(&mut self, task_id: Uuid, reason: &str) -> Result<Uuid, SwarmError> {
        let task = self
            .tasks
            .get(&task_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "task", id: task_id.to_string() })?
            .clone();
        if task.is_terminal() {
            return Err(SwarmError::Validation(format!(
                "task {} is {} and cannot be reassigned",
                task_id, task.status
            )));
        }
        let previous = self.assignments.get(&task_id).copied();

        let replacement = self
            .find_available_agent(task.agent_type, None)
            .filter(|a| Some(a.id) != previous)
            .ok_or_else(|| {
                SwarmError::Capacity(format!(
                    "no alternative {} agent for task {}",
                    task.agent_type, task_id
                ))
            })?;

        if let Some(previous) = previous {
            self.pools.unassign_agent(previous, task_id)?;
        }
        self.pools.assign_agent(replacement.id, task_id)?;
        self.assignments.insert(task_id, replacement.id);
        self.tasks
            .get_mut(&task_id)
            .expect("fetched above")
            .mark_assigned(replacement.id);
        log::info!(
            "reassigned task {} to agent {} ({})",
            task_id,
            replacement.id,
            reason
        );
        self.events.emit(SwarmEvent::TaskAssigned { task_id, agent_id: replacement.id });
        Ok(replacement.id)
    }

    /// Cancel a task, releasing its agent slot.
    pub fn cancel_task(&mut self, task_id: Uuid) -> Result<(), SwarmError> {
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "task", id: task_id.to_string() })?;
        if task.is_terminal() {
            return Err(SwarmError::Validation(format!(
                "task {} is already {}",
                task_id, task.status
            )));
        }
        task.mark_cancelled();
        if let Some(agent_id) = self.assignments.remove(&task_id) {
            self.pools.unassign_agent(agent_id, task_id)?;
        }
        log::info!("cancelled task {}", task_id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    /// Aggregate snapshot across agents, tasks, and pool queues.
    pub fn swarm_stats(&self) -> SwarmStats {
        let agents = self.pools.agents_snapshot(None);
        let mut stats = SwarmStats {
            total_agents: agents.len(),
            total_tasks: self.tasks.len(),
            task_queue_length: self.pools.queued_task_count(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending_tasks += 1,
                TaskStatus::Running => stats.running_tasks += 1,
                TaskStatus::Completed => stats.completed_tasks += 1,
                TaskStatus::Failed => stats.failed_tasks += 1,
                _ => {}
            }
        }
        for agent in &agents {
            match agent.status {
                AgentStatus::Idle => stats.idle_agents += 1,
                AgentStatus::Busy => stats.busy_agents += 1,
                _ => {}
            }
        }
        stats
    }
}

/// Composite selection score:
/// `50*performance + 30*(spare/max) + max(0, 20 - hoursSinceActive)`.
fn selection_score(agent: &Agent, task_type: AgentType) -> f64 {
    let performance = agent.performance_for(task_type);
    let capacity_ratio = agent.spare_capacity() as f64 / agent.max_concurrent_tasks.max(1) as f64;
    let recency = (SCORE_RECENCY_CAP - agent.hours_since_active()).max(0.0);
    SCORE_PERFORMANCE_WEIGHT * performance + SCORE_CAPACITY_WEIGHT * capacity_ratio + recency
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::LoadBalancingStrategy;
    use crate::topology::{build_topology, TopologyConfig, TopologyShape};

    fn orchestrator(executor: Arc<dyn TaskExecutor>) -> AgentOrchestrator {
        let events = EventBus::default();
        let mut pools = WorkerPoolManager::new(events.clone());
        pools
            .create_pool(AgentType::Research, 2, 4, LoadBalancingStrategy::LeastLoaded)
            .unwrap();
        pools
            .create_pool(AgentType::Implementation, 1, 3, LoadBalancingStrategy::LeastLoaded)
            .unwrap();
        let topology = build_topology(TopologyConfig {
            shape: TopologyShape::Mesh,
            max_agents: 32,
            coordinator: None,
            layer_count: None,
        })
        .unwrap();
        AgentOrchestrator::new(pools, topology, executor, events)
    }

    #[tokio::test]
    async fn test_delegate_completes_and_frees_agent() {
        let mut orchestrator = orchestrator(Arc::new(FnExecutor::echo(0.9)));
        let task_id = orchestrator.create_task("survey the field", AgentType::Research, 3, vec![]);

        let task = orchestrator.delegate_task(task_id, None).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.quality_score, Some(0.9));
        assert!(task.output.as_deref().unwrap().contains("survey the field"));

        // The agent's slot is freed and the outcome is in its history.
        let agent = orchestrator.pools().agent(task.assigned_agent.unwrap()).unwrap();
        assert_eq!(agent.current_load(), 0);
        assert_eq!(agent.stats.tasks_completed, 1);
    }

    #[tokio::test]
    async fn test_executor_failure_is_contained() {
        let failing = FnExecutor::new(|_, _| Err(SwarmError::Integration("tool exploded".into())));
        let mut orchestrator = orchestrator(Arc::new(failing));
        let task_id = orchestrator.create_task("doomed", AgentType::Research, 3, vec![]);

        // The call succeeds; the failure lives on the task and the agent.
        let task = orchestrator.delegate_task(task_id, None).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("tool exploded"));

        let agent = orchestrator.pools().agent(task.assigned_agent.unwrap()).unwrap();
        assert_eq!(agent.status, AgentStatus::Error);
        assert!(agent.current_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_selection_prefers_proven_performer() {
        let mut orchestrator = orchestrator(Arc::new(FnExecutor::echo(0.95)));
        // Build history on one agent by running a task through it.
        let warmup = orchestrator.create_task("warmup", AgentType::Research, 2, vec![]);
        let done = orchestrator.delegate_task(warmup, None).await.unwrap();
        let veteran = done.assigned_agent.unwrap();

        let chosen = orchestrator
            .find_available_agent(AgentType::Research, None)
            .unwrap();
        // 50 * 0.97 avg beats 50 * 0.5 default even with equal capacity.
        assert_eq!(chosen.id, veteran);
    }

    #[tokio::test]
    async fn test_selection_respects_criteria() {
        let orchestrator = orchestrator(Arc::new(FnExecutor::echo(0.9)));
        let none = orchestrator.find_available_agent(
            AgentType::Research,
            Some(&SelectionCriteria {
                min_performance: Some(0.9),
                ..Default::default()
            }),
        );
        // Fresh agents default to 0.5 performance and are filtered out.
        assert!(none.is_none());

        let some = orchestrator.find_available_agent(
            AgentType::Research,
            Some(&SelectionCriteria {
                required_capabilities: vec!["search".into()],
                ..Default::default()
            }),
        );
        assert!(some.is_some());
    }

    #[tokio::test]
    async fn test_cancel_releases_slot() {
        let mut orchestrator = orchestrator(Arc::new(FnExecutor::echo(0.9)));
        let task_id = orchestrator.create_task("to cancel", AgentType::Implementation, 2, vec![]);

        // Assign manually without running the executor.
        let agent = orchestrator
            .find_available_agent(AgentType::Implementation, None)
            .unwrap();
        orchestrator.pools_mut().assign_agent(agent.id, task_id).unwrap();
        orchestrator.assignments.insert(task_id, agent.id);
        orchestrator.tasks.get_mut(&task_id).unwrap().mark_assigned(agent.id);

        orchestrator.cancel_task(task_id).unwrap();
        assert_eq!(orchestrator.task(task_id).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(orchestrator.pools().agent(agent.id).unwrap().current_load(), 0);
    }

    #[tokio::test]
    async fn test_reassign_moves_task() {
        let mut orchestrator = orchestrator(Arc::new(FnExecutor::echo(0.9)));
        let task_id = orchestrator.create_task("rebalance me", AgentType::Research, 2, vec![]);

        let first = orchestrator
            .find_available_agent(AgentType::Research, None)
            .unwrap();
        orchestrator.pools_mut().assign_agent(first.id, task_id).unwrap();
        orchestrator.assignments.insert(task_id, first.id);
        orchestrator.tasks.get_mut(&task_id).unwrap().mark_assigned(first.id);

        let second = orchestrator.reassign_task(task_id, "load rebalancing").unwrap();
        assert_ne!(second, first.id);
        assert_eq!(orchestrator.pools().agent(first.id).unwrap().current_load(), 0);
        assert_eq!(orchestrator.pools().agent(second).unwrap().current_load(), 1);
    }

    #[tokio::test]
    async fn test_swarm_stats_counts() {
        let mut orchestrator = orchestrator(Arc::new(FnExecutor::echo(0.9)));
        let task_id = orchestrator.create_task("stat me", AgentType::Research, 3, vec![]);
        orchestrator.delegate_task(task_id, None).await.unwrap();
        orchestrator.create_task("still pending", AgentType::Research, 3, vec![]);

        let stats = orchestrator.swarm_stats();
        assert_eq!(stats.total_agents, 3);
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.pending_tasks, 1);
    }
}
