//! Top-level swarm facade wiring the orchestrator, tiered memory, phase
//! workflows, boomerang refinement, and collaborator clients together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::boomerang::BoomerangManager;
use crate::config::SwarmConfig;
use crate::errors::SwarmError;
use crate::events::EventBus;
use crate::integrations::CollaboratorClient;
use crate::memory::{MemoryTier, StoreOptions, TieredMemory};
use crate::orchestrator::{AgentOrchestrator, TaskExecutor};
use crate::persistence::{DurableStore, KIND_AGENT, KIND_MESSAGE, KIND_TASK};
use crate::pool::WorkerPoolManager;
use crate::task::Task;
use crate::topology::{build_topology, TopologyConfig, TopologyShape};
use crate::types::AgentType;
use crate::workflow::{CompletionOutcome, PhaseWorkflowManager, WorkflowStatus};

/// Upper bound on workflow driving iterations, protecting against a stalled
/// task graph.
const WORKFLOW_DRIVE_LIMIT: usize = 200;

/// A knowledge-sharing message logged by the swarm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggedMessage {
    /// Message identifier.
    pub id: Uuid,
    /// Sender name, if given.
    pub from: Option<String>,
    /// Topic the knowledge belongs to.
    pub topic: String,
    /// Message payload.
    pub content: Value,
    /// When the message was logged.
    pub created_at: DateTime<Utc>,
}

/// The assembled orchestration core.
///
/// Components own their registries; the facade routes between them and
/// hosts the periodic maintenance sweeps. The orchestrator sits behind an
/// async mutex because delegation awaits the execution hook; memory and
/// workflows only have synchronous operations and use a read-write lock.
pub struct Swarm {
    config: SwarmConfig,
    orchestrator: Arc<Mutex<AgentOrchestrator>>,
    memory: Arc<RwLock<TieredMemory>>,
    workflows: Arc<RwLock<PhaseWorkflowManager>>,
    boomerangs: Arc<RwLock<BoomerangManager>>,
    collaborators: RwLock<HashMap<String, CollaboratorClient>>,
    message_log: DashMap<Uuid, LoggedMessage>,
    store: Arc<dyn DurableStore>,
    events: EventBus,
}

impl Swarm {
    /// Assemble a swarm: one worker pool per configured default agent type,
    /// a mesh topology sized for the fleet, tiered memory restored from the
    /// durable store, and the given execution hook.
    pub fn new(
        config: SwarmConfig,
        store: Arc<dyn DurableStore>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, SwarmError> {
        let events = EventBus::default();

        let mut pools = WorkerPoolManager::new(events.clone());
        for agent_type in &config.default_agent_types {
            pools.create_pool(
                *agent_type,
                1,
                config.max_agents_per_type,
                config.load_balance_strategy,
            )?;
        }

        let topology = build_topology(TopologyConfig {
            shape: TopologyShape::Mesh,
            max_agents: config.max_agents_per_type * AgentType::ALL.len(),
            coordinator: None,
            layer_count: None,
        })?;
        let orchestrator = AgentOrchestrator::new(pools, topology, executor, events.clone());

        let mut memory = TieredMemory::new(
            config.working_memory_capacity,
            config.episodic_memory_capacity,
            config.persistent_memory_capacity,
            Some(store.clone()),
            events.clone(),
        );
        let restored = memory.load_persistent()?;
        if restored > 0 {
            log::info!("restored {} persistent memory entries", restored);
        }

        let workflows = PhaseWorkflowManager::new(config.max_refinements, events.clone());
        let boomerangs = BoomerangManager::new(config.max_refinements, events.clone());

        Ok(Self {
            config,
            orchestrator: Arc::new(Mutex::new(orchestrator)),
            memory: Arc::new(RwLock::new(memory)),
            workflows: Arc::new(RwLock::new(workflows)),
            boomerangs: Arc::new(RwLock::new(boomerangs)),
            collaborators: RwLock::new(HashMap::new()),
            message_log: DashMap::new(),
            store,
            events,
        })
    }

    /// The swarm's event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The swarm configuration.
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// The orchestrator handle (async lock).
    pub fn orchestrator(&self) -> Arc<Mutex<AgentOrchestrator>> {
        self.orchestrator.clone()
    }

    /// The tiered memory handle.
    pub fn memory(&self) -> Arc<RwLock<TieredMemory>> {
        self.memory.clone()
    }

    /// The workflow manager handle.
    pub fn workflows(&self) -> Arc<RwLock<PhaseWorkflowManager>> {
        self.workflows.clone()
    }

    /// The caller-driven boomerang manager handle.
    pub fn boomerangs(&self) -> Arc<RwLock<BoomerangManager>> {
        self.boomerangs.clone()
    }

    /// Register a collaborator client under a name.
    pub fn register_collaborator(&self, name: impl Into<String>, client: CollaboratorClient) {
        self.collaborators.write().insert(name.into(), client);
    }

    /// Look up a registered collaborator.
    pub fn collaborator(&self, name: &str) -> Option<CollaboratorClient> {
        self.collaborators.read().get(name).cloned()
    }

    /// Log a knowledge-sharing message and persist it through the durable
    /// store.
    pub fn log_message(
        &self,
        from: Option<String>,
        topic: impl Into<String>,
        content: Value,
    ) -> Result<LoggedMessage, SwarmError> {
        let message = LoggedMessage {
            id: Uuid::new_v4(),
            from,
            topic: topic.into(),
            content,
            created_at: Utc::now(),
        };
        let payload = serde_json::to_value(&message)
            .map_err(|e| SwarmError::Validation(format!("unserializable message: {}", e)))?;
        self.store.save(KIND_MESSAGE, &message.id.to_string(), &payload)?;
        self.message_log.insert(message.id, message.clone());
        Ok(message)
    }

    /// Messages logged this session, newest last.
    pub fn messages(&self) -> Vec<LoggedMessage> {
        let mut out: Vec<LoggedMessage> =
            self.message_log.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|m| m.created_at);
        out
    }

    // -----------------------------------------------------------------------
    // Periodic sweeps
    // -----------------------------------------------------------------------

    /// Spawn the three maintenance sweeps (pool auto-scale, memory
    /// maintenance, boomerang timeouts) on independent intervals. The
    /// returned handles keep running until aborted.
    pub fn spawn_maintenance(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let orchestrator = self.orchestrator.clone();
        let autoscale_interval = Duration::from_secs(self.config.autoscale_interval_secs.max(1));
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(autoscale_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                orchestrator.lock().await.pools_mut().auto_scale_all();
            }
        }));

        let memory = self.memory.clone();
        let memory_interval =
            Duration::from_secs(self.config.memory_maintenance_interval_secs.max(1));
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(memory_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let report = memory.write().run_maintenance();
                if report.expired + report.demoted + report.deleted > 0 {
                    log::debug!(
                        "memory maintenance: {} expired, {} demoted, {} deleted",
                        report.expired,
                        report.demoted,
                        report.deleted
                    );
                }
            }
        }));

        let workflows = self.workflows.clone();
        let boomerangs = self.boomerangs.clone();
        let sweep_interval = Duration::from_secs(self.config.boomerang_sweep_interval_secs.max(1));
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                workflows.write().check_boomerang_timeouts();
                boomerangs.write().check_timeouts();
            }
        }));

        handles
    }

    // -----------------------------------------------------------------------
    // Workflow driving
    // -----------------------------------------------------------------------

    /// Assign and execute every ready task of the workflow's current phase
    /// through the orchestrator, then feed the results back to the phase
    /// gate. Dispatched refinements are executed the same way and returned
    /// through the boomerang loop.
    pub async fn advance_workflow(&self, workflow_id: Uuid) -> Result<CompletionOutcome, SwarmError> {
        let ready = self.workflows.read().next_assignable_tasks(workflow_id);
        if ready.is_empty() {
            return Ok(CompletionOutcome::TaskRecorded);
        }

        let mut last = CompletionOutcome::TaskRecorded;
        for pending in ready {
            let executed = self.execute_phase_task(&pending).await?;
            let quality = executed.quality_score.unwrap_or(0.0);
            let output = executed.output.unwrap_or_default();

            let outcome = {
                let mut workflows = self.workflows.write();
                match workflows.assign_task(pending.id, executed.assigned_agent.unwrap_or_default())
                {
                    Ok(_) => {}
                    Err(err) => log::debug!("workflow assignment note: {}", err),
                }
                workflows.complete_task(pending.id, output, quality)?
            };
            last = outcome.clone();

            if let CompletionOutcome::RefinementsDispatched(ids) = outcome {
                last = self.drive_refinements(ids).await?;
            }
            if matches!(
                last,
                CompletionOutcome::WorkflowCompleted | CompletionOutcome::WorkflowFailed
            ) {
                break;
            }
        }
        Ok(last)
    }

    /// Drive a workflow phase by phase until it completes, fails, or stops
    /// making progress.
    pub async fn run_workflow(&self, workflow_id: Uuid) -> Result<WorkflowStatus, SwarmError> {
        for _ in 0..WORKFLOW_DRIVE_LIMIT {
            let status = self
                .workflows
                .read()
                .workflow(workflow_id)
                .map(|w| w.status)
                .ok_or_else(|| SwarmError::NotFound {
                    kind: "workflow",
                    id: workflow_id.to_string(),
                })?;
            if status != WorkflowStatus::Active {
                return Ok(status);
            }
            self.advance_workflow(workflow_id).await?;
        }
        Err(SwarmError::Timeout(format!(
            "workflow {} made no progress within {} driving iterations",
            workflow_id, WORKFLOW_DRIVE_LIMIT
        )))
    }

    /// Run one workflow task through the orchestrator and return the
    /// executed task snapshot.
    async fn execute_phase_task(&self, pending: &Task) -> Result<Task, SwarmError> {
        let mut orchestrator = self.orchestrator.lock().await;
        let task_id = orchestrator.register_task(pending.clone());
        orchestrator.delegate_task(task_id, None).await
    }

    /// Execute dispatched refinements and feed the refined results back
    /// through the boomerang return path.
    async fn drive_refinements(&self, ids: Vec<Uuid>) -> Result<CompletionOutcome, SwarmError> {
        let mut last = CompletionOutcome::TaskRecorded;
        for boomerang_id in ids {
            loop {
                let (feedback, agent_type, original_task_id) = {
                    let workflows = self.workflows.read();
                    let Some(boomerang) = workflows.boomerangs().boomerang(boomerang_id) else {
                        break;
                    };
                    if boomerang.status.is_terminal() {
                        break;
                    }
                    let agent_type = workflows
                        .task(boomerang.original_task_id)
                        .map(|t| t.agent_type)
                        .unwrap_or(AgentType::Implementation);
                    (boomerang.feedback.clone(), agent_type, boomerang.original_task_id)
                };

                let refined = {
                    let mut orchestrator = self.orchestrator.lock().await;
                    let refine_id = orchestrator.create_task(
                        format!("Refine task {}: {}", original_task_id, feedback),
                        agent_type,
                        4,
                        vec![],
                    );
                    orchestrator.delegate_task(refine_id, None).await?
                };

                let outcome = self.workflows.write().handle_boomerang_return(
                    boomerang_id,
                    refined.output.as_deref().unwrap_or_default(),
                    refined.quality_score.unwrap_or(0.0),
                )?;
                last = outcome.clone();
                if !matches!(outcome, CompletionOutcome::TaskRecorded) {
                    break;
                }
            }
            if matches!(
                last,
                CompletionOutcome::WorkflowCompleted | CompletionOutcome::WorkflowFailed
            ) {
                break;
            }
        }
        Ok(last)
    }

    /// Snapshot every agent and task through the durable store so they
    /// survive a process restart. Returns the number of records written.
    pub async fn persist_state(&self) -> Result<usize, SwarmError> {
        let orchestrator = self.orchestrator.lock().await;
        let mut saved = 0;
        for agent in orchestrator.pools().agents_snapshot(None) {
            let payload = serde_json::to_value(&agent)
                .map_err(|e| SwarmError::Validation(format!("unserializable agent: {}", e)))?;
            self.store.save(KIND_AGENT, &agent.id.to_string(), &payload)?;
            saved += 1;
        }
        for task in orchestrator.list_tasks(None, None) {
            let payload = serde_json::to_value(&task)
                .map_err(|e| SwarmError::Validation(format!("unserializable task: {}", e)))?;
            self.store.save(KIND_TASK, &task.id.to_string(), &payload)?;
            saved += 1;
        }
        Ok(saved)
    }

    /// Store a knowledge value into memory and log the sharing message.
    pub fn share_knowledge(
        &self,
        key: impl Into<String>,
        topic: impl Into<String>,
        content: Value,
        importance: f64,
        from: Option<String>,
    ) -> Result<LoggedMessage, SwarmError> {
        let key = key.into();
        let topic = topic.into();
        self.memory.write().store(
            key,
            content.clone(),
            MemoryTier::Episodic,
            StoreOptions {
                category: "knowledge".to_string(),
                owner: from.clone(),
                tags: vec![topic.clone()],
                importance,
                ..Default::default()
            },
        )?;
        self.log_message(from, topic, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::FnExecutor;
    use crate::persistence::InMemoryStore;
    use crate::workflow::Phase;

    fn swarm_with_quality(quality: f64) -> Swarm {
        Swarm::new(
            SwarmConfig::default(),
            Arc::new(InMemoryStore::new()),
            Arc::new(FnExecutor::echo(quality)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_swarm_initializes_default_pools() {
        let swarm = swarm_with_quality(0.9);
        let orchestrator = swarm.orchestrator();
        let orchestrator = orchestrator.lock().await;
        let stats = orchestrator.swarm_stats();
        // One worker per default agent type.
        assert_eq!(stats.total_agents, SwarmConfig::default().default_agent_types.len());
        assert_eq!(stats.idle_agents, stats.total_agents);
    }

    #[tokio::test]
    async fn test_run_workflow_to_completion() {
        let swarm = swarm_with_quality(0.97);
        let workflow_id = swarm
            .workflows()
            .write()
            .create_workflow("search service", vec!["indexing".into()], vec![])
            .unwrap();

        let status = swarm.run_workflow(workflow_id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Completed);

        let workflows = swarm.workflows();
        let workflows = workflows.read();
        let workflow = workflows.workflow(workflow_id).unwrap();
        assert!((workflow.progress() - 1.0).abs() < 1e-9);
        assert!(workflow.average_quality > 0.9);
    }

    #[tokio::test]
    async fn test_run_workflow_fails_on_hopeless_quality() {
        let swarm = swarm_with_quality(0.4);
        let workflow_id = swarm
            .workflows()
            .write()
            .create_workflow("doomed service", vec![], vec![])
            .unwrap();

        let status = swarm.run_workflow(workflow_id).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);
        // The failure happened in the first phase.
        let workflows = swarm.workflows();
        let workflows = workflows.read();
        assert_eq!(workflows.workflow(workflow_id).unwrap().current_phase, Phase::Specification);
    }

    #[tokio::test]
    async fn test_share_knowledge_stores_and_logs() {
        let swarm = swarm_with_quality(0.9);
        let message = swarm
            .share_knowledge(
                "pattern:retry",
                "resilience",
                serde_json::json!({"rule": "retry with backoff"}),
                0.8,
                Some("research-1".into()),
            )
            .unwrap();

        assert_eq!(message.topic, "resilience");
        assert_eq!(swarm.messages().len(), 1);

        let memory = swarm.memory();
        let mut memory = memory.write();
        assert!(memory.retrieve("pattern:retry", None).is_some());
    }

    #[tokio::test]
    async fn test_persist_state_writes_agents_and_tasks() {
        let store = Arc::new(InMemoryStore::new());
        let swarm = Swarm::new(
            SwarmConfig::default(),
            store.clone(),
            Arc::new(FnExecutor::echo(0.9)),
        )
        .unwrap();

        {
            let orchestrator = swarm.orchestrator();
            let mut orchestrator = orchestrator.lock().await;
            let task_id =
                orchestrator.create_task("persist me", crate::types::AgentType::Research, 3, vec![]);
            orchestrator.delegate_task(task_id, None).await.unwrap();
        }

        let saved = swarm.persist_state().await.unwrap();
        // Five default agents plus one task.
        assert_eq!(saved, 6);
        assert_eq!(store.list(crate::persistence::KIND_AGENT).unwrap().len(), 5);
        assert_eq!(store.list(crate::persistence::KIND_TASK).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_maintenance_sweeps_spawn_and_abort() {
        let swarm = swarm_with_quality(0.9);
        let handles = swarm.spawn_maintenance();
        assert_eq!(handles.len(), 3);
        for handle in handles {
            handle.abort();
        }
    }
}
