//! Worker pools: bounded groups of agents of one capability type with
//! load-balanced task distribution, FIFO overflow queues, and
//! utilization-driven auto-scaling.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::Agent;
use crate::errors::SwarmError;
use crate::events::{EventBus, SwarmEvent};
use crate::task::Task;
use crate::types::{AgentStatus, AgentType};

/// Utilization above which a pool is grown.
pub const SCALE_UP_THRESHOLD: f64 = 0.8;
/// Utilization below which idle workers are retired.
pub const SCALE_DOWN_THRESHOLD: f64 = 0.3;
/// Fraction by which a pool grows on scale-up.
pub const SCALE_UP_FACTOR: f64 = 0.5;
/// Fraction of idle workers retired on scale-down.
pub const SCALE_DOWN_FACTOR: f64 = 0.3;

/// How a pool chooses a worker for an incoming task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    /// First idle worker, else the least-loaded one.
    RoundRobin,
    /// Fewest assigned tasks; rejects when even the minimum is at capacity.
    LeastLoaded,
    /// Cycles uniformly over workers with spare capacity.
    Random,
    /// Highest historical `success rate x quality` for the task's type.
    Weighted,
    /// Idle workers first, else least-loaded.
    Priority,
}

/// Aggregate counters for one pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Tasks completed through this pool.
    pub tasks_processed: u64,
    /// Tasks that failed.
    pub tasks_failed: u64,
    /// Running average task duration in milliseconds.
    pub average_duration_ms: f64,
}

/// Outcome of a distribution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributeOutcome {
    /// The task was bound to a worker.
    Assigned {
        /// The chosen worker.
        agent_id: Uuid,
    },
    /// No eligible worker; the task entered the pool queue.
    Queued {
        /// Zero-based position in the queue.
        position: usize,
    },
}

/// A bounded pool of workers of one capability type.
#[derive(Debug)]
pub struct WorkerPool {
    /// Pool identifier.
    pub id: Uuid,
    /// Capability type of every member.
    pub agent_type: AgentType,
    /// Lower membership bound.
    pub min_workers: usize,
    /// Upper membership bound.
    pub max_workers: usize,
    /// Load-balancing strategy.
    pub strategy: LoadBalancingStrategy,
    /// Member agent ids.
    pub workers: Vec<Uuid>,
    /// Overflow queue, drained FIFO as capacity frees up.
    pub queue: VecDeque<Task>,
    /// Aggregate counters.
    pub stats: PoolStats,
    /// Cursor for the cycling `Random` strategy.
    cursor: usize,
}

/// Result of an auto-scale pass over one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    /// Workers were added.
    ScaledUp(usize),
    /// Idle workers were retired.
    ScaledDown(usize),
    /// Utilization was within bounds.
    Unchanged,
}

/// Owner of all worker pools and the agents inside them.
///
/// The manager is the sole mutator of its agent registry; other components
/// read snapshots and effect changes through the public operations.
pub struct WorkerPoolManager {
    pools: HashMap<Uuid, WorkerPool>,
    agents: HashMap<Uuid, Agent>,
    /// `task id -> (pool id, agent id)` for in-flight distributed tasks.
    active: HashMap<Uuid, (Uuid, Uuid)>,
    /// Per-type spawn counters, used for generated agent names.
    spawn_counts: HashMap<AgentType, usize>,
    events: EventBus,
}

impl WorkerPoolManager {
    /// Create a manager emitting on the given bus.
    pub fn new(events: EventBus) -> Self {
        Self {
            pools: HashMap::new(),
            agents: HashMap::new(),
            active: HashMap::new(),
            spawn_counts: HashMap::new(),
            events,
        }
    }

    // -----------------------------------------------------------------------
    // Pool lifecycle
    // -----------------------------------------------------------------------

    /// Create a pool and immediately spawn `min_workers` agents.
    pub fn create_pool(
        &mut self,
        agent_type: AgentType,
        min_workers: usize,
        max_workers: usize,
        strategy: LoadBalancingStrategy,
    ) -> Result<Uuid, SwarmError> {
        if max_workers == 0 || min_workers > max_workers {
            return Err(SwarmError::Validation(format!(
                "invalid pool bounds: min {} max {}",
                min_workers, max_workers
            )));
        }
        let pool_id = Uuid::new_v4();
        self.pools.insert(
            pool_id,
            WorkerPool {
                id: pool_id,
                agent_type,
                min_workers,
                max_workers,
                strategy,
                workers: Vec::new(),
                queue: VecDeque::new(),
                stats: PoolStats::default(),
                cursor: 0,
            },
        );
        self.spawn_workers(pool_id, min_workers)?;
        log::info!(
            "created {} pool {} (min {}, max {}, {:?})",
            agent_type,
            pool_id,
            min_workers,
            max_workers,
            strategy
        );
        Ok(pool_id)
    }

    /// Spawn additional workers into a pool.
    ///
    /// Fails when the result would exceed the pool's maximum.
    pub fn spawn_workers(&mut self, pool_id: Uuid, count: usize) -> Result<Vec<Uuid>, SwarmError> {
        let pool = self
            .pools
            .get(&pool_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "pool", id: pool_id.to_string() })?;
        if pool.workers.len() + count > pool.max_workers {
            return Err(SwarmError::Capacity(format!(
                "pool {} cannot grow to {} workers (max {})",
                pool_id,
                pool.workers.len() + count,
                pool.max_workers
            )));
        }
        let agent_type = pool.agent_type;

        let mut spawned = Vec::with_capacity(count);
        for _ in 0..count {
            let index = self.spawn_counts.entry(agent_type).or_insert(0);
            *index += 1;
            let agent = Agent::new(agent_type, *index);
            let agent_id = agent.id;
            self.agents.insert(agent_id, agent);
            self.pools
                .get_mut(&pool_id)
                .expect("pool checked above")
                .workers
                .push(agent_id);
            self.events.emit(SwarmEvent::AgentSpawned { agent_id, agent_type });
            spawned.push(agent_id);
        }
        Ok(spawned)
    }

    /// Retire one worker from a pool. Removing a busy worker is an error,
    /// as is shrinking below the pool minimum.
    pub fn remove_worker(&mut self, pool_id: Uuid, agent_id: Uuid) -> Result<(), SwarmError> {
        let pool = self
            .pools
            .get_mut(&pool_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "pool", id: pool_id.to_string() })?;
        if !pool.workers.contains(&agent_id) {
            return Err(SwarmError::NotFound { kind: "agent", id: agent_id.to_string() });
        }
        if pool.workers.len() <= pool.min_workers {
            return Err(SwarmError::Capacity(format!(
                "pool {} is at its minimum of {} workers",
                pool_id, pool.min_workers
            )));
        }
        let agent = self
            .agents
            .get(&agent_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "agent", id: agent_id.to_string() })?;
        if agent.status == AgentStatus::Busy || !agent.current_tasks.is_empty() {
            return Err(SwarmError::Validation(format!(
                "agent {} is busy and cannot be removed",
                agent_id
            )));
        }
        pool.workers.retain(|id| *id != agent_id);
        self.agents.remove(&agent_id);
        self.events.emit(SwarmEvent::AgentRetired { agent_id });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Distribution
    // -----------------------------------------------------------------------

    /// Hand a task to the pool, selecting a worker by the pool's strategy.
    ///
    /// When no worker is eligible the task is queued and a `Queued` outcome
    /// is reported rather than an error.
    pub fn distribute_task(
        &mut self,
        pool_id: Uuid,
        mut task: Task,
    ) -> Result<DistributeOutcome, SwarmError> {
        let pool = self
            .pools
            .get_mut(&pool_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "pool", id: pool_id.to_string() })?;

        let chosen = select_worker(pool, &self.agents, &task);
        match chosen {
            Some(agent_id) => {
                let task_id = task.id;
                task.mark_assigned(agent_id);
                let agent = self.agents.get_mut(&agent_id).expect("selected from registry");
                agent.assign(task_id);
                self.active.insert(task_id, (pool_id, agent_id));
                self.events.emit(SwarmEvent::TaskAssigned { task_id, agent_id });
                Ok(DistributeOutcome::Assigned { agent_id })
            }
            None => {
                let task_id = task.id;
                pool.queue.push_back(task);
                let position = pool.queue.len() - 1;
                log::debug!("task {} queued in pool {} at position {}", task_id, pool_id, position);
                self.events.emit(SwarmEvent::TaskQueued { task_id, pool_id });
                Ok(DistributeOutcome::Queued { position })
            }
        }
    }

    /// Record completion of a distributed task, free the worker, update the
    /// pool's aggregate stats, and drain the queue FIFO. Returns the
    /// `(task, agent)` pairs assigned during the drain.
    pub fn complete_task(
        &mut self,
        task_id: Uuid,
        success: bool,
        duration_ms: u64,
    ) -> Result<Vec<(Task, Uuid)>, SwarmError> {
        let (pool_id, agent_id) = self
            .active
            .remove(&task_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "task", id: task_id.to_string() })?;

        if let Some(agent) = self.agents.get_mut(&agent_id) {
            agent.release(task_id);
        }

        let pool = self
            .pools
            .get_mut(&pool_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "pool", id: pool_id.to_string() })?;
        if success {
            pool.stats.tasks_processed += 1;
        } else {
            pool.stats.tasks_failed += 1;
        }
        let total = pool.stats.tasks_processed + pool.stats.tasks_failed;
        if total == 1 {
            pool.stats.average_duration_ms = duration_ms as f64;
        } else {
            pool.stats.average_duration_ms +=
                (duration_ms as f64 - pool.stats.average_duration_ms) / total as f64;
        }

        Ok(self.drain_queue(pool_id))
    }

    /// Assign queued tasks in FIFO order, stopping at the first task that
    /// still has no eligible worker.
    fn drain_queue(&mut self, pool_id: Uuid) -> Vec<(Task, Uuid)> {
        let mut assigned = Vec::new();
        loop {
            let Some(pool) = self.pools.get_mut(&pool_id) else {
                break;
            };
            let Some(front) = pool.queue.front().cloned() else {
                break;
            };
            let Some(agent_id) = select_worker(pool, &self.agents, &front) else {
                break;
            };
            let mut task = pool.queue.pop_front().expect("front checked above");
            let task_id = task.id;
            task.mark_assigned(agent_id);
            let agent = self.agents.get_mut(&agent_id).expect("selected from registry");
            agent.assign(task_id);
            self.active.insert(task_id, (pool_id, agent_id));
            self.events.emit(SwarmEvent::TaskAssigned { task_id, agent_id });
            assigned.push((task, agent_id));
        }
        assigned
    }

    // -----------------------------------------------------------------------
    // Auto-scaling
    // -----------------------------------------------------------------------

    /// Busy workers divided by total workers, 0.0 for an empty pool.
    pub fn utilization(&self, pool_id: Uuid) -> Result<f64, SwarmError> {
        let pool = self
            .pools
            .get(&pool_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "pool", id: pool_id.to_string() })?;
        if pool.workers.is_empty() {
            return Ok(0.0);
        }
        let busy = pool
            .workers
            .iter()
            .filter(|id| {
                self.agents
                    .get(id)
                    .map(|a| a.status == AgentStatus::Busy)
                    .unwrap_or(false)
            })
            .count();
        Ok(busy as f64 / pool.workers.len() as f64)
    }

    /// Grow the pool ~50% (capped at max) above [`SCALE_UP_THRESHOLD`]
    /// utilization; retire ~30% of idle workers (floored at min) below
    /// [`SCALE_DOWN_THRESHOLD`]. Only idle workers are ever removed.
    pub fn auto_scale(&mut self, pool_id: Uuid) -> Result<ScaleAction, SwarmError> {
        let utilization = self.utilization(pool_id)?;
        let pool = self.pools.get(&pool_id).expect("checked by utilization");
        let size = pool.workers.len();
        let (min, max) = (pool.min_workers, pool.max_workers);

        if utilization > SCALE_UP_THRESHOLD && size < max {
            let desired = ((size as f64 * SCALE_UP_FACTOR).ceil() as usize).max(1);
            let to_add = desired.min(max - size);
            self.spawn_workers(pool_id, to_add)?;
            self.events.emit(SwarmEvent::PoolScaled { pool_id, from: size, to: size + to_add });
            log::info!("pool {} scaled up by {} (utilization {:.2})", pool_id, to_add, utilization);
            return Ok(ScaleAction::ScaledUp(to_add));
        }

        if utilization < SCALE_DOWN_THRESHOLD && size > min {
            let idle: Vec<Uuid> = pool
                .workers
                .iter()
                .filter(|id| {
                    self.agents
                        .get(id)
                        .map(|a| a.status == AgentStatus::Idle && a.current_tasks.is_empty())
                        .unwrap_or(false)
                })
                .copied()
                .collect();
            let desired = ((idle.len() as f64 * SCALE_DOWN_FACTOR).ceil() as usize).max(1);
            let removable = desired.min(size - min).min(idle.len());
            let mut removed = 0;
            for agent_id in idle.into_iter().take(removable) {
                if self.remove_worker(pool_id, agent_id).is_ok() {
                    removed += 1;
                }
            }
            if removed > 0 {
                self.events.emit(SwarmEvent::PoolScaled { pool_id, from: size, to: size - removed });
                log::info!(
                    "pool {} scaled down by {} (utilization {:.2})",
                    pool_id,
                    removed,
                    utilization
                );
                return Ok(ScaleAction::ScaledDown(removed));
            }
        }

        Ok(ScaleAction::Unchanged)
    }

    /// Run an auto-scale pass over every pool.
    pub fn auto_scale_all(&mut self) {
        let pool_ids: Vec<Uuid> = self.pools.keys().copied().collect();
        for pool_id in pool_ids {
            if let Err(err) = self.auto_scale(pool_id) {
                log::warn!("auto-scale failed for pool {}: {}", pool_id, err);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Agent registry operations
    // -----------------------------------------------------------------------

    /// The pool holding agents of the given type, if any.
    pub fn pool_for_type(&self, agent_type: AgentType) -> Option<Uuid> {
        self.pools
            .values()
            .find(|p| p.agent_type == agent_type)
            .map(|p| p.id)
    }

    /// Look up a pool.
    pub fn pool(&self, pool_id: Uuid) -> Option<&WorkerPool> {
        self.pools.get(&pool_id)
    }

    /// All pool ids.
    pub fn pool_ids(&self) -> Vec<Uuid> {
        self.pools.keys().copied().collect()
    }

    /// Snapshot of one agent.
    pub fn agent(&self, agent_id: Uuid) -> Option<Agent> {
        self.agents.get(&agent_id).cloned()
    }

    /// Snapshot of every agent, optionally filtered by type.
    pub fn agents_snapshot(&self, agent_type: Option<AgentType>) -> Vec<Agent> {
        let mut out: Vec<Agent> = self
            .agents
            .values()
            .filter(|a| agent_type.map(|t| a.agent_type == t).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.id);
        out
    }

    /// Total queued tasks across all pools.
    pub fn queued_task_count(&self) -> usize {
        self.pools.values().map(|p| p.queue.len()).sum()
    }

    /// Bind a task to an agent (orchestrator-driven assignment path).
    pub fn assign_agent(&mut self, agent_id: Uuid, task_id: Uuid) -> Result<(), SwarmError> {
        let agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "agent", id: agent_id.to_string() })?;
        if !agent.has_capacity() {
            return Err(SwarmError::Capacity(format!("agent {} is at capacity", agent_id)));
        }
        agent.assign(task_id);
        Ok(())
    }

    /// Release a task slot and record the execution outcome in the agent's
    /// history.
    pub fn release_agent(
        &mut self,
        agent_id: Uuid,
        task_id: Uuid,
        task_type: AgentType,
        success: bool,
        duration_ms: u64,
        quality: f64,
    ) -> Result<(), SwarmError> {
        let agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "agent", id: agent_id.to_string() })?;
        agent.release(task_id);
        agent.record_metric(task_type, success, duration_ms, quality);
        Ok(())
    }

    /// Release a task slot without recording an outcome (reassignment and
    /// cancellation paths).
    pub fn unassign_agent(&mut self, agent_id: Uuid, task_id: Uuid) -> Result<(), SwarmError> {
        let agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "agent", id: agent_id.to_string() })?;
        agent.release(task_id);
        Ok(())
    }

    /// Set an agent's lifecycle status.
    pub fn set_agent_status(&mut self, agent_id: Uuid, status: AgentStatus) -> Result<(), SwarmError> {
        let agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "agent", id: agent_id.to_string() })?;
        agent.status = status;
        Ok(())
    }
}

/// Select a worker from the pool per its strategy. Returns `None` when no
/// worker is eligible.
fn select_worker(pool: &mut WorkerPool, agents: &HashMap<Uuid, Agent>, task: &Task) -> Option<Uuid> {
    let members: Vec<&Agent> = pool
        .workers
        .iter()
        .filter_map(|id| agents.get(id))
        .collect();
    if members.is_empty() {
        return None;
    }

    let first_idle = || -> Option<Uuid> {
        members
            .iter()
            .find(|a| a.status == AgentStatus::Idle && a.has_capacity())
            .map(|a| a.id)
    };
    let least_loaded = || -> Option<Uuid> {
        members
            .iter()
            .filter(|a| a.has_capacity())
            .min_by_key(|a| (a.current_load(), a.id))
            .map(|a| a.id)
    };

    match pool.strategy {
        LoadBalancingStrategy::RoundRobin | LoadBalancingStrategy::Priority => {
            first_idle().or_else(least_loaded)
        }
        LoadBalancingStrategy::LeastLoaded => least_loaded(),
        LoadBalancingStrategy::Random => {
            let eligible: Vec<&&Agent> = members.iter().filter(|a| a.has_capacity()).collect();
            if eligible.is_empty() {
                return None;
            }
            let chosen = eligible[pool.cursor % eligible.len()].id;
            pool.cursor = pool.cursor.wrapping_add(1);
            Some(chosen)
        }
        LoadBalancingStrategy::Weighted => {
            let mut best: Option<(f64, Uuid)> = None;
            for agent in members.iter().filter(|a| a.has_capacity()) {
                let of_type: Vec<_> = agent
                    .metrics
                    .iter()
                    .filter(|m| m.task_type == task.agent_type)
                    .collect();
                let score = if of_type.is_empty() {
                    0.5
                } else {
                    let success: f64 =
                        of_type.iter().map(|m| m.success_rate).sum::<f64>() / of_type.len() as f64;
                    let quality: f64 =
                        of_type.iter().map(|m| m.quality_score).sum::<f64>() / of_type.len() as f64;
                    success * quality
                };
                let better = match best {
                    None => true,
                    Some((best_score, best_id)) => {
                        score > best_score || (score == best_score && agent.id < best_id)
                    }
                };
                if better {
                    best = Some((score, agent.id));
                }
            }
            best.map(|(_, id)| id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> WorkerPoolManager {
        WorkerPoolManager::new(EventBus::default())
    }

    #[test]
    fn test_create_pool_spawns_min_workers() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Research, 2, 5, LoadBalancingStrategy::LeastLoaded)
            .unwrap();
        assert_eq!(manager.pool(pool_id).unwrap().workers.len(), 2);
        assert_eq!(manager.agents_snapshot(Some(AgentType::Research)).len(), 2);
    }

    #[test]
    fn test_spawn_beyond_max_fails() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Testing, 1, 3, LoadBalancingStrategy::RoundRobin)
            .unwrap();
        assert!(manager.spawn_workers(pool_id, 2).is_ok());
        assert!(matches!(
            manager.spawn_workers(pool_id, 1),
            Err(SwarmError::Capacity(_))
        ));
    }

    #[test]
    fn test_pool_bounds_invariant_holds() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Review, 1, 4, LoadBalancingStrategy::LeastLoaded)
            .unwrap();
        for _ in 0..10 {
            let _ = manager.auto_scale(pool_id);
            let pool = manager.pool(pool_id).unwrap();
            assert!(pool.workers.len() >= pool.min_workers);
            assert!(pool.workers.len() <= pool.max_workers);
        }
    }

    #[test]
    fn test_fourth_task_queues_and_drains_on_completion() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Implementation, 1, 3, LoadBalancingStrategy::LeastLoaded)
            .unwrap();
        manager.spawn_workers(pool_id, 2).unwrap();

        // Single-slot workers make the arithmetic exact.
        let worker_ids: Vec<Uuid> = manager.pool(pool_id).unwrap().workers.clone();
        for id in &worker_ids {
            manager.agents.get_mut(id).unwrap().max_concurrent_tasks = 1;
        }

        let mut first_task_id = None;
        for i in 0..4 {
            let task = Task::new(format!("job {}", i), AgentType::Implementation, 3);
            let outcome = manager.distribute_task(pool_id, task.clone()).unwrap();
            if i == 0 {
                first_task_id = Some(task.id);
            }
            if i < 3 {
                assert!(matches!(outcome, DistributeOutcome::Assigned { .. }), "task {} should assign", i);
            } else {
                assert_eq!(outcome, DistributeOutcome::Queued { position: 0 });
            }
        }
        assert_eq!(manager.queued_task_count(), 1);

        // Completing any task drains the queued one automatically.
        let drained = manager.complete_task(first_task_id.unwrap(), true, 500).unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(manager.queued_task_count(), 0);
    }

    #[test]
    fn test_least_loaded_never_overcommits() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Debugger, 2, 2, LoadBalancingStrategy::LeastLoaded)
            .unwrap();
        let worker_ids: Vec<Uuid> = manager.pool(pool_id).unwrap().workers.clone();
        for id in &worker_ids {
            manager.agents.get_mut(id).unwrap().max_concurrent_tasks = 2;
        }

        for i in 0..6 {
            let task = Task::new(format!("job {}", i), AgentType::Debugger, 3);
            let _ = manager.distribute_task(pool_id, task).unwrap();
        }
        for id in &worker_ids {
            let agent = manager.agent(*id).unwrap();
            assert!(agent.current_load() <= agent.max_concurrent_tasks);
        }
        // Four slots total, so exactly two tasks are queued.
        assert_eq!(manager.queued_task_count(), 2);
    }

    #[test]
    fn test_remove_busy_worker_is_error() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Architect, 1, 3, LoadBalancingStrategy::RoundRobin)
            .unwrap();
        manager.spawn_workers(pool_id, 1).unwrap();

        let task = Task::new("design", AgentType::Architect, 3);
        let outcome = manager.distribute_task(pool_id, task).unwrap();
        let DistributeOutcome::Assigned { agent_id } = outcome else {
            panic!("expected assignment");
        };

        assert!(matches!(
            manager.remove_worker(pool_id, agent_id),
            Err(SwarmError::Validation(_))
        ));
    }

    #[test]
    fn test_auto_scale_up_under_load() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Research, 2, 6, LoadBalancingStrategy::LeastLoaded)
            .unwrap();
        // Saturate both workers.
        for i in 0..2 {
            let task = Task::new(format!("job {}", i), AgentType::Research, 3);
            manager.distribute_task(pool_id, task).unwrap();
        }
        let action = manager.auto_scale(pool_id).unwrap();
        assert_eq!(action, ScaleAction::ScaledUp(1));
        assert_eq!(manager.pool(pool_id).unwrap().workers.len(), 3);
    }

    #[test]
    fn test_auto_scale_down_when_idle() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Research, 1, 6, LoadBalancingStrategy::LeastLoaded)
            .unwrap();
        manager.spawn_workers(pool_id, 3).unwrap();

        let action = manager.auto_scale(pool_id).unwrap();
        assert!(matches!(action, ScaleAction::ScaledDown(_)));
        let pool = manager.pool(pool_id).unwrap();
        assert!(pool.workers.len() >= pool.min_workers);
        assert!(pool.workers.len() < 4);
    }

    #[test]
    fn test_weighted_prefers_proven_worker() {
        let mut manager = manager();
        let pool_id = manager
            .create_pool(AgentType::Implementation, 2, 2, LoadBalancingStrategy::Weighted)
            .unwrap();
        let worker_ids: Vec<Uuid> = manager.pool(pool_id).unwrap().workers.clone();

        // Give the second worker a strong record for this task type.
        manager
            .agents
            .get_mut(&worker_ids[1])
            .unwrap()
            .record_metric(AgentType::Implementation, true, 100, 0.95);

        let task = Task::new("implement", AgentType::Implementation, 3);
        let outcome = manager.distribute_task(pool_id, task).unwrap();
        assert_eq!(outcome, DistributeOutcome::Assigned { agent_id: worker_ids[1] });
    }
}
