//! Agent entity: a typed, stateful execution slot with a concurrency limit
//! and a rolling performance history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AgentStatus, AgentType};

/// Number of recent metrics considered when scoring an agent's performance
/// for a task type.
pub const PERFORMANCE_WINDOW: usize = 10;

/// Maximum metrics retained per agent before the oldest are dropped.
pub const METRIC_HISTORY_CAP: usize = 50;

/// Performance score assumed for an agent with no recorded history.
pub const DEFAULT_PERFORMANCE: f64 = 0.5;

/// One recorded execution outcome, kept in the agent's rolling history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetric {
    /// Capability type of the executed task.
    pub task_type: AgentType,
    /// 1.0 for a successful execution, 0.0 for a failure.
    pub success_rate: f64,
    /// Wall-clock duration of the execution in milliseconds.
    pub duration_ms: u64,
    /// Quality score of the output in [0, 1].
    pub quality_score: f64,
    /// When the metric was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate counters for an agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    /// Number of successfully completed tasks.
    pub tasks_completed: u64,
    /// Number of failed tasks.
    pub tasks_failed: u64,
    /// Running average execution duration in milliseconds.
    pub average_duration_ms: f64,
}

impl AgentStats {
    /// Fold a new execution into the counters and running average.
    pub fn record(&mut self, success: bool, duration_ms: u64) {
        if success {
            self.tasks_completed += 1;
        } else {
            self.tasks_failed += 1;
        }
        let count = self.tasks_completed + self.tasks_failed;
        if count == 1 {
            self.average_duration_ms = duration_ms as f64;
        } else {
            self.average_duration_ms +=
                (duration_ms as f64 - self.average_duration_ms) / count as f64;
        }
    }
}

/// An agent in the swarm.
///
/// Agents are opaque workers identified by capability type. They are created
/// on spawn, mutated by the orchestrator and pool manager on every
/// assignment and completion, and never deleted while holding tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier.
    pub id: Uuid,
    /// Generated name, e.g. `research-3`.
    pub name: String,
    /// Capability type.
    pub agent_type: AgentType,
    /// Lifecycle status.
    pub status: AgentStatus,
    /// Advertised capability tags, derived from the type at spawn.
    pub capabilities: Vec<String>,
    /// Maximum number of tasks held at once.
    pub max_concurrent_tasks: usize,
    /// Identifiers of currently assigned tasks.
    pub current_tasks: Vec<Uuid>,
    /// Rolling performance history, newest last.
    pub metrics: Vec<PerformanceMetric>,
    /// Aggregate counters.
    pub stats: AgentStats,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last assignment or completion timestamp.
    pub last_active_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new idle agent of the given type.
    ///
    /// `index` is a per-type spawn counter used for the generated name.
    pub fn new(agent_type: AgentType, index: usize) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: format!("{}-{}", agent_type, index),
            agent_type,
            status: AgentStatus::Idle,
            capabilities: agent_type
                .capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect(),
            max_concurrent_tasks: 3,
            current_tasks: Vec::new(),
            metrics: Vec::new(),
            stats: AgentStats::default(),
            created_at: now,
            last_active_at: now,
        }
    }

    /// Number of tasks currently assigned.
    pub fn current_load(&self) -> usize {
        self.current_tasks.len()
    }

    /// Remaining task slots.
    pub fn spare_capacity(&self) -> usize {
        self.max_concurrent_tasks.saturating_sub(self.current_tasks.len())
    }

    /// Whether the agent can accept another task.
    pub fn has_capacity(&self) -> bool {
        self.current_tasks.len() < self.max_concurrent_tasks
    }

    /// Whether the agent is eligible for new work (idle or learning, with
    /// spare capacity).
    pub fn is_available(&self) -> bool {
        matches!(self.status, AgentStatus::Idle | AgentStatus::Learning) && self.has_capacity()
    }

    /// Bind a task to this agent and mark it busy.
    pub fn assign(&mut self, task_id: Uuid) {
        if !self.current_tasks.contains(&task_id) {
            self.current_tasks.push(task_id);
        }
        self.status = AgentStatus::Busy;
        self.last_active_at = Utc::now();
    }

    /// Release a task slot. Returns the agent to idle once no tasks remain.
    pub fn release(&mut self, task_id: Uuid) {
        self.current_tasks.retain(|id| *id != task_id);
        if self.current_tasks.is_empty() && self.status == AgentStatus::Busy {
            self.status = AgentStatus::Idle;
        }
        self.last_active_at = Utc::now();
    }

    /// Record an execution outcome in both the rolling history and the
    /// aggregate counters.
    pub fn record_metric(&mut self, task_type: AgentType, success: bool, duration_ms: u64, quality: f64) {
        self.metrics.push(PerformanceMetric {
            task_type,
            success_rate: if success { 1.0 } else { 0.0 },
            duration_ms,
            quality_score: quality,
            recorded_at: Utc::now(),
        });
        if self.metrics.len() > METRIC_HISTORY_CAP {
            let excess = self.metrics.len() - METRIC_HISTORY_CAP;
            self.metrics.drain(..excess);
        }
        self.stats.record(success, duration_ms);
    }

    /// Performance score for a task type: the mean over the last
    /// [`PERFORMANCE_WINDOW`] metrics of that type of
    /// `0.4 * success_rate + 0.6 * quality_score`, or
    /// [`DEFAULT_PERFORMANCE`] with no history.
    pub fn performance_for(&self, task_type: AgentType) -> f64 {
        let recent: Vec<&PerformanceMetric> = self
            .metrics
            .iter()
            .rev()
            .filter(|m| m.task_type == task_type)
            .take(PERFORMANCE_WINDOW)
            .collect();
        if recent.is_empty() {
            return DEFAULT_PERFORMANCE;
        }
        let sum: f64 = recent
            .iter()
            .map(|m| 0.4 * m.success_rate + 0.6 * m.quality_score)
            .sum();
        sum / recent.len() as f64
    }

    /// Hours since the agent was last active.
    pub fn hours_since_active(&self) -> f64 {
        let elapsed = Utc::now() - self.last_active_at;
        elapsed.num_milliseconds().max(0) as f64 / 3_600_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_release_cycle() {
        let mut agent = Agent::new(AgentType::Research, 1);
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.is_available());

        let task_id = Uuid::new_v4();
        agent.assign(task_id);
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.current_load(), 1);

        agent.release(task_id);
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.current_load(), 0);
    }

    #[test]
    fn test_capacity_limit() {
        let mut agent = Agent::new(AgentType::Testing, 1);
        agent.max_concurrent_tasks = 2;
        agent.assign(Uuid::new_v4());
        agent.assign(Uuid::new_v4());
        assert!(!agent.has_capacity());
        assert!(!agent.is_available());
        assert_eq!(agent.spare_capacity(), 0);
    }

    #[test]
    fn test_performance_default_without_history() {
        let agent = Agent::new(AgentType::Implementation, 1);
        assert_eq!(agent.performance_for(AgentType::Implementation), DEFAULT_PERFORMANCE);
    }

    #[test]
    fn test_performance_windowed_by_type() {
        let mut agent = Agent::new(AgentType::Implementation, 1);
        agent.record_metric(AgentType::Implementation, true, 1_000, 1.0);
        agent.record_metric(AgentType::Research, false, 1_000, 0.0);

        // Only the implementation metric counts: 0.4 * 1.0 + 0.6 * 1.0 = 1.0.
        let score = agent.performance_for(AgentType::Implementation);
        assert!((score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_metric_history_capped() {
        let mut agent = Agent::new(AgentType::Review, 1);
        for _ in 0..(METRIC_HISTORY_CAP + 10) {
            agent.record_metric(AgentType::Review, true, 10, 0.9);
        }
        assert_eq!(agent.metrics.len(), METRIC_HISTORY_CAP);
    }

    #[test]
    fn test_average_duration_running_mean() {
        let mut stats = AgentStats::default();
        stats.record(true, 100);
        stats.record(true, 300);
        assert!((stats.average_duration_ms - 200.0).abs() < 1e-9);
    }
}
