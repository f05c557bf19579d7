//! Task entity: a unit of work with a target capability type, priority,
//! dependencies, and a lifecycle status.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AgentType, TaskStatus};

/// Lowest task priority.
pub const PRIORITY_MIN: u8 = 1;
/// Highest task priority.
pub const PRIORITY_MAX: u8 = 5;

/// A unit of work in the swarm.
///
/// Tasks are created by the workflow manager or an external caller and are
/// owned exclusively by whichever component currently drives their
/// lifecycle: the orchestrator while running, the boomerang manager while
/// under refinement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Capability type required to execute this task.
    pub agent_type: AgentType,
    /// Free-text description of the work.
    pub description: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Priority on a small bounded scale (1 lowest, 5 highest).
    pub priority: u8,
    /// Identifiers of tasks that must complete before this one starts.
    pub dependencies: Vec<Uuid>,
    /// The agent currently holding this task, if any.
    pub assigned_agent: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Execution start timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal-state timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Resulting output, once completed.
    pub output: Option<String>,
    /// Quality score of the output in [0, 1], once completed.
    pub quality_score: Option<f64>,
    /// Failure message, once failed.
    pub error: Option<String>,
}

impl Task {
    /// Create a new pending task.
    ///
    /// The priority is clamped into `[PRIORITY_MIN, PRIORITY_MAX]`.
    pub fn new(description: impl Into<String>, agent_type: AgentType, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type,
            description: description.into(),
            status: TaskStatus::Pending,
            priority: priority.clamp(PRIORITY_MIN, PRIORITY_MAX),
            dependencies: Vec::new(),
            assigned_agent: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            quality_score: None,
            error: None,
        }
    }

    /// Builder: add dependency task ids.
    pub fn with_dependencies(mut self, dependencies: Vec<Uuid>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Stable content key: MD5 of `description|agent_type`.
    ///
    /// Identical work items hash to the same key regardless of their ids.
    pub fn key(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(format!("{}|{}", self.description, self.agent_type).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether the task has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Execution duration in milliseconds, if both timestamps are set.
    pub fn execution_duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    /// Mark the task assigned to an agent.
    pub fn mark_assigned(&mut self, agent_id: Uuid) {
        self.assigned_agent = Some(agent_id);
        self.status = TaskStatus::Assigned;
    }

    /// Mark the task running.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the task completed with its output and quality score.
    pub fn mark_completed(&mut self, output: impl Into<String>, quality: f64) {
        self.status = TaskStatus::Completed;
        self.output = Some(output.into());
        self.quality_score = Some(quality.clamp(0.0, 1.0));
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task failed with an error message.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Mark the task cancelled.
    pub fn mark_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("research the domain", AgentType::Research, 3);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 3);
        assert!(task.dependencies.is_empty());
        assert!(task.assigned_agent.is_none());
    }

    #[test]
    fn test_priority_clamped() {
        assert_eq!(Task::new("x", AgentType::Testing, 0).priority, PRIORITY_MIN);
        assert_eq!(Task::new("x", AgentType::Testing, 9).priority, PRIORITY_MAX);
    }

    #[test]
    fn test_key_stable_across_ids() {
        let a = Task::new("build the parser", AgentType::Implementation, 3);
        let b = Task::new("build the parser", AgentType::Implementation, 1);
        assert_eq!(a.key(), b.key());

        let c = Task::new("build the parser", AgentType::Testing, 3);
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut task = Task::new("x", AgentType::Debugger, 2);
        let agent_id = Uuid::new_v4();

        task.mark_assigned(agent_id);
        assert_eq!(task.status, TaskStatus::Assigned);
        assert_eq!(task.assigned_agent, Some(agent_id));

        task.mark_running();
        assert!(task.started_at.is_some());

        task.mark_completed("done", 1.4);
        assert_eq!(task.status, TaskStatus::Completed);
        // Quality is clamped into [0, 1].
        assert_eq!(task.quality_score, Some(1.0));
        assert!(task.is_terminal());
        assert!(task.execution_duration_ms().is_some());
    }
}
