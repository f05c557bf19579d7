//! Core role and status types shared across the swarm.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability type of an agent.
///
/// Each agent is an opaque execution slot identified by one of these roles.
/// The role determines which tasks the agent is preferred for, which
/// topology layer it is placed in, and its advertised capability tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Conducts research, gathers information, and analyzes data.
    Research,
    /// Designs system architecture and creates technical specifications.
    Architect,
    /// Implements code and executes development tasks.
    Implementation,
    /// Creates and executes tests, validates functionality.
    Testing,
    /// Reviews code, architecture, and provides feedback.
    Review,
    /// Creates and maintains documentation.
    Documentation,
    /// Debugs issues and provides troubleshooting assistance.
    Debugger,
}

impl AgentType {
    /// All agent types, in declaration order.
    pub const ALL: [AgentType; 7] = [
        AgentType::Research,
        AgentType::Architect,
        AgentType::Implementation,
        AgentType::Testing,
        AgentType::Review,
        AgentType::Documentation,
        AgentType::Debugger,
    ];

    /// Human-readable description of the role.
    pub fn description(&self) -> &'static str {
        match self {
            AgentType::Research => "Conducts research, gathers information, and analyzes data",
            AgentType::Architect => {
                "Designs system architecture and creates technical specifications"
            }
            AgentType::Implementation => "Implements code and executes development tasks",
            AgentType::Testing => "Creates and executes tests, validates functionality",
            AgentType::Review => "Reviews code, architecture, and provides feedback",
            AgentType::Documentation => "Creates and maintains documentation",
            AgentType::Debugger => "Debugs issues and provides troubleshooting assistance",
        }
    }

    /// Capability tags advertised by agents of this role.
    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            AgentType::Research => &["search", "analyze", "summarize", "compare"],
            AgentType::Architect => &["design", "plan", "review-architecture", "create-diagrams"],
            AgentType::Implementation => &["code", "execute", "refactor", "integrate"],
            AgentType::Testing => &["test", "validate", "benchmark", "report-issues"],
            AgentType::Review => &[
                "review-code",
                "review-architecture",
                "provide-feedback",
                "suggest-improvements",
            ],
            AgentType::Documentation => &["write-docs", "update-docs", "create-examples", "explain"],
            AgentType::Debugger => &["debug", "troubleshoot", "analyze-logs", "suggest-fixes"],
        }
    }

    /// Parse a type from its snake_case string form.
    pub fn parse(s: &str) -> Option<AgentType> {
        AgentType::ALL.iter().copied().find(|t| t.to_string() == s)
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentType::Research => "research",
            AgentType::Architect => "architect",
            AgentType::Implementation => "implementation",
            AgentType::Testing => "testing",
            AgentType::Review => "review",
            AgentType::Documentation => "documentation",
            AgentType::Debugger => "debugger",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Available for new work.
    Idle,
    /// Holding at least one running task.
    Busy,
    /// Absorbing feedback; still eligible for selection.
    Learning,
    /// Last execution failed; excluded from selection until reset.
    Error,
    /// Administratively removed from rotation.
    Maintenance,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Learning => "learning",
            AgentStatus::Error => "error",
            AgentStatus::Maintenance => "maintenance",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet handed to an agent.
    Pending,
    /// Bound to an agent, execution not started.
    Assigned,
    /// Currently executing.
    Running,
    /// Finished with an output.
    Completed,
    /// Finished with an error.
    Failed,
    /// Explicitly stopped; the agent slot has been released.
    Cancelled,
    /// Waiting on incomplete dependency tasks.
    Blocked,
}

impl TaskStatus {
    /// Whether the status is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Blocked => "blocked",
        };
        write!(f, "{}", s)
    }
}

/// Aggregate snapshot of the swarm, reported by the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmStats {
    /// Total number of registered agents.
    pub total_agents: usize,
    /// Total number of known tasks.
    pub total_tasks: usize,
    /// Tasks in `pending` status.
    pub pending_tasks: usize,
    /// Tasks in `running` status.
    pub running_tasks: usize,
    /// Tasks in `completed` status.
    pub completed_tasks: usize,
    /// Tasks in `failed` status.
    pub failed_tasks: usize,
    /// Agents currently idle.
    pub idle_agents: usize,
    /// Agents currently busy.
    pub busy_agents: usize,
    /// Tasks waiting in pool queues.
    pub task_queue_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_round_trip() {
        for t in AgentType::ALL {
            assert_eq!(AgentType::parse(&t.to_string()), Some(t));
        }
        assert_eq!(AgentType::parse("chaos"), None);
    }

    #[test]
    fn test_capabilities_nonempty() {
        for t in AgentType::ALL {
            assert!(!t.capabilities().is_empty());
            assert!(!t.description().is_empty());
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&AgentStatus::Learning).unwrap();
        assert_eq!(json, "\"learning\"");
        let json = serde_json::to_string(&TaskStatus::Blocked).unwrap();
        assert_eq!(json, "\"blocked\"");
    }
}
