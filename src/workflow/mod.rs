//! Five-phase project workflow: specification, pseudocode, architecture,
//! refinement, completion. Each phase carries a generated task graph with
//! dependency gating and a quality gate that must be met (or explicitly
//! bypassed) before the workflow advances.
//!
//! Phase-level refinement delegates to the [`BoomerangManager`] rather than
//! maintaining a parallel mechanism: a failed gate sends each low-scoring
//! task back to its agent as a boomerang, and the refined results re-enter
//! through [`PhaseWorkflowManager::handle_boomerang_return`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::boomerang::{BoomerangManager, BoomerangOptions, BoomerangOutcome};
use crate::errors::SwarmError;
use crate::events::{EventBus, SwarmEvent};
use crate::task::Task;
use crate::types::{AgentType, TaskStatus};

/// Tasks scoring below this after a failed gate are sent for refinement.
pub const REFINEMENT_SCORE_FLOOR: f64 = 0.7;

/// A phase in the fixed workflow sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Analyze requirements into a detailed specification.
    Specification,
    /// Outline the solution before committing to structure.
    Pseudocode,
    /// Design system components and interfaces.
    Architecture,
    /// Review and refine the solution.
    Refinement,
    /// Final validation and assembly.
    Completion,
}

impl Phase {
    /// All phases in execution order.
    pub const ORDER: [Phase; 5] = [
        Phase::Specification,
        Phase::Pseudocode,
        Phase::Architecture,
        Phase::Refinement,
        Phase::Completion,
    ];

    /// The phase after this one, if any.
    pub fn next(&self) -> Option<Phase> {
        let index = Phase::ORDER.iter().position(|p| p == self)?;
        Phase::ORDER.get(index + 1).copied()
    }

    /// The capability type that primarily drives this phase.
    pub fn agent_type(&self) -> AgentType {
        match self {
            Phase::Specification => AgentType::Research,
            Phase::Pseudocode => AgentType::Architect,
            Phase::Architecture => AgentType::Architect,
            Phase::Refinement => AgentType::Review,
            Phase::Completion => AgentType::Implementation,
        }
    }

    /// Canonical phase description.
    pub fn description(&self) -> &'static str {
        match self {
            Phase::Specification => "Analyze requirements and create detailed specification",
            Phase::Pseudocode => "Generate pseudocode for the solution",
            Phase::Architecture => "Design system architecture and components",
            Phase::Refinement => "Refine and optimize the solution",
            Phase::Completion => "Final validation and completion",
        }
    }

    /// Default wall-clock budget for the phase.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Phase::Specification => Duration::minutes(30),
            Phase::Pseudocode => Duration::minutes(30),
            Phase::Architecture => Duration::minutes(45),
            Phase::Refinement => Duration::minutes(45),
            Phase::Completion => Duration::minutes(60),
        }
    }

    /// The quality gate guarding exit from this phase.
    pub fn gate(&self) -> QualityGate {
        match self {
            Phase::Specification => QualityGate {
                min_quality: 0.85,
                required_deliverables: &["requirements", "acceptance_criteria"],
                validation_rules: &[ValidationRule::OutputFormat, ValidationRule::ContentCompleteness],
            },
            Phase::Pseudocode => QualityGate {
                min_quality: 0.80,
                required_deliverables: &["pseudocode"],
                validation_rules: &[ValidationRule::OutputFormat, ValidationRule::ContentCompleteness],
            },
            Phase::Architecture => QualityGate {
                min_quality: 0.85,
                required_deliverables: &["component_design", "interfaces"],
                validation_rules: &[
                    ValidationRule::OutputFormat,
                    ValidationRule::ContentCompleteness,
                    ValidationRule::Documentation,
                ],
            },
            Phase::Refinement => QualityGate {
                min_quality: 0.90,
                required_deliverables: &["review_notes"],
                validation_rules: &[ValidationRule::CodeQuality, ValidationRule::ContentCompleteness],
            },
            Phase::Completion => QualityGate {
                min_quality: 0.95,
                required_deliverables: &["final_deliverable", "validation_report"],
                validation_rules: &[
                    ValidationRule::CodeQuality,
                    ValidationRule::Documentation,
                    ValidationRule::TestCoverage,
                ],
            },
        }
    }

    /// The two task templates generated for this phase.
    fn task_templates(&self) -> [&'static str; 2] {
        match self {
            Phase::Specification => [
                "Analyze requirements and draft the specification",
                "Validate the specification against constraints",
            ],
            Phase::Pseudocode => [
                "Outline the solution as pseudocode",
                "Walk through the pseudocode against the specification",
            ],
            Phase::Architecture => [
                "Design the component architecture",
                "Document interfaces and data flows",
            ],
            Phase::Refinement => [
                "Review the design and implementation plan",
                "Apply review feedback and refine the plan",
            ],
            Phase::Completion => [
                "Assemble the final deliverable",
                "Run final validation and sign off",
            ],
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Specification => "specification",
            Phase::Pseudocode => "pseudocode",
            Phase::Architecture => "architecture",
            Phase::Refinement => "refinement",
            Phase::Completion => "completion",
        };
        write!(f, "{}", s)
    }
}

/// Validation rule tags attached to a phase gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRule {
    /// Output is well-formed for the phase.
    OutputFormat,
    /// Output covers everything the phase asked for.
    ContentCompleteness,
    /// Produced code meets quality expectations.
    CodeQuality,
    /// Output is documented.
    Documentation,
    /// Tests cover the delivered behavior.
    TestCoverage,
}

/// The minimum aggregate quality and required deliverables guarding a
/// phase transition.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    /// Minimum average quality across the phase's tasks.
    pub min_quality: f64,
    /// Deliverable tags the phase must produce.
    pub required_deliverables: &'static [&'static str],
    /// Validation rules applicable to the phase output.
    pub validation_rules: &'static [ValidationRule],
}

/// The tasks generated for one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTaskGroup {
    /// The phase these tasks belong to.
    pub phase: Phase,
    /// Generated task ids, in dependency order.
    pub task_ids: Vec<Uuid>,
    /// Whether the phase passed its gate.
    pub completed: bool,
    /// Whether the gate was bypassed rather than met.
    pub gate_bypassed: bool,
}

/// Overall workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Executing phases.
    Active,
    /// All phases passed their gates.
    Completed,
    /// A gate failed with refinements exhausted.
    Failed,
    /// Suspended by the caller.
    Paused,
}

/// A project workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseWorkflow {
    /// Workflow identifier.
    pub id: Uuid,
    /// Project description.
    pub description: String,
    /// Requirement list.
    pub requirements: Vec<String>,
    /// Constraint list.
    pub constraints: Vec<String>,
    /// The phase currently executing.
    pub current_phase: Phase,
    /// One task group per phase, in order.
    pub groups: Vec<PhaseTaskGroup>,
    /// Overall status.
    pub status: WorkflowStatus,
    /// When true every gate passes regardless of quality.
    pub auto_pass: bool,
    /// Running average quality across completed tasks.
    pub average_quality: f64,
    /// Completed task count.
    pub completed_task_count: usize,
    /// Total generated task count.
    pub total_task_count: usize,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
}

impl PhaseWorkflow {
    /// Fraction of generated tasks completed, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.total_task_count == 0 {
            return 0.0;
        }
        self.completed_task_count as f64 / self.total_task_count as f64
    }
}

/// Outcome of recording a task completion or a refined return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The task was recorded; the phase is still in progress.
    TaskRecorded,
    /// The phase gate passed and the workflow advanced.
    PhaseAdvanced(Phase),
    /// The last phase passed; the workflow is complete.
    WorkflowCompleted,
    /// The gate failed; boomerangs were dispatched for the listed tasks.
    RefinementsDispatched(Vec<Uuid>),
    /// The gate failed with no refinement left to try.
    WorkflowFailed,
}

/// Outcome of an assignment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The task was bound to the agent.
    Assigned,
    /// Unfinished dependencies; the task is now `blocked`.
    Blocked {
        /// The dependency tasks still outstanding.
        missing: Vec<Uuid>,
    },
}

/// Owns phase workflows, their generated tasks, and the embedded boomerang
/// manager used for phase-level refinement.
pub struct PhaseWorkflowManager {
    workflows: HashMap<Uuid, PhaseWorkflow>,
    tasks: HashMap<Uuid, Task>,
    /// `task id -> workflow id` for every generated task.
    task_owner: HashMap<Uuid, Uuid>,
    boomerangs: BoomerangManager,
    events: EventBus,
}

impl PhaseWorkflowManager {
    /// Create a manager whose refinement loops are bounded by
    /// `max_refinements`.
    pub fn new(max_refinements: u32, events: EventBus) -> Self {
        Self {
            workflows: HashMap::new(),
            tasks: HashMap::new(),
            task_owner: HashMap::new(),
            boomerangs: BoomerangManager::new(max_refinements, events.clone()),
            events,
        }
    }

    // -----------------------------------------------------------------------
    // Creation and lookup
    // -----------------------------------------------------------------------

    /// Decompose a project description into the five-phase task graph and
    /// start phase 1. Each phase produces two tasks with an explicit
    /// dependency edge between them.
    pub fn create_workflow(
        &mut self,
        description: impl Into<String>,
        requirements: Vec<String>,
        constraints: Vec<String>,
    ) -> Result<Uuid, SwarmError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(SwarmError::Validation("workflow description must not be empty".into()));
        }

        let workflow_id = Uuid::new_v4();
        let mut groups = Vec::with_capacity(Phase::ORDER.len());
        let mut total = 0;
        for phase in Phase::ORDER {
            let [first_template, second_template] = phase.task_templates();
            let first = Task::new(
                format!("{} for '{}'", first_template, description),
                phase.agent_type(),
                3,
            );
            let second = Task::new(
                format!("{} for '{}'", second_template, description),
                phase.agent_type(),
                3,
            )
            .with_dependencies(vec![first.id]);

            let task_ids = vec![first.id, second.id];
            for task in [first, second] {
                self.task_owner.insert(task.id, workflow_id);
                self.tasks.insert(task.id, task);
                total += 1;
            }
            groups.push(PhaseTaskGroup {
                phase,
                task_ids,
                completed: false,
                gate_bypassed: false,
            });
        }

        self.workflows.insert(
            workflow_id,
            PhaseWorkflow {
                id: workflow_id,
                description,
                requirements,
                constraints,
                current_phase: Phase::Specification,
                groups,
                status: WorkflowStatus::Active,
                auto_pass: false,
                average_quality: 0.0,
                completed_task_count: 0,
                total_task_count: total,
                created_at: Utc::now(),
                completed_at: None,
            },
        );
        log::info!("created workflow {} with {} tasks", workflow_id, total);
        Ok(workflow_id)
    }

    /// Snapshot of a workflow.
    pub fn workflow(&self, workflow_id: Uuid) -> Option<&PhaseWorkflow> {
        self.workflows.get(&workflow_id)
    }

    /// Snapshot of one generated task.
    pub fn task(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.get(&task_id).cloned()
    }

    /// The embedded boomerang manager (read access).
    pub fn boomerangs(&self) -> &BoomerangManager {
        &self.boomerangs
    }

    /// Periodic sweep over refinement turnarounds.
    pub fn check_boomerang_timeouts(&mut self) -> Vec<Uuid> {
        self.boomerangs.check_timeouts()
    }

    /// Tasks of the current phase that are ready for assignment: pending,
    /// with every dependency completed.
    pub fn next_assignable_tasks(&self, workflow_id: Uuid) -> Vec<Task> {
        let Some(workflow) = self.workflows.get(&workflow_id) else {
            return Vec::new();
        };
        let Some(group) = workflow.groups.iter().find(|g| g.phase == workflow.current_phase)
        else {
            return Vec::new();
        };
        group
            .task_ids
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| {
                matches!(t.status, TaskStatus::Pending | TaskStatus::Blocked)
                    && self.dependencies_met(t)
            })
            .cloned()
            .collect()
    }

    fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    // -----------------------------------------------------------------------
    // Assignment and completion
    // -----------------------------------------------------------------------

    /// Bind a generated task to an agent.
    ///
    /// Tasks of a later phase are rejected while an earlier phase is
    /// incomplete; a task with unfinished dependencies is marked `blocked`
    /// rather than assigned.
    pub fn assign_task(&mut self, task_id: Uuid, agent_id: Uuid) -> Result<AssignOutcome, SwarmError> {
        let workflow_id = self.owner_of(task_id)?;
        let workflow = self
            .workflows
            .get(&workflow_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "workflow", id: workflow_id.to_string() })?;
        if workflow.status != WorkflowStatus::Active {
            return Err(SwarmError::Validation(format!(
                "workflow {} is not active",
                workflow_id
            )));
        }
        let current = workflow.current_phase;
        let task_phase = workflow
            .groups
            .iter()
            .find(|g| g.task_ids.contains(&task_id))
            .map(|g| g.phase)
            .expect("owned task belongs to a group");
        if task_phase != current {
            return Err(SwarmError::Validation(format!(
                "task {} belongs to the {} phase; {} is active",
                task_id, task_phase, current
            )));
        }

        let missing: Vec<Uuid> = {
            let task = self.tasks.get(&task_id).expect("owned task exists");
            task.dependencies
                .iter()
                .filter(|dep| {
                    self.tasks
                        .get(dep)
                        .map(|t| t.status != TaskStatus::Completed)
                        .unwrap_or(true)
                })
                .copied()
                .collect()
        };
        let task = self.tasks.get_mut(&task_id).expect("owned task exists");
        if !missing.is_empty() {
            task.status = TaskStatus::Blocked;
            return Ok(AssignOutcome::Blocked { missing });
        }
        task.mark_assigned(agent_id);
        self.events.emit(SwarmEvent::TaskAssigned { task_id, agent_id });
        Ok(AssignOutcome::Assigned)
    }

    /// Record a task completion, refresh workflow progress, and evaluate
    /// the phase gate.
    pub fn complete_task(
        &mut self,
        task_id: Uuid,
        output: impl Into<String>,
        quality: f64,
    ) -> Result<CompletionOutcome, SwarmError> {
        let workflow_id = self.owner_of(task_id)?;
        {
            let workflow = self
                .workflows
                .get(&workflow_id)
                .expect("owner mapping is consistent");
            if workflow.status != WorkflowStatus::Active {
                return Err(SwarmError::Validation(format!(
                    "workflow {} is not active",
                    workflow_id
                )));
            }
        }
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "task", id: task_id.to_string() })?;
        if task.status == TaskStatus::Cancelled || task.status == TaskStatus::Failed {
            return Err(SwarmError::Validation(format!(
                "task {} is {} and cannot complete",
                task_id, task.status
            )));
        }
        task.mark_completed(output, quality);

        self.refresh_progress(workflow_id);
        self.evaluate_phase(workflow_id)
    }

    /// Feed a refined boomerang result back into the workflow.
    ///
    /// A settled loop updates the original task's output and quality and
    /// re-evaluates the phase gate; a re-sent loop just records progress.
    pub fn handle_boomerang_return(
        &mut self,
        boomerang_id: Uuid,
        result: &str,
        quality: f64,
    ) -> Result<CompletionOutcome, SwarmError> {
        let original_task_id = self
            .boomerangs
            .boomerang(boomerang_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "boomerang", id: boomerang_id.to_string() })?
            .original_task_id;

        match self.boomerangs.handle_return(boomerang_id, result, quality)? {
            BoomerangOutcome::Resent { .. } => Ok(CompletionOutcome::TaskRecorded),
            BoomerangOutcome::Completed => {
                let workflow_id = self.owner_of(original_task_id)?;
                let task = self
                    .tasks
                    .get_mut(&original_task_id)
                    .ok_or_else(|| SwarmError::NotFound {
                        kind: "task",
                        id: original_task_id.to_string(),
                    })?;
                task.mark_completed(result, quality);
                self.refresh_progress(workflow_id);
                self.evaluate_phase(workflow_id)
            }
        }
    }

    /// Suspend an active workflow.
    pub fn pause(&mut self, workflow_id: Uuid) -> Result<(), SwarmError> {
        let workflow = self.workflow_mut(workflow_id)?;
        if workflow.status != WorkflowStatus::Active {
            return Err(SwarmError::Validation(format!("workflow {} is not active", workflow_id)));
        }
        workflow.status = WorkflowStatus::Paused;
        Ok(())
    }

    /// Resume a paused workflow.
    pub fn resume(&mut self, workflow_id: Uuid) -> Result<(), SwarmError> {
        let workflow = self.workflow_mut(workflow_id)?;
        if workflow.status != WorkflowStatus::Paused {
            return Err(SwarmError::Validation(format!("workflow {} is not paused", workflow_id)));
        }
        workflow.status = WorkflowStatus::Active;
        Ok(())
    }

    /// Compile a completion summary aggregating each phase's outputs.
    pub fn compile_final_results(&self, workflow_id: Uuid) -> Result<String, SwarmError> {
        let workflow = self
            .workflows
            .get(&workflow_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "workflow", id: workflow_id.to_string() })?;

        let mut out = String::new();
        out.push_str(&format!("Workflow results for '{}'\n", workflow.description));
        out.push_str(&format!(
            "Status: {:?}, average quality {:.2}\n\n",
            workflow.status, workflow.average_quality
        ));
        for group in &workflow.groups {
            out.push_str(&format!("## {}\n", group.phase));
            for task_id in &group.task_ids {
                if let Some(task) = self.tasks.get(task_id) {
                    if let Some(output) = &task.output {
                        out.push_str(&format!("- {}\n", output));
                    }
                }
            }
            out.push('\n');
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn owner_of(&self, task_id: Uuid) -> Result<Uuid, SwarmError> {
        self.task_owner
            .get(&task_id)
            .copied()
            .ok_or_else(|| SwarmError::NotFound { kind: "task", id: task_id.to_string() })
    }

    fn workflow_mut(&mut self, workflow_id: Uuid) -> Result<&mut PhaseWorkflow, SwarmError> {
        self.workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| SwarmError::NotFound { kind: "workflow", id: workflow_id.to_string() })
    }

    /// Recompute the workflow's completed count and running average quality.
    fn refresh_progress(&mut self, workflow_id: Uuid) {
        let Some(workflow) = self.workflows.get(&workflow_id) else {
            return;
        };
        let all_ids: Vec<Uuid> = workflow.groups.iter().flat_map(|g| g.task_ids.clone()).collect();
        let completed: Vec<f64> = all_ids
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.quality_score)
            .collect();
        let workflow = self.workflows.get_mut(&workflow_id).expect("checked above");
        workflow.completed_task_count = completed.len();
        workflow.average_quality = if completed.is_empty() {
            0.0
        } else {
            completed.iter().sum::<f64>() / completed.len() as f64
        };
    }

    /// Check whether the current phase is finished and act on its gate.
    fn evaluate_phase(&mut self, workflow_id: Uuid) -> Result<CompletionOutcome, SwarmError> {
        let (phase, group_tasks, auto_pass) = {
            let workflow = self
                .workflows
                .get(&workflow_id)
                .ok_or_else(|| SwarmError::NotFound { kind: "workflow", id: workflow_id.to_string() })?;
            let group = workflow
                .groups
                .iter()
                .find(|g| g.phase == workflow.current_phase)
                .expect("current phase has a group");
            (workflow.current_phase, group.task_ids.clone(), workflow.auto_pass)
        };

        let all_completed = group_tasks.iter().all(|id| {
            self.tasks
                .get(id)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        });
        if !all_completed {
            return Ok(CompletionOutcome::TaskRecorded);
        }
        // A phase with refinements still in flight is not done.
        if group_tasks.iter().any(|id| self.boomerangs.has_active_for_task(*id)) {
            return Ok(CompletionOutcome::TaskRecorded);
        }

        let qualities: Vec<f64> = group_tasks
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .filter_map(|t| t.quality_score)
            .collect();
        let aggregate = if qualities.is_empty() {
            0.0
        } else {
            qualities.iter().sum::<f64>() / qualities.len() as f64
        };
        let gate = phase.gate();

        if aggregate >= gate.min_quality || auto_pass {
            return self.advance_phase(workflow_id, phase, auto_pass && aggregate < gate.min_quality);
        }

        // Gate failed: send each low-scoring task back for refinement, once
        // per task per phase attempt.
        let mut dispatched = Vec::new();
        for task_id in &group_tasks {
            let Some(task) = self.tasks.get(task_id) else {
                continue;
            };
            let score = task.quality_score.unwrap_or(0.0);
            if score >= REFINEMENT_SCORE_FLOOR {
                continue;
            }
            if !self.boomerangs.for_task(*task_id).is_empty() {
                continue;
            }
            let Some(agent_id) = task.assigned_agent else {
                log::warn!("task {} has no agent to refine against", task_id);
                continue;
            };
            let feedback = format!(
                "{} phase gate not met (aggregate {:.2} below {:.2}). Improve this output, \
                 which scored {:.2}. Required deliverables: {}.",
                phase,
                aggregate,
                gate.min_quality,
                score,
                gate.required_deliverables.join(", ")
            );
            let task = task.clone();
            match self.boomerangs.send_boomerang(&task, agent_id, &feedback, BoomerangOptions::default())
            {
                Ok(id) => dispatched.push(id),
                Err(err) => log::warn!("failed to dispatch refinement for {}: {}", task_id, err),
            }
        }

        if dispatched.is_empty() {
            let workflow = self.workflows.get_mut(&workflow_id).expect("checked above");
            workflow.status = WorkflowStatus::Failed;
            log::warn!(
                "workflow {} failed: {} gate unmet at {:.2} with refinements exhausted",
                workflow_id,
                phase,
                aggregate
            );
            self.events.emit(SwarmEvent::WorkflowFailed {
                workflow_id,
                reason: format!("{} gate unmet with refinements exhausted", phase),
            });
            return Ok(CompletionOutcome::WorkflowFailed);
        }

        log::info!(
            "workflow {} {} gate failed at {:.2}; {} refinement(s) dispatched",
            workflow_id,
            phase,
            aggregate,
            dispatched.len()
        );
        Ok(CompletionOutcome::RefinementsDispatched(dispatched))
    }

    fn advance_phase(
        &mut self,
        workflow_id: Uuid,
        phase: Phase,
        bypassed: bool,
    ) -> Result<CompletionOutcome, SwarmError> {
        let workflow = self.workflows.get_mut(&workflow_id).expect("caller verified");
        let group = workflow
            .groups
            .iter_mut()
            .find(|g| g.phase == phase)
            .expect("current phase has a group");
        group.completed = true;
        group.gate_bypassed = bypassed;

        match phase.next() {
            Some(next) => {
                workflow.current_phase = next;
                log::info!("workflow {} advanced to {}", workflow_id, next);
                self.events.emit(SwarmEvent::PhaseAdvanced { workflow_id, phase: next });
                Ok(CompletionOutcome::PhaseAdvanced(next))
            }
            None => {
                workflow.status = WorkflowStatus::Completed;
                workflow.completed_at = Some(Utc::now());
                log::info!("workflow {} completed", workflow_id);
                self.events.emit(SwarmEvent::WorkflowCompleted { workflow_id });
                Ok(CompletionOutcome::WorkflowCompleted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> PhaseWorkflowManager {
        PhaseWorkflowManager::new(3, EventBus::default())
    }

    fn workflow_with_tasks() -> (PhaseWorkflowManager, Uuid) {
        let mut manager = manager();
        let id = manager
            .create_workflow(
                "billing service",
                vec!["invoice generation".into()],
                vec!["no downtime".into()],
            )
            .unwrap();
        (manager, id)
    }

    /// Drive the current phase to completion at the given quality.
    fn complete_current_phase(
        manager: &mut PhaseWorkflowManager,
        workflow_id: Uuid,
        quality: f64,
    ) -> CompletionOutcome {
        let mut outcome = CompletionOutcome::TaskRecorded;
        loop {
            let ready = manager.next_assignable_tasks(workflow_id);
            if ready.is_empty() {
                return outcome;
            }
            for task in ready {
                let agent = Uuid::new_v4();
                assert_eq!(
                    manager.assign_task(task.id, agent).unwrap(),
                    AssignOutcome::Assigned
                );
                outcome = manager
                    .complete_task(task.id, format!("output of {}", task.description), quality)
                    .unwrap();
                if matches!(
                    outcome,
                    CompletionOutcome::PhaseAdvanced(_) | CompletionOutcome::WorkflowCompleted
                ) {
                    return outcome;
                }
            }
        }
    }

    #[test]
    fn test_workflow_generates_two_tasks_per_phase() {
        let (manager, id) = workflow_with_tasks();
        let workflow = manager.workflow(id).unwrap();
        assert_eq!(workflow.groups.len(), 5);
        assert_eq!(workflow.total_task_count, 10);
        assert_eq!(workflow.current_phase, Phase::Specification);
        for group in &workflow.groups {
            assert_eq!(group.task_ids.len(), 2);
            let second = manager.task(group.task_ids[1]).unwrap();
            assert_eq!(second.dependencies, vec![group.task_ids[0]]);
            assert_eq!(second.agent_type, group.phase.agent_type());
        }
    }

    #[test]
    fn test_later_phase_tasks_rejected_while_earlier_incomplete() {
        let (mut manager, id) = workflow_with_tasks();
        let pseudocode_task = manager.workflow(id).unwrap().groups[1].task_ids[0];
        let err = manager.assign_task(pseudocode_task, Uuid::new_v4());
        assert!(matches!(err, Err(SwarmError::Validation(_))));
    }

    #[test]
    fn test_dependency_gating_blocks_second_task() {
        let (mut manager, id) = workflow_with_tasks();
        let group = manager.workflow(id).unwrap().groups[0].clone();
        let (first, second) = (group.task_ids[0], group.task_ids[1]);

        let outcome = manager.assign_task(second, Uuid::new_v4()).unwrap();
        assert_eq!(outcome, AssignOutcome::Blocked { missing: vec![first] });
        assert_eq!(manager.task(second).unwrap().status, TaskStatus::Blocked);

        // Once the dependency completes the task assigns normally.
        manager.assign_task(first, Uuid::new_v4()).unwrap();
        manager.complete_task(first, "spec draft", 0.9).unwrap();
        let outcome = manager.assign_task(second, Uuid::new_v4()).unwrap();
        assert_eq!(outcome, AssignOutcome::Assigned);
    }

    #[test]
    fn test_phase_advances_when_gate_met() {
        let (mut manager, id) = workflow_with_tasks();
        let outcome = complete_current_phase(&mut manager, id, 0.9);
        assert_eq!(outcome, CompletionOutcome::PhaseAdvanced(Phase::Pseudocode));
        assert_eq!(manager.workflow(id).unwrap().current_phase, Phase::Pseudocode);
        assert!(manager.workflow(id).unwrap().groups[0].completed);
    }

    #[test]
    fn test_workflow_completes_after_all_phases() {
        let (mut manager, id) = workflow_with_tasks();
        let mut last = CompletionOutcome::TaskRecorded;
        for _ in Phase::ORDER {
            last = complete_current_phase(&mut manager, id, 0.96);
        }
        assert_eq!(last, CompletionOutcome::WorkflowCompleted);

        let workflow = manager.workflow(id).unwrap();
        assert_eq!(workflow.status, WorkflowStatus::Completed);
        assert!(workflow.completed_at.is_some());
        assert!((workflow.progress() - 1.0).abs() < 1e-9);

        let summary = manager.compile_final_results(id).unwrap();
        assert!(summary.contains("specification"));
        assert!(summary.contains("completion"));
    }

    #[test]
    fn test_gate_failure_dispatches_refinement_boomerang() {
        let (mut manager, id) = workflow_with_tasks();
        let group = manager.workflow(id).unwrap().groups[0].clone();
        let (first, second) = (group.task_ids[0], group.task_ids[1]);

        manager.assign_task(first, Uuid::new_v4()).unwrap();
        manager.complete_task(first, "solid spec", 0.95).unwrap();
        manager.assign_task(second, Uuid::new_v4()).unwrap();
        // Aggregate (0.95 + 0.5) / 2 = 0.725 misses the 0.85 gate and the
        // second task sits under the refinement floor.
        let outcome = manager.complete_task(second, "thin validation", 0.5).unwrap();
        let CompletionOutcome::RefinementsDispatched(boomerangs) = outcome else {
            panic!("expected refinements, got {:?}", outcome);
        };
        assert_eq!(boomerangs.len(), 1);
        assert_eq!(manager.workflow(id).unwrap().current_phase, Phase::Specification);

        // A strong refined return lifts the aggregate over the gate.
        let outcome = manager
            .handle_boomerang_return(boomerangs[0], "thorough validation of the spec", 0.9)
            .unwrap();
        assert_eq!(outcome, CompletionOutcome::PhaseAdvanced(Phase::Pseudocode));
    }

    #[test]
    fn test_exhausted_refinements_fail_workflow() {
        let (mut manager, id) = workflow_with_tasks();
        let group = manager.workflow(id).unwrap().groups[0].clone();
        let (first, second) = (group.task_ids[0], group.task_ids[1]);

        manager.assign_task(first, Uuid::new_v4()).unwrap();
        manager.complete_task(first, "solid spec", 0.95).unwrap();
        manager.assign_task(second, Uuid::new_v4()).unwrap();
        let outcome = manager.complete_task(second, "thin validation", 0.5).unwrap();
        let CompletionOutcome::RefinementsDispatched(boomerangs) = outcome else {
            panic!("expected refinements, got {:?}", outcome);
        };

        // The refined return is still weak; the loop settles below the
        // floor, no fresh boomerang is allowed, and the workflow fails.
        let mut outcome = manager
            .handle_boomerang_return(boomerangs[0], "barely better", 0.5)
            .unwrap();
        while outcome == CompletionOutcome::TaskRecorded {
            outcome = manager
                .handle_boomerang_return(boomerangs[0], "barely better", 0.5)
                .unwrap();
        }
        assert_eq!(outcome, CompletionOutcome::WorkflowFailed);
        assert_eq!(manager.workflow(id).unwrap().status, WorkflowStatus::Failed);
    }

    #[test]
    fn test_paused_workflow_rejects_completion() {
        let (mut manager, id) = workflow_with_tasks();
        let first = manager.workflow(id).unwrap().groups[0].task_ids[0];
        manager.assign_task(first, Uuid::new_v4()).unwrap();
        manager.pause(id).unwrap();
        assert!(manager.complete_task(first, "x", 0.9).is_err());
        manager.resume(id).unwrap();
        assert!(manager.complete_task(first, "x", 0.9).is_ok());
    }

    #[test]
    fn test_phase_order_fixed() {
        assert_eq!(Phase::Specification.next(), Some(Phase::Pseudocode));
        assert_eq!(Phase::Completion.next(), None);
        assert_eq!(Phase::Refinement.agent_type(), AgentType::Review);
        assert!(Phase::Completion.gate().min_quality > Phase::Pseudocode.gate().min_quality);
    }
}
