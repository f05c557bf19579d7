//! Boomerang refinement loop: completed-but-unsatisfactory task output is
//! sent back to an agent with synthesized feedback, validated on return
//! against a quality target, and re-sent under a bounded refinement counter.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SwarmError;
use crate::events::{EventBus, SwarmEvent};
use crate::task::Task;

/// Default bound on refinement cycles.
pub const DEFAULT_MAX_REFINEMENTS: u32 = 3;
/// First-refinement quality floor: a first return under this quality is
/// refined even when validation passes.
pub const FIRST_PASS_QUALITY_FLOOR: f64 = 0.6;
/// Highest boomerang priority (critical).
pub const BOOMERANG_PRIORITY_MAX: u8 = 4;

static ERROR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(error|bug|fix|crash|broken|incorrect)").unwrap());
static PERFORMANCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(performance|optimi[sz]e|slow|latency|speed)").unwrap());
static FEATURE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(feature|add|implement|missing|support)").unwrap());

static CRITICAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(critical|urgent|asap|blocker|severe)").unwrap());
static MAJOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(important|major|significant)").unwrap());
static MINOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(minor|small|trivial|cosmetic)").unwrap());

static ERROR_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(error|exception|panic|failed)").unwrap());
static IMPROVEMENT_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(faster|improved|reduced|optimi[sz]ed|\d+\s*(ms|%))").unwrap());
static FEATURE_MARKERS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(added|implemented|supports|now)").unwrap());

/// Inferred refinement category, each with its own quality target and
/// expected turnaround.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementCategory {
    /// Fixing defective output.
    ErrorCorrection,
    /// Making output meet performance expectations.
    PerformanceTuning,
    /// General restructuring for efficiency; never inferred, only explicit.
    Optimization,
    /// Raising output quality without changing scope.
    QualityImprovement,
    /// Adding functionality the output was missing.
    FeatureAddition,
}

impl RefinementCategory {
    /// Quality the refined output must reach for the loop to settle.
    pub fn target_quality(&self) -> f64 {
        match self {
            RefinementCategory::ErrorCorrection => 0.95,
            RefinementCategory::Optimization => 0.92,
            RefinementCategory::PerformanceTuning => 0.90,
            RefinementCategory::QualityImprovement => 0.88,
            RefinementCategory::FeatureAddition => 0.85,
        }
    }

    /// Expected turnaround before the timeout sweep fails the boomerang.
    pub fn expected_turnaround(&self) -> Duration {
        match self {
            RefinementCategory::ErrorCorrection => Duration::minutes(10),
            RefinementCategory::Optimization => Duration::minutes(12),
            RefinementCategory::PerformanceTuning => Duration::minutes(15),
            RefinementCategory::QualityImprovement => Duration::minutes(18),
            RefinementCategory::FeatureAddition => Duration::minutes(20),
        }
    }

    /// Infer a category from feedback keywords. Error markers win over
    /// performance, performance over feature; everything else is a quality
    /// improvement.
    pub fn classify(feedback: &str) -> RefinementCategory {
        if ERROR_PATTERN.is_match(feedback) {
            RefinementCategory::ErrorCorrection
        } else if PERFORMANCE_PATTERN.is_match(feedback) {
            RefinementCategory::PerformanceTuning
        } else if FEATURE_PATTERN.is_match(feedback) {
            RefinementCategory::FeatureAddition
        } else {
            RefinementCategory::QualityImprovement
        }
    }
}

impl std::fmt::Display for RefinementCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RefinementCategory::ErrorCorrection => "error_correction",
            RefinementCategory::PerformanceTuning => "performance_tuning",
            RefinementCategory::Optimization => "optimization",
            RefinementCategory::QualityImprovement => "quality_improvement",
            RefinementCategory::FeatureAddition => "feature_addition",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle of a boomerang.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoomerangStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Dispatched to the target agent, awaiting return.
    Sent,
    /// The target agent acknowledged and is refining.
    InProgress,
    /// A refined result came back and is under validation.
    Returned,
    /// The loop settled.
    Completed,
    /// Timed out or cancelled.
    Failed,
}

impl BoomerangStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BoomerangStatus::Completed | BoomerangStatus::Failed)
    }
}

/// One named validation check run against a returned result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    /// Rule name, e.g. `"no_error_markers"`.
    pub rule: String,
    /// Whether the check passed.
    pub passed: bool,
}

/// One send/return cycle in a boomerang's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoomerangIteration {
    /// Zero-based iteration number.
    pub iteration: u32,
    /// Agent the request went to.
    pub agent_id: Uuid,
    /// Returned result, absent for the outbound record.
    pub result: Option<String>,
    /// Returned quality, absent for the outbound record.
    pub quality: Option<f64>,
    /// When the record was made.
    pub timestamp: DateTime<Utc>,
}

/// A refinement request wrapped around a completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoomerangTask {
    /// Boomerang identifier.
    pub id: Uuid,
    /// The task whose output is being refined.
    pub original_task_id: Uuid,
    /// Agent asked to refine.
    pub target_agent: Uuid,
    /// Agent (or component) that raised the feedback, if any.
    pub source_agent: Option<Uuid>,
    /// The critique sent along with the output.
    pub feedback: String,
    /// Inferred or overridden category.
    pub category: RefinementCategory,
    /// Priority 1-4 derived from feedback severity.
    pub priority: u8,
    /// Lifecycle status.
    pub status: BoomerangStatus,
    /// Completed refinement cycles. Never exceeds `max_refinements`.
    pub refinement_count: u32,
    /// Bound on refinement cycles.
    pub max_refinements: u32,
    /// Quality the loop aims for.
    pub target_quality: f64,
    /// Allowed turnaround per cycle.
    pub expected_turnaround_secs: i64,
    /// When the current cycle was dispatched.
    pub sent_at: Option<DateTime<Utc>>,
    /// Checks run against the latest returned result.
    pub validation_results: Vec<ValidationCheck>,
    /// Full send/return history.
    pub history: Vec<BoomerangIteration>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl BoomerangTask {
    /// Whether the latest validation pass succeeded on every rule.
    pub fn validation_passed(&self) -> bool {
        self.validation_results.iter().all(|c| c.passed)
    }
}

/// Options for [`BoomerangManager::send_boomerang`].
#[derive(Debug, Clone, Default)]
pub struct BoomerangOptions {
    /// Override the refinement bound.
    pub max_refinements: Option<u32>,
    /// Override the inferred category.
    pub category: Option<RefinementCategory>,
    /// Override the derived priority.
    pub priority: Option<u8>,
}

/// Outcome of handling a returned boomerang.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoomerangOutcome {
    /// The loop settled; the refined output stands.
    Completed,
    /// Quality or validation fell short; another cycle was dispatched.
    Resent {
        /// The new refinement count.
        refinement: u32,
    },
}

/// Owns boomerang tasks through their refinement lifecycle.
pub struct BoomerangManager {
    boomerangs: HashMap<Uuid, BoomerangTask>,
    default_max_refinements: u32,
    events: EventBus,
}

impl BoomerangManager {
    /// Create a manager with the given default refinement bound.
    pub fn new(default_max_refinements: u32, events: EventBus) -> Self {
        Self {
            boomerangs: HashMap::new(),
            default_max_refinements,
            events,
        }
    }

    /// Wrap a task's output in a refinement request and dispatch it.
    ///
    /// The category is inferred from feedback keywords, the priority from
    /// severity keywords (falling back to the task's own priority), and the
    /// quality target and turnaround from the category.
    pub fn send_boomerang(
        &mut self,
        task: &Task,
        target_agent: Uuid,
        feedback: &str,
        options: BoomerangOptions,
    ) -> Result<Uuid, SwarmError> {
        if feedback.trim().is_empty() {
            return Err(SwarmError::Validation("boomerang feedback must not be empty".into()));
        }
        let category = options
            .category
            .unwrap_or_else(|| RefinementCategory::classify(feedback));
        let priority = options
            .priority
            .unwrap_or_else(|| derive_priority(feedback, task.priority))
            .clamp(1, BOOMERANG_PRIORITY_MAX);

        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut boomerang = BoomerangTask {
            id,
            original_task_id: task.id,
            target_agent,
            source_agent: task.assigned_agent,
            feedback: feedback.to_string(),
            category,
            priority,
            status: BoomerangStatus::Pending,
            refinement_count: 0,
            max_refinements: options.max_refinements.unwrap_or(self.default_max_refinements),
            target_quality: category.target_quality(),
            expected_turnaround_secs: category.expected_turnaround().num_seconds(),
            sent_at: None,
            validation_results: Vec::new(),
            history: Vec::new(),
            created_at: now,
        };
        dispatch(&mut boomerang, now);
        log::info!(
            "boomerang {} for task {} sent to {} ({}, priority {})",
            id,
            task.id,
            target_agent,
            category,
            priority
        );
        self.events.emit(SwarmEvent::BoomerangSent {
            boomerang_id: id,
            task_id: task.id,
            category: category.to_string(),
        });
        self.boomerangs.insert(id, boomerang);
        Ok(id)
    }

    /// Record that the target agent started refining.
    pub fn mark_in_progress(&mut self, id: Uuid) -> Result<(), SwarmError> {
        let boomerang = self.get_mut(id)?;
        if boomerang.status != BoomerangStatus::Sent {
            return Err(SwarmError::Validation(format!(
                "boomerang {} is not awaiting work",
                id
            )));
        }
        boomerang.status = BoomerangStatus::InProgress;
        Ok(())
    }

    /// Handle a returned refinement.
    ///
    /// Runs category-specific validation and re-sends (incrementing the
    /// bounded refinement counter and raising priority by one) only when
    /// quality is below target and validation failed, or when the first
    /// refinement came back under [`FIRST_PASS_QUALITY_FLOOR`]. Otherwise,
    /// or once the bound is reached, the loop terminates as completed.
    pub fn handle_return(
        &mut self,
        id: Uuid,
        result: &str,
        quality: f64,
    ) -> Result<BoomerangOutcome, SwarmError> {
        let boomerang = self.get_mut(id)?;
        if boomerang.status.is_terminal() || boomerang.status == BoomerangStatus::Pending {
            return Err(SwarmError::Validation(format!(
                "boomerang {} cannot return from status {:?}",
                id, boomerang.status
            )));
        }

        let now = Utc::now();
        boomerang.status = BoomerangStatus::Returned;
        boomerang.history.push(BoomerangIteration {
            iteration: boomerang.refinement_count,
            agent_id: boomerang.target_agent,
            result: Some(result.to_string()),
            quality: Some(quality),
            timestamp: now,
        });
        boomerang.validation_results = validate(boomerang.category, result);

        let below_target = quality < boomerang.target_quality;
        let needs_refinement = (below_target && !boomerang.validation_passed())
            || (boomerang.refinement_count == 0 && quality < FIRST_PASS_QUALITY_FLOOR);

        if needs_refinement && boomerang.refinement_count < boomerang.max_refinements {
            boomerang.refinement_count += 1;
            boomerang.priority = (boomerang.priority + 1).min(BOOMERANG_PRIORITY_MAX);
            dispatch(boomerang, now);
            let refinement = boomerang.refinement_count;
            let (task_id, category) = (boomerang.original_task_id, boomerang.category);
            log::info!("boomerang {} resent, refinement {} of {}", id, refinement, boomerang.max_refinements);
            self.events.emit(SwarmEvent::BoomerangSent {
                boomerang_id: id,
                task_id,
                category: category.to_string(),
            });
            return Ok(BoomerangOutcome::Resent { refinement });
        }

        boomerang.status = BoomerangStatus::Completed;
        let refinements = boomerang.refinement_count;
        log::info!("boomerang {} completed after {} refinements", id, refinements);
        self.events.emit(SwarmEvent::BoomerangCompleted { boomerang_id: id, refinements });
        Ok(BoomerangOutcome::Completed)
    }

    /// Cancel an in-flight boomerang, recording a failed terminal state.
    pub fn cancel(&mut self, id: Uuid, reason: &str) -> Result<(), SwarmError> {
        let boomerang = self.get_mut(id)?;
        if boomerang.status.is_terminal() {
            return Err(SwarmError::Validation(format!("boomerang {} already settled", id)));
        }
        boomerang.status = BoomerangStatus::Failed;
        log::info!("boomerang {} cancelled: {}", id, reason);
        self.events.emit(SwarmEvent::BoomerangFailed {
            boomerang_id: id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Periodic sweep failing any `sent` boomerang whose elapsed time
    /// exceeds its expected turnaround. Returns the failed ids.
    pub fn check_timeouts(&mut self) -> Vec<Uuid> {
        let now = Utc::now();
        let mut failed = Vec::new();
        for boomerang in self.boomerangs.values_mut() {
            if boomerang.status != BoomerangStatus::Sent {
                continue;
            }
            let Some(sent_at) = boomerang.sent_at else {
                continue;
            };
            if (now - sent_at).num_seconds() > boomerang.expected_turnaround_secs {
                boomerang.status = BoomerangStatus::Failed;
                failed.push(boomerang.id);
            }
        }
        for &id in &failed {
            log::warn!("boomerang {} timed out", id);
            self.events.emit(SwarmEvent::BoomerangFailed {
                boomerang_id: id,
                reason: "turnaround exceeded".to_string(),
            });
        }
        failed
    }

    /// Snapshot of one boomerang.
    pub fn boomerang(&self, id: Uuid) -> Option<&BoomerangTask> {
        self.boomerangs.get(&id)
    }

    /// Snapshot of all boomerangs wrapping the given task.
    pub fn for_task(&self, task_id: Uuid) -> Vec<&BoomerangTask> {
        let mut out: Vec<&BoomerangTask> = self
            .boomerangs
            .values()
            .filter(|b| b.original_task_id == task_id)
            .collect();
        out.sort_by_key(|b| b.created_at);
        out
    }

    /// Whether any boomerang for the task is still in flight.
    pub fn has_active_for_task(&self, task_id: Uuid) -> bool {
        self.boomerangs
            .values()
            .any(|b| b.original_task_id == task_id && !b.status.is_terminal())
    }

    fn get_mut(&mut self, id: Uuid) -> Result<&mut BoomerangTask, SwarmError> {
        self.boomerangs
            .get_mut(&id)
            .ok_or_else(|| SwarmError::NotFound { kind: "boomerang", id: id.to_string() })
    }
}

/// Move a boomerang into the sent state and append the outbound history
/// record.
fn dispatch(boomerang: &mut BoomerangTask, now: DateTime<Utc>) {
    boomerang.status = BoomerangStatus::Sent;
    boomerang.sent_at = Some(now);
    boomerang.history.push(BoomerangIteration {
        iteration: boomerang.refinement_count,
        agent_id: boomerang.target_agent,
        result: None,
        quality: None,
        timestamp: now,
    });
}

/// Priority 1-4 from feedback severity keywords, falling back to the
/// original task's priority capped at the boomerang scale.
fn derive_priority(feedback: &str, task_priority: u8) -> u8 {
    if CRITICAL_PATTERN.is_match(feedback) {
        4
    } else if MAJOR_PATTERN.is_match(feedback) {
        3
    } else if MINOR_PATTERN.is_match(feedback) {
        2
    } else {
        task_priority.min(BOOMERANG_PRIORITY_MAX)
    }
}

/// Category-specific content validation of a returned result.
fn validate(category: RefinementCategory, result: &str) -> Vec<ValidationCheck> {
    let mut checks = vec![ValidationCheck {
        rule: "output_present".to_string(),
        passed: !result.trim().is_empty(),
    }];
    match category {
        RefinementCategory::ErrorCorrection => checks.push(ValidationCheck {
            rule: "no_error_markers".to_string(),
            passed: !ERROR_MARKERS.is_match(result),
        }),
        RefinementCategory::PerformanceTuning | RefinementCategory::Optimization => {
            checks.push(ValidationCheck {
                rule: "reports_improvement".to_string(),
                passed: IMPROVEMENT_MARKERS.is_match(result),
            })
        }
        RefinementCategory::FeatureAddition => checks.push(ValidationCheck {
            rule: "describes_addition".to_string(),
            passed: FEATURE_MARKERS.is_match(result),
        }),
        RefinementCategory::QualityImprovement => checks.push(ValidationCheck {
            rule: "substantive_output".to_string(),
            passed: result.trim().len() >= 20,
        }),
    }
    checks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentType;

    fn manager() -> BoomerangManager {
        BoomerangManager::new(DEFAULT_MAX_REFINEMENTS, EventBus::default())
    }

    fn task() -> Task {
        Task::new("implement the cache layer", AgentType::Implementation, 3)
    }

    #[test]
    fn test_critical_bug_feedback_classification() {
        let mut manager = manager();
        let id = manager
            .send_boomerang(
                &task(),
                Uuid::new_v4(),
                "critical bug, please fix ASAP",
                BoomerangOptions::default(),
            )
            .unwrap();

        let boomerang = manager.boomerang(id).unwrap();
        assert_eq!(boomerang.category, RefinementCategory::ErrorCorrection);
        assert_eq!(boomerang.priority, 4);
        assert_eq!(boomerang.target_quality, 0.95);
        assert_eq!(boomerang.status, BoomerangStatus::Sent);
    }

    #[test]
    fn test_category_keyword_precedence() {
        assert_eq!(
            RefinementCategory::classify("this is slow, optimize the loop"),
            RefinementCategory::PerformanceTuning
        );
        assert_eq!(
            RefinementCategory::classify("please add support for retries"),
            RefinementCategory::FeatureAddition
        );
        assert_eq!(
            RefinementCategory::classify("polish the wording"),
            RefinementCategory::QualityImprovement
        );
        // Error keywords win even alongside performance ones.
        assert_eq!(
            RefinementCategory::classify("fix the slow query"),
            RefinementCategory::ErrorCorrection
        );
    }

    #[test]
    fn test_good_return_completes() {
        let mut manager = manager();
        let id = manager
            .send_boomerang(&task(), Uuid::new_v4(), "minor cleanup", BoomerangOptions::default())
            .unwrap();

        let outcome = manager
            .handle_return(id, "the cleanup is done and reads well now", 0.93)
            .unwrap();
        assert_eq!(outcome, BoomerangOutcome::Completed);
        assert_eq!(manager.boomerang(id).unwrap().status, BoomerangStatus::Completed);
    }

    #[test]
    fn test_low_first_return_is_resent_and_priority_raised() {
        let mut manager = manager();
        let id = manager
            .send_boomerang(&task(), Uuid::new_v4(), "minor cleanup", BoomerangOptions::default())
            .unwrap();
        let before = manager.boomerang(id).unwrap().priority;

        // Validation passes, but a first return under 0.6 still refines.
        let outcome = manager
            .handle_return(id, "a reasonable first draft of the cleanup", 0.5)
            .unwrap();
        assert_eq!(outcome, BoomerangOutcome::Resent { refinement: 1 });

        let boomerang = manager.boomerang(id).unwrap();
        assert_eq!(boomerang.status, BoomerangStatus::Sent);
        assert_eq!(boomerang.priority, (before + 1).min(BOOMERANG_PRIORITY_MAX));
    }

    #[test]
    fn test_refinement_bound_is_never_exceeded() {
        let mut manager = manager();
        let id = manager
            .send_boomerang(
                &task(),
                Uuid::new_v4(),
                "critical error in the output",
                BoomerangOptions { max_refinements: Some(2), ..Default::default() },
            )
            .unwrap();

        // Keep returning bad results: error markers fail validation and the
        // quality stays under target.
        let mut outcomes = Vec::new();
        loop {
            let outcome = manager.handle_return(id, "still throws an error", 0.2).unwrap();
            let done = outcome == BoomerangOutcome::Completed;
            outcomes.push(outcome);
            if done {
                break;
            }
        }

        let boomerang = manager.boomerang(id).unwrap();
        assert_eq!(boomerang.refinement_count, 2);
        assert!(boomerang.refinement_count <= boomerang.max_refinements);
        // Terminal despite quality below target.
        assert_eq!(boomerang.status, BoomerangStatus::Completed);
        assert_eq!(outcomes.len(), 3);
    }

    #[test]
    fn test_timeout_sweep_fails_overdue_boomerangs() {
        let mut manager = manager();
        let id = manager
            .send_boomerang(&task(), Uuid::new_v4(), "please fix", BoomerangOptions::default())
            .unwrap();

        // Backdate the dispatch past the category turnaround.
        manager.boomerangs.get_mut(&id).unwrap().sent_at =
            Some(Utc::now() - Duration::minutes(30));

        let failed = manager.check_timeouts();
        assert_eq!(failed, vec![id]);
        assert_eq!(manager.boomerang(id).unwrap().status, BoomerangStatus::Failed);

        // Terminal boomerangs reject further returns.
        assert!(manager.handle_return(id, "too late", 0.9).is_err());
    }

    #[test]
    fn test_cancel_records_failed_state() {
        let mut manager = manager();
        let id = manager
            .send_boomerang(&task(), Uuid::new_v4(), "please fix", BoomerangOptions::default())
            .unwrap();
        manager.cancel(id, "caller gave up").unwrap();
        assert_eq!(manager.boomerang(id).unwrap().status, BoomerangStatus::Failed);
    }

    #[test]
    fn test_history_records_every_cycle() {
        let mut manager = manager();
        let id = manager
            .send_boomerang(&task(), Uuid::new_v4(), "minor cleanup", BoomerangOptions::default())
            .unwrap();
        manager.handle_return(id, "first draft", 0.3).unwrap();
        manager.handle_return(id, "the cleanup is done and reads well", 0.95).unwrap();

        let boomerang = manager.boomerang(id).unwrap();
        // Outbound + return + outbound + return.
        assert_eq!(boomerang.history.len(), 4);
        assert!(manager.for_task(boomerang.original_task_id).len() == 1);
    }
}
