//! Plan, task, and step types with their completion/readiness predicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Cancelled,
}

impl PlanStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plan priority. `Maybe` marks speculative plans that are never scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
    Maybe,
}

impl Priority {
    /// Numeric rank used for next-plan ordering. Absent priority ranks 0.
    #[must_use]
    pub const fn rank(priority: Option<Priority>) -> u8 {
        match priority {
            Some(Self::Urgent) => 4,
            Some(Self::High) => 3,
            Some(Self::Medium) => 2,
            Some(Self::Low) => 1,
            Some(Self::Maybe) | None => 0,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
            Self::Maybe => "maybe",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The smallest schedulable unit: one prompt with a done flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    pub prompt: String,
    #[serde(default)]
    pub done: bool,
}

/// A named unit of work within a plan, optionally decomposed into steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Task {
    /// A task is done iff its own flag is set, or it has at least one step
    /// and every step is done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done || (!self.steps.is_empty() && self.steps.iter().all(|s| s.done))
    }
}

/// A unit of work with dependency edges and an ordered task list.
///
/// Fields the orchestrator does not own (prose, doc links, tracker ids) pass
/// through the flattened `extra` mapping untouched on rewrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: u32,
    /// Stable identity, generated once and persisted on first read if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Ordered plan-id references. Ids that resolve to no known plan are
    /// skipped by the resolver, not treated as errors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<u32>,
    /// Optional parent plan id; the parent implicitly depends on this plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u32>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

impl Plan {
    /// Minimal plan constructor used by tests and programmatic callers.
    #[must_use]
    pub fn new(id: u32, title: impl Into<String>) -> Self {
        Self {
            id,
            uuid: None,
            title: title.into(),
            goal: None,
            details: None,
            status: PlanStatus::Pending,
            priority: None,
            dependencies: Vec::new(),
            parent: None,
            tasks: Vec::new(),
            created_at: None,
            updated_at: None,
            extra: serde_yaml::Mapping::new(),
        }
    }

    /// A plan is complete iff it has at least one task and every task is
    /// done. A zero-task plan is a stub awaiting preparation, never complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(Task::is_done)
    }

    /// Count of tasks not yet done.
    #[must_use]
    pub fn incomplete_task_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_done()).count()
    }

    /// Record a mutation timestamp. Callers persist afterwards.
    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}
