//! Task status state machine.
//!
//! The status set is a contract with the backend. This module owns the
//! canonical groupings every other rule keys off of:
//!
//! | Grouping | Statuses |
//! |----------|----------|
//! | Active (agent producing output, also poll-worthy) | refining, approved, planning, in_progress, coding |
//! | Terminal | done, failed, canceled |
//! | Editable | everything else |
//!
//! The action table is data: [`TaskStatus::actions`] is a single match that
//! must stay in sync with what the backend accepts per status.

use serde::{Deserialize, Serialize};

use crate::types::Task;

/// Every status a task can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Refining,
    PendingApproval,
    Approved,
    Coding,
    PlanReview,
    Review,
    AwaitingReview,
    PrCreated,
    ChangesRequested,
    Done,
    Failed,
    Canceled,
    MergeConflicts,
    Backlog,
    Planning,
    InProgress,
}

impl TaskStatus {
    /// Every status, in workflow order.
    pub const ALL: [TaskStatus; 17] = [
        TaskStatus::Backlog,
        TaskStatus::Draft,
        TaskStatus::Refining,
        TaskStatus::PendingApproval,
        TaskStatus::Approved,
        TaskStatus::Planning,
        TaskStatus::InProgress,
        TaskStatus::Coding,
        TaskStatus::PlanReview,
        TaskStatus::Review,
        TaskStatus::AwaitingReview,
        TaskStatus::PrCreated,
        TaskStatus::ChangesRequested,
        TaskStatus::MergeConflicts,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Draft => "draft",
            TaskStatus::Refining => "refining",
            TaskStatus::PendingApproval => "pending_approval",
            TaskStatus::Approved => "approved",
            TaskStatus::Coding => "coding",
            TaskStatus::PlanReview => "plan_review",
            TaskStatus::Review => "review",
            TaskStatus::AwaitingReview => "awaiting_review",
            TaskStatus::PrCreated => "pr_created",
            TaskStatus::ChangesRequested => "changes_requested",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
            TaskStatus::MergeConflicts => "merge_conflicts",
            TaskStatus::Backlog => "backlog",
            TaskStatus::Planning => "planning",
            TaskStatus::InProgress => "in_progress",
        }
    }

    /// The agent is currently working and the stream should stay connected.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Refining
                | TaskStatus::Approved
                | TaskStatus::Planning
                | TaskStatus::InProgress
                | TaskStatus::Coding
        )
    }

    /// No further transitions without an explicit restart action.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Title, description and agent selection may be changed.
    pub fn is_editable(&self) -> bool {
        !self.is_active() && !self.is_terminal()
    }

    /// Snapshots are re-fetched on a timer while in this status.
    pub fn is_poll_worthy(&self) -> bool {
        self.is_active()
    }

    pub fn phase(&self) -> Phase {
        match self {
            TaskStatus::Backlog
            | TaskStatus::Draft
            | TaskStatus::Refining
            | TaskStatus::PendingApproval => Phase::Spec,
            TaskStatus::Approved
            | TaskStatus::Planning
            | TaskStatus::InProgress
            | TaskStatus::Coding
            | TaskStatus::PlanReview
            | TaskStatus::ChangesRequested => Phase::Coding,
            TaskStatus::Review
            | TaskStatus::AwaitingReview
            | TaskStatus::PrCreated
            | TaskStatus::MergeConflicts => Phase::Review,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Canceled => Phase::Terminal,
        }
    }

    /// Actions the backend accepts in this status, excluding `view_pr`.
    pub fn actions(&self) -> &'static [TaskAction] {
        use TaskAction::*;

        match self {
            TaskStatus::Draft | TaskStatus::Backlog => &[Edit, Start, Delete],
            TaskStatus::Refining
            | TaskStatus::Approved
            | TaskStatus::Planning
            | TaskStatus::Coding
            | TaskStatus::ChangesRequested => &[Cancel],
            TaskStatus::InProgress => &[Cancel, Extend],
            TaskStatus::PendingApproval => &[Approve, Edit, Delete],
            TaskStatus::PlanReview => &[Approve, RequestChanges, Cancel],
            TaskStatus::AwaitingReview => &[Approve, RequestChanges],
            TaskStatus::Review | TaskStatus::PrCreated => {
                &[RequestChanges, MarkMerged, MarkClosed]
            }
            TaskStatus::MergeConflicts => &[Retry, MarkClosed],
            TaskStatus::Done => &[Delete],
            TaskStatus::Failed | TaskStatus::Canceled => &[Retry, StartFresh, Delete],
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {}", s))
    }
}

/// Coarse workflow phase a status belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Spec,
    Coding,
    Review,
    Terminal,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Spec => "spec",
            Phase::Coding => "coding",
            Phase::Review => "review",
            Phase::Terminal => "terminal",
        }
    }
}

/// A user action offered for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Edit,
    Start,
    Delete,
    Cancel,
    Extend,
    Approve,
    RequestChanges,
    MarkMerged,
    MarkClosed,
    Retry,
    StartFresh,
    ViewPr,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Edit => "edit",
            TaskAction::Start => "start",
            TaskAction::Delete => "delete",
            TaskAction::Cancel => "cancel",
            TaskAction::Extend => "extend",
            TaskAction::Approve => "approve",
            TaskAction::RequestChanges => "request_changes",
            TaskAction::MarkMerged => "mark_merged",
            TaskAction::MarkClosed => "mark_closed",
            TaskAction::Retry => "retry",
            TaskAction::StartFresh => "start_fresh",
            TaskAction::ViewPr => "view_pr",
        }
    }
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions for a concrete task: the status table plus `view_pr` when a PR exists.
pub fn available_actions(task: &Task) -> Vec<TaskAction> {
    actions_for(task.status, task.has_pr())
}

/// Same as [`available_actions`] without a task snapshot at hand.
pub fn actions_for(status: TaskStatus, has_pr: bool) -> Vec<TaskAction> {
    let mut actions = status.actions().to_vec();
    if has_pr {
        actions.push(TaskAction::ViewPr);
    }
    actions
}

/// True when moving `from → to` means a previous run finished and a new one
/// began, so buffered entries are stale and the stream must be reopened.
pub fn requires_restart(from: TaskStatus, to: TaskStatus) -> bool {
    from.is_terminal() && !to.is_terminal() && to != TaskStatus::Draft
}

/// A status change observed for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<TaskStatus>,
    pub to: TaskStatus,
}

impl Transition {
    pub fn requires_restart(&self) -> bool {
        self.from.is_some_and(|from| requires_restart(from, self.to))
    }
}

/// Remembers the last status observed for a task and reports changes.
#[derive(Debug, Default, Clone)]
pub struct StatusTracker {
    last: Option<TaskStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<TaskStatus> {
        self.last
    }

    /// Record an observation. Returns `None` when the status did not change.
    pub fn observe(&mut self, status: TaskStatus) -> Option<Transition> {
        if self.last == Some(status) {
            return None;
        }
        let transition = Transition {
            from: self.last,
            to: status,
        };
        self.last = Some(status);
        Some(transition)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
