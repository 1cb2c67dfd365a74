use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Review lifecycle. Transitions only move forward; the partial order lives
/// in `can_transition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    SentToReviewer,
    AwaitingDecision,
    Completed,
    Cancelled,
    Failed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::SentToReviewer => "sent_to_reviewer",
            ReviewStatus::AwaitingDecision => "awaiting_decision",
            ReviewStatus::Completed => "completed",
            ReviewStatus::Cancelled => "cancelled",
            ReviewStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReviewStatus::Completed | ReviewStatus::Cancelled | ReviewStatus::Failed
        )
    }

    pub fn can_transition(&self, next: ReviewStatus) -> bool {
        use ReviewStatus::*;
        match (self, next) {
            (Pending, SentToReviewer) => true,
            (SentToReviewer, AwaitingDecision) => true,
            (AwaitingDecision, Completed) => true,
            // Cancellation and failure are reachable from any live state.
            (s, Cancelled) | (s, Failed) if !s.is_terminal() => true,
            _ => false,
        }
    }
}

/// Human reviewer verdict carried by a decision signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Rejected,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approved => "approved",
            ReviewDecision::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "approved" | "approve" => Some(ReviewDecision::Approved),
            "rejected" | "reject" => Some(ReviewDecision::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSignal {
    pub decision: ReviewDecision,
    pub notes: Option<String>,
    pub decided_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSignal {
    pub reason: String,
}

/// Per-instance feature set, pinned from the schema version recorded when
/// the review was created. Instances started under an older version keep
/// their original behavior for their whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowFeatures {
    pub poll_external: bool,
    pub sync_external: bool,
}

impl WorkflowFeatures {
    pub const CURRENT_VERSION: i32 = 3;

    pub fn for_version(schema_version: i32) -> Self {
        Self {
            poll_external: schema_version >= 2,
            sync_external: schema_version >= 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewWorkflowInput {
    pub payload: crate::pipeline::traits::ReviewTaskPayload,
    pub schema_version: i32,
}

#[derive(Debug, Clone)]
pub struct ReviewWorkflowConfig {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl ReviewWorkflowConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            poll_interval: cfg.review_poll_interval(),
            max_wait: cfg.review_max_wait(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReviewWorkflowOutput {
    pub review_id: String,
    pub status: ReviewStatus,
    pub decision: Option<ReviewDecision>,
    pub notes: Option<String>,
    pub decided_by: Option<String>,
    pub retry_poll_count: u32,
}
