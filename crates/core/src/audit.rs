//! Record status and the immutable audit trail.
//!
//! Ledger-adjacent entities are never hard-deleted or silently rewritten.
//! They carry a [`RecordStatus`] tag, and every state change is appended
//! to the audit log as an [`AuditEvent`].

use chrono::{DateTime, Utc};
use procura_shared::types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle tag for soft-deletable records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// The record participates in all calculations.
    #[default]
    Active,
    /// The record is retained for history only.
    Deleted,
}

impl RecordStatus {
    /// Returns true if the record is live.
    #[must_use]
    pub fn is_active(self) -> bool {
        self == Self::Active
    }
}

/// Kind of entity an audit event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    /// A document's approval case.
    UserApproval,
    /// A single approval step.
    ApprovalStep,
    /// A budget approval rule.
    ApprovalRule,
    /// A budget account.
    BudgetAccount,
    /// A budget item.
    BudgetItem,
    /// A budget item detail.
    BudgetItemDetail,
    /// An increase-budget transaction.
    IncreaseBudget,
    /// A usage posting.
    Posting,
}

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Entity was created.
    Created,
    /// Entity fields were changed.
    Updated,
    /// Entity was soft-deleted or withdrawn.
    Deleted,
    /// OTP was issued for a step.
    OtpIssued,
    /// Evidence file was attached to a step.
    EvidenceAttached,
    /// Step or approval reached `approved`.
    Approved,
    /// Step or approval reached `rejected`.
    Rejected,
    /// Usage was posted against a budget item.
    Posted,
    /// A posting or increase was reversed.
    Reversed,
    /// An increase was applied.
    Applied,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::OtpIssued => "otp_issued",
            Self::EvidenceAttached => "evidence_attached",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Posted => "posted",
            Self::Reversed => "reversed",
            Self::Applied => "applied",
        };
        f.write_str(s)
    }
}

/// One immutable entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event ID.
    pub id: Uuid,
    /// Entity kind.
    pub entity: AuditEntity,
    /// Entity ID.
    pub entity_id: Uuid,
    /// What happened.
    pub action: AuditAction,
    /// Who did it, when known.
    pub actor: Option<UserId>,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Free-form structured detail.
    pub detail: serde_json::Value,
}

impl AuditEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(entity: AuditEntity, entity_id: Uuid, action: AuditAction) -> Self {
        Self {
            id: Uuid::now_v7(),
            entity,
            entity_id,
            action,
            actor: None,
            at: Utc::now(),
            detail: serde_json::Value::Null,
        }
    }

    /// Sets the acting user.
    #[must_use]
    pub fn by(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    /// Overrides the event time.
    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}
