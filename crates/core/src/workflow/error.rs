//! Workflow error types for document approval.
//!
//! This module defines all error types that can occur while building
//! approval cases, deciding steps, and resolving approvers.

use procura_shared::types::{
    ApprovalRuleId, ApprovalStepId, ApprovalWorkflowId, DepartmentId, DocumentId,
    UserApprovalId, UserId,
};
use procura_shared::{AppError, ErrorKind};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::budget::BudgetError;
use crate::store::StoreError;
use crate::workflow::types::ApprovalStatus;

/// The requirement a step decision failed to meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// The step requires an OTP and none was supplied.
    OtpMissing,
    /// The step requires an OTP but none was ever issued.
    OtpNotIssued,
    /// The supplied OTP does not match the issued code.
    OtpMismatch,
    /// The issued OTP has expired.
    OtpExpired,
    /// The step requires evidence and no file is attached.
    EvidenceMissing,
    /// A rejection needs a remark.
    RemarkMissing,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OtpMissing => "an OTP is required",
            Self::OtpNotIssued => "no OTP has been issued for this step",
            Self::OtpMismatch => "the OTP does not match",
            Self::OtpExpired => "the OTP has expired",
            Self::EvidenceMissing => "an evidence file is required",
            Self::RemarkMissing => "a remark is required to reject",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The workflow template cannot produce an approval case.
    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    /// Workflow template not found.
    #[error("Workflow {0} not found")]
    WorkflowNotFound(ApprovalWorkflowId),

    /// The document already has an approval case.
    #[error("Document {0} already has an approval case")]
    ApprovalAlreadyExists(DocumentId),

    /// Approval case not found.
    #[error("Approval {0} not found")]
    ApprovalNotFound(UserApprovalId),

    /// No approval case exists for the document.
    #[error("No approval case for document {0}")]
    DocumentNotFound(DocumentId),

    /// Step not found.
    #[error("Approval step {0} not found")]
    StepNotFound(ApprovalStepId),

    /// The step has already been decided.
    #[error("Approval step {step_id} is already {status}")]
    StepAlreadyFinalized {
        /// The step.
        step_id: ApprovalStepId,
        /// Its terminal status.
        status: ApprovalStatus,
    },

    /// The approval case is closed; remaining steps never transition.
    #[error("Approval {approval_id} is already {status}")]
    WorkflowClosed {
        /// The approval case.
        approval_id: UserApprovalId,
        /// Its terminal status.
        status: ApprovalStatus,
    },

    /// A lower-numbered step is still pending.
    #[error("Step {step_number} cannot be approved before step {pending_step}")]
    OutOfOrder {
        /// The step being approved.
        step_number: u32,
        /// The lowest pending step.
        pending_step: u32,
    },

    /// An OTP, evidence, or remark requirement is unmet.
    #[error("Precondition unmet: {0}")]
    PreconditionUnmet(Requirement),

    /// The acting user is not the step's approver.
    #[error("User {user_id} is not the assigned approver of step {step_id}")]
    NotAssignedApprover {
        /// The step.
        step_id: ApprovalStepId,
        /// The acting user.
        user_id: UserId,
    },

    /// OTP requested for a step that does not use one.
    #[error("Approval step {0} does not require an OTP")]
    OtpNotRequired(ApprovalStepId),

    /// An unexpired OTP already exists for the step.
    #[error("An OTP is already active for step {0}")]
    OtpAlreadyIssued(ApprovalStepId),

    /// No live rule band covers the amount.
    #[error("No approval rule for department {department_id} covers amount {amount}")]
    NoMatchingRule {
        /// The department.
        department_id: DepartmentId,
        /// The amount.
        amount: Decimal,
    },

    /// Several live rule bands cover the amount.
    #[error("Approval rules {rule_ids:?} of department {department_id} all cover amount {amount}")]
    AmbiguousRule {
        /// The department.
        department_id: DepartmentId,
        /// The amount.
        amount: Decimal,
        /// The overlapping rules.
        rule_ids: Vec<ApprovalRuleId>,
    },

    /// A rule band overlaps a live band of the same department.
    #[error("Band [{min_amount}, {max_amount}] overlaps approval rule {existing}")]
    RuleOverlap {
        /// The live rule overlapped.
        existing: ApprovalRuleId,
        /// Candidate minimum.
        min_amount: Decimal,
        /// Candidate maximum.
        max_amount: Decimal,
    },

    /// A rule band is malformed.
    #[error("Invalid band [{min_amount}, {max_amount}]")]
    InvalidBand {
        /// Candidate minimum.
        min_amount: Decimal,
        /// Candidate maximum.
        max_amount: Decimal,
    },

    /// Approval rule not found or deleted.
    #[error("Approval rule {0} not found")]
    RuleNotFound(ApprovalRuleId),

    /// Only rejected approval cases may be resubmitted.
    #[error("Document {document_id} cannot be resubmitted while its approval is {status}")]
    ResubmitNotAllowed {
        /// The document.
        document_id: DocumentId,
        /// Current status of its approval case.
        status: ApprovalStatus,
    },

    /// A ledger effect failed; the step transition was not committed.
    #[error(transparent)]
    Ledger(#[from] BudgetError),

    /// Collaborator failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Returns the error taxonomy kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidWorkflow(_)
            | Self::RuleOverlap { .. }
            | Self::InvalidBand { .. }
            | Self::OtpNotRequired(_) => ErrorKind::Validation,

            Self::ApprovalAlreadyExists(_)
            | Self::StepAlreadyFinalized { .. }
            | Self::WorkflowClosed { .. }
            | Self::OutOfOrder { .. }
            | Self::OtpAlreadyIssued(_)
            | Self::ResubmitNotAllowed { .. } => ErrorKind::StateConflict,

            Self::PreconditionUnmet(_) => ErrorKind::Precondition,

            Self::NotAssignedApprover { .. } => ErrorKind::Forbidden,

            Self::NoMatchingRule { .. } | Self::AmbiguousRule { .. } => {
                ErrorKind::Configuration
            }

            Self::WorkflowNotFound(_)
            | Self::ApprovalNotFound(_)
            | Self::DocumentNotFound(_)
            | Self::StepNotFound(_)
            | Self::RuleNotFound(_) => ErrorKind::NotFound,

            Self::Ledger(err) => err.kind(),
            Self::Store(err) => err.kind(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Ledger(err) => err.status_code(),
            Self::Store(err) => err.status_code(),
            _ => AppError::from_kind(self.kind(), String::new()).status_code(),
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidWorkflow(_) => "INVALID_WORKFLOW",
            Self::WorkflowNotFound(_) => "WORKFLOW_NOT_FOUND",
            Self::ApprovalAlreadyExists(_) => "APPROVAL_ALREADY_EXISTS",
            Self::ApprovalNotFound(_) => "APPROVAL_NOT_FOUND",
            Self::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            Self::StepNotFound(_) => "STEP_NOT_FOUND",
            Self::StepAlreadyFinalized { .. } => "STEP_ALREADY_FINALIZED",
            Self::WorkflowClosed { .. } => "WORKFLOW_CLOSED",
            Self::OutOfOrder { .. } => "OUT_OF_ORDER",
            Self::PreconditionUnmet(_) => "PRECONDITION_UNMET",
            Self::NotAssignedApprover { .. } => "NOT_ASSIGNED_APPROVER",
            Self::OtpNotRequired(_) => "OTP_NOT_REQUIRED",
            Self::OtpAlreadyIssued(_) => "OTP_ALREADY_ISSUED",
            Self::NoMatchingRule { .. } => "NO_MATCHING_RULE",
            Self::AmbiguousRule { .. } => "AMBIGUOUS_RULE",
            Self::RuleOverlap { .. } => "RULE_OVERLAP",
            Self::InvalidBand { .. } => "INVALID_BAND",
            Self::RuleNotFound(_) => "RULE_NOT_FOUND",
            Self::ResubmitNotAllowed { .. } => "RESUBMIT_NOT_ALLOWED",
            Self::Ledger(err) => err.error_code(),
            Self::Store(err) => err.error_code(),
        }
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}
