//! Workflow domain types for document approval.
//!
//! This module defines workflow templates, the per-document approval case,
//! its steps, and the input an approver supplies when deciding a step.

use chrono::{DateTime, Utc};
use procura_shared::types::{
    ApprovalStepId, ApprovalWorkflowId, BudgetItemId, DepartmentId, DocumentId, FileId,
    UserApprovalId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::workflow::error::WorkflowError;

/// The kind of document a workflow approves.
///
/// Serialized with the short codes used on the wire (`pr`, `po`, `r`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApprovalType {
    /// Purchase request.
    #[serde(rename = "pr")]
    PurchaseRequest,
    /// Purchase order.
    #[serde(rename = "po")]
    PurchaseOrder,
    /// Goods receipt.
    #[serde(rename = "r")]
    Receipt,
}

impl ApprovalType {
    /// Returns the wire code of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchaseRequest => "pr",
            Self::PurchaseOrder => "po",
            Self::Receipt => "r",
        }
    }

    /// Parses a type from its wire code. `receipt` is accepted as an alias of `r`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pr" => Some(Self::PurchaseRequest),
            "po" => Some(Self::PurchaseOrder),
            "r" | "receipt" => Some(Self::Receipt),
            _ => None,
        }
    }
}

impl fmt::Display for ApprovalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a step or of a whole approval case.
///
/// `Pending` is initial; `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved (terminal).
    Approved,
    /// Rejected (terminal).
    Rejected,
}

impl ApprovalStatus {
    /// Returns the numeric status id (`pending=1`, `approved=2`, `rejected=3`).
    #[must_use]
    pub fn id(self) -> i16 {
        match self {
            Self::Pending => 1,
            Self::Approved => 2,
            Self::Rejected => 3,
        }
    }

    /// Parses a numeric status id.
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::Pending),
            2 => Some(Self::Approved),
            3 => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Returns the string representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Returns true if no further transition is allowed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An approver's decision on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Approve the step.
    Approve,
    /// Reject the step, terminating the workflow.
    Reject,
}

impl Decision {
    /// Returns the status a pending step moves to.
    #[must_use]
    pub fn target_status(self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Reject => ApprovalStatus::Rejected,
        }
    }
}

/// One configured checkpoint of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepTemplate {
    /// 1-based position in the workflow.
    pub step_number: u32,
    /// Department whose authority applies to this step.
    pub department_id: DepartmentId,
    /// Whether evidence must be attached before approval.
    pub required_file_upload: bool,
    /// Whether an OTP must be verified before approval.
    pub requires_otp: bool,
    /// Document kind this step approves.
    pub approval_type: ApprovalType,
    /// Whether the approver is resolved from the department's amount bands.
    pub amount_gated: bool,
    /// Fixed approver for steps that are not amount-gated.
    pub approver_id: Option<UserId>,
}

impl ApprovalStepTemplate {
    /// Creates a plain step with no OTP, evidence, or amount gating.
    #[must_use]
    pub fn new(step_number: u32, department_id: DepartmentId, approval_type: ApprovalType) -> Self {
        Self {
            step_number,
            department_id,
            required_file_upload: false,
            requires_otp: false,
            approval_type,
            amount_gated: false,
            approver_id: None,
        }
    }

    /// Requires an OTP before approval.
    #[must_use]
    pub fn with_otp(mut self) -> Self {
        self.requires_otp = true;
        self
    }

    /// Requires an evidence file before approval.
    #[must_use]
    pub fn with_file_upload(mut self) -> Self {
        self.required_file_upload = true;
        self
    }

    /// Resolves the approver from the department's amount bands.
    #[must_use]
    pub fn amount_gated(mut self) -> Self {
        self.amount_gated = true;
        self
    }

    /// Binds a fixed approver.
    #[must_use]
    pub fn with_approver(mut self, approver_id: UserId) -> Self {
        self.approver_id = Some(approver_id);
        self
    }
}

/// A workflow template. Configured once and never mutated by approval actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalWorkflow {
    /// Workflow ID.
    pub id: ApprovalWorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Document kind the workflow approves.
    pub document_type: ApprovalType,
    /// Step templates ordered by `step_number`.
    pub steps: Vec<ApprovalStepTemplate>,
}

impl ApprovalWorkflow {
    /// Creates a workflow template.
    ///
    /// Steps are sorted by number. Numbers must be exactly `1..=n` and every
    /// step must approve the workflow's document type. An empty step list is
    /// accepted here; it is rejected when a document is initialized.
    pub fn new(
        name: impl Into<String>,
        document_type: ApprovalType,
        mut steps: Vec<ApprovalStepTemplate>,
    ) -> Result<Self, WorkflowError> {
        steps.sort_by_key(|s| s.step_number);

        let numbers: BTreeSet<u32> = steps.iter().map(|s| s.step_number).collect();
        if numbers.len() != steps.len() {
            return Err(WorkflowError::InvalidWorkflow(
                "step numbers must be unique".to_string(),
            ));
        }
        for (expected, step) in (1u32..).zip(&steps) {
            if step.step_number != expected {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "step numbers must be contiguous from 1, found {} at position {expected}",
                    step.step_number
                )));
            }
            if step.approval_type != document_type {
                return Err(WorkflowError::InvalidWorkflow(format!(
                    "step {} approves {} but the workflow approves {document_type}",
                    step.step_number, step.approval_type
                )));
            }
        }

        Ok(Self {
            id: ApprovalWorkflowId::new(),
            name: name.into(),
            document_type,
            steps,
        })
    }
}

/// The subject of an approval case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Document ID.
    pub id: DocumentId,
    /// Document kind.
    pub document_type: ApprovalType,
    /// Owning department.
    pub department_id: DepartmentId,
    /// Total monetary amount, used for band resolution and posting.
    pub total_amount: Decimal,
    /// Budget item the document is charged to, if any.
    pub budget_item_id: Option<BudgetItemId>,
    /// Budget account code the document is charged to, if any.
    pub account_code: Option<String>,
    /// Submitting user.
    pub submitted_by: UserId,
}

/// An evidence file reference attached to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceFile {
    /// File ID in the file collaborator.
    pub id: FileId,
    /// Original file name.
    pub name: String,
    /// When the file was attached.
    pub attached_at: DateTime<Utc>,
}

impl EvidenceFile {
    /// Creates a file reference attached now.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: FileId::new(),
            name: name.into(),
            attached_at: Utc::now(),
        }
    }
}

/// An OTP issued for a step. Only the hash of the code is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedOtp {
    /// SHA-256 hex digest of the code.
    pub code_hash: String,
    /// Opaque reference returned by the notifier.
    pub code_reference: String,
    /// When the code was issued.
    pub issued_at: DateTime<Utc>,
    /// When the code stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// When the code was consumed by an approval.
    pub verified_at: Option<DateTime<Utc>>,
}

impl IssuedOtp {
    /// Returns true if the code can no longer be used at `at`.
    #[must_use]
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        at >= self.expires_at
    }
}

/// One step instance of a document's approval case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    /// Step ID.
    pub id: ApprovalStepId,
    /// Owning approval case.
    pub approval_id: UserApprovalId,
    /// 1-based position.
    pub step_number: u32,
    /// Document kind.
    pub approval_type: ApprovalType,
    /// Department whose authority applies.
    pub department_id: DepartmentId,
    /// Current status.
    pub status: ApprovalStatus,
    /// Approver remark; required on rejection.
    pub remark: Option<String>,
    /// Issued OTP, if any.
    pub otp: Option<IssuedOtp>,
    /// Whether OTP verification gates approval.
    pub is_otp: bool,
    /// Whether evidence gates approval.
    pub required_file_upload: bool,
    /// Whether the approver came from amount bands.
    pub amount_gated: bool,
    /// Budget account code the approval posts against.
    pub account_code: Option<String>,
    /// Budget item the approval posts against.
    pub budget_item_id: Option<BudgetItemId>,
    /// Linked purchase-order item, if any.
    pub purchase_order_item_id: Option<Uuid>,
    /// Evidence files.
    pub files: Vec<EvidenceFile>,
    /// User authorized to decide this step.
    pub approver_id: Option<UserId>,
    /// User who decided the step.
    pub decided_by: Option<UserId>,
    /// When the step was decided.
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalStep {
    /// Instantiates a pending step from its template.
    #[must_use]
    pub fn from_template(approval_id: UserApprovalId, template: &ApprovalStepTemplate) -> Self {
        Self {
            id: ApprovalStepId::new(),
            approval_id,
            step_number: template.step_number,
            approval_type: template.approval_type,
            department_id: template.department_id,
            status: ApprovalStatus::Pending,
            remark: None,
            otp: None,
            is_otp: template.requires_otp,
            required_file_upload: template.required_file_upload,
            amount_gated: template.amount_gated,
            account_code: None,
            budget_item_id: None,
            purchase_order_item_id: None,
            files: Vec::new(),
            approver_id: template.approver_id,
            decided_by: None,
            decided_at: None,
        }
    }

    /// Returns true if the step awaits a decision.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

/// A document's approval case with its ordered steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserApproval {
    /// Approval ID.
    pub id: UserApprovalId,
    /// The document under approval.
    pub document: Document,
    /// Template the steps were built from.
    pub approval_workflow_id: ApprovalWorkflowId,
    /// Overall status.
    pub status: ApprovalStatus,
    /// Steps ordered by `step_number`.
    pub steps: Vec<ApprovalStep>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl UserApproval {
    /// Returns the step with the given ID.
    #[must_use]
    pub fn step(&self, step_id: ApprovalStepId) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Returns the step with the given number.
    #[must_use]
    pub fn step_by_number(&self, step_number: u32) -> Option<&ApprovalStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    /// Returns the lowest-numbered pending step.
    #[must_use]
    pub fn current_step(&self) -> Option<&ApprovalStep> {
        self.steps
            .iter()
            .filter(|s| s.is_pending())
            .min_by_key(|s| s.step_number)
    }

    /// Returns the highest step number.
    #[must_use]
    pub fn last_step_number(&self) -> u32 {
        self.steps.iter().map(|s| s.step_number).max().unwrap_or(0)
    }

    /// Returns true if the case can still take decisions.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}

/// Input supplied by the approver when deciding a step.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    /// Acting user.
    pub actor: UserId,
    /// Remark; required on rejection.
    pub remark: Option<String>,
    /// OTP code entered by the approver.
    pub otp: Option<String>,
    /// Evidence files supplied with the decision.
    pub files: Vec<EvidenceFile>,
    /// Budget account code to post against.
    pub account_code: Option<String>,
    /// Budget item to post against.
    pub budget_item_id: Option<BudgetItemId>,
    /// Linked purchase-order item.
    pub purchase_order_item_id: Option<Uuid>,
    /// Decision time, used for OTP expiry.
    pub at: DateTime<Utc>,
}

impl DecisionContext {
    /// Creates a context for `actor` stamped with the current time.
    #[must_use]
    pub fn new(actor: UserId) -> Self {
        Self {
            actor,
            remark: None,
            otp: None,
            files: Vec::new(),
            account_code: None,
            budget_item_id: None,
            purchase_order_item_id: None,
            at: Utc::now(),
        }
    }

    /// Sets the remark.
    #[must_use]
    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    /// Sets the OTP code.
    #[must_use]
    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.otp = Some(otp.into());
        self
    }

    /// Adds an evidence file.
    #[must_use]
    pub fn with_file(mut self, file: EvidenceFile) -> Self {
        self.files.push(file);
        self
    }

    /// Sets the posting target.
    #[must_use]
    pub fn with_budget_target(
        mut self,
        budget_item_id: BudgetItemId,
        account_code: Option<String>,
    ) -> Self {
        self.budget_item_id = Some(budget_item_id);
        self.account_code = account_code;
        self
    }

    /// Links a purchase-order item.
    #[must_use]
    pub fn with_purchase_order_item(mut self, item_id: Uuid) -> Self {
        self.purchase_order_item_id = Some(item_id);
        self
    }

    /// Overrides the decision time.
    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// What the ledger must do after a decision commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerSignal {
    /// Intermediate approval; nothing to post.
    None,
    /// Final approval; post the document amount.
    Post,
    /// Rejection; reverse any provisional posting.
    Reverse,
}

/// Result of a validated decision, before or after commit.
#[derive(Debug, Clone)]
pub struct DecisionOutcome {
    /// The approval case after the decision.
    pub approval: UserApproval,
    /// The decided step.
    pub step: ApprovalStep,
    /// Follow-up ledger effect.
    pub signal: LedgerSignal,
}
