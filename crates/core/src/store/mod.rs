//! Collaborator interfaces consumed by the core.
//!
//! The core only needs `save`, `load`, and `query` style access to its
//! entities plus OTP delivery and an append-only audit log. Storage
//! engines, pagination wire formats, and transport are not its concern.
//!
//! # Modules
//!
//! - `error` - Collaborator error type
//! - `lock` - Per-entity exclusive locks
//! - `memory` - In-memory reference implementation of every trait

pub mod error;
pub mod lock;
pub mod memory;

pub use error::StoreError;
pub use lock::{LockGuard, LockRegistry};
pub use memory::{InMemoryOtpNotifier, InMemoryStore};

use chrono::Duration;
use procura_shared::types::{
    ApprovalRuleId, ApprovalStepId, ApprovalWorkflowId, BudgetAccountId, BudgetItemDetailId,
    BudgetItemId, DepartmentId, DocumentId, IncreaseBudgetId, PageRequest, PageResponse,
    PostingId, UserApprovalId, UserId,
};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::budget::types::{BudgetAccount, BudgetItem, BudgetItemDetail, IncreaseBudget, Posting};
use crate::workflow::rules::BudgetApprovalRule;
use crate::workflow::types::{ApprovalStatus, ApprovalType, ApprovalWorkflow, UserApproval};

/// Filter for approval case queries.
#[derive(Debug, Clone, Default)]
pub struct ApprovalFilter {
    /// Only cases with this overall status.
    pub status: Option<ApprovalStatus>,
    /// Only cases whose current step is assigned to this user.
    pub awaiting_approver: Option<UserId>,
    /// Only cases for this document kind.
    pub document_type: Option<ApprovalType>,
}

/// Filter for budget account queries.
#[derive(Debug, Clone, Default)]
pub struct AccountFilter {
    /// Only accounts of this department.
    pub department_id: Option<DepartmentId>,
    /// Only accounts of this fiscal year.
    pub fiscal_year: Option<i32>,
    /// Include soft-deleted accounts.
    pub include_deleted: bool,
}

/// Persistence for workflow templates and approval cases.
pub trait ApprovalStore: Send + Sync {
    /// Persists a workflow template.
    fn save_workflow(&self, workflow: ApprovalWorkflow) -> Result<ApprovalWorkflow, StoreError>;
    /// Loads a workflow template.
    fn load_workflow(&self, id: ApprovalWorkflowId)
    -> Result<Option<ApprovalWorkflow>, StoreError>;
    /// Persists an approval case with its steps.
    fn save_approval(&self, approval: UserApproval) -> Result<UserApproval, StoreError>;
    /// Loads an approval case.
    fn load_approval(&self, id: UserApprovalId) -> Result<Option<UserApproval>, StoreError>;
    /// Finds the approval case of a document.
    fn find_approval_by_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<UserApproval>, StoreError>;
    /// Finds the approval case owning a step.
    fn find_approval_by_step(
        &self,
        step_id: ApprovalStepId,
    ) -> Result<Option<UserApproval>, StoreError>;
    /// Deletes an approval case and its steps. Returns false if absent.
    fn delete_approval(&self, id: UserApprovalId) -> Result<bool, StoreError>;
    /// Lists approval cases, oldest first.
    fn query_approvals(
        &self,
        filter: &ApprovalFilter,
        page: &PageRequest,
    ) -> Result<PageResponse<UserApproval>, StoreError>;
}

/// Persistence for ledger entities.
pub trait BudgetStore: Send + Sync {
    /// Persists an account.
    fn save_account(&self, account: BudgetAccount) -> Result<BudgetAccount, StoreError>;
    /// Loads an account.
    fn load_account(&self, id: BudgetAccountId) -> Result<Option<BudgetAccount>, StoreError>;
    /// Lists accounts ordered by code.
    fn query_accounts(
        &self,
        filter: &AccountFilter,
        page: &PageRequest,
    ) -> Result<PageResponse<BudgetAccount>, StoreError>;
    /// Persists an item.
    fn save_item(&self, item: BudgetItem) -> Result<BudgetItem, StoreError>;
    /// Loads an item, live or deleted.
    fn load_item(&self, id: BudgetItemId) -> Result<Option<BudgetItem>, StoreError>;
    /// Lists every item of an account, live or deleted.
    fn items_for_account(&self, account_id: BudgetAccountId)
    -> Result<Vec<BudgetItem>, StoreError>;
    /// Persists an item detail.
    fn save_detail(&self, detail: BudgetItemDetail) -> Result<BudgetItemDetail, StoreError>;
    /// Loads an item detail.
    fn load_detail(&self, id: BudgetItemDetailId)
    -> Result<Option<BudgetItemDetail>, StoreError>;
    /// Lists every detail of an item.
    fn details_for_item(&self, item_id: BudgetItemId)
    -> Result<Vec<BudgetItemDetail>, StoreError>;
    /// Persists an increase.
    fn save_increase(&self, increase: IncreaseBudget) -> Result<IncreaseBudget, StoreError>;
    /// Loads an increase.
    fn load_increase(&self, id: IncreaseBudgetId) -> Result<Option<IncreaseBudget>, StoreError>;
    /// Persists a posting.
    fn save_posting(&self, posting: Posting) -> Result<Posting, StoreError>;
    /// Loads a posting.
    fn load_posting(&self, id: PostingId) -> Result<Option<Posting>, StoreError>;
    /// Lists the postings made for an approval case.
    fn postings_for_approval(&self, approval_id: UserApprovalId)
    -> Result<Vec<Posting>, StoreError>;
}

/// Persistence for budget approval rules.
pub trait RuleStore: Send + Sync {
    /// Persists a rule.
    fn save_rule(&self, rule: BudgetApprovalRule) -> Result<BudgetApprovalRule, StoreError>;
    /// Loads a rule, live or deleted.
    fn load_rule(&self, id: ApprovalRuleId) -> Result<Option<BudgetApprovalRule>, StoreError>;
    /// Lists every rule of a department, live or deleted.
    fn rules_for_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Vec<BudgetApprovalRule>, StoreError>;
    /// Lists live rules, ordered by department then `min_amount`.
    fn query_rules(
        &self,
        department_id: Option<DepartmentId>,
        page: &PageRequest,
    ) -> Result<PageResponse<BudgetApprovalRule>, StoreError>;
}

/// Append-only audit trail.
pub trait AuditLog: Send + Sync {
    /// Appends an event.
    fn append(&self, event: AuditEvent) -> Result<(), StoreError>;
    /// Lists events of one entity in append order.
    fn events_for(&self, entity_id: Uuid) -> Result<Vec<AuditEvent>, StoreError>;
}

/// What the notifier returns after delivering an OTP.
#[derive(Debug, Clone)]
pub struct OtpDispatch {
    /// The delivered code. The core hashes it and discards the plain text.
    pub code: String,
    /// Opaque delivery reference.
    pub code_reference: String,
    /// Validity window.
    pub expires_in: Duration,
}

/// Delivers OTP codes to approvers.
pub trait OtpNotifier: Send + Sync {
    /// Generates and delivers a code for the step.
    fn send_otp(&self, step_id: ApprovalStepId) -> Result<OtpDispatch, StoreError>;
}
