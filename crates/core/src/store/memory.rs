//! In-memory implementation of the collaborator traits.
//!
//! Backs the test suites and embedded use. Write failures can be switched
//! on to exercise rollback paths.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::Duration;
use dashmap::DashMap;
use procura_shared::ApprovalConfig;
use procura_shared::types::{
    ApprovalRuleId, ApprovalStepId, ApprovalWorkflowId, BudgetAccountId, BudgetItemDetailId,
    BudgetItemId, DepartmentId, DocumentId, IncreaseBudgetId, PageRequest, PageResponse,
    PostingId, UserApprovalId,
};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntity, AuditEvent};
use crate::budget::types::{BudgetAccount, BudgetItem, BudgetItemDetail, IncreaseBudget, Posting};
use crate::store::{
    AccountFilter, ApprovalFilter, ApprovalStore, AuditLog, BudgetStore, OtpDispatch,
    OtpNotifier, RuleStore, StoreError,
};
use crate::workflow::otp::generate_code;
use crate::workflow::rules::BudgetApprovalRule;
use crate::workflow::types::{ApprovalWorkflow, UserApproval};

/// Store holding every entity in concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    workflows: DashMap<ApprovalWorkflowId, ApprovalWorkflow>,
    approvals: DashMap<UserApprovalId, UserApproval>,
    steps: DashMap<ApprovalStepId, UserApprovalId>,
    accounts: DashMap<BudgetAccountId, BudgetAccount>,
    items: DashMap<BudgetItemId, BudgetItem>,
    details: DashMap<BudgetItemDetailId, BudgetItemDetail>,
    increases: DashMap<IncreaseBudgetId, IncreaseBudget>,
    postings: DashMap<PostingId, Posting>,
    rules: DashMap<ApprovalRuleId, BudgetApprovalRule>,
    audit: RwLock<Vec<AuditEvent>>,
    approval_writes_failing: AtomicBool,
    next_approval_save_failing: AtomicBool,
    budget_writes_failing: AtomicBool,
    failing_audit: RwLock<Option<(AuditEntity, AuditAction)>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every approval write fail with [`StoreError::Unavailable`].
    pub fn set_approval_writes_failing(&self, failing: bool) {
        self.approval_writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Makes the next `save_approval` call fail, then recovers.
    pub fn fail_next_approval_save(&self) {
        self.next_approval_save_failing.store(true, Ordering::SeqCst);
    }

    /// Makes appends of one kind of audit event fail. `None` clears it.
    pub fn set_audit_failing(&self, event: Option<(AuditEntity, AuditAction)>) {
        *self.failing_audit.write().unwrap_or_else(PoisonError::into_inner) = event;
    }

    /// Makes every ledger write fail with [`StoreError::Unavailable`].
    pub fn set_budget_writes_failing(&self, failing: bool) {
        self.budget_writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Returns every audit event in append order.
    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_approval_write(&self) -> Result<(), StoreError> {
        if self.approval_writes_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("approval store offline".to_string()));
        }
        Ok(())
    }

    fn check_budget_write(&self) -> Result<(), StoreError> {
        if self.budget_writes_failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("budget store offline".to_string()));
        }
        Ok(())
    }
}

impl ApprovalStore for InMemoryStore {
    fn save_workflow(&self, workflow: ApprovalWorkflow) -> Result<ApprovalWorkflow, StoreError> {
        self.check_approval_write()?;
        self.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    fn load_workflow(
        &self,
        id: ApprovalWorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, StoreError> {
        Ok(self.workflows.get(&id).map(|w| w.value().clone()))
    }

    fn save_approval(&self, approval: UserApproval) -> Result<UserApproval, StoreError> {
        self.check_approval_write()?;
        if self.next_approval_save_failing.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("approval store offline".to_string()));
        }
        for step in &approval.steps {
            self.steps.insert(step.id, approval.id);
        }
        self.approvals.insert(approval.id, approval.clone());
        Ok(approval)
    }

    fn load_approval(&self, id: UserApprovalId) -> Result<Option<UserApproval>, StoreError> {
        Ok(self.approvals.get(&id).map(|a| a.value().clone()))
    }

    fn find_approval_by_document(
        &self,
        document_id: DocumentId,
    ) -> Result<Option<UserApproval>, StoreError> {
        Ok(self
            .approvals
            .iter()
            .find(|a| a.document.id == document_id)
            .map(|a| a.value().clone()))
    }

    fn find_approval_by_step(
        &self,
        step_id: ApprovalStepId,
    ) -> Result<Option<UserApproval>, StoreError> {
        let Some(approval_id) = self.steps.get(&step_id).map(|id| *id.value()) else {
            return Ok(None);
        };
        self.load_approval(approval_id)
    }

    fn delete_approval(&self, id: UserApprovalId) -> Result<bool, StoreError> {
        self.check_approval_write()?;
        let Some((_, approval)) = self.approvals.remove(&id) else {
            return Ok(false);
        };
        for step in &approval.steps {
            self.steps.remove(&step.id);
        }
        Ok(true)
    }

    fn query_approvals(
        &self,
        filter: &ApprovalFilter,
        page: &PageRequest,
    ) -> Result<PageResponse<UserApproval>, StoreError> {
        let mut matched: Vec<UserApproval> = self
            .approvals
            .iter()
            .filter(|a| filter.status.is_none_or(|s| a.status == s))
            .filter(|a| filter.document_type.is_none_or(|t| a.document.document_type == t))
            .filter(|a| {
                filter.awaiting_approver.is_none_or(|user| {
                    a.is_open()
                        && a.current_step()
                            .is_some_and(|step| step.approver_id == Some(user))
                })
            })
            .map(|a| a.value().clone())
            .collect();
        matched.sort_by_key(|a| (a.created_at, a.id));
        Ok(PageResponse::paginate(&matched, page))
    }
}

impl BudgetStore for InMemoryStore {
    fn save_account(&self, account: BudgetAccount) -> Result<BudgetAccount, StoreError> {
        self.check_budget_write()?;
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    fn load_account(&self, id: BudgetAccountId) -> Result<Option<BudgetAccount>, StoreError> {
        Ok(self.accounts.get(&id).map(|a| a.value().clone()))
    }

    fn query_accounts(
        &self,
        filter: &AccountFilter,
        page: &PageRequest,
    ) -> Result<PageResponse<BudgetAccount>, StoreError> {
        let mut matched: Vec<BudgetAccount> = self
            .accounts
            .iter()
            .filter(|a| filter.include_deleted || a.status.is_active())
            .filter(|a| filter.department_id.is_none_or(|d| a.department_id == d))
            .filter(|a| filter.fiscal_year.is_none_or(|y| a.fiscal_year == y))
            .map(|a| a.value().clone())
            .collect();
        matched.sort_by(|a, b| a.code.cmp(&b.code).then(a.id.cmp(&b.id)));
        Ok(PageResponse::paginate(&matched, page))
    }

    fn save_item(&self, item: BudgetItem) -> Result<BudgetItem, StoreError> {
        self.check_budget_write()?;
        self.items.insert(item.id, item.clone());
        Ok(item)
    }

    fn load_item(&self, id: BudgetItemId) -> Result<Option<BudgetItem>, StoreError> {
        Ok(self.items.get(&id).map(|i| i.value().clone()))
    }

    fn items_for_account(
        &self,
        account_id: BudgetAccountId,
    ) -> Result<Vec<BudgetItem>, StoreError> {
        let mut items: Vec<BudgetItem> = self
            .items
            .iter()
            .filter(|i| i.budget_account_id == account_id)
            .map(|i| i.value().clone())
            .collect();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }

    fn save_detail(&self, detail: BudgetItemDetail) -> Result<BudgetItemDetail, StoreError> {
        self.check_budget_write()?;
        self.details.insert(detail.id, detail.clone());
        Ok(detail)
    }

    fn load_detail(
        &self,
        id: BudgetItemDetailId,
    ) -> Result<Option<BudgetItemDetail>, StoreError> {
        Ok(self.details.get(&id).map(|d| d.value().clone()))
    }

    fn details_for_item(
        &self,
        item_id: BudgetItemId,
    ) -> Result<Vec<BudgetItemDetail>, StoreError> {
        let mut details: Vec<BudgetItemDetail> = self
            .details
            .iter()
            .filter(|d| d.budget_item_id == item_id)
            .map(|d| d.value().clone())
            .collect();
        details.sort_by_key(|d| d.id);
        Ok(details)
    }

    fn save_increase(&self, increase: IncreaseBudget) -> Result<IncreaseBudget, StoreError> {
        self.check_budget_write()?;
        self.increases.insert(increase.id, increase.clone());
        Ok(increase)
    }

    fn load_increase(&self, id: IncreaseBudgetId) -> Result<Option<IncreaseBudget>, StoreError> {
        Ok(self.increases.get(&id).map(|i| i.value().clone()))
    }

    fn save_posting(&self, posting: Posting) -> Result<Posting, StoreError> {
        self.check_budget_write()?;
        self.postings.insert(posting.id, posting.clone());
        Ok(posting)
    }

    fn load_posting(&self, id: PostingId) -> Result<Option<Posting>, StoreError> {
        Ok(self.postings.get(&id).map(|p| p.value().clone()))
    }

    fn postings_for_approval(
        &self,
        approval_id: UserApprovalId,
    ) -> Result<Vec<Posting>, StoreError> {
        let mut postings: Vec<Posting> = self
            .postings
            .iter()
            .filter(|p| p.approval_id == approval_id)
            .map(|p| p.value().clone())
            .collect();
        postings.sort_by_key(|p| p.id);
        Ok(postings)
    }
}

impl RuleStore for InMemoryStore {
    fn save_rule(&self, rule: BudgetApprovalRule) -> Result<BudgetApprovalRule, StoreError> {
        self.check_approval_write()?;
        self.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    fn load_rule(&self, id: ApprovalRuleId) -> Result<Option<BudgetApprovalRule>, StoreError> {
        Ok(self.rules.get(&id).map(|r| r.value().clone()))
    }

    fn rules_for_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Vec<BudgetApprovalRule>, StoreError> {
        let mut rules: Vec<BudgetApprovalRule> = self
            .rules
            .iter()
            .filter(|r| r.department_id == department_id)
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by_key(|r| (r.min_amount, r.id));
        Ok(rules)
    }

    fn query_rules(
        &self,
        department_id: Option<DepartmentId>,
        page: &PageRequest,
    ) -> Result<PageResponse<BudgetApprovalRule>, StoreError> {
        let mut matched: Vec<BudgetApprovalRule> = self
            .rules
            .iter()
            .filter(|r| r.status.is_active())
            .filter(|r| department_id.is_none_or(|d| r.department_id == d))
            .map(|r| r.value().clone())
            .collect();
        matched.sort_by_key(|r| (r.department_id, r.min_amount, r.id));
        Ok(PageResponse::paginate(&matched, page))
    }
}

impl AuditLog for InMemoryStore {
    fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        let failing = *self
            .failing_audit
            .read()
            .map_err(|_| StoreError::Unavailable("audit log poisoned".to_string()))?;
        if failing == Some((event.entity, event.action)) {
            return Err(StoreError::Unavailable("audit log offline".to_string()));
        }
        self.audit
            .write()
            .map_err(|_| StoreError::Unavailable("audit log poisoned".to_string()))?
            .push(event);
        Ok(())
    }

    fn events_for(&self, entity_id: Uuid) -> Result<Vec<AuditEvent>, StoreError> {
        let events = self
            .audit
            .read()
            .map_err(|_| StoreError::Unavailable("audit log poisoned".to_string()))?;
        Ok(events
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

/// Notifier that generates codes locally and remembers the last one per step.
#[derive(Debug)]
pub struct InMemoryOtpNotifier {
    config: ApprovalConfig,
    sent: DashMap<ApprovalStepId, String>,
    sequence: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryOtpNotifier {
    /// Creates a notifier using the configured code length and lifetime.
    #[must_use]
    pub fn new(config: ApprovalConfig) -> Self {
        Self {
            config,
            sent: DashMap::new(),
            sequence: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Returns the last code delivered for a step.
    pub fn last_code(&self, step_id: ApprovalStepId) -> Option<String> {
        self.sent.get(&step_id).map(|c| c.value().clone())
    }

    /// Number of codes delivered so far.
    pub fn sent_count(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Makes every delivery fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Default for InMemoryOtpNotifier {
    fn default() -> Self {
        Self::new(ApprovalConfig::default())
    }
}

impl OtpNotifier for InMemoryOtpNotifier {
    fn send_otp(&self, step_id: ApprovalStepId) -> Result<OtpDispatch, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("otp delivery failed".to_string()));
        }

        let ttl = i64::try_from(self.config.otp_ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| StoreError::Unavailable("otp lifetime out of range".to_string()))?;

        let code = generate_code(self.config.otp_length);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.insert(step_id, code.clone());

        Ok(OtpDispatch {
            code,
            code_reference: format!("otp-{sequence:06}"),
            expires_in: ttl,
        })
    }
}
