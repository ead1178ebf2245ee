//! Per-document approval state machine.
//!
//! Steps move from `pending` to `approved` or `rejected` exactly once.
//! Approvals must follow ascending step numbers; a rejection may happen
//! at any pending step and closes the whole case.
//!
//! A decision is validated without side effects by [`ApprovalStepEngine::decide`].
//! [`ApprovalStepEngine::begin_decision`] runs the same validation under the
//! step and case locks and hands back a [`PendingDecision`] that is only
//! persisted when committed, so callers can bundle follow-up writes with it.
//!
//! Every write is paired with its audit events. If an append fails the
//! write is undone, so an error always means the stored case is unchanged.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use procura_shared::ApprovalConfig;
use procura_shared::types::{
    ApprovalStepId, ApprovalWorkflowId, DocumentId, PageRequest, PageResponse, UserApprovalId,
    UserId,
};
use serde_json::json;
use tracing::{error, info, warn};

use crate::audit::{AuditAction, AuditEntity, AuditEvent};
use crate::store::{
    ApprovalFilter, ApprovalStore, AuditLog, LockGuard, LockRegistry, OtpNotifier, StoreError,
};
use crate::workflow::error::{Requirement, WorkflowError};
use crate::workflow::otp;
use crate::workflow::types::{
    ApprovalStatus, ApprovalStep, ApprovalWorkflow, Decision, DecisionContext, DecisionOutcome,
    Document, EvidenceFile, IssuedOtp, LedgerSignal, UserApproval,
};

/// Drives approval cases through their steps.
pub struct ApprovalStepEngine {
    store: Arc<dyn ApprovalStore>,
    audit: Arc<dyn AuditLog>,
    notifier: Arc<dyn OtpNotifier>,
    locks: Arc<LockRegistry>,
    config: ApprovalConfig,
}

/// A validated decision holding the step and case locks until committed or dropped.
#[must_use = "a pending decision is discarded unless committed"]
pub struct PendingDecision<'a> {
    engine: &'a ApprovalStepEngine,
    previous: UserApproval,
    outcome: DecisionOutcome,
    decision: Decision,
    actor: UserId,
    _guard: LockGuard<'a>,
}

impl PendingDecision<'_> {
    /// The decision's effect, not yet persisted.
    pub fn outcome(&self) -> &DecisionOutcome {
        &self.outcome
    }

    /// Persists the decided step and case, then releases the locks.
    ///
    /// On error the case is left as it was before the decision.
    pub fn commit(self) -> Result<DecisionOutcome, WorkflowError> {
        let Self {
            engine,
            previous,
            outcome,
            decision,
            actor,
            _guard,
        } = self;

        let step_action = match decision {
            Decision::Approve => AuditAction::Approved,
            Decision::Reject => AuditAction::Rejected,
        };
        let mut events = vec![
            AuditEvent::new(AuditEntity::ApprovalStep, outcome.step.id.into(), step_action)
                .by(actor)
                .at(outcome.step.decided_at.unwrap_or_else(Utc::now))
                .with_detail(json!({
                    "approval_id": outcome.approval.id,
                    "step_number": outcome.step.step_number,
                    "remark": outcome.step.remark,
                })),
        ];
        if outcome.approval.status.is_terminal() {
            let case_action = match outcome.approval.status {
                ApprovalStatus::Rejected => AuditAction::Rejected,
                _ => AuditAction::Approved,
            };
            events.push(
                AuditEvent::new(AuditEntity::UserApproval, outcome.approval.id.into(), case_action)
                    .by(actor)
                    .with_detail(json!({ "document_id": outcome.approval.document.id })),
            );
        }

        engine.save_audited(outcome.approval.clone(), Some(previous), events)?;

        info!(
            approval_id = %outcome.approval.id,
            step_id = %outcome.step.id,
            step_number = outcome.step.step_number,
            status = %outcome.step.status,
            approval_status = %outcome.approval.status,
            "approval step decided"
        );
        Ok(outcome)
    }
}

impl ApprovalStepEngine {
    /// Creates an engine over the given collaborators.
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        audit: Arc<dyn AuditLog>,
        notifier: Arc<dyn OtpNotifier>,
        locks: Arc<LockRegistry>,
        config: ApprovalConfig,
    ) -> Self {
        Self {
            store,
            audit,
            notifier,
            locks,
            config,
        }
    }

    /// Stores a workflow template so cases can be opened by its ID.
    pub fn register_workflow(
        &self,
        workflow: ApprovalWorkflow,
    ) -> Result<ApprovalWorkflow, WorkflowError> {
        if workflow.steps.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(format!(
                "workflow {} has no steps",
                workflow.id
            )));
        }
        let workflow = self.store.save_workflow(workflow)?;
        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow registered");
        Ok(workflow)
    }

    /// Loads a registered workflow template.
    pub fn workflow(&self, id: ApprovalWorkflowId) -> Result<ApprovalWorkflow, WorkflowError> {
        self.store
            .load_workflow(id)?
            .ok_or(WorkflowError::WorkflowNotFound(id))
    }

    /// Builds an unsaved approval case with one pending step per template step.
    pub fn initialize(
        workflow: &ApprovalWorkflow,
        document: Document,
    ) -> Result<UserApproval, WorkflowError> {
        if workflow.steps.is_empty() {
            return Err(WorkflowError::InvalidWorkflow(format!(
                "workflow {} has no steps",
                workflow.id
            )));
        }
        if document.document_type != workflow.document_type {
            return Err(WorkflowError::InvalidWorkflow(format!(
                "workflow {} approves {} documents, got {}",
                workflow.id, workflow.document_type, document.document_type
            )));
        }

        let id = UserApprovalId::new();
        let mut templates: Vec<_> = workflow.steps.iter().collect();
        templates.sort_by_key(|t| t.step_number);
        let steps = templates
            .into_iter()
            .map(|t| {
                let mut step = ApprovalStep::from_template(id, t);
                step.account_code.clone_from(&document.account_code);
                step.budget_item_id = document.budget_item_id;
                step
            })
            .collect();

        let now = Utc::now();
        Ok(UserApproval {
            id,
            document,
            approval_workflow_id: workflow.id,
            status: ApprovalStatus::Pending,
            steps,
            created_at: now,
            updated_at: now,
        })
    }

    /// Persists a freshly initialized case. A document has at most one case.
    pub fn open(&self, approval: UserApproval) -> Result<UserApproval, WorkflowError> {
        let document_id = approval.document.id;
        let _guard = self.locks.lock(document_id)?;

        if self.store.find_approval_by_document(document_id)?.is_some() {
            warn!(document_id = %document_id, "document already has an approval case");
            return Err(WorkflowError::ApprovalAlreadyExists(document_id));
        }

        let created = created_event(&approval);
        self.save_audited(approval.clone(), None, vec![created])?;

        info!(approval_id = %approval.id, document_id = %document_id, "approval case opened");
        Ok(approval)
    }

    /// Loads an approval case.
    pub fn load_approval(&self, id: UserApprovalId) -> Result<UserApproval, WorkflowError> {
        self.store
            .load_approval(id)?
            .ok_or(WorkflowError::ApprovalNotFound(id))
    }

    /// Loads the approval case of a document.
    pub fn approval_for_document(
        &self,
        document_id: DocumentId,
    ) -> Result<UserApproval, WorkflowError> {
        self.store
            .find_approval_by_document(document_id)?
            .ok_or(WorkflowError::DocumentNotFound(document_id))
    }

    /// Lists approval cases.
    pub fn query_approvals(
        &self,
        filter: &ApprovalFilter,
        page: &PageRequest,
    ) -> Result<PageResponse<UserApproval>, WorkflowError> {
        Ok(self.store.query_approvals(filter, page)?)
    }

    /// Issues an OTP for a pending OTP-gated step.
    ///
    /// The notifier is called before the step is locked; the code hash is
    /// stored afterwards only if the step still accepts one.
    pub fn issue_otp(
        &self,
        step_id: ApprovalStepId,
        at: DateTime<Utc>,
    ) -> Result<ApprovalStep, WorkflowError> {
        let approval = self.approval_for_step(step_id)?;
        Self::check_otp_issuable(&approval, step_id, at)?;

        let dispatch = self.notifier.send_otp(step_id)?;

        let _guard = self.locks.lock_many([step_id.into_inner(), approval.id.into_inner()])?;
        let previous = self.approval_for_step(step_id)?;
        Self::check_otp_issuable(&previous, step_id, at)?;

        let mut approval = previous.clone();
        let expires_at = at + dispatch.expires_in;
        let step = step_mut(&mut approval, step_id)?;
        step.otp = Some(IssuedOtp {
            code_hash: otp::hash_code(&dispatch.code),
            code_reference: dispatch.code_reference.clone(),
            issued_at: at,
            expires_at,
            verified_at: None,
        });
        let step = step.clone();
        approval.updated_at = at;

        let issued =
            AuditEvent::new(AuditEntity::ApprovalStep, step_id.into(), AuditAction::OtpIssued)
                .at(at)
                .with_detail(json!({
                    "code_reference": dispatch.code_reference,
                    "expires_at": expires_at,
                }));
        self.save_audited(approval, Some(previous), vec![issued])?;

        info!(step_id = %step_id, expires_at = %expires_at, "otp issued");
        Ok(step)
    }

    /// Attaches an evidence file to a pending step.
    pub fn attach_evidence(
        &self,
        step_id: ApprovalStepId,
        file: EvidenceFile,
        actor: UserId,
    ) -> Result<ApprovalStep, WorkflowError> {
        let approval_id = self.approval_for_step(step_id)?.id;
        let _guard = self.locks.lock_many([step_id.into_inner(), approval_id.into_inner()])?;
        let previous = self.approval_for_step(step_id)?;
        Self::check_open(&previous, step_id)?;

        let mut approval = previous.clone();
        let detail = json!({ "file_id": file.id, "name": file.name });
        let step = step_mut(&mut approval, step_id)?;
        step.files.push(file);
        let step = step.clone();
        approval.updated_at = Utc::now();

        let attached = AuditEvent::new(
            AuditEntity::ApprovalStep,
            step_id.into(),
            AuditAction::EvidenceAttached,
        )
        .by(actor)
        .with_detail(detail);
        self.save_audited(approval, Some(previous), vec![attached])?;

        info!(step_id = %step_id, files = step.files.len(), "evidence attached");
        Ok(step)
    }

    /// Validates a decision against a case snapshot and returns its effect.
    ///
    /// Checks run in order: unknown step, finalized step, closed case,
    /// approver assignment, then for approvals the OTP and evidence
    /// requirements followed by step ordering, and for rejections the remark.
    pub fn decide(
        &self,
        approval: &UserApproval,
        step_id: ApprovalStepId,
        decision: Decision,
        ctx: &DecisionContext,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let step = Self::check_open(approval, step_id)?;

        if let Some(approver_id) = step.approver_id
            && approver_id != ctx.actor
        {
            return Err(WorkflowError::NotAssignedApprover {
                step_id,
                user_id: ctx.actor,
            });
        }

        match decision {
            Decision::Approve => {
                if step.is_otp {
                    otp::verify(step.otp.as_ref(), ctx.otp.as_deref(), ctx.at)
                        .map_err(WorkflowError::PreconditionUnmet)?;
                }
                if step.required_file_upload && step.files.is_empty() && ctx.files.is_empty() {
                    return Err(WorkflowError::PreconditionUnmet(
                        Requirement::EvidenceMissing,
                    ));
                }
                let lowest_pending = approval
                    .steps
                    .iter()
                    .filter(|s| s.is_pending() && s.step_number < step.step_number)
                    .map(|s| s.step_number)
                    .min();
                if let Some(pending_step) = lowest_pending {
                    return Err(WorkflowError::OutOfOrder {
                        step_number: step.step_number,
                        pending_step,
                    });
                }
            }
            Decision::Reject => {
                let has_remark = ctx.remark.as_deref().is_some_and(|r| !r.trim().is_empty());
                if self.config.require_remark_on_reject && !has_remark {
                    return Err(WorkflowError::PreconditionUnmet(Requirement::RemarkMissing));
                }
            }
        }

        let last_step_number = approval.last_step_number();
        let mut next = approval.clone();
        let step = step_mut(&mut next, step_id)?;

        step.status = decision.target_status();
        if let Some(remark) = ctx.remark.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            step.remark = Some(remark.to_string());
        }
        step.files.extend(ctx.files.iter().cloned());
        if decision == Decision::Approve
            && let Some(issued) = step.otp.as_mut()
        {
            issued.verified_at = Some(ctx.at);
        }
        if ctx.account_code.is_some() {
            step.account_code.clone_from(&ctx.account_code);
        }
        if ctx.budget_item_id.is_some() {
            step.budget_item_id = ctx.budget_item_id;
        }
        if ctx.purchase_order_item_id.is_some() {
            step.purchase_order_item_id = ctx.purchase_order_item_id;
        }
        step.decided_by = Some(ctx.actor);
        step.decided_at = Some(ctx.at);
        let step = step.clone();

        let signal = match decision {
            Decision::Approve if step.step_number == last_step_number => {
                next.status = ApprovalStatus::Approved;
                LedgerSignal::Post
            }
            Decision::Approve => LedgerSignal::None,
            Decision::Reject => {
                next.status = ApprovalStatus::Rejected;
                LedgerSignal::Reverse
            }
        };
        next.updated_at = ctx.at;

        Ok(DecisionOutcome {
            approval: next,
            step,
            signal,
        })
    }

    /// Locks the step and its case, reloads them, and validates the decision.
    ///
    /// Nothing is persisted until [`PendingDecision::commit`] is called.
    pub fn begin_decision(
        &self,
        step_id: ApprovalStepId,
        decision: Decision,
        ctx: &DecisionContext,
    ) -> Result<PendingDecision<'_>, WorkflowError> {
        let approval_id = self.approval_for_step(step_id)?.id;
        let guard = self.locks.lock_many([step_id.into_inner(), approval_id.into_inner()])?;

        let approval = self.approval_for_step(step_id)?;
        let outcome = self.decide(&approval, step_id, decision, ctx).inspect_err(|err| {
            warn!(
                step_id = %step_id,
                actor = %ctx.actor,
                decision = ?decision,
                error = %err,
                "approval decision refused"
            );
        })?;

        Ok(PendingDecision {
            engine: self,
            previous: approval,
            outcome,
            decision,
            actor: ctx.actor,
            _guard: guard,
        })
    }

    /// Decides a step and persists the result.
    pub fn submit_decision(
        &self,
        step_id: ApprovalStepId,
        decision: Decision,
        ctx: &DecisionContext,
    ) -> Result<ApprovalStep, WorkflowError> {
        let outcome = self.begin_decision(step_id, decision, ctx)?.commit()?;
        Ok(outcome.step)
    }

    /// Deletes a document's case and its steps.
    ///
    /// `before_delete` runs under the case lock with the case as stored;
    /// if it fails nothing is deleted.
    pub fn withdraw<F>(
        &self,
        document_id: DocumentId,
        actor: UserId,
        before_delete: F,
    ) -> Result<UserApproval, WorkflowError>
    where
        F: FnOnce(&UserApproval) -> Result<(), WorkflowError>,
    {
        let approval_id = self.approval_for_document(document_id)?.id;
        let _guard = self.locks.lock_many([document_id.into_inner(), approval_id.into_inner()])?;
        let approval = self.approval_for_document(document_id)?;

        before_delete(&approval)?;

        self.store.delete_approval(approval.id)?;
        if let Err(err) = self.append_all(vec![deleted_event(&approval, actor)]) {
            self.rollback(None, Some(approval));
            return Err(err.into());
        }

        info!(approval_id = %approval.id, document_id = %document_id, "approval case withdrawn");
        Ok(approval)
    }

    /// Swaps a document's case for a freshly initialized one in one unit.
    ///
    /// The document stays locked from the removal of the old case until
    /// the new one is stored. If any write fails, the old case is put back.
    pub fn replace<F>(
        &self,
        fresh: UserApproval,
        actor: UserId,
        before_delete: F,
    ) -> Result<UserApproval, WorkflowError>
    where
        F: FnOnce(&UserApproval) -> Result<(), WorkflowError>,
    {
        let document_id = fresh.document.id;
        let approval_id = self.approval_for_document(document_id)?.id;
        let _guard = self.locks.lock_many([
            document_id.into_inner(),
            approval_id.into_inner(),
            fresh.id.into_inner(),
        ])?;
        let previous = self.approval_for_document(document_id)?;

        before_delete(&previous)?;

        self.store.delete_approval(previous.id)?;
        if let Err(err) = self.store.save_approval(fresh.clone()) {
            self.rollback(None, Some(previous));
            return Err(err.into());
        }
        let events = vec![deleted_event(&previous, actor), created_event(&fresh)];
        if let Err(err) = self.append_all(events) {
            self.rollback(Some(fresh.id), Some(previous));
            return Err(err.into());
        }

        info!(
            document_id = %document_id,
            previous = %previous.id,
            approval_id = %fresh.id,
            "approval case replaced"
        );
        Ok(fresh)
    }

    /// Saves `approval` and appends its audit events as one unit.
    ///
    /// On failure the stored case is reset to `previous`, or removed when
    /// there was none.
    fn save_audited(
        &self,
        approval: UserApproval,
        previous: Option<UserApproval>,
        events: Vec<AuditEvent>,
    ) -> Result<(), WorkflowError> {
        let approval_id = approval.id;
        self.store.save_approval(approval)?;
        if let Err(err) = self.append_all(events) {
            match previous {
                Some(previous) => self.rollback(None, Some(previous)),
                None => self.rollback(Some(approval_id), None),
            }
            return Err(err.into());
        }
        Ok(())
    }

    fn append_all(&self, events: Vec<AuditEvent>) -> Result<(), StoreError> {
        events.into_iter().try_for_each(|event| self.audit.append(event))
    }

    fn rollback(&self, remove: Option<UserApprovalId>, restore: Option<UserApproval>) {
        if let Some(id) = remove
            && let Err(err) = self.store.delete_approval(id)
        {
            error!(approval_id = %id, error = %err, "failed to remove approval case on rollback");
        }
        if let Some(approval) = restore {
            let id = approval.id;
            if let Err(err) = self.store.save_approval(approval) {
                error!(approval_id = %id, error = %err, "failed to restore approval case");
            }
        }
    }

    fn approval_for_step(&self, step_id: ApprovalStepId) -> Result<UserApproval, WorkflowError> {
        self.store
            .find_approval_by_step(step_id)?
            .ok_or(WorkflowError::StepNotFound(step_id))
    }

    fn check_open(
        approval: &UserApproval,
        step_id: ApprovalStepId,
    ) -> Result<&ApprovalStep, WorkflowError> {
        let step = approval
            .step(step_id)
            .ok_or(WorkflowError::StepNotFound(step_id))?;
        if !step.is_pending() {
            return Err(WorkflowError::StepAlreadyFinalized {
                step_id,
                status: step.status,
            });
        }
        if !approval.is_open() {
            return Err(WorkflowError::WorkflowClosed {
                approval_id: approval.id,
                status: approval.status,
            });
        }
        Ok(step)
    }

    fn check_otp_issuable(
        approval: &UserApproval,
        step_id: ApprovalStepId,
        at: DateTime<Utc>,
    ) -> Result<(), WorkflowError> {
        let step = Self::check_open(approval, step_id)?;
        if !step.is_otp {
            return Err(WorkflowError::OtpNotRequired(step_id));
        }
        if step.otp.as_ref().is_some_and(|issued| !issued.is_expired(at)) {
            return Err(WorkflowError::OtpAlreadyIssued(step_id));
        }
        Ok(())
    }
}

fn step_mut(
    approval: &mut UserApproval,
    step_id: ApprovalStepId,
) -> Result<&mut ApprovalStep, WorkflowError> {
    approval
        .steps
        .iter_mut()
        .find(|s| s.id == step_id)
        .ok_or(WorkflowError::StepNotFound(step_id))
}

fn created_event(approval: &UserApproval) -> AuditEvent {
    AuditEvent::new(AuditEntity::UserApproval, approval.id.into(), AuditAction::Created)
        .by(approval.document.submitted_by)
        .with_detail(json!({
            "document_id": approval.document.id,
            "approval_workflow_id": approval.approval_workflow_id,
            "steps": approval.steps.len(),
        }))
}

fn deleted_event(approval: &UserApproval, actor: UserId) -> AuditEvent {
    AuditEvent::new(AuditEntity::UserApproval, approval.id.into(), AuditAction::Deleted)
        .by(actor)
        .with_detail(json!({
            "document_id": approval.document.id,
            "status": approval.status,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryOtpNotifier, InMemoryStore};
    use crate::workflow::types::{ApprovalStepTemplate, ApprovalType};
    use chrono::Duration;
    use procura_shared::types::DepartmentId;
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: ApprovalStepEngine,
        store: Arc<InMemoryStore>,
        notifier: Arc<InMemoryOtpNotifier>,
        approver: UserId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(InMemoryOtpNotifier::default());
        let engine = ApprovalStepEngine::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            Arc::new(LockRegistry::new()),
            ApprovalConfig::default(),
        );
        Fixture {
            engine,
            store,
            notifier,
            approver: UserId::new(),
        }
    }

    fn document() -> Document {
        Document {
            id: DocumentId::new(),
            document_type: ApprovalType::PurchaseRequest,
            department_id: DepartmentId::new(),
            total_amount: dec!(1500),
            budget_item_id: None,
            account_code: None,
            submitted_by: UserId::new(),
        }
    }

    fn workflow(steps: Vec<ApprovalStepTemplate>) -> ApprovalWorkflow {
        ApprovalWorkflow::new("PR approval", ApprovalType::PurchaseRequest, steps).unwrap()
    }

    fn plain_steps(n: u32, approver: UserId) -> Vec<ApprovalStepTemplate> {
        (1..=n)
            .map(|i| {
                ApprovalStepTemplate::new(i, DepartmentId::new(), ApprovalType::PurchaseRequest)
                    .with_approver(approver)
            })
            .collect()
    }

    fn open(f: &Fixture, steps: Vec<ApprovalStepTemplate>) -> UserApproval {
        let approval = ApprovalStepEngine::initialize(&workflow(steps), document()).unwrap();
        f.engine.open(approval).unwrap()
    }

    #[test]
    fn test_initialize_builds_pending_steps_in_order() {
        let approver = UserId::new();
        let mut steps = plain_steps(3, approver);
        steps.reverse();
        let approval = ApprovalStepEngine::initialize(&workflow(steps), document()).unwrap();

        assert_eq!(approval.status, ApprovalStatus::Pending);
        let numbers: Vec<u32> = approval.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(approval.steps.iter().all(ApprovalStep::is_pending));
        assert!(approval.steps.iter().all(|s| s.approval_id == approval.id));
    }

    #[test]
    fn test_initialize_rejects_empty_workflow() {
        let result = ApprovalStepEngine::initialize(&workflow(vec![]), document());
        assert!(matches!(result, Err(WorkflowError::InvalidWorkflow(_))));
    }

    #[test]
    fn test_initialize_rejects_other_document_type() {
        let mut doc = document();
        doc.document_type = ApprovalType::PurchaseOrder;
        let result = ApprovalStepEngine::initialize(&workflow(plain_steps(1, UserId::new())), doc);
        assert!(matches!(result, Err(WorkflowError::InvalidWorkflow(_))));
    }

    #[test]
    fn test_open_twice_for_same_document_fails() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        let again = ApprovalStepEngine::initialize(
            &workflow(plain_steps(1, f.approver)),
            approval.document.clone(),
        )
        .unwrap();
        assert!(matches!(
            f.engine.open(again),
            Err(WorkflowError::ApprovalAlreadyExists(_))
        ));
    }

    #[test]
    fn test_approve_in_order_completes_case() {
        let f = fixture();
        let approval = open(&f, plain_steps(2, f.approver));
        let ctx = DecisionContext::new(f.approver);

        let first = f
            .engine
            .submit_decision(approval.steps[0].id, Decision::Approve, &ctx)
            .unwrap();
        assert_eq!(first.status, ApprovalStatus::Approved);
        assert_eq!(first.decided_by, Some(f.approver));
        assert!(f.engine.load_approval(approval.id).unwrap().is_open());

        let pending = f
            .engine
            .begin_decision(approval.steps[1].id, Decision::Approve, &ctx)
            .unwrap();
        assert_eq!(pending.outcome().signal, LedgerSignal::Post);
        let outcome = pending.commit().unwrap();
        assert_eq!(outcome.approval.status, ApprovalStatus::Approved);
        assert_eq!(
            f.engine.load_approval(approval.id).unwrap().status,
            ApprovalStatus::Approved
        );
    }

    #[test]
    fn test_second_decision_is_refused() {
        let f = fixture();
        let approval = open(&f, plain_steps(2, f.approver));
        let step_id = approval.steps[0].id;
        let ctx = DecisionContext::new(f.approver);

        f.engine.submit_decision(step_id, Decision::Approve, &ctx).unwrap();
        let err = f
            .engine
            .submit_decision(step_id, Decision::Approve, &ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::StepAlreadyFinalized {
                status: ApprovalStatus::Approved,
                ..
            }
        ));
    }

    #[test]
    fn test_out_of_order_approval_is_refused() {
        let f = fixture();
        let approval = open(&f, plain_steps(3, f.approver));
        let ctx = DecisionContext::new(f.approver);

        let err = f
            .engine
            .submit_decision(approval.steps[2].id, Decision::Approve, &ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::OutOfOrder {
                step_number: 3,
                pending_step: 1
            }
        ));
    }

    #[test]
    fn test_reject_any_step_closes_case() {
        let f = fixture();
        let approval = open(&f, plain_steps(3, f.approver));
        let ctx = DecisionContext::new(f.approver).with_remark("over budget");

        let pending = f
            .engine
            .begin_decision(approval.steps[1].id, Decision::Reject, &ctx)
            .unwrap();
        assert_eq!(pending.outcome().signal, LedgerSignal::Reverse);
        pending.commit().unwrap();

        let stored = f.engine.load_approval(approval.id).unwrap();
        assert_eq!(stored.status, ApprovalStatus::Rejected);
        assert_eq!(stored.steps[1].remark.as_deref(), Some("over budget"));

        let err = f
            .engine
            .submit_decision(
                approval.steps[0].id,
                Decision::Approve,
                &DecisionContext::new(f.approver),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::WorkflowClosed { .. }));
    }

    #[test]
    fn test_reject_requires_remark() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        let ctx = DecisionContext::new(f.approver).with_remark("   ");

        let err = f
            .engine
            .submit_decision(approval.steps[0].id, Decision::Reject, &ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::PreconditionUnmet(Requirement::RemarkMissing)
        ));
    }

    #[test]
    fn test_only_assigned_approver_decides() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        let stranger = UserId::new();

        let err = f
            .engine
            .submit_decision(
                approval.steps[0].id,
                Decision::Approve,
                &DecisionContext::new(stranger),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAssignedApprover { .. }));
    }

    #[test]
    fn test_unknown_step() {
        let f = fixture();
        let err = f
            .engine
            .submit_decision(
                ApprovalStepId::new(),
                Decision::Approve,
                &DecisionContext::new(f.approver),
            )
            .unwrap_err();
        assert!(matches!(err, WorkflowError::StepNotFound(_)));
    }

    #[test]
    fn test_evidence_gates_approval() {
        let f = fixture();
        let steps = vec![
            ApprovalStepTemplate::new(1, DepartmentId::new(), ApprovalType::PurchaseRequest)
                .with_approver(f.approver)
                .with_file_upload(),
        ];
        let approval = open(&f, steps);
        let step_id = approval.steps[0].id;
        let ctx = DecisionContext::new(f.approver);

        let err = f
            .engine
            .submit_decision(step_id, Decision::Approve, &ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::PreconditionUnmet(Requirement::EvidenceMissing)
        ));

        f.engine
            .attach_evidence(step_id, EvidenceFile::new("quote.pdf"), f.approver)
            .unwrap();
        let step = f.engine.submit_decision(step_id, Decision::Approve, &ctx).unwrap();
        assert_eq!(step.files.len(), 1);
    }

    #[test]
    fn test_otp_gates_approval() {
        let f = fixture();
        let steps = vec![
            ApprovalStepTemplate::new(1, DepartmentId::new(), ApprovalType::PurchaseRequest)
                .with_approver(f.approver)
                .with_otp(),
        ];
        let approval = open(&f, steps);
        let step_id = approval.steps[0].id;

        let err = f
            .engine
            .submit_decision(
                step_id,
                Decision::Approve,
                &DecisionContext::new(f.approver).with_otp("123456"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::PreconditionUnmet(Requirement::OtpNotIssued)
        ));

        let issued = f.engine.issue_otp(step_id, Utc::now()).unwrap();
        let stored_hash = issued.otp.as_ref().map(|o| o.code_hash.clone()).unwrap();
        let code = f.notifier.last_code(step_id).unwrap();
        assert_ne!(stored_hash, code);
        assert!(matches!(
            f.engine.issue_otp(step_id, Utc::now()),
            Err(WorkflowError::OtpAlreadyIssued(_))
        ));

        let wrong = if code == "000000" { "111111" } else { "000000" };
        let err = f
            .engine
            .submit_decision(
                step_id,
                Decision::Approve,
                &DecisionContext::new(f.approver).with_otp(wrong),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::PreconditionUnmet(Requirement::OtpMismatch)
        ));

        let step = f
            .engine
            .submit_decision(
                step_id,
                Decision::Approve,
                &DecisionContext::new(f.approver).with_otp(code),
            )
            .unwrap();
        assert!(step.otp.and_then(|o| o.verified_at).is_some());
    }

    #[test]
    fn test_expired_otp_is_refused_and_can_be_reissued() {
        let f = fixture();
        let steps = vec![
            ApprovalStepTemplate::new(1, DepartmentId::new(), ApprovalType::PurchaseRequest)
                .with_approver(f.approver)
                .with_otp(),
        ];
        let approval = open(&f, steps);
        let step_id = approval.steps[0].id;
        let issued_at = Utc::now() - Duration::minutes(10);

        f.engine.issue_otp(step_id, issued_at).unwrap();
        let code = f.notifier.last_code(step_id).unwrap();
        let err = f
            .engine
            .submit_decision(
                step_id,
                Decision::Approve,
                &DecisionContext::new(f.approver).with_otp(code),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::PreconditionUnmet(Requirement::OtpExpired)
        ));

        f.engine.issue_otp(step_id, Utc::now()).unwrap();
        assert_eq!(f.notifier.sent_count(), 2);
    }

    #[test]
    fn test_otp_on_plain_step_is_refused() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        assert!(matches!(
            f.engine.issue_otp(approval.steps[0].id, Utc::now()),
            Err(WorkflowError::OtpNotRequired(_))
        ));
        assert_eq!(f.notifier.sent_count(), 0);
    }

    #[test]
    fn test_failed_commit_leaves_step_pending() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        let step_id = approval.steps[0].id;

        f.store.set_approval_writes_failing(true);
        let err = f
            .engine
            .submit_decision(step_id, Decision::Approve, &DecisionContext::new(f.approver))
            .unwrap_err();
        assert_eq!(err.kind(), procura_shared::ErrorKind::CollaboratorUnavailable);

        f.store.set_approval_writes_failing(false);
        let stored = f.engine.load_approval(approval.id).unwrap();
        assert!(stored.steps[0].is_pending());
    }

    #[test]
    fn test_dropped_pending_decision_persists_nothing() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        let step_id = approval.steps[0].id;

        let pending = f
            .engine
            .begin_decision(step_id, Decision::Approve, &DecisionContext::new(f.approver))
            .unwrap();
        drop(pending);

        assert!(f.engine.load_approval(approval.id).unwrap().steps[0].is_pending());
        f.engine
            .submit_decision(step_id, Decision::Approve, &DecisionContext::new(f.approver))
            .unwrap();
    }

    #[test]
    fn test_decisions_are_audited() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        let step_id = approval.steps[0].id;
        f.engine
            .submit_decision(step_id, Decision::Approve, &DecisionContext::new(f.approver))
            .unwrap();

        let step_events = f.store.events_for(step_id.into()).unwrap();
        assert_eq!(step_events.len(), 1);
        assert_eq!(step_events[0].action, AuditAction::Approved);
        assert_eq!(step_events[0].actor, Some(f.approver));

        let case_actions: Vec<AuditAction> = f
            .store
            .events_for(approval.id.into())
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(case_actions, vec![AuditAction::Created, AuditAction::Approved]);
    }

    #[test]
    fn test_withdraw_deletes_case() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        let removed = f
            .engine
            .withdraw(approval.document.id, approval.document.submitted_by, |_| Ok(()))
            .unwrap();
        assert_eq!(removed.id, approval.id);
        assert!(matches!(
            f.engine.load_approval(approval.id),
            Err(WorkflowError::ApprovalNotFound(_))
        ));
        assert!(matches!(
            f.engine.submit_decision(
                approval.steps[0].id,
                Decision::Approve,
                &DecisionContext::new(f.approver),
            ),
            Err(WorkflowError::StepNotFound(_))
        ));
    }

    #[test]
    fn test_failed_audit_on_commit_restores_case() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));
        let step_id = approval.steps[0].id;

        f.store
            .set_audit_failing(Some((AuditEntity::UserApproval, AuditAction::Approved)));
        let err = f
            .engine
            .submit_decision(step_id, Decision::Approve, &DecisionContext::new(f.approver))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Store(StoreError::Unavailable(_))));
        f.store.set_audit_failing(None);

        let stored = f.engine.load_approval(approval.id).unwrap();
        assert_eq!(stored, approval);
        f.engine
            .submit_decision(step_id, Decision::Approve, &DecisionContext::new(f.approver))
            .unwrap();
    }

    #[test]
    fn test_failed_audit_on_open_leaves_no_case() {
        let f = fixture();
        let approval =
            ApprovalStepEngine::initialize(&workflow(plain_steps(2, f.approver)), document())
                .unwrap();
        let document_id = approval.document.id;

        f.store
            .set_audit_failing(Some((AuditEntity::UserApproval, AuditAction::Created)));
        assert!(f.engine.open(approval.clone()).is_err());
        f.store.set_audit_failing(None);

        assert!(matches!(
            f.engine.approval_for_document(document_id),
            Err(WorkflowError::DocumentNotFound(_))
        ));
        assert!(matches!(
            f.engine.submit_decision(
                approval.steps[0].id,
                Decision::Approve,
                &DecisionContext::new(f.approver)
            ),
            Err(WorkflowError::StepNotFound(_))
        ));
        f.engine.open(approval).unwrap();
    }

    #[test]
    fn test_failed_audit_on_withdraw_keeps_case() {
        let f = fixture();
        let approval = open(&f, plain_steps(1, f.approver));

        f.store
            .set_audit_failing(Some((AuditEntity::UserApproval, AuditAction::Deleted)));
        let result = f.engine.withdraw(approval.document.id, f.approver, |_| Ok(()));
        assert!(result.is_err());
        f.store.set_audit_failing(None);

        assert_eq!(f.engine.load_approval(approval.id).unwrap(), approval);
    }

    #[test]
    fn test_replace_swaps_case_for_document() {
        let f = fixture();
        let approval = open(&f, plain_steps(2, f.approver));
        let mut fresh =
            ApprovalStepEngine::initialize(&workflow(plain_steps(2, f.approver)), document())
                .unwrap();
        fresh.document = approval.document.clone();

        let replaced = f.engine.replace(fresh.clone(), f.approver, |_| Ok(())).unwrap();
        assert_eq!(replaced.id, fresh.id);
        assert_eq!(f.engine.approval_for_document(approval.document.id).unwrap().id, fresh.id);
        assert!(matches!(
            f.engine.load_approval(approval.id),
            Err(WorkflowError::ApprovalNotFound(_))
        ));
    }

    #[test]
    fn test_replace_restores_old_case_when_save_fails() {
        let f = fixture();
        let approval = open(&f, plain_steps(2, f.approver));
        let mut fresh =
            ApprovalStepEngine::initialize(&workflow(plain_steps(2, f.approver)), document())
                .unwrap();
        fresh.document = approval.document.clone();

        f.store.fail_next_approval_save();
        let err = f.engine.replace(fresh.clone(), f.approver, |_| Ok(())).unwrap_err();
        assert!(matches!(err, WorkflowError::Store(StoreError::Unavailable(_))));

        let found = f.engine.approval_for_document(approval.document.id).unwrap();
        assert_eq!(found, approval);
        assert!(matches!(
            f.engine.load_approval(fresh.id),
            Err(WorkflowError::ApprovalNotFound(_))
        ));
    }

    #[test]
    fn test_registered_workflow_round_trips() {
        let f = fixture();
        let registered = f
            .engine
            .register_workflow(workflow(plain_steps(3, f.approver)))
            .unwrap();
        assert_eq!(f.engine.workflow(registered.id).unwrap(), registered);

        let unknown = ApprovalWorkflowId::new();
        assert!(matches!(
            f.engine.workflow(unknown),
            Err(WorkflowError::WorkflowNotFound(id)) if id == unknown
        ));
    }
}
