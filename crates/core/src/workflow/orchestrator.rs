//! Ties documents to approval cases and the budget ledger.
//!
//! A decision and its ledger effect form one unit: the posting (or
//! reversal) is written while the step is still locked and uncommitted.
//! If the ledger refuses, the step stays pending. If the step cannot be
//! committed afterwards, the ledger effect is compensated.

use std::sync::Arc;

use procura_shared::ApprovalConfig;
use procura_shared::types::{
    ApprovalStepId, ApprovalWorkflowId, DocumentId, UserApprovalId, UserId,
};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::budget::{BudgetError, BudgetLedger, Posting};
use crate::store::{ApprovalStore, AuditLog, BudgetStore, LockRegistry, OtpNotifier, RuleStore};
use crate::workflow::engine::ApprovalStepEngine;
use crate::workflow::error::WorkflowError;
use crate::workflow::rules::ApprovalRuleResolver;
use crate::workflow::types::{
    ApprovalStatus, ApprovalWorkflow, Decision, DecisionContext, DecisionOutcome, Document,
    LedgerSignal, UserApproval,
};

/// Entry point for submitting documents and deciding their steps.
pub struct DocumentApprovalOrchestrator {
    engine: ApprovalStepEngine,
    resolver: ApprovalRuleResolver,
    ledger: BudgetLedger,
}

impl DocumentApprovalOrchestrator {
    /// Creates an orchestrator from its components.
    pub fn new(
        engine: ApprovalStepEngine,
        resolver: ApprovalRuleResolver,
        ledger: BudgetLedger,
    ) -> Self {
        Self {
            engine,
            resolver,
            ledger,
        }
    }

    /// Wires every component to one store and a shared lock registry.
    pub fn with_store<S>(
        store: Arc<S>,
        notifier: Arc<dyn OtpNotifier>,
        config: ApprovalConfig,
    ) -> Self
    where
        S: ApprovalStore + BudgetStore + RuleStore + AuditLog + 'static,
    {
        let locks = Arc::new(LockRegistry::new());
        let engine = ApprovalStepEngine::new(
            store.clone(),
            store.clone(),
            notifier,
            locks.clone(),
            config,
        );
        let resolver = ApprovalRuleResolver::new(store.clone(), store.clone(), locks.clone());
        let ledger = BudgetLedger::new(store.clone(), store, locks);
        Self::new(engine, resolver, ledger)
    }

    /// The step engine.
    pub fn engine(&self) -> &ApprovalStepEngine {
        &self.engine
    }

    /// The rule resolver.
    pub fn resolver(&self) -> &ApprovalRuleResolver {
        &self.resolver
    }

    /// The budget ledger.
    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    /// Opens an approval case for a document.
    ///
    /// Amount-gated steps get their approver from the step department's
    /// bands. Nothing is persisted if any approver cannot be resolved.
    pub fn submit(
        &self,
        document: Document,
        workflow: &ApprovalWorkflow,
    ) -> Result<UserApproval, WorkflowError> {
        let approval = self.prepare(document, workflow)?;
        self.engine.open(approval)
    }

    /// Opens an approval case from a registered workflow template.
    pub fn submit_registered(
        &self,
        document: Document,
        workflow_id: ApprovalWorkflowId,
    ) -> Result<UserApproval, WorkflowError> {
        let workflow = self.engine.workflow(workflow_id)?;
        self.submit(document, &workflow)
    }

    /// Decides a step, applying the ledger effect in the same unit of work.
    pub fn decide(
        &self,
        step_id: ApprovalStepId,
        decision: Decision,
        ctx: &DecisionContext,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let pending = self.engine.begin_decision(step_id, decision, ctx)?;

        let posted = self.on_step_approved(pending.outcome(), ctx.actor).inspect_err(|err| {
            warn!(step_id = %step_id, error = %err, "posting failed, step left pending");
        })?;
        let reversed = self.on_step_rejected(pending.outcome(), ctx.actor).inspect_err(|err| {
            warn!(step_id = %step_id, error = %err, "reversal failed, step left pending");
        })?;

        let approval_id = pending.outcome().approval.id;
        match pending.commit() {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(
                    step_id = %step_id,
                    error = %err,
                    "commit failed, compensating ledger effect"
                );
                self.compensate(approval_id, posted.as_ref(), &reversed, ctx.actor);
                Err(err)
            }
        }
    }

    /// Posts the document amount when the final step is approved.
    ///
    /// Returns `None` when the decision does not close the case or the
    /// document is not charged to a budget item.
    pub fn on_step_approved(
        &self,
        outcome: &DecisionOutcome,
        actor: UserId,
    ) -> Result<Option<Posting>, WorkflowError> {
        if outcome.signal != LedgerSignal::Post {
            return Ok(None);
        }

        let document = &outcome.approval.document;
        let Some(item_id) = outcome.step.budget_item_id.or(document.budget_item_id) else {
            return Ok(None);
        };
        if document.total_amount.is_zero() {
            return Ok(None);
        }
        let account_code = outcome
            .step
            .account_code
            .as_deref()
            .or(document.account_code.as_deref());

        let posting = self.ledger.post_for_approval(
            outcome.approval.id,
            item_id,
            document.total_amount,
            account_code,
            actor,
        )?;
        Ok(Some(posting))
    }

    /// Reverses every active posting of a case being rejected.
    pub fn on_step_rejected(
        &self,
        outcome: &DecisionOutcome,
        actor: UserId,
    ) -> Result<Vec<Posting>, WorkflowError> {
        if outcome.signal != LedgerSignal::Reverse {
            return Ok(Vec::new());
        }
        Ok(self.ledger.reverse_postings_for(outcome.approval.id, actor)?)
    }

    /// Deletes a document's case, reversing its postings first.
    pub fn withdraw(
        &self,
        document_id: DocumentId,
        actor: UserId,
    ) -> Result<UserApproval, WorkflowError> {
        let mut reversed = Vec::new();
        let result = self.engine.withdraw(document_id, actor, |approval| {
            reversed = self.ledger.reverse_postings_for(approval.id, actor)?;
            Ok(())
        });
        if let Err(err) = &result
            && let Some(posting) = reversed.first()
        {
            warn!(document_id = %document_id, error = %err, "withdraw failed, restoring postings");
            self.compensate(posting.approval_id, None, &reversed, actor);
        }
        result
    }

    /// Replaces a rejected case with a fresh one starting at step 1.
    ///
    /// Approvers for the new case are resolved first, and the swap runs
    /// under the document lock, so any failure leaves the rejected case
    /// in place.
    pub fn resubmit(
        &self,
        document: Document,
        workflow: &ApprovalWorkflow,
        actor: UserId,
    ) -> Result<UserApproval, WorkflowError> {
        let document_id = document.id;
        let current = self.engine.approval_for_document(document_id)?;
        ensure_rejected(&current)?;

        let fresh = self.prepare(document, workflow)?;
        let mut reversed = Vec::new();
        let result = self.engine.replace(fresh, actor, |approval| {
            ensure_rejected(approval)?;
            reversed = self.ledger.reverse_postings_for(approval.id, actor)?;
            Ok(())
        });

        match result {
            Ok(approval) => {
                info!(
                    document_id = %document_id,
                    previous = %current.id,
                    approval_id = %approval.id,
                    "document resubmitted"
                );
                Ok(approval)
            }
            Err(err) => {
                if !reversed.is_empty() {
                    self.compensate(current.id, None, &reversed, actor);
                }
                Err(err)
            }
        }
    }

    fn prepare(
        &self,
        document: Document,
        workflow: &ApprovalWorkflow,
    ) -> Result<UserApproval, WorkflowError> {
        if document.total_amount < Decimal::ZERO {
            return Err(BudgetError::NegativeAmount(document.total_amount).into());
        }

        let mut approval = ApprovalStepEngine::initialize(workflow, document)?;
        let amount = approval.document.total_amount;
        for step in approval.steps.iter_mut().filter(|s| s.amount_gated) {
            let approver_id = self.resolver.resolve_approver(step.department_id, amount)?;
            step.approver_id = Some(approver_id);
        }
        Ok(approval)
    }

    fn compensate(
        &self,
        approval_id: UserApprovalId,
        posted: Option<&Posting>,
        reversed: &[Posting],
        actor: UserId,
    ) {
        if let Some(posting) = posted
            && let Err(err) = self.ledger.reverse_posting(posting.id, actor)
        {
            error!(posting_id = %posting.id, error = %err, "failed to compensate posting");
        }
        for posting in reversed {
            if let Err(err) = self.ledger.post_for_approval(
                approval_id,
                posting.budget_item_id,
                posting.amount,
                None,
                actor,
            ) {
                error!(
                    posting_id = %posting.id,
                    error = %err,
                    "failed to restore reversed posting"
                );
            }
        }
    }
}

fn ensure_rejected(approval: &UserApproval) -> Result<(), WorkflowError> {
    if approval.status != ApprovalStatus::Rejected {
        return Err(WorkflowError::ResubmitNotAllowed {
            document_id: approval.document.id,
            status: approval.status,
        });
    }
    Ok(())
}
