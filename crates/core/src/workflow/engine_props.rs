//! Property-based tests for the step engine.

use std::sync::Arc;

use proptest::prelude::*;
use procura_shared::ApprovalConfig;
use procura_shared::types::{DepartmentId, DocumentId, UserId};
use rust_decimal::Decimal;

use crate::store::{InMemoryOtpNotifier, InMemoryStore, LockRegistry};
use crate::workflow::engine::ApprovalStepEngine;
use crate::workflow::error::WorkflowError;
use crate::workflow::types::{
    ApprovalStatus, ApprovalStepTemplate, ApprovalType, ApprovalWorkflow, Decision,
    DecisionContext, Document, UserApproval,
};

fn arb_decision() -> impl Strategy<Value = Decision> {
    prop_oneof![4 => Just(Decision::Approve), 1 => Just(Decision::Reject)]
}

fn open_case(steps: u32) -> (ApprovalStepEngine, UserApproval, UserId) {
    let store = Arc::new(InMemoryStore::new());
    let engine = ApprovalStepEngine::new(
        store.clone(),
        store,
        Arc::new(InMemoryOtpNotifier::default()),
        Arc::new(LockRegistry::new()),
        ApprovalConfig::default(),
    );
    let approver = UserId::new();
    let templates = (1..=steps)
        .map(|n| {
            ApprovalStepTemplate::new(n, DepartmentId::new(), ApprovalType::PurchaseOrder)
                .with_approver(approver)
        })
        .collect();
    let workflow = ApprovalWorkflow::new("PO", ApprovalType::PurchaseOrder, templates).unwrap();
    let document = Document {
        id: DocumentId::new(),
        document_type: ApprovalType::PurchaseOrder,
        department_id: DepartmentId::new(),
        total_amount: Decimal::from(100),
        budget_item_id: None,
        account_code: None,
        submitted_by: UserId::new(),
    };
    let approval = ApprovalStepEngine::initialize(&workflow, document).unwrap();
    let approval = engine.open(approval).unwrap();
    (engine, approval, approver)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Any sequence of decisions leaves approved steps as a prefix, closes the
    /// case on the first rejection, and decides each step at most once.
    #[test]
    fn prop_decisions_respect_order(
        steps in 1u32..6,
        ops in prop::collection::vec((0usize..6, arb_decision()), 1..20),
    ) {
        let (engine, approval, approver) = open_case(steps);
        let mut successes = vec![0u32; approval.steps.len()];

        for (index, decision) in ops {
            let index = index % approval.steps.len();
            let step_id = approval.steps[index].id;
            let before = engine.load_approval(approval.id).unwrap();
            let ctx = DecisionContext::new(approver).with_remark("checked");

            let result = engine.submit_decision(step_id, decision, &ctx);
            let after = engine.load_approval(approval.id).unwrap();

            match result {
                Ok(step) => {
                    successes[index] += 1;
                    prop_assert!(before.step(step_id).unwrap().is_pending());
                    prop_assert!(before.is_open());
                    prop_assert_eq!(step.status, decision.target_status());
                }
                Err(err) => {
                    prop_assert_eq!(&before, &after);
                    let expected = matches!(
                        err,
                        WorkflowError::StepAlreadyFinalized { .. }
                            | WorkflowError::WorkflowClosed { .. }
                            | WorkflowError::OutOfOrder { .. }
                    );
                    prop_assert!(expected);
                }
            }

            let approved: Vec<u32> = after
                .steps
                .iter()
                .filter(|s| s.status == ApprovalStatus::Approved)
                .map(|s| s.step_number)
                .collect();
            let expected: Vec<u32> = (1..=u32::try_from(approved.len()).unwrap()).collect();
            prop_assert_eq!(approved.clone(), expected);

            let rejected = after
                .steps
                .iter()
                .filter(|s| s.status == ApprovalStatus::Rejected)
                .count();
            prop_assert!(rejected <= 1);
            if rejected == 1 {
                prop_assert_eq!(after.status, ApprovalStatus::Rejected);
            } else if approved.len() == after.steps.len() {
                prop_assert_eq!(after.status, ApprovalStatus::Approved);
            } else {
                prop_assert_eq!(after.status, ApprovalStatus::Pending);
            }
        }

        prop_assert!(successes.iter().all(|&n| n <= 1));
    }
}
