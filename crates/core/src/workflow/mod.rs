//! Document approval workflows.
//!
//! A workflow template lists ordered steps. Submitting a document builds an
//! approval case with one pending step per template step, resolving
//! amount-gated approvers from department bands. Steps are decided in order;
//! the final approval posts the document amount to the budget ledger and a
//! rejection reverses any posting.
//!
//! # Modules
//!
//! - `types` - Templates, cases, steps, and decision input
//! - `error` - Workflow-specific error types
//! - `engine` - Per-case step state machine
//! - `rules` - Amount-band approver resolution
//! - `otp` - One-time code hashing and verification
//! - `orchestrator` - Submission and ledger-coupled decisions

pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod otp;
pub mod rules;
pub mod types;

#[cfg(test)]
mod engine_props;
#[cfg(test)]
mod rules_props;

pub use engine::{ApprovalStepEngine, PendingDecision};
pub use error::{Requirement, WorkflowError};
pub use orchestrator::DocumentApprovalOrchestrator;
pub use rules::{ApprovalRuleResolver, BudgetApprovalRule, NewApprovalRule, RuleUpdate};
pub use types::{
    ApprovalStatus, ApprovalStep, ApprovalStepTemplate, ApprovalType, ApprovalWorkflow, Decision,
    DecisionContext, DecisionOutcome, Document, EvidenceFile, IssuedOtp, LedgerSignal,
    UserApproval,
};
