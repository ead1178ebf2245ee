//! Budget ledger for procurement documents.
//!
//! Tracks allocation at three levels (account, item, item detail) and the
//! usage posted against items as documents are approved.
//!
//! # Modules
//!
//! - `types` - Ledger entities and inputs
//! - `error` - Budget-specific error types
//! - `ledger` - Allocation, posting, and increase operations

pub mod error;
pub mod ledger;
pub mod types;

#[cfg(test)]
mod ledger_props;

pub use error::BudgetError;
pub use ledger::BudgetLedger;
pub use types::{
    AccountSummary, Allocation, AppliedIncrease, BudgetAccount, BudgetItem, BudgetItemDetail,
    IncreaseBudget, IncreaseDetail, IncreaseState, NewBudgetAccount, NewIncrease, NewItemDetail,
    Posting,
};
