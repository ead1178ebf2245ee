//! Budget ledger error types.

use procura_shared::types::{
    BudgetAccountId, BudgetItemDetailId, BudgetItemId, IncreaseBudgetId, PostingId,
};
use procura_shared::{AppError, ErrorKind};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::store::StoreError;

/// Budget-related errors.
#[derive(Debug, Error)]
pub enum BudgetError {
    /// Budget account not found.
    #[error("Budget account not found: {0}")]
    AccountNotFound(BudgetAccountId),

    /// Budget item not found or deleted.
    #[error("Budget item not found: {0}")]
    ItemNotFound(BudgetItemId),

    /// Budget item detail not found.
    #[error("Budget item detail not found: {0}")]
    DetailNotFound(BudgetItemDetailId),

    /// Increase was never applied.
    #[error("Increase budget not found: {0}")]
    IncreaseNotFound(IncreaseBudgetId),

    /// Increase was already reversed.
    #[error("Increase budget {0} was already reversed")]
    IncreaseAlreadyReversed(IncreaseBudgetId),

    /// Posting not found.
    #[error("Posting not found: {0}")]
    PostingNotFound(PostingId),

    /// Amount must be strictly positive.
    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    /// Allocation must not be negative.
    #[error("Allocation must not be negative, got {0}")]
    NegativeAmount(Decimal),

    /// Posting would exceed the item's balance.
    #[error("Insufficient balance on item {item_id}: requested {requested}, available {available}")]
    InsufficientBalance {
        /// The item being charged.
        item_id: BudgetItemId,
        /// Requested amount.
        requested: Decimal,
        /// Current balance.
        available: Decimal,
    },

    /// Reversal would exceed recorded usage.
    #[error("Cannot reverse {requested} on item {item_id}: only {used} is used")]
    OverReversal {
        /// The item being credited.
        item_id: BudgetItemId,
        /// Requested reversal.
        requested: Decimal,
        /// Currently used amount.
        used: Decimal,
    },

    /// Increase detail lines do not add up to the increase total.
    #[error("Increase details sum to {actual} but the increase total is {expected}")]
    DetailSumMismatch {
        /// Declared total.
        expected: Decimal,
        /// Sum of detail lines.
        actual: Decimal,
    },

    /// Child allocations would exceed the parent allocation.
    #[error("Allocation of {requested} exceeds unallocated {available}")]
    AllocationExceeded {
        /// Requested allocation.
        requested: Decimal,
        /// Remaining unallocated amount on the parent.
        available: Decimal,
    },

    /// Item does not belong to the account.
    #[error("Budget item {item_id} does not belong to account {account_id}")]
    ItemAccountMismatch {
        /// The item.
        item_id: BudgetItemId,
        /// The expected account.
        account_id: BudgetAccountId,
    },

    /// The posting target's account code differs from the requested one.
    #[error("Account code mismatch: expected {expected}, item belongs to {actual}")]
    AccountCodeMismatch {
        /// Requested code.
        expected: String,
        /// Code of the item's account.
        actual: String,
    },

    /// Item still has usage and cannot be removed.
    #[error("Budget item {0} has recorded usage and cannot be removed")]
    ItemInUse(BudgetItemId),

    /// A balance invariant does not hold.
    #[error("Ledger invariant violated: {0}")]
    InvariantViolated(String),

    /// Collaborator failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BudgetError {
    /// Returns the error taxonomy kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AccountNotFound(_)
            | Self::ItemNotFound(_)
            | Self::DetailNotFound(_)
            | Self::IncreaseNotFound(_)
            | Self::PostingNotFound(_) => ErrorKind::NotFound,

            Self::IncreaseAlreadyReversed(_) => ErrorKind::StateConflict,

            Self::NonPositiveAmount(_)
            | Self::NegativeAmount(_)
            | Self::DetailSumMismatch { .. }
            | Self::ItemAccountMismatch { .. }
            | Self::AccountCodeMismatch { .. } => ErrorKind::Validation,

            Self::InsufficientBalance { .. }
            | Self::OverReversal { .. }
            | Self::AllocationExceeded { .. }
            | Self::ItemInUse(_)
            | Self::InvariantViolated(_) => ErrorKind::LedgerIntegrity,

            Self::Store(err) => err.kind(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Store(err) => err.status_code(),
            _ => AppError::from_kind(self.kind(), String::new()).status_code(),
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) => "BUDGET_ACCOUNT_NOT_FOUND",
            Self::ItemNotFound(_) => "BUDGET_ITEM_NOT_FOUND",
            Self::DetailNotFound(_) => "BUDGET_ITEM_DETAIL_NOT_FOUND",
            Self::IncreaseNotFound(_) => "INCREASE_NOT_FOUND",
            Self::IncreaseAlreadyReversed(_) => "INCREASE_ALREADY_REVERSED",
            Self::PostingNotFound(_) => "POSTING_NOT_FOUND",
            Self::NonPositiveAmount(_) => "NON_POSITIVE_AMOUNT",
            Self::NegativeAmount(_) => "NEGATIVE_AMOUNT",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::OverReversal { .. } => "OVER_REVERSAL",
            Self::DetailSumMismatch { .. } => "DETAIL_SUM_MISMATCH",
            Self::AllocationExceeded { .. } => "ALLOCATION_EXCEEDED",
            Self::ItemAccountMismatch { .. } => "ITEM_ACCOUNT_MISMATCH",
            Self::AccountCodeMismatch { .. } => "ACCOUNT_CODE_MISMATCH",
            Self::ItemInUse(_) => "ITEM_IN_USE",
            Self::InvariantViolated(_) => "INVARIANT_VIOLATED",
            Self::Store(err) => err.error_code(),
        }
    }
}

impl From<BudgetError> for AppError {
    fn from(err: BudgetError) -> Self {
        Self::from_kind(err.kind(), err.to_string())
    }
}
