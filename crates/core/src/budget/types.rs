//! Budget ledger data types.

use chrono::{DateTime, Utc};
use procura_shared::types::{
    BudgetAccountId, BudgetItemDetailId, BudgetItemId, DepartmentId, FileId, IncreaseBudgetId,
    PostingId, UserApprovalId, UserId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::audit::RecordStatus;

/// Shared allocation arithmetic for accounts, items, and details.
///
/// `balance_amount == allocated_amount - used_amount` must hold after every
/// mutation.
pub trait Allocation {
    /// Allocated amount.
    fn allocated(&self) -> Decimal;
    /// Used amount.
    fn used(&self) -> Decimal;
    /// Stored balance.
    fn balance(&self) -> Decimal;
    /// Overwrites the stored balance.
    fn set_balance(&mut self, balance: Decimal);

    /// Recomputes the stored balance from allocated and used.
    fn recompute_balance(&mut self) {
        let balance = self.allocated() - self.used();
        self.set_balance(balance);
    }

    /// Returns true if the stored balance matches allocated minus used.
    fn is_consistent(&self) -> bool {
        self.balance() == self.allocated() - self.used()
    }
}

macro_rules! impl_allocation {
    ($ty:ty) => {
        impl Allocation for $ty {
            fn allocated(&self) -> Decimal {
                self.allocated_amount
            }

            fn used(&self) -> Decimal {
                self.used_amount
            }

            fn balance(&self) -> Decimal {
                self.balance_amount
            }

            fn set_balance(&mut self, balance: Decimal) {
                self.balance_amount = balance;
            }
        }
    };
}

/// Top-level allocation bucket for a department and fiscal year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAccount {
    /// Account ID.
    pub id: BudgetAccountId,
    /// Account code referenced by approval steps.
    pub code: String,
    /// Account name.
    pub name: String,
    /// Fiscal year.
    pub fiscal_year: i32,
    /// Owning department.
    pub department_id: DepartmentId,
    /// Allocated amount.
    pub allocated_amount: Decimal,
    /// Used amount (sum of item usage).
    pub used_amount: Decimal,
    /// Derived balance.
    pub balance_amount: Decimal,
    /// Record status.
    pub status: RecordStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl_allocation!(BudgetAccount);

/// Sub-allocation of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetItem {
    /// Item ID.
    pub id: BudgetItemId,
    /// Parent account.
    pub budget_account_id: BudgetAccountId,
    /// Item name.
    pub name: String,
    /// Allocated amount.
    pub allocated_amount: Decimal,
    /// Used amount.
    pub used_amount: Decimal,
    /// Derived balance.
    pub balance_amount: Decimal,
    /// Record status.
    pub status: RecordStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl_allocation!(BudgetItem);

/// Finer sub-allocation of an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetItemDetail {
    /// Detail ID.
    pub id: BudgetItemDetailId,
    /// Parent item.
    pub budget_item_id: BudgetItemId,
    /// Allocated amount.
    pub allocated_amount: Decimal,
    /// Used amount.
    pub used_amount: Decimal,
    /// Derived balance.
    pub balance_amount: Decimal,
    /// Fiscal year, when it differs from the account's.
    pub fiscal_year: Option<i32>,
    /// Description.
    pub description: Option<String>,
    /// Record status.
    pub status: RecordStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl_allocation!(BudgetItemDetail);

/// Input for opening a budget account.
#[derive(Debug, Clone)]
pub struct NewBudgetAccount {
    /// Account code.
    pub code: String,
    /// Account name.
    pub name: String,
    /// Fiscal year.
    pub fiscal_year: i32,
    /// Owning department.
    pub department_id: DepartmentId,
    /// Initial allocation.
    pub allocated_amount: Decimal,
}

/// Input for a budget item detail.
#[derive(Debug, Clone)]
pub struct NewItemDetail {
    /// Allocated amount.
    pub allocated_amount: Decimal,
    /// Fiscal year.
    pub fiscal_year: Option<i32>,
    /// Description.
    pub description: Option<String>,
}

/// An account with its live items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    /// The account.
    pub account: BudgetAccount,
    /// Live items.
    pub items: Vec<BudgetItem>,
    /// Account allocation not yet assigned to items.
    pub unallocated_amount: Decimal,
}

/// One line of an increase, targeting a single item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncreaseDetail {
    /// Target item.
    pub budget_item_id: BudgetItemId,
    /// Amount added to the item.
    pub allocated_amount: Decimal,
}

/// Input for an increase-budget transaction.
#[derive(Debug, Clone)]
pub struct NewIncrease {
    /// Target account.
    pub budget_account_id: BudgetAccountId,
    /// Total amount added.
    pub allocated_amount: Decimal,
    /// Description.
    pub description: String,
    /// Creating user.
    pub created_by: UserId,
    /// Per-item lines; must sum to `allocated_amount`.
    pub details: Vec<IncreaseDetail>,
    /// Attached files.
    pub files: Vec<FileId>,
}

/// State of an increase-budget transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncreaseState {
    /// Amounts are in effect.
    Applied,
    /// Amounts were subtracted again.
    Reversed,
}

/// A recorded increase-budget transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncreaseBudget {
    /// Increase ID.
    pub id: IncreaseBudgetId,
    /// Target account.
    pub budget_account_id: BudgetAccountId,
    /// Total amount added.
    pub allocated_amount: Decimal,
    /// Description.
    pub description: String,
    /// Creating user.
    pub created_by: UserId,
    /// Per-item lines.
    pub details: Vec<IncreaseDetail>,
    /// Attached files.
    pub files: Vec<FileId>,
    /// Current state.
    pub state: IncreaseState,
    /// When the increase was applied.
    pub applied_at: DateTime<Utc>,
    /// When the increase was reversed.
    pub reversed_at: Option<DateTime<Utc>>,
}

/// Result of applying an increase: the record and every touched entity.
#[derive(Debug, Clone)]
pub struct AppliedIncrease {
    /// The recorded increase.
    pub increase: IncreaseBudget,
    /// The account after the increase.
    pub account: BudgetAccount,
    /// The items after the increase.
    pub items: Vec<BudgetItem>,
}

/// Usage posted against an item on behalf of an approval case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Posting ID.
    pub id: PostingId,
    /// Approval case that caused the posting.
    pub approval_id: UserApprovalId,
    /// Charged item.
    pub budget_item_id: BudgetItemId,
    /// Posted amount.
    pub amount: Decimal,
    /// When the usage was posted.
    pub posted_at: DateTime<Utc>,
    /// When the usage was reversed.
    pub reversed_at: Option<DateTime<Utc>>,
}

impl Posting {
    /// Returns true if the posting still counts against the item.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.reversed_at.is_none()
    }
}
