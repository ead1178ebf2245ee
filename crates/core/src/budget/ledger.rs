//! Budget ledger: allocation, usage, and increases.
//!
//! Every mutation runs under the locks of the touched account and items,
//! re-reads them, checks `balance == allocated - used` and the allocation
//! ceilings on the result, and only then writes. A failed write restores
//! the entities already written by the same call.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::slice;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use procura_shared::types::{
    BudgetAccountId, BudgetItemDetailId, BudgetItemId, IncreaseBudgetId, PageRequest,
    PageResponse, PostingId, UserApprovalId, UserId,
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntity, AuditEvent, RecordStatus};
use crate::budget::error::BudgetError;
use crate::budget::types::{
    AccountSummary, Allocation, AppliedIncrease, BudgetAccount, BudgetItem, BudgetItemDetail,
    IncreaseBudget, IncreaseState, NewBudgetAccount, NewIncrease, NewItemDetail, Posting,
};
use crate::store::{AccountFilter, AuditLog, BudgetStore, LockGuard, LockRegistry};

/// Owns budget accounts, items, details, increases, and postings.
pub struct BudgetLedger {
    store: Arc<dyn BudgetStore>,
    audit: Arc<dyn AuditLog>,
    locks: Arc<LockRegistry>,
}

/// An item and its account, read under their locks.
struct LockedItem<'a> {
    _guard: LockGuard<'a>,
    item: BudgetItem,
    account: BudgetAccount,
}

impl BudgetLedger {
    /// Creates a ledger over the given collaborators.
    pub fn new(
        store: Arc<dyn BudgetStore>,
        audit: Arc<dyn AuditLog>,
        locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            store,
            audit,
            locks,
        }
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Opens a budget account with no items.
    pub fn open_account(
        &self,
        input: NewBudgetAccount,
        actor: UserId,
    ) -> Result<BudgetAccount, BudgetError> {
        ensure_not_negative(input.allocated_amount)?;

        let now = Utc::now();
        let account = BudgetAccount {
            id: BudgetAccountId::new(),
            code: input.code.trim().to_string(),
            name: input.name,
            fiscal_year: input.fiscal_year,
            department_id: input.department_id,
            allocated_amount: input.allocated_amount,
            used_amount: Decimal::ZERO,
            balance_amount: input.allocated_amount,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let account = self.store.save_account(account)?;
        self.audit.append(
            AuditEvent::new(AuditEntity::BudgetAccount, account.id.into(), AuditAction::Created)
                .by(actor)
                .with_detail(json!({
                    "code": account.code,
                    "fiscal_year": account.fiscal_year,
                    "allocated_amount": account.allocated_amount,
                })),
        )?;

        info!(account_id = %account.id, code = %account.code, "budget account opened");
        Ok(account)
    }

    /// Adds an item. Live item allocations must fit in the account allocation.
    pub fn add_item(
        &self,
        account_id: BudgetAccountId,
        name: impl Into<String>,
        allocated_amount: Decimal,
        actor: UserId,
    ) -> Result<BudgetItem, BudgetError> {
        ensure_not_negative(allocated_amount)?;

        let _guard = self.locks.lock(account_id)?;
        let account = self.live_account(account_id)?;
        let assigned = live_allocation(&self.store.items_for_account(account_id)?);
        let available = account.allocated_amount - assigned;
        if allocated_amount > available {
            return Err(BudgetError::AllocationExceeded {
                requested: allocated_amount,
                available,
            });
        }

        let now = Utc::now();
        let item = BudgetItem {
            id: BudgetItemId::new(),
            budget_account_id: account_id,
            name: name.into(),
            allocated_amount,
            used_amount: Decimal::ZERO,
            balance_amount: allocated_amount,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let item = self.store.save_item(item)?;
        self.audit.append(
            AuditEvent::new(AuditEntity::BudgetItem, item.id.into(), AuditAction::Created)
                .by(actor)
                .with_detail(json!({
                    "budget_account_id": account_id,
                    "allocated_amount": allocated_amount,
                })),
        )?;

        info!(item_id = %item.id, account_id = %account_id, "budget item added");
        Ok(item)
    }

    /// Adds a detail. Live detail allocations must fit in the item allocation.
    pub fn add_item_detail(
        &self,
        item_id: BudgetItemId,
        input: NewItemDetail,
        actor: UserId,
    ) -> Result<BudgetItemDetail, BudgetError> {
        ensure_not_negative(input.allocated_amount)?;

        let _guard = self.locks.lock(item_id)?;
        let item = self.live_item(item_id)?;
        let assigned = self.detail_allocation(item_id)?;
        let available = item.allocated_amount - assigned;
        if input.allocated_amount > available {
            return Err(BudgetError::AllocationExceeded {
                requested: input.allocated_amount,
                available,
            });
        }

        let detail = BudgetItemDetail {
            id: BudgetItemDetailId::new(),
            budget_item_id: item_id,
            allocated_amount: input.allocated_amount,
            used_amount: Decimal::ZERO,
            balance_amount: input.allocated_amount,
            fiscal_year: input.fiscal_year,
            description: input.description,
            status: RecordStatus::Active,
            created_at: Utc::now(),
        };

        let detail = self.store.save_detail(detail)?;
        self.audit.append(
            AuditEvent::new(AuditEntity::BudgetItemDetail, detail.id.into(), AuditAction::Created)
                .by(actor)
                .with_detail(json!({
                    "budget_item_id": item_id,
                    "allocated_amount": detail.allocated_amount,
                })),
        )?;

        Ok(detail)
    }

    /// Loads a budget item detail.
    pub fn item_detail(&self, id: BudgetItemDetailId) -> Result<BudgetItemDetail, BudgetError> {
        self.store
            .load_detail(id)?
            .ok_or(BudgetError::DetailNotFound(id))
    }

    /// Soft-deletes an item with no recorded usage and no allocated live details.
    pub fn remove_item(
        &self,
        item_id: BudgetItemId,
        actor: UserId,
    ) -> Result<BudgetItem, BudgetError> {
        let locked = self.lock_item(item_id, None)?;
        if locked.item.used_amount > Decimal::ZERO
            || self.detail_allocation(item_id)? > Decimal::ZERO
        {
            return Err(BudgetError::ItemInUse(item_id));
        }

        let mut item = locked.item.clone();
        item.status = RecordStatus::Deleted;
        item.updated_at = Utc::now();

        let item = self.store.save_item(item)?;
        self.audit.append(
            AuditEvent::new(AuditEntity::BudgetItem, item_id.into(), AuditAction::Deleted)
                .by(actor),
        )?;

        info!(item_id = %item_id, "budget item removed");
        Ok(item)
    }

    /// Loads an account with its live items.
    pub fn account_summary(
        &self,
        account_id: BudgetAccountId,
    ) -> Result<AccountSummary, BudgetError> {
        let account = self.live_account(account_id)?;
        let items: Vec<BudgetItem> = self
            .store
            .items_for_account(account_id)?
            .into_iter()
            .filter(|i| i.status.is_active())
            .collect();
        let unallocated_amount = account.allocated_amount - live_allocation(&items);

        Ok(AccountSummary {
            account,
            items,
            unallocated_amount,
        })
    }

    /// Re-checks every ledger invariant of an account and its items.
    pub fn verify_account(
        &self,
        account_id: BudgetAccountId,
    ) -> Result<AccountSummary, BudgetError> {
        let summary = self.account_summary(account_id)?;
        let all_items = self.store.items_for_account(account_id)?;

        check_account(&summary.account, &all_items)?;
        let used: Decimal = all_items.iter().map(|i| i.used_amount).sum();
        if used != summary.account.used_amount {
            return Err(BudgetError::InvariantViolated(format!(
                "account {} records {} used but its items total {used}",
                account_id, summary.account.used_amount
            )));
        }
        Ok(summary)
    }

    /// Lists accounts.
    pub fn list_accounts(
        &self,
        filter: &AccountFilter,
        page: &PageRequest,
    ) -> Result<PageResponse<BudgetAccount>, BudgetError> {
        Ok(self.store.query_accounts(filter, page)?)
    }

    /// Loads a live item.
    pub fn item(&self, item_id: BudgetItemId) -> Result<BudgetItem, BudgetError> {
        self.live_item(item_id)
    }

    // ========================================================================
    // Usage
    // ========================================================================

    /// Charges `amount` to an item and its account.
    pub fn post_usage(
        &self,
        item_id: BudgetItemId,
        amount: Decimal,
    ) -> Result<BudgetItem, BudgetError> {
        ensure_positive(amount)?;

        let locked = self.lock_item(item_id, None)?;
        let (item, account) = charged(&locked, amount, Utc::now())?;
        self.save_entities(
            slice::from_ref(&item),
            &account,
            slice::from_ref(&locked.item),
        )?;
        self.audit.append(
            AuditEvent::new(AuditEntity::BudgetItem, item_id.into(), AuditAction::Posted)
                .with_detail(json!({ "amount": amount })),
        )?;

        info!(item_id = %item_id, amount = %amount, balance = %item.balance_amount, "usage posted");
        Ok(item)
    }

    /// Credits `amount` back to an item and its account.
    pub fn reverse_usage(
        &self,
        item_id: BudgetItemId,
        amount: Decimal,
    ) -> Result<BudgetItem, BudgetError> {
        ensure_positive(amount)?;

        let locked = self.lock_item(item_id, None)?;
        let (item, account) = credited(&locked, amount, Utc::now())?;
        self.save_entities(
            slice::from_ref(&item),
            &account,
            slice::from_ref(&locked.item),
        )?;
        self.audit.append(
            AuditEvent::new(AuditEntity::BudgetItem, item_id.into(), AuditAction::Reversed)
                .with_detail(json!({ "amount": amount })),
        )?;

        info!(
            item_id = %item_id,
            amount = %amount,
            balance = %item.balance_amount,
            "usage reversed"
        );
        Ok(item)
    }

    /// Charges an item on behalf of an approval case and journals the posting.
    ///
    /// When `account_code` is given the item's account must carry that code.
    pub fn post_for_approval(
        &self,
        approval_id: UserApprovalId,
        item_id: BudgetItemId,
        amount: Decimal,
        account_code: Option<&str>,
        actor: UserId,
    ) -> Result<Posting, BudgetError> {
        ensure_positive(amount)?;

        let locked = self.lock_item(item_id, None)?;
        if let Some(code) = account_code
            && code.trim() != locked.account.code
        {
            return Err(BudgetError::AccountCodeMismatch {
                expected: code.trim().to_string(),
                actual: locked.account.code.clone(),
            });
        }

        let now = Utc::now();
        let (item, account) = charged(&locked, amount, now)?;
        self.save_entities(
            slice::from_ref(&item),
            &account,
            slice::from_ref(&locked.item),
        )?;

        let posting = Posting {
            id: PostingId::new(),
            approval_id,
            budget_item_id: item_id,
            amount,
            posted_at: now,
            reversed_at: None,
        };
        let posting = match self.store.save_posting(posting) {
            Ok(posting) => posting,
            Err(err) => {
                self.restore(slice::from_ref(&locked.item), Some(&locked.account));
                return Err(err.into());
            }
        };
        self.audit.append(
            AuditEvent::new(AuditEntity::Posting, posting.id.into(), AuditAction::Posted)
                .by(actor)
                .at(now)
                .with_detail(json!({
                    "approval_id": approval_id,
                    "budget_item_id": item_id,
                    "amount": amount,
                })),
        )?;

        info!(
            posting_id = %posting.id,
            approval_id = %approval_id,
            item_id = %item_id,
            amount = %amount,
            "approval usage posted"
        );
        Ok(posting)
    }

    /// Reverses a journaled posting. Already reversed postings are returned unchanged.
    pub fn reverse_posting(
        &self,
        posting_id: PostingId,
        actor: UserId,
    ) -> Result<Posting, BudgetError> {
        let posting = self.load_posting(posting_id)?;
        if !posting.is_active() {
            return Ok(posting);
        }

        let locked = self.lock_item(posting.budget_item_id, Some(posting_id.into_inner()))?;
        let mut posting = self.load_posting(posting_id)?;
        if !posting.is_active() {
            return Ok(posting);
        }

        let now = Utc::now();
        let (item, account) = credited(&locked, posting.amount, now)?;
        self.save_entities(
            slice::from_ref(&item),
            &account,
            slice::from_ref(&locked.item),
        )?;

        posting.reversed_at = Some(now);
        let posting = match self.store.save_posting(posting) {
            Ok(posting) => posting,
            Err(err) => {
                self.restore(slice::from_ref(&locked.item), Some(&locked.account));
                return Err(err.into());
            }
        };
        self.audit.append(
            AuditEvent::new(AuditEntity::Posting, posting_id.into(), AuditAction::Reversed)
                .by(actor)
                .at(now)
                .with_detail(json!({
                    "approval_id": posting.approval_id,
                    "budget_item_id": posting.budget_item_id,
                    "amount": posting.amount,
                })),
        )?;

        info!(posting_id = %posting_id, amount = %posting.amount, "approval usage reversed");
        Ok(posting)
    }

    /// Reverses every active posting of an approval case.
    pub fn reverse_postings_for(
        &self,
        approval_id: UserApprovalId,
        actor: UserId,
    ) -> Result<Vec<Posting>, BudgetError> {
        self.store
            .postings_for_approval(approval_id)?
            .into_iter()
            .filter(Posting::is_active)
            .map(|p| self.reverse_posting(p.id, actor))
            .collect()
    }

    /// Lists the postings of an approval case.
    pub fn postings_for(&self, approval_id: UserApprovalId) -> Result<Vec<Posting>, BudgetError> {
        Ok(self.store.postings_for_approval(approval_id)?)
    }

    // ========================================================================
    // Increases
    // ========================================================================

    /// Applies an increase to its account and the items named by its lines.
    pub fn apply_increase(&self, input: NewIncrease) -> Result<AppliedIncrease, BudgetError> {
        ensure_positive(input.allocated_amount)?;
        for line in &input.details {
            ensure_positive(line.allocated_amount)?;
        }
        let actual: Decimal = input.details.iter().map(|d| d.allocated_amount).sum();
        if actual != input.allocated_amount {
            return Err(BudgetError::DetailSumMismatch {
                expected: input.allocated_amount,
                actual,
            });
        }

        let account_id = input.budget_account_id;
        let item_ids: BTreeSet<BudgetItemId> =
            input.details.iter().map(|d| d.budget_item_id).collect();
        let _guard = self.locks.lock_many(
            std::iter::once(account_id.into_inner())
                .chain(item_ids.iter().map(|id| id.into_inner())),
        )?;

        let original_account = self.live_account(account_id)?;
        let mut items = self.items_of(&original_account, &item_ids)?;
        let original_items: Vec<BudgetItem> = items.values().cloned().collect();

        let now = Utc::now();
        for line in &input.details {
            let item = items
                .get_mut(&line.budget_item_id)
                .ok_or(BudgetError::ItemNotFound(line.budget_item_id))?;
            item.allocated_amount += line.allocated_amount;
            item.recompute_balance();
            item.updated_at = now;
        }
        let mut account = original_account.clone();
        account.allocated_amount += input.allocated_amount;
        account.recompute_balance();
        account.updated_at = now;

        let items: Vec<BudgetItem> = items.into_values().collect();
        self.check_with_siblings(&account, &items)?;
        self.save_entities(&items, &account, &original_items)?;

        let increase = IncreaseBudget {
            id: IncreaseBudgetId::new(),
            budget_account_id: account_id,
            allocated_amount: input.allocated_amount,
            description: input.description,
            created_by: input.created_by,
            details: input.details,
            files: input.files,
            state: IncreaseState::Applied,
            applied_at: now,
            reversed_at: None,
        };
        let increase = match self.store.save_increase(increase) {
            Ok(increase) => increase,
            Err(err) => {
                self.restore(&original_items, Some(&original_account));
                return Err(err.into());
            }
        };
        self.audit.append(
            AuditEvent::new(AuditEntity::IncreaseBudget, increase.id.into(), AuditAction::Applied)
                .by(increase.created_by)
                .at(now)
                .with_detail(json!({
                    "budget_account_id": account_id,
                    "allocated_amount": increase.allocated_amount,
                    "lines": increase.details.len(),
                })),
        )?;

        info!(
            increase_id = %increase.id,
            account_id = %account_id,
            amount = %increase.allocated_amount,
            "budget increase applied"
        );
        Ok(AppliedIncrease {
            increase,
            account,
            items,
        })
    }

    /// Subtracts an applied increase again.
    ///
    /// Fails if an item would end up with less allocation than it has used
    /// or than its live details hold.
    pub fn reverse_increase(
        &self,
        id: IncreaseBudgetId,
        actor: UserId,
    ) -> Result<bool, BudgetError> {
        let increase = self
            .store
            .load_increase(id)?
            .ok_or(BudgetError::IncreaseNotFound(id))?;

        let item_ids: BTreeSet<BudgetItemId> =
            increase.details.iter().map(|d| d.budget_item_id).collect();
        let _guard = self.locks.lock_many(
            [increase.budget_account_id.into_inner(), id.into_inner()]
                .into_iter()
                .chain(item_ids.iter().map(|i| i.into_inner())),
        )?;

        let mut increase = self
            .store
            .load_increase(id)?
            .ok_or(BudgetError::IncreaseNotFound(id))?;
        if increase.state == IncreaseState::Reversed {
            warn!(increase_id = %id, "increase already reversed");
            return Err(BudgetError::IncreaseAlreadyReversed(id));
        }

        let original_account = self.live_account(increase.budget_account_id)?;
        let mut items = self.items_of(&original_account, &item_ids)?;
        let original_items: Vec<BudgetItem> = items.values().cloned().collect();

        let now = Utc::now();
        for line in &increase.details {
            let item = items
                .get_mut(&line.budget_item_id)
                .ok_or(BudgetError::ItemNotFound(line.budget_item_id))?;
            if line.allocated_amount > item.balance_amount {
                return Err(BudgetError::InsufficientBalance {
                    item_id: item.id,
                    requested: line.allocated_amount,
                    available: item.balance_amount,
                });
            }
            item.allocated_amount -= line.allocated_amount;
            item.recompute_balance();
            item.updated_at = now;
        }
        for item in items.values() {
            let assigned = self.detail_allocation(item.id)?;
            if assigned > item.allocated_amount {
                warn!(item_id = %item.id, %assigned, "reversal would strand item details");
                return Err(BudgetError::AllocationExceeded {
                    requested: assigned,
                    available: item.allocated_amount,
                });
            }
        }
        let mut account = original_account.clone();
        account.allocated_amount -= increase.allocated_amount;
        account.recompute_balance();
        account.updated_at = now;

        let items: Vec<BudgetItem> = items.into_values().collect();
        self.check_with_siblings(&account, &items)?;
        self.save_entities(&items, &account, &original_items)?;

        increase.state = IncreaseState::Reversed;
        increase.reversed_at = Some(now);
        if let Err(err) = self.store.save_increase(increase) {
            self.restore(&original_items, Some(&original_account));
            return Err(err.into());
        }
        self.audit.append(
            AuditEvent::new(AuditEntity::IncreaseBudget, id.into(), AuditAction::Reversed)
                .by(actor)
                .at(now),
        )?;

        info!(increase_id = %id, "budget increase reversed");
        Ok(true)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn live_account(&self, id: BudgetAccountId) -> Result<BudgetAccount, BudgetError> {
        self.store
            .load_account(id)?
            .filter(|a| a.status.is_active())
            .ok_or(BudgetError::AccountNotFound(id))
    }

    fn live_item(&self, id: BudgetItemId) -> Result<BudgetItem, BudgetError> {
        self.store
            .load_item(id)?
            .filter(|i| i.status.is_active())
            .ok_or(BudgetError::ItemNotFound(id))
    }

    /// Sum of live detail allocations under an item.
    fn detail_allocation(&self, item_id: BudgetItemId) -> Result<Decimal, BudgetError> {
        Ok(self
            .store
            .details_for_item(item_id)?
            .iter()
            .filter(|d| d.status.is_active())
            .map(|d| d.allocated_amount)
            .sum())
    }

    fn load_posting(&self, id: PostingId) -> Result<Posting, BudgetError> {
        self.store
            .load_posting(id)?
            .ok_or(BudgetError::PostingNotFound(id))
    }

    /// Locks an item with its account (plus `extra`) and re-reads both.
    fn lock_item(
        &self,
        item_id: BudgetItemId,
        extra: Option<Uuid>,
    ) -> Result<LockedItem<'_>, BudgetError> {
        let account_id = self.live_item(item_id)?.budget_account_id;
        let guard = self.locks.lock_many(
            [account_id.into_inner(), item_id.into_inner()]
                .into_iter()
                .chain(extra),
        )?;

        let item = self.live_item(item_id)?;
        let account = self.live_account(item.budget_account_id)?;
        Ok(LockedItem {
            _guard: guard,
            item,
            account,
        })
    }

    fn items_of(
        &self,
        account: &BudgetAccount,
        item_ids: &BTreeSet<BudgetItemId>,
    ) -> Result<BTreeMap<BudgetItemId, BudgetItem>, BudgetError> {
        item_ids
            .iter()
            .map(|&id| {
                let item = self.live_item(id)?;
                if item.budget_account_id != account.id {
                    return Err(BudgetError::ItemAccountMismatch {
                        item_id: id,
                        account_id: account.id,
                    });
                }
                Ok((id, item))
            })
            .collect()
    }

    /// Checks an account against its stored items with `changed` substituted.
    fn check_with_siblings(
        &self,
        account: &BudgetAccount,
        changed: &[BudgetItem],
    ) -> Result<(), BudgetError> {
        let mut all = self.store.items_for_account(account.id)?;
        for item in &mut all {
            if let Some(updated) = changed.iter().find(|c| c.id == item.id) {
                item.clone_from(updated);
            }
        }
        check_account(account, &all)
    }

    /// Writes items then the account. On failure the written items are restored.
    fn save_entities(
        &self,
        items: &[BudgetItem],
        account: &BudgetAccount,
        original_items: &[BudgetItem],
    ) -> Result<(), BudgetError> {
        for (written, item) in items.iter().enumerate() {
            if let Err(err) = self.store.save_item(item.clone()) {
                self.restore(&original_items[..written], None);
                return Err(err.into());
            }
        }
        if let Err(err) = self.store.save_account(account.clone()) {
            self.restore(original_items, None);
            return Err(err.into());
        }
        Ok(())
    }

    fn restore(&self, items: &[BudgetItem], account: Option<&BudgetAccount>) {
        for item in items {
            if let Err(err) = self.store.save_item(item.clone()) {
                error!(item_id = %item.id, error = %err, "failed to restore budget item");
            }
        }
        if let Some(account) = account
            && let Err(err) = self.store.save_account(account.clone())
        {
            error!(account_id = %account.id, error = %err, "failed to restore budget account");
        }
    }
}

fn ensure_positive(amount: Decimal) -> Result<(), BudgetError> {
    if amount <= Decimal::ZERO {
        return Err(BudgetError::NonPositiveAmount(amount));
    }
    Ok(())
}

fn ensure_not_negative(amount: Decimal) -> Result<(), BudgetError> {
    if amount < Decimal::ZERO {
        return Err(BudgetError::NegativeAmount(amount));
    }
    Ok(())
}

fn live_allocation(items: &[BudgetItem]) -> Decimal {
    items
        .iter()
        .filter(|i| i.status.is_active())
        .map(|i| i.allocated_amount)
        .sum()
}

fn ensure_balanced(
    label: &str,
    id: impl Display,
    entity: &impl Allocation,
) -> Result<(), BudgetError> {
    if !entity.is_consistent()
        || entity.used() < Decimal::ZERO
        || entity.balance() < Decimal::ZERO
    {
        return Err(BudgetError::InvariantViolated(format!(
            "{label} {id}: allocated {} used {} balance {}",
            entity.allocated(),
            entity.used(),
            entity.balance()
        )));
    }
    Ok(())
}

/// Balance invariant on the account and every item, plus the live allocation ceiling.
fn check_account(account: &BudgetAccount, items: &[BudgetItem]) -> Result<(), BudgetError> {
    ensure_balanced("account", account.id, account)?;
    for item in items {
        ensure_balanced("item", item.id, item)?;
    }
    let assigned = live_allocation(items);
    if assigned > account.allocated_amount {
        return Err(BudgetError::InvariantViolated(format!(
            "items of account {} allocate {assigned} of {}",
            account.id, account.allocated_amount
        )));
    }
    Ok(())
}

fn charged(
    locked: &LockedItem<'_>,
    amount: Decimal,
    at: DateTime<Utc>,
) -> Result<(BudgetItem, BudgetAccount), BudgetError> {
    let (mut item, mut account) = (locked.item.clone(), locked.account.clone());
    if amount > item.balance_amount {
        warn!(
            item_id = %item.id,
            requested = %amount,
            available = %item.balance_amount,
            "posting refused"
        );
        return Err(BudgetError::InsufficientBalance {
            item_id: item.id,
            requested: amount,
            available: item.balance_amount,
        });
    }

    item.used_amount += amount;
    item.recompute_balance();
    item.updated_at = at;
    account.used_amount += amount;
    account.recompute_balance();
    account.updated_at = at;

    ensure_balanced("item", item.id, &item)?;
    ensure_balanced("account", account.id, &account)?;
    Ok((item, account))
}

fn credited(
    locked: &LockedItem<'_>,
    amount: Decimal,
    at: DateTime<Utc>,
) -> Result<(BudgetItem, BudgetAccount), BudgetError> {
    let (mut item, mut account) = (locked.item.clone(), locked.account.clone());
    if amount > item.used_amount {
        warn!(
            item_id = %item.id,
            requested = %amount,
            used = %item.used_amount,
            "reversal refused"
        );
        return Err(BudgetError::OverReversal {
            item_id: item.id,
            requested: amount,
            used: item.used_amount,
        });
    }

    item.used_amount = (item.used_amount - amount).max(Decimal::ZERO);
    item.recompute_balance();
    item.updated_at = at;
    account.used_amount = (account.used_amount - amount).max(Decimal::ZERO);
    account.recompute_balance();
    account.updated_at = at;

    ensure_balanced("item", item.id, &item)?;
    ensure_balanced("account", account.id, &account)?;
    Ok((item, account))
}
