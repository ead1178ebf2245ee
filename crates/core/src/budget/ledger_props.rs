//! Property-based tests for the budget ledger.

use std::sync::Arc;

use proptest::prelude::*;
use procura_shared::types::{DepartmentId, UserId};
use rust_decimal::Decimal;

use crate::budget::ledger::BudgetLedger;
use crate::budget::types::{
    Allocation, BudgetAccount, BudgetItem, IncreaseDetail, NewBudgetAccount, NewIncrease,
};
use crate::store::{InMemoryStore, LockRegistry};

#[derive(Debug, Clone)]
enum Op {
    Post { item: usize, cents: i64 },
    Reverse { item: usize, cents: i64 },
    Increase { item: usize, cents: i64 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, 1i64..50_000).prop_map(|(item, cents)| Op::Post { item, cents }),
        (0usize..3, 1i64..50_000).prop_map(|(item, cents)| Op::Reverse { item, cents }),
        (0usize..3, 1i64..50_000).prop_map(|(item, cents)| Op::Increase { item, cents }),
    ]
}

fn amount(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn setup() -> (BudgetLedger, UserId, BudgetAccount, Vec<BudgetItem>) {
    let store = Arc::new(InMemoryStore::new());
    let ledger = BudgetLedger::new(store.clone(), store, Arc::new(LockRegistry::new()));
    let admin = UserId::new();
    let account = ledger
        .open_account(
            NewBudgetAccount {
                code: "7000".to_string(),
                name: "Operations".to_string(),
                fiscal_year: 2026,
                department_id: DepartmentId::new(),
                allocated_amount: amount(300_000),
            },
            admin,
        )
        .unwrap();
    let items = (0..3)
        .map(|i| {
            ledger
                .add_item(account.id, format!("item-{i}"), amount(100_000), admin)
                .unwrap()
        })
        .collect();
    (ledger, admin, account, items)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// balance == allocated - used holds after any sequence of ledger operations,
    /// and refused operations change nothing.
    #[test]
    fn prop_balance_invariant_holds(ops in prop::collection::vec(arb_op(), 1..30)) {
        let (ledger, admin, account, items) = setup();

        for op in ops {
            let before = ledger.verify_account(account.id).unwrap();
            let result = match op {
                Op::Post { item, cents } => {
                    ledger.post_usage(items[item].id, amount(cents)).map(|_| ())
                }
                Op::Reverse { item, cents } => {
                    ledger.reverse_usage(items[item].id, amount(cents)).map(|_| ())
                }
                Op::Increase { item, cents } => ledger
                    .apply_increase(NewIncrease {
                        budget_account_id: account.id,
                        allocated_amount: amount(cents),
                        description: "top-up".to_string(),
                        created_by: admin,
                        details: vec![IncreaseDetail {
                            budget_item_id: items[item].id,
                            allocated_amount: amount(cents),
                        }],
                        files: Vec::new(),
                    })
                    .map(|_| ()),
            };

            let after = ledger.verify_account(account.id).unwrap();
            prop_assert!(after.account.is_consistent());
            for item in &after.items {
                prop_assert!(item.is_consistent());
                prop_assert!(item.used_amount >= Decimal::ZERO);
                prop_assert!(item.used_amount <= item.allocated_amount);
            }
            if result.is_err() {
                prop_assert_eq!(before.account, after.account);
                prop_assert_eq!(before.items, after.items);
            }
        }
    }

    /// Applying then reversing an increase restores every allocation exactly.
    #[test]
    fn prop_increase_round_trip(
        lines in prop::collection::vec((0usize..3, 1i64..1_000_000), 1..6)
    ) {
        let (ledger, admin, account, items) = setup();
        let before = ledger.verify_account(account.id).unwrap();

        let details: Vec<IncreaseDetail> = lines
            .iter()
            .map(|&(item, cents)| IncreaseDetail {
                budget_item_id: items[item].id,
                allocated_amount: amount(cents),
            })
            .collect();
        let total: Decimal = details.iter().map(|d| d.allocated_amount).sum();

        let applied = ledger
            .apply_increase(NewIncrease {
                budget_account_id: account.id,
                allocated_amount: total,
                description: "round trip".to_string(),
                created_by: admin,
                details,
                files: Vec::new(),
            })
            .unwrap();
        prop_assert_eq!(applied.account.allocated_amount, before.account.allocated_amount + total);

        prop_assert!(ledger.reverse_increase(applied.increase.id, admin).unwrap());
        let after = ledger.verify_account(account.id).unwrap();
        prop_assert_eq!(after.account.allocated_amount, before.account.allocated_amount);
        prop_assert_eq!(after.account.balance_amount, before.account.balance_amount);
        for (b, a) in before.items.iter().zip(&after.items) {
            prop_assert_eq!(b.allocated_amount, a.allocated_amount);
            prop_assert_eq!(b.balance_amount, a.balance_amount);
        }
    }
}
