//! Property-based tests for band resolution.

use proptest::prelude::*;
use procura_shared::types::{DepartmentId, UserId};
use rust_decimal::Decimal;

use crate::workflow::error::WorkflowError;
use crate::workflow::rules::{ApprovalRuleResolver, BudgetApprovalRule};

/// Strategy for disjoint, adjacent bands: `[0, c1-1], [c1, c2-1], ...`.
fn arb_cut_points() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(1i64..10_000, 1..6).prop_map(|widths| {
        let mut cuts = vec![0];
        for w in widths {
            let last = *cuts.last().unwrap_or(&0);
            cuts.push(last + w);
        }
        cuts
    })
}

fn bands(dept: DepartmentId, cuts: &[i64]) -> Vec<BudgetApprovalRule> {
    cuts.windows(2)
        .map(|w| {
            BudgetApprovalRule::new(
                dept,
                UserId::new(),
                Decimal::from(w[0]),
                Decimal::from(w[1] - 1),
            )
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every covered amount resolves to the single band containing it.
    #[test]
    fn prop_disjoint_bands_resolve_uniquely(
        cuts in arb_cut_points(),
        pick in any::<prop::sample::Index>(),
    ) {
        let dept = DepartmentId::new();
        let rules = bands(dept, &cuts);
        let top = *cuts.last().unwrap_or(&1) - 1;
        let index = pick.index(usize::try_from(top + 1).unwrap());
        let amount = Decimal::from(i64::try_from(index).unwrap());

        let chosen = ApprovalRuleResolver::select_rule(&rules, dept, amount).unwrap();
        prop_assert!(chosen.contains(amount));
        prop_assert_eq!(rules.iter().filter(|r| r.contains(amount)).count(), 1);
    }

    /// Amounts past the last band never resolve.
    #[test]
    fn prop_amount_above_bands_has_no_rule(cuts in arb_cut_points(), extra in 0i64..1_000) {
        let dept = DepartmentId::new();
        let rules = bands(dept, &cuts);
        let amount = Decimal::from(*cuts.last().unwrap_or(&0) + extra);

        let result = ApprovalRuleResolver::select_rule(&rules, dept, amount);
        let is_no_match = matches!(result, Err(WorkflowError::NoMatchingRule { .. }));
        prop_assert!(is_no_match);
    }

    /// Disjoint bands validate against each other; any band inside the covered range does not.
    #[test]
    fn prop_validate_rejects_any_overlap(
        cuts in arb_cut_points(),
        lo in 0i64..10_000,
        width in 0i64..500,
    ) {
        let dept = DepartmentId::new();
        let rules = bands(dept, &cuts);
        for rule in &rules {
            prop_assert!(ApprovalRuleResolver::validate_rule(rule, &rules).is_ok());
        }

        let top = *cuts.last().unwrap_or(&0);
        let candidate = BudgetApprovalRule::new(
            dept,
            UserId::new(),
            Decimal::from(lo),
            Decimal::from(lo + width),
        );
        let result = ApprovalRuleResolver::validate_rule(&candidate, &rules);
        if lo < top {
            let is_overlap = matches!(result, Err(WorkflowError::RuleOverlap { .. }));
            prop_assert!(is_overlap);
        } else {
            prop_assert!(result.is_ok());
        }
    }
}
