//! Amount-banded approval authority.
//!
//! Each department maps inclusive `[min_amount, max_amount]` bands to an
//! approver. Live bands of one department never overlap; creation and
//! update enforce that before anything is persisted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use procura_shared::types::{ApprovalRuleId, DepartmentId, PageRequest, PageResponse, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::audit::{AuditAction, AuditEntity, AuditEvent, RecordStatus};
use crate::store::{AuditLog, LockRegistry, RuleStore};
use crate::workflow::error::WorkflowError;

/// Maps an amount band of a department to an approver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetApprovalRule {
    /// Rule ID. Lower IDs are older.
    pub id: ApprovalRuleId,
    /// Department the band belongs to.
    pub department_id: DepartmentId,
    /// Approver for amounts inside the band.
    pub approver_id: UserId,
    /// Inclusive lower bound.
    pub min_amount: Decimal,
    /// Inclusive upper bound.
    pub max_amount: Decimal,
    /// Record status.
    pub status: RecordStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl BudgetApprovalRule {
    /// Creates a live rule.
    #[must_use]
    pub fn new(
        department_id: DepartmentId,
        approver_id: UserId,
        min_amount: Decimal,
        max_amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ApprovalRuleId::new(),
            department_id,
            approver_id,
            min_amount,
            max_amount,
            status: RecordStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns true if the band contains `amount`.
    #[must_use]
    pub fn contains(&self, amount: Decimal) -> bool {
        self.min_amount <= amount && amount <= self.max_amount
    }

    /// Width of the band.
    #[must_use]
    pub fn span(&self) -> Decimal {
        self.max_amount - self.min_amount
    }

    /// Returns true if the two bands share at least one amount.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min_amount <= other.max_amount && other.min_amount <= self.max_amount
    }
}

/// Input for creating a rule.
#[derive(Debug, Clone)]
pub struct NewApprovalRule {
    /// Department.
    pub department_id: DepartmentId,
    /// Approver.
    pub approver_id: UserId,
    /// Inclusive lower bound.
    pub min_amount: Decimal,
    /// Inclusive upper bound.
    pub max_amount: Decimal,
}

/// Changes applied by [`ApprovalRuleResolver::update_rule`]. `None` keeps the value.
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    /// New approver.
    pub approver_id: Option<UserId>,
    /// New lower bound.
    pub min_amount: Option<Decimal>,
    /// New upper bound.
    pub max_amount: Option<Decimal>,
}

/// Resolves approvers from rule bands and administers the bands.
pub struct ApprovalRuleResolver {
    rules: Arc<dyn RuleStore>,
    audit: Arc<dyn AuditLog>,
    locks: Arc<LockRegistry>,
}

impl ApprovalRuleResolver {
    /// Creates a resolver over the given collaborators.
    pub fn new(
        rules: Arc<dyn RuleStore>,
        audit: Arc<dyn AuditLog>,
        locks: Arc<LockRegistry>,
    ) -> Self {
        Self {
            rules,
            audit,
            locks,
        }
    }

    /// Picks the live rule of `department_id` covering `amount`.
    ///
    /// Several matches are tolerated only when they merely touch at
    /// `amount` (two adjacent bands sharing a boundary). The narrower band
    /// wins, then the oldest rule. Any wider overlap is reported as
    /// [`WorkflowError::AmbiguousRule`].
    pub fn select_rule(
        rules: &[BudgetApprovalRule],
        department_id: DepartmentId,
        amount: Decimal,
    ) -> Result<&BudgetApprovalRule, WorkflowError> {
        let matches: Vec<&BudgetApprovalRule> = rules
            .iter()
            .filter(|r| r.status.is_active())
            .filter(|r| r.department_id == department_id)
            .filter(|r| r.contains(amount))
            .collect();

        match matches.len() {
            0 => {
                error!(
                    department_id = %department_id,
                    amount = %amount,
                    "no approval rule covers amount"
                );
                Err(WorkflowError::NoMatchingRule {
                    department_id,
                    amount,
                })
            }
            1 => Ok(matches[0]),
            _ => {
                let boundary_only = matches.iter().enumerate().all(|(i, a)| {
                    matches[i + 1..].iter().all(|b| {
                        a.min_amount.max(b.min_amount) == amount
                            && a.max_amount.min(b.max_amount) == amount
                    })
                });
                let rule_ids: Vec<ApprovalRuleId> = matches.iter().map(|r| r.id).collect();

                if !boundary_only {
                    error!(
                        department_id = %department_id,
                        amount = %amount,
                        rules = ?rule_ids,
                        "overlapping approval rules cover amount"
                    );
                    return Err(WorkflowError::AmbiguousRule {
                        department_id,
                        amount,
                        rule_ids,
                    });
                }

                let chosen = matches
                    .into_iter()
                    .min_by_key(|r| (r.span(), r.id))
                    .ok_or(WorkflowError::NoMatchingRule {
                        department_id,
                        amount,
                    })?;
                warn!(
                    department_id = %department_id,
                    amount = %amount,
                    rules = ?rule_ids,
                    chosen = %chosen.id,
                    "approval rules share a boundary, applied tie-break"
                );
                Ok(chosen)
            }
        }
    }

    /// Checks a candidate band against the live bands of its department.
    pub fn validate_rule(
        candidate: &BudgetApprovalRule,
        existing: &[BudgetApprovalRule],
    ) -> Result<(), WorkflowError> {
        if candidate.min_amount < Decimal::ZERO || candidate.min_amount > candidate.max_amount {
            return Err(WorkflowError::InvalidBand {
                min_amount: candidate.min_amount,
                max_amount: candidate.max_amount,
            });
        }

        let clash = existing.iter().find(|r| {
            r.id != candidate.id
                && r.status.is_active()
                && r.department_id == candidate.department_id
                && r.overlaps(candidate)
        });
        if let Some(existing) = clash {
            return Err(WorkflowError::RuleOverlap {
                existing: existing.id,
                min_amount: candidate.min_amount,
                max_amount: candidate.max_amount,
            });
        }
        Ok(())
    }

    /// Resolves the approver for an amount in a department.
    pub fn resolve_approver(
        &self,
        department_id: DepartmentId,
        amount: Decimal,
    ) -> Result<UserId, WorkflowError> {
        let rules = self.rules.rules_for_department(department_id)?;
        let rule = Self::select_rule(&rules, department_id, amount)?;
        Ok(rule.approver_id)
    }

    /// Creates a rule after checking it against the live bands.
    pub fn create_rule(
        &self,
        input: NewApprovalRule,
        actor: UserId,
    ) -> Result<BudgetApprovalRule, WorkflowError> {
        let candidate = BudgetApprovalRule::new(
            input.department_id,
            input.approver_id,
            input.min_amount,
            input.max_amount,
        );

        let _guard = self.locks.lock(input.department_id)?;
        let existing = self.rules.rules_for_department(input.department_id)?;
        Self::validate_rule(&candidate, &existing)?;

        let rule = self.rules.save_rule(candidate)?;
        self.audit.append(
            AuditEvent::new(AuditEntity::ApprovalRule, rule.id.into(), AuditAction::Created)
                .by(actor)
                .with_detail(band_detail(&rule)),
        )?;

        info!(rule_id = %rule.id, department_id = %rule.department_id, "approval rule created");
        Ok(rule)
    }

    /// Updates the approver or band of a live rule.
    pub fn update_rule(
        &self,
        id: ApprovalRuleId,
        update: RuleUpdate,
        actor: UserId,
    ) -> Result<BudgetApprovalRule, WorkflowError> {
        let department_id = self.live_rule(id)?.department_id;

        let _guard = self.locks.lock(department_id)?;
        let mut rule = self.live_rule(id)?;
        if let Some(approver_id) = update.approver_id {
            rule.approver_id = approver_id;
        }
        if let Some(min_amount) = update.min_amount {
            rule.min_amount = min_amount;
        }
        if let Some(max_amount) = update.max_amount {
            rule.max_amount = max_amount;
        }
        rule.updated_at = Utc::now();

        let existing = self.rules.rules_for_department(department_id)?;
        Self::validate_rule(&rule, &existing)?;

        let rule = self.rules.save_rule(rule)?;
        self.audit.append(
            AuditEvent::new(AuditEntity::ApprovalRule, rule.id.into(), AuditAction::Updated)
                .by(actor)
                .with_detail(band_detail(&rule)),
        )?;

        info!(rule_id = %rule.id, "approval rule updated");
        Ok(rule)
    }

    /// Soft-deletes a rule. Its band becomes free for new rules.
    pub fn delete_rule(
        &self,
        id: ApprovalRuleId,
        actor: UserId,
    ) -> Result<BudgetApprovalRule, WorkflowError> {
        let department_id = self.live_rule(id)?.department_id;

        let _guard = self.locks.lock(department_id)?;
        let mut rule = self.live_rule(id)?;
        rule.status = RecordStatus::Deleted;
        rule.updated_at = Utc::now();

        let rule = self.rules.save_rule(rule)?;
        self.audit.append(
            AuditEvent::new(AuditEntity::ApprovalRule, rule.id.into(), AuditAction::Deleted)
                .by(actor),
        )?;

        info!(rule_id = %rule.id, "approval rule deleted");
        Ok(rule)
    }

    /// Lists live rules, optionally for one department.
    pub fn list_rules(
        &self,
        department_id: Option<DepartmentId>,
        page: &PageRequest,
    ) -> Result<PageResponse<BudgetApprovalRule>, WorkflowError> {
        Ok(self.rules.query_rules(department_id, page)?)
    }

    fn live_rule(&self, id: ApprovalRuleId) -> Result<BudgetApprovalRule, WorkflowError> {
        self.rules
            .load_rule(id)?
            .filter(|r| r.status.is_active())
            .ok_or(WorkflowError::RuleNotFound(id))
    }
}

fn band_detail(rule: &BudgetApprovalRule) -> serde_json::Value {
    json!({
        "department_id": rule.department_id,
        "approver_id": rule.approver_id,
        "min_amount": rule.min_amount,
        "max_amount": rule.max_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn rule(
        dept: DepartmentId,
        approver: UserId,
        min: Decimal,
        max: Decimal,
    ) -> BudgetApprovalRule {
        BudgetApprovalRule::new(dept, approver, min, max)
    }

    fn resolver() -> (ApprovalRuleResolver, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let resolver = ApprovalRuleResolver::new(
            store.clone(),
            store.clone(),
            Arc::new(LockRegistry::new()),
        );
        (resolver, store)
    }

    #[rstest]
    #[case(dec!(0), true)]
    #[case(dec!(999), true)]
    #[case(dec!(1000), false)]
    fn test_band_is_inclusive(#[case] amount: Decimal, #[case] expected: bool) {
        let r = rule(DepartmentId::new(), UserId::new(), dec!(0), dec!(999));
        assert_eq!(r.contains(amount), expected);
    }

    #[test]
    fn test_resolve_by_band() {
        let (resolver, _) = resolver();
        let dept = DepartmentId::new();
        let a = UserId::new();
        let b = UserId::new();
        let admin = UserId::new();

        for (approver, min, max) in [(a, dec!(0), dec!(999)), (b, dec!(1000), dec!(5000))] {
            resolver
                .create_rule(
                    NewApprovalRule {
                        department_id: dept,
                        approver_id: approver,
                        min_amount: min,
                        max_amount: max,
                    },
                    admin,
                )
                .unwrap();
        }

        assert_eq!(resolver.resolve_approver(dept, dec!(999)).unwrap(), a);
        assert_eq!(resolver.resolve_approver(dept, dec!(1000)).unwrap(), b);
        assert!(matches!(
            resolver.resolve_approver(dept, dec!(6000)),
            Err(WorkflowError::NoMatchingRule { .. })
        ));
    }

    #[test]
    fn test_other_departments_are_ignored() {
        let dept = DepartmentId::new();
        let rules = vec![rule(DepartmentId::new(), UserId::new(), dec!(0), dec!(100))];
        assert!(matches!(
            ApprovalRuleResolver::select_rule(&rules, dept, dec!(50)),
            Err(WorkflowError::NoMatchingRule { .. })
        ));
    }

    #[test]
    fn test_deleted_rules_are_ignored() {
        let dept = DepartmentId::new();
        let mut deleted = rule(dept, UserId::new(), dec!(0), dec!(100));
        deleted.status = RecordStatus::Deleted;
        let live = rule(dept, UserId::new(), dec!(0), dec!(100));
        let rules = vec![deleted, live.clone()];

        let chosen = ApprovalRuleResolver::select_rule(&rules, dept, dec!(50)).unwrap();
        assert_eq!(chosen.id, live.id);
    }

    #[test]
    fn test_shared_boundary_prefers_narrower_band() {
        let dept = DepartmentId::new();
        let wide = rule(dept, UserId::new(), dec!(0), dec!(1000));
        let narrow = rule(dept, UserId::new(), dec!(1000), dec!(1500));
        let rules = vec![wide, narrow.clone()];

        let chosen = ApprovalRuleResolver::select_rule(&rules, dept, dec!(1000)).unwrap();
        assert_eq!(chosen.id, narrow.id);
    }

    #[test]
    fn test_shared_boundary_equal_span_prefers_oldest() {
        let dept = DepartmentId::new();
        let older = rule(dept, UserId::new(), dec!(0), dec!(1000));
        let newer = rule(dept, UserId::new(), dec!(1000), dec!(2000));
        assert!(older.id < newer.id);
        let rules = vec![newer, older.clone()];

        let chosen = ApprovalRuleResolver::select_rule(&rules, dept, dec!(1000)).unwrap();
        assert_eq!(chosen.id, older.id);
    }

    #[test]
    fn test_real_overlap_is_ambiguous() {
        let dept = DepartmentId::new();
        let rules = vec![
            rule(dept, UserId::new(), dec!(0), dec!(2000)),
            rule(dept, UserId::new(), dec!(1000), dec!(3000)),
        ];

        let err = ApprovalRuleResolver::select_rule(&rules, dept, dec!(1500)).unwrap_err();
        match err {
            WorkflowError::AmbiguousRule { rule_ids, .. } => assert_eq!(rule_ids.len(), 2),
            other => panic!("expected AmbiguousRule, got {other:?}"),
        }
    }

    #[rstest]
    #[case(dec!(0), dec!(499), true)]
    #[case(dec!(500), dec!(1500), false)]
    #[case(dec!(999), dec!(999), false)]
    #[case(dec!(1000), dec!(2000), true)]
    fn test_validate_rule_overlap(#[case] min: Decimal, #[case] max: Decimal, #[case] ok: bool) {
        let dept = DepartmentId::new();
        let existing = vec![
            rule(dept, UserId::new(), dec!(500), dec!(999)),
            rule(DepartmentId::new(), UserId::new(), dec!(0), dec!(5000)),
        ];
        let candidate = rule(dept, UserId::new(), min, max);

        let result = ApprovalRuleResolver::validate_rule(&candidate, &existing);
        assert_eq!(result.is_ok(), ok, "{result:?}");
    }

    #[rstest]
    #[case(dec!(-1), dec!(10))]
    #[case(dec!(10), dec!(5))]
    fn test_validate_rule_rejects_malformed_band(#[case] min: Decimal, #[case] max: Decimal) {
        let candidate = rule(DepartmentId::new(), UserId::new(), min, max);
        assert!(matches!(
            ApprovalRuleResolver::validate_rule(&candidate, &[]),
            Err(WorkflowError::InvalidBand { .. })
        ));
    }

    #[test]
    fn test_update_may_keep_its_own_band() {
        let (resolver, _) = resolver();
        let dept = DepartmentId::new();
        let admin = UserId::new();
        let created = resolver
            .create_rule(
                NewApprovalRule {
                    department_id: dept,
                    approver_id: UserId::new(),
                    min_amount: dec!(0),
                    max_amount: dec!(999),
                },
                admin,
            )
            .unwrap();

        let new_approver = UserId::new();
        let updated = resolver
            .update_rule(
                created.id,
                RuleUpdate {
                    approver_id: Some(new_approver),
                    max_amount: Some(dec!(1999)),
                    ..RuleUpdate::default()
                },
                admin,
            )
            .unwrap();

        assert_eq!(updated.approver_id, new_approver);
        assert_eq!(updated.max_amount, dec!(1999));
        assert_eq!(resolver.resolve_approver(dept, dec!(1500)).unwrap(), new_approver);
    }

    #[test]
    fn test_create_rejects_overlap_and_persists_nothing() {
        let (resolver, _) = resolver();
        let dept = DepartmentId::new();
        let admin = UserId::new();
        let input = NewApprovalRule {
            department_id: dept,
            approver_id: UserId::new(),
            min_amount: dec!(0),
            max_amount: dec!(999),
        };
        resolver.create_rule(input.clone(), admin).unwrap();

        let overlapping = NewApprovalRule {
            min_amount: dec!(999),
            max_amount: dec!(2000),
            ..input
        };
        assert!(matches!(
            resolver.create_rule(overlapping, admin),
            Err(WorkflowError::RuleOverlap { .. })
        ));
        let page = resolver.list_rules(Some(dept), &PageRequest::default()).unwrap();
        assert_eq!(page.meta.total, 1);
    }

    #[test]
    fn test_delete_frees_band_and_is_audited() {
        let (resolver, store) = resolver();
        let dept = DepartmentId::new();
        let admin = UserId::new();
        let input = NewApprovalRule {
            department_id: dept,
            approver_id: UserId::new(),
            min_amount: dec!(0),
            max_amount: dec!(999),
        };
        let created = resolver.create_rule(input.clone(), admin).unwrap();
        let deleted = resolver.delete_rule(created.id, admin).unwrap();
        assert_eq!(deleted.status, RecordStatus::Deleted);

        assert!(matches!(
            resolver.resolve_approver(dept, dec!(10)),
            Err(WorkflowError::NoMatchingRule { .. })
        ));
        assert!(matches!(
            resolver.delete_rule(created.id, admin),
            Err(WorkflowError::RuleNotFound(_))
        ));
        resolver.create_rule(input, admin).unwrap();

        let actions: Vec<AuditAction> = store
            .events_for(created.id.into())
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec![AuditAction::Created, AuditAction::Deleted]);
    }
}
