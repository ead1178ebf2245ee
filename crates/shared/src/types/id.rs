//! Typed IDs for type-safe entity references.
//!
//! Using typed IDs prevents accidentally passing a `BudgetItemId` where a
//! `BudgetAccountId` is expected.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Macro to generate typed ID wrappers.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random ID using UUID v7 (time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn into_inner(self) -> Uuid {
                self.0
            }

            /// Borrows the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

typed_id!(UserId, "Unique identifier for a user (submitter or approver).");
typed_id!(DepartmentId, "Unique identifier for a department.");
typed_id!(DocumentId, "Unique identifier for an approvable document (PR, PO, receipt).");
typed_id!(
    ApprovalWorkflowId,
    "Unique identifier for an approval workflow template."
);
typed_id!(UserApprovalId, "Unique identifier for a document's approval case.");
typed_id!(ApprovalStepId, "Unique identifier for an approval step instance.");
typed_id!(ApprovalRuleId, "Unique identifier for a budget approval rule.");
typed_id!(BudgetAccountId, "Unique identifier for a budget account.");
typed_id!(BudgetItemId, "Unique identifier for a budget item.");
typed_id!(BudgetItemDetailId, "Unique identifier for a budget item detail.");
typed_id!(IncreaseBudgetId, "Unique identifier for an increase-budget transaction.");
typed_id!(PostingId, "Unique identifier for a ledger posting.");
typed_id!(FileId, "Unique identifier for an evidence file reference.");

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
