//! Resident domain model.
//!
//! # Invariants
//! - `household_id` is a denormalized hint; `household_members` rows are
//!   authoritative for membership.

use crate::model::household::{normalize_text, HouseholdId, ResidentId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Person registered in the community, with or without a household.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resident {
    pub id: ResidentId,
    pub full_name: String,
    pub household_id: Option<HouseholdId>,
    pub is_deleted: bool,
}

impl Resident {
    /// Creates a resident with a generated id and no household link.
    pub fn new(full_name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), full_name)
    }

    /// Creates a resident with a caller-provided id.
    pub fn with_id(id: ResidentId, full_name: impl Into<String>) -> Self {
        Self {
            id,
            full_name: normalize_text(&full_name.into()),
            household_id: None,
            is_deleted: false,
        }
    }
}
