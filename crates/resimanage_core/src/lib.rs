//! Core domain logic for the residential community registry.
//! This crate owns household membership invariants and their reconciliation.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::household::{
    Household, HouseholdDraft, HouseholdId, HouseholdProfile, HouseholdRecordUpdate,
    MembershipRow, RelationshipMap, ResidentId, ValidationError,
};
pub use model::resident::Resident;
pub use repo::household_repo::{HouseholdListQuery, HouseholdRepository, SqliteHouseholdRepository};
pub use repo::membership_repo::MembershipStore;
pub use repo::resident_repo::{ResidentRepository, SqliteResidentRepository};
pub use repo::{RepoError, RepoResult};
pub use service::household_service::{DeleteOutcome, HouseholdService, HouseholdServiceError};
pub use service::reconcile::{plan_membership, reconcile, MembershipPlan, ReconciliationResult};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
