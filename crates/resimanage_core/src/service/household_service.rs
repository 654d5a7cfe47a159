//! Household use-case service.
//!
//! # Responsibility
//! - Run household create/save/delete flows as single storage transactions.
//! - Detect stale edits through the household revision counter.
//! - Keep the denormalized `residents.household_id` hint in step.
//!
//! # Invariants
//! - A failed create/save leaves no partial membership writes behind.
//! - A save with a stale `expected_revision` writes nothing.
//! - Soft delete is only used when hard delete fails at the storage level.

use crate::model::household::{Household, HouseholdDraft, HouseholdId, ResidentId, ValidationError};
use crate::repo::household_repo::{HouseholdListQuery, HouseholdRepository, SqliteHouseholdRepository};
use crate::repo::resident_repo::{ResidentRepository, SqliteResidentRepository};
use crate::repo::{RepoError, RepoResult};
use crate::service::reconcile::{reconcile, ReconciliationResult};
use log::{error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Service error for household use-cases.
#[derive(Debug)]
pub enum HouseholdServiceError {
    /// Draft failed scalar validation.
    Validation(ValidationError),
    /// Target household does not exist or is soft-deleted.
    HouseholdNotFound(HouseholdId),
    /// Caller edited from a revision that is no longer current.
    RevisionConflict {
        household_id: HouseholdId,
        expected: u64,
        actual: u64,
    },
    /// Persistence-layer failure.
    Repo(RepoError),
    /// Internal consistency mismatch between write and read-back.
    InconsistentState(&'static str),
}

impl Display for HouseholdServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::HouseholdNotFound(id) => write!(f, "household not found: {id}"),
            Self::RevisionConflict {
                household_id,
                expected,
                actual,
            } => write!(
                f,
                "household {household_id} was edited concurrently: expected revision {expected}, found {actual}"
            ),
            Self::Repo(err) => write!(f, "{err}"),
            Self::InconsistentState(details) => {
                write!(f, "inconsistent household state: {details}")
            }
        }
    }
}

impl Error for HouseholdServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for HouseholdServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::HouseholdNotFound(id) => Self::HouseholdNotFound(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl From<ValidationError> for HouseholdServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<rusqlite::Error> for HouseholdServiceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

/// How a household delete was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Record, membership rows and resident links were removed.
    Removed,
    /// Storage refused the delete; the record was tombstoned instead.
    SoftDeleted,
}

/// Household service facade over a SQLite connection.
pub struct HouseholdService<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> HouseholdService<'conn> {
    /// Constructs a service from a migrated/ready connection.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        SqliteHouseholdRepository::try_new(conn)?;
        SqliteResidentRepository::try_new(conn)?;
        Ok(Self { conn })
    }

    /// Creates a household and its membership rows in one transaction.
    ///
    /// The returned record reflects the first reconciliation, so its
    /// `revision` starts at 1.
    pub fn create_household(
        &mut self,
        draft: &HouseholdDraft,
    ) -> Result<Household, HouseholdServiceError> {
        let started_at = Instant::now();
        info!("event=household_create module=service status=start");

        match self.create_household_in_tx(draft) {
            Ok(result) => {
                info!(
                    "event=household_create module=service status=ok household_id={} members={} duration_ms={}",
                    result.household.id,
                    result.final_members.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(result.household)
            }
            Err(err) => {
                error!(
                    "event=household_create module=service status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Saves the desired state of an existing household.
    ///
    /// # Contract
    /// - Membership, resident links and the household record are written in
    ///   one IMMEDIATE transaction; any error rolls everything back.
    /// - With `expected_revision = Some(r)` the save is rejected with
    ///   `RevisionConflict` unless the stored revision is still `r`.
    pub fn save_household(
        &mut self,
        household_id: HouseholdId,
        draft: &HouseholdDraft,
        expected_revision: Option<u64>,
    ) -> Result<ReconciliationResult, HouseholdServiceError> {
        let started_at = Instant::now();
        info!("event=household_save module=service status=start household_id={household_id}");

        match self.save_household_in_tx(household_id, draft, expected_revision) {
            Ok(result) => {
                info!(
                    "event=household_save module=service status=ok household_id={household_id} removed={} added={} relabeled={} revision={} duration_ms={}",
                    result.removed.len(),
                    result.added.len(),
                    result.relabeled.len(),
                    result.household.revision,
                    started_at.elapsed().as_millis()
                );
                Ok(result)
            }
            Err(err) => {
                error!(
                    "event=household_save module=service status=error household_id={household_id} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Gets one active household by id.
    pub fn get_household(
        &self,
        household_id: HouseholdId,
    ) -> Result<Option<Household>, HouseholdServiceError> {
        let households = SqliteHouseholdRepository::try_new(self.conn)?;
        Ok(households.get_household(household_id, false)?)
    }

    /// Lists households using unit filter and pagination.
    pub fn list_households(
        &self,
        query: &HouseholdListQuery,
    ) -> Result<Vec<Household>, HouseholdServiceError> {
        let households = SqliteHouseholdRepository::try_new(self.conn)?;
        Ok(households.list_households(query)?)
    }

    /// Deletes a household, falling back to a soft delete when storage
    /// rejects the hard delete.
    pub fn delete_household(
        &mut self,
        household_id: HouseholdId,
    ) -> Result<DeleteOutcome, HouseholdServiceError> {
        let started_at = Instant::now();
        info!("event=household_delete module=service status=start household_id={household_id}");

        match hard_delete_in_tx(self.conn, household_id) {
            Ok(()) => {
                info!(
                    "event=household_delete module=service status=ok mode=hard household_id={household_id} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(DeleteOutcome::Removed)
            }
            Err(RepoError::Db(err)) => {
                warn!(
                    "event=household_delete module=service status=fallback mode=soft household_id={household_id} error={err}"
                );
                SqliteHouseholdRepository::try_new(self.conn)?.soft_delete_household(household_id)?;
                info!(
                    "event=household_delete module=service status=ok mode=soft household_id={household_id} duration_ms={}",
                    started_at.elapsed().as_millis()
                );
                Ok(DeleteOutcome::SoftDeleted)
            }
            Err(other) => {
                error!(
                    "event=household_delete module=service status=error household_id={household_id} duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    other
                );
                Err(other.into())
            }
        }
    }

    fn create_household_in_tx(
        &mut self,
        draft: &HouseholdDraft,
    ) -> Result<ReconciliationResult, HouseholdServiceError> {
        draft.validate()?;
        let record = draft.record_update();
        let mut household = Household::new(record.name);
        household.address = record.address;
        household.unit = record.unit;
        household.head_of_household_id = record.head_of_household_id;
        household.profile = record.profile;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = {
            let households = SqliteHouseholdRepository::try_new(&tx)?;
            let residents = SqliteResidentRepository::try_new(&tx)?;
            let household_id = households.create_household(&household)?;
            let result = reconcile(&households, household_id, draft)?;
            residents.set_household_link(household_id, &linked_residents_of(&result.household))?;
            result
        };
        tx.commit()?;

        Ok(result)
    }

    fn save_household_in_tx(
        &mut self,
        household_id: HouseholdId,
        draft: &HouseholdDraft,
        expected_revision: Option<u64>,
    ) -> Result<ReconciliationResult, HouseholdServiceError> {
        draft.validate()?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = {
            let households = SqliteHouseholdRepository::try_new(&tx)?;
            let residents = SqliteResidentRepository::try_new(&tx)?;
            let current = households
                .get_household(household_id, false)?
                .ok_or(HouseholdServiceError::HouseholdNotFound(household_id))?;

            if let Some(expected) = expected_revision {
                if expected != current.revision {
                    return Err(HouseholdServiceError::RevisionConflict {
                        household_id,
                        expected,
                        actual: current.revision,
                    });
                }
            }

            let result = reconcile(&households, household_id, draft)?;
            if result.household.revision != current.revision + 1 {
                return Err(HouseholdServiceError::InconsistentState(
                    "household revision did not advance exactly once",
                ));
            }

            let previous = linked_residents_of(&current);
            let next = linked_residents_of(&result.household);
            let unlinked: Vec<ResidentId> = previous
                .iter()
                .filter(|id| !next.contains(*id))
                .copied()
                .collect();
            residents.clear_household_link(household_id, &unlinked)?;
            residents.set_household_link(household_id, &next)?;
            result
        };
        tx.commit()?;

        Ok(result)
    }
}

fn hard_delete_in_tx(conn: &mut Connection, household_id: HouseholdId) -> RepoResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    SqliteHouseholdRepository::try_new(&tx)?.hard_delete_household(household_id)?;
    tx.commit()?;
    Ok(())
}

/// Head plus members, deduplicated and sorted.
fn linked_residents_of(household: &Household) -> Vec<ResidentId> {
    household
        .head_of_household_id
        .into_iter()
        .chain(household.member_ids.iter().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
