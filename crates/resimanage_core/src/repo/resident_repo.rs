//! Resident repository: the minimal surface household flows rely on.
//!
//! # Invariants
//! - `residents.household_id` is only a denormalized hint and is kept in step
//!   by household use-cases; membership rows stay authoritative.
//! - Clearing a link never touches residents linked to another household.

use crate::model::household::{normalize_text, HouseholdId, ResidentId};
use crate::model::resident::Resident;
use crate::repo::{
    bool_to_int, ensure_connection_ready, numbered_placeholders, parse_flag, parse_optional_uuid,
    parse_uuid, RepoError, RepoResult, TableSpec,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};

const RESIDENT_TABLES: &[TableSpec] = &[TableSpec {
    name: "residents",
    columns: &["id", "full_name", "household_id", "is_deleted"],
}];

/// Repository interface for resident records.
pub trait ResidentRepository {
    fn create_resident(&self, resident: &Resident) -> RepoResult<ResidentId>;
    fn get_resident(&self, id: ResidentId) -> RepoResult<Option<Resident>>;
    /// Points the given residents at `household_id`.
    fn set_household_link(
        &self,
        household_id: HouseholdId,
        resident_ids: &[ResidentId],
    ) -> RepoResult<()>;
    /// Nulls the link of the given residents still pointing at `household_id`.
    fn clear_household_link(
        &self,
        household_id: HouseholdId,
        resident_ids: &[ResidentId],
    ) -> RepoResult<()>;
}

/// SQLite-backed resident repository.
pub struct SqliteResidentRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteResidentRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, RESIDENT_TABLES)?;
        Ok(Self { conn })
    }
}

impl ResidentRepository for SqliteResidentRepository<'_> {
    fn create_resident(&self, resident: &Resident) -> RepoResult<ResidentId> {
        let full_name = normalize_text(&resident.full_name);
        if resident.id.is_nil() || full_name.is_empty() {
            return Err(RepoError::InvalidData(
                "resident requires a non-nil id and a full name".to_string(),
            ));
        }

        self.conn.execute(
            "INSERT INTO residents (id, full_name, household_id, is_deleted)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                resident.id.to_string(),
                full_name,
                resident.household_id.map(|id| id.to_string()),
                bool_to_int(resident.is_deleted),
            ],
        )?;
        Ok(resident.id)
    }

    fn get_resident(&self, id: ResidentId) -> RepoResult<Option<Resident>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, full_name, household_id, is_deleted
             FROM residents
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let id_text: String = row.get("id")?;
        Ok(Some(Resident {
            id: parse_uuid(&id_text, "residents.id")?,
            full_name: row.get("full_name")?,
            household_id: parse_optional_uuid(row.get("household_id")?, "residents.household_id")?,
            is_deleted: parse_flag(row.get("is_deleted")?, "residents.is_deleted")?,
        }))
    }

    fn set_household_link(
        &self,
        household_id: HouseholdId,
        resident_ids: &[ResidentId],
    ) -> RepoResult<()> {
        if resident_ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE residents SET household_id = ?1 WHERE id IN ({});",
            numbered_placeholders(2, resident_ids.len())
        );
        self.conn
            .execute(&sql, params_from_iter(bind_ids(household_id, resident_ids)))?;
        Ok(())
    }

    fn clear_household_link(
        &self,
        household_id: HouseholdId,
        resident_ids: &[ResidentId],
    ) -> RepoResult<()> {
        if resident_ids.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE residents
             SET household_id = NULL
             WHERE household_id = ?1
               AND id IN ({});",
            numbered_placeholders(2, resident_ids.len())
        );
        self.conn
            .execute(&sql, params_from_iter(bind_ids(household_id, resident_ids)))?;
        Ok(())
    }
}

fn bind_ids(household_id: HouseholdId, resident_ids: &[ResidentId]) -> Vec<Value> {
    let mut bind_values = Vec::with_capacity(resident_ids.len() + 1);
    bind_values.push(Value::Text(household_id.to_string()));
    bind_values.extend(resident_ids.iter().map(|id| Value::Text(id.to_string())));
    bind_values
}
