//! Household membership association storage.
//!
//! # Responsibility
//! - Define the persistence collaborator consumed by the reconciler.
//! - Implement batched membership writes on SQLite.
//!
//! # Invariants
//! - Each batched operation issues at most one SQL statement.
//! - Empty batches are no-ops and never touch storage.
//! - Rows are keyed by the composite `(household_id, resident_id)`.

use crate::model::household::{Household, HouseholdId, HouseholdRecordUpdate, MembershipRow, ResidentId};
use crate::repo::household_repo::{load_household, SqliteHouseholdRepository};
use crate::repo::{bool_to_int, numbered_placeholders, parse_uuid, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::params_from_iter;

/// Persistence operations required to reconcile one household's members.
pub trait MembershipStore {
    /// Returns the persisted member rows of one household.
    fn fetch_members(&self, household_id: HouseholdId) -> RepoResult<Vec<MembershipRow>>;
    /// Deletes the rows of the given residents in one call.
    fn delete_members(&self, household_id: HouseholdId, resident_ids: &[ResidentId])
        -> RepoResult<()>;
    /// Inserts the given rows in one call.
    fn insert_members(&self, household_id: HouseholdId, rows: &[MembershipRow]) -> RepoResult<()>;
    /// Writes head and scalar fields, returning the refreshed record.
    fn update_household_record(
        &self,
        household_id: HouseholdId,
        update: &HouseholdRecordUpdate,
    ) -> RepoResult<Household>;
}

impl MembershipStore for SqliteHouseholdRepository<'_> {
    fn fetch_members(&self, household_id: HouseholdId) -> RepoResult<Vec<MembershipRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT resident_id, relationship
             FROM household_members
             WHERE household_id = ?1
             ORDER BY resident_id ASC;",
        )?;
        let mut rows = stmt.query([household_id.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            let resident_text: String = row.get("resident_id")?;
            members.push(MembershipRow::new(
                household_id,
                parse_uuid(&resident_text, "household_members.resident_id")?,
                row.get("relationship")?,
            ));
        }
        Ok(members)
    }

    fn delete_members(
        &self,
        household_id: HouseholdId,
        resident_ids: &[ResidentId],
    ) -> RepoResult<()> {
        if resident_ids.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "DELETE FROM household_members
             WHERE household_id = ?1
               AND resident_id IN ({});",
            numbered_placeholders(2, resident_ids.len())
        );
        let mut bind_values = Vec::with_capacity(resident_ids.len() + 1);
        bind_values.push(Value::Text(household_id.to_string()));
        bind_values.extend(resident_ids.iter().map(|id| Value::Text(id.to_string())));

        self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(())
    }

    fn insert_members(&self, household_id: HouseholdId, rows: &[MembershipRow]) -> RepoResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut values_sql = Vec::with_capacity(rows.len());
        let mut bind_values = Vec::with_capacity(rows.len() * 3);
        for (index, row) in rows.iter().enumerate() {
            if row.household_id != household_id {
                return Err(RepoError::InvalidData(format!(
                    "membership row for household {} submitted to household {household_id}",
                    row.household_id
                )));
            }
            let base = index * 3;
            values_sql.push(format!("(?{}, ?{}, ?{})", base + 1, base + 2, base + 3));
            bind_values.push(Value::Text(household_id.to_string()));
            bind_values.push(Value::Text(row.resident_id.to_string()));
            bind_values.push(match row.relationship.as_ref() {
                Some(label) => Value::Text(label.clone()),
                None => Value::Null,
            });
        }

        let sql = format!(
            "INSERT INTO household_members (household_id, resident_id, relationship)
             VALUES {};",
            values_sql.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(bind_values))?;
        Ok(())
    }

    fn update_household_record(
        &self,
        household_id: HouseholdId,
        update: &HouseholdRecordUpdate,
    ) -> RepoResult<Household> {
        let profile = &update.profile;
        let bind_values: Vec<Value> = vec![
            Value::Text(household_id.to_string()),
            Value::Text(update.name.clone()),
            Value::Text(update.address.clone()),
            Value::Text(update.unit.clone()),
            optional_text(update.head_of_household_id.map(|id| id.to_string())),
            Value::Integer(bool_to_int(profile.is_business)),
            optional_text(profile.business_name.clone()),
            optional_text(profile.business_license_number.clone()),
            optional_text(profile.business_license_date.clone()),
            optional_text(profile.business_owner_id.map(|id| id.to_string())),
            optional_text(profile.business_manager_id.map(|id| id.to_string())),
            optional_text(profile.land_plot_number.clone()),
            optional_text(profile.land_map_sheet_number.clone()),
            optional_text(profile.certificate_issue_number.clone()),
            optional_text(profile.certificate_registry_number.clone()),
            profile.business_area.map_or(Value::Null, Value::Real),
            profile
                .business_construction_year
                .map_or(Value::Null, |year| Value::Integer(i64::from(year))),
            profile
                .business_floors
                .map_or(Value::Null, |floors| Value::Integer(i64::from(floors))),
            profile
                .business_rooms
                .map_or(Value::Null, |rooms| Value::Integer(i64::from(rooms))),
            optional_text(profile.business_sector.clone()),
            Value::Integer(bool_to_int(profile.is_poor_household)),
            optional_text(profile.poor_household_notes.clone()),
            Value::Integer(bool_to_int(profile.is_policy_household)),
            optional_text(profile.policy_household_notes.clone()),
        ];

        let changed = self.conn.execute(
            "UPDATE households
             SET
                name = ?2,
                address = ?3,
                unit = ?4,
                head_of_household_id = ?5,
                is_business = ?6,
                business_name = ?7,
                business_license_number = ?8,
                business_license_date = ?9,
                business_owner_id = ?10,
                business_manager_id = ?11,
                land_plot_number = ?12,
                land_map_sheet_number = ?13,
                certificate_issue_number = ?14,
                certificate_registry_number = ?15,
                business_area = ?16,
                business_construction_year = ?17,
                business_floors = ?18,
                business_rooms = ?19,
                business_sector = ?20,
                is_poor_household = ?21,
                poor_household_notes = ?22,
                is_policy_household = ?23,
                policy_household_notes = ?24,
                revision = revision + 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND is_deleted = 0;",
            params_from_iter(bind_values),
        )?;

        if changed == 0 {
            return Err(RepoError::HouseholdNotFound(household_id));
        }

        load_household(self.conn, household_id, false)?
            .ok_or(RepoError::HouseholdNotFound(household_id))
    }
}

fn optional_text(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::Text)
}
