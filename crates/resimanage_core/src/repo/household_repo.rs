//! Household repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD over the `households` table.
//! - Assemble `member_ids`/`relationships` projections from membership rows.
//!
//! # Invariants
//! - Default reads exclude soft-deleted households.
//! - List order is deterministic: `created_at DESC, id ASC`.
//! - `create_household` never writes membership rows; those go through the
//!   reconciler.

use crate::model::household::{
    Household, HouseholdId, HouseholdProfile, RelationshipMap, ResidentId,
};
use crate::repo::{
    bool_to_int, ensure_connection_ready, parse_flag, parse_optional_uuid, parse_uuid, RepoError,
    RepoResult, TableSpec,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const HOUSEHOLDS_DEFAULT_LIMIT: u32 = 50;
const HOUSEHOLDS_LIMIT_MAX: u32 = 200;

pub(crate) const HOUSEHOLD_SELECT_SQL: &str = "SELECT
    id,
    name,
    address,
    unit,
    head_of_household_id,
    is_business,
    business_name,
    business_license_number,
    business_license_date,
    business_owner_id,
    business_manager_id,
    land_plot_number,
    land_map_sheet_number,
    certificate_issue_number,
    certificate_registry_number,
    business_area,
    business_construction_year,
    business_floors,
    business_rooms,
    business_sector,
    is_poor_household,
    poor_household_notes,
    is_policy_household,
    policy_household_notes,
    is_deleted,
    created_at,
    revision
FROM households";

pub(crate) const HOUSEHOLD_TABLES: &[TableSpec] = &[
    TableSpec {
        name: "households",
        columns: &[
            "id",
            "name",
            "head_of_household_id",
            "is_deleted",
            "created_at",
            "revision",
        ],
    },
    TableSpec {
        name: "household_members",
        columns: &["household_id", "resident_id", "relationship"],
    },
    TableSpec {
        name: "residents",
        columns: &["id", "household_id"],
    },
];

/// Query options for listing households.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HouseholdListQuery {
    /// Exact administrative unit filter.
    pub unit: Option<String>,
    pub include_deleted: bool,
    /// Defaults to 50 and clamps to 200.
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for household records.
pub trait HouseholdRepository {
    fn create_household(&self, household: &Household) -> RepoResult<HouseholdId>;
    fn get_household(&self, id: HouseholdId, include_deleted: bool)
        -> RepoResult<Option<Household>>;
    fn list_households(&self, query: &HouseholdListQuery) -> RepoResult<Vec<Household>>;
    fn soft_delete_household(&self, id: HouseholdId) -> RepoResult<()>;
    /// Unlinks residents, removes membership rows, then removes the record.
    fn hard_delete_household(&self, id: HouseholdId) -> RepoResult<()>;
}

/// SQLite-backed household and membership repository.
///
/// Holds a shared connection borrow so it can also run over a
/// `rusqlite::Transaction` (which derefs to `Connection`).
pub struct SqliteHouseholdRepository<'conn> {
    pub(crate) conn: &'conn Connection,
}

impl<'conn> SqliteHouseholdRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, HOUSEHOLD_TABLES)?;
        Ok(Self { conn })
    }
}

impl HouseholdRepository for SqliteHouseholdRepository<'_> {
    fn create_household(&self, household: &Household) -> RepoResult<HouseholdId> {
        household.validate()?;
        let profile = &household.profile;

        self.conn.execute(
            "INSERT INTO households (
                id,
                name,
                address,
                unit,
                head_of_household_id,
                is_business,
                business_name,
                business_license_number,
                business_license_date,
                business_owner_id,
                business_manager_id,
                land_plot_number,
                land_map_sheet_number,
                certificate_issue_number,
                certificate_registry_number,
                business_area,
                business_construction_year,
                business_floors,
                business_rooms,
                business_sector,
                is_poor_household,
                poor_household_notes,
                is_policy_household,
                policy_household_notes,
                is_deleted,
                revision
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26
            );",
            params![
                household.id.to_string(),
                household.name.as_str(),
                household.address.as_str(),
                household.unit.as_str(),
                household.head_of_household_id.map(|id| id.to_string()),
                bool_to_int(profile.is_business),
                profile.business_name.as_deref(),
                profile.business_license_number.as_deref(),
                profile.business_license_date.as_deref(),
                profile.business_owner_id.map(|id| id.to_string()),
                profile.business_manager_id.map(|id| id.to_string()),
                profile.land_plot_number.as_deref(),
                profile.land_map_sheet_number.as_deref(),
                profile.certificate_issue_number.as_deref(),
                profile.certificate_registry_number.as_deref(),
                profile.business_area,
                profile.business_construction_year,
                profile.business_floors,
                profile.business_rooms,
                profile.business_sector.as_deref(),
                bool_to_int(profile.is_poor_household),
                profile.poor_household_notes.as_deref(),
                bool_to_int(profile.is_policy_household),
                profile.policy_household_notes.as_deref(),
                bool_to_int(household.is_deleted),
                i64::try_from(household.revision).map_err(|_| {
                    RepoError::InvalidData(format!(
                        "revision {} exceeds storage range",
                        household.revision
                    ))
                })?,
            ],
        )?;

        Ok(household.id)
    }

    fn get_household(
        &self,
        id: HouseholdId,
        include_deleted: bool,
    ) -> RepoResult<Option<Household>> {
        load_household(self.conn, id, include_deleted)
    }

    fn list_households(&self, query: &HouseholdListQuery) -> RepoResult<Vec<Household>> {
        let mut sql = format!("{HOUSEHOLD_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }

        if let Some(unit) = query.unit.as_ref() {
            sql.push_str(" AND unit = ?");
            bind_values.push(Value::Text(unit.clone()));
        }

        sql.push_str(" ORDER BY created_at DESC, id ASC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(normalize_household_limit(
            query.limit,
        ))));
        if query.offset > 0 {
            sql.push_str(" OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut households = Vec::new();
        while let Some(row) = rows.next()? {
            households.push(parse_household_row(row)?);
        }

        for household in &mut households {
            attach_members(self.conn, household)?;
        }

        Ok(households)
    }

    fn soft_delete_household(&self, id: HouseholdId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE households
             SET
                is_deleted = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::HouseholdNotFound(id));
        }

        Ok(())
    }

    fn hard_delete_household(&self, id: HouseholdId) -> RepoResult<()> {
        let id_text = id.to_string();
        self.conn.execute(
            "UPDATE residents SET household_id = NULL WHERE household_id = ?1;",
            [id_text.as_str()],
        )?;
        self.conn.execute(
            "DELETE FROM household_members WHERE household_id = ?1;",
            [id_text.as_str()],
        )?;
        let changed = self
            .conn
            .execute("DELETE FROM households WHERE id = ?1;", [id_text.as_str()])?;

        if changed == 0 {
            return Err(RepoError::HouseholdNotFound(id));
        }

        Ok(())
    }
}

/// Normalizes list limit according to the household list contract.
pub fn normalize_household_limit(limit: Option<u32>) -> u32 {
    match limit {
        Some(0) | None => HOUSEHOLDS_DEFAULT_LIMIT,
        Some(value) if value > HOUSEHOLDS_LIMIT_MAX => HOUSEHOLDS_LIMIT_MAX,
        Some(value) => value,
    }
}

pub(crate) fn load_household(
    conn: &Connection,
    id: HouseholdId,
    include_deleted: bool,
) -> RepoResult<Option<Household>> {
    let mut stmt = conn.prepare(&format!(
        "{HOUSEHOLD_SELECT_SQL}
         WHERE id = ?1
           AND (?2 = 1 OR is_deleted = 0);"
    ))?;

    let mut rows = stmt.query(params![id.to_string(), bool_to_int(include_deleted)])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut household = parse_household_row(row)?;
    attach_members(conn, &mut household)?;
    household.validate()?;
    Ok(Some(household))
}

fn attach_members(conn: &Connection, household: &mut Household) -> RepoResult<()> {
    let mut stmt = conn.prepare(
        "SELECT resident_id, relationship
         FROM household_members
         WHERE household_id = ?1
         ORDER BY resident_id ASC;",
    )?;
    let mut rows = stmt.query([household.id.to_string()])?;
    let mut member_ids: Vec<ResidentId> = Vec::new();
    let mut relationships = RelationshipMap::new();
    while let Some(row) = rows.next()? {
        let resident_text: String = row.get("resident_id")?;
        let resident_id = parse_uuid(&resident_text, "household_members.resident_id")?;
        if let Some(label) = row.get::<_, Option<String>>("relationship")? {
            relationships.insert(resident_id, label);
        }
        member_ids.push(resident_id);
    }

    household.member_ids = member_ids;
    household.relationships = relationships;
    Ok(())
}

fn parse_household_row(row: &Row<'_>) -> RepoResult<Household> {
    let id_text: String = row.get("id")?;
    let revision: i64 = row.get("revision")?;

    let profile = HouseholdProfile {
        is_business: parse_flag(row.get("is_business")?, "households.is_business")?,
        business_name: row.get("business_name")?,
        business_license_number: row.get("business_license_number")?,
        business_license_date: row.get("business_license_date")?,
        business_owner_id: parse_optional_uuid(
            row.get("business_owner_id")?,
            "households.business_owner_id",
        )?,
        business_manager_id: parse_optional_uuid(
            row.get("business_manager_id")?,
            "households.business_manager_id",
        )?,
        land_plot_number: row.get("land_plot_number")?,
        land_map_sheet_number: row.get("land_map_sheet_number")?,
        certificate_issue_number: row.get("certificate_issue_number")?,
        certificate_registry_number: row.get("certificate_registry_number")?,
        business_area: row.get("business_area")?,
        business_construction_year: row.get("business_construction_year")?,
        business_floors: row.get("business_floors")?,
        business_rooms: row.get("business_rooms")?,
        business_sector: row.get("business_sector")?,
        is_poor_household: parse_flag(
            row.get("is_poor_household")?,
            "households.is_poor_household",
        )?,
        poor_household_notes: row.get("poor_household_notes")?,
        is_policy_household: parse_flag(
            row.get("is_policy_household")?,
            "households.is_policy_household",
        )?,
        policy_household_notes: row.get("policy_household_notes")?,
    };

    Ok(Household {
        id: parse_uuid(&id_text, "households.id")?,
        name: row.get("name")?,
        address: row.get("address")?,
        unit: row.get("unit")?,
        head_of_household_id: parse_optional_uuid(
            row.get("head_of_household_id")?,
            "households.head_of_household_id",
        )?,
        member_ids: Vec::new(),
        relationships: RelationshipMap::new(),
        created_at: row.get("created_at")?,
        revision: u64::try_from(revision).map_err(|_| {
            RepoError::InvalidData(format!("invalid revision `{revision}` in households.revision"))
        })?,
        is_deleted: parse_flag(row.get("is_deleted")?, "households.is_deleted")?,
        profile,
    })
}

#[cfg(test)]
mod tests {
    use super::normalize_household_limit;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(normalize_household_limit(None), 50);
        assert_eq!(normalize_household_limit(Some(0)), 50);
        assert_eq!(normalize_household_limit(Some(10)), 10);
        assert_eq!(normalize_household_limit(Some(1_000)), 200);
    }
}
