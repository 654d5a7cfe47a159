//! Household domain model.
//!
//! # Responsibility
//! - Define the household record, its classification profile and the
//!   desired-state draft collected by editing flows.
//! - Normalize free-text fields (names, labels) consistently.
//!
//! # Invariants
//! - `head_of_household_id` is never present in `member_ids`.
//! - `relationships` never contains the head.
//! - Every key in `relationships` is an element of `member_ids`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Stable household identifier.
pub type HouseholdId = Uuid;

/// Stable resident identifier.
pub type ResidentId = Uuid;

/// Relationship labels keyed by member resident id.
pub type RelationshipMap = BTreeMap<ResidentId, String>;

/// Validation failures for household records and drafts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Household id is the nil UUID.
    NilId,
    /// A referenced resident id is the nil UUID.
    NilResident,
    /// Household name is empty after normalization.
    BlankName,
    /// Head of household also appears in the member list.
    HeadListedAsMember(ResidentId),
    /// Head of household carries a relationship label.
    HeadHasRelationship(ResidentId),
    /// Relationship label for a resident that is not a member.
    OrphanRelationship(ResidentId),
    /// Member list contains the same resident twice.
    DuplicateMember(ResidentId),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "household id must not be nil"),
            Self::NilResident => write!(f, "resident id must not be nil"),
            Self::BlankName => write!(f, "household name must not be blank"),
            Self::HeadListedAsMember(id) => {
                write!(f, "head of household {id} must not be listed as a member")
            }
            Self::HeadHasRelationship(id) => {
                write!(f, "head of household {id} must not carry a relationship label")
            }
            Self::OrphanRelationship(id) => {
                write!(f, "relationship label for non-member resident {id}")
            }
            Self::DuplicateMember(id) => write!(f, "resident {id} listed as member twice"),
        }
    }
}

impl Error for ValidationError {}

/// Classification flags and metadata carried by a household.
///
/// None of these fields participate in membership reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HouseholdProfile {
    pub is_business: bool,
    pub business_name: Option<String>,
    pub business_license_number: Option<String>,
    pub business_license_date: Option<String>,
    pub business_owner_id: Option<ResidentId>,
    pub business_manager_id: Option<ResidentId>,
    /// Thửa đất số.
    pub land_plot_number: Option<String>,
    /// Tờ bản đồ số.
    pub land_map_sheet_number: Option<String>,
    pub certificate_issue_number: Option<String>,
    pub certificate_registry_number: Option<String>,
    /// Square meters.
    pub business_area: Option<f64>,
    pub business_construction_year: Option<i32>,
    pub business_floors: Option<u32>,
    pub business_rooms: Option<u32>,
    pub business_sector: Option<String>,
    pub is_poor_household: bool,
    pub poor_household_notes: Option<String>,
    pub is_policy_household: bool,
    pub policy_household_notes: Option<String>,
}

/// Canonical household record as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawHousehold")]
pub struct Household {
    pub id: HouseholdId,
    pub name: String,
    pub address: String,
    /// Administrative unit label ("tổ").
    pub unit: String,
    pub head_of_household_id: Option<ResidentId>,
    /// Non-head members, sorted by id.
    pub member_ids: Vec<ResidentId>,
    pub relationships: RelationshipMap,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Bumped on every record update; used for stale-edit detection.
    pub revision: u64,
    pub is_deleted: bool,
    #[serde(flatten)]
    pub profile: HouseholdProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHousehold {
    id: HouseholdId,
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    head_of_household_id: Option<ResidentId>,
    #[serde(default)]
    member_ids: Vec<ResidentId>,
    #[serde(default)]
    relationships: RelationshipMap,
    #[serde(default)]
    created_at: i64,
    #[serde(default)]
    revision: u64,
    #[serde(default)]
    is_deleted: bool,
    #[serde(flatten)]
    profile: HouseholdProfile,
}

impl TryFrom<RawHousehold> for Household {
    type Error = ValidationError;

    fn try_from(raw: RawHousehold) -> Result<Self, Self::Error> {
        let household = Self {
            id: raw.id,
            name: raw.name,
            address: raw.address,
            unit: raw.unit,
            head_of_household_id: raw.head_of_household_id,
            member_ids: raw.member_ids,
            relationships: raw.relationships,
            created_at: raw.created_at,
            revision: raw.revision,
            is_deleted: raw.is_deleted,
            profile: raw.profile,
        };
        household.validate()?;
        Ok(household)
    }
}

impl Household {
    /// Creates an empty household with a generated id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: normalize_text(&name.into()),
            address: String::new(),
            unit: String::new(),
            head_of_household_id: None,
            member_ids: Vec::new(),
            relationships: RelationshipMap::new(),
            created_at: 0,
            revision: 0,
            is_deleted: false,
            profile: HouseholdProfile::default(),
        }
    }

    /// Checks record-level and membership invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_nil() {
            return Err(ValidationError::NilId);
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::BlankName);
        }

        let mut seen = BTreeSet::new();
        for member in &self.member_ids {
            if member.is_nil() {
                return Err(ValidationError::NilResident);
            }
            if !seen.insert(*member) {
                return Err(ValidationError::DuplicateMember(*member));
            }
        }

        if let Some(head) = self.head_of_household_id {
            if head.is_nil() {
                return Err(ValidationError::NilResident);
            }
            if seen.contains(&head) {
                return Err(ValidationError::HeadListedAsMember(head));
            }
            if self.relationships.contains_key(&head) {
                return Err(ValidationError::HeadHasRelationship(head));
            }
        }

        if let Some(orphan) = self.relationships.keys().find(|id| !seen.contains(*id)) {
            return Err(ValidationError::OrphanRelationship(*orphan));
        }

        Ok(())
    }

    /// Marks the household as softly deleted.
    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
    }

    /// Returns whether the household should be visible to default reads.
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

/// Desired household state collected by a create/edit flow.
///
/// Membership fields are taken as-is: the reconciler drops the head,
/// duplicates and orphan labels rather than rejecting them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HouseholdDraft {
    pub name: String,
    pub address: String,
    pub unit: String,
    pub head_of_household_id: Option<ResidentId>,
    pub member_ids: Vec<ResidentId>,
    pub relationships: RelationshipMap,
    #[serde(flatten)]
    pub profile: HouseholdProfile,
}

impl HouseholdDraft {
    /// Creates a draft with only a display name set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Checks scalar fields only.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if normalize_text(&self.name).is_empty() {
            return Err(ValidationError::BlankName);
        }
        if self.head_of_household_id.is_some_and(|head| head.is_nil()) {
            return Err(ValidationError::NilResident);
        }
        Ok(())
    }

    /// Projects the scalar part of the draft written to the household row.
    pub fn record_update(&self) -> HouseholdRecordUpdate {
        HouseholdRecordUpdate {
            name: normalize_text(&self.name),
            address: normalize_text(&self.address),
            unit: normalize_text(&self.unit),
            head_of_household_id: self.head_of_household_id,
            profile: self.profile.clone(),
        }
    }
}

/// Scalar household fields written alongside a membership reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdRecordUpdate {
    pub name: String,
    pub address: String,
    pub unit: String,
    pub head_of_household_id: Option<ResidentId>,
    pub profile: HouseholdProfile,
}

/// One persisted association between a household and a non-head resident.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRow {
    pub household_id: HouseholdId,
    pub resident_id: ResidentId,
    pub relationship: Option<String>,
}

impl MembershipRow {
    pub fn new(
        household_id: HouseholdId,
        resident_id: ResidentId,
        relationship: Option<String>,
    ) -> Self {
        Self {
            household_id,
            resident_id,
            relationship,
        }
    }
}

/// Collapses internal whitespace runs and trims both ends.
pub fn normalize_text(value: &str) -> String {
    WHITESPACE_RE.replace_all(value.trim(), " ").into_owned()
}

/// Normalizes a relationship label; blank labels become absent.
pub fn normalize_label(value: Option<&str>) -> Option<String> {
    let normalized = normalize_text(value?);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
