//! Household membership reconciliation.
//!
//! # Responsibility
//! - Diff persisted membership rows against a desired household state.
//! - Apply the minimal batched writes through a `MembershipStore`.
//!
//! # Invariants
//! - No membership row is ever planned for the desired head.
//! - Duplicate desired members collapse to one row.
//! - Retained members are rewritten only when their label changes.
//! - Write order is: removals, additions, relabel rewrite, record update.
//!   The first failing call aborts the rest and its error is returned as-is.

use crate::model::household::{
    normalize_label, Household, HouseholdDraft, HouseholdId, MembershipRow, RelationshipMap,
    ResidentId,
};
use crate::repo::membership_repo::MembershipStore;
use crate::repo::RepoResult;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Writes required to move one household to its desired membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipPlan {
    /// Persisted members absent from the desired set.
    pub removed: Vec<ResidentId>,
    /// Desired members without a persisted row, with their labels.
    pub added: Vec<MembershipRow>,
    /// Retained members whose label changes, with the new label.
    pub relabeled: Vec<MembershipRow>,
    /// Full row set after the plan is applied, sorted by resident id.
    pub final_members: Vec<MembershipRow>,
}

impl MembershipPlan {
    /// Returns whether applying the plan leaves membership rows untouched.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.relabeled.is_empty()
    }
}

/// Outcome of one reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationResult {
    pub removed: Vec<ResidentId>,
    pub added: Vec<ResidentId>,
    pub relabeled: Vec<ResidentId>,
    pub final_members: Vec<MembershipRow>,
    /// Household record as read back after the update.
    pub household: Household,
}

impl ReconciliationResult {
    /// Returns whether no membership row was written.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.relabeled.is_empty()
    }
}

/// Computes membership writes without touching storage.
///
/// The desired head and nil ids are dropped from `desired_members`, duplicates
/// keep their first position, and labels for residents that end up outside
/// the member set are ignored. A member without a label entry is stored
/// without one.
pub fn plan_membership(
    household_id: HouseholdId,
    old_rows: &[MembershipRow],
    desired_head: Option<ResidentId>,
    desired_members: &[ResidentId],
    desired_relationships: &RelationshipMap,
) -> MembershipPlan {
    let old_labels: BTreeMap<ResidentId, Option<&str>> = old_rows
        .iter()
        .map(|row| (row.resident_id, row.relationship.as_deref()))
        .collect();

    let mut seen = BTreeSet::new();
    let new_members: Vec<ResidentId> = desired_members
        .iter()
        .copied()
        .filter(|id| !id.is_nil() && Some(*id) != desired_head)
        .filter(|id| seen.insert(*id))
        .collect();

    let removed = old_labels
        .keys()
        .filter(|id| !seen.contains(*id))
        .copied()
        .collect();

    let mut added = Vec::new();
    let mut relabeled = Vec::new();
    let mut final_members = Vec::with_capacity(new_members.len());
    for resident_id in new_members {
        let label = normalize_label(
            desired_relationships
                .get(&resident_id)
                .map(String::as_str),
        );
        let row = MembershipRow::new(household_id, resident_id, label);
        match old_labels.get(&resident_id) {
            None => added.push(row.clone()),
            Some(stored) if *stored != row.relationship.as_deref() => relabeled.push(row.clone()),
            Some(_) => {}
        }
        final_members.push(row);
    }
    final_members.sort_by_key(|row| row.resident_id);

    MembershipPlan {
        removed,
        added,
        relabeled,
        final_members,
    }
}

/// Reconciles persisted membership of `household_id` with `draft`.
///
/// Issues at most one call per write category. Relabeled members are
/// rewritten by deleting and reinserting their rows, which makes repeated
/// application converge on the same rows.
///
/// # Errors
/// - Returns the first `MembershipStore` error unchanged. Calls made before
///   the failure are not undone here; callers wanting atomicity run this
///   inside a storage transaction.
pub fn reconcile<S: MembershipStore + ?Sized>(
    store: &S,
    household_id: HouseholdId,
    draft: &HouseholdDraft,
) -> RepoResult<ReconciliationResult> {
    let old_rows = store.fetch_members(household_id)?;
    let plan = plan_membership(
        household_id,
        &old_rows,
        draft.head_of_household_id,
        &draft.member_ids,
        &draft.relationships,
    );

    debug!(
        "event=membership_plan module=reconcile household_id={household_id} old={} removed={} added={} relabeled={}",
        old_rows.len(),
        plan.removed.len(),
        plan.added.len(),
        plan.relabeled.len()
    );

    store.delete_members(household_id, &plan.removed)?;
    store.insert_members(household_id, &plan.added)?;

    if !plan.relabeled.is_empty() {
        let relabeled_ids: Vec<ResidentId> =
            plan.relabeled.iter().map(|row| row.resident_id).collect();
        store.delete_members(household_id, &relabeled_ids)?;
        store.insert_members(household_id, &plan.relabeled)?;
    }

    let household = store.update_household_record(household_id, &draft.record_update())?;

    Ok(ReconciliationResult {
        removed: plan.removed,
        added: plan.added.into_iter().map(|row| row.resident_id).collect(),
        relabeled: plan
            .relabeled
            .into_iter()
            .map(|row| row.resident_id)
            .collect(),
        final_members: plan.final_members,
        household,
    })
}

#[cfg(test)]
mod tests {
    use super::{plan_membership, reconcile};
    use crate::model::household::{
        Household, HouseholdDraft, HouseholdId, HouseholdRecordUpdate, MembershipRow,
        RelationshipMap, ResidentId,
    };
    use crate::repo::membership_repo::MembershipStore;
    use crate::repo::{RepoError, RepoResult};
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Fetch,
        Delete(Vec<ResidentId>),
        Insert(Vec<(ResidentId, Option<String>)>),
        UpdateRecord,
    }

    /// In-memory store recording every call.
    struct FakeStore {
        rows: RefCell<BTreeMap<ResidentId, Option<String>>>,
        calls: RefCell<Vec<Call>>,
        fail_on_call: Cell<Option<usize>>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self {
                rows: RefCell::new(BTreeMap::new()),
                calls: RefCell::new(Vec::new()),
                fail_on_call: Cell::new(None),
            }
        }

        fn seed(&self, resident_id: ResidentId, label: Option<&str>) {
            self.rows
                .borrow_mut()
                .insert(resident_id, label.map(str::to_string));
        }

        fn record(&self, call: Call) -> RepoResult<()> {
            let mut calls = self.calls.borrow_mut();
            calls.push(call);
            if self.fail_on_call.get() == Some(calls.len()) {
                return Err(RepoError::InvalidData("injected failure".to_string()));
            }
            Ok(())
        }

        fn writes(&self) -> Vec<Call> {
            self.calls
                .borrow()
                .iter()
                .filter(|call| matches!(call, Call::Delete(_) | Call::Insert(_)))
                .cloned()
                .collect()
        }

        fn snapshot(&self) -> BTreeMap<ResidentId, Option<String>> {
            self.rows.borrow().clone()
        }
    }

    impl MembershipStore for FakeStore {
        fn fetch_members(&self, household_id: HouseholdId) -> RepoResult<Vec<MembershipRow>> {
            self.record(Call::Fetch)?;
            Ok(self
                .rows
                .borrow()
                .iter()
                .map(|(id, label)| MembershipRow::new(household_id, *id, label.clone()))
                .collect())
        }

        fn delete_members(
            &self,
            _household_id: HouseholdId,
            resident_ids: &[ResidentId],
        ) -> RepoResult<()> {
            if resident_ids.is_empty() {
                return Ok(());
            }
            self.record(Call::Delete(resident_ids.to_vec()))?;
            let mut rows = self.rows.borrow_mut();
            for id in resident_ids {
                rows.remove(id);
            }
            Ok(())
        }

        fn insert_members(
            &self,
            _household_id: HouseholdId,
            rows: &[MembershipRow],
        ) -> RepoResult<()> {
            if rows.is_empty() {
                return Ok(());
            }
            self.record(Call::Insert(
                rows.iter()
                    .map(|row| (row.resident_id, row.relationship.clone()))
                    .collect(),
            ))?;
            let mut stored = self.rows.borrow_mut();
            for row in rows {
                let previous = stored.insert(row.resident_id, row.relationship.clone());
                assert!(previous.is_none(), "duplicate membership row inserted");
            }
            Ok(())
        }

        fn update_household_record(
            &self,
            household_id: HouseholdId,
            update: &HouseholdRecordUpdate,
        ) -> RepoResult<Household> {
            self.record(Call::UpdateRecord)?;
            let mut household = Household::new(update.name.clone());
            household.id = household_id;
            household.head_of_household_id = update.head_of_household_id;
            for (id, label) in self.rows.borrow().iter() {
                household.member_ids.push(*id);
                if let Some(label) = label {
                    household.relationships.insert(*id, label.clone());
                }
            }
            household.validate()?;
            Ok(household)
        }
    }

    fn ids(count: usize) -> Vec<ResidentId> {
        (0..count).map(|_| Uuid::new_v4()).collect()
    }

    fn draft(head: ResidentId, members: &[ResidentId], labels: &[(ResidentId, &str)]) -> HouseholdDraft {
        let mut draft = HouseholdDraft::new("Hộ Nguyễn");
        draft.head_of_household_id = Some(head);
        draft.member_ids = members.to_vec();
        draft.relationships = labels
            .iter()
            .map(|(id, label)| (*id, (*label).to_string()))
            .collect();
        draft
    }

    #[test]
    fn minimal_diff_removes_and_adds_only_changed_members() {
        let household_id = Uuid::new_v4();
        let [a, b, c, d, head]: [ResidentId; 5] = ids(5).try_into().unwrap();
        let store = FakeStore::new();
        store.seed(a, None);
        store.seed(b, None);
        store.seed(c, None);

        let result = reconcile(&store, household_id, &draft(head, &[b, c, d], &[])).unwrap();

        assert_eq!(result.removed, vec![a]);
        assert_eq!(result.added, vec![d]);
        assert!(result.relabeled.is_empty());
        assert_eq!(
            store.writes(),
            vec![Call::Delete(vec![a]), Call::Insert(vec![(d, None)])]
        );
    }

    #[test]
    fn new_household_inserts_all_members_in_one_batch() {
        let household_id = Uuid::new_v4();
        let [head, m1, m2]: [ResidentId; 3] = ids(3).try_into().unwrap();
        let store = FakeStore::new();

        let result = reconcile(
            &store,
            household_id,
            &draft(head, &[m1, m2], &[(m1, "Vợ"), (m2, "Con")]),
        )
        .unwrap();

        assert!(result.removed.is_empty());
        assert_eq!(
            store.writes(),
            vec![Call::Insert(vec![
                (m1, Some("Vợ".to_string())),
                (m2, Some("Con".to_string())),
            ])]
        );
        assert!(!store.snapshot().contains_key(&head));
    }

    #[test]
    fn head_listed_as_member_is_silently_excluded() {
        let household_id = Uuid::new_v4();
        let [head, m1]: [ResidentId; 2] = ids(2).try_into().unwrap();
        let store = FakeStore::new();

        let result = reconcile(
            &store,
            household_id,
            &draft(head, &[head, m1], &[(head, "Chủ hộ")]),
        )
        .unwrap();

        assert_eq!(result.added, vec![m1]);
        assert_eq!(store.snapshot().keys().copied().collect::<Vec<_>>(), vec![m1]);
        assert!(result.household.relationships.is_empty());
    }

    #[test]
    fn promoting_member_to_head_removes_their_row() {
        let household_id = Uuid::new_v4();
        let [old_head, promoted, other]: [ResidentId; 3] = ids(3).try_into().unwrap();
        let store = FakeStore::new();
        store.seed(promoted, Some("Con"));
        store.seed(other, Some("Cháu"));

        let result = reconcile(
            &store,
            household_id,
            &draft(promoted, &[old_head, promoted, other], &[(old_head, "Cha"), (other, "Cháu")]),
        )
        .unwrap();

        assert_eq!(result.removed, vec![promoted]);
        assert_eq!(result.added, vec![old_head]);
        assert!(result.relabeled.is_empty());
        assert_eq!(result.household.head_of_household_id, Some(promoted));
        assert!(!store.snapshot().contains_key(&promoted));
    }

    #[test]
    fn changed_label_is_rewritten_by_delete_then_reinsert() {
        let household_id = Uuid::new_v4();
        let [head, m1]: [ResidentId; 2] = ids(2).try_into().unwrap();
        let store = FakeStore::new();
        store.seed(m1, Some("Con"));

        let result = reconcile(&store, household_id, &draft(head, &[m1], &[(m1, "Cháu")])).unwrap();

        assert_eq!(result.relabeled, vec![m1]);
        assert_eq!(
            store.writes(),
            vec![
                Call::Delete(vec![m1]),
                Call::Insert(vec![(m1, Some("Cháu".to_string()))]),
            ]
        );
        assert_eq!(store.snapshot().get(&m1), Some(&Some("Cháu".to_string())));
    }

    #[test]
    fn second_identical_reconcile_writes_nothing() {
        let household_id = Uuid::new_v4();
        let [head, m1, m2]: [ResidentId; 3] = ids(3).try_into().unwrap();
        let store = FakeStore::new();
        store.seed(m1, Some("Con"));
        let desired = draft(head, &[m1, m2], &[(m1, "Vợ"), (m2, "Con")]);

        let first = reconcile(&store, household_id, &desired).unwrap();
        let after_first = store.snapshot();
        store.calls.borrow_mut().clear();
        let second = reconcile(&store, household_id, &desired).unwrap();

        assert!(!first.is_noop());
        assert!(second.is_noop());
        assert!(store.writes().is_empty());
        assert_eq!(store.snapshot(), after_first);
        assert_eq!(first.final_members, second.final_members);
    }

    #[test]
    fn duplicate_members_collapse_to_one_row() {
        let household_id = Uuid::new_v4();
        let [head, x, y]: [ResidentId; 3] = ids(3).try_into().unwrap();

        let with_duplicates =
            plan_membership(household_id, &[], Some(head), &[x, x, y], &RelationshipMap::new());
        let without_duplicates =
            plan_membership(household_id, &[], Some(head), &[x, y], &RelationshipMap::new());

        assert_eq!(with_duplicates, without_duplicates);
        assert_eq!(with_duplicates.added.len(), 2);
    }

    #[test]
    fn blank_label_matches_absent_label() {
        let household_id = Uuid::new_v4();
        let member = Uuid::new_v4();
        let old_rows = vec![MembershipRow::new(household_id, member, None)];
        let labels: RelationshipMap = [(member, "   ".to_string())].into_iter().collect();

        let plan = plan_membership(household_id, &old_rows, None, &[member], &labels);

        assert!(plan.is_noop());
    }

    #[test]
    fn nil_members_and_labels_for_non_members_are_dropped() {
        let household_id = Uuid::new_v4();
        let [member, stranger]: [ResidentId; 2] = ids(2).try_into().unwrap();
        let labels: RelationshipMap = [
            (Uuid::nil(), "x".to_string()),
            (stranger, "Con".to_string()),
            (member, "Vợ".to_string()),
        ]
        .into_iter()
        .collect();

        let plan = plan_membership(household_id, &[], None, &[Uuid::nil(), member], &labels);

        assert!(plan.removed.is_empty());
        assert!(plan.relabeled.is_empty());
        assert_eq!(
            plan.added,
            vec![MembershipRow::new(household_id, member, Some("Vợ".to_string()))]
        );
        assert_eq!(plan.final_members.len(), 1);
        assert!(plan
            .final_members
            .iter()
            .all(|row| row.resident_id != stranger && !row.resident_id.is_nil()));
    }

    #[test]
    fn failure_aborts_remaining_steps_and_is_returned_unchanged() {
        let household_id = Uuid::new_v4();
        let [head, a, b]: [ResidentId; 3] = ids(3).try_into().unwrap();
        let store = FakeStore::new();
        store.seed(a, None);
        // Calls: fetch, delete(a), insert(b), update. Fail the insert.
        store.fail_on_call.set(Some(3));

        let err = reconcile(&store, household_id, &draft(head, &[b], &[])).unwrap_err();

        assert!(matches!(err, RepoError::InvalidData(message) if message == "injected failure"));
        assert!(!store.calls.borrow().contains(&Call::UpdateRecord));
        assert!(store.snapshot().is_empty());
    }
}
