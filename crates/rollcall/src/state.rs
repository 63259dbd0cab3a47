//! In-memory roster and record set.
//!
//! [`AppState`] is owned by the service and shared behind a mutex. Any
//! check-then-write sequence goes through [`AppState::reserve`] or
//! [`AppState::reserve_student`], so two attempts for the same key cannot
//! both pass the duplicate check while a write is outstanding.
//!
//! Items the collaborator has acknowledged but not yet echoed in a snapshot
//! stay visible until a snapshot carries them.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::model::{AttendanceKey, AttendanceRecord, DataItem, Student};
use crate::persistence::PersistOutcome;
use crate::recorder::{find_present, Rejection};

/// Roster, attendance records, and the writes currently in progress.
#[derive(Debug, Default, Clone)]
pub struct AppState {
    students: Vec<Student>,
    records: Vec<AttendanceRecord>,
    in_flight: HashSet<AttendanceKey>,
    claimed_ids: HashSet<String>,
    unconfirmed_students: Vec<Student>,
    unconfirmed_records: Vec<AttendanceRecord>,
}

impl AppState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered students in registration order.
    #[must_use]
    pub fn students(&self) -> &[Student] {
        &self.students
    }

    /// Attendance records in arrival order.
    #[must_use]
    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    /// Students plus records.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.students.len() + self.records.len()
    }

    /// Look up a student by id.
    #[must_use]
    pub fn student(&self, student_id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.student_id == student_id)
    }

    /// Replace roster and records with the split of a full snapshot.
    ///
    /// The snapshot is authoritative: whatever the state held before is
    /// discarded, so applying the same snapshot twice is a no-op. The only
    /// exception is acknowledged writes the snapshot does not carry yet,
    /// which are kept on top of it. Reservations whose item now appears are
    /// settled; the rest belong to writes still in progress.
    pub fn apply_snapshot(&mut self, items: &[DataItem]) {
        let mut students = Vec::new();
        let mut records = Vec::new();
        for item in items {
            match item {
                DataItem::Student(s) => students.push(s.clone()),
                DataItem::Attendance(r) => records.push(r.clone()),
            }
        }
        debug!(
            students = students.len(),
            records = records.len(),
            "Applied snapshot"
        );

        self.in_flight
            .retain(|k| find_present(&records, &k.student_id, &k.date).is_none());
        self.claimed_ids
            .retain(|id| !students.iter().any(|s| &s.student_id == id));
        self.unconfirmed_records
            .retain(|r| find_present(&records, &r.student_id, &r.date).is_none());
        self.unconfirmed_students
            .retain(|u| !students.iter().any(|s| s.student_id == u.student_id));

        if !self.unconfirmed_students.is_empty() || !self.unconfirmed_records.is_empty() {
            trace!(
                students = self.unconfirmed_students.len(),
                records = self.unconfirmed_records.len(),
                "Keeping acknowledged items missing from snapshot"
            );
        }
        students.extend(self.unconfirmed_students.iter().cloned());
        records.extend(self.unconfirmed_records.iter().cloned());
        self.students = students;
        self.records = records;
    }

    /// Claim the right to write `record`.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::AlreadyPresent`] if a record for the same student
    /// and day is already stored or is being written by another attempt.
    pub fn reserve(&mut self, record: &AttendanceRecord) -> Result<AttendanceKey, Rejection> {
        if let Some(prior) = find_present(&self.records, &record.student_id, &record.date) {
            return Err(Rejection::AlreadyPresent {
                name: prior.name.clone(),
            });
        }
        let key = record.key();
        if !self.in_flight.insert(key.clone()) {
            trace!(
                student_id = %key.student_id,
                date = %key.date,
                "Check-in already in flight"
            );
            return Err(Rejection::AlreadyPresent {
                name: record.name.clone(),
            });
        }
        Ok(key)
    }

    /// Append `record` after its write ended with `outcome`, dropping its
    /// reservation.
    ///
    /// Returns `false` if a snapshot delivered an equivalent record while the
    /// write was outstanding; nothing is appended in that case.
    pub fn commit_record(
        &mut self,
        key: &AttendanceKey,
        record: AttendanceRecord,
        outcome: PersistOutcome,
    ) -> bool {
        self.in_flight.remove(key);
        if find_present(&self.records, &key.student_id, &key.date).is_some() {
            debug!(
                student_id = %key.student_id,
                "Record arrived via snapshot, skipping local append"
            );
            return false;
        }
        if outcome == PersistOutcome::Persisted {
            self.unconfirmed_records.push(record.clone());
        }
        self.records.push(record);
        true
    }

    /// Drop the reservation for a record that was not written.
    pub fn release(&mut self, key: &AttendanceKey) {
        self.in_flight.remove(key);
    }

    /// Claim `student`'s id for registration. Returns `false` if the id is on
    /// the roster or another registration holds it.
    pub fn reserve_student(&mut self, student: &Student) -> bool {
        if self.student(&student.student_id).is_some() {
            return false;
        }
        if !self.claimed_ids.insert(student.student_id.clone()) {
            trace!(student_id = %student.student_id, "Registration already in flight");
            return false;
        }
        true
    }

    /// Add `student` after its write ended with `outcome`, dropping the id
    /// claim.
    ///
    /// Returns `false` if the roster already holds the id; nothing is added
    /// in that case.
    pub fn commit_student(&mut self, student: Student, outcome: PersistOutcome) -> bool {
        self.claimed_ids.remove(&student.student_id);
        if self.student(&student.student_id).is_some() {
            return false;
        }
        if outcome == PersistOutcome::Persisted {
            self.unconfirmed_students.push(student.clone());
        }
        self.students.push(student);
        true
    }

    /// Drop the claim on an id that was not registered.
    pub fn release_student(&mut self, student_id: &str) {
        self.claimed_ids.remove(student_id);
    }

    /// Number of check-in reservations currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{at, student};

    fn snapshot() -> Vec<DataItem> {
        let ann = student("S1", "Ann Lee", "CS");
        let bo = student("S2", "Bo Chen", "Math");
        let record = AttendanceRecord::new(&ann, &at(2024, 1, 1, 9, 0));
        vec![
            DataItem::from(ann),
            DataItem::from(record),
            DataItem::from(bo),
        ]
    }

    #[test]
    fn test_apply_snapshot_splits_by_type() {
        let mut state = AppState::new();
        state.apply_snapshot(&snapshot());

        assert_eq!(state.students().len(), 2);
        assert_eq!(state.records().len(), 1);
        assert_eq!(state.item_count(), 3);
        assert_eq!(state.students()[1].student_id, "S2");
    }

    #[test]
    fn test_apply_snapshot_idempotent() {
        let mut state = AppState::new();
        state.apply_snapshot(&snapshot());
        let first_students = state.students().to_vec();
        let first_records = state.records().to_vec();

        state.apply_snapshot(&snapshot());
        state.apply_snapshot(&snapshot());

        assert_eq!(state.students(), first_students.as_slice());
        assert_eq!(state.records(), first_records.as_slice());
    }

    #[test]
    fn test_apply_snapshot_replaces_local_items() {
        let mut state = AppState::new();
        let local = student("S9", "Local Only", "Art");
        assert!(state.reserve_student(&local));
        assert!(state.commit_student(local, PersistOutcome::FallenBack));
        state.apply_snapshot(&snapshot());
        assert!(state.student("S9").is_none());
    }

    #[test]
    fn test_reserve_rejects_existing_record() {
        let mut state = AppState::new();
        state.apply_snapshot(&snapshot());

        let ann = state.student("S1").cloned().unwrap();
        let again = AttendanceRecord::new(&ann, &at(2024, 1, 1, 10, 0));
        assert_eq!(
            state.reserve(&again),
            Err(Rejection::AlreadyPresent {
                name: "Ann Lee".into()
            })
        );
    }

    #[test]
    fn test_reserve_blocks_concurrent_attempt() {
        let mut state = AppState::new();
        let bo = student("S2", "Bo Chen", "Math");
        let first = AttendanceRecord::new(&bo, &at(2024, 1, 1, 9, 0));
        let second = AttendanceRecord::new(&bo, &at(2024, 1, 1, 9, 1));

        let key = state.reserve(&first).unwrap();
        assert!(state.reserve(&second).is_err());
        assert_eq!(state.in_flight(), 1);

        assert!(state.commit_record(&key, first, PersistOutcome::FallenBack));
        assert_eq!(state.in_flight(), 0);
        assert_eq!(state.records().len(), 1);
        assert!(state.reserve(&second).is_err());
    }

    #[test]
    fn test_release_frees_reservation() {
        let mut state = AppState::new();
        let bo = student("S2", "Bo Chen", "Math");
        let record = AttendanceRecord::new(&bo, &at(2024, 1, 1, 9, 0));

        let key = state.reserve(&record).unwrap();
        state.release(&key);
        assert_eq!(state.in_flight(), 0);
        assert!(state.records().is_empty());
        assert!(state.reserve(&record).is_ok());
    }

    #[test]
    fn test_snapshot_settles_pending_reservation() {
        let mut state = AppState::new();
        let ann = student("S1", "Ann Lee", "CS");
        let bo = student("S2", "Bo Chen", "Math");
        let ann_record = AttendanceRecord::new(&ann, &at(2024, 1, 1, 9, 0));
        let bo_record = AttendanceRecord::new(&bo, &at(2024, 1, 1, 9, 0));

        state.reserve(&ann_record).unwrap();
        state.reserve(&bo_record).unwrap();
        assert_eq!(state.in_flight(), 2);

        // The snapshot carries Ann's record but not Bo's.
        state.apply_snapshot(&snapshot());
        assert_eq!(state.in_flight(), 1);
        assert!(state.reserve(&bo_record).is_err());
    }

    #[test]
    fn test_persisted_record_visible_before_snapshot() {
        let mut state = AppState::new();
        let bo = student("S2", "Bo Chen", "Math");
        let record = AttendanceRecord::new(&bo, &at(2024, 1, 1, 9, 30));

        let key = state.reserve(&record).unwrap();
        assert!(state.commit_record(&key, record.clone(), PersistOutcome::Persisted));
        assert_eq!(state.records(), &[record.clone()]);

        // A snapshot from before the write still leaves it in view.
        state.apply_snapshot(&snapshot());
        assert_eq!(state.records().len(), 2);
        assert!(state.reserve(&record).is_err());

        // Once echoed, it is no longer carried separately.
        let mut echoed = snapshot();
        echoed.push(DataItem::from(record));
        state.apply_snapshot(&echoed);
        state.apply_snapshot(&snapshot());
        assert_eq!(state.records().len(), 1);
    }

    #[test]
    fn test_fallen_back_record_not_carried_over_snapshot() {
        let mut state = AppState::new();
        let bo = student("S2", "Bo Chen", "Math");
        let record = AttendanceRecord::new(&bo, &at(2024, 1, 1, 9, 30));

        let key = state.reserve(&record).unwrap();
        assert!(state.commit_record(&key, record, PersistOutcome::FallenBack));
        state.apply_snapshot(&snapshot());
        assert_eq!(state.records().len(), 1);
    }

    #[test]
    fn test_commit_record_skips_when_snapshot_won() {
        let mut state = AppState::new();
        let ann = student("S1", "Ann Lee", "CS");
        let record = AttendanceRecord::new(&ann, &at(2024, 1, 1, 9, 0));

        let key = state.reserve(&record).unwrap();
        state.apply_snapshot(&snapshot());
        assert!(!state.commit_record(&key, record, PersistOutcome::Persisted));
        assert_eq!(state.records().len(), 1);
        assert_eq!(state.in_flight(), 0);
    }

    #[test]
    fn test_reserve_student_blocks_second_claim() {
        let mut state = AppState::new();
        let ann = student("S1", "Ann Lee", "CS");
        let other = student("S1", "Someone Else", "Art");

        assert!(state.reserve_student(&ann));
        assert!(!state.reserve_student(&other));

        assert!(state.commit_student(ann, PersistOutcome::Persisted));
        assert!(!state.reserve_student(&other));
        assert_eq!(state.students().len(), 1);
    }

    #[test]
    fn test_release_student_frees_id() {
        let mut state = AppState::new();
        let ann = student("S1", "Ann Lee", "CS");
        assert!(state.reserve_student(&ann));
        state.release_student("S1");
        assert!(state.reserve_student(&ann));
    }

    #[test]
    fn test_persisted_student_survives_stale_snapshot() {
        let mut state = AppState::new();
        let cy = student("S3", "Cy Diaz", "Art");

        assert!(state.reserve_student(&cy));
        assert!(state.commit_student(cy.clone(), PersistOutcome::Persisted));
        state.apply_snapshot(&snapshot());
        assert_eq!(state.students().len(), 3);
        assert!(!state.reserve_student(&cy));
    }

    #[test]
    fn test_commit_student_rejects_id_from_snapshot() {
        let mut state = AppState::new();
        let ann = student("S1", "Someone Else", "Art");

        assert!(state.reserve_student(&ann));
        state.apply_snapshot(&snapshot());
        assert!(!state.commit_student(ann, PersistOutcome::FallenBack));
        assert_eq!(state.student("S1").unwrap().name, "Ann Lee");
    }
}
