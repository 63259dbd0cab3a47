//! Attendance decision procedure.
//!
//! [`record_attendance`] is pure: it inspects the roster and the records seen
//! so far and either produces the record to write or explains why the
//! attempt is rejected. Writing is the caller's job.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use crate::model::{AttendanceRecord, DayKey, Student};

/// Who is trying to check in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// A student picked out by face recognition.
    Recognized(Student),
    /// A name typed in by hand.
    Manual(String),
}

/// Why an attendance attempt was turned down.
///
/// These are ordinary outcomes shown to the user; none of them change state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// No roster entry carries the given name.
    #[error("student not registered: {name}")]
    NotRegistered {
        /// The name as entered.
        name: String,
    },

    /// The student already has a record for today.
    #[error("{name} already present today")]
    AlreadyPresent {
        /// Name from the existing record.
        name: String,
    },

    /// Recognition ran against an empty roster.
    #[error("no students registered")]
    NoStudentsRegistered,

    /// Manual entry was empty after trimming.
    #[error("no student name entered")]
    BlankName,

    /// A face was seen but matched nobody on the roster.
    #[error("face not recognized")]
    NotRecognized,
}

/// Progress of a single check-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Nothing in flight.
    Idle,
    /// Mapping the candidate to a roster entry.
    Resolving,
    /// Checking the roster and today's records.
    Validating,
    /// A record was produced and awaits writing.
    Accepted,
    /// The attempt was turned down.
    Rejected,
    /// Handing the record to the persistence collaborator.
    Persisting,
    /// The collaborator stored the record.
    Persisted,
    /// The record went to the local record set instead.
    FallenBack,
}

impl AttemptState {
    /// Whether the attempt is over in this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Persisted | Self::FallenBack)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Validating => "validating",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Persisting => "persisting",
            Self::Persisted => "persisted",
            Self::FallenBack => "fallen_back",
        };
        f.write_str(s)
    }
}

/// Find the first roster entry whose name matches `name` ignoring case.
///
/// Several students may share a name; the earliest in roster order wins.
#[must_use]
pub fn find_by_name<'a>(roster: &'a [Student], name: &str) -> Option<&'a Student> {
    roster.iter().find(|s| s.name_matches(name))
}

/// Find an existing record for `student_id` on `date`.
#[must_use]
pub fn find_present<'a>(
    records: &'a [AttendanceRecord],
    student_id: &str,
    date: &DayKey,
) -> Option<&'a AttendanceRecord> {
    records.iter().find(|r| r.is_for(student_id, date))
}

/// Decide the outcome of one check-in attempt.
///
/// # Errors
///
/// Returns a [`Rejection`] when the roster is empty on the recognition path,
/// when a manual name is blank or unknown, or when the student already has
/// a record for the day of `now`.
pub fn record_attendance(
    candidate: &Candidate,
    roster: &[Student],
    existing: &[AttendanceRecord],
    now: &DateTime<FixedOffset>,
) -> Result<AttendanceRecord, Rejection> {
    let student = match candidate {
        Candidate::Recognized(student) => {
            if roster.is_empty() {
                return Err(Rejection::NoStudentsRegistered);
            }
            student
        }
        Candidate::Manual(raw) => {
            let name = raw.trim();
            if name.is_empty() {
                return Err(Rejection::BlankName);
            }
            find_by_name(roster, name).ok_or_else(|| Rejection::NotRegistered {
                name: name.to_string(),
            })?
        }
    };

    let date = DayKey::of(now);
    if let Some(prior) = find_present(existing, &student.student_id, &date) {
        return Err(Rejection::AlreadyPresent {
            name: prior.name.clone(),
        });
    }

    Ok(AttendanceRecord::new(student, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{at, student};

    fn roster() -> Vec<Student> {
        vec![
            student("S1", "Ann Lee", "CS"),
            student("S2", "Bo Chen", "Math"),
        ]
    }

    #[test]
    fn test_manual_check_in_scenario() {
        let roster = vec![student("S1", "Ann Lee", "CS")];
        let mut records = Vec::new();
        let t1 = at(2024, 1, 1, 9, 0);

        let record =
            record_attendance(&Candidate::Manual("ann lee".into()), &roster, &records, &t1)
                .unwrap();
        assert_eq!(record.student_id, "S1");
        assert_eq!(record.name, "Ann Lee");
        assert_eq!(record.course, "CS");
        assert_eq!(record.date.as_str(), "2024-01-01");
        records.push(record);
        assert_eq!(records.len(), 1);

        let again = record_attendance(
            &Candidate::Manual("Ann Lee".into()),
            &roster,
            &records,
            &at(2024, 1, 1, 9, 5),
        );
        assert_eq!(
            again,
            Err(Rejection::AlreadyPresent {
                name: "Ann Lee".into()
            })
        );
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_manual_unknown_name() {
        let result = record_attendance(
            &Candidate::Manual("Zed".into()),
            &roster(),
            &[],
            &at(2024, 1, 1, 9, 0),
        );
        assert_eq!(
            result,
            Err(Rejection::NotRegistered { name: "Zed".into() })
        );
    }

    #[test]
    fn test_manual_name_is_trimmed() {
        let record = record_attendance(
            &Candidate::Manual("  BO CHEN ".into()),
            &roster(),
            &[],
            &at(2024, 1, 1, 9, 0),
        )
        .unwrap();
        assert_eq!(record.student_id, "S2");
    }

    #[test]
    fn test_manual_blank_name() {
        let result = record_attendance(
            &Candidate::Manual("   ".into()),
            &roster(),
            &[],
            &at(2024, 1, 1, 9, 0),
        );
        assert_eq!(result, Err(Rejection::BlankName));
    }

    #[test]
    fn test_recognition_with_empty_roster() {
        let ghost = student("S1", "Ann Lee", "CS");
        let result = record_attendance(
            &Candidate::Recognized(ghost),
            &[],
            &[],
            &at(2024, 1, 1, 9, 0),
        );
        assert_eq!(result, Err(Rejection::NoStudentsRegistered));
    }

    #[test]
    fn test_recognition_checked_before_duplicate() {
        let ann = student("S1", "Ann Lee", "CS");
        let prior = AttendanceRecord::new(&ann, &at(2024, 1, 1, 8, 0));
        let result = record_attendance(
            &Candidate::Recognized(ann),
            &[],
            &[prior],
            &at(2024, 1, 1, 9, 0),
        );
        assert_eq!(result, Err(Rejection::NoStudentsRegistered));
    }

    #[test]
    fn test_same_student_next_day_is_accepted() {
        let roster = roster();
        let prior = AttendanceRecord::new(&roster[0], &at(2024, 1, 1, 9, 0));
        let record = record_attendance(
            &Candidate::Recognized(roster[0].clone()),
            &roster,
            &[prior],
            &at(2024, 1, 2, 9, 0),
        )
        .unwrap();
        assert_eq!(record.date.as_str(), "2024-01-02");
    }

    #[test]
    fn test_sequential_calls_never_duplicate() {
        let roster = roster();
        let mut records = Vec::new();
        let now = at(2024, 3, 4, 10, 0);
        for _ in 0..3 {
            for s in &roster {
                if let Ok(r) =
                    record_attendance(&Candidate::Recognized(s.clone()), &roster, &records, &now)
                {
                    records.push(r);
                }
            }
        }
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_name_collision_resolves_to_first() {
        let roster = vec![
            student("S1", "Sam Park", "CS"),
            student("S2", "Sam Park", "Art"),
        ];
        assert_eq!(find_by_name(&roster, "sam park").unwrap().student_id, "S1");
    }

    #[test]
    fn test_attempt_state_terminal() {
        assert!(AttemptState::Rejected.is_terminal());
        assert!(AttemptState::Persisted.is_terminal());
        assert!(AttemptState::FallenBack.is_terminal());
        assert!(!AttemptState::Persisting.is_terminal());
        assert_eq!(AttemptState::FallenBack.to_string(), "fallen_back");
    }

    #[test]
    fn test_rejection_display() {
        let r = Rejection::AlreadyPresent {
            name: "Ann Lee".into(),
        };
        assert_eq!(r.to_string(), "Ann Lee already present today");
        assert_eq!(
            Rejection::NoStudentsRegistered.to_string(),
            "no students registered"
        );
    }
}
