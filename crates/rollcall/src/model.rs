//! Core data types: students, attendance records, and the tagged item shape
//! exchanged with persistence collaborators.

use std::fmt;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a calendar day, rendered as `YYYY-MM-DD`.
///
/// Two records fall on the same day exactly when their keys compare equal;
/// no timestamp arithmetic is involved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(String);

impl DayKey {
    /// Derive the day key of an instant in its own timezone.
    #[must_use]
    pub fn of<Tz: TimeZone>(instant: &DateTime<Tz>) -> Self {
        Self(instant.date_naive().format("%Y-%m-%d").to_string())
    }

    /// The day key of the current instant at the given UTC offset.
    #[must_use]
    pub fn today(offset: FixedOffset) -> Self {
        Self::of(&Utc::now().with_timezone(&offset))
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DayKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Unique roster key.
    pub student_id: String,
    /// Display name; manual check-in matches on this case-insensitively.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Contact phone.
    pub phone: String,
    /// Enrolled course.
    pub course: String,
    /// Captured face image, usually a data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_data: Option<String>,
    /// When the student was registered.
    pub registered_at: DateTime<Utc>,
}

impl Student {
    /// Check whether `name` refers to this student, ignoring case.
    #[must_use]
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}

/// A single accepted check-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// The student who checked in.
    pub student_id: String,
    /// Student name at the time of check-in.
    pub name: String,
    /// Student course at the time of check-in.
    pub course: String,
    /// When the check-in happened.
    pub check_in_time: DateTime<Utc>,
    /// Day identity of `check_in_time`.
    pub date: DayKey,
}

impl AttendanceRecord {
    /// Build a record for `student` checking in at `now`.
    #[must_use]
    pub fn new(student: &Student, now: &DateTime<FixedOffset>) -> Self {
        Self {
            student_id: student.student_id.clone(),
            name: student.name.clone(),
            course: student.course.clone(),
            check_in_time: now.with_timezone(&Utc),
            date: DayKey::of(now),
        }
    }

    /// The `(student_id, date)` pair that must be unique across records.
    #[must_use]
    pub fn key(&self) -> AttendanceKey {
        AttendanceKey {
            student_id: self.student_id.clone(),
            date: self.date.clone(),
        }
    }

    /// Check whether this record marks `student_id` present on `date`.
    #[must_use]
    pub fn is_for(&self, student_id: &str, date: &DayKey) -> bool {
        self.student_id == student_id && &self.date == date
    }
}

/// Uniqueness key of an attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttendanceKey {
    /// Student identifier.
    pub student_id: String,
    /// Day of attendance.
    pub date: DayKey,
}

/// An item as stored by a persistence collaborator.
///
/// Serialized as a flat JSON object with a `type` discriminator of
/// `"student"` or `"attendance"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataItem {
    /// A roster entry.
    Student(Student),
    /// An attendance record.
    Attendance(AttendanceRecord),
}

impl DataItem {
    /// The discriminator string used on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Student(_) => "student",
            Self::Attendance(_) => "attendance",
        }
    }
}

impl From<Student> for DataItem {
    fn from(student: Student) -> Self {
        Self::Student(student)
    }
}

impl From<AttendanceRecord> for DataItem {
    fn from(record: AttendanceRecord) -> Self {
        Self::Attendance(record)
    }
}
