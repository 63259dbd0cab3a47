//! `SQLite` schema definitions for rollcall.
//!
//! This module contains the SQL statements for creating and managing
//! the database schema.

/// SQL statement to create the students table.
pub const CREATE_STUDENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS students (
    student_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL,
    phone TEXT NOT NULL,
    course TEXT NOT NULL,
    face_data TEXT,
    registered_at TEXT NOT NULL
)
";

/// SQL statement to create the attendance table.
///
/// At most one row per student per day.
pub const CREATE_ATTENDANCE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL,
    name TEXT NOT NULL,
    course TEXT NOT NULL,
    check_in_time TEXT NOT NULL,
    date TEXT NOT NULL,
    UNIQUE (student_id, date)
)
";

/// SQL statement to create an index on attendance date for daily queries.
pub const CREATE_DATE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)
";

/// SQL statement to create an index on check-in time for ordering.
pub const CREATE_CHECK_IN_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_attendance_check_in ON attendance(check_in_time)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_STUDENTS_TABLE,
    CREATE_ATTENDANCE_TABLE,
    CREATE_DATE_INDEX,
    CREATE_CHECK_IN_INDEX,
    CREATE_METADATA_TABLE,
];
