//! Storage layer for rollcall.
//!
//! [`Storage`] keeps the roster and attendance records in `SQLite`.
//! [`SqliteStore`] wraps it as a [`PersistenceCollaborator`] so the service
//! can treat the local database like any other backend: every write is
//! followed by a full snapshot pushed to the subscriber.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{AttendanceRecord, DataItem, DayKey, Student};
use crate::persistence::{PersistenceCollaborator, Snapshot};

const STUDENT_COLUMNS: &str =
    "student_id, name, email, phone, course, face_data, registered_at";

const ATTENDANCE_COLUMNS: &str = "student_id, name, course, check_in_time, date";

/// `SQLite` storage for students and attendance records.
#[derive(Debug)]
pub struct Storage {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl Storage {
    /// Open or create a storage database at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory storage instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a student.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is already registered or the write fails.
    pub fn insert_student(&self, student: &Student) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO students ({STUDENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                student.student_id,
                student.name,
                student.email,
                student.phone,
                student.course,
                student.face_data,
                student.registered_at.to_rfc3339(),
            ],
        )?;
        debug!(student_id = %student.student_id, "Inserted student");
        Ok(())
    }

    /// Insert an attendance record.
    ///
    /// # Errors
    ///
    /// Returns an error if the student already has a record for that day or
    /// the write fails.
    pub fn insert_attendance(&self, record: &AttendanceRecord) -> Result<()> {
        self.conn.execute(
            &format!("INSERT INTO attendance ({ATTENDANCE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
            params![
                record.student_id,
                record.name,
                record.course,
                record.check_in_time.to_rfc3339(),
                record.date.as_str(),
            ],
        )?;
        debug!(student_id = %record.student_id, date = %record.date, "Inserted attendance");
        Ok(())
    }

    /// Store either kind of item.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying insert fails.
    pub fn insert(&self, item: &DataItem) -> Result<()> {
        match item {
            DataItem::Student(s) => self.insert_student(s),
            DataItem::Attendance(r) => self.insert_attendance(r),
        }
    }

    /// All students in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn students(&self) -> Result<Vec<Student>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY rowid"))?;
        let students = stmt
            .query_map([], Self::row_to_student)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(students)
    }

    /// All attendance records, oldest check-in first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn attendance(&self) -> Result<Vec<AttendanceRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ATTENDANCE_COLUMNS} FROM attendance ORDER BY check_in_time, id"
        ))?;
        let records = stmt
            .query_map([], Self::row_to_attendance)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every stored item: students first, then attendance records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut items: Snapshot = self.students()?.into_iter().map(DataItem::from).collect();
        items.extend(self.attendance()?.into_iter().map(DataItem::from));
        Ok(items)
    }

    /// Get database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StorageStats> {
        let (students, attendance_records): (i64, i64) = self.conn.query_row(
            "SELECT (SELECT COUNT(*) FROM students), (SELECT COUNT(*) FROM attendance)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let (first, last): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(check_in_time), MAX(check_in_time) FROM attendance",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let parse = |s: Option<String>| {
            s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            students,
            attendance_records,
            first_check_in: parse(first),
            last_check_in: parse(last),
            db_size_bytes,
        })
    }

    fn row_to_student(row: &rusqlite::Row) -> rusqlite::Result<Student> {
        Ok(Student {
            student_id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            phone: row.get(3)?,
            course: row.get(4)?,
            face_data: row.get(5)?,
            registered_at: parse_timestamp(row, 6)?,
        })
    }

    fn row_to_attendance(row: &rusqlite::Row) -> rusqlite::Result<AttendanceRecord> {
        let date: String = row.get(4)?;
        Ok(AttendanceRecord {
            student_id: row.get(0)?,
            name: row.get(1)?,
            course: row.get(2)?,
            check_in_time: parse_timestamp(row, 3)?,
            date: DayKey::from(date.as_str()),
        })
    }
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Statistics about the storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Registered students.
    pub students: i64,
    /// Stored attendance records.
    pub attendance_records: i64,
    /// Earliest check-in on record.
    pub first_check_in: Option<DateTime<Utc>>,
    /// Latest check-in on record.
    pub last_check_in: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// The local database acting as a persistence collaborator.
#[derive(Debug)]
pub struct SqliteStore {
    storage: Mutex<Storage>,
    subscriber: Mutex<Option<mpsc::Sender<Snapshot>>>,
}

impl SqliteStore {
    /// Wrap an open storage.
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self {
            storage: Mutex::new(storage),
            subscriber: Mutex::new(None),
        }
    }

    fn storage(&self) -> Result<MutexGuard<'_, Storage>> {
        self.storage
            .lock()
            .map_err(|_| Error::internal("storage lock poisoned"))
    }

    fn current_subscriber(&self) -> Option<mpsc::Sender<Snapshot>> {
        self.subscriber.lock().ok().and_then(|s| s.clone())
    }

    /// Read the full item set.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.storage()?.snapshot()
    }

    /// Read database statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage()?.stats()
    }
}

#[async_trait::async_trait]
impl PersistenceCollaborator for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn init(&self, changes: mpsc::Sender<Snapshot>) -> Result<()> {
        let snapshot = self.snapshot()?;
        *self
            .subscriber
            .lock()
            .map_err(|_| Error::internal("subscriber lock poisoned"))? = Some(changes.clone());
        debug!(items = snapshot.len(), "Publishing initial snapshot");
        changes.send(snapshot).await.map_err(|_| Error::ChannelClosed)
    }

    async fn create(&self, item: DataItem) -> Result<()> {
        let snapshot = {
            let storage = self.storage()?;
            storage.insert(&item)?;
            storage.snapshot()?
        };
        if let Some(tx) = self.current_subscriber() {
            // A gone subscriber does not undo a committed write.
            if tx.send(snapshot).await.is_err() {
                debug!("Snapshot subscriber dropped");
            }
        }
        Ok(())
    }
}
