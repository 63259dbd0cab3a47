//! `rollcall` - Classroom attendance with face check-in
//!
//! This library records one check-in per student per day from either a
//! camera surface or a typed name, keeps working when its persistence
//! backend is missing or failing, and derives a dashboard of today's
//! attendance.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod logging;
pub mod model;
pub mod persistence;
pub mod presentation;
pub mod recorder;
pub mod service;
pub mod state;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use model::{AttendanceRecord, DataItem, DayKey, Student};
pub use persistence::{PersistOutcome, PersistenceCollaborator, SharedCollaborator, SyncMode};
pub use recorder::{record_attendance, Candidate, Rejection};
pub use service::AttendanceService;
pub use storage::{SqliteStore, Storage, StorageStats};
