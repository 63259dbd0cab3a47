//! The attendance service.
//!
//! [`AttendanceService`] ties the decision procedure to shared state, the
//! optional persistence collaborator, and the presenter. Every operation
//! completes even when the collaborator is missing or misbehaving; the worst
//! case is a record that lives only in local state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, FixedOffset, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::detection::{
    watch_for_face, DetectionSource, FaceBox, Recognizer, SurfaceBusy, SurfaceHandle,
};
use crate::model::{AttendanceRecord, DataItem, DayKey, Student};
use crate::persistence::{self, PersistOutcome, SharedCollaborator, Snapshot, SyncMode};
use crate::presentation::{build_dashboard, DashboardView, Presenter};
use crate::recorder::{record_attendance, AttemptState, Candidate, Rejection};
use crate::state::AppState;

/// Snapshots buffered between the collaborator and the apply task.
const SNAPSHOT_BUFFER: usize = 16;

/// An accepted check-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckIn {
    /// The record that was written.
    pub record: AttendanceRecord,
    /// Where it was written.
    pub outcome: PersistOutcome,
}

impl CheckIn {
    /// Terminal state of the attempt.
    #[must_use]
    pub fn state(&self) -> AttemptState {
        match self.outcome {
            PersistOutcome::Persisted => AttemptState::Persisted,
            PersistOutcome::FallenBack => AttemptState::FallenBack,
        }
    }
}

/// Registration form input. Fields are trimmed before use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewStudent {
    /// Unique roster key.
    pub student_id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// Contact phone.
    pub phone: String,
    /// Enrolled course.
    pub course: String,
    /// Captured face image.
    pub face_data: Option<String>,
}

impl NewStudent {
    /// Name of the first required field that is blank.
    fn first_missing(&self) -> Option<&'static str> {
        [
            ("student_id", &self.student_id),
            ("name", &self.name),
            ("email", &self.email),
            ("phone", &self.phone),
            ("course", &self.course),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }

    fn into_student(self, registered_at: DateTime<Utc>) -> Student {
        Student {
            student_id: self.student_id.trim().to_string(),
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone.trim().to_string(),
            course: self.course.trim().to_string(),
            face_data: self.face_data.filter(|f| !f.trim().is_empty()),
            registered_at,
        }
    }
}

/// Why a registration was turned down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// A required field was blank.
    #[error("please fill in the {} field", .field.replace('_', " "))]
    MissingField {
        /// Field name in snake case.
        field: &'static str,
    },

    /// The id is already on the roster.
    #[error("student id {id} is already registered")]
    DuplicateId {
        /// The conflicting id.
        id: String,
    },

    /// The collaborator's storage quota is used up.
    #[error("storage limit of {limit} items reached")]
    LimitReached {
        /// Configured item limit.
        limit: usize,
    },
}

/// A completed registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// The stored student.
    pub student: Student,
    /// Where it was written.
    pub outcome: PersistOutcome,
}

/// How a camera session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Stopped before a face settled.
    Stopped,
    /// A face settled and one check-in was attempted.
    Attempted {
        /// Where the face was.
        face: FaceBox,
        /// Result of the attempt.
        result: Result<CheckIn, Rejection>,
    },
}

/// Attendance service shared by every entry point.
#[derive(Debug)]
pub struct AttendanceService {
    config: Config,
    state: Arc<Mutex<AppState>>,
    collaborator: Option<SharedCollaborator>,
    presenter: Arc<dyn Presenter>,
    sync_mode: SyncMode,
    snapshot_task: Option<JoinHandle<()>>,
}

impl AttendanceService {
    /// Create a service in local mode; call [`connect`](Self::connect) to
    /// bring up the collaborator.
    #[must_use]
    pub fn new(
        config: Config,
        collaborator: Option<SharedCollaborator>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(AppState::new())),
            collaborator,
            presenter,
            sync_mode: SyncMode::Local,
            snapshot_task: None,
        }
    }

    /// Run startup synchronization.
    ///
    /// On success the initial snapshot is applied before this returns and
    /// later snapshots are applied by a background task. Otherwise the
    /// collaborator is dropped and every later write falls back at once.
    pub async fn connect(&mut self) -> SyncMode {
        let (tx, mut rx) = mpsc::channel::<Snapshot>(SNAPSHOT_BUFFER);
        self.sync_mode =
            persistence::connect(self.collaborator.as_ref(), &self.config.sync, tx).await;

        match self.sync_mode {
            SyncMode::Synced => {
                while let Ok(items) = rx.try_recv() {
                    self.apply_snapshot(&items);
                }

                let state = Arc::clone(&self.state);
                let presenter = Arc::clone(&self.presenter);
                let config = self.config.clone();
                if let Some(previous) = self.snapshot_task.take() {
                    previous.abort();
                }
                self.snapshot_task = Some(tokio::spawn(async move {
                    while let Some(items) = rx.recv().await {
                        let view = {
                            let mut state = lock(&state);
                            state.apply_snapshot(&items);
                            dashboard_for(&state, &config, &now_in(&config))
                        };
                        presenter.render(&view);
                    }
                    debug!("Snapshot channel closed");
                }));
            }
            SyncMode::Local => {
                if self.collaborator.take().is_some() {
                    warn!("Persistence collaborator unavailable, continuing in local mode");
                }
            }
        }

        info!(mode = %self.sync_mode, "Attendance service ready");
        self.sync_mode
    }

    /// Current synchronization mode.
    #[must_use]
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The current time at the configured offset.
    #[must_use]
    pub fn now(&self) -> DateTime<FixedOffset> {
        now_in(&self.config)
    }

    /// Check in a student by typed name.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] if the name is blank or unknown, or the student
    /// is already present today.
    pub async fn check_in_manual(&self, name: &str) -> Result<CheckIn, Rejection> {
        self.check_in_at(Candidate::Manual(name.to_string()), self.now())
            .await
    }

    /// Check in a student picked out by recognition.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] if the roster is empty or the student is
    /// already present today.
    pub async fn check_in_recognized(&self, student: Student) -> Result<CheckIn, Rejection> {
        self.check_in_at(Candidate::Recognized(student), self.now())
            .await
    }

    /// Run one check-in attempt as of `now`.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] when the attempt is turned down.
    pub async fn check_in_at(
        &self,
        candidate: Candidate,
        now: DateTime<FixedOffset>,
    ) -> Result<CheckIn, Rejection> {
        trace!(state = %AttemptState::Resolving, ?candidate, "Check-in attempt");

        let (record, key) = {
            let mut state = lock(&self.state);
            trace!(state = %AttemptState::Validating);
            let decided = record_attendance(&candidate, state.students(), state.records(), &now)
                .and_then(|record| state.reserve(&record).map(|key| (record, key)));
            match decided {
                Ok(pair) => pair,
                Err(rejection) => {
                    debug!(state = %AttemptState::Rejected, %rejection, "Check-in rejected");
                    return Err(rejection);
                }
            }
        };

        trace!(state = %AttemptState::Accepted, student_id = %record.student_id);
        trace!(state = %AttemptState::Persisting);
        let persisted = persistence::persist(
            self.collaborator.as_ref(),
            DataItem::from(record.clone()),
            self.config.sync.create_timeout(),
        )
        .await;

        let outcome = match persisted {
            Ok(outcome) => outcome,
            Err(conflict) => {
                lock(&self.state).release(&key);
                let rejection = Rejection::AlreadyPresent { name: record.name };
                debug!(state = %AttemptState::Rejected, %conflict, %rejection, "Check-in rejected");
                return Err(rejection);
            }
        };
        lock(&self.state).commit_record(&key, record.clone(), outcome);

        let check_in = CheckIn { record, outcome };
        info!(
            student_id = %check_in.record.student_id,
            name = %check_in.record.name,
            state = %check_in.state(),
            "Check-in recorded"
        );
        self.render(&now);
        Ok(check_in)
    }

    /// Run one camera session on `handle`'s surface.
    ///
    /// Waits for a face to settle, spends the profile's analysis delay, asks
    /// `recognizer` who it is, and attempts a single check-in. The session
    /// ends after that attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SurfaceBusy`] if the surface already has a session running.
    pub async fn scan<S, R>(
        &self,
        handle: &SurfaceHandle,
        source: &mut S,
        recognizer: &mut R,
    ) -> Result<ScanOutcome, SurfaceBusy>
    where
        S: DetectionSource + ?Sized,
        R: Recognizer + ?Sized,
    {
        let session = handle.begin()?;
        let profile = self.config.detection.profile(handle.surface()).clone();
        source.restart();

        let Some(face) = watch_for_face(source, &profile, &session).await else {
            info!(surface = %handle.surface(), "Scan stopped");
            return Ok(ScanOutcome::Stopped);
        };

        let analysis = profile.analysis_delay();
        if !analysis.is_zero() {
            debug!(?face, "Analyzing face");
            tokio::time::sleep(analysis).await;
        }

        let roster = self.students();
        let result = if roster.is_empty() {
            Err(Rejection::NoStudentsRegistered)
        } else {
            match recognizer.identify(&roster) {
                Some(student) => self.check_in_recognized(student).await,
                None => Err(Rejection::NotRecognized),
            }
        };
        drop(session);

        Ok(ScanOutcome::Attempted { face, result })
    }

    /// Register a new student.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] if a field is blank, the id is taken,
    /// or the connected collaborator is full.
    pub async fn register_student(
        &self,
        form: NewStudent,
    ) -> Result<Registration, RegistrationError> {
        if let Some(field) = form.first_missing() {
            return Err(RegistrationError::MissingField { field });
        }

        let student = form.into_student(Utc::now());
        {
            let mut state = lock(&self.state);
            if !state.reserve_student(&student) {
                return Err(RegistrationError::DuplicateId {
                    id: student.student_id,
                });
            }
            let limit = self.config.storage.max_records;
            if self.collaborator.is_some() && state.item_count() >= limit {
                state.release_student(&student.student_id);
                return Err(RegistrationError::LimitReached { limit });
            }
        }

        let persisted = persistence::persist(
            self.collaborator.as_ref(),
            DataItem::from(student.clone()),
            self.config.sync.create_timeout(),
        )
        .await;

        let outcome = match persisted {
            Ok(outcome) => outcome,
            Err(conflict) => {
                lock(&self.state).release_student(&student.student_id);
                debug!(student_id = %student.student_id, %conflict, "Registration refused");
                return Err(RegistrationError::DuplicateId {
                    id: student.student_id,
                });
            }
        };

        // A snapshot may have carried the id while the write was outstanding.
        // That is our own write when persisted, someone else's otherwise.
        let added = lock(&self.state).commit_student(student.clone(), outcome);
        if !added && outcome == PersistOutcome::FallenBack {
            return Err(RegistrationError::DuplicateId {
                id: student.student_id,
            });
        }

        info!(
            student_id = %student.student_id,
            name = %student.name,
            %outcome,
            "Student registered"
        );
        self.render(&self.now());
        Ok(Registration { student, outcome })
    }

    /// Replace local state with a full snapshot and refresh the presenter.
    pub fn apply_snapshot(&self, items: &[DataItem]) {
        lock(&self.state).apply_snapshot(items);
        self.render(&self.now());
    }

    /// Dashboard as of `now`.
    #[must_use]
    pub fn dashboard(&self, now: &DateTime<FixedOffset>) -> DashboardView {
        dashboard_for(&lock(&self.state), &self.config, now)
    }

    /// Snapshot of the roster.
    #[must_use]
    pub fn students(&self) -> Vec<Student> {
        lock(&self.state).students().to_vec()
    }

    /// Snapshot of the record set.
    #[must_use]
    pub fn records(&self) -> Vec<AttendanceRecord> {
        lock(&self.state).records().to_vec()
    }

    fn render(&self, now: &DateTime<FixedOffset>) {
        let view = self.dashboard(now);
        self.presenter.render(&view);
    }
}

impl Drop for AttendanceService {
    fn drop(&mut self) {
        if let Some(task) = self.snapshot_task.take() {
            task.abort();
        }
    }
}

fn lock(state: &Mutex<AppState>) -> MutexGuard<'_, AppState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_in(config: &Config) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&config.utc_offset())
}

fn dashboard_for(state: &AppState, config: &Config, now: &DateTime<FixedOffset>) -> DashboardView {
    build_dashboard(
        state.students(),
        state.records(),
        &DayKey::of(now),
        config.attendance.recent_limit,
    )
}
