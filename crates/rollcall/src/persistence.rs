//! Optional persistence collaborator.
//!
//! A collaborator is resolved once at startup and handed to the service as
//! `Option<Arc<dyn PersistenceCollaborator>>`. Everything here treats a
//! missing collaborator, a failing one, and a slow one the same way: the
//! caller keeps going on local state.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::model::DataItem;

/// A full collaborator snapshot: every student and record, in any order.
pub type Snapshot = Vec<DataItem>;

/// An external store for students and attendance records.
///
/// After [`init`](Self::init) succeeds the collaborator pushes the complete
/// item set through the channel whenever it changes.
#[async_trait::async_trait]
pub trait PersistenceCollaborator: Send + Sync + std::fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the collaborator is loaded and accepting calls.
    fn is_ready(&self) -> bool {
        true
    }

    /// Subscribe to change notifications.
    ///
    /// # Errors
    ///
    /// Returns an error if the collaborator cannot start.
    async fn init(&self, changes: mpsc::Sender<Snapshot>) -> Result<()>;

    /// Durably store one item.
    ///
    /// # Errors
    ///
    /// Returns an error if the item was not stored.
    async fn create(&self, item: DataItem) -> Result<()>;
}

/// Shared handle to a collaborator.
pub type SharedCollaborator = Arc<dyn PersistenceCollaborator>;

/// How a write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The collaborator stored the item.
    Persisted,
    /// The caller must keep the item locally.
    FallenBack,
}

impl std::fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persisted => write!(f, "persisted"),
            Self::FallenBack => write!(f, "fallen_back"),
        }
    }
}

/// The collaborator already holds an item with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} already stored")]
pub struct Conflict {
    /// Kind of the refused item.
    pub kind: &'static str,
}

/// Whether startup reached the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Changes flow through the collaborator.
    Synced,
    /// Working from local state only.
    Local,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "synced"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// Hand `item` to the collaborator, giving up after `limit`.
///
/// Absence, an error, or a timeout all yield [`PersistOutcome::FallenBack`].
/// A timed-out write may still land later.
///
/// # Errors
///
/// Returns [`Conflict`] if the collaborator refused the item because its key
/// is already stored. Keeping such an item locally would duplicate it.
pub async fn persist(
    collaborator: Option<&SharedCollaborator>,
    item: DataItem,
    limit: Duration,
) -> std::result::Result<PersistOutcome, Conflict> {
    let Some(collaborator) = collaborator else {
        debug!(kind = item.kind(), "No collaborator, keeping item locally");
        return Ok(PersistOutcome::FallenBack);
    };

    let kind = item.kind();
    match timeout(limit, collaborator.create(item)).await {
        Ok(Ok(())) => {
            debug!(collaborator = collaborator.name(), kind, "Item persisted");
            Ok(PersistOutcome::Persisted)
        }
        Ok(Err(e)) if e.is_constraint_violation() => {
            debug!(
                collaborator = collaborator.name(),
                kind,
                error = %e,
                "Create refused as duplicate"
            );
            Err(Conflict { kind })
        }
        Ok(Err(e)) => {
            warn!(
                collaborator = collaborator.name(),
                kind,
                error = %e,
                "Create failed, falling back"
            );
            Ok(PersistOutcome::FallenBack)
        }
        Err(_) => {
            warn!(
                collaborator = collaborator.name(),
                kind,
                timeout_ms = limit.as_millis(),
                "Create timed out, falling back"
            );
            Ok(PersistOutcome::FallenBack)
        }
    }
}

/// Bring up the collaborator at startup.
///
/// Waits `initial_delay`, probes [`PersistenceCollaborator::is_ready`] up to
/// `max_attempts` times with a fixed backoff, then calls `init` bounded by
/// `init_timeout`. Any shortfall ends in [`SyncMode::Local`].
pub async fn connect(
    collaborator: Option<&SharedCollaborator>,
    sync: &SyncConfig,
    changes: mpsc::Sender<Snapshot>,
) -> SyncMode {
    let Some(collaborator) = collaborator else {
        info!("No persistence collaborator configured, using local mode");
        return SyncMode::Local;
    };

    if !sync.initial_delay().is_zero() {
        sleep(sync.initial_delay()).await;
    }

    let attempts = sync.max_attempts.max(1);
    let mut ready = false;
    for attempt in 1..=attempts {
        if collaborator.is_ready() {
            debug!(collaborator = collaborator.name(), attempt, "Collaborator ready");
            ready = true;
            break;
        }
        debug!(collaborator = collaborator.name(), attempt, "Waiting for collaborator");
        if attempt < attempts {
            sleep(sync.backoff()).await;
        }
    }

    if !ready {
        info!(
            collaborator = collaborator.name(),
            attempts, "Collaborator never became ready, using local mode"
        );
        return SyncMode::Local;
    }

    match timeout(sync.init_timeout(), collaborator.init(changes)).await {
        Ok(Ok(())) => {
            info!(collaborator = collaborator.name(), "Collaborator initialized");
            SyncMode::Synced
        }
        Ok(Err(e)) => {
            warn!(
                collaborator = collaborator.name(),
                error = %e,
                "Collaborator init failed, using local mode"
            );
            SyncMode::Local
        }
        Err(_) => {
            warn!(
                collaborator = collaborator.name(),
                "Collaborator init timed out, using local mode"
            );
            SyncMode::Local
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted collaborators for exercising fallback paths.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::error::Error;

    /// What a scripted collaborator does on each call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Behavior {
        /// Store the item and publish a snapshot.
        Accept,
        /// Report failure.
        Fail,
        /// Never answer.
        Hang,
        /// Initialize, then refuse every item as already stored.
        Duplicate,
    }

    #[derive(Debug)]
    pub struct ScriptedCollaborator {
        pub behavior: Behavior,
        pub ready_after: usize,
        pub probes: AtomicUsize,
        pub items: Mutex<Vec<DataItem>>,
        pub subscriber: Mutex<Option<mpsc::Sender<Snapshot>>>,
        pub init_called: AtomicBool,
    }

    impl ScriptedCollaborator {
        pub fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                ready_after: 0,
                probes: AtomicUsize::new(0),
                items: Mutex::new(Vec::new()),
                subscriber: Mutex::new(None),
                init_called: AtomicBool::new(false),
            }
        }

        pub fn ready_after(mut self, probes: usize) -> Self {
            self.ready_after = probes;
            self
        }

        pub fn stored(&self) -> Vec<DataItem> {
            self.items.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PersistenceCollaborator for ScriptedCollaborator {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn is_ready(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst) >= self.ready_after
        }

        async fn init(&self, changes: mpsc::Sender<Snapshot>) -> Result<()> {
            self.init_called.store(true, Ordering::SeqCst);
            match self.behavior {
                Behavior::Accept | Behavior::Duplicate => {
                    let snapshot = self.stored();
                    *self.subscriber.lock().unwrap() = Some(changes.clone());
                    changes.send(snapshot).await.map_err(|_| Error::ChannelClosed)
                }
                Behavior::Fail => Err(Error::persistence("init refused")),
                Behavior::Hang => std::future::pending().await,
            }
        }

        async fn create(&self, item: DataItem) -> Result<()> {
            match self.behavior {
                Behavior::Accept => {
                    let snapshot = {
                        let mut items = self.items.lock().unwrap();
                        items.push(item);
                        items.clone()
                    };
                    let subscriber = self.subscriber.lock().unwrap().clone();
                    if let Some(tx) = subscriber {
                        tx.send(snapshot).await.map_err(|_| Error::ChannelClosed)?;
                    }
                    Ok(())
                }
                Behavior::Fail => Err(Error::persistence("create refused")),
                Behavior::Hang => std::future::pending().await,
                Behavior::Duplicate => Err(Error::AlreadyStored {
                    kind: item.kind(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Behavior, ScriptedCollaborator};
    use super::*;
    use crate::model::fixtures::student;

    fn shared(c: ScriptedCollaborator) -> SharedCollaborator {
        Arc::new(c)
    }

    fn item() -> DataItem {
        DataItem::from(student("S1", "Ann Lee", "CS"))
    }

    #[tokio::test]
    async fn test_persist_without_collaborator_falls_back() {
        let outcome = persist(None, item(), Duration::from_secs(1)).await;
        assert_eq!(outcome, Ok(PersistOutcome::FallenBack));
    }

    #[tokio::test]
    async fn test_persist_success() {
        let c = shared(ScriptedCollaborator::new(Behavior::Accept));
        let outcome = persist(Some(&c), item(), Duration::from_secs(1)).await;
        assert_eq!(outcome, Ok(PersistOutcome::Persisted));
    }

    #[tokio::test]
    async fn test_persist_failure_falls_back() {
        let c = shared(ScriptedCollaborator::new(Behavior::Fail));
        let outcome = persist(Some(&c), item(), Duration::from_secs(1)).await;
        assert_eq!(outcome, Ok(PersistOutcome::FallenBack));
    }

    #[tokio::test]
    async fn test_persist_duplicate_is_conflict() {
        let c = shared(ScriptedCollaborator::new(Behavior::Duplicate));
        let outcome = persist(Some(&c), item(), Duration::from_secs(1)).await;
        assert_eq!(outcome, Err(Conflict { kind: "student" }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_timeout_falls_back() {
        let c = shared(ScriptedCollaborator::new(Behavior::Hang));
        let outcome = persist(Some(&c), item(), Duration::from_millis(250)).await;
        assert_eq!(outcome, Ok(PersistOutcome::FallenBack));
    }

    #[tokio::test]
    async fn test_connect_without_collaborator() {
        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(connect(None, &SyncConfig::immediate(), tx).await, SyncMode::Local);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_waits_for_readiness() {
        let c = Arc::new(ScriptedCollaborator::new(Behavior::Accept).ready_after(3));
        let shared: SharedCollaborator = c.clone();
        let (tx, mut rx) = mpsc::channel(4);

        let mode = connect(Some(&shared), &SyncConfig::default(), tx).await;
        assert_eq!(mode, SyncMode::Synced);
        assert_eq!(c.probes.load(std::sync::atomic::Ordering::SeqCst), 4);
        assert_eq!(rx.recv().await, Some(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_max_attempts() {
        let c = Arc::new(ScriptedCollaborator::new(Behavior::Accept).ready_after(usize::MAX));
        let shared: SharedCollaborator = c.clone();
        let (tx, _rx) = mpsc::channel(4);

        let mode = connect(Some(&shared), &SyncConfig::default(), tx).await;
        assert_eq!(mode, SyncMode::Local);
        assert_eq!(c.probes.load(std::sync::atomic::Ordering::SeqCst), 10);
        assert!(!c.init_called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connect_init_failure() {
        let c = shared(ScriptedCollaborator::new(Behavior::Fail));
        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(
            connect(Some(&c), &SyncConfig::immediate(), tx).await,
            SyncMode::Local
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_init_timeout() {
        let c = shared(ScriptedCollaborator::new(Behavior::Hang));
        let (tx, _rx) = mpsc::channel(4);
        assert_eq!(
            connect(Some(&c), &SyncConfig::immediate(), tx).await,
            SyncMode::Local
        );
    }

    #[test]
    fn test_sync_mode_display() {
        assert_eq!(SyncMode::Synced.to_string(), "synced");
        assert_eq!(SyncMode::Local.to_string(), "local");
    }
}
