//! Detection sources and camera surfaces.
//!
//! A [`DetectionSource`] is an endless stream of per-frame verdicts. The
//! simulated source flips a weighted coin for each frame; a real detector
//! would plug in behind the same trait. [`watch_for_face`] turns the stream
//! into a single "a face stayed in view long enough" trigger for one
//! surface session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::config::SurfaceProfile;
use crate::model::Student;

/// Simulated frame width in pixels.
const FRAME_WIDTH: u32 = 640;

/// Simulated frame height in pixels.
const FRAME_HEIGHT: u32 = 480;

/// Size of the box drawn around a simulated face.
const FACE_BOX_WIDTH: u32 = 120;
const FACE_BOX_HEIGHT: u32 = 150;

/// A camera surface that can trigger check-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSurface {
    /// The dashboard recognition camera.
    Recognition,
    /// The quick-attendance camera.
    QuickAttendance,
}

impl fmt::Display for DetectionSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recognition => write!(f, "recognition"),
            Self::QuickAttendance => write!(f, "quick_attendance"),
        }
    }
}

/// Where a face was seen within a frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Box width.
    pub width: u32,
    /// Box height.
    pub height: u32,
}

impl FaceBox {
    /// A box of the standard face size centered in a `width` × `height` frame.
    #[must_use]
    pub fn centered(width: u32, height: u32) -> Self {
        Self {
            x: width.saturating_sub(FACE_BOX_WIDTH) / 2,
            y: height.saturating_sub(FACE_BOX_HEIGHT) / 2,
            width: FACE_BOX_WIDTH,
            height: FACE_BOX_HEIGHT,
        }
    }
}

/// Verdict for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// A face is in view.
    FaceFound(FaceBox),
    /// Nothing in view.
    NoFace,
}

impl Detection {
    /// Whether a face was seen.
    #[must_use]
    pub fn is_face(&self) -> bool {
        matches!(self, Self::FaceFound(_))
    }
}

/// An endless, restartable stream of per-frame detections.
///
/// `next()` must never return `None`.
pub trait DetectionSource: Iterator<Item = Detection> + Send {
    /// Rewind the source as if the camera had just been switched on.
    fn restart(&mut self);
}

/// Detection source that reports a face with a fixed probability per frame.
#[derive(Debug)]
pub struct SimulatedDetector {
    hit_rate: f64,
    seed: Option<u64>,
    rng: StdRng,
}

impl SimulatedDetector {
    /// Create a detector reporting a face with probability `hit_rate`.
    ///
    /// Rates outside `0..=1` are clamped; a non-finite rate never reports a
    /// face.
    ///
    /// With a seed the sequence is reproducible, and [`restart`] replays it
    /// from the start. Without one each restart draws fresh entropy.
    ///
    /// [`restart`]: DetectionSource::restart
    #[must_use]
    pub fn new(hit_rate: f64, seed: Option<u64>) -> Self {
        Self {
            hit_rate: if hit_rate.is_finite() {
                hit_rate.clamp(0.0, 1.0)
            } else {
                0.0
            },
            seed,
            rng: Self::make_rng(seed),
        }
    }

    /// Create a detector using a surface profile's hit rate.
    #[must_use]
    pub fn for_profile(profile: &SurfaceProfile, seed: Option<u64>) -> Self {
        Self::new(profile.hit_rate, seed)
    }

    fn make_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl Iterator for SimulatedDetector {
    type Item = Detection;

    fn next(&mut self) -> Option<Detection> {
        if self.rng.gen_bool(self.hit_rate) {
            Some(Detection::FaceFound(FaceBox::centered(FRAME_WIDTH, FRAME_HEIGHT)))
        } else {
            Some(Detection::NoFace)
        }
    }
}

impl DetectionSource for SimulatedDetector {
    fn restart(&mut self) {
        self.rng = Self::make_rng(self.seed);
    }
}

/// Maps a detected face to a roster entry.
pub trait Recognizer: Send {
    /// Pick the student in view, if any.
    fn identify(&mut self, roster: &[Student]) -> Option<Student>;
}

/// Recognizer that picks a uniformly random roster entry.
#[derive(Debug)]
pub struct RandomRecognizer {
    rng: StdRng,
}

impl RandomRecognizer {
    /// Create a recognizer, optionally seeded.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: SimulatedDetector::make_rng(seed),
        }
    }
}

impl Recognizer for RandomRecognizer {
    fn identify(&mut self, roster: &[Student]) -> Option<Student> {
        roster.choose(&mut self.rng).cloned()
    }
}

/// Raised when a surface already has a session running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{surface} camera is already running")]
pub struct SurfaceBusy {
    /// The busy surface.
    pub surface: DetectionSurface,
}

/// Cloneable control for one detection surface.
///
/// A surface runs at most one session at a time; [`begin`](Self::begin)
/// refuses to start a second. Other surfaces are unaffected.
#[derive(Debug, Clone)]
pub struct SurfaceHandle {
    surface: DetectionSurface,
    active: Arc<AtomicBool>,
}

impl SurfaceHandle {
    /// Create an idle handle.
    #[must_use]
    pub fn new(surface: DetectionSurface) -> Self {
        Self {
            surface,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The surface this handle controls.
    #[must_use]
    pub fn surface(&self) -> DetectionSurface {
        self.surface
    }

    /// Start a session; the returned guard ends it when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SurfaceBusy`] if a session is already running.
    pub fn begin(&self) -> Result<SurfaceSession, SurfaceBusy> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(SurfaceBusy {
                surface: self.surface,
            });
        }
        debug!(surface = %self.surface, "Surface session started");
        Ok(SurfaceSession {
            handle: self.clone(),
        })
    }

    /// Ask the running session to end.
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Whether a session is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Guard for a running surface session.
#[derive(Debug)]
pub struct SurfaceSession {
    handle: SurfaceHandle,
}

impl SurfaceSession {
    /// Whether the session has been asked to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        !self.handle.is_active()
    }
}

impl Drop for SurfaceSession {
    fn drop(&mut self) {
        self.handle.stop();
        debug!(surface = %self.handle.surface, "Surface session ended");
    }
}

/// Sample `source` until a face stays in view for the profile's settle time.
///
/// Samples are taken every `poll_interval`. Losing the face before the
/// settle time elapses starts the wait over. Returns `None` if the session is
/// stopped first.
pub async fn watch_for_face<S>(
    source: &mut S,
    profile: &SurfaceProfile,
    session: &SurfaceSession,
) -> Option<FaceBox>
where
    S: DetectionSource + ?Sized,
{
    let mut ticker = interval(profile.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let settle = profile.settle_time();
    let mut pending: Option<(Instant, FaceBox)> = None;

    loop {
        ticker.tick().await;
        if session.is_stopped() {
            return None;
        }

        match source.next() {
            Some(Detection::FaceFound(face)) => {
                if pending.is_none() {
                    trace!("Face detected, waiting for it to settle");
                    pending = Some((Instant::now() + settle, face));
                }
            }
            Some(Detection::NoFace) | None => {
                if pending.take().is_some() {
                    trace!("Face lost before settling");
                }
            }
        }

        if let Some((deadline, face)) = pending {
            if Instant::now() >= deadline {
                debug!(?face, "Face settled");
                return Some(face);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Replays a fixed pattern of detections forever.
    #[derive(Debug, Clone)]
    pub struct ScriptedSource {
        pattern: Vec<bool>,
        pos: usize,
    }

    impl ScriptedSource {
        pub fn new(pattern: &[bool]) -> Self {
            assert!(!pattern.is_empty());
            Self {
                pattern: pattern.to_vec(),
                pos: 0,
            }
        }
    }

    impl Iterator for ScriptedSource {
        type Item = Detection;

        fn next(&mut self) -> Option<Detection> {
            let hit = self.pattern[self.pos % self.pattern.len()];
            self.pos += 1;
            Some(if hit {
                Detection::FaceFound(FaceBox::centered(FRAME_WIDTH, FRAME_HEIGHT))
            } else {
                Detection::NoFace
            })
        }
    }

    impl DetectionSource for ScriptedSource {
        fn restart(&mut self) {
            self.pos = 0;
        }
    }
}
