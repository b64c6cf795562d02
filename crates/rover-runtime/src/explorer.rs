//! [`Explorer`] – the perceive/decide/act cycle.
//!
//! Each [`Explorer::step`]:
//!
//! 1. **Perceive** – capture a still to `<image_logs_dir>/<cycle>.png` and
//!    downsample it for upload.
//! 2. **Decide** – send the photo, the journey notes and the previous plan to
//!    the [`DecisionClient`].
//! 3. **Validate** – reject the whole response unless every action is
//!    well-formed.
//! 4. **Act** – run the actions in order on the [`DriveBase`], each inside a
//!    motion span that ends at neutral.
//! 5. **Remember** – append the journey note, replace the recent actions and
//!    write a [`JournalEntry`].
//!
//! Journey state only changes once every action has run.  Any earlier
//! failure leaves it exactly as it was.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::atomic::AtomicBool;
//! use rover_hal::{DriveBase, FrameCapture, SimCamera, SimPwmChannel};
//! use rover_runtime::decision::DecisionClient;
//! use rover_runtime::explorer::{Explorer, ExplorerConfig};
//! use rover_runtime::gemini::GeminiService;
//!
//! # async fn demo() -> Result<(), rover_runtime::explorer::CycleError> {
//! let drive = DriveBase::new(SimPwmChannel::new("left"), SimPwmChannel::new("right"));
//! let camera = FrameCapture::new(Box::new(SimCamera::new("front", 640, 480)));
//! let client = DecisionClient::new(Box::new(GeminiService::new("key", "gemini-2.5-flash")))?;
//!
//! let mut explorer = Explorer::new(ExplorerConfig::default(), Box::new(camera), client, drive);
//! explorer.run(5, &AtomicBool::new(false)).await?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use rover_hal::{
    CaptureError, DEFAULT_MAX_SIDE, DriveBase, HardwareError, ImageError, ImageSource, normalize,
};
use rover_types::{Action, DecisionRequest, DecisionResponse, ValidationError};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::decision::{DecisionClient, DecisionError};
use crate::journal::{JournalEntry, JourneyJournal};

/// How long a turn action holds its wheel intent.
pub const DEFAULT_TURN_DWELL: Duration = Duration::from_millis(1000);

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`Explorer`].
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    /// Where captured photos are stored.  Must exist.
    pub image_logs_dir: PathBuf,
    /// Longest side of an uploaded photo.
    pub max_image_side: u32,
    /// Hold time for `turn_left` / `turn_right`.
    pub turn_dwell: Duration,
    /// Optional standing instruction included in every prompt.
    pub goal: Option<String>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            image_logs_dir: PathBuf::from("logs/images"),
            max_image_side: DEFAULT_MAX_SIDE,
            turn_dwell: DEFAULT_TURN_DWELL,
            goal: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Journey state
// ─────────────────────────────────────────────────────────────────────────────

/// What the robot remembers between cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JourneyState {
    notes: Vec<String>,
    recent_actions: Vec<Action>,
}

impl JourneyState {
    /// Every journey note so far, oldest first.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    /// The plan executed by the most recent successful cycle.
    pub fn recent_actions(&self) -> &[Action] {
        &self.recent_actions
    }

    fn record(&mut self, note: String, actions: Vec<Action>) {
        self.notes.push(note);
        self.recent_actions = actions;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors and reports
// ─────────────────────────────────────────────────────────────────────────────

/// Why a cycle was aborted.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("image preparation failed: {0}")]
    Image(#[from] ImageError),

    #[error("decision failed: {0}")]
    Decision(#[from] DecisionError),

    #[error("rejected decision: {0}")]
    Validation(#[from] ValidationError),

    #[error("drive fault: {0}")]
    Hardware(#[from] HardwareError),

    #[error("journal write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a successful [`Explorer::step`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    /// The photo that was uploaded (possibly the downsampled copy).
    pub image_path: PathBuf,
    pub response: DecisionResponse,
}

// ─────────────────────────────────────────────────────────────────────────────
// Explorer
// ─────────────────────────────────────────────────────────────────────────────

/// Drives perceive/decide/act cycles, one at a time.
pub struct Explorer {
    config: ExplorerConfig,
    camera: Box<dyn ImageSource>,
    decisions: DecisionClient,
    drive: DriveBase,
    journal: Option<JourneyJournal>,
    journey: JourneyState,
    /// Highest photo number already on disk when this explorer was built.
    first_cycle: u64,
    attempted: u64,
}

impl Explorer {
    pub fn new(
        config: ExplorerConfig,
        camera: Box<dyn ImageSource>,
        decisions: DecisionClient,
        drive: DriveBase,
    ) -> Self {
        let first_cycle = last_photo_number(&config.image_logs_dir);
        if first_cycle > 0 {
            info!(after = first_cycle, "continuing photo numbering from an earlier run");
        }
        Self {
            config,
            camera,
            decisions,
            drive,
            journal: None,
            journey: JourneyState::default(),
            first_cycle,
            attempted: 0,
        }
    }

    /// Append an entry to `journal` after every completed cycle.
    pub fn with_journal(mut self, journal: JourneyJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn journey(&self) -> &JourneyState {
        &self.journey
    }

    /// Number of cycles this explorer has attempted, successful or not.
    pub fn cycles_attempted(&self) -> u64 {
        self.attempted
    }

    /// Number of the most recently attempted cycle, which also names its
    /// photo.  Numbering resumes after the photos of earlier runs.
    pub fn last_cycle(&self) -> u64 {
        self.first_cycle + self.attempted
    }

    /// Return both wheels to neutral.
    pub fn stop(&mut self) -> Result<(), HardwareError> {
        self.drive.stop()
    }

    /// Run one full cycle.
    ///
    /// # Errors
    ///
    /// Returns the [`CycleError`] that aborted the cycle.  Capture, decision
    /// and validation failures happen before any motor command.  A drive
    /// fault aborts the remaining actions; the wheels are still returned to
    /// neutral.  In every error case except [`CycleError::Io`] the journey
    /// state is unchanged.
    #[instrument(skip(self), fields(cycle = self.last_cycle() + 1))]
    pub async fn step(&mut self) -> Result<CycleReport, CycleError> {
        self.attempted += 1;
        let cycle = self.last_cycle();

        let result = self.attempt(cycle).await;
        if let Err(e) = &result {
            error!(error = %e, "cycle aborted");
        }
        result
    }

    async fn attempt(&mut self, cycle: u64) -> Result<CycleReport, CycleError> {
        let target = self.config.image_logs_dir.join(format!("{cycle}.png"));
        let captured = self.camera.capture(&target).await?;
        let upload = normalize(&captured, self.config.max_image_side)?;

        let request = DecisionRequest {
            goal: self.config.goal.clone(),
            journey_notes: self.journey.notes.clone(),
            last_actions: self.journey.recent_actions.clone(),
            image_path: Some(upload.clone()),
        };
        let response = self.decisions.invoke(&request).await?;

        if let Err(e) = response.validate() {
            warn!(error = %e, "discarding invalid decision");
            return Err(e.into());
        }
        if let Some(thoughts) = &response.thoughts {
            debug!(thoughts = %thoughts, "model reasoning");
        }
        info!(note = %response.current_journey_note, "journey note");

        for action in &response.next_actions {
            self.execute(action).await?;
        }

        self.journey
            .record(response.current_journey_note.clone(), response.next_actions.clone());

        if let Some(journal) = &mut self.journal {
            journal.append(&JournalEntry {
                session: journal.session(),
                cycle,
                timestamp: Utc::now(),
                image_path: upload.clone(),
                thoughts: response.thoughts.clone(),
                note: response.current_journey_note.clone(),
                actions: response.next_actions.clone(),
            })?;
        }

        Ok(CycleReport {
            cycle,
            image_path: upload,
            response,
        })
    }

    async fn execute(&mut self, action: &Action) -> Result<(), HardwareError> {
        let hold = self.hold_for(action);
        info!(tool = %action.tool, hold_ms = hold.as_millis() as u64, "executing action");
        self.drive.run_timed(action.tool.into(), hold).await
    }

    fn hold_for(&self, action: &Action) -> Duration {
        match action.duration {
            Some(seconds) if seconds > 0 => Duration::from_secs(seconds as u64),
            _ => self.config.turn_dwell,
        }
    }

    /// Run up to `cycles` steps, checking `shutdown` before each one.
    ///
    /// Returns the number of cycles completed.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first failed cycle.
    pub async fn run(&mut self, cycles: u64, shutdown: &AtomicBool) -> Result<u64, CycleError> {
        let mut completed = 0;
        for _ in 0..cycles {
            if shutdown.load(Ordering::SeqCst) {
                info!(completed, "shutdown requested; stopping exploration");
                break;
            }
            self.step().await?;
            completed += 1;
        }
        Ok(completed)
    }
}

/// Highest `<n>` among the `<n>.<ext>` and `<n>_small.<ext>` photos in
/// `dir`.  A missing directory counts as empty.
fn last_photo_number(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let stem = path.file_stem()?.to_str()?;
            stem.strip_suffix("_small").unwrap_or(stem).parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
