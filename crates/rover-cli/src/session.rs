//! Wiring from [`Config`] to live hardware, providers and the two modes.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;
use rover_hal::{
    Camera, CameraFrame, DriveBase, DriveCommand, FrameCapture, HardwareError, ImageSource,
    PWM_PERIOD_NS, SimCamera, SimPwmChannel, StillCommand, StillFrames, SysfsPwmChip,
};
use rover_runtime::decision::DecisionClient;
use rover_runtime::explorer::{Explorer, ExplorerConfig};
use rover_runtime::gemini::GeminiService;
use rover_runtime::journal::JourneyJournal;
use rover_runtime::manual::{self, Control, FrameSink, IntentSource, ManualController};
use rover_runtime::openai::OpenAiCompatService;
use tracing::{info, warn};

use crate::config::{Config, Provider};

const OLLAMA_URL: &str = "http://localhost:11434";
const PREVIEW_SIZE: (u32, u32) = (640, 480);
const PREVIEW_SAVE_INTERVAL: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────────

/// Create the image and action log directories.
pub fn prepare_dirs(cfg: &Config) -> Result<(), String> {
    for dir in [&cfg.image_logs_dir, &cfg.action_logs_dir] {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
    }
    Ok(())
}

/// Open both drive channels, real or simulated.
pub fn build_drive(cfg: &Config) -> Result<DriveBase, HardwareError> {
    let hw = &cfg.hardware;
    let base = if hw.simulate {
        DriveBase::new(SimPwmChannel::new("left"), SimPwmChannel::new("right"))
    } else {
        let chip = SysfsPwmChip::discover(&hw.pwm_root, 2)?;
        let left = chip.channel(hw.left_channel, PWM_PERIOD_NS)?;
        let right = chip.channel(hw.right_channel, PWM_PERIOD_NS)?;
        DriveBase::new(Box::new(left), Box::new(right))
    };
    Ok(base.with_calibration(hw.neutral_us, hw.speed_us))
}

/// Still source for exploration.
pub fn build_image_source(cfg: &Config) -> Box<dyn ImageSource> {
    if cfg.hardware.simulate {
        let camera = SimCamera::new("sim", cfg.camera.width, cfg.camera.height);
        Box::new(FrameCapture::new(Box::new(camera)))
    } else {
        Box::new(StillCommand::new(
            &cfg.camera.command,
            cfg.camera.width,
            cfg.camera.height,
        ))
    }
}

/// Frame source for the manual preview, at preview resolution.
pub fn build_preview_camera(cfg: &Config) -> Box<dyn Camera> {
    let (width, height) = PREVIEW_SIZE;
    if cfg.hardware.simulate {
        Box::new(SimCamera::new("sim", width, height))
    } else {
        let scratch = std::env::temp_dir().join("rover-preview.jpg");
        Box::new(StillFrames::new(
            StillCommand::new(&cfg.camera.command, width, height),
            scratch,
        ))
    }
}

/// The configured provider behind a retrying client.
pub fn build_decision_client(cfg: &Config) -> Result<DecisionClient, String> {
    let service: Box<dyn rover_runtime::DecisionService> = match cfg.provider {
        Provider::Gemini => {
            if cfg.api_key.is_empty() {
                return Err(
                    "No Gemini API key configured; set api_key in /settings or ROVER_API_KEY"
                        .to_string(),
                );
            }
            let service = GeminiService::new(&cfg.api_key, &cfg.model);
            match &cfg.base_url {
                Some(url) => Box::new(service.with_base_url(url)),
                None => Box::new(service),
            }
        }
        Provider::OpenAi => {
            let url = cfg.base_url.as_deref().unwrap_or(OLLAMA_URL);
            Box::new(OpenAiCompatService::new(url, &cfg.model).with_api_key(&cfg.api_key))
        }
    };
    DecisionClient::new(service).map_err(|e| format!("Cannot build decision client: {e}"))
}

pub fn explorer_config(cfg: &Config) -> ExplorerConfig {
    ExplorerConfig {
        image_logs_dir: cfg.image_logs_dir.clone(),
        max_image_side: cfg.max_image_side,
        turn_dwell: Duration::from_millis(cfg.turn_dwell_ms),
        goal: cfg.goal.clone(),
    }
}

pub fn journal_path(cfg: &Config) -> PathBuf {
    cfg.action_logs_dir.join(rover_runtime::journal::JOURNAL_FILE)
}

// ─────────────────────────────────────────────────────────────────────────────
// Exploration
// ─────────────────────────────────────────────────────────────────────────────

/// Run `cycles` exploration cycles.  Returns the number completed.
///
/// Setting `shutdown` stops the run between cycles, or immediately if a
/// cycle is in flight; the wheels are returned to neutral either way.
pub async fn explore(cfg: &Config, cycles: u64, shutdown: &AtomicBool) -> Result<u64, String> {
    prepare_dirs(cfg)?;
    let client = build_decision_client(cfg)?;
    let drive = build_drive(cfg).map_err(|e| format!("Drive unavailable: {e}"))?;
    let journal = JourneyJournal::open(&cfg.action_logs_dir)
        .map_err(|e| format!("Cannot open journal: {e}"))?;

    info!(
        provider = %cfg.provider,
        model = %cfg.model,
        cycles,
        simulate = cfg.hardware.simulate,
        session = %journal.session(),
        "starting exploration"
    );

    let mut explorer = Explorer::new(
        explorer_config(cfg),
        build_image_source(cfg),
        client,
        drive,
    )
    .with_journal(journal);

    let outcome = tokio::select! {
        result = explorer.run(cycles, shutdown) => Some(result),
        () = wait_for(shutdown) => None,
    };

    if let Err(e) = explorer.stop() {
        warn!(error = %e, "failed to stop drive after exploration");
    }

    match outcome {
        Some(Ok(done)) => Ok(done),
        Some(Err(e)) => Err(format!(
            "Cycle {} failed: {e}",
            explorer.last_cycle()
        )),
        None => {
            warn!("exploration interrupted mid-cycle");
            Ok(explorer.cycles_attempted().saturating_sub(1))
        }
    }
}

async fn wait_for(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manual drive
// ─────────────────────────────────────────────────────────────────────────────

/// Keyboard intents read line by line from stdin.
///
/// A reader thread forwards parsed lines; it exits after `q` or end of input
/// so it never competes with the REPL for later lines.
pub struct StdinIntents {
    rx: Receiver<Control>,
    held: DriveCommand,
}

impl StdinIntents {
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) | Err(_) => {
                        let _ = tx.send(Control::Quit);
                        break;
                    }
                    Ok(_) => {}
                }
                match manual::parse_control(&line) {
                    Some(control) => {
                        if tx.send(control).is_err() || control == Control::Quit {
                            break;
                        }
                    }
                    None => println!(
                        "  {} '{}' (w/a/s/d, wa/wd/sa/sd, x = stop, q = quit)",
                        "Unknown key:".yellow(),
                        line.trim()
                    ),
                }
            }
        });
        Self {
            rx,
            held: DriveCommand::Stop,
        }
    }
}

impl IntentSource for StdinIntents {
    fn poll(&mut self) -> Control {
        loop {
            match self.rx.try_recv() {
                Ok(Control::Quit) | Err(TryRecvError::Disconnected) => return Control::Quit,
                Ok(Control::Hold(command)) => self.held = command,
                Err(TryRecvError::Empty) => return Control::Hold(self.held),
            }
        }
    }
}

/// Writes the latest preview frame to a file at most once per second.
pub struct PreviewFile {
    path: PathBuf,
    last_saved: Option<Instant>,
}

impl PreviewFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_saved: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSink for PreviewFile {
    fn show(&mut self, frame: &CameraFrame) {
        if self
            .last_saved
            .is_some_and(|t| t.elapsed() < PREVIEW_SAVE_INTERVAL)
        {
            return;
        }
        self.last_saved = Some(Instant::now());
        if let Err(e) = frame.save(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to save preview");
        }
    }
}

/// Run a manual drive session on stdin until `q` or shutdown.
pub fn manual_drive(cfg: &Config, shutdown: &AtomicBool) -> Result<(), String> {
    prepare_dirs(cfg)?;
    let drive = build_drive(cfg).map_err(|e| format!("Drive unavailable: {e}"))?;
    let mut sink = PreviewFile::new(cfg.image_logs_dir.join("preview.png"));
    let mut input = StdinIntents::spawn();

    println!(
        "  Manual drive. Type {} then Enter; {} stops, {} quits.",
        "w/a/s/d, wa/wd/sa/sd".bold(),
        "x".bold(),
        "q".bold()
    );
    println!("  Live preview: {}", sink.path().display().to_string().dimmed());

    let controller =
        ManualController::start(build_preview_camera(cfg), drive, manual::DEFAULT_FRAME_RATE);
    controller
        .run(&mut input, &mut sink, shutdown)
        .map_err(|e| format!("Drive fault: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_config(dir: &Path) -> Config {
        let mut cfg = Config::default();
        cfg.hardware.simulate = true;
        cfg.image_logs_dir = dir.join("images");
        cfg.action_logs_dir = dir.join("actions");
        cfg.camera.width = 32;
        cfg.camera.height = 24;
        cfg
    }

    #[test]
    fn gemini_requires_an_api_key() {
        let mut cfg = Config::default();
        cfg.api_key.clear();
        assert!(build_decision_client(&cfg).is_err());
        cfg.api_key = "k".into();
        assert_eq!(build_decision_client(&cfg).unwrap().service_name(), "gemini");
    }

    #[test]
    fn openai_provider_works_without_a_key() {
        let mut cfg = Config::default();
        cfg.provider = Provider::OpenAi;
        assert_eq!(build_decision_client(&cfg).unwrap().service_name(), "openai");
    }

    #[test]
    fn simulated_drive_uses_configured_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = sim_config(dir.path());
        cfg.hardware.neutral_us = 1500;
        cfg.hardware.speed_us = 100;
        let drive = build_drive(&cfg).unwrap();
        assert_eq!(drive.neutral_us(), 1500);
        assert_eq!(drive.speed_us(), 100);
    }

    #[test]
    fn real_drive_reports_missing_pwm_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.hardware.pwm_root = dir.path().join("no-pwm");
        assert!(matches!(build_drive(&cfg), Err(HardwareError::Io { .. })));
    }

    #[test]
    fn explorer_config_mirrors_settings() {
        let mut cfg = Config::default();
        cfg.turn_dwell_ms = 750;
        cfg.goal = Some("find the door".into());
        let ec = explorer_config(&cfg);
        assert_eq!(ec.turn_dwell, Duration::from_millis(750));
        assert_eq!(ec.goal.as_deref(), Some("find the door"));
        assert_eq!(ec.max_image_side, 1920);
    }

    #[test]
    fn prepare_dirs_creates_both_log_directories() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sim_config(dir.path());
        prepare_dirs(&cfg).unwrap();
        assert!(cfg.image_logs_dir.is_dir());
        assert!(cfg.action_logs_dir.is_dir());
        assert_eq!(journal_path(&cfg), cfg.action_logs_dir.join("journey.ndjson"));
    }

    #[tokio::test]
    async fn simulated_still_source_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sim_config(dir.path());
        prepare_dirs(&cfg).unwrap();
        let mut source = build_image_source(&cfg);
        let path = source.capture(&cfg.image_logs_dir.join("1.png")).await.unwrap();
        assert!(path.exists());
    }

    #[test]
    fn preview_file_is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let mut sink = PreviewFile::new(&path);
        let mut camera = SimCamera::new("sim", 4, 4);

        sink.show(&camera.capture().unwrap());
        let first = std::fs::read(&path).unwrap();
        sink.show(&camera.capture().unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), first, "second frame inside 1 s is skipped");
    }

    #[tokio::test]
    async fn explore_stops_immediately_when_already_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = sim_config(dir.path());
        cfg.provider = Provider::OpenAi;
        cfg.base_url = Some("http://127.0.0.1:9".into());
        let done = explore(&cfg, 3, &AtomicBool::new(true)).await.unwrap();
        assert_eq!(done, 0);
    }
}
