//! [`ManualController`] – live preview plus operator-held drive intents.
//!
//! A background thread captures frames as fast as the target frame rate
//! allows and publishes them to a [`FrameMailbox`].  The foreground loop,
//! running at the same rate, shows the latest frame, polls an
//! [`IntentSource`] and writes the motors only when the held intent changes.
//!
//! Shutdown order is fixed: clear the run flag, join the capture thread
//! (which drops the camera), then stop the motors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rover_hal::{Camera, CameraFrame, DriveBase, DriveCommand, FrameMailbox, HardwareError};
use tracing::{debug, info, warn};

/// Target preview and control rate.
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Pause before retrying after a failed capture.
pub const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// What the operator is asking for on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Hold this intent until told otherwise.  `Hold(Stop)` means no key.
    Hold(DriveCommand),
    Quit,
}

/// Where operator input comes from: a keyboard, a gamepad, a script.
pub trait IntentSource {
    fn poll(&mut self) -> Control;
}

/// Where preview frames go.
pub trait FrameSink {
    fn show(&mut self, frame: &CameraFrame);
}

/// Map a typed command to a [`Control`].
///
/// Letters follow the usual WASD layout; two letters combine a direction
/// with a turn (`wa`, `wd`, `sa`, `sd`, in either order).  `x` or an empty
/// line stops, `q` quits.  Anything else is `None`.
pub fn parse_control(input: &str) -> Option<Control> {
    let key = input.trim().to_ascii_lowercase();
    let mut letters: Vec<char> = key.chars().collect();
    letters.sort_unstable();
    let sorted: String = letters.into_iter().collect();

    let command = match sorted.as_str() {
        "" | "x" => DriveCommand::Stop,
        "q" => return Some(Control::Quit),
        "w" => DriveCommand::Forward,
        "s" => DriveCommand::Backward,
        "a" => DriveCommand::TurnLeft,
        "d" => DriveCommand::TurnRight,
        "aw" => DriveCommand::ForwardLeft,
        "dw" => DriveCommand::ForwardRight,
        "as" => DriveCommand::BackwardLeft,
        "ds" => DriveCommand::BackwardRight,
        _ => return None,
    };
    Some(Control::Hold(command))
}

/// Manual drive session.  Created with [`ManualController::start`], which
/// launches the capture thread; consumed by [`ManualController::run`].
pub struct ManualController {
    drive: DriveBase,
    mailbox: FrameMailbox,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    frame_interval: Duration,
    current: DriveCommand,
}

impl ManualController {
    /// Launch the capture thread for `camera` at `frame_rate` frames per
    /// second (at least 1).
    pub fn start(camera: Box<dyn Camera>, drive: DriveBase, frame_rate: u32) -> Self {
        let frame_interval = Duration::from_secs(1) / frame_rate.max(1);
        let mailbox = FrameMailbox::new();
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let mailbox = mailbox.clone();
            let running = Arc::clone(&running);
            thread::spawn(move || capture_loop(camera, mailbox, running, frame_interval))
        };
        info!(frame_rate, "manual control started");

        Self {
            drive,
            mailbox,
            running,
            worker: Some(worker),
            frame_interval,
            current: DriveCommand::Stop,
        }
    }

    /// A handle on the frame slot shared with the capture thread.
    pub fn mailbox(&self) -> FrameMailbox {
        self.mailbox.clone()
    }

    /// Run until `input` says [`Control::Quit`] or `shutdown` is set, then
    /// shut down in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`HardwareError`] from a motor write.  The capture
    /// thread is joined and the motors stopped either way.
    pub fn run(
        mut self,
        input: &mut dyn IntentSource,
        sink: &mut dyn FrameSink,
        shutdown: &AtomicBool,
    ) -> Result<(), HardwareError> {
        let outcome = self.control_loop(input, sink, shutdown);
        let stopped = self.shutdown();
        outcome.and(stopped)
    }

    fn control_loop(
        &mut self,
        input: &mut dyn IntentSource,
        sink: &mut dyn FrameSink,
        shutdown: &AtomicBool,
    ) -> Result<(), HardwareError> {
        while self.running.load(Ordering::Acquire) && !shutdown.load(Ordering::SeqCst) {
            let tick = Instant::now();

            if let Some(frame) = self.mailbox.latest() {
                sink.show(&frame);
            }

            match input.poll() {
                Control::Quit => {
                    info!("operator quit");
                    break;
                }
                Control::Hold(command) if command != self.current => {
                    debug!(?command, "intent changed");
                    self.drive.apply(command)?;
                    self.current = command;
                }
                Control::Hold(_) => {}
            }

            if let Some(rest) = self.frame_interval.checked_sub(tick.elapsed()) {
                thread::sleep(rest);
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), HardwareError> {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("capture thread panicked");
            }
        }
        self.current = DriveCommand::Stop;
        let stopped = self.drive.stop();
        info!("manual control stopped");
        stopped
    }
}

impl Drop for ManualController {
    fn drop(&mut self) {
        if self.worker.is_some() {
            if let Err(e) = self.shutdown() {
                warn!(error = %e, "failed to stop motors after manual control");
            }
        }
    }
}

fn capture_loop(
    mut camera: Box<dyn Camera>,
    mailbox: FrameMailbox,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    while running.load(Ordering::Acquire) {
        let tick = Instant::now();
        match camera.capture() {
            Ok(frame) => {
                mailbox.publish(frame);
                if let Some(rest) = interval.checked_sub(tick.elapsed()) {
                    thread::sleep(rest);
                }
            }
            Err(e) => {
                warn!(camera = camera.id(), error = %e, "frame capture failed");
                thread::sleep(CAPTURE_RETRY_DELAY);
            }
        }
    }
    debug!(camera = camera.id(), "capture thread exiting");
}
