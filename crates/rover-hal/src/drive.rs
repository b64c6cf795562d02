//! [`DriveBase`] – the two-wheel differential-drive actuator.
//!
//! Each wheel is a continuous-rotation servo on its own PWM channel.  A pulse
//! of [`NEUTRAL_US`] holds it still; moving away from neutral by up to
//! [`SPEED_US`] spins it one way or the other.  The right servo is mounted
//! mirrored, so "forward" means `neutral + speed` on the left and
//! `neutral - speed` on the right.
//!
//! Timed maneuvers run inside a [`MotionSpan`].  The span stops both wheels
//! when it is finished *or* dropped, so a cancelled wait can never leave the
//! robot driving.
//!
//! # Example
//!
//! ```rust
//! use rover_hal::drive::{DriveBase, DriveCommand, NEUTRAL_US};
//! use rover_hal::pwm::{PwmLog, SimPwmChannel};
//!
//! let log = PwmLog::new();
//! let mut base = DriveBase::new(
//!     SimPwmChannel::with_log("left", log.clone()),
//!     SimPwmChannel::with_log("right", log.clone()),
//! );
//! base.apply(DriveCommand::Forward).unwrap();
//! base.stop().unwrap();
//! assert_eq!(log.last_for("left"), Some(NEUTRAL_US));
//! assert_eq!(log.last_for("right"), Some(NEUTRAL_US));
//! ```

use std::time::Duration;

use rover_types::ToolName;
use tracing::{debug, error};

use crate::error::HardwareError;
use crate::pwm::PwmChannel;

/// Pulse width that holds both servos still.
pub const NEUTRAL_US: u32 = 1450;

/// Full differential deflection from neutral.
pub const SPEED_US: u32 = 120;

/// A resolved pair of pulse widths, one per wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorIntent {
    pub left_us: u32,
    pub right_us: u32,
}

/// Symbolic drive intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveCommand {
    Stop,
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    ForwardLeft,
    ForwardRight,
    BackwardLeft,
    BackwardRight,
}

impl DriveCommand {
    /// Resolve to pulse widths around `neutral` with deflection `speed`.
    ///
    /// Combined maneuvers keep one wheel at full speed and the other at half
    /// speed in the same sense, so the robot keeps moving while yawing toward
    /// the slower wheel.  The keyboard controller used on the bench robot maps
    /// `forward_left` the other way round (`(neutral + speed, neutral - speed / 2)`),
    /// which curves right on this chassis; these pairs follow the tool names.
    pub fn intent(self, neutral: u32, speed: u32) -> MotorIntent {
        let half = speed / 2;
        let up = |d: u32| neutral.saturating_add(d);
        let down = |d: u32| neutral.saturating_sub(d);
        let (left_us, right_us) = match self {
            DriveCommand::Stop => (neutral, neutral),
            DriveCommand::Forward => (up(speed), down(speed)),
            DriveCommand::Backward => (down(speed), up(speed)),
            DriveCommand::TurnLeft => (down(speed), down(speed)),
            DriveCommand::TurnRight => (up(speed), up(speed)),
            DriveCommand::ForwardLeft => (up(half), down(speed)),
            DriveCommand::ForwardRight => (up(speed), down(half)),
            DriveCommand::BackwardLeft => (down(half), up(speed)),
            DriveCommand::BackwardRight => (down(speed), up(half)),
        };
        MotorIntent { left_us, right_us }
    }
}

impl From<ToolName> for DriveCommand {
    fn from(tool: ToolName) -> Self {
        match tool {
            ToolName::MoveForward => DriveCommand::Forward,
            ToolName::GoBackward => DriveCommand::Backward,
            ToolName::TurnLeft => DriveCommand::TurnLeft,
            ToolName::TurnRight => DriveCommand::TurnRight,
        }
    }
}

/// Owns the left and right PWM channels.
///
/// Dropping the base returns both wheels to neutral before the channels are
/// released.
pub struct DriveBase {
    left: Box<dyn PwmChannel>,
    right: Box<dyn PwmChannel>,
    neutral_us: u32,
    speed_us: u32,
}

impl DriveBase {
    /// Build a drive base with the default [`NEUTRAL_US`] / [`SPEED_US`]
    /// calibration.
    pub fn new(left: Box<dyn PwmChannel>, right: Box<dyn PwmChannel>) -> Self {
        Self {
            left,
            right,
            neutral_us: NEUTRAL_US,
            speed_us: SPEED_US,
        }
    }

    /// Override the servo calibration.
    pub fn with_calibration(mut self, neutral_us: u32, speed_us: u32) -> Self {
        self.neutral_us = neutral_us;
        self.speed_us = speed_us;
        self
    }

    pub fn neutral_us(&self) -> u32 {
        self.neutral_us
    }

    pub fn speed_us(&self) -> u32 {
        self.speed_us
    }

    /// Pulse widths this base would write for `command` at its default speed.
    pub fn intent_for(&self, command: DriveCommand) -> MotorIntent {
        command.intent(self.neutral_us, self.speed_us)
    }

    /// Write both channels.  The right channel is written even when the left
    /// write fails; the first error is returned.
    ///
    /// # Errors
    ///
    /// Propagates the channel's [`HardwareError`].
    pub fn set_lr(&mut self, left_us: u32, right_us: u32) -> Result<(), HardwareError> {
        let left = self.left.set_duty_us(left_us);
        let right = self.right.set_duty_us(right_us);
        debug!(left_us, right_us, "set_lr");
        left.and(right)
    }

    /// Return both wheels to neutral.
    ///
    /// # Errors
    ///
    /// Propagates the channel's [`HardwareError`].
    pub fn stop(&mut self) -> Result<(), HardwareError> {
        self.set_lr(self.neutral_us, self.neutral_us)
    }

    /// Apply `command` at the default speed.
    ///
    /// # Errors
    ///
    /// Propagates the channel's [`HardwareError`].
    pub fn apply(&mut self, command: DriveCommand) -> Result<(), HardwareError> {
        self.apply_with_speed(command, self.speed_us)
    }

    /// Apply `command` with an explicit deflection.
    ///
    /// # Errors
    ///
    /// Propagates the channel's [`HardwareError`].
    pub fn apply_with_speed(&mut self, command: DriveCommand, speed_us: u32) -> Result<(), HardwareError> {
        let MotorIntent { left_us, right_us } = command.intent(self.neutral_us, speed_us);
        self.set_lr(left_us, right_us)
    }

    /// Apply `command`, hold it for `duration`, then stop.
    ///
    /// The stop is issued even if this future is dropped mid-wait.
    ///
    /// # Errors
    ///
    /// Returns the first [`HardwareError`] from applying the command or from
    /// the final stop.
    pub async fn run_timed(&mut self, command: DriveCommand, duration: Duration) -> Result<(), HardwareError> {
        let span = MotionSpan::begin(self, command)?;
        tokio::time::sleep(duration).await;
        span.finish()
    }
}

impl Drop for DriveBase {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "failed to stop drive base on shutdown");
        }
    }
}

/// A motion in progress.  Both wheels return to neutral when the span ends.
pub struct MotionSpan<'a> {
    base: &'a mut DriveBase,
    finished: bool,
}

impl<'a> MotionSpan<'a> {
    /// Start `command` on `base`.
    ///
    /// If the command cannot be applied the span is dropped immediately, which
    /// still attempts the stop.
    ///
    /// # Errors
    ///
    /// Propagates the channel's [`HardwareError`].
    pub fn begin(base: &'a mut DriveBase, command: DriveCommand) -> Result<Self, HardwareError> {
        let mut span = Self {
            base,
            finished: false,
        };
        span.base.apply(command)?;
        Ok(span)
    }

    /// End the motion and report whether the stop reached the hardware.
    ///
    /// # Errors
    ///
    /// Propagates the channel's [`HardwareError`].
    pub fn finish(mut self) -> Result<(), HardwareError> {
        self.finished = true;
        self.base.stop()
    }
}

impl Drop for MotionSpan<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.base.stop() {
            error!(error = %e, "failed to stop drive base after interrupted motion");
        }
    }
}
