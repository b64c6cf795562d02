//! `rover-hal` – hardware abstraction for the Rover drive base and camera.
//!
//! # Modules
//!
//! - [`pwm`] – [`PwmChannel`][pwm::PwmChannel]: one pulse-width output.
//!   [`SysfsPwmChip`][pwm::SysfsPwmChip] drives the Linux `/sys/class/pwm`
//!   interface; [`SimPwmChannel`][pwm::SimPwmChannel] records writes for
//!   headless runs and tests.
//! - [`drive`] – [`DriveBase`][drive::DriveBase]: the differential-drive
//!   actuator.  Maps a [`DriveCommand`][drive::DriveCommand] to a pair of
//!   pulse widths and runs timed maneuvers inside a
//!   [`MotionSpan`][drive::MotionSpan] that always ends at neutral.
//! - [`camera`] – [`Camera`][camera::Camera]: raw RGB frame producers.
//! - [`image_source`] – [`ImageSource`][image_source::ImageSource]: still
//!   capture to a file (a camera frame or an external tool such as
//!   `rpicam-still`), plus [`normalize`][image_source::normalize] which
//!   downsamples oversized photos before upload.
//! - [`frame_mailbox`] – [`FrameMailbox`][frame_mailbox::FrameMailbox]: the
//!   single-slot, lock-guarded handoff between a capture thread and a viewer.

pub mod camera;
pub mod drive;
pub mod error;
pub mod frame_mailbox;
pub mod image_source;
pub mod pwm;

pub use camera::{Camera, CameraFrame, SimCamera};
pub use drive::{DriveBase, DriveCommand, MotionSpan, MotorIntent, NEUTRAL_US, SPEED_US};
pub use error::{CaptureError, HardwareError, ImageError};
pub use frame_mailbox::FrameMailbox;
pub use image_source::{
    DEFAULT_MAX_SIDE, FrameCapture, ImageSource, StillCommand, StillFrames, downsampled_path,
    mime_type_for, normalize,
};
pub use pwm::{PWM_PERIOD_NS, PwmChannel, PwmLog, PwmWrite, SimPwmChannel, SysfsPwmChannel, SysfsPwmChip};
