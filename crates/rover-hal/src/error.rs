//! Error types raised by the hardware layer.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures of the PWM control surface.
///
/// Discovery and export errors happen once at start-up; `Io` can also come
/// from a duty-cycle write.
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("no pwmchip under {root} exposes {needed} or more channels")]
    NoPwmChip { root: PathBuf, needed: u32 },

    #[error("pwm channel {channel} did not appear after export")]
    ExportTimeout { channel: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The image source could not produce a photo.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("camera '{camera}' produced no frame")]
    NoFrame { camera: String },

    #[error("frame of {width}x{height} carries {len} bytes of pixel data")]
    Truncated { width: u32, height: u32, len: usize },

    #[error("camera '{camera}' fault: {details}")]
    Device { camera: String, details: String },

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    CommandFailed { program: String, status: ExitStatus },

    #[error("failed to write frame to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Errors from [`normalize`][crate::image_source::normalize].
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("cannot decode {path} as an image: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cannot write resized image to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
