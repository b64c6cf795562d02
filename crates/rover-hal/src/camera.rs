//! `Camera` trait and raw frame type for frame-producing devices.

use std::path::Path;

use image::ExtendedColorType;

use crate::error::CaptureError;

/// A raw RGB24 frame returned by a camera driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Packed RGB24 pixel data, row-major.
    pub data: Vec<u8>,
}

impl CameraFrame {
    /// `true` when the frame has a non-zero size and exactly
    /// `width * height * 3` bytes of pixel data.
    pub fn is_complete(&self) -> bool {
        let expected = u64::from(self.width) * u64::from(self.height) * 3;
        expected > 0 && self.data.len() as u64 == expected
    }

    /// Encode the frame to `path`.  The format follows the file extension.
    ///
    /// # Errors
    ///
    /// [`CaptureError::Truncated`] for an incomplete frame, or
    /// [`CaptureError::Write`] if encoding or writing fails.
    pub fn save(&self, path: &Path) -> Result<(), CaptureError> {
        if !self.is_complete() {
            return Err(CaptureError::Truncated {
                width: self.width,
                height: self.height,
                len: self.data.len(),
            });
        }
        image::save_buffer(path, &self.data, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|source| CaptureError::Write {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// A camera that hands out whole frames on demand.
///
/// Used both by the manual controller's preview thread and, through
/// [`FrameCapture`][crate::image_source::FrameCapture], as a still source.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if the device has no frame to give.
    fn capture(&mut self) -> Result<CameraFrame, CaptureError>;
}

/// A simulated camera that renders a moving gradient so consecutive frames
/// differ.  Always succeeds.
pub struct SimCamera {
    id: String,
    width: u32,
    height: u32,
    tick: u8,
}

impl SimCamera {
    pub fn new(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            tick: 0,
        }
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, CaptureError> {
        let mut data = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(self.tick);
            }
        }
        self.tick = self.tick.wrapping_add(1);
        Ok(CameraFrame {
            width: self.width,
            height: self.height,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_camera_produces_complete_frames() {
        let mut cam = SimCamera::new("front", 4, 3);
        assert_eq!(cam.id(), "front");
        let a = cam.capture().unwrap();
        let b = cam.capture().unwrap();
        assert!(a.is_complete());
        assert_eq!(a.data.len(), 4 * 3 * 3);
        assert_ne!(a, b, "consecutive frames must differ");
    }

    #[test]
    fn truncated_or_empty_frames_are_incomplete() {
        let short = CameraFrame {
            width: 2,
            height: 2,
            data: vec![0; 11],
        };
        assert!(!short.is_complete());
        let empty = CameraFrame {
            width: 0,
            height: 0,
            data: Vec::new(),
        };
        assert!(!empty.is_complete());
    }

    #[test]
    fn save_writes_a_decodable_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = SimCamera::new("front", 8, 6).capture().unwrap();
        frame.save(&path).unwrap();
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (8, 6));
        assert_eq!(decoded.into_raw(), frame.data);
    }

    #[test]
    fn save_refuses_truncated_frames() {
        let dir = tempfile::tempdir().unwrap();
        let frame = CameraFrame {
            width: 4,
            height: 4,
            data: vec![0; 5],
        };
        let err = frame.save(&dir.path().join("bad.png")).unwrap_err();
        assert!(matches!(err, CaptureError::Truncated { len: 5, .. }));
    }
}
