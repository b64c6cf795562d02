//! Still capture to disk and upload-size normalisation.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use image::imageops::FilterType;
use image::GenericImageView;
use tracing::{debug, info};

use crate::camera::{Camera, CameraFrame};
use crate::error::{CaptureError, ImageError};

/// Longest side, in pixels, of an image sent to the decision service.
pub const DEFAULT_MAX_SIDE: u32 = 1920;

/// Anything that can take one photo and store it at a given path.
#[async_trait]
pub trait ImageSource: Send {
    /// Capture one still into `path` and return the path actually written.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if no frame could be produced or stored.
    async fn capture(&mut self, path: &Path) -> Result<PathBuf, CaptureError>;
}

/// Adapts a frame-producing [`Camera`] into an [`ImageSource`].  The file
/// format follows the extension of the target path.
pub struct FrameCapture {
    camera: Box<dyn Camera>,
}

impl FrameCapture {
    pub fn new(camera: Box<dyn Camera>) -> Self {
        Self { camera }
    }
}

#[async_trait]
impl ImageSource for FrameCapture {
    async fn capture(&mut self, path: &Path) -> Result<PathBuf, CaptureError> {
        let frame = self.camera.capture()?;
        if !frame.is_complete() {
            return Err(CaptureError::NoFrame {
                camera: self.camera.id().to_string(),
            });
        }
        let (width, height) = (frame.width, frame.height);
        frame.save(path)?;
        debug!(path = %path.display(), width, height, "frame written");
        Ok(path.to_path_buf())
    }
}

/// Runs an external still-capture program (e.g. `rpicam-still`) that writes
/// straight to the target file.
#[derive(Debug, Clone)]
pub struct StillCommand {
    program: String,
    width: u32,
    height: u32,
}

impl StillCommand {
    pub fn new(program: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            program: program.into(),
            width,
            height,
        }
    }

    /// Arguments passed to the program for a capture into `path`.
    pub fn args_for(&self, path: &Path) -> Vec<String> {
        let encoding = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "png".to_string());
        vec![
            "--nopreview".to_string(),
            "--timeout".to_string(),
            "1000".to_string(),
            "--width".to_string(),
            self.width.to_string(),
            "--height".to_string(),
            self.height.to_string(),
            "--encoding".to_string(),
            encoding,
            "--output".to_string(),
            path.display().to_string(),
        ]
    }
}

impl StillCommand {
    fn check(&self, status: std::io::Result<ExitStatus>) -> Result<(), CaptureError> {
        let status = status.map_err(|source| CaptureError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        if !status.success() {
            return Err(CaptureError::CommandFailed {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ImageSource for StillCommand {
    async fn capture(&mut self, path: &Path) -> Result<PathBuf, CaptureError> {
        let status = tokio::process::Command::new(&self.program)
            .args(self.args_for(path))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        self.check(status)?;

        let written = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if written == 0 {
            return Err(CaptureError::NoFrame {
                camera: self.program.clone(),
            });
        }
        Ok(path.to_path_buf())
    }
}

/// A [`Camera`] built on a [`StillCommand`]: every frame is one still written
/// to a scratch file and decoded back.  Far below video rate, but enough for a
/// preview on boards that only ship a still-capture tool.
pub struct StillFrames {
    command: StillCommand,
    scratch: PathBuf,
}

impl StillFrames {
    pub fn new(command: StillCommand, scratch: impl Into<PathBuf>) -> Self {
        Self {
            command,
            scratch: scratch.into(),
        }
    }
}

impl Camera for StillFrames {
    fn id(&self) -> &str {
        &self.command.program
    }

    fn capture(&mut self) -> Result<CameraFrame, CaptureError> {
        let status = std::process::Command::new(&self.command.program)
            .args(self.command.args_for(&self.scratch))
            .stdin(Stdio::null())
            .status();
        self.command.check(status)?;

        let image = image::open(&self.scratch).map_err(|_| CaptureError::NoFrame {
            camera: self.command.program.clone(),
        })?;
        let rgb = image.to_rgb8();
        Ok(CameraFrame {
            width: rgb.width(),
            height: rgb.height(),
            data: rgb.into_raw(),
        })
    }
}

/// Where [`normalize`] writes a downsampled copy: `<stem>_small.<ext>` next
/// to the full-size photo.
pub fn downsampled_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_small.{}", ext.to_string_lossy()),
        None => format!("{stem}_small"),
    };
    path.with_file_name(name)
}

/// Shrink `path` so that its longer side is at most `max_side`.
///
/// Images already within bounds are left alone and `path` is returned as-is.
/// Larger images are scaled by `max_side / longer_side` (floored, never below
/// one pixel) and written to [`downsampled_path`].
///
/// ```rust,no_run
/// use std::path::Path;
/// use rover_hal::image_source::{normalize, DEFAULT_MAX_SIDE};
///
/// let upload = normalize(Path::new("images/1.png"), DEFAULT_MAX_SIDE).unwrap();
/// ```
///
/// # Errors
///
/// [`ImageError::Decode`] if `path` is not a readable image, or
/// [`ImageError::Write`] if the downsampled copy cannot be saved.
pub fn normalize(path: &Path, max_side: u32) -> Result<PathBuf, ImageError> {
    let image = image::open(path).map_err(|source| ImageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let (width, height) = image.dimensions();
    let longer = width.max(height);
    if longer <= max_side {
        return Ok(path.to_path_buf());
    }

    let scale = |side: u32| {
        let scaled = u64::from(side) * u64::from(max_side) / u64::from(longer);
        (scaled as u32).max(1)
    };
    let (new_width, new_height) = (scale(width), scale(height));

    let resized = image.resize_exact(new_width, new_height, FilterType::Triangle);
    let output = downsampled_path(path);
    resized.save(&output).map_err(|source| ImageError::Write {
        path: output.clone(),
        source,
    })?;

    info!(
        from = %format!("{width}x{height}"),
        to = %format!("{new_width}x{new_height}"),
        path = %output.display(),
        "downsampled photo"
    );
    Ok(output)
}

/// MIME type for an image file, inferred from its extension.  Unknown or
/// missing extensions fall back to `image/png`.
pub fn mime_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("heif") => "image/heif",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SimCamera;
    use image::RgbImage;

    fn write_image(path: &Path, width: u32, height: u32) {
        RgbImage::from_pixel(width, height, image::Rgb([10, 120, 200]))
            .save(path)
            .unwrap();
    }

    fn dims(path: &Path) -> (u32, u32) {
        image::open(path).unwrap().dimensions()
    }

    #[test]
    fn small_image_is_returned_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.png");
        write_image(&path, 120, 80);

        let out = normalize(&path, 200).unwrap();
        assert_eq!(out, path);
        assert!(!downsampled_path(&path).exists());
    }

    #[test]
    fn exact_bound_is_not_resized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.png");
        write_image(&path, 200, 50);
        assert_eq!(normalize(&path, 200).unwrap(), path);
    }

    #[test]
    fn landscape_image_is_scaled_to_max_side() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("3.png");
        write_image(&path, 400, 300);

        let out = normalize(&path, 192).unwrap();
        assert_eq!(out, dir.path().join("3_small.png"));
        assert_eq!(dims(&out), (192, 144));
    }

    #[test]
    fn portrait_image_scales_on_height() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tall.jpg");
        write_image(&path, 300, 500);

        let out = normalize(&path, 100).unwrap();
        assert_eq!(out, dir.path().join("tall_small.jpg"));
        assert_eq!(dims(&out), (60, 100));
    }

    #[test]
    fn thin_image_keeps_at_least_one_pixel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strip.png");
        write_image(&path, 500, 1);
        let out = normalize(&path, 50).unwrap();
        assert_eq!(dims(&out), (50, 1));
    }

    #[test]
    fn normalize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("5.png");
        write_image(&path, 640, 480);

        let once = normalize(&path, 256).unwrap();
        let twice = normalize(&once, 256).unwrap();
        assert_eq!(once, twice);
        let (w, h) = dims(&twice);
        assert!(w <= 256 && h <= 256);
    }

    #[test]
    fn camera_sized_photo_fits_upload_bound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bmp");
        write_image(&path, 4000, 3000);

        let out = normalize(&path, DEFAULT_MAX_SIDE).unwrap();
        assert_eq!(dims(&out), (1920, 1440));
    }

    #[test]
    fn undecodable_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(matches!(
            normalize(&path, 100),
            Err(ImageError::Decode { .. })
        ));
        assert!(matches!(
            normalize(&dir.path().join("missing.png"), 100),
            Err(ImageError::Decode { .. })
        ));
    }

    #[test]
    fn downsampled_path_keeps_directory_and_extension() {
        assert_eq!(
            downsampled_path(Path::new("/var/rover/images/12.png")),
            PathBuf::from("/var/rover/images/12_small.png")
        );
        assert_eq!(
            downsampled_path(Path::new("photo")),
            PathBuf::from("photo_small")
        );
    }

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(mime_type_for(Path::new("a.png")), "image/png");
        assert_eq!(mime_type_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_type_for(Path::new("a.tiff")), "image/png");
        assert_eq!(mime_type_for(Path::new("noext")), "image/png");
    }

    #[tokio::test]
    async fn frame_capture_writes_decodable_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.png");
        let mut source = FrameCapture::new(Box::new(SimCamera::new("front", 32, 24)));

        let out = source.capture(&path).await.unwrap();
        assert_eq!(out, path);
        assert_eq!(dims(&out), (32, 24));
    }

    struct BlankCamera;

    impl Camera for BlankCamera {
        fn id(&self) -> &str {
            "blank"
        }

        fn capture(&mut self) -> Result<CameraFrame, CaptureError> {
            Ok(CameraFrame {
                width: 0,
                height: 0,
                data: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn frame_capture_rejects_empty_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FrameCapture::new(Box::new(BlankCamera));
        let err = source.capture(&dir.path().join("1.png")).await.unwrap_err();
        assert!(matches!(err, CaptureError::NoFrame { camera } if camera == "blank"));
    }

    #[test]
    fn still_command_arguments_follow_target() {
        let cmd = StillCommand::new("rpicam-still", 3280, 2464);
        let args = cmd.args_for(Path::new("/tmp/7.png"));
        assert!(args.windows(2).any(|w| w == ["--width", "3280"]));
        assert!(args.windows(2).any(|w| w == ["--height", "2464"]));
        assert!(args.windows(2).any(|w| w == ["--encoding", "png"]));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/7.png"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn still_command_without_output_is_no_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = StillCommand::new("true", 10, 10);
        let err = cmd.capture(&dir.path().join("1.png")).await.unwrap_err();
        assert!(matches!(err, CaptureError::NoFrame { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn still_command_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = StillCommand::new("false", 10, 10);
        let err = cmd.capture(&dir.path().join("1.png")).await.unwrap_err();
        assert!(matches!(err, CaptureError::CommandFailed { .. }));

        let mut missing = StillCommand::new("rover-no-such-capture-tool", 10, 10);
        let err = missing.capture(&dir.path().join("2.png")).await.unwrap_err();
        assert!(matches!(err, CaptureError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn still_frames_report_command_failures() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("preview.png");

        let mut failing = StillFrames::new(StillCommand::new("false", 64, 48), &scratch);
        assert!(matches!(failing.capture(), Err(CaptureError::CommandFailed { .. })));

        let mut silent = StillFrames::new(StillCommand::new("true", 64, 48), &scratch);
        assert_eq!(silent.id(), "true");
        assert!(matches!(silent.capture(), Err(CaptureError::NoFrame { .. })));
    }
}
