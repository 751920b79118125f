//! Still-image capture.
//!
//! This module provides the cameras the control loop can photograph a
//! vehicle with:
//! - `FixtureCamera`: picks a fixture record, writes nothing (stub://)
//! - `DirectoryCamera`: copies a fixture image to a timestamped capture
//!   (file://<dir>)
//! - `V4l2Camera`: local V4L2 device, JPEG to disk (feature: camera-v4l2)
//!
//! A capture returns the dashboard-facing image path plus a plate hint drawn
//! from the fixture set. The hint stands in for OCR output; the recognizer
//! decides whether to use it.

#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::CameraSettings;
use crate::error::CaptureError;
use crate::plates::PlateFixtures;

#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Capture {
    /// Path the dashboard loads the image from (e.g. "/images/car_...jpg").
    pub image_path: String,
    /// Stand-in plate value; `None` when no fixture was available.
    pub plate_hint: Option<String>,
}

pub trait Camera: Send {
    fn capture_image(&mut self) -> Result<Capture, CaptureError>;

    fn release(&mut self) {}
}

/// Camera with no hardware behind it: every capture is a random fixture
/// record.
pub struct FixtureCamera {
    fixtures: Arc<PlateFixtures>,
    rng: StdRng,
}

impl FixtureCamera {
    pub fn new(fixtures: Arc<PlateFixtures>) -> Self {
        Self {
            fixtures,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(fixtures: Arc<PlateFixtures>, seed: u64) -> Self {
        Self {
            fixtures,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Camera for FixtureCamera {
    fn capture_image(&mut self) -> Result<Capture, CaptureError> {
        let record = self
            .fixtures
            .choose(&mut self.rng)
            .ok_or(CaptureError::NoFixtures)?;
        log::info!("simulated capture: {}", record.image);
        Ok(Capture {
            image_path: record.image.clone(),
            plate_hint: Some(record.plate.clone()),
        })
    }
}

/// Camera that "photographs" by copying fixture images out of a source
/// directory into the image directory under a timestamped name.
pub struct DirectoryCamera {
    source_dir: PathBuf,
    image_dir: PathBuf,
    url_prefix: String,
    fixtures: Arc<PlateFixtures>,
    rng: StdRng,
}

impl DirectoryCamera {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        settings: &CameraSettings,
        fixtures: Arc<PlateFixtures>,
    ) -> Self {
        Self {
            source_dir: source_dir.into(),
            image_dir: settings.image_dir.clone(),
            url_prefix: settings.url_prefix.trim_end_matches('/').to_string(),
            fixtures,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }
}

impl Camera for DirectoryCamera {
    fn capture_image(&mut self) -> Result<Capture, CaptureError> {
        let record = self
            .fixtures
            .choose(&mut self.rng)
            .ok_or(CaptureError::NoFixtures)?;
        let file_name = Path::new(&record.image)
            .file_name()
            .ok_or_else(|| CaptureError::Device(format!("bad fixture image {}", record.image)))?;
        let source = self.source_dir.join(file_name);
        let ext = source
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("jpg")
            .to_string();

        std::fs::create_dir_all(&self.image_dir)?;
        let dest = unique_capture_path(&self.image_dir, &Local::now(), &ext);
        std::fs::copy(&source, &dest)?;
        log::info!("image captured: {} (from {})", dest.display(), source.display());

        let name = dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Capture {
            image_path: format!("{}/{}", self.url_prefix, name),
            plate_hint: Some(record.plate.clone()),
        })
    }
}

/// `car_<YYYYMMDD_HHMMSS>.<ext>`
pub fn capture_filename(at: &DateTime<Local>, ext: &str) -> String {
    format!("car_{}.{}", at.format("%Y%m%d_%H%M%S"), ext)
}

/// Pick a path in `dir` for a capture taken at `at`.
///
/// Timestamps only have one-second resolution; a second capture within the
/// same second gets a `-1`, `-2`, ... suffix instead of overwriting the
/// first.
pub fn unique_capture_path(dir: &Path, at: &DateTime<Local>, ext: &str) -> PathBuf {
    let base = dir.join(capture_filename(at, ext));
    if !base.exists() {
        return base;
    }
    let stem = format!("car_{}", at.format("%Y%m%d_%H%M%S"));
    (1u32..)
        .map(|n| dir.join(format!("{stem}-{n}.{ext}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(base)
}

/// Build the configured camera.
pub fn from_settings(
    settings: &CameraSettings,
    fixtures: Arc<PlateFixtures>,
) -> Result<Box<dyn Camera>> {
    if settings.backend.starts_with("stub://") {
        return Ok(Box::new(FixtureCamera::new(fixtures)));
    }
    if let Some(source_dir) = settings.backend.strip_prefix("file://") {
        return Ok(Box::new(DirectoryCamera::new(source_dir, settings, fixtures)));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        let mut camera = V4l2Camera::new(settings.clone(), fixtures);
        camera.connect()?;
        Ok(Box::new(camera))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        anyhow::bail!(
            "camera backend '{}' requires the camera-v4l2 feature",
            settings.backend
        )
    }
}
