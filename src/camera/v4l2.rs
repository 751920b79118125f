//! V4L2 still camera.
//!
//! Opens a local device node (e.g. /dev/video0) once at startup, and for
//! every capture grabs a single RGB frame, encodes it as JPEG and writes it
//! to the image directory under a timestamped name.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{unique_capture_path, Camera, Capture};
use crate::config::CameraSettings;
use crate::error::CaptureError;
use crate::plates::PlateFixtures;

pub struct V4l2Camera {
    settings: CameraSettings,
    fixtures: Arc<PlateFixtures>,
    rng: StdRng,
    device: Option<v4l::Device>,
    active_width: u32,
    active_height: u32,
}

impl V4l2Camera {
    pub fn new(settings: CameraSettings, fixtures: Arc<PlateFixtures>) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            fixtures,
            rng: StdRng::from_entropy(),
            device: None,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        use v4l::video::Capture as _;

        std::fs::create_dir_all(&self.settings.image_dir).with_context(|| {
            format!("create image dir {}", self.settings.image_dir.display())
        })?;

        let device = v4l::Device::with_path(&self.settings.backend)
            .with_context(|| format!("open v4l2 device {}", self.settings.backend))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Camera: failed to set format on {}: {}",
                    self.settings.backend,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        self.active_width = format.width;
        self.active_height = format.height;
        self.device = Some(device);
        log::info!(
            "V4l2Camera: connected to {} ({}x{})",
            self.settings.backend,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn grab_rgb(&self) -> Result<Vec<u8>, CaptureError> {
        use v4l::buffer::Type;
        use v4l::io::traits::CaptureStream;

        let device = self
            .device
            .as_ref()
            .ok_or_else(|| CaptureError::Device("camera not connected".to_string()))?;
        let mut stream = v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 2)?;
        let (buf, _meta) = stream.next()?;

        let expected = (self.active_width * self.active_height * 3) as usize;
        if buf.len() < expected {
            return Err(CaptureError::Device(format!(
                "short frame: expected {} bytes, got {}",
                expected,
                buf.len()
            )));
        }
        Ok(buf[..expected].to_vec())
    }

    fn image_url(&self, path: &std::path::Path) -> String {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/{}", self.settings.url_prefix.trim_end_matches('/'), name)
    }
}

impl Camera for V4l2Camera {
    fn capture_image(&mut self) -> Result<Capture, CaptureError> {
        let pixels = self.grab_rgb()?;
        let frame = image::RgbImage::from_raw(self.active_width, self.active_height, pixels)
            .ok_or_else(|| CaptureError::Device("frame size mismatch".to_string()))?;

        let path: PathBuf = unique_capture_path(&self.settings.image_dir, &Local::now(), "jpg");
        frame
            .save_with_format(&path, image::ImageFormat::Jpeg)
            .map_err(|err| CaptureError::Device(format!("encode {}: {}", path.display(), err)))?;
        log::info!("image captured: {}", path.display());

        let plate_hint = self
            .fixtures
            .choose(&mut self.rng)
            .map(|record| record.plate.clone());
        Ok(Capture {
            image_path: self.image_url(&path),
            plate_hint,
        })
    }

    fn release(&mut self) {
        if self.device.take().is_some() {
            log::info!("V4l2Camera: closed {}", self.settings.backend);
        }
    }
}
