use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::format::Rational;
use crate::settings::validate_resolution;

/// Static pipeline configuration, fixed when the pipeline opens.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct PipelineConfig {
    pub stills_resolution: (u32, u32),
    pub preview_resolution: (u32, u32),
    /// Geometry committed on every camera output port.
    pub port_resolution: (u32, u32),
    pub frame_rate: Rational,
    pub capture_frame_rate: Rational,
    pub min_buffers: u32,
    pub preview_layer: i32,
    pub preview_alpha: u8,
    pub fullscreen: bool,
    pub jpeg_quality: u32,
    pub capture_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self {
            stills_resolution: (2592, 1944),
            preview_resolution: (1920, 1080),
            port_resolution: (1920, 1080),
            frame_rate: Rational::new(30, 1),
            capture_frame_rate: Rational::new(1, 1),
            min_buffers: 3,
            preview_layer: 2,
            preview_alpha: 255,
            fullscreen: true,
            jpeg_quality: 95,
            capture_timeout: None,
        }
    }

    pub fn stills_resolution(mut self, w: u32, h: u32) -> Self {
        self.stills_resolution = (w, h);
        self
    }

    pub fn preview_resolution(mut self, w: u32, h: u32) -> Self {
        self.preview_resolution = (w, h);
        self
    }

    pub fn port_resolution(mut self, w: u32, h: u32) -> Self {
        self.port_resolution = (w, h);
        self
    }

    pub fn frame_rate(mut self, fps: Rational) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Minimum buffer count for camera outputs (default 3).
    pub fn min_buffers(mut self, count: u32) -> Self {
        self.min_buffers = count;
        self
    }

    pub fn preview_overlay(mut self, layer: i32, alpha: u8, fullscreen: bool) -> Self {
        self.preview_layer = layer;
        self.preview_alpha = alpha;
        self.fullscreen = fullscreen;
        self
    }

    pub fn jpeg_quality(mut self, quality: u32) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Bounds the wait in `capture`; without one the call blocks until the
    /// firmware delivers the image.
    pub fn capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_resolution("stills resolution", self.stills_resolution)?;
        validate_resolution("preview resolution", self.preview_resolution)?;
        validate_resolution("port resolution", self.port_resolution)?;
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(PipelineError::validation(
                "JPEG quality",
                format!("{} (valid range 1..100)", self.jpeg_quality),
            ));
        }
        if self.frame_rate.num <= 0 || self.frame_rate.den <= 0 {
            return Err(PipelineError::validation(
                "frame rate",
                format!("{}/{}", self.frame_rate.num, self.frame_rate.den),
            ));
        }
        if self.min_buffers == 0 {
            return Err(PipelineError::validation("buffer count", "must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stills_resolution, (2592, 1944));
        assert_eq!(config.capture_timeout, None);
    }

    #[test]
    fn builder_rejects_bad_quality() {
        let err = PipelineConfig::new().jpeg_quality(0).validate().unwrap_err();
        assert!(err.is_validation());
        assert!(PipelineConfig::new().stills_resolution(0, 10).validate().is_err());
        assert!(PipelineConfig::new().min_buffers(0).validate().is_err());
    }
}
