//! The camera pipeline manager.
//!
//! A [`Pipeline`] owns the camera for its whole life. Every operation runs
//! under one lock, so configuration calls never overlap and a capture sees
//! a stable graph.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use picroscopy_core::buffer::{BufferFlags, BufferHeader};
use picroscopy_core::builder::PipelineConfig;
use picroscopy_core::error::{PipelineError, Result};
use picroscopy_core::format::{Rect, VideoFormat};
use picroscopy_core::params::{ParamRecord, ParamTag, ParamValue};
use picroscopy_core::settings::{
    validate_resolution, AwbMode, Crop, ExposureMode, ImageEffect, MeterMode, Mirror,
    PipelineSettings, Setting, SettingName, Target,
};
use picroscopy_core::status::ErrorKind;
use picroscopy_core::traits::{ComponentKind, ConnectionHandle, Firmware};

use crate::component::Component;
use crate::components::{self, PREVIEW_PORT, STILL_PORT};
use crate::graph::Graph;
use crate::pool::BufferHandler;
use crate::teardown::Teardown;

const LOG: &str = "picroscopy::pipeline";

/// Lifecycle manager for the camera, preview renderer and still encoder.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use picroscopy_core::{error::Result, traits::Firmware};
/// # fn demo(fw: Arc<dyn Firmware>) -> Result<()> {
/// use picroscopy::Pipeline;
/// use picroscopy_core::builder::PipelineConfig;
///
/// let pipeline = Pipeline::open(fw, PipelineConfig::default())?;
/// pipeline.start_preview()?;
/// pipeline.set_sharpness(20)?;
/// pipeline.capture("/tmp/still.jpg")?;
/// pipeline.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    graph: Graph,
    settings: PipelineSettings,
    preview: Option<ConnectionHandle>,
    closed: bool,
}

impl Pipeline {
    /// Opens the camera with default settings.
    pub fn open(fw: Arc<dyn Firmware>, config: PipelineConfig) -> Result<Self> {
        Self::open_with(fw, config, PipelineSettings::default())
    }

    /// Opens the camera and applies `settings`.
    ///
    /// Everything is validated before the firmware is touched. If the camera
    /// cannot be created or a setting is rejected, whatever was created is
    /// destroyed again.
    pub fn open_with(
        fw: Arc<dyn Firmware>,
        config: PipelineConfig,
        settings: PipelineSettings,
    ) -> Result<Self> {
        config.validate()?;
        for setting in settings.iter() {
            setting.validate()?;
        }

        let mut inner = Inner {
            graph: Graph::new(Arc::clone(&fw)),
            settings: PipelineSettings::default(),
            preview: None,
            closed: false,
        };
        inner.graph.add(components::camera(fw, &config)?)?;
        for setting in settings.iter() {
            if let Err(e) = inner.apply(setting) {
                inner.closed = true;
                if let Err(cleanup) = inner.graph.teardown() {
                    tracing::warn!(target: LOG, error = %cleanup, "cleanup after failed open");
                }
                return Err(e);
            }
        }
        tracing::info!(
            target: LOG,
            stills = ?config.stills_resolution,
            preview = ?config.preview_resolution,
            "pipeline open"
        );
        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        !self.lock().closed
    }

    pub fn is_previewing(&self) -> bool {
        self.lock().preview.is_some()
    }

    /// Connects the camera's preview output to a new renderer.
    pub fn start_preview(&self) -> Result<()> {
        self.lock().start_preview(&self.config)
    }

    /// Tears the preview down. Does nothing when no preview is running.
    pub fn stop_preview(&self) -> Result<()> {
        self.lock().stop_preview()
    }

    /// Captures one JPEG still into a new file at `path`; returns the
    /// number of bytes written.
    ///
    /// A running preview is paused for the capture and restarted afterwards
    /// whether or not the capture succeeded. The file is removed again if
    /// the capture fails.
    pub fn capture(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        let mut inner = self.lock();
        inner.ensure_open()?;
        let mut file = File::create(path)?;
        let result = inner
            .capture(&self.config, &mut file)
            .and_then(|written| {
                file.sync_all()?;
                Ok(written)
            });
        if result.is_err() {
            drop(file);
            if let Err(e) = fs::remove_file(path) {
                tracing::warn!(
                    target: LOG,
                    path = %path.display(),
                    error = %e,
                    "failed to remove partial capture"
                );
            }
        }
        result
    }

    /// Captures one JPEG still into `out`.
    pub fn capture_to<W: Write>(&self, out: &mut W) -> Result<u64> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        inner.capture(&self.config, out)
    }

    /// Cached value of `name`.
    pub fn get(&self, name: SettingName) -> Setting {
        self.lock().settings.get(name)
    }

    /// Validates and applies `setting`; the cached value changes only once
    /// the firmware has accepted it.
    pub fn set(&self, setting: Setting) -> Result<()> {
        self.lock().apply(setting)
    }

    /// Reads `name` back from the firmware, bypassing the cache.
    pub fn query(&self, name: SettingName) -> Result<Setting> {
        let inner = self.lock();
        inner.ensure_open()?;
        let camera = inner.graph.require(ComponentKind::Camera)?;
        match name.target() {
            Target::Control => camera.control().get_setting(name),
            Target::Outputs => camera.output(PREVIEW_PORT)?.get_setting(name),
        }
    }

    pub fn settings(&self) -> PipelineSettings {
        self.lock().settings.clone()
    }

    pub fn hflip(&self) -> bool {
        self.lock().settings.mirror.hflip
    }

    pub fn set_hflip(&self, hflip: bool) -> Result<()> {
        let mut inner = self.lock();
        let mirror = Mirror {
            hflip,
            ..inner.settings.mirror
        };
        inner.apply(Setting::Mirror(mirror))
    }

    pub fn vflip(&self) -> bool {
        self.lock().settings.mirror.vflip
    }

    pub fn set_vflip(&self, vflip: bool) -> Result<()> {
        let mut inner = self.lock();
        let mirror = Mirror {
            vflip,
            ..inner.settings.mirror
        };
        inner.apply(Setting::Mirror(mirror))
    }

    /// Maximum still size, read from the sensor configuration.
    pub fn stills_resolution(&self) -> Result<(u32, u32)> {
        let inner = self.lock();
        inner.ensure_open()?;
        let sensor = components::camera_config(inner.graph.require(ComponentKind::Camera)?)?;
        Ok((sensor.max_stills_w, sensor.max_stills_h))
    }

    /// Resizes the still port and the sensor configuration. The old port
    /// format is restored if the sensor rejects the new size.
    pub fn set_stills_resolution(&self, resolution: (u32, u32)) -> Result<()> {
        validate_resolution("stills resolution", resolution)?;
        let mut inner = self.lock();
        inner.ensure_open()?;
        let camera = inner.graph.require_mut(ComponentKind::Camera)?;
        let mut sensor = components::camera_config(camera)?;
        let previous = *camera.output(STILL_PORT)?.format();
        let (width, height) = resolution;
        camera.output_mut(STILL_PORT)?.set_format(VideoFormat {
            width,
            height,
            crop: Rect::full(width, height),
            ..previous
        })?;

        sensor.max_stills_w = width;
        sensor.max_stills_h = height;
        if let Err(e) = write_camera_config(camera, sensor) {
            if let Err(restore) = camera.output_mut(STILL_PORT)?.set_format(previous) {
                tracing::warn!(target: LOG, error = %restore, "failed to restore still format");
            }
            return Err(e);
        }
        tracing::debug!(target: LOG, width, height, "stills resolution changed");
        Ok(())
    }

    /// Maximum preview/video size, read from the sensor configuration.
    pub fn preview_resolution(&self) -> Result<(u32, u32)> {
        let inner = self.lock();
        inner.ensure_open()?;
        let sensor = components::camera_config(inner.graph.require(ComponentKind::Camera)?)?;
        Ok((sensor.max_preview_video_w, sensor.max_preview_video_h))
    }

    pub fn set_preview_resolution(&self, resolution: (u32, u32)) -> Result<()> {
        validate_resolution("preview resolution", resolution)?;
        let inner = self.lock();
        inner.ensure_open()?;
        let camera = inner.graph.require(ComponentKind::Camera)?;
        let mut sensor = components::camera_config(camera)?;
        sensor.max_preview_video_w = resolution.0;
        sensor.max_preview_video_h = resolution.1;
        write_camera_config(camera, sensor)
    }

    /// Configuration, cached settings and preview state as JSON.
    #[cfg(feature = "serialize")]
    pub fn export_state(&self) -> Result<serde_json::Value> {
        use serde_json::{Map, Value};

        let inner = self.lock();
        let config = serde_json::to_value(&self.config).map_err(|e| {
            PipelineError::status(ErrorKind::InvalidArgument, "export config", e.to_string())
        })?;
        let mut state = Map::new();
        state.insert("config".to_string(), config);
        state.insert("settings".to_string(), inner.settings.export_state()?);
        state.insert("open".to_string(), Value::Bool(!inner.closed));
        state.insert("previewing".to_string(), Value::Bool(inner.preview.is_some()));
        Ok(Value::Object(state))
    }

    /// Destroys every connection and component. Safe to call repeatedly.
    pub fn close(&self) -> Result<()> {
        self.lock().close()
    }
}

macro_rules! setting_accessors {
    ($($get:ident, $set:ident: $ty:ty => $variant:ident;)*) => {
        impl Pipeline {
            $(
                pub fn $get(&self) -> $ty {
                    self.lock().settings.$get
                }

                pub fn $set(&self, value: $ty) -> Result<()> {
                    self.set(Setting::$variant(value))
                }
            )*
        }
    };
}

setting_accessors! {
    sharpness, set_sharpness: i32 => Sharpness;
    contrast, set_contrast: i32 => Contrast;
    brightness, set_brightness: i32 => Brightness;
    saturation, set_saturation: i32 => Saturation;
    iso, set_iso: u32 => Iso;
    video_stabilization, set_video_stabilization: bool => VideoStabilization;
    exposure_compensation, set_exposure_compensation: i32 => ExposureCompensation;
    exposure_mode, set_exposure_mode: ExposureMode => ExposureMode;
    meter_mode, set_meter_mode: MeterMode => MeterMode;
    awb_mode, set_awb_mode: AwbMode => AwbMode;
    image_effect, set_image_effect: ImageEffect => ImageEffect;
    color_effects, set_color_effects: Option<(u8, u8)> => ColorEffects;
    rotation, set_rotation: i32 => Rotation;
    mirror, set_mirror: Mirror => Mirror;
    crop, set_crop: Crop => Crop;
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = inner.close() {
            tracing::warn!(target: LOG, error = %e, "close on drop failed");
        }
    }
}

fn write_camera_config(
    camera: &Component,
    sensor: picroscopy_core::params::CameraConfig,
) -> Result<()> {
    let record = ParamRecord::new(ParamTag::CameraConfig, ParamValue::CameraConfig(sensor))?;
    camera.control().set_parameter(&record)
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(PipelineError::runtime(ErrorKind::NotReady, "pipeline is closed"));
        }
        Ok(())
    }

    fn apply(&mut self, setting: Setting) -> Result<()> {
        self.ensure_open()?;
        let setting = setting.validate()?;
        if let Setting::ExposureMode(mode) = setting {
            if self.settings.iso != 0 && mode != self.settings.exposure_mode {
                tracing::warn!(
                    target: LOG,
                    iso = self.settings.iso,
                    %mode,
                    "firmware may ignore exposure mode changes while ISO is fixed"
                );
            }
        }

        let name = setting.name();
        let camera = self.graph.require(ComponentKind::Camera)?;
        match name.target() {
            Target::Control => camera.control().set_setting(setting)?,
            Target::Outputs => set_on_outputs(camera, setting, self.settings.get(name))?,
        }
        self.settings.set(setting);
        tracing::debug!(target: LOG, setting = %name, value = ?setting, "setting applied");
        Ok(())
    }

    fn start_preview(&mut self, config: &PipelineConfig) -> Result<()> {
        self.ensure_open()?;
        if self.preview.is_some() {
            return Err(PipelineError::runtime(
                ErrorKind::AlreadyConnected,
                "Preview is already running",
            ));
        }
        let camera = self.graph.require(ComponentKind::Camera)?;
        if !camera.is_enabled() {
            return Err(PipelineError::runtime(ErrorKind::NotReady, "camera is not enabled"));
        }
        self.graph
            .add(components::renderer(self.graph.firmware(), config)?)?;
        match self.graph.connect(
            (ComponentKind::Camera, PREVIEW_PORT),
            (ComponentKind::Renderer, 0),
            true,
        ) {
            Ok(handle) => {
                self.preview = Some(handle);
                tracing::info!(target: LOG, "preview started");
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = self.graph.remove(ComponentKind::Renderer) {
                    tracing::warn!(target: LOG, error = %cleanup, "cleanup after failed preview");
                }
                Err(e)
            }
        }
    }

    fn stop_preview(&mut self) -> Result<()> {
        let Some(handle) = self.preview.take() else {
            return Ok(());
        };
        let mut teardown = Teardown::default();
        teardown.step("disconnect preview", self.graph.disconnect(handle));
        teardown.step("destroy renderer", self.graph.remove(ComponentKind::Renderer));
        tracing::info!(target: LOG, "preview stopped");
        teardown.finish()
    }

    fn capture(&mut self, config: &PipelineConfig, out: &mut dyn Write) -> Result<u64> {
        let resume = self.preview.is_some();
        let mut guard = PreviewResume {
            inner: self,
            config,
            resume,
        };
        guard.inner.stop_preview()?;
        let result = guard.inner.capture_still(config, out);
        drop(guard);
        result
    }

    /// Builds the encoder branch, captures, and removes the branch again.
    fn capture_still(&mut self, config: &PipelineConfig, out: &mut dyn Write) -> Result<u64> {
        let source = *self
            .graph
            .require(ComponentKind::Camera)?
            .output(STILL_PORT)?
            .format();
        self.graph
            .add(components::encoder(self.graph.firmware(), config, &source)?)?;

        let result = self.run_encoder(config, out);
        let mut teardown = Teardown::default();
        teardown.step("remove encoder", self.graph.remove(ComponentKind::ImageEncoder));
        let written = result?;
        teardown.finish()?;
        tracing::info!(target: LOG, bytes = written, "capture complete");
        Ok(written)
    }

    fn run_encoder(&mut self, config: &PipelineConfig, out: &mut dyn Write) -> Result<u64> {
        self.graph.connect(
            (ComponentKind::Camera, STILL_PORT),
            (ComponentKind::ImageEncoder, 0),
            true,
        )?;

        let (tx, rx) = crossbeam_channel::unbounded::<Chunk>();
        let handler: BufferHandler = Arc::new(move |header: &BufferHeader| {
            let chunk = Chunk {
                data: header.payload().to_vec(),
                flags: header.flags,
            };
            if tx.send(chunk).is_err() {
                tracing::trace!(target: LOG, "capture abandoned; chunk dropped");
            }
        });
        self.graph
            .require_mut(ComponentKind::ImageEncoder)?
            .output_mut(0)?
            .enable(Some(handler))?;

        let trigger = ParamRecord::boolean(ParamTag::Capture, true)?;
        self.graph
            .require(ComponentKind::Camera)?
            .output(STILL_PORT)?
            .set_parameter(&trigger)?;
        tracing::debug!(target: LOG, "capture triggered");
        receive(&rx, out, config.capture_timeout)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.preview = None;
        tracing::debug!(target: LOG, components = ?self.graph.kinds(), "closing pipeline");
        let result = self.graph.teardown();
        tracing::info!(target: LOG, "pipeline closed");
        result
    }
}

/// Writes `setting` to every camera output; on failure the outputs already
/// written are set back to `previous`.
fn set_on_outputs(camera: &Component, setting: Setting, previous: Setting) -> Result<()> {
    let outputs = camera.outputs();
    for (done, port) in outputs.iter().enumerate() {
        if let Err(e) = port.set_setting(setting) {
            for port in outputs[..done].iter().rev() {
                if let Err(restore) = port.set_setting(previous) {
                    tracing::warn!(
                        target: LOG,
                        port = %port.port_ref(),
                        error = %restore,
                        "rollback failed"
                    );
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

/// Restarts the preview when dropped if it was running before a capture.
struct PreviewResume<'a> {
    inner: &'a mut Inner,
    config: &'a PipelineConfig,
    resume: bool,
}

impl Drop for PreviewResume<'_> {
    fn drop(&mut self) {
        if !self.resume {
            return;
        }
        if let Err(e) = self.inner.start_preview(self.config) {
            tracing::error!(target: LOG, error = %e, "preview did not resume after capture");
        }
    }
}

struct Chunk {
    data: Vec<u8>,
    flags: BufferFlags,
}

/// Copies chunks to `out` until the end of the image.
fn receive(rx: &Receiver<Chunk>, out: &mut dyn Write, timeout: Option<Duration>) -> Result<u64> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut written = 0u64;
    loop {
        let chunk = match deadline {
            Some(deadline) => rx.recv_deadline(deadline).map_err(|e| match e {
                RecvTimeoutError::Timeout => PipelineError::status(
                    ErrorKind::NotReady,
                    "capture",
                    format!("no image within {:?}", timeout.unwrap_or_default()),
                ),
                RecvTimeoutError::Disconnected => disconnected(),
            })?,
            None => rx.recv().map_err(|_| disconnected())?,
        };
        if chunk.flags.is_failure() {
            return Err(PipelineError::status(
                ErrorKind::IoError,
                "capture",
                format!("encoder flagged the image as damaged ({:?})", chunk.flags),
            ));
        }
        out.write_all(&chunk.data)?;
        written += chunk.data.len() as u64;
        if chunk.flags.is_terminal() {
            return Ok(written);
        }
    }
}

fn disconnected() -> PipelineError {
    PipelineError::status(ErrorKind::NotConnected, "capture", "encoder output went away")
}
