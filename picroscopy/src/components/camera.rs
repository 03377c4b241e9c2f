use std::sync::Arc;

use picroscopy_core::builder::PipelineConfig;
use picroscopy_core::error::{PipelineError, Result};
use picroscopy_core::format::{Rational, VideoFormat};
use picroscopy_core::params::{
    CameraConfig, ParamRecord, ParamTag, ParamValue, TIMESTAMP_MODE_RESET_STC,
};
use picroscopy_core::status::ErrorKind;
use picroscopy_core::traits::{ComponentKind, Firmware};

use crate::component::Component;
use crate::port::Port;

pub const PREVIEW_PORT: u32 = 0;
pub const VIDEO_PORT: u32 = 1;
pub const STILL_PORT: u32 = 2;

/// Sensor configuration record for `config`.
fn sensor_config(config: &PipelineConfig) -> CameraConfig {
    CameraConfig {
        max_stills_w: config.stills_resolution.0,
        max_stills_h: config.stills_resolution.1,
        stills_yuv422: 0,
        one_shot_stills: 1,
        max_preview_video_w: config.preview_resolution.0,
        max_preview_video_h: config.preview_resolution.1,
        num_preview_video_frames: 3,
        stills_capture_circular_buffer_height: 0,
        fast_preview_resume: 0,
        use_stc_timestamp: TIMESTAMP_MODE_RESET_STC,
    }
}

/// Reads the sensor configuration record back from the control port.
pub fn camera_config(camera: &Component) -> Result<CameraConfig> {
    let record = camera.control().get_parameter(ParamTag::CameraConfig)?;
    match *record.value() {
        ParamValue::CameraConfig(config) => Ok(config),
        other => Err(PipelineError::status(
            ErrorKind::InvalidArgument,
            "get camera config",
            format!("unexpected {:?} payload", other.shape()),
        )),
    }
}

fn configure_output(
    port: &mut Port,
    (width, height): (u32, u32),
    rate: Rational,
    min_buffers: u32,
) -> Result<()> {
    let requirements = port.set_format(VideoFormat::opaque(width, height, rate))?;
    if requirements.num < min_buffers {
        port.set_buffer_requirements(min_buffers, requirements.size)?;
    }
    Ok(())
}

/// Creates the camera: sensor configuration on the control port, then the
/// preview, video and still output formats.
pub fn camera(fw: Arc<dyn Firmware>, config: &PipelineConfig) -> Result<Component> {
    Component::create(fw, ComponentKind::Camera, |camera| {
        let record = ParamRecord::new(
            ParamTag::CameraConfig,
            ParamValue::CameraConfig(sensor_config(config)),
        )?;
        camera.control().set_parameter(&record)?;

        for index in [PREVIEW_PORT, VIDEO_PORT] {
            configure_output(
                camera.output_mut(index)?,
                config.port_resolution,
                config.frame_rate,
                config.min_buffers,
            )?;
        }

        let still = camera.output_mut(STILL_PORT)?;
        still.set_reconfigurable(true);
        configure_output(
            still,
            config.stills_resolution,
            config.capture_frame_rate,
            config.min_buffers,
        )
    })
}

#[cfg(test)]
mod tests {
    use picroscopy_core::pixel_format::FourCC;
    use picroscopy_simulation::SimFirmware;

    use super::*;

    #[test]
    fn outputs_carry_the_configured_formats() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let config = PipelineConfig::new().port_resolution(1280, 720).min_buffers(4);
        let camera = camera(sim.clone(), &config)?;

        let preview = camera.output(PREVIEW_PORT)?;
        assert_eq!(preview.format().encoding, FourCC::OPAQUE);
        assert_eq!((preview.format().width, preview.format().height), (1280, 720));
        assert_eq!(preview.requirements().num, 4);

        let still = camera.output(STILL_PORT)?;
        assert_eq!((still.format().width, still.format().height), (2592, 1944));

        let sensor = camera_config(&camera)?;
        assert_eq!((sensor.max_stills_w, sensor.max_stills_h), (2592, 1944));
        assert_eq!(sensor.one_shot_stills, 1);
        Ok(())
    }
}
