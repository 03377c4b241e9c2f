use std::sync::Arc;

use picroscopy_core::builder::PipelineConfig;
use picroscopy_core::error::Result;
use picroscopy_core::format::VideoFormat;
use picroscopy_core::params::{ParamRecord, ParamTag, ParamValue};
use picroscopy_core::pixel_format::FourCC;
use picroscopy_core::traits::{ComponentKind, Firmware};

use crate::component::Component;

/// Creates a JPEG encoder fed with `source`.
///
/// The output port is sized with the larger of the minimum and recommended
/// buffer settings so a still spans as few buffers as possible.
pub fn encoder(
    fw: Arc<dyn Firmware>,
    config: &PipelineConfig,
    source: &VideoFormat,
) -> Result<Component> {
    Component::create(fw, ComponentKind::ImageEncoder, |encoder| {
        encoder.input_mut(0)?.set_format(*source)?;

        let output = encoder.output_mut(0)?;
        output.set_reconfigurable(true);
        let requirements = output.set_format(source.with_encoding(FourCC::JPEG))?;
        output.set_buffer_requirements(requirements.num, requirements.size)?;
        let quality =
            ParamRecord::new(ParamTag::JpegQFactor, ParamValue::Uint32(config.jpeg_quality))?;
        output.set_parameter(&quality)
    })
}
