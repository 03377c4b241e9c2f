use std::sync::Arc;

use picroscopy_core::builder::PipelineConfig;
use picroscopy_core::error::Result;
use picroscopy_core::params::{DisplayRegion, ParamRecord, ParamTag, ParamValue};
use picroscopy_core::traits::{ComponentKind, Firmware};

use crate::component::Component;

/// Creates the preview renderer and places it on the configured overlay
/// layer. Its input format is taken from the connection.
pub fn renderer(fw: Arc<dyn Firmware>, config: &PipelineConfig) -> Result<Component> {
    Component::create(fw, ComponentKind::Renderer, |renderer| {
        let region =
            DisplayRegion::overlay(config.preview_layer, config.preview_alpha, config.fullscreen);
        let record = ParamRecord::new(ParamTag::DisplayRegion, ParamValue::DisplayRegion(region))?;
        renderer.input(0)?.set_parameter(&record)
    })
}
