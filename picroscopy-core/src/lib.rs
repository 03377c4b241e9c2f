#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod buffer;
pub mod builder;
pub mod error;
pub mod format;
pub mod params;
pub mod pixel_format;
pub mod settings;
pub mod status;
pub mod traits;

pub mod prelude {
    pub use crate::buffer::{BufferFlags, BufferHeader};
    pub use crate::builder::PipelineConfig;
    pub use crate::error::{PipelineError, Result};
    pub use crate::format::{BufferRequirements, Rational, Rect, VideoFormat};
    pub use crate::pixel_format::FourCC;
    pub use crate::settings::{
        AwbMode, Crop, ExposureMode, ImageEffect, MeterMode, Mirror, PipelineSettings, Setting,
        SettingName,
    };
    pub use crate::status::{ErrorKind, Status};
    pub use crate::traits::{ComponentKind, Firmware, PortRef};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
