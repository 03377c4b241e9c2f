//! Firmware parameter records.
//!
//! Every record travels as `{header: {id, size}, payload}` in the firmware's
//! `repr(C)` layout. [`ParamRecord`] is the typed form; [`ParamRecord::to_bytes`]
//! and [`ParamRecord::from_bytes`] convert to and from the wire layout.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::error::{PipelineError, Result};
use crate::format::{Rational, Rect};
use crate::status::ErrorKind;

pub const GROUP_CAMERA: u32 = 1 << 16;
pub const GROUP_VIDEO: u32 = 2 << 16;

/// Denominator used for the rational-valued image controls.
pub const RATIONAL_DEN: i32 = 100;

/// Scale of the 16-bit fixed-point crop fractions.
pub const CROP_SCALE: f64 = 65535.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamTag {
    Rotation,
    AwbMode,
    ImageEffect,
    ColourEffect,
    ExposureComp,
    Mirror,
    Capture,
    ExposureMode,
    ExpMeteringMode,
    CameraConfig,
    JpegQFactor,
    VideoStabilisation,
    InputCrop,
    Sharpness,
    Contrast,
    Brightness,
    Saturation,
    Iso,
    DisplayRegion,
    ImmutableInput,
}

/// Payload layout of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Rational,
    Uint32,
    Int32,
    Boolean,
    Enum,
    Rect,
    ColourFx,
    CameraConfig,
    DisplayRegion,
}

impl Shape {
    pub const fn payload_size(self) -> usize {
        match self {
            Self::Rational => std::mem::size_of::<Rational>(),
            Self::Uint32 | Self::Int32 | Self::Boolean | Self::Enum => 4,
            Self::Rect => std::mem::size_of::<Rect>(),
            Self::ColourFx => std::mem::size_of::<ColourFx>(),
            Self::CameraConfig => std::mem::size_of::<CameraConfig>(),
            Self::DisplayRegion => std::mem::size_of::<DisplayRegion>(),
        }
    }
}

impl ParamTag {
    pub const ALL: [ParamTag; 20] = [
        Self::Rotation,
        Self::AwbMode,
        Self::ImageEffect,
        Self::ColourEffect,
        Self::ExposureComp,
        Self::Mirror,
        Self::Capture,
        Self::ExposureMode,
        Self::ExpMeteringMode,
        Self::CameraConfig,
        Self::JpegQFactor,
        Self::VideoStabilisation,
        Self::InputCrop,
        Self::Sharpness,
        Self::Contrast,
        Self::Brightness,
        Self::Saturation,
        Self::Iso,
        Self::DisplayRegion,
        Self::ImmutableInput,
    ];

    pub const fn id(self) -> u32 {
        match self {
            Self::Rotation => GROUP_CAMERA + 2,
            Self::AwbMode => GROUP_CAMERA + 5,
            Self::ImageEffect => GROUP_CAMERA + 6,
            Self::ColourEffect => GROUP_CAMERA + 7,
            Self::ExposureComp => GROUP_CAMERA + 13,
            Self::Mirror => GROUP_CAMERA + 15,
            Self::Capture => GROUP_CAMERA + 17,
            Self::ExposureMode => GROUP_CAMERA + 18,
            Self::ExpMeteringMode => GROUP_CAMERA + 19,
            Self::CameraConfig => GROUP_CAMERA + 21,
            Self::JpegQFactor => GROUP_CAMERA + 25,
            Self::VideoStabilisation => GROUP_CAMERA + 29,
            Self::InputCrop => GROUP_CAMERA + 37,
            Self::Sharpness => GROUP_CAMERA + 44,
            Self::Contrast => GROUP_CAMERA + 45,
            Self::Brightness => GROUP_CAMERA + 46,
            Self::Saturation => GROUP_CAMERA + 47,
            Self::Iso => GROUP_CAMERA + 48,
            Self::DisplayRegion => GROUP_VIDEO,
            Self::ImmutableInput => GROUP_VIDEO + 27,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.id() == id)
    }

    pub const fn shape(self) -> Shape {
        match self {
            Self::Sharpness | Self::Contrast | Self::Brightness | Self::Saturation => {
                Shape::Rational
            }
            Self::Iso | Self::JpegQFactor => Shape::Uint32,
            Self::Rotation | Self::ExposureComp => Shape::Int32,
            Self::Capture | Self::VideoStabilisation | Self::ImmutableInput => Shape::Boolean,
            Self::AwbMode
            | Self::ImageEffect
            | Self::Mirror
            | Self::ExposureMode
            | Self::ExpMeteringMode => Shape::Enum,
            Self::InputCrop => Shape::Rect,
            Self::ColourEffect => Shape::ColourFx,
            Self::CameraConfig => Shape::CameraConfig,
            Self::DisplayRegion => Shape::DisplayRegion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ParameterHeader {
    pub id: u32,
    pub size: u32,
}

const HEADER_SIZE: usize = std::mem::size_of::<ParameterHeader>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct ColourFx {
    pub enable: i32,
    pub u: u32,
    pub v: u32,
}

/// Sensor-wide configuration committed on the camera control port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct CameraConfig {
    pub max_stills_w: u32,
    pub max_stills_h: u32,
    pub stills_yuv422: u32,
    pub one_shot_stills: u32,
    pub max_preview_video_w: u32,
    pub max_preview_video_h: u32,
    pub num_preview_video_frames: u32,
    pub stills_capture_circular_buffer_height: u32,
    pub fast_preview_resume: u32,
    pub use_stc_timestamp: u32,
}

/// Timestamp mode: reset the system time clock when the camera starts.
pub const TIMESTAMP_MODE_RESET_STC: u32 = 1;

bitflags! {
    /// Which fields of a [`DisplayRegion`] are meaningful.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DisplaySet: u32 {
        const NUM = 1 << 0;
        const FULLSCREEN = 1 << 1;
        const TRANSFORM = 1 << 2;
        const DEST_RECT = 1 << 3;
        const SRC_RECT = 1 << 4;
        const MODE = 1 << 5;
        const PIXEL = 1 << 6;
        const NOASPECT = 1 << 7;
        const LAYER = 1 << 8;
        const COPYPROTECT = 1 << 9;
        const ALPHA = 1 << 10;
    }
}

/// Renderer placement on the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
#[repr(C)]
pub struct DisplayRegion {
    pub set: u32,
    pub display_num: u32,
    pub fullscreen: i32,
    pub transform: u32,
    pub dest_rect: Rect,
    pub src_rect: Rect,
    pub noaspect: i32,
    pub mode: u32,
    pub pixel_x: u32,
    pub pixel_y: u32,
    pub layer: i32,
    pub copyprotect_required: i32,
    pub alpha: u32,
}

impl DisplayRegion {
    pub fn overlay(layer: i32, alpha: u8, fullscreen: bool) -> Self {
        let mut set = DisplaySet::LAYER | DisplaySet::ALPHA;
        if fullscreen {
            set |= DisplaySet::FULLSCREEN;
        }
        Self {
            set: set.bits(),
            fullscreen: fullscreen as i32,
            layer,
            alpha: alpha as u32,
            ..Default::default()
        }
    }

    pub fn set_flags(&self) -> DisplaySet {
        DisplaySet::from_bits_truncate(self.set)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Rational(Rational),
    Uint32(u32),
    Int32(i32),
    Boolean(bool),
    Enum(u32),
    Rect(Rect),
    ColourFx(ColourFx),
    CameraConfig(CameraConfig),
    DisplayRegion(DisplayRegion),
}

impl ParamValue {
    pub fn shape(&self) -> Shape {
        match self {
            Self::Rational(_) => Shape::Rational,
            Self::Uint32(_) => Shape::Uint32,
            Self::Int32(_) => Shape::Int32,
            Self::Boolean(_) => Shape::Boolean,
            Self::Enum(_) => Shape::Enum,
            Self::Rect(_) => Shape::Rect,
            Self::ColourFx(_) => Shape::ColourFx,
            Self::CameraConfig(_) => Shape::CameraConfig,
            Self::DisplayRegion(_) => Shape::DisplayRegion,
        }
    }

    fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Self::Rational(r) => out.extend_from_slice(bytemuck::bytes_of(r)),
            Self::Uint32(v) | Self::Enum(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Int32(v) => out.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Boolean(b) => out.extend_from_slice(bytemuck::bytes_of(&(*b as i32))),
            Self::Rect(r) => out.extend_from_slice(bytemuck::bytes_of(r)),
            Self::ColourFx(c) => out.extend_from_slice(bytemuck::bytes_of(c)),
            Self::CameraConfig(c) => out.extend_from_slice(bytemuck::bytes_of(c)),
            Self::DisplayRegion(d) => out.extend_from_slice(bytemuck::bytes_of(d)),
        }
    }

    // `payload.len()` must equal `shape.payload_size()`.
    fn read_payload(shape: Shape, payload: &[u8]) -> Self {
        match shape {
            Shape::Rational => Self::Rational(bytemuck::pod_read_unaligned(payload)),
            Shape::Uint32 => Self::Uint32(bytemuck::pod_read_unaligned(payload)),
            Shape::Int32 => Self::Int32(bytemuck::pod_read_unaligned(payload)),
            Shape::Boolean => Self::Boolean(bytemuck::pod_read_unaligned::<i32>(payload) != 0),
            Shape::Enum => Self::Enum(bytemuck::pod_read_unaligned(payload)),
            Shape::Rect => Self::Rect(bytemuck::pod_read_unaligned(payload)),
            Shape::ColourFx => Self::ColourFx(bytemuck::pod_read_unaligned(payload)),
            Shape::CameraConfig => Self::CameraConfig(bytemuck::pod_read_unaligned(payload)),
            Shape::DisplayRegion => Self::DisplayRegion(bytemuck::pod_read_unaligned(payload)),
        }
    }
}

/// A tagged parameter value whose payload shape matches its tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRecord {
    tag: ParamTag,
    value: ParamValue,
}

impl ParamRecord {
    pub fn new(tag: ParamTag, value: ParamValue) -> Result<Self> {
        if tag.shape() != value.shape() {
            return Err(PipelineError::status(
                ErrorKind::InvalidArgument,
                "build parameter record",
                format!("{:?} expects a {:?} payload, got {:?}", tag, tag.shape(), value.shape()),
            ));
        }
        Ok(Self { tag, value })
    }

    pub fn boolean(tag: ParamTag, value: bool) -> Result<Self> {
        Self::new(tag, ParamValue::Boolean(value))
    }

    pub fn tag(&self) -> ParamTag {
        self.tag
    }

    pub fn value(&self) -> &ParamValue {
        &self.value
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.tag.shape().payload_size()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let header = ParameterHeader {
            id: self.tag.id(),
            size: self.encoded_len() as u32,
        };
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(bytemuck::bytes_of(&header));
        self.value.write_payload(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(malformed(format!(
                "record of {} bytes is shorter than its header",
                bytes.len()
            )));
        }
        let header: ParameterHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_SIZE]);
        let tag = ParamTag::from_id(header.id)
            .ok_or_else(|| malformed(format!("unknown parameter id 0x{:08x}", header.id)))?;
        let expected = HEADER_SIZE + tag.shape().payload_size();
        if header.size as usize != expected || bytes.len() < expected {
            return Err(malformed(format!(
                "{:?} record declares {} bytes, holds {}, expected {}",
                tag,
                header.size,
                bytes.len(),
                expected
            )));
        }
        let value = ParamValue::read_payload(tag.shape(), &bytes[HEADER_SIZE..expected]);
        Ok(Self { tag, value })
    }
}

fn malformed(message: String) -> PipelineError {
    tracing::debug!(target: "picroscopy::params", %message, "malformed parameter record");
    PipelineError::status(ErrorKind::InvalidArgument, "decode parameter record", message)
}
