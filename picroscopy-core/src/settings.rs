//! Human-level camera settings and their codec onto [`ParamRecord`]s.
//!
//! Each [`Setting`] variant carries its own validator and wire mapping, so
//! adding a setting means extending the `match`es here and nothing else.

use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::format::{Rational, Rect};
use crate::params::{ColourFx, ParamRecord, ParamTag, ParamValue, CROP_SCALE, RATIONAL_DEN};
use crate::status::ErrorKind;

/// Declares a named firmware enumeration: the variant list doubles as the
/// name table and the wire table.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal {
            $($variant:ident => ($text:literal, $wire:literal)),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(
            feature = "serialize",
            derive(serde::Serialize, serde::Deserialize),
            serde(rename_all = "lowercase")
        )]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            const TABLE: &'static [($name, &'static str, u32)] = &[
                $(($name::$variant, $text, $wire)),+
            ];

            pub const LABEL: &'static str = $label;

            pub fn all() -> impl Iterator<Item = Self> {
                Self::TABLE.iter().map(|(value, _, _)| *value)
            }

            pub fn as_str(self) -> &'static str {
                Self::TABLE
                    .iter()
                    .find(|(value, _, _)| *value == self)
                    .map(|(_, text, _)| *text)
                    .unwrap_or("")
            }

            pub fn to_wire(self) -> u32 {
                Self::TABLE
                    .iter()
                    .find(|(value, _, _)| *value == self)
                    .map(|(_, _, wire)| *wire)
                    .unwrap_or_default()
            }

            pub fn from_wire(wire: u32) -> Option<Self> {
                Self::TABLE
                    .iter()
                    .find(|(_, _, code)| *code == wire)
                    .map(|(value, _, _)| *value)
            }
        }

        impl FromStr for $name {
            type Err = PipelineError;

            fn from_str(s: &str) -> Result<Self> {
                Self::TABLE
                    .iter()
                    .find(|(_, text, _)| *text == s)
                    .map(|(value, _, _)| *value)
                    .ok_or_else(|| {
                        PipelineError::validation($label, format!("unknown mode {:?}", s))
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    ExposureMode, "exposure mode" {
        Off => ("off", 0),
        Auto => ("auto", 1),
        Night => ("night", 2),
        NightPreview => ("nightpreview", 3),
        Backlight => ("backlight", 4),
        Spotlight => ("spotlight", 5),
        Sports => ("sports", 6),
        Snow => ("snow", 7),
        Beach => ("beach", 8),
        VeryLong => ("verylong", 9),
        FixedFps => ("fixedfps", 10),
        AntiShake => ("antishake", 11),
        Fireworks => ("fireworks", 12),
    }
}

wire_enum! {
    MeterMode, "metering mode" {
        Average => ("average", 0),
        Spot => ("spot", 1),
        Backlit => ("backlit", 2),
        Matrix => ("matrix", 3),
    }
}

wire_enum! {
    /// Automatic white balance presets.
    AwbMode, "auto-white-balance mode" {
        Off => ("off", 0),
        Auto => ("auto", 1),
        Sunlight => ("sunlight", 2),
        Cloudy => ("cloudy", 3),
        Shade => ("shade", 4),
        Tungsten => ("tungsten", 5),
        Fluorescent => ("fluorescent", 6),
        Incandescent => ("incandescent", 7),
        Flash => ("flash", 8),
        Horizon => ("horizon", 9),
    }
}

wire_enum! {
    ImageEffect, "image effect" {
        None => ("none", 0),
        Negative => ("negative", 1),
        Solarize => ("solarize", 2),
        Posterize => ("posterize", 3),
        Whiteboard => ("whiteboard", 4),
        Blackboard => ("blackboard", 5),
        Sketch => ("sketch", 6),
        Denoise => ("denoise", 7),
        Emboss => ("emboss", 8),
        OilPaint => ("oilpaint", 9),
        Hatch => ("hatch", 10),
        GPen => ("gpen", 11),
        Pastel => ("pastel", 12),
        Watercolour => ("watercolour", 13),
        Film => ("film", 14),
        Blur => ("blur", 15),
        Saturation => ("saturation", 16),
        ColourSwap => ("colourswap", 17),
        WashedOut => ("washedout", 18),
        Posterise => ("posterise", 19),
        ColourPoint => ("colourpoint", 20),
        ColourBalance => ("colourbalance", 21),
        Cartoon => ("cartoon", 22),
    }
}

/// Horizontal and vertical flip, which the firmware carries in one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Mirror {
    pub hflip: bool,
    pub vflip: bool,
}

impl Mirror {
    pub fn to_wire(self) -> u32 {
        match (self.vflip, self.hflip) {
            (false, false) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (true, true) => 3,
        }
    }

    pub fn from_wire(wire: u32) -> Option<Self> {
        let (vflip, hflip) = match wire {
            0 => (false, false),
            1 => (true, false),
            2 => (false, true),
            3 => (true, true),
            _ => return None,
        };
        Some(Self { hflip, vflip })
    }
}

/// Sensor crop as fractions of the full frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Crop {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Crop {
    pub const FULL: Self = Self::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn components(&self) -> [(&'static str, f64); 4] {
        [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ]
    }
}

impl Default for Crop {
    fn default() -> Self {
        Self::FULL
    }
}

/// Names every setting; the payload-free twin of [`Setting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingName {
    Sharpness,
    Contrast,
    Brightness,
    Saturation,
    Iso,
    VideoStabilization,
    ExposureCompensation,
    ExposureMode,
    MeterMode,
    AwbMode,
    ImageEffect,
    ColorEffects,
    Rotation,
    Mirror,
    Crop,
}

/// Which port a setting is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The camera's control port.
    Control,
    /// Every camera output port (preview, video, still).
    Outputs,
}

impl SettingName {
    pub const ALL: [SettingName; 15] = [
        Self::Sharpness,
        Self::Contrast,
        Self::Brightness,
        Self::Saturation,
        Self::Iso,
        Self::VideoStabilization,
        Self::ExposureCompensation,
        Self::ExposureMode,
        Self::MeterMode,
        Self::AwbMode,
        Self::ImageEffect,
        Self::ColorEffects,
        Self::Rotation,
        Self::Mirror,
        Self::Crop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sharpness => "sharpness",
            Self::Contrast => "contrast",
            Self::Brightness => "brightness",
            Self::Saturation => "saturation",
            Self::Iso => "ISO",
            Self::VideoStabilization => "video stabilization",
            Self::ExposureCompensation => "exposure compensation",
            Self::ExposureMode => ExposureMode::LABEL,
            Self::MeterMode => MeterMode::LABEL,
            Self::AwbMode => AwbMode::LABEL,
            Self::ImageEffect => ImageEffect::LABEL,
            Self::ColorEffects => "color effects",
            Self::Rotation => "rotation",
            Self::Mirror => "mirror",
            Self::Crop => "crop",
        }
    }

    pub fn tag(self) -> ParamTag {
        match self {
            Self::Sharpness => ParamTag::Sharpness,
            Self::Contrast => ParamTag::Contrast,
            Self::Brightness => ParamTag::Brightness,
            Self::Saturation => ParamTag::Saturation,
            Self::Iso => ParamTag::Iso,
            Self::VideoStabilization => ParamTag::VideoStabilisation,
            Self::ExposureCompensation => ParamTag::ExposureComp,
            Self::ExposureMode => ParamTag::ExposureMode,
            Self::MeterMode => ParamTag::ExpMeteringMode,
            Self::AwbMode => ParamTag::AwbMode,
            Self::ImageEffect => ParamTag::ImageEffect,
            Self::ColorEffects => ParamTag::ColourEffect,
            Self::Rotation => ParamTag::Rotation,
            Self::Mirror => ParamTag::Mirror,
            Self::Crop => ParamTag::InputCrop,
        }
    }

    pub fn target(self) -> Target {
        match self {
            Self::Rotation | Self::Mirror => Target::Outputs,
            _ => Target::Control,
        }
    }
}

impl fmt::Display for SettingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One camera setting with its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    Sharpness(i32),
    Contrast(i32),
    Brightness(i32),
    Saturation(i32),
    Iso(u32),
    VideoStabilization(bool),
    ExposureCompensation(i32),
    ExposureMode(ExposureMode),
    MeterMode(MeterMode),
    AwbMode(AwbMode),
    ImageEffect(ImageEffect),
    ColorEffects(Option<(u8, u8)>),
    Rotation(i32),
    Mirror(Mirror),
    Crop(Crop),
}

fn check_range(name: SettingName, value: i32, min: i32, max: i32) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::validation(
            name.as_str(),
            format!("{} (valid range {}..{})", value, min, max),
        ))
    }
}

fn unmapped(name: SettingName, wire: u32) -> PipelineError {
    tracing::warn!(target: "picroscopy::settings", setting = %name, wire, "unmapped wire value");
    PipelineError::status(
        ErrorKind::Unknown,
        &format!("decode {}", name),
        format!("firmware reported unmapped value {}", wire),
    )
}

impl Setting {
    pub fn name(&self) -> SettingName {
        match self {
            Self::Sharpness(_) => SettingName::Sharpness,
            Self::Contrast(_) => SettingName::Contrast,
            Self::Brightness(_) => SettingName::Brightness,
            Self::Saturation(_) => SettingName::Saturation,
            Self::Iso(_) => SettingName::Iso,
            Self::VideoStabilization(_) => SettingName::VideoStabilization,
            Self::ExposureCompensation(_) => SettingName::ExposureCompensation,
            Self::ExposureMode(_) => SettingName::ExposureMode,
            Self::MeterMode(_) => SettingName::MeterMode,
            Self::AwbMode(_) => SettingName::AwbMode,
            Self::ImageEffect(_) => SettingName::ImageEffect,
            Self::ColorEffects(_) => SettingName::ColorEffects,
            Self::Rotation(_) => SettingName::Rotation,
            Self::Mirror(_) => SettingName::Mirror,
            Self::Crop(_) => SettingName::Crop,
        }
    }

    /// Checks the value against its domain and returns the canonical form
    /// (rotation normalized into 0..360). No side effects.
    pub fn validate(self) -> Result<Self> {
        let name = self.name();
        match self {
            Self::Sharpness(v) | Self::Contrast(v) | Self::Saturation(v) => {
                check_range(name, v, -100, 100)?
            }
            Self::Brightness(v) => check_range(name, v, 0, 100)?,
            Self::ExposureCompensation(v) => check_range(name, v, -25, 25)?,
            Self::Rotation(v) => {
                if v % 90 != 0 {
                    return Err(PipelineError::validation(
                        name.as_str(),
                        format!("{} is not a multiple of 90 degrees", v),
                    ));
                }
                return Ok(Self::Rotation(v.rem_euclid(360)));
            }
            Self::Crop(crop) => {
                for (field, value) in crop.components() {
                    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                        return Err(PipelineError::validation(
                            name.as_str(),
                            format!("{} = {} (valid range 0.0..1.0)", field, value),
                        ));
                    }
                }
            }
            Self::Iso(_)
            | Self::VideoStabilization(_)
            | Self::ExposureMode(_)
            | Self::MeterMode(_)
            | Self::AwbMode(_)
            | Self::ImageEffect(_)
            | Self::ColorEffects(_)
            | Self::Mirror(_) => {}
        }
        Ok(self)
    }

    /// Validates, then produces the firmware record for this setting.
    pub fn encode(self) -> Result<ParamRecord> {
        let setting = self.validate()?;
        let value = match setting {
            Self::Sharpness(v) | Self::Contrast(v) | Self::Brightness(v) | Self::Saturation(v) => {
                ParamValue::Rational(Rational::new(v, RATIONAL_DEN))
            }
            Self::Iso(v) => ParamValue::Uint32(v),
            Self::VideoStabilization(v) => ParamValue::Boolean(v),
            Self::ExposureCompensation(v) | Self::Rotation(v) => ParamValue::Int32(v),
            Self::ExposureMode(m) => ParamValue::Enum(m.to_wire()),
            Self::MeterMode(m) => ParamValue::Enum(m.to_wire()),
            Self::AwbMode(m) => ParamValue::Enum(m.to_wire()),
            Self::ImageEffect(e) => ParamValue::Enum(e.to_wire()),
            Self::ColorEffects(None) => ParamValue::ColourFx(ColourFx {
                enable: 0,
                u: 128,
                v: 128,
            }),
            Self::ColorEffects(Some((u, v))) => ParamValue::ColourFx(ColourFx {
                enable: 1,
                u: u as u32,
                v: v as u32,
            }),
            Self::Mirror(m) => ParamValue::Enum(m.to_wire()),
            Self::Crop(c) => ParamValue::Rect(Rect::new(
                (c.x * CROP_SCALE).round() as i32,
                (c.y * CROP_SCALE).round() as i32,
                (c.width * CROP_SCALE).round() as i32,
                (c.height * CROP_SCALE).round() as i32,
            )),
        };
        ParamRecord::new(setting.name().tag(), value)
    }

    /// Inverse of [`Setting::encode`].
    pub fn decode(name: SettingName, record: &ParamRecord) -> Result<Self> {
        if record.tag() != name.tag() {
            return Err(PipelineError::status(
                ErrorKind::InvalidArgument,
                &format!("decode {}", name),
                format!("record carries {:?}", record.tag()),
            ));
        }
        let setting = match (name, *record.value()) {
            (SettingName::Sharpness, ParamValue::Rational(r))
            | (SettingName::Contrast, ParamValue::Rational(r))
            | (SettingName::Brightness, ParamValue::Rational(r))
            | (SettingName::Saturation, ParamValue::Rational(r)) => {
                let v = r.rescale(RATIONAL_DEN).ok_or_else(|| {
                    PipelineError::status(
                        ErrorKind::InvalidArgument,
                        &format!("decode {}", name),
                        "zero denominator",
                    )
                })?;
                match name {
                    SettingName::Sharpness => Self::Sharpness(v),
                    SettingName::Contrast => Self::Contrast(v),
                    SettingName::Brightness => Self::Brightness(v),
                    _ => Self::Saturation(v),
                }
            }
            (SettingName::Iso, ParamValue::Uint32(v)) => Self::Iso(v),
            (SettingName::VideoStabilization, ParamValue::Boolean(v)) => {
                Self::VideoStabilization(v)
            }
            (SettingName::ExposureCompensation, ParamValue::Int32(v)) => {
                Self::ExposureCompensation(v)
            }
            (SettingName::Rotation, ParamValue::Int32(v)) => Self::Rotation(v),
            (SettingName::ExposureMode, ParamValue::Enum(w)) => {
                Self::ExposureMode(ExposureMode::from_wire(w).ok_or_else(|| unmapped(name, w))?)
            }
            (SettingName::MeterMode, ParamValue::Enum(w)) => {
                Self::MeterMode(MeterMode::from_wire(w).ok_or_else(|| unmapped(name, w))?)
            }
            (SettingName::AwbMode, ParamValue::Enum(w)) => {
                Self::AwbMode(AwbMode::from_wire(w).ok_or_else(|| unmapped(name, w))?)
            }
            (SettingName::ImageEffect, ParamValue::Enum(w)) => {
                Self::ImageEffect(ImageEffect::from_wire(w).ok_or_else(|| unmapped(name, w))?)
            }
            (SettingName::Mirror, ParamValue::Enum(w)) => {
                Self::Mirror(Mirror::from_wire(w).ok_or_else(|| unmapped(name, w))?)
            }
            (SettingName::ColorEffects, ParamValue::ColourFx(fx)) => {
                if fx.enable == 0 {
                    Self::ColorEffects(None)
                } else {
                    let u = u8::try_from(fx.u).map_err(|_| unmapped(name, fx.u))?;
                    let v = u8::try_from(fx.v).map_err(|_| unmapped(name, fx.v))?;
                    Self::ColorEffects(Some((u, v)))
                }
            }
            (SettingName::Crop, ParamValue::Rect(r)) => Self::Crop(Crop::new(
                r.x as f64 / CROP_SCALE,
                r.y as f64 / CROP_SCALE,
                r.width as f64 / CROP_SCALE,
                r.height as f64 / CROP_SCALE,
            )),
            (_, value) => {
                return Err(PipelineError::status(
                    ErrorKind::InvalidArgument,
                    &format!("decode {}", name),
                    format!("unexpected {:?} payload", value.shape()),
                ))
            }
        };
        Ok(setting)
    }
}

/// Cached camera settings owned by the pipeline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct PipelineSettings {
    pub sharpness: i32,
    pub contrast: i32,
    pub brightness: i32,
    pub saturation: i32,
    pub iso: u32,
    pub video_stabilization: bool,
    pub exposure_compensation: i32,
    pub exposure_mode: ExposureMode,
    pub meter_mode: MeterMode,
    pub awb_mode: AwbMode,
    pub image_effect: ImageEffect,
    pub color_effects: Option<(u8, u8)>,
    pub rotation: i32,
    pub mirror: Mirror,
    pub crop: Crop,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sharpness: 0,
            contrast: 0,
            brightness: 50,
            saturation: 0,
            iso: 0,
            video_stabilization: false,
            exposure_compensation: 0,
            exposure_mode: ExposureMode::Auto,
            meter_mode: MeterMode::Average,
            awb_mode: AwbMode::Auto,
            image_effect: ImageEffect::None,
            color_effects: None,
            rotation: 0,
            mirror: Mirror::default(),
            crop: Crop::FULL,
        }
    }
}

impl PipelineSettings {
    pub fn get(&self, name: SettingName) -> Setting {
        match name {
            SettingName::Sharpness => Setting::Sharpness(self.sharpness),
            SettingName::Contrast => Setting::Contrast(self.contrast),
            SettingName::Brightness => Setting::Brightness(self.brightness),
            SettingName::Saturation => Setting::Saturation(self.saturation),
            SettingName::Iso => Setting::Iso(self.iso),
            SettingName::VideoStabilization => {
                Setting::VideoStabilization(self.video_stabilization)
            }
            SettingName::ExposureCompensation => {
                Setting::ExposureCompensation(self.exposure_compensation)
            }
            SettingName::ExposureMode => Setting::ExposureMode(self.exposure_mode),
            SettingName::MeterMode => Setting::MeterMode(self.meter_mode),
            SettingName::AwbMode => Setting::AwbMode(self.awb_mode),
            SettingName::ImageEffect => Setting::ImageEffect(self.image_effect),
            SettingName::ColorEffects => Setting::ColorEffects(self.color_effects),
            SettingName::Rotation => Setting::Rotation(self.rotation),
            SettingName::Mirror => Setting::Mirror(self.mirror),
            SettingName::Crop => Setting::Crop(self.crop),
        }
    }

    /// Stores an already-applied value.
    pub fn set(&mut self, setting: Setting) {
        match setting {
            Setting::Sharpness(v) => self.sharpness = v,
            Setting::Contrast(v) => self.contrast = v,
            Setting::Brightness(v) => self.brightness = v,
            Setting::Saturation(v) => self.saturation = v,
            Setting::Iso(v) => self.iso = v,
            Setting::VideoStabilization(v) => self.video_stabilization = v,
            Setting::ExposureCompensation(v) => self.exposure_compensation = v,
            Setting::ExposureMode(v) => self.exposure_mode = v,
            Setting::MeterMode(v) => self.meter_mode = v,
            Setting::AwbMode(v) => self.awb_mode = v,
            Setting::ImageEffect(v) => self.image_effect = v,
            Setting::ColorEffects(v) => self.color_effects = v,
            Setting::Rotation(v) => self.rotation = v,
            Setting::Mirror(v) => self.mirror = v,
            Setting::Crop(v) => self.crop = v,
        }
    }

    /// Every setting, in the order they are applied when a camera opens.
    pub fn iter(&self) -> impl Iterator<Item = Setting> + '_ {
        SettingName::ALL.iter().map(move |name| self.get(*name))
    }

    #[cfg(feature = "serialize")]
    pub fn export_state(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| {
            PipelineError::status(ErrorKind::InvalidArgument, "export settings", e.to_string())
        })
    }
}

/// Checks a `(width, height)` pair for the sensor configuration record.
pub fn validate_resolution(setting: &'static str, (width, height): (u32, u32)) -> Result<()> {
    const MAX: u32 = 4096;
    if (1..=MAX).contains(&width) && (1..=MAX).contains(&height) {
        Ok(())
    } else {
        Err(PipelineError::validation(
            setting,
            format!("{}x{} (each dimension must be 1..{})", width, height, MAX),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(setting: Setting) -> Setting {
        let record = setting.encode().unwrap();
        let bytes = record.to_bytes();
        let parsed = ParamRecord::from_bytes(&bytes).unwrap();
        Setting::decode(setting.name(), &parsed).unwrap()
    }

    #[test]
    fn enumerations_round_trip() {
        for mode in ExposureMode::all() {
            assert_eq!(round_trip(Setting::ExposureMode(mode)), Setting::ExposureMode(mode));
            assert_eq!(mode.as_str().parse::<ExposureMode>().unwrap(), mode);
        }
        for mode in MeterMode::all() {
            assert_eq!(round_trip(Setting::MeterMode(mode)), Setting::MeterMode(mode));
            assert_eq!(mode.as_str().parse::<MeterMode>().unwrap(), mode);
        }
        for mode in AwbMode::all() {
            assert_eq!(round_trip(Setting::AwbMode(mode)), Setting::AwbMode(mode));
            assert_eq!(mode.as_str().parse::<AwbMode>().unwrap(), mode);
        }
        for effect in ImageEffect::all() {
            assert_eq!(round_trip(Setting::ImageEffect(effect)), Setting::ImageEffect(effect));
            assert_eq!(effect.as_str().parse::<ImageEffect>().unwrap(), effect);
        }
        for wire in 0..4 {
            let mirror = Mirror::from_wire(wire).unwrap();
            assert_eq!(round_trip(Setting::Mirror(mirror)), Setting::Mirror(mirror));
        }
    }

    #[test]
    fn enumeration_tables_are_dense() {
        assert_eq!(ExposureMode::all().count(), 13);
        assert_eq!(MeterMode::all().count(), 4);
        assert_eq!(AwbMode::all().count(), 10);
        assert_eq!(ImageEffect::all().count(), 23);
    }

    #[test]
    fn integer_controls_round_trip_over_their_range() {
        for v in -100..=100 {
            assert_eq!(round_trip(Setting::Sharpness(v)), Setting::Sharpness(v));
            assert_eq!(round_trip(Setting::Saturation(v)), Setting::Saturation(v));
        }
        for v in 0..=100 {
            assert_eq!(round_trip(Setting::Brightness(v)), Setting::Brightness(v));
        }
    }

    #[test]
    fn out_of_range_values_fail_validation() {
        for bad in [Setting::Sharpness(150), Setting::Contrast(-101), Setting::Saturation(101)] {
            assert!(bad.encode().unwrap_err().is_validation());
        }
        assert!(Setting::Brightness(-1).encode().unwrap_err().is_validation());
        assert!(Setting::Brightness(101).encode().unwrap_err().is_validation());
        assert!(Setting::ExposureCompensation(26).validate().is_err());
        assert!(Setting::Rotation(45).validate().unwrap_err().is_validation());
        assert!(Setting::Crop(Crop::new(0.0, 0.0, 1.5, 1.0)).validate().is_err());
        assert!(Setting::Crop(Crop::new(f64::NAN, 0.0, 1.0, 1.0)).validate().is_err());
    }

    #[test]
    fn rotation_normalizes() {
        assert_eq!(Setting::Rotation(450).validate().unwrap(), Setting::Rotation(90));
        assert_eq!(Setting::Rotation(-90).validate().unwrap(), Setting::Rotation(270));
        assert_eq!(round_trip(Setting::Rotation(180)), Setting::Rotation(180));
    }

    #[test]
    fn crop_uses_sixteen_bit_fractions() {
        let record = Setting::Crop(Crop::new(0.0, 0.5, 1.0, 0.25)).encode().unwrap();
        assert_eq!(
            record.value(),
            &ParamValue::Rect(Rect::new(0, 32768, 65535, 16384))
        );
        assert_eq!(round_trip(Setting::Crop(Crop::FULL)), Setting::Crop(Crop::FULL));
    }

    #[test]
    fn colour_effects_encode_disabled_as_neutral() {
        let record = Setting::ColorEffects(None).encode().unwrap();
        assert_eq!(
            record.value(),
            &ParamValue::ColourFx(ColourFx { enable: 0, u: 128, v: 128 })
        );
        assert_eq!(
            round_trip(Setting::ColorEffects(Some((10, 200)))),
            Setting::ColorEffects(Some((10, 200)))
        );
    }

    #[test]
    fn unmapped_wire_values_are_unknown() {
        let record = ParamRecord::new(ParamTag::AwbMode, ParamValue::Enum(99)).unwrap();
        let err = Setting::decode(SettingName::AwbMode, &record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn decode_rescales_foreign_denominators() {
        let record = ParamRecord::new(ParamTag::Contrast, ParamValue::Rational(Rational::new(1, 2)))
            .unwrap();
        assert_eq!(
            Setting::decode(SettingName::Contrast, &record).unwrap(),
            Setting::Contrast(50)
        );
    }

    #[test]
    fn unknown_mode_names_fail_validation() {
        let err = "disco".parse::<ImageEffect>().unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Invalid image effect value: unknown mode \"disco\"");
    }

    #[test]
    fn cache_get_set_agree() {
        let mut settings = PipelineSettings::default();
        settings.set(Setting::AwbMode(AwbMode::Tungsten));
        assert_eq!(settings.get(SettingName::AwbMode), Setting::AwbMode(AwbMode::Tungsten));
        assert_eq!(settings.iter().count(), SettingName::ALL.len());
    }

    #[test]
    fn resolutions_are_bounded() {
        assert!(validate_resolution("stills resolution", (2592, 1944)).is_ok());
        assert!(validate_resolution("stills resolution", (0, 1944)).is_err());
        assert!(validate_resolution("preview resolution", (1920, 8192)).is_err());
    }
}
