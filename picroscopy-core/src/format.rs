//! Port formats and buffer negotiation values.

use crate::pixel_format::FourCC;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Re-expresses the value over `den`, rounding to nearest.
    pub fn rescale(self, den: i32) -> Option<i32> {
        if self.den == 0 {
            return None;
        }
        if self.den == den {
            return Some(self.num);
        }
        let scaled = (self.num as f64) * (den as f64) / (self.den as f64);
        Some(scaled.round() as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }
}

/// Elementary-stream format of a video port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct VideoFormat {
    pub encoding: FourCC,
    pub encoding_variant: FourCC,
    pub width: u32,
    pub height: u32,
    pub crop: Rect,
    pub frame_rate: Rational,
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self {
            encoding: FourCC::UNSET,
            encoding_variant: FourCC::UNSET,
            width: 0,
            height: 0,
            crop: Rect::default(),
            frame_rate: Rational::new(0, 1),
        }
    }
}

impl VideoFormat {
    /// Opaque camera output of `width`x`height`, cropped to the full frame.
    pub fn opaque(width: u32, height: u32, frame_rate: Rational) -> Self {
        Self {
            encoding: FourCC::OPAQUE,
            encoding_variant: FourCC::I420,
            width,
            height,
            crop: Rect::full(width, height),
            frame_rate,
        }
    }

    /// Same geometry, different encoding (used for encoder outputs).
    pub fn with_encoding(mut self, encoding: FourCC) -> Self {
        self.encoding = encoding;
        self.encoding_variant = FourCC::UNSET;
        self
    }

    /// Whether a consumer configured with `self` can accept buffers from a
    /// producer configured with `producer`.
    pub fn accepts(&self, producer: &VideoFormat) -> bool {
        (self.encoding == FourCC::UNSET || self.encoding == producer.encoding)
            && (self.width == 0 || self.width == producer.width)
            && (self.height == 0 || self.height == producer.height)
    }
}

/// Buffer count and size for a port; the firmware reports the minimum and
/// recommended values when a format is committed, the caller chooses the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferRequirements {
    pub num_min: u32,
    pub num_recommended: u32,
    pub num: u32,
    pub size_min: u32,
    pub size_recommended: u32,
    pub size: u32,
}

impl BufferRequirements {
    /// Larger of minimum and recommended, the way encoder outputs are sized.
    pub fn preferred(&self) -> (u32, u32) {
        (
            self.num_recommended.max(self.num_min),
            self.size_recommended.max(self.size_min),
        )
    }

    pub fn satisfies(&self, num: u32, size: u32) -> bool {
        num >= self.num_min && size >= self.size_min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_rescale() {
        assert_eq!(Rational::new(25, 100).rescale(100), Some(25));
        assert_eq!(Rational::new(1, 4).rescale(100), Some(25));
        assert_eq!(Rational::new(-1, 3).rescale(100), Some(-33));
        assert_eq!(Rational::new(1, 0).rescale(100), None);
    }

    #[test]
    fn unset_consumer_accepts_anything() {
        let producer = VideoFormat::opaque(1920, 1080, Rational::new(30, 1));
        assert!(VideoFormat::default().accepts(&producer));
        let jpeg_in = VideoFormat::default().with_encoding(FourCC::JPEG);
        assert!(!jpeg_in.accepts(&producer));
    }

    #[test]
    fn preferred_buffers_take_the_larger_value() {
        let req = BufferRequirements {
            num_min: 1,
            num_recommended: 3,
            size_min: 4096,
            size_recommended: 2048,
            ..Default::default()
        };
        assert_eq!(req.preferred(), (3, 4096));
        assert!(req.satisfies(1, 4096));
        assert!(!req.satisfies(0, 4096));
    }
}
