use std::fmt::{self, Display};

/// Four Character Code used by the firmware to name port encodings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, bytemuck::Pod, bytemuck::Zeroable)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct FourCC(pub u32);

impl FourCC {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self((a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24))
    }

    /// Encoding left unset; the firmware picks one during format commit.
    pub const UNSET: Self = Self(0);
}

impl Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::UNSET {
            return f.write_str("----");
        }
        let bytes = self.0.to_le_bytes();
        write!(f, "{}", String::from_utf8_lossy(&bytes))
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// Encodings the camera pipeline deals in.
impl FourCC {
    /// GPU-internal opaque handle; what tunnelled camera ports carry.
    pub const OPAQUE: Self = Self::new(b'O', b'P', b'Q', b'V');
    /// YUV 4:2:0 planar; the variant behind [`FourCC::OPAQUE`].
    pub const I420: Self = Self::new(b'I', b'4', b'2', b'0');

    pub const JPEG: Self = Self::new(b'J', b'P', b'E', b'G');
    pub const PNG: Self = Self::new(b'P', b'N', b'G', b' ');
    pub const GIF: Self = Self::new(b'G', b'I', b'F', b' ');
    pub const BMP: Self = Self::new(b'B', b'M', b'P', b' ');
    pub const H264: Self = Self::new(b'H', b'2', b'6', b'4');

    /// Output of an encoder rather than raw pixels.
    pub fn is_compressed(&self) -> bool {
        matches!(
            *self,
            Self::JPEG | Self::PNG | Self::GIF | Self::BMP | Self::H264
        )
    }

    /// Encodings a still-image encoder can produce.
    pub fn is_still_image(&self) -> bool {
        matches!(*self, Self::JPEG | Self::PNG | Self::GIF | Self::BMP)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl From<FourCC> for u32 {
    fn from(cc: FourCC) -> Self {
        cc.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_ascii() {
        assert_eq!(FourCC::OPAQUE.to_string(), "OPQV");
        assert_eq!(FourCC::JPEG.to_string(), "JPEG");
        assert_eq!(FourCC::UNSET.to_string(), "----");
    }

    #[test]
    fn classification() {
        assert!(FourCC::JPEG.is_still_image());
        assert!(FourCC::H264.is_compressed());
        assert!(!FourCC::H264.is_still_image());
        assert!(!FourCC::I420.is_compressed());
    }
}
