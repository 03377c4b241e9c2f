use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Per-buffer flags set by the firmware when a header is returned.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferFlags: u32 {
        const EOS = 1 << 0;
        const FRAME_START = 1 << 1;
        const FRAME_END = 1 << 2;
        const FRAME = Self::FRAME_START.bits() | Self::FRAME_END.bits();
        const KEYFRAME = 1 << 3;
        const DISCONTINUITY = 1 << 4;
        const CONFIG = 1 << 5;
        const ENCRYPTED = 1 << 6;
        const CODECSIDEINFO = 1 << 7;
        const SNAPSHOT = 1 << 8;
        const CORRUPTED = 1 << 9;
        const TRANSMISSION_FAILED = 1 << 10;
    }
}

impl BufferFlags {
    /// Header marks the end of a complete image (or of the stream).
    pub fn is_terminal(&self) -> bool {
        self.intersects(Self::FRAME_END | Self::EOS)
    }

    pub fn is_failure(&self) -> bool {
        self.intersects(Self::CORRUPTED | Self::TRANSMISSION_FAILED)
    }
}

/// Event codes carried in [`BufferHeader::cmd`] on control-port callbacks.
pub mod event {
    use crate::pixel_format::FourCC;

    pub const ERROR: u32 = FourCC::new(b'E', b'R', b'R', b'O').0;
    pub const EOS: u32 = FourCC::new(b'E', b'E', b'O', b'S').0;
    pub const FORMAT_CHANGED: u32 = FourCC::new(b'E', b'F', b'C', b'H').0;
    pub const PARAMETER_CHANGED: u32 = FourCC::new(b'E', b'P', b'C', b'H').0;
}

/// A unit of transfer between a port and its buffer pool.
///
/// Headers are moved, never shared: whoever holds the value owns it. The
/// pool hands them to the firmware with `send_buffer` and gets them back
/// through the port callback.
pub struct BufferHeader {
    /// Index within the owning pool; stable for the header's lifetime.
    pub index: usize,
    /// Zero for data buffers, an [`event`] code for control events.
    pub cmd: u32,
    pub data: Vec<u8>,
    /// Bytes of `data` filled by the firmware.
    pub length: usize,
    pub flags: BufferFlags,
    pub pts: Option<u64>,
}

impl BufferHeader {
    pub fn new(index: usize, size: usize) -> Self {
        Self {
            index,
            cmd: 0,
            data: vec![0; size],
            length: 0,
            flags: BufferFlags::empty(),
            pts: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.length.min(self.data.len())]
    }

    /// Clears the fill state so the header can be queued again.
    pub fn reset(&mut self) {
        self.cmd = 0;
        self.length = 0;
        self.flags = BufferFlags::empty();
        self.pts = None;
    }
}

impl fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferHeader")
            .field("index", &self.index)
            .field("cmd", &self.cmd)
            .field("length", &self.length)
            .field("capacity", &self.data.len())
            .field("flags", &self.flags)
            .finish()
    }
}
