use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::buffer::BufferHeader;
use crate::format::{BufferRequirements, VideoFormat};
use crate::params::ParamTag;
use crate::status::{FwResult, Status};

/// The firmware components the pipeline uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Sensor source: outputs 0 (preview), 1 (video), 2 (still).
    Camera,
    /// Live-preview renderer with a single input.
    Renderer,
    /// Still-image encoder: one input, one output.
    ImageEncoder,
}

impl ComponentKind {
    /// Name the firmware registers the component under.
    pub fn name(self) -> &'static str {
        match self {
            Self::Camera => "vc.ril.camera",
            Self::Renderer => "vc.ril.video_render",
            Self::ImageEncoder => "vc.ril.image_encode",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentHandle(pub u32);

/// What the firmware reports when a component is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    pub handle: ComponentHandle,
    pub inputs: u32,
    pub outputs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Control,
    Input,
    Output,
}

/// Addresses one port of a live component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub component: ComponentHandle,
    pub kind: PortKind,
    pub index: u32,
}

impl PortRef {
    pub fn control(component: ComponentHandle) -> Self {
        Self {
            component,
            kind: PortKind::Control,
            index: 0,
        }
    }

    pub fn input(component: ComponentHandle, index: u32) -> Self {
        Self {
            component,
            kind: PortKind::Input,
            index,
        }
    }

    pub fn output(component: ComponentHandle, index: u32) -> Self {
        Self {
            component,
            kind: PortKind::Output,
            index,
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            PortKind::Control => "control",
            PortKind::Input => "in",
            PortKind::Output => "out",
        };
        write!(f, "{}:{}:{}", self.component.0, kind, self.index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionHandle(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConnectionFlags: u32 {
        /// Buffers move port to port inside the firmware, never copied out.
        const TUNNELLING = 1 << 0;
        const ALLOCATION_ON_INPUT = 1 << 1;
        const ALLOCATION_ON_OUTPUT = 1 << 2;
    }
}

/// Completion callback registered with `enable_port`.
///
/// Runs on a firmware-owned thread. The header is handed over by value; the
/// callee decides whether it goes back to a pool or is dropped.
pub type BufferCallback = Arc<dyn Fn(BufferHeader) + Send + Sync>;

/// A rejected `send_buffer`; the header comes back so it is never lost.
#[derive(Debug)]
pub struct SendError {
    pub status: Status,
    pub header: BufferHeader,
}

/// Command and buffer channels of the multimedia firmware.
///
/// Every command is synchronous and returns the firmware status. Buffers
/// travel the other way through the callback given to `enable_port`.
pub trait Firmware: Send + Sync + fmt::Debug {
    fn create_component(&self, kind: ComponentKind) -> FwResult<ComponentInfo>;
    fn destroy_component(&self, component: ComponentHandle) -> FwResult<()>;
    fn enable_component(&self, component: ComponentHandle) -> FwResult<()>;
    fn disable_component(&self, component: ComponentHandle) -> FwResult<()>;

    /// Commits a port format and reports the buffer requirements that follow.
    fn commit_format(&self, port: PortRef, format: &VideoFormat) -> FwResult<BufferRequirements>;
    fn set_buffers(&self, port: PortRef, num: u32, size: u32) -> FwResult<()>;

    /// Starts buffer delivery on `port`. Ports that carry no data (tunnelled
    /// ones) are enabled without a callback.
    fn enable_port(&self, port: PortRef, callback: Option<BufferCallback>) -> FwResult<()>;

    /// Stops buffer delivery. Every header the firmware still holds for the
    /// port is returned through the callback before this returns.
    fn disable_port(&self, port: PortRef) -> FwResult<()>;

    /// Returns the encoded parameter record for `tag`.
    fn get_parameter(&self, port: PortRef, tag: ParamTag) -> FwResult<Vec<u8>>;
    /// Takes an encoded parameter record.
    fn set_parameter(&self, port: PortRef, record: &[u8]) -> FwResult<()>;

    fn create_pool(&self, port: PortRef, count: u32, size: u32) -> FwResult<Vec<BufferHeader>>;
    fn destroy_pool(&self, port: PortRef, headers: Vec<BufferHeader>) -> FwResult<()>;
    fn send_buffer(&self, port: PortRef, header: BufferHeader) -> Result<(), SendError>;

    fn create_connection(
        &self,
        output: PortRef,
        input: PortRef,
        flags: ConnectionFlags,
    ) -> FwResult<ConnectionHandle>;
    fn enable_connection(&self, connection: ConnectionHandle) -> FwResult<()>;
    fn disable_connection(&self, connection: ConnectionHandle) -> FwResult<()>;
    fn destroy_connection(&self, connection: ConnectionHandle) -> FwResult<()>;
}

impl<F: Firmware + ?Sized> Firmware for Arc<F> {
    fn create_component(&self, kind: ComponentKind) -> FwResult<ComponentInfo> {
        (**self).create_component(kind)
    }

    fn destroy_component(&self, component: ComponentHandle) -> FwResult<()> {
        (**self).destroy_component(component)
    }

    fn enable_component(&self, component: ComponentHandle) -> FwResult<()> {
        (**self).enable_component(component)
    }

    fn disable_component(&self, component: ComponentHandle) -> FwResult<()> {
        (**self).disable_component(component)
    }

    fn commit_format(&self, port: PortRef, format: &VideoFormat) -> FwResult<BufferRequirements> {
        (**self).commit_format(port, format)
    }

    fn set_buffers(&self, port: PortRef, num: u32, size: u32) -> FwResult<()> {
        (**self).set_buffers(port, num, size)
    }

    fn enable_port(&self, port: PortRef, callback: Option<BufferCallback>) -> FwResult<()> {
        (**self).enable_port(port, callback)
    }

    fn disable_port(&self, port: PortRef) -> FwResult<()> {
        (**self).disable_port(port)
    }

    fn get_parameter(&self, port: PortRef, tag: ParamTag) -> FwResult<Vec<u8>> {
        (**self).get_parameter(port, tag)
    }

    fn set_parameter(&self, port: PortRef, record: &[u8]) -> FwResult<()> {
        (**self).set_parameter(port, record)
    }

    fn create_pool(&self, port: PortRef, count: u32, size: u32) -> FwResult<Vec<BufferHeader>> {
        (**self).create_pool(port, count, size)
    }

    fn destroy_pool(&self, port: PortRef, headers: Vec<BufferHeader>) -> FwResult<()> {
        (**self).destroy_pool(port, headers)
    }

    fn send_buffer(&self, port: PortRef, header: BufferHeader) -> Result<(), SendError> {
        (**self).send_buffer(port, header)
    }

    fn create_connection(
        &self,
        output: PortRef,
        input: PortRef,
        flags: ConnectionFlags,
    ) -> FwResult<ConnectionHandle> {
        (**self).create_connection(output, input, flags)
    }

    fn enable_connection(&self, connection: ConnectionHandle) -> FwResult<()> {
        (**self).enable_connection(connection)
    }

    fn disable_connection(&self, connection: ConnectionHandle) -> FwResult<()> {
        (**self).disable_connection(connection)
    }

    fn destroy_connection(&self, connection: ConnectionHandle) -> FwResult<()> {
        (**self).destroy_connection(connection)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn handles_order_by_creation() {
        let mut links = BTreeMap::new();
        links.insert(ConnectionHandle(2), "still");
        links.insert(ConnectionHandle(1), "preview");
        assert_eq!(links.keys().next(), Some(&ConnectionHandle(1)));
        assert!(ComponentHandle(1) < ComponentHandle(2));
    }
}
