//! Operation journal and fault injection.

use picroscopy_core::params::ParamTag;
use picroscopy_core::status::Status;
use picroscopy_core::traits::{ComponentHandle, ComponentKind, ConnectionHandle, PortRef};

/// A firmware command that completed successfully, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    CreateComponent(ComponentKind, ComponentHandle),
    DestroyComponent(ComponentHandle),
    EnableComponent(ComponentHandle),
    DisableComponent(ComponentHandle),
    CommitFormat(PortRef),
    SetBuffers(PortRef, u32, u32),
    EnablePort(PortRef),
    DisablePort(PortRef),
    SetParameter(PortRef, ParamTag),
    CreatePool(PortRef, u32, u32),
    DestroyPool(PortRef),
    CreateConnection(ConnectionHandle, PortRef, PortRef),
    EnableConnection(ConnectionHandle),
    DisableConnection(ConnectionHandle),
    DestroyConnection(ConnectionHandle),
}

impl Op {
    pub fn command(&self) -> Command {
        match self {
            Self::CreateComponent(..) => Command::CreateComponent,
            Self::DestroyComponent(_) => Command::DestroyComponent,
            Self::EnableComponent(_) => Command::EnableComponent,
            Self::DisableComponent(_) => Command::DisableComponent,
            Self::CommitFormat(_) => Command::CommitFormat,
            Self::SetBuffers(..) => Command::SetBuffers,
            Self::EnablePort(_) => Command::EnablePort,
            Self::DisablePort(_) => Command::DisablePort,
            Self::SetParameter(..) => Command::SetParameter,
            Self::CreatePool(..) => Command::CreatePool,
            Self::DestroyPool(_) => Command::DestroyPool,
            Self::CreateConnection(..) => Command::CreateConnection,
            Self::EnableConnection(_) => Command::EnableConnection,
            Self::DisableConnection(_) => Command::DisableConnection,
            Self::DestroyConnection(_) => Command::DestroyConnection,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    CreateComponent,
    DestroyComponent,
    EnableComponent,
    DisableComponent,
    CommitFormat,
    SetBuffers,
    EnablePort,
    DisablePort,
    GetParameter,
    SetParameter,
    CreatePool,
    DestroyPool,
    SendBuffer,
    CreateConnection,
    EnableConnection,
    DisableConnection,
    DestroyConnection,
}

/// A one-shot failure: the matching command returns `status` instead of
/// running. Narrow the match with [`Fault::kind`] and [`Fault::tag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub command: Command,
    pub status: Status,
    pub kind: Option<ComponentKind>,
    pub tag: Option<ParamTag>,
    /// Matching calls let through before the fault fires.
    pub skip: usize,
}

impl Fault {
    pub fn new(command: Command, status: Status) -> Self {
        Self {
            command,
            status,
            kind: None,
            tag: None,
            skip: 0,
        }
    }

    /// Only calls that touch a component of this kind.
    pub fn kind(mut self, kind: ComponentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Only parameter calls for this tag.
    pub fn tag(mut self, tag: ParamTag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn skip(mut self, calls: usize) -> Self {
        self.skip = calls;
        self
    }

    pub(crate) fn matches(
        &self,
        command: Command,
        kind: Option<ComponentKind>,
        tag: Option<ParamTag>,
    ) -> bool {
        self.command == command
            && self.kind.map_or(true, |k| Some(k) == kind)
            && self.tag.map_or(true, |t| Some(t) == tag)
    }
}

/// Pending faults, consumed as they fire.
#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    faults: Vec<Fault>,
}

impl FaultPlan {
    pub(crate) fn push(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    pub(crate) fn clear(&mut self) {
        self.faults.clear();
    }

    /// Returns the status of the first fault that fires for this call.
    pub(crate) fn trip(
        &mut self,
        command: Command,
        kind: Option<ComponentKind>,
        tag: Option<ParamTag>,
    ) -> Option<Status> {
        let position = self
            .faults
            .iter()
            .position(|fault| fault.matches(command, kind, tag))?;
        let fault = &mut self.faults[position];
        if fault.skip > 0 {
            fault.skip -= 1;
            return None;
        }
        Some(self.faults.remove(position).status)
    }
}
