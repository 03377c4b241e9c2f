//! Ownership of live components and connections.
//!
//! Components are kept in creation order and connections likewise. Any path
//! that destroys a component first destroys the connections that reference
//! it, so a connection never outlives either endpoint.

use std::sync::Arc;

use picroscopy_core::error::{PipelineError, Result};
use picroscopy_core::status::ErrorKind;
use picroscopy_core::traits::{ComponentKind, ConnectionHandle, Firmware};

use crate::component::Component;
use crate::connection::Connection;
use crate::teardown::Teardown;

const LOG: &str = "picroscopy::graph";

#[derive(Debug)]
pub(crate) struct Graph {
    fw: Arc<dyn Firmware>,
    components: Vec<Component>,
    connections: Vec<Connection>,
}

impl Graph {
    pub(crate) fn new(fw: Arc<dyn Firmware>) -> Self {
        Self {
            fw,
            components: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub(crate) fn firmware(&self) -> Arc<dyn Firmware> {
        Arc::clone(&self.fw)
    }

    pub(crate) fn add(&mut self, component: Component) -> Result<()> {
        if self.get(component.kind()).is_some() {
            return Err(PipelineError::runtime(
                ErrorKind::AlreadyConnected,
                format!("{} already exists", component.kind()),
            ));
        }
        self.components.push(component);
        Ok(())
    }

    pub(crate) fn get(&self, kind: ComponentKind) -> Option<&Component> {
        self.components.iter().find(|c| c.kind() == kind)
    }

    pub(crate) fn get_mut(&mut self, kind: ComponentKind) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.kind() == kind)
    }

    pub(crate) fn require(&self, kind: ComponentKind) -> Result<&Component> {
        self.get(kind).ok_or_else(|| missing(kind))
    }

    pub(crate) fn require_mut(&mut self, kind: ComponentKind) -> Result<&mut Component> {
        self.get_mut(kind).ok_or_else(|| missing(kind))
    }

    /// Creates and enables a connection; a connection that fails to enable
    /// is destroyed again.
    pub(crate) fn connect(
        &mut self,
        (producer, out): (ComponentKind, u32),
        (consumer, inp): (ComponentKind, u32),
        tunnel: bool,
    ) -> Result<ConnectionHandle> {
        let mut connection = Connection::connect(
            self.firmware(),
            self.require(producer)?,
            out,
            self.require(consumer)?,
            inp,
            tunnel,
        )?;
        if let Err(e) = connection.enable() {
            if let Err(cleanup) = connection.destroy() {
                tracing::warn!(target: LOG, error = %cleanup, "cleanup after failed enable");
            }
            return Err(e);
        }
        let handle = connection.handle();
        self.connections.push(connection);
        Ok(handle)
    }

    pub(crate) fn disconnect(&mut self, handle: ConnectionHandle) -> Result<()> {
        match self.connections.iter().position(|c| c.handle() == handle) {
            Some(index) => self.connections.remove(index).destroy(),
            None => Ok(()),
        }
    }

    /// Destroys the `kind` component and every connection touching it.
    pub(crate) fn remove(&mut self, kind: ComponentKind) -> Result<()> {
        let Some(index) = self.components.iter().position(|c| c.kind() == kind) else {
            return Ok(());
        };
        let handle = self.components[index].handle();
        let mut teardown = Teardown::default();
        while let Some(at) = self.connections.iter().rposition(|c| c.references(handle)) {
            teardown.step("destroy connection", self.connections.remove(at).destroy());
        }
        teardown.step("destroy component", self.components.remove(index).destroy());
        teardown.finish()
    }

    /// Connections newest first, then components newest first.
    pub(crate) fn teardown(&mut self) -> Result<()> {
        let mut teardown = Teardown::default();
        while let Some(mut connection) = self.connections.pop() {
            teardown.step("destroy connection", connection.destroy());
        }
        while let Some(mut component) = self.components.pop() {
            let what = format!("destroy {}", component.kind());
            teardown.step(&what, component.destroy());
        }
        tracing::debug!(target: LOG, "graph torn down");
        teardown.finish()
    }

    pub(crate) fn kinds(&self) -> Vec<ComponentKind> {
        self.components.iter().map(Component::kind).collect()
    }
}

fn missing(kind: ComponentKind) -> PipelineError {
    PipelineError::runtime(ErrorKind::NotReady, format!("no {} in the pipeline", kind))
}
