use std::sync::Arc;

use picroscopy_core::error::{PipelineError, Result};
use picroscopy_core::status::{ErrorKind, StatusExt};
use picroscopy_core::traits::{ComponentHandle, ComponentKind, Firmware, PortRef};

use crate::port::Port;
use crate::teardown::Teardown;

const LOG: &str = "picroscopy::component";

/// Lifecycle of a live component. A component that was never created has
/// no [`Component`] value at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Created,
    Enabled,
    Disabled,
    Destroyed,
}

/// A firmware component together with its ports.
#[derive(Debug)]
pub struct Component {
    fw: Arc<dyn Firmware>,
    kind: ComponentKind,
    handle: ComponentHandle,
    state: ComponentState,
    control: Port,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
}

impl Component {
    /// Creates a `kind` component, enables its control port, runs
    /// `configure` and enables the component.
    ///
    /// If any step fails, everything created so far is torn down before the
    /// error is returned.
    pub fn create<F>(fw: Arc<dyn Firmware>, kind: ComponentKind, configure: F) -> Result<Self>
    where
        F: FnOnce(&mut Component) -> Result<()>,
    {
        let info = fw
            .create_component(kind)
            .context(&format!("create {}", kind))?;
        let handle = info.handle;
        let mut component = Self {
            control: Port::new(Arc::clone(&fw), PortRef::control(handle), kind),
            inputs: (0..info.inputs)
                .map(|i| Port::new(Arc::clone(&fw), PortRef::input(handle, i), kind))
                .collect(),
            outputs: (0..info.outputs)
                .map(|i| Port::new(Arc::clone(&fw), PortRef::output(handle, i), kind))
                .collect(),
            fw,
            kind,
            handle,
            state: ComponentState::Created,
        };

        let configured = component
            .control
            .enable(None)
            .and_then(|()| configure(&mut component))
            .and_then(|()| component.enable());
        if let Err(e) = configured {
            tracing::warn!(target: LOG, %kind, error = %e, "configuration failed; destroying");
            if let Err(cleanup) = component.destroy() {
                tracing::warn!(target: LOG, %kind, error = %cleanup, "cleanup after failed create");
            }
            return Err(e);
        }
        tracing::info!(
            target: LOG,
            %kind,
            handle = handle.0,
            inputs = info.inputs,
            outputs = info.outputs,
            "component created"
        );
        Ok(component)
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn handle(&self) -> ComponentHandle {
        self.handle
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == ComponentState::Enabled
    }

    pub fn control(&self) -> &Port {
        &self.control
    }

    pub fn input(&self, index: u32) -> Result<&Port> {
        self.inputs
            .get(index as usize)
            .ok_or_else(|| self.no_port("input", index))
    }

    pub fn input_mut(&mut self, index: u32) -> Result<&mut Port> {
        let err = self.no_port("input", index);
        self.inputs.get_mut(index as usize).ok_or(err)
    }

    pub fn output(&self, index: u32) -> Result<&Port> {
        self.outputs
            .get(index as usize)
            .ok_or_else(|| self.no_port("output", index))
    }

    pub fn output_mut(&mut self, index: u32) -> Result<&mut Port> {
        let err = self.no_port("output", index);
        self.outputs.get_mut(index as usize).ok_or(err)
    }

    pub fn outputs(&self) -> &[Port] {
        &self.outputs
    }

    fn no_port(&self, what: &str, index: u32) -> PipelineError {
        PipelineError::status(
            ErrorKind::NotFound,
            &format!("{} {} port {}", self.kind, what, index),
            "no such port",
        )
    }

    fn data_ports_mut(&mut self) -> impl Iterator<Item = &mut Port> {
        self.outputs.iter_mut().chain(self.inputs.iter_mut())
    }

    pub fn enable(&mut self) -> Result<()> {
        match self.state {
            ComponentState::Enabled => {
                return Err(PipelineError::runtime(
                    ErrorKind::AlreadyConnected,
                    format!("{} already enabled", self.kind),
                ))
            }
            ComponentState::Destroyed => {
                return Err(PipelineError::runtime(
                    ErrorKind::NotReady,
                    format!("{} is destroyed", self.kind),
                ))
            }
            ComponentState::Created | ComponentState::Disabled => {}
        }
        self.fw
            .enable_component(self.handle)
            .context(&format!("enable {}", self.kind))?;
        self.data_ports_mut().for_each(|p| p.set_owner_enabled(true));
        self.state = ComponentState::Enabled;
        tracing::debug!(target: LOG, kind = %self.kind, "component enabled");
        Ok(())
    }

    /// Disables data ports, then the component. Anything but an enabled
    /// component is left as it is.
    pub fn disable(&mut self) -> Result<()> {
        if self.state != ComponentState::Enabled {
            return Ok(());
        }
        let mut teardown = Teardown::default();
        for port in self.outputs.iter_mut().chain(self.inputs.iter_mut()) {
            teardown.step("disable port", port.disable());
        }
        self.fw
            .disable_component(self.handle)
            .context(&format!("disable {}", self.kind))?;
        self.data_ports_mut().for_each(|p| p.set_owner_enabled(false));
        self.state = ComponentState::Disabled;
        tracing::debug!(target: LOG, kind = %self.kind, "component disabled");
        teardown.finish()
    }

    /// Disables and frees the component. Safe to call repeatedly; the
    /// component ends up `Destroyed` even when a step fails.
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == ComponentState::Destroyed {
            return Ok(());
        }
        let mut teardown = Teardown::default();
        teardown.step("disable component", self.disable());
        teardown.step("disable control port", self.control.disable());
        teardown.step(
            "destroy component",
            self.fw
                .destroy_component(self.handle)
                .context(&format!("destroy {}", self.kind)),
        );
        self.state = ComponentState::Destroyed;
        tracing::info!(
            target: LOG,
            kind = %self.kind,
            handle = self.handle.0,
            "component destroyed"
        );
        teardown.finish()
    }
}

impl Drop for Component {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!(target: LOG, kind = %self.kind, error = %e, "destroy on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use picroscopy_core::status::Status;
    use picroscopy_simulation::{Command, Fault, Op, SimFirmware};

    use super::*;

    #[test]
    fn lifecycle_runs_created_enabled_disabled_destroyed() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let mut renderer = Component::create(sim.clone(), ComponentKind::Renderer, |_| Ok(()))?;
        assert_eq!(renderer.state(), ComponentState::Enabled);
        assert_eq!(sim.component_enabled(renderer.handle()), Some(true));

        renderer.disable()?;
        assert_eq!(renderer.state(), ComponentState::Disabled);
        renderer.disable()?;

        renderer.destroy()?;
        renderer.destroy()?;
        assert_eq!(renderer.state(), ComponentState::Destroyed);
        assert!(sim.live_components().is_empty());
        Ok(())
    }

    #[test]
    fn failed_configuration_destroys_the_component() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let err = Component::create(sim.clone(), ComponentKind::Camera, |_| {
            Err(PipelineError::runtime(ErrorKind::NotConfigured, "refused"))
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConfigured);
        assert!(sim.live_components().is_empty());
        assert!(matches!(sim.ops().last(), Some(Op::DestroyComponent(_))));
        Ok(())
    }

    #[test]
    fn failed_enable_is_unwound() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        sim.inject(
            Fault::new(Command::EnableComponent, Status::ENOSPC).kind(ComponentKind::Camera),
        );
        let err = Component::create(sim.clone(), ComponentKind::Camera, |_| Ok(())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfResources);
        assert!(sim.live_components().is_empty());
        Ok(())
    }

    #[test]
    fn double_enable_is_a_runtime_error() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let mut camera = Component::create(sim.clone(), ComponentKind::Camera, |_| Ok(()))?;
        let err = camera.enable().unwrap_err();
        assert!(err.is_runtime());
        assert_eq!(camera.outputs().len(), 3);
        assert_eq!(camera.output(5).unwrap_err().kind(), ErrorKind::NotFound);
        Ok(())
    }
}
