use std::sync::Arc;

use picroscopy_core::error::{PipelineError, Result};
use picroscopy_core::status::{ErrorKind, StatusExt};
use picroscopy_core::traits::{
    ComponentHandle, ConnectionFlags, ConnectionHandle, Firmware, PortRef,
};

use crate::component::Component;
use crate::teardown::Teardown;

const LOG: &str = "picroscopy::connection";

/// Link from one component's output port to another's input port.
#[derive(Debug)]
pub struct Connection {
    fw: Arc<dyn Firmware>,
    handle: ConnectionHandle,
    output: PortRef,
    input: PortRef,
    enabled: bool,
    destroyed: bool,
}

impl Connection {
    /// Connects output `out` of `producer` to input `inp` of `consumer`.
    ///
    /// Both components must be enabled. The connection starts disabled.
    pub fn connect(
        fw: Arc<dyn Firmware>,
        producer: &Component,
        out: u32,
        consumer: &Component,
        inp: u32,
        tunnel: bool,
    ) -> Result<Self> {
        let output = producer.output(out)?.port_ref();
        let input = consumer.input(inp)?.port_ref();
        let context = format!("connect {} to {}", output, input);
        for component in [producer, consumer] {
            if !component.is_enabled() {
                return Err(PipelineError::status(
                    ErrorKind::InvalidArgument,
                    &context,
                    format!("{} is not enabled", component.kind()),
                ));
            }
        }
        let flags = if tunnel {
            ConnectionFlags::TUNNELLING | ConnectionFlags::ALLOCATION_ON_INPUT
        } else {
            ConnectionFlags::empty()
        };
        let handle = fw.create_connection(output, input, flags).context(&context)?;
        tracing::debug!(target: LOG, %output, %input, tunnel, "connection created");
        Ok(Self {
            fw,
            handle,
            output,
            input,
            enabled: false,
            destroyed: false,
        })
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn output(&self) -> PortRef {
        self.output
    }

    pub fn input(&self) -> PortRef {
        self.input
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether either end belongs to `component`.
    pub fn references(&self, component: ComponentHandle) -> bool {
        self.output.component == component || self.input.component == component
    }

    pub fn enable(&mut self) -> Result<()> {
        if self.enabled {
            return Err(PipelineError::runtime(
                ErrorKind::AlreadyConnected,
                format!("connection {} -> {} already enabled", self.output, self.input),
            ));
        }
        self.fw
            .enable_connection(self.handle)
            .context(&format!("enable connection {} -> {}", self.output, self.input))?;
        self.enabled = true;
        tracing::debug!(
            target: LOG,
            output = %self.output,
            input = %self.input,
            "connection enabled"
        );
        Ok(())
    }

    pub fn disable(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.fw
            .disable_connection(self.handle)
            .context(&format!("disable connection {} -> {}", self.output, self.input))?;
        self.enabled = false;
        tracing::debug!(
            target: LOG,
            output = %self.output,
            input = %self.input,
            "connection disabled"
        );
        Ok(())
    }

    pub fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        let mut teardown = Teardown::default();
        teardown.step("disable connection", self.disable());
        teardown.step(
            "destroy connection",
            self.fw
                .destroy_connection(self.handle)
                .context(&format!("destroy connection {} -> {}", self.output, self.input)),
        );
        self.destroyed = true;
        teardown.finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            tracing::warn!(
                target: LOG,
                output = %self.output,
                error = %e,
                "destroy on drop failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use picroscopy_core::builder::PipelineConfig;
    use picroscopy_core::traits::ComponentKind;
    use picroscopy_simulation::SimFirmware;

    use super::*;
    use crate::components::{self, PREVIEW_PORT};

    #[test]
    fn endpoints_must_be_enabled() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let config = PipelineConfig::new();
        let camera = components::camera(sim.clone(), &config)?;
        let mut renderer = components::renderer(sim.clone(), &config)?;
        renderer.disable()?;

        let err = Connection::connect(sim.clone(), &camera, PREVIEW_PORT, &renderer, 0, true)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(sim.live_connections(), 0);
        Ok(())
    }

    #[test]
    fn enable_disable_destroy() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let config = PipelineConfig::new();
        let camera = components::camera(sim.clone(), &config)?;
        let renderer = components::renderer(sim.clone(), &config)?;

        let mut link = Connection::connect(sim.clone(), &camera, PREVIEW_PORT, &renderer, 0, true)?;
        assert!(link.references(renderer.handle()));
        link.enable()?;
        assert_eq!(link.enable().unwrap_err().kind(), ErrorKind::AlreadyConnected);
        link.disable()?;
        link.disable()?;
        link.destroy()?;
        link.destroy()?;
        assert_eq!(sim.live_connections(), 0);
        assert_eq!(camera.kind(), ComponentKind::Camera);
        Ok(())
    }
}
