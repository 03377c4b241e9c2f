use std::sync::Arc;

use picroscopy_core::buffer::{event, BufferHeader};
use picroscopy_core::error::{PipelineError, Result};
use picroscopy_core::format::{BufferRequirements, VideoFormat};
use picroscopy_core::params::{ParamRecord, ParamTag};
use picroscopy_core::pixel_format::FourCC;
use picroscopy_core::settings::{Setting, SettingName};
use picroscopy_core::status::{ErrorKind, StatusExt};
use picroscopy_core::traits::{BufferCallback, ComponentKind, Firmware, PortKind, PortRef};

use crate::pool::{BufferHandler, BufferPool, PoolCounts};

const LOG: &str = "picroscopy::port";

/// One endpoint of a component.
///
/// Output ports that deliver data to the caller own a [`BufferPool`] while
/// enabled. Tunnelled ports are enabled by their connection instead and
/// never hold a pool.
#[derive(Debug)]
pub struct Port {
    fw: Arc<dyn Firmware>,
    port: PortRef,
    owner: ComponentKind,
    format: VideoFormat,
    requirements: BufferRequirements,
    enabled: bool,
    /// Owner is enabled and this port may not be reconfigured meanwhile.
    locked: bool,
    reconfigurable: bool,
    pool: Option<BufferPool>,
}

impl Port {
    pub(crate) fn new(fw: Arc<dyn Firmware>, port: PortRef, owner: ComponentKind) -> Self {
        Self {
            fw,
            port,
            owner,
            format: VideoFormat::default(),
            requirements: BufferRequirements::default(),
            enabled: false,
            locked: false,
            reconfigurable: false,
            pool: None,
        }
    }

    pub fn port_ref(&self) -> PortRef {
        self.port
    }

    pub fn kind(&self) -> PortKind {
        self.port.kind
    }

    pub fn index(&self) -> u32 {
        self.port.index
    }

    pub fn owner(&self) -> ComponentKind {
        self.owner
    }

    pub fn format(&self) -> &VideoFormat {
        &self.format
    }

    pub fn requirements(&self) -> &BufferRequirements {
        &self.requirements
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pool_counts(&self) -> Option<PoolCounts> {
        self.pool.as_ref().map(BufferPool::counts)
    }

    /// Capture ports stay reconfigurable while their component runs, as long
    /// as the port itself is idle.
    pub fn set_reconfigurable(&mut self, reconfigurable: bool) {
        self.reconfigurable = reconfigurable;
    }

    pub(crate) fn set_owner_enabled(&mut self, enabled: bool) {
        self.locked = enabled && !self.reconfigurable;
    }

    fn check_mutable(&self, what: &str) -> Result<()> {
        if self.enabled || self.locked {
            return Err(PipelineError::runtime(
                ErrorKind::NotReady,
                format!(
                    "cannot change {} of {} {} while it is in use",
                    what, self.owner, self.port
                ),
            ));
        }
        Ok(())
    }

    /// Commits `format` and adopts the larger of the minimum and recommended
    /// buffer settings the firmware reports for it.
    pub fn set_format(&mut self, format: VideoFormat) -> Result<BufferRequirements> {
        self.check_mutable("format")?;
        let mut requirements = self
            .fw
            .commit_format(self.port, &format)
            .context(&format!("commit {} format on {}", format.encoding, self.port))?;
        let (num, size) = requirements.preferred();
        requirements.num = num;
        requirements.size = size;
        self.format = format;
        self.requirements = requirements;
        tracing::debug!(
            target: LOG,
            port = %self.port,
            encoding = %format.encoding,
            width = format.width,
            height = format.height,
            num,
            size,
            "format committed"
        );
        Ok(requirements)
    }

    pub fn set_buffer_requirements(&mut self, num: u32, size: u32) -> Result<()> {
        self.check_mutable("buffers")?;
        let context = format!("set buffers on {}", self.port);
        if !self.requirements.satisfies(num, size) {
            return Err(PipelineError::status(
                ErrorKind::InvalidArgument,
                &context,
                format!(
                    "{}x{} bytes is below the minimum {}x{}",
                    num, size, self.requirements.num_min, self.requirements.size_min
                ),
            ));
        }
        self.fw.set_buffers(self.port, num, size).context(&context)?;
        self.requirements.num = num;
        self.requirements.size = size;
        Ok(())
    }

    /// Starts the port.
    ///
    /// Control ports always get an event logger. An output port given a
    /// `handler` is backed by a fresh pool sized from the negotiated
    /// requirements; every header is queued before this returns. Without a
    /// handler the port is enabled bare, which the firmware only accepts for
    /// tunnelled ports.
    pub fn enable(&mut self, handler: Option<BufferHandler>) -> Result<()> {
        if self.enabled {
            return Err(PipelineError::runtime(
                ErrorKind::AlreadyConnected,
                format!("port {} already enabled", self.port),
            ));
        }
        let context = format!("enable {} port {}", self.owner, self.port);
        match (self.port.kind, handler) {
            (PortKind::Control, _) => {
                self.fw
                    .enable_port(self.port, Some(control_events(self.owner)))
                    .context(&context)?;
                self.enabled = true;
            }
            (PortKind::Output, Some(handler)) => {
                let pool = BufferPool::create(
                    Arc::clone(&self.fw),
                    self.port,
                    self.requirements.num,
                    self.requirements.size,
                )?;
                pool.set_port_enabled(true);
                if let Err(e) = self
                    .fw
                    .enable_port(self.port, Some(pool.callback(Some(handler))))
                    .context(&context)
                {
                    pool.set_port_enabled(false);
                    if let Err(cleanup) = pool.destroy() {
                        tracing::warn!(
                            target: LOG,
                            port = %self.port,
                            error = %cleanup,
                            "pool cleanup failed"
                        );
                    }
                    return Err(e);
                }
                self.enabled = true;
                self.pool = Some(pool);
                let primed = self.pool.as_ref().map(BufferPool::prime).transpose();
                if let Err(e) = primed {
                    if let Err(cleanup) = self.disable() {
                        tracing::warn!(
                            target: LOG,
                            port = %self.port,
                            error = %cleanup,
                            "disable after failed prime"
                        );
                    }
                    return Err(e);
                }
            }
            (PortKind::Input, Some(_)) => {
                return Err(PipelineError::status(
                    ErrorKind::NotImplemented,
                    &context,
                    "input ports are fed through connections",
                ));
            }
            (_, None) => {
                self.fw.enable_port(self.port, None).context(&context)?;
                self.enabled = true;
            }
        }
        tracing::debug!(target: LOG, owner = %self.owner, port = %self.port, "port enabled");
        Ok(())
    }

    /// Stops the port and frees its pool. A disabled port is left alone.
    ///
    /// The pool stops refilling before the firmware is told, so buffers the
    /// firmware flushes back during the call land in the free queue.
    pub fn disable(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(pool) = &self.pool {
            pool.set_port_enabled(false);
        }
        let mut result = self
            .fw
            .disable_port(self.port)
            .context(&format!("disable {} port {}", self.owner, self.port));
        self.enabled = false;
        if let Some(pool) = self.pool.take() {
            if let Err(e) = pool.destroy() {
                result = result.and(Err(e));
            }
        }
        tracing::debug!(target: LOG, owner = %self.owner, port = %self.port, "port disabled");
        result
    }

    pub fn get_parameter(&self, tag: ParamTag) -> Result<ParamRecord> {
        let bytes = self
            .fw
            .get_parameter(self.port, tag)
            .context(&format!("get {:?} on {}", tag, self.port))?;
        ParamRecord::from_bytes(&bytes)
    }

    pub fn set_parameter(&self, record: &ParamRecord) -> Result<()> {
        self.fw
            .set_parameter(self.port, &record.to_bytes())
            .context(&format!("set {:?} on {}", record.tag(), self.port))
    }

    /// Validates, encodes and writes `setting`.
    pub fn set_setting(&self, setting: Setting) -> Result<()> {
        let record = setting.encode()?;
        self.fw
            .set_parameter(self.port, &record.to_bytes())
            .context(&format!("set {}", setting.name()))
    }

    /// Reads `name` back from the firmware.
    pub fn get_setting(&self, name: SettingName) -> Result<Setting> {
        let bytes = self
            .fw
            .get_parameter(self.port, name.tag())
            .context(&format!("get {}", name))?;
        Setting::decode(name, &ParamRecord::from_bytes(&bytes)?)
    }
}

fn control_events(owner: ComponentKind) -> BufferCallback {
    Arc::new(move |header: BufferHeader| match header.cmd {
        event::PARAMETER_CHANGED => match ParamRecord::from_bytes(header.payload()) {
            Ok(record) => {
                tracing::trace!(target: LOG, %owner, tag = ?record.tag(), "parameter changed")
            }
            Err(e) => tracing::warn!(target: LOG, %owner, error = %e, "unreadable parameter event"),
        },
        event::ERROR => tracing::error!(target: LOG, %owner, "firmware reported an error event"),
        cmd => tracing::debug!(target: LOG, %owner, event = %FourCC(cmd), "control event"),
    })
}

#[cfg(test)]
mod tests {
    use picroscopy_core::format::Rational;
    use picroscopy_core::status::Status;
    use picroscopy_simulation::{Command, SimFirmware};

    use super::*;

    fn camera_output(sim: &Arc<SimFirmware>, index: u32) -> anyhow::Result<Port> {
        let camera = sim.create_component(ComponentKind::Camera)?.handle;
        Ok(Port::new(
            sim.clone(),
            PortRef::output(camera, index),
            ComponentKind::Camera,
        ))
    }

    #[test]
    fn set_format_adopts_preferred_buffers() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let mut port = camera_output(&sim, 0)?;
        let requirements = port.set_format(VideoFormat::opaque(640, 480, Rational::new(30, 1)))?;
        assert_eq!((requirements.num, requirements.size), (3, 128));

        let err = port.set_buffer_requirements(0, 128).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        port.set_buffer_requirements(5, 128)?;
        assert_eq!(port.requirements().num, 5);
        Ok(())
    }

    #[test]
    fn formats_lock_while_the_owner_runs() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let mut port = camera_output(&sim, 0)?;
        port.set_owner_enabled(true);
        let err = port
            .set_format(VideoFormat::opaque(640, 480, Rational::new(30, 1)))
            .unwrap_err();
        assert!(err.is_runtime());

        let mut still = camera_output(&sim, 2)?;
        still.set_reconfigurable(true);
        still.set_owner_enabled(true);
        still.set_format(VideoFormat::opaque(2592, 1944, Rational::new(1, 1)))?;
        Ok(())
    }

    #[test]
    fn enable_twice_fails_disable_twice_does_not() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let camera = sim.create_component(ComponentKind::Camera)?.handle;
        let mut control = Port::new(sim.clone(), PortRef::control(camera), ComponentKind::Camera);

        control.enable(None)?;
        let err = control.enable(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyConnected);
        assert!(err.is_runtime());

        control.disable()?;
        control.disable()?;
        assert!(!control.is_enabled());
        Ok(())
    }

    #[test]
    fn firmware_failure_on_enable_frees_the_pool() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let encoder = sim.create_component(ComponentKind::ImageEncoder)?.handle;
        let mut output = Port::new(
            sim.clone(),
            PortRef::output(encoder, 0),
            ComponentKind::ImageEncoder,
        );
        output.set_format(
            VideoFormat::opaque(64, 64, Rational::new(1, 1)).with_encoding(FourCC::JPEG),
        )?;

        sim.fail(Command::EnablePort, Status::ENOSPC);
        let err = output.enable(Some(Arc::new(|_: &BufferHeader| {}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfResources);
        assert!(!output.is_enabled());
        assert!(matches!(
            sim.ops().last(),
            Some(picroscopy_simulation::Op::DestroyPool(_))
        ));
        Ok(())
    }
}
