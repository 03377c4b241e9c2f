use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use picroscopy_core::buffer::{event, BufferFlags, BufferHeader};
use picroscopy_core::format::{BufferRequirements, Rational, Rect, VideoFormat};
use picroscopy_core::params::{ColourFx, ParamRecord, ParamTag, ParamValue, Shape, GROUP_CAMERA};
use picroscopy_core::pixel_format::FourCC;
use picroscopy_core::settings::{Mirror, Setting, SettingName};
use picroscopy_core::status::{FwResult, Status};
use picroscopy_core::traits::{
    BufferCallback, ComponentHandle, ComponentInfo, ComponentKind, ConnectionFlags,
    ConnectionHandle, Firmware, PortKind, PortRef, SendError,
};

use crate::frames::{self, Orientation};
use crate::journal::{Command, Fault, FaultPlan, Op};

const LOG: &str = "picroscopy::simulation";

/// Still-port index on the camera; the only port that honours `Capture`.
const STILL_PORT: u32 = 2;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Size of the synthetic still, before rotation.
    pub frame_size: (u32, u32),
    /// Recommended buffer size on encoder outputs. Small values split a
    /// still across many buffers.
    pub encoder_buffer_size: u32,
    pub encoder_buffer_num: u32,
    /// Upper bound on `count * size` for a single pool.
    pub max_pool_bytes: u64,
    /// How long a producer waits for the consumer to return a buffer.
    pub starve_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frame_size: (320, 240),
            encoder_buffer_size: 4096,
            encoder_buffer_num: 2,
            max_pool_bytes: 64 << 20,
            starve_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum NextCapture {
    #[default]
    Normal,
    Stall,
    Corrupt,
}

struct SimPort {
    format: VideoFormat,
    requirements: BufferRequirements,
    enabled: bool,
    callback: Option<BufferCallback>,
    queue: VecDeque<BufferHeader>,
    params: HashMap<ParamTag, Vec<u8>>,
    connection: Option<ConnectionHandle>,
    pool: Option<u32>,
}

impl SimPort {
    fn new() -> Self {
        Self {
            format: VideoFormat::default(),
            requirements: BufferRequirements::default(),
            enabled: false,
            callback: None,
            queue: VecDeque::new(),
            params: HashMap::new(),
            connection: None,
            pool: None,
        }
    }
}

struct SimComponent {
    kind: ComponentKind,
    enabled: bool,
    ports: HashMap<PortRef, SimPort>,
}

struct SimConnection {
    output: PortRef,
    input: PortRef,
    enabled: bool,
}

#[derive(Default)]
struct SimState {
    next_id: u32,
    components: BTreeMap<ComponentHandle, SimComponent>,
    connections: BTreeMap<ConnectionHandle, SimConnection>,
    journal: Vec<Op>,
    faults: FaultPlan,
    next_capture: NextCapture,
    captures: usize,
}

impl SimState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn trip(
        &mut self,
        command: Command,
        kind: Option<ComponentKind>,
        tag: Option<ParamTag>,
    ) -> FwResult<()> {
        match self.faults.trip(command, kind, tag) {
            Some(status) => {
                tracing::debug!(target: LOG, ?command, ?status, "injected fault");
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn kind_of(&self, component: ComponentHandle) -> Option<ComponentKind> {
        self.components.get(&component).map(|c| c.kind)
    }

    fn component_mut(&mut self, component: ComponentHandle) -> FwResult<&mut SimComponent> {
        self.components.get_mut(&component).ok_or(Status::ENOENT)
    }

    fn port(&self, port: PortRef) -> FwResult<&SimPort> {
        self.components
            .get(&port.component)
            .and_then(|c| c.ports.get(&port))
            .ok_or(Status::ENOENT)
    }

    fn port_mut(&mut self, port: PortRef) -> FwResult<&mut SimPort> {
        self.components
            .get_mut(&port.component)
            .and_then(|c| c.ports.get_mut(&port))
            .ok_or(Status::ENOENT)
    }

    fn is_connected(&self, component: ComponentHandle, enabled_only: bool) -> bool {
        self.connections.values().any(|c| {
            (c.output.component == component || c.input.component == component)
                && (c.enabled || !enabled_only)
        })
    }

    /// Marks the port disabled and hands back what it still holds.
    fn shut_port(
        &mut self,
        port: PortRef,
    ) -> FwResult<(Option<BufferCallback>, Vec<BufferHeader>)> {
        let sim_port = self.port_mut(port)?;
        sim_port.enabled = false;
        let headers = sim_port.queue.drain(..).collect();
        Ok((sim_port.callback.take(), headers))
    }

    fn stored(&self, port: PortRef, tag: ParamTag) -> Option<ParamRecord> {
        let bytes = self.port(port).ok()?.params.get(&tag)?;
        ParamRecord::from_bytes(bytes).ok()
    }
}

fn requirements_for(kind: ComponentKind, port: PortRef, config: &SimConfig) -> BufferRequirements {
    match (kind, port.kind) {
        (ComponentKind::ImageEncoder, PortKind::Output) => BufferRequirements {
            num_min: 1,
            num_recommended: config.encoder_buffer_num,
            size_min: 1024,
            size_recommended: config.encoder_buffer_size,
            ..Default::default()
        },
        _ => BufferRequirements {
            num_min: 1,
            num_recommended: 3,
            size_min: 128,
            size_recommended: 128,
            ..Default::default()
        },
    }
}

fn accepts_format(kind: ComponentKind, port: PortRef, format: &VideoFormat) -> bool {
    match (kind, port.kind) {
        (_, PortKind::Control) => false,
        (ComponentKind::Camera, PortKind::Output) => {
            format.encoding == FourCC::OPAQUE || !format.encoding.is_compressed()
        }
        (ComponentKind::ImageEncoder, PortKind::Output) => format.encoding.is_still_image(),
        (ComponentKind::ImageEncoder, PortKind::Input) => {
            matches!(format.encoding, FourCC::OPAQUE | FourCC::I420)
        }
        (_, PortKind::Input) => !format.encoding.is_compressed(),
        _ => false,
    }
}

/// Which ports a parameter may be read or written on.
fn applicable(kind: ComponentKind, port: PortRef, tag: ParamTag) -> bool {
    match tag {
        ParamTag::DisplayRegion => kind == ComponentKind::Renderer && port.kind == PortKind::Input,
        ParamTag::JpegQFactor => {
            kind == ComponentKind::ImageEncoder && port.kind == PortKind::Output
        }
        ParamTag::ImmutableInput => port.kind == PortKind::Input,
        ParamTag::Capture | ParamTag::Rotation | ParamTag::Mirror => {
            kind == ComponentKind::Camera && port.kind == PortKind::Output
        }
        _ => {
            kind == ComponentKind::Camera
                && port.kind == PortKind::Control
                && tag.id() & GROUP_CAMERA != 0
        }
    }
}

/// What an unset parameter reads back as.
fn firmware_default(tag: ParamTag) -> Option<ParamRecord> {
    let value = match tag {
        ParamTag::InputCrop => ParamValue::Rect(Rect::new(0, 0, 65535, 65535)),
        ParamTag::ColourEffect => ParamValue::ColourFx(ColourFx {
            enable: 0,
            u: 128,
            v: 128,
        }),
        ParamTag::Brightness => ParamValue::Rational(Rational::new(50, 100)),
        ParamTag::JpegQFactor => ParamValue::Uint32(85),
        ParamTag::ExposureMode | ParamTag::AwbMode => ParamValue::Enum(1),
        _ => match tag.shape() {
            Shape::Rational => {
                ParamValue::Rational(Rational::new(0, 100))
            }
            Shape::Uint32 => ParamValue::Uint32(0),
            Shape::Int32 => ParamValue::Int32(0),
            Shape::Boolean => ParamValue::Boolean(false),
            Shape::Enum => ParamValue::Enum(0),
            Shape::CameraConfig => {
                ParamValue::CameraConfig(Default::default())
            }
            Shape::DisplayRegion => {
                ParamValue::DisplayRegion(Default::default())
            }
            _ => return None,
        },
    };
    ParamRecord::new(tag, value).ok()
}

enum Job {
    Deliver {
        callback: BufferCallback,
        header: BufferHeader,
    },
    Produce {
        port: PortRef,
        data: Vec<u8>,
        corrupt: bool,
    },
    Barrier(Sender<()>),
    Shutdown,
}

struct Shared {
    state: Mutex<SimState>,
    /// Signalled whenever a buffer is queued or a port shuts.
    fed: Condvar,
    config: SimConfig,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process firmware.
///
/// Commands run on the caller's thread against an in-memory component
/// graph; buffer callbacks run on a dedicated worker thread, never with the
/// internal lock held, so callbacks may issue commands of their own.
pub struct SimFirmware {
    shared: Arc<Shared>,
    jobs: Sender<Job>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl fmt::Debug for SimFirmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimFirmware")
            .field("config", &self.shared.config)
            .field("worker", &self.worker_id)
            .finish_non_exhaustive()
    }
}

impl SimFirmware {
    pub fn new() -> io::Result<Self> {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(SimState::default()),
            fed: Condvar::new(),
            config,
        });
        let (jobs, rx) = crossbeam_channel::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("picroscopy-sim-callbacks".into())
            .spawn(move || run_worker(worker_shared, rx))?;
        let worker_id = worker.thread().id();
        Ok(Self {
            shared,
            jobs,
            worker: Some(worker),
            worker_id,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    /// Successful commands so far, oldest first.
    pub fn ops(&self) -> Vec<Op> {
        self.shared.lock().journal.clone()
    }

    pub fn clear_ops(&self) {
        self.shared.lock().journal.clear();
    }

    pub fn inject(&self, fault: Fault) {
        self.shared.lock().faults.push(fault);
    }

    pub fn clear_faults(&self) {
        self.shared.lock().faults.clear();
    }

    /// The next capture trigger is accepted but never produces data.
    pub fn stall_next_capture(&self) {
        self.shared.lock().next_capture = NextCapture::Stall;
    }

    /// The next still is delivered with [`BufferFlags::CORRUPTED`] set.
    pub fn corrupt_next_capture(&self) {
        self.shared.lock().next_capture = NextCapture::Corrupt;
    }

    /// Number of capture triggers accepted.
    pub fn captures(&self) -> usize {
        self.shared.lock().captures
    }

    pub fn live_components(&self) -> Vec<(ComponentHandle, ComponentKind)> {
        let state = self.shared.lock();
        state.components.iter().map(|(h, c)| (*h, c.kind)).collect()
    }

    pub fn component_enabled(&self, component: ComponentHandle) -> Option<bool> {
        self.shared.lock().components.get(&component).map(|c| c.enabled)
    }

    pub fn live_connections(&self) -> usize {
        self.shared.lock().connections.len()
    }

    pub fn port_enabled(&self, port: PortRef) -> bool {
        self.shared.lock().port(port).map_or(false, |p| p.enabled)
    }

    /// Headers the firmware currently holds for `port`.
    pub fn queued(&self, port: PortRef) -> usize {
        self.shared.lock().port(port).map_or(0, |p| p.queue.len())
    }

    /// Last value written for `tag`, decoded.
    pub fn parameter(&self, port: PortRef, tag: ParamTag) -> Option<ParamRecord> {
        self.shared.lock().stored(port, tag)
    }

    /// Streams `bytes` out of an enabled port as if the component produced them.
    pub fn emit(&self, port: PortRef, bytes: &[u8]) -> FwResult<()> {
        if !self.port_enabled(port) {
            return Err(Status::ENOTCONN);
        }
        self.post(Job::Produce {
            port,
            data: bytes.to_vec(),
            corrupt: false,
        });
        Ok(())
    }

    /// Returns once every callback queued so far has run.
    pub fn wait_idle(&self) {
        self.settle(None, Vec::new());
    }

    fn post(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            tracing::error!(target: LOG, "callback worker is gone; job dropped");
        }
    }

    /// Returns `headers` through `callback` and waits for the worker to drain.
    fn settle(&self, callback: Option<BufferCallback>, headers: Vec<BufferHeader>) {
        if thread::current().id() == self.worker_id {
            if let Some(callback) = callback {
                headers.into_iter().for_each(|h| callback(h));
            }
            return;
        }
        if let Some(callback) = callback {
            for header in headers {
                self.post(Job::Deliver {
                    callback: Arc::clone(&callback),
                    header,
                });
            }
        }
        let (done, wait) = crossbeam_channel::bounded(1);
        self.post(Job::Barrier(done));
        let _ = wait.recv();
    }

    /// Checks a capture trigger and collects what the worker needs.
    fn arm_capture(&self, state: &mut SimState, still: PortRef) -> FwResult<Option<CapturePlan>> {
        if still.kind != PortKind::Output || still.index != STILL_PORT {
            return Err(Status::EINVAL);
        }
        let camera = state.components.get(&still.component).ok_or(Status::ENOENT)?;
        if !camera.enabled {
            return Err(Status::ENOTREADY);
        }
        let connection = state
            .port(still)?
            .connection
            .and_then(|h| state.connections.get(&h))
            .filter(|c| c.enabled)
            .ok_or(Status::ENOTCONN)?;
        let encoder = state
            .components
            .get(&connection.input.component)
            .ok_or(Status::ENOTCONN)?;
        if encoder.kind != ComponentKind::ImageEncoder || !encoder.enabled {
            return Err(Status::ENOTREADY);
        }
        let output = PortRef::output(connection.input.component, 0);
        if !state.port(output)?.enabled {
            return Err(Status::ENOTREADY);
        }

        let quality = match state.stored(output, ParamTag::JpegQFactor).map(|r| *r.value()) {
            Some(ParamValue::Uint32(q)) => q.min(100) as u8,
            _ => 85,
        };
        let mut orientation = Orientation::default();
        if let Some(Ok(Setting::Rotation(r))) = state
            .stored(still, ParamTag::Rotation)
            .map(|r| Setting::decode(SettingName::Rotation, &r))
        {
            orientation.rotation = r;
        }
        if let Some(Ok(Setting::Mirror(m))) = state
            .stored(still, ParamTag::Mirror)
            .map(|r| Setting::decode(SettingName::Mirror, &r))
        {
            orientation.mirror = m;
        }

        state.captures += 1;
        let mode = std::mem::take(&mut state.next_capture);
        if mode == NextCapture::Stall {
            tracing::debug!(target: LOG, "capture stalled on request");
            return Ok(None);
        }
        Ok(Some(CapturePlan {
            output,
            orientation,
            quality,
            corrupt: mode == NextCapture::Corrupt,
        }))
    }
}

struct CapturePlan {
    output: PortRef,
    orientation: Orientation,
    quality: u8,
    corrupt: bool,
}

impl Drop for SimFirmware {
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if thread::current().id() == self.worker_id {
            return;
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: Arc<Shared>, jobs: Receiver<Job>) {
    for job in jobs.iter() {
        match job {
            Job::Deliver { callback, header } => callback(header),
            Job::Produce {
                port,
                data,
                corrupt,
            } => produce(&shared, port, &data, corrupt),
            Job::Barrier(done) => {
                let _ = done.send(());
            }
            Job::Shutdown => break,
        }
    }
}

/// Fills queued headers of `port` with `data`, waiting for the consumer to
/// return buffers when the queue runs dry.
fn produce(shared: &Shared, port: PortRef, data: &[u8], corrupt: bool) {
    let mut offset = 0;
    loop {
        let deadline = Instant::now() + shared.config.starve_timeout;
        let (callback, mut header) = {
            let mut state = shared.lock();
            loop {
                let sim_port = match state.port_mut(port) {
                    Ok(p) if p.enabled => p,
                    _ => {
                        tracing::debug!(target: LOG, %port, "port shut mid-frame");
                        return;
                    }
                };
                if let Some(header) = sim_port.queue.pop_front() {
                    match sim_port.callback.clone() {
                        Some(callback) => break (callback, header),
                        None => {
                            sim_port.queue.push_front(header);
                            tracing::error!(target: LOG, %port, "enabled port has no callback");
                            return;
                        }
                    }
                }
                let now = Instant::now();
                if now >= deadline {
                    tracing::error!(
                        target: LOG,
                        %port,
                        "no buffer returned in time; frame dropped"
                    );
                    return;
                }
                state = shared
                    .fed
                    .wait_timeout(state, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        };

        let n = (data.len() - offset).min(header.capacity());
        header.data[..n].copy_from_slice(&data[offset..offset + n]);
        header.length = n;
        if offset == 0 {
            header.flags |= BufferFlags::FRAME_START;
            if corrupt {
                header.flags |= BufferFlags::CORRUPTED;
            }
        }
        offset += n;
        let last = offset >= data.len() || n == 0;
        if last {
            header.flags |= BufferFlags::FRAME_END;
        }
        callback(header);
        if last {
            return;
        }
    }
}

impl Firmware for SimFirmware {
    fn create_component(&self, kind: ComponentKind) -> FwResult<ComponentInfo> {
        let mut state = self.shared.lock();
        state.trip(Command::CreateComponent, Some(kind), None)?;
        let handle = ComponentHandle(state.next_id());
        let (inputs, outputs) = match kind {
            ComponentKind::Camera => (0, 3),
            ComponentKind::Renderer => (1, 0),
            ComponentKind::ImageEncoder => (1, 1),
        };
        let ports = std::iter::once(PortRef::control(handle))
            .chain((0..inputs).map(|i| PortRef::input(handle, i)))
            .chain((0..outputs).map(|i| PortRef::output(handle, i)))
            .map(|p| (p, SimPort::new()))
            .collect();
        state.components.insert(
            handle,
            SimComponent {
                kind,
                enabled: false,
                ports,
            },
        );
        state.journal.push(Op::CreateComponent(kind, handle));
        tracing::debug!(target: LOG, %kind, ?handle, "component created");
        Ok(ComponentInfo {
            handle,
            inputs,
            outputs,
        })
    }

    fn destroy_component(&self, component: ComponentHandle) -> FwResult<()> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(component).ok_or(Status::ENOENT)?;
        state.trip(Command::DestroyComponent, Some(kind), None)?;
        if state.is_connected(component, false) {
            tracing::warn!(
                target: LOG,
                ?component,
                "destroy refused: connection still references component"
            );
            return Err(Status::EISCONN);
        }
        let open: Vec<PortRef> = state.components[&component]
            .ports
            .iter()
            .filter(|(_, p)| p.enabled)
            .map(|(r, _)| *r)
            .collect();
        let mut flushed = Vec::new();
        for port in open {
            flushed.push(state.shut_port(port)?);
        }
        state.components.remove(&component);
        state.journal.push(Op::DestroyComponent(component));
        drop(state);
        self.shared.fed.notify_all();
        for (callback, headers) in flushed {
            self.settle(callback, headers);
        }
        Ok(())
    }

    fn enable_component(&self, component: ComponentHandle) -> FwResult<()> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(component);
        state.trip(Command::EnableComponent, kind, None)?;
        state.component_mut(component)?.enabled = true;
        state.journal.push(Op::EnableComponent(component));
        Ok(())
    }

    fn disable_component(&self, component: ComponentHandle) -> FwResult<()> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(component);
        state.trip(Command::DisableComponent, kind, None)?;
        if state.is_connected(component, true) {
            tracing::warn!(target: LOG, ?component, "disable refused: connection still enabled");
            return Err(Status::EISCONN);
        }
        state.component_mut(component)?.enabled = false;
        state.journal.push(Op::DisableComponent(component));
        Ok(())
    }

    fn commit_format(&self, port: PortRef, format: &VideoFormat) -> FwResult<BufferRequirements> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component).ok_or(Status::ENOENT)?;
        state.trip(Command::CommitFormat, Some(kind), None)?;
        if !accepts_format(kind, port, format) || format.width == 0 || format.height == 0 {
            return Err(Status::EINVAL);
        }
        let requirements = requirements_for(kind, port, &self.shared.config);
        let sim_port = state.port_mut(port)?;
        if sim_port.enabled {
            return Err(Status::EINVAL);
        }
        sim_port.format = *format;
        sim_port.requirements = requirements;
        state.journal.push(Op::CommitFormat(port));
        Ok(requirements)
    }

    fn set_buffers(&self, port: PortRef, num: u32, size: u32) -> FwResult<()> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component);
        state.trip(Command::SetBuffers, kind, None)?;
        let sim_port = state.port_mut(port)?;
        if sim_port.enabled || !sim_port.requirements.satisfies(num, size) {
            return Err(Status::EINVAL);
        }
        sim_port.requirements.num = num;
        sim_port.requirements.size = size;
        state.journal.push(Op::SetBuffers(port, num, size));
        Ok(())
    }

    fn enable_port(&self, port: PortRef, callback: Option<BufferCallback>) -> FwResult<()> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component);
        state.trip(Command::EnablePort, kind, None)?;
        let sim_port = state.port_mut(port)?;
        if sim_port.enabled {
            return Err(Status::EINVAL);
        }
        if callback.is_none() && port.kind != PortKind::Control && sim_port.connection.is_none() {
            return Err(Status::EINVAL);
        }
        sim_port.enabled = true;
        sim_port.callback = callback;
        state.journal.push(Op::EnablePort(port));
        Ok(())
    }

    fn disable_port(&self, port: PortRef) -> FwResult<()> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component);
        state.trip(Command::DisablePort, kind, None)?;
        if !state.port(port)?.enabled {
            return Err(Status::EINVAL);
        }
        let (callback, headers) = state.shut_port(port)?;
        state.journal.push(Op::DisablePort(port));
        drop(state);
        self.shared.fed.notify_all();
        self.settle(callback, headers);
        Ok(())
    }

    fn get_parameter(&self, port: PortRef, tag: ParamTag) -> FwResult<Vec<u8>> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component).ok_or(Status::ENOENT)?;
        state.trip(Command::GetParameter, Some(kind), Some(tag))?;
        if !applicable(kind, port, tag) {
            return Err(Status::ENOSYS);
        }
        match state.port(port)?.params.get(&tag) {
            Some(bytes) => Ok(bytes.clone()),
            None => firmware_default(tag)
                .map(|r| r.to_bytes())
                .ok_or(Status::ENOSYS),
        }
    }

    fn set_parameter(&self, port: PortRef, record: &[u8]) -> FwResult<()> {
        let parsed = ParamRecord::from_bytes(record).map_err(|_| Status::EINVAL)?;
        let tag = parsed.tag();
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component).ok_or(Status::ENOENT)?;
        state.trip(Command::SetParameter, Some(kind), Some(tag))?;
        if !applicable(kind, port, tag) {
            return Err(Status::ENOSYS);
        }
        let plan = match parsed.value() {
            ParamValue::Boolean(true) if tag == ParamTag::Capture => {
                self.arm_capture(&mut state, port)?
            }
            _ => None,
        };
        let sim_port = state.port_mut(port)?;
        sim_port.params.insert(tag, parsed.to_bytes());
        let notify = match (&sim_port.callback, port.kind) {
            (Some(callback), PortKind::Control) => Some(Arc::clone(callback)),
            _ => None,
        };
        state.journal.push(Op::SetParameter(port, tag));
        drop(state);

        if let Some(callback) = notify {
            let bytes = parsed.to_bytes();
            let mut header = BufferHeader::new(0, bytes.len());
            header.data.copy_from_slice(&bytes);
            header.length = header.data.len();
            header.cmd = event::PARAMETER_CHANGED;
            self.post(Job::Deliver { callback, header });
        }
        if let Some(plan) = plan {
            let size = self.shared.config.frame_size;
            let data = frames::test_card(size, plan.orientation, plan.quality)
                .map_err(|e| {
                    tracing::error!(target: LOG, error = %e, "synthetic still failed to encode");
                    Status::EIO
                })?;
            tracing::debug!(target: LOG, bytes = data.len(), "capture triggered");
            self.post(Job::Produce {
                port: plan.output,
                data,
                corrupt: plan.corrupt,
            });
        }
        Ok(())
    }

    fn create_pool(&self, port: PortRef, count: u32, size: u32) -> FwResult<Vec<BufferHeader>> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component);
        state.trip(Command::CreatePool, kind, None)?;
        if count == 0 || size == 0 {
            return Err(Status::EINVAL);
        }
        if u64::from(count) * u64::from(size) > self.shared.config.max_pool_bytes {
            return Err(Status::ENOMEM);
        }
        state.port_mut(port)?.pool = Some(count);
        state.journal.push(Op::CreatePool(port, count, size));
        Ok((0..count as usize)
            .map(|i| BufferHeader::new(i, size as usize))
            .collect())
    }

    fn destroy_pool(&self, port: PortRef, headers: Vec<BufferHeader>) -> FwResult<()> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component);
        state.trip(Command::DestroyPool, kind, None)?;
        let sim_port = state.port_mut(port)?;
        if sim_port.enabled {
            return Err(Status::EINVAL);
        }
        let expected = sim_port.pool.take().ok_or(Status::EINVAL)?;
        if headers.len() != expected as usize {
            tracing::warn!(
                target: LOG,
                %port,
                expected,
                returned = headers.len(),
                "pool destroyed with headers missing"
            );
            return Err(Status::EINVAL);
        }
        state.journal.push(Op::DestroyPool(port));
        Ok(())
    }

    fn send_buffer(&self, port: PortRef, header: BufferHeader) -> Result<(), SendError> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(port.component);
        if let Err(status) = state.trip(Command::SendBuffer, kind, None) {
            return Err(SendError { status, header });
        }
        match state.port_mut(port) {
            Ok(sim_port) if sim_port.enabled && sim_port.callback.is_some() => {
                sim_port.queue.push_back(header);
            }
            Ok(_) => {
                return Err(SendError {
                    status: Status::EINVAL,
                    header,
                })
            }
            Err(status) => return Err(SendError { status, header }),
        }
        drop(state);
        self.shared.fed.notify_all();
        Ok(())
    }

    fn create_connection(
        &self,
        output: PortRef,
        input: PortRef,
        flags: ConnectionFlags,
    ) -> FwResult<ConnectionHandle> {
        let mut state = self.shared.lock();
        let kind = state.kind_of(output.component);
        state.trip(Command::CreateConnection, kind, None)?;
        if output.kind != PortKind::Output || input.kind != PortKind::Input {
            return Err(Status::EINVAL);
        }
        let produced = {
            let out = state.port(output)?;
            if out.connection.is_some() {
                return Err(Status::EISCONN);
            }
            out.format
        };
        let consumer = state.port_mut(input)?;
        if consumer.connection.is_some() {
            return Err(Status::EISCONN);
        }
        if consumer.format.encoding == FourCC::UNSET {
            consumer.format = produced;
        } else if !consumer.format.accepts(&produced) {
            return Err(Status::EINVAL);
        }
        let handle = ConnectionHandle(state.next_id());
        state.port_mut(input)?.connection = Some(handle);
        state.port_mut(output)?.connection = Some(handle);
        state.connections.insert(
            handle,
            SimConnection {
                output,
                input,
                enabled: false,
            },
        );
        state.journal.push(Op::CreateConnection(handle, output, input));
        tracing::debug!(target: LOG, %output, %input, ?flags, "connection created");
        Ok(handle)
    }

    fn enable_connection(&self, connection: ConnectionHandle) -> FwResult<()> {
        let mut state = self.shared.lock();
        state.trip(Command::EnableConnection, None, None)?;
        let (output, input) = match state.connections.get(&connection) {
            Some(c) if c.enabled => return Err(Status::EINVAL),
            Some(c) => (c.output, c.input),
            None => return Err(Status::ENOENT),
        };
        let live = |h: ComponentHandle| state.components.get(&h).map_or(false, |c| c.enabled);
        if !live(output.component) || !live(input.component) {
            return Err(Status::ENOTREADY);
        }
        if let Some(c) = state.connections.get_mut(&connection) {
            c.enabled = true;
        }
        state.journal.push(Op::EnableConnection(connection));
        Ok(())
    }

    fn disable_connection(&self, connection: ConnectionHandle) -> FwResult<()> {
        let mut state = self.shared.lock();
        state.trip(Command::DisableConnection, None, None)?;
        match state.connections.get_mut(&connection) {
            Some(c) if c.enabled => c.enabled = false,
            Some(_) => return Err(Status::EINVAL),
            None => return Err(Status::ENOENT),
        }
        state.journal.push(Op::DisableConnection(connection));
        Ok(())
    }

    fn destroy_connection(&self, connection: ConnectionHandle) -> FwResult<()> {
        let mut state = self.shared.lock();
        state.trip(Command::DestroyConnection, None, None)?;
        let removed = state.connections.remove(&connection).ok_or(Status::ENOENT)?;
        for port in [removed.output, removed.input] {
            if let Ok(p) = state.port_mut(port) {
                p.connection = None;
            }
        }
        state.journal.push(Op::DestroyConnection(connection));
        Ok(())
    }
}

impl SimFirmware {
    /// Convenience for tests: the fault plan as seen from outside.
    pub fn fail(&self, command: Command, status: Status) {
        self.inject(Fault::new(command, status));
    }

    /// Current mirror state of a camera output, decoded.
    pub fn mirror(&self, port: PortRef) -> Option<Mirror> {
        match self.parameter(port, ParamTag::Mirror).map(|r| *r.value()) {
            Some(ParamValue::Enum(w)) => Mirror::from_wire(w),
            _ => None,
        }
    }
}
