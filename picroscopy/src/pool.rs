//! Buffer headers owned on behalf of one output port.
//!
//! Each header is always in exactly one [`HeaderState`]. The pool's mutex
//! also guards the `port_enabled` flag, which is what makes a callback that
//! races `Port::disable` harmless: once the flag is down, returned headers go
//! back to the free queue and nothing is re-submitted.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use picroscopy_core::buffer::BufferHeader;
use picroscopy_core::error::{PipelineError, Result};
use picroscopy_core::status::{ErrorKind, StatusExt};
use picroscopy_core::traits::{BufferCallback, Firmware, PortRef};

const LOG: &str = "picroscopy::pool";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    /// Queued in the pool, ready for `acquire`.
    Free,
    /// Owned by the firmware.
    InFlight,
    /// Outside both: delivered by a callback or acquired, not yet re-queued.
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolCounts {
    pub free: usize,
    pub in_flight: usize,
    pub released: usize,
}

impl PoolCounts {
    pub fn total(&self) -> usize {
        self.free + self.in_flight + self.released
    }
}

/// Called on the firmware's callback thread for every delivered header,
/// before the header is recycled. Must not block.
pub type BufferHandler = Arc<dyn Fn(&BufferHeader) + Send + Sync>;

#[derive(Debug)]
struct PoolState {
    port_enabled: bool,
    destroyed: bool,
    states: Vec<HeaderState>,
    free: VecDeque<BufferHeader>,
}

impl PoolState {
    /// `free` comes from the queue itself, the rest from the per-header
    /// states, so a header that went missing shows up in `total()`.
    fn counts(&self) -> PoolCounts {
        let mut counts = PoolCounts {
            free: self.free.len(),
            ..Default::default()
        };
        for state in &self.states {
            match state {
                HeaderState::Free => {}
                HeaderState::InFlight => counts.in_flight += 1,
                HeaderState::Released => counts.released += 1,
            }
        }
        counts
    }

    fn requeue(&mut self, mut header: BufferHeader) {
        header.reset();
        self.states[header.index] = HeaderState::Free;
        self.free.push_back(header);
    }
}

#[derive(Debug)]
struct PoolInner {
    fw: Arc<dyn Firmware>,
    port: PortRef,
    size: u32,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands `header` to the firmware. The caller holds the pool lock, so the
    /// state change and the send are atomic with respect to callbacks.
    fn submit_locked(&self, state: &mut PoolState, header: BufferHeader) -> Result<()> {
        if !state.port_enabled {
            state.requeue(header);
            return Err(PipelineError::status(
                ErrorKind::NotConnected,
                &format!("submit buffer to {}", self.port),
                "port is disabled",
            ));
        }
        let index = header.index;
        state.states[index] = HeaderState::InFlight;
        if let Err(rejected) = self.fw.send_buffer(self.port, header) {
            state.requeue(rejected.header);
            return Err(PipelineError::from_status(
                rejected.status,
                &format!("submit buffer to {}", self.port),
            ));
        }
        Ok(())
    }

    /// Only headers handed out by `acquire` may come back through the
    /// public API; anything else would duplicate a header.
    fn check_acquired(&self, state: &PoolState, header: &BufferHeader, op: &str) -> Result<()> {
        match state.states.get(header.index) {
            Some(HeaderState::Released) => Ok(()),
            other => Err(PipelineError::status(
                ErrorKind::InvalidArgument,
                &format!("{} buffer {} on {}", op, header.index, self.port),
                match other {
                    Some(current) => format!("buffer is {:?}, not acquired", current),
                    None => format!("pool has {} buffers", state.states.len()),
                },
            )),
        }
    }

    fn on_return(&self, header: BufferHeader, handler: Option<&BufferHandler>) {
        {
            let mut state = self.lock();
            match state.states.get(header.index).copied() {
                Some(HeaderState::InFlight) => state.states[header.index] = HeaderState::Released,
                other => {
                    tracing::error!(
                        target: LOG,
                        port = %self.port,
                        index = header.index,
                        state = ?other,
                        "firmware returned a header the pool did not send"
                    );
                    return;
                }
            }
        }

        if header.cmd == 0 {
            if let Some(handler) = handler {
                handler(&header);
            }
        }

        let mut state = self.lock();
        state.requeue(header);
        if !state.port_enabled || state.destroyed {
            return;
        }
        if let Some(next) = state.free.pop_front() {
            if let Err(e) = self.submit_locked(&mut state, next) {
                tracing::error!(target: LOG, port = %self.port, error = %e, "refill failed");
            }
        }
    }
}

/// Fixed set of equally sized headers for one output port.
#[derive(Debug)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Allocates `count` headers of `size` bytes from the firmware.
    pub fn create(fw: Arc<dyn Firmware>, port: PortRef, count: u32, size: u32) -> Result<Self> {
        let headers = fw
            .create_pool(port, count, size)
            .context(&format!("create {}x{} byte pool on {}", count, size, port))?;
        tracing::debug!(target: LOG, %port, count, size, "pool created");
        Ok(Self {
            inner: Arc::new(PoolInner {
                fw,
                port,
                size,
                state: Mutex::new(PoolState {
                    port_enabled: false,
                    destroyed: false,
                    states: vec![HeaderState::Free; headers.len()],
                    free: headers.into(),
                }),
            }),
        })
    }

    pub fn port(&self) -> PortRef {
        self.inner.port
    }

    pub fn len(&self) -> usize {
        self.inner.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buffer_size(&self) -> u32 {
        self.inner.size
    }

    pub fn counts(&self) -> PoolCounts {
        self.inner.lock().counts()
    }

    /// Pops the next free header. Never blocks.
    pub fn acquire(&self) -> Result<BufferHeader> {
        let mut state = self.inner.lock();
        let header = state.free.pop_front().ok_or_else(|| {
            PipelineError::status(
                ErrorKind::TemporarilyUnavailable,
                &format!("acquire buffer on {}", self.inner.port),
                "no free buffer",
            )
        })?;
        state.states[header.index] = HeaderState::Released;
        Ok(header)
    }

    /// Transfers an acquired `header` to the firmware.
    pub fn submit(&self, header: BufferHeader) -> Result<()> {
        let mut state = self.inner.lock();
        self.inner.check_acquired(&state, &header, "submit")?;
        self.inner.submit_locked(&mut state, header)
    }

    /// Returns an acquired header without sending it.
    pub fn release(&self, header: BufferHeader) -> Result<()> {
        let mut state = self.inner.lock();
        self.inner.check_acquired(&state, &header, "release")?;
        state.requeue(header);
        Ok(())
    }

    /// Submits every free header; returns how many went out.
    pub fn prime(&self) -> Result<usize> {
        let mut state = self.inner.lock();
        let mut sent = 0;
        while let Some(header) = state.free.pop_front() {
            self.inner.submit_locked(&mut state, header)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Completion callback for `Firmware::enable_port`.
    pub fn callback(&self, handler: Option<BufferHandler>) -> BufferCallback {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |header: BufferHeader| inner.on_return(header, handler.as_ref()))
    }

    pub fn set_port_enabled(&self, enabled: bool) {
        self.inner.lock().port_enabled = enabled;
    }

    /// Frees the headers. Only valid once the port is disabled and every
    /// header is back in the pool; a second call is a no-op.
    pub fn destroy(&self) -> Result<()> {
        let context = format!("destroy pool on {}", self.inner.port);
        let mut state = self.inner.lock();
        if state.destroyed {
            return Ok(());
        }
        if state.port_enabled {
            return Err(PipelineError::status(
                ErrorKind::InvalidArgument,
                &context,
                "port is still enabled",
            ));
        }
        let counts = state.counts();
        if counts.free != state.states.len() {
            return Err(PipelineError::status(
                ErrorKind::InvalidArgument,
                &context,
                format!(
                    "{} buffers in flight, {} released",
                    counts.in_flight, counts.released
                ),
            ));
        }
        let headers: Vec<BufferHeader> = state.free.drain(..).collect();
        state.destroyed = true;
        self.inner.fw.destroy_pool(self.inner.port, headers).context(&context)?;
        tracing::debug!(target: LOG, port = %self.inner.port, "pool destroyed");
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().destroyed
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if self.is_destroyed() {
            return;
        }
        if let Err(e) = self.destroy() {
            tracing::warn!(target: LOG, port = %self.inner.port, error = %e, "pool leaked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::unbounded;
    use picroscopy_core::buffer::BufferFlags;
    use picroscopy_core::format::{Rational, VideoFormat};
    use picroscopy_core::pixel_format::FourCC;
    use picroscopy_core::traits::ComponentKind;
    use picroscopy_simulation::SimFirmware;

    use super::*;

    fn encoder_output(sim: &SimFirmware) -> anyhow::Result<PortRef> {
        let encoder = sim.create_component(ComponentKind::ImageEncoder)?.handle;
        let out = PortRef::output(encoder, 0);
        let format = VideoFormat::opaque(64, 64, Rational::new(1, 1)).with_encoding(FourCC::JPEG);
        sim.commit_format(out, &format)?;
        Ok(out)
    }

    #[test]
    fn headers_are_conserved_while_streaming() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let fw: Arc<dyn Firmware> = sim.clone();
        let out = encoder_output(&sim)?;
        let pool = BufferPool::create(Arc::clone(&fw), out, 3, 1024)?;

        let (tx, rx) = unbounded::<BufferFlags>();
        let handler: BufferHandler = Arc::new(move |h: &BufferHeader| drop(tx.send(h.flags)));
        fw.enable_port(out, Some(pool.callback(Some(handler))))?;
        pool.set_port_enabled(true);
        assert_eq!(pool.prime()?, 3);
        assert_eq!(pool.counts().in_flight, 3);

        sim.emit(out, &vec![7u8; 50 * 1024])?;
        let mut chunks = 0;
        loop {
            assert_eq!(pool.counts().total(), 3);
            let flags = rx.recv_timeout(Duration::from_secs(5))?;
            chunks += 1;
            if flags.is_terminal() {
                break;
            }
        }
        assert_eq!(chunks, 50);

        pool.set_port_enabled(false);
        fw.disable_port(out)?;
        assert_eq!(
            pool.counts(),
            PoolCounts {
                free: 3,
                in_flight: 0,
                released: 0
            }
        );
        pool.destroy()?;
        Ok(())
    }

    #[test]
    fn destroy_requires_a_disabled_port() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let fw: Arc<dyn Firmware> = sim.clone();
        let out = encoder_output(&sim)?;
        let pool = BufferPool::create(Arc::clone(&fw), out, 2, 1024)?;
        fw.enable_port(out, Some(pool.callback(None)))?;
        pool.set_port_enabled(true);
        pool.prime()?;

        let err = pool.destroy().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        pool.set_port_enabled(false);
        fw.disable_port(out)?;
        pool.destroy()?;
        pool.destroy()?;
        Ok(())
    }

    #[test]
    fn acquire_never_blocks() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let out = encoder_output(&sim)?;
        let pool = BufferPool::create(sim.clone(), out, 1, 1024)?;

        let header = pool.acquire()?;
        assert_eq!(pool.counts().released, 1);
        let err = pool.acquire().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemporarilyUnavailable);

        let err = pool.submit(header).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert_eq!(pool.counts().free, 1);
        pool.destroy()?;
        Ok(())
    }

    #[test]
    fn foreign_headers_are_rejected() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let out = encoder_output(&sim)?;
        let pool = BufferPool::create(sim.clone(), out, 2, 1024)?;

        let header = pool.acquire()?;
        let other = if header.index == 0 { 1 } else { 0 };
        let err = pool.release(BufferHeader::new(other, 1024)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = pool.submit(BufferHeader::new(7, 1024)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(
            pool.counts(),
            PoolCounts {
                free: 1,
                in_flight: 0,
                released: 1
            }
        );

        pool.release(header)?;
        assert_eq!(pool.counts().free, 2);
        assert_eq!(pool.counts().total(), 2);
        pool.destroy()?;
        Ok(())
    }

    #[test]
    fn returns_after_disable_are_not_resubmitted() -> anyhow::Result<()> {
        let sim = Arc::new(SimFirmware::new()?);
        let fw: Arc<dyn Firmware> = sim.clone();
        let out = encoder_output(&sim)?;
        let pool = BufferPool::create(Arc::clone(&fw), out, 3, 1024)?;
        fw.enable_port(out, Some(pool.callback(None)))?;
        pool.set_port_enabled(true);
        pool.prime()?;

        pool.set_port_enabled(false);
        sim.emit(out, b"late frame")?;
        sim.wait_idle();
        assert_eq!(pool.counts().free, 1);
        assert_eq!(pool.counts().in_flight, 2);
        assert_eq!(sim.queued(out), 2);

        fw.disable_port(out)?;
        assert_eq!(pool.counts().free, 3);
        pool.destroy()?;
        Ok(())
    }
}
