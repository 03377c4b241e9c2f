//! In-process camera firmware.
//!
//! [`SimFirmware`] implements [`picroscopy_core::traits::Firmware`] well
//! enough to drive a full preview and capture cycle without hardware: it
//! validates command ordering, journals every successful command, lets
//! tests inject failures, and encodes a synthetic JPEG still on capture.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

mod firmware;
mod frames;
pub mod journal;

pub use firmware::{SimConfig, SimFirmware};
pub use journal::{Command, Fault, Op};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crossbeam_channel::unbounded;
    use picroscopy_core::buffer::{BufferFlags, BufferHeader};
    use picroscopy_core::format::{Rational, VideoFormat};
    use picroscopy_core::pixel_format::FourCC;
    use picroscopy_core::status::Status;
    use picroscopy_core::traits::{ComponentKind, ConnectionFlags, Firmware, PortRef};

    use super::*;

    #[test]
    fn disable_returns_every_queued_header() -> anyhow::Result<()> {
        let fw = SimFirmware::new()?;
        let encoder = fw.create_component(ComponentKind::ImageEncoder)?.handle;
        let out = PortRef::output(encoder, 0);
        let jpeg = VideoFormat::opaque(64, 64, Rational::new(1, 1)).with_encoding(FourCC::JPEG);
        fw.commit_format(out, &jpeg)?;

        let (tx, rx) = unbounded::<BufferHeader>();
        fw.enable_port(out, Some(Arc::new(move |h: BufferHeader| drop(tx.send(h)))))?;
        for header in fw.create_pool(out, 3, 1024)? {
            fw.send_buffer(out, header).map_err(|e| e.status)?;
        }
        assert_eq!(fw.queued(out), 3);

        fw.disable_port(out)?;
        assert_eq!(rx.try_iter().count(), 3);
        assert_eq!(fw.queued(out), 0);
        Ok(())
    }

    #[test]
    fn emit_splits_across_buffers() -> anyhow::Result<()> {
        let fw = Arc::new(SimFirmware::new()?);
        let encoder = fw.create_component(ComponentKind::ImageEncoder)?.handle;
        let out = PortRef::output(encoder, 0);

        let (tx, rx) = unbounded::<(usize, BufferFlags)>();
        let resend = Arc::clone(&fw);
        fw.enable_port(
            out,
            Some(Arc::new(move |mut h: BufferHeader| {
                let _ = tx.send((h.length, h.flags));
                h.reset();
                let _ = resend.send_buffer(out, h);
            })),
        )?;
        let header = fw.create_pool(out, 1, 4)?.remove(0);
        fw.send_buffer(out, header).map_err(|e| e.status)?;

        fw.emit(out, b"0123456789")?;
        let chunks: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)))
            .collect::<Result<_, _>>()?;
        assert_eq!(chunks.iter().map(|c| c.0).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert!(chunks[0].1.contains(BufferFlags::FRAME_START));
        assert!(chunks[2].1.contains(BufferFlags::FRAME_END));

        fw.disable_port(out)?;
        Ok(())
    }

    #[test]
    fn double_connect_is_rejected() -> anyhow::Result<()> {
        let fw = SimFirmware::new()?;
        let camera = fw.create_component(ComponentKind::Camera)?.handle;
        let renderer = fw.create_component(ComponentKind::Renderer)?.handle;
        let preview = PortRef::output(camera, 0);
        fw.commit_format(preview, &VideoFormat::opaque(640, 480, Rational::new(30, 1)))?;

        fw.create_connection(preview, PortRef::input(renderer, 0), ConnectionFlags::TUNNELLING)?;
        let again =
            fw.create_connection(preview, PortRef::input(renderer, 0), ConnectionFlags::TUNNELLING);
        assert_eq!(again, Err(Status::EISCONN));
        Ok(())
    }

    #[test]
    fn destroy_with_live_connection_is_refused() -> anyhow::Result<()> {
        let fw = SimFirmware::new()?;
        let camera = fw.create_component(ComponentKind::Camera)?.handle;
        let renderer = fw.create_component(ComponentKind::Renderer)?.handle;
        let preview = PortRef::output(camera, 0);
        fw.commit_format(preview, &VideoFormat::opaque(640, 480, Rational::new(30, 1)))?;
        let link = fw.create_connection(
            preview,
            PortRef::input(renderer, 0),
            ConnectionFlags::TUNNELLING,
        )?;

        assert_eq!(fw.destroy_component(renderer), Err(Status::EISCONN));
        fw.destroy_connection(link)?;
        fw.destroy_component(renderer)?;
        assert!(matches!(fw.ops().last(), Some(Op::DestroyComponent(h)) if *h == renderer));
        Ok(())
    }

    #[test]
    fn oversized_pools_are_out_of_memory() -> anyhow::Result<()> {
        let fw = SimFirmware::with_config(SimConfig {
            max_pool_bytes: 1024,
            ..Default::default()
        })?;
        let encoder = fw.create_component(ComponentKind::ImageEncoder)?.handle;
        let out = PortRef::output(encoder, 0);
        assert_eq!(fw.create_pool(out, 2, 1024).err(), Some(Status::ENOMEM));
        Ok(())
    }

    #[test]
    fn injected_faults_fire_once() -> anyhow::Result<()> {
        let fw = SimFirmware::new()?;
        fw.inject(
            Fault::new(Command::CreateComponent, Status::ENOSPC).kind(ComponentKind::Renderer),
        );
        assert!(fw.create_component(ComponentKind::Camera).is_ok());
        assert_eq!(
            fw.create_component(ComponentKind::Renderer).err(),
            Some(Status::ENOSPC)
        );
        assert!(fw.create_component(ComponentKind::Renderer).is_ok());
        Ok(())
    }
}
