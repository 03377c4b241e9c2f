use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use picroscopy::prelude::*;
use picroscopy_core::params::ParamTag;
use picroscopy_core::traits::ComponentHandle;
use picroscopy_simulation::{Command, Fault, Op, SimFirmware};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("picroscopy-{}-{}.jpg", name, std::process::id()))
}

fn open(sim: &Arc<SimFirmware>) -> anyhow::Result<Pipeline> {
    init_logging();
    Ok(Pipeline::open(sim.clone(), PipelineConfig::default())?)
}

fn handle_of(sim: &SimFirmware, kind: ComponentKind) -> Option<ComponentHandle> {
    sim.live_components()
        .into_iter()
        .find(|(_, k)| *k == kind)
        .map(|(h, _)| h)
}

fn kinds(sim: &SimFirmware) -> Vec<ComponentKind> {
    sim.live_components().into_iter().map(|(_, k)| k).collect()
}

#[test]
fn preview_capture_close() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    pipeline.start_preview()?;
    assert!(pipeline.is_previewing());

    let path = scratch("end-to-end");
    let written = pipeline.capture(&path)?;
    assert_eq!(sim.captures(), 1);
    assert_eq!(fs::metadata(&path)?.len(), written);
    let still = image::load_from_memory(&fs::read(&path)?)?;
    assert_eq!((still.width(), still.height()), sim.config().frame_size);
    fs::remove_file(&path)?;

    assert!(pipeline.is_previewing());
    assert_eq!(kinds(&sim), vec![ComponentKind::Camera, ComponentKind::Renderer]);

    pipeline.stop_preview()?;
    pipeline.stop_preview()?;
    assert_eq!(kinds(&sim), vec![ComponentKind::Camera]);

    pipeline.close()?;
    pipeline.close()?;
    assert!(!pipeline.is_open());
    assert!(sim.live_components().is_empty());
    assert_eq!(sim.live_connections(), 0);
    Ok(())
}

#[test]
fn out_of_range_values_leave_the_cache_alone() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    sim.clear_ops();

    let err = pipeline.set_sharpness(150).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(pipeline.sharpness(), 0);

    assert!(pipeline.set_brightness(101).unwrap_err().is_validation());
    assert!(pipeline.set_saturation(-101).unwrap_err().is_validation());
    assert!(pipeline.set_rotation(45).unwrap_err().is_validation());
    assert!(pipeline
        .set_crop(Crop::new(0.0, 0.0, 1.5, 1.0))
        .unwrap_err()
        .is_validation());
    assert_eq!(pipeline.brightness(), 50);
    assert_eq!(pipeline.crop(), Crop::FULL);

    assert!(sim.ops().is_empty(), "validation must not reach the firmware");
    Ok(())
}

#[test]
fn settings_round_trip_through_firmware() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;

    assert_eq!(pipeline.query(SettingName::Brightness)?, Setting::Brightness(50));

    pipeline.set_contrast(-40)?;
    pipeline.set_awb_mode(AwbMode::Tungsten)?;
    pipeline.set_image_effect(ImageEffect::Sketch)?;
    pipeline.set_color_effects(Some((128, 90)))?;
    pipeline.set_crop(Crop::new(0.25, 0.25, 0.5, 0.5))?;
    assert_eq!(pipeline.query(SettingName::Contrast)?, Setting::Contrast(-40));
    assert_eq!(pipeline.query(SettingName::AwbMode)?, Setting::AwbMode(AwbMode::Tungsten));
    assert_eq!(
        pipeline.query(SettingName::ImageEffect)?,
        Setting::ImageEffect(ImageEffect::Sketch)
    );
    assert_eq!(
        pipeline.query(SettingName::ColorEffects)?,
        Setting::ColorEffects(Some((128, 90)))
    );
    assert_eq!(pipeline.get(SettingName::Contrast), Setting::Contrast(-40));

    pipeline.set_rotation(-90)?;
    assert_eq!(pipeline.rotation(), 270);
    assert_eq!(pipeline.query(SettingName::Rotation)?, Setting::Rotation(270));
    Ok(())
}

#[test]
fn flips_reach_every_camera_output() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    let camera = handle_of(&sim, ComponentKind::Camera).expect("camera");

    pipeline.set_hflip(true)?;
    pipeline.set_vflip(true)?;
    pipeline.set_vflip(false)?;
    assert!(pipeline.hflip());
    assert!(!pipeline.vflip());
    for index in 0..3 {
        assert_eq!(
            sim.mirror(PortRef::output(camera, index)),
            Some(Mirror {
                hflip: true,
                vflip: false
            })
        );
    }
    Ok(())
}

#[test]
fn rotation_is_all_or_nothing() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    let camera = handle_of(&sim, ComponentKind::Camera).expect("camera");

    // The preview port accepts the new value, the video port refuses it.
    sim.inject(
        Fault::new(Command::SetParameter, Status::EINVAL)
            .tag(ParamTag::Rotation)
            .skip(1),
    );
    let err = pipeline.set_rotation(90).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(pipeline.rotation(), 0);
    for index in 0..3 {
        let stored = sim
            .parameter(PortRef::output(camera, index), ParamTag::Rotation)
            .expect("rotation written at open");
        assert_eq!(Setting::decode(SettingName::Rotation, &stored)?, Setting::Rotation(0));
    }
    Ok(())
}

#[test]
fn exposure_mode_applies_with_fixed_iso() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    pipeline.set_iso(400)?;
    pipeline.set_exposure_mode(ExposureMode::Night)?;
    assert_eq!(pipeline.exposure_mode(), ExposureMode::Night);
    assert_eq!(
        pipeline.query(SettingName::ExposureMode)?,
        Setting::ExposureMode(ExposureMode::Night)
    );
    Ok(())
}

#[test]
fn close_destroys_connections_before_components() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    pipeline.start_preview()?;
    let camera = handle_of(&sim, ComponentKind::Camera).expect("camera");
    let renderer = handle_of(&sim, ComponentKind::Renderer).expect("renderer");

    sim.clear_ops();
    pipeline.close()?;
    let teardown: Vec<Op> = sim
        .ops()
        .into_iter()
        .filter(|op| {
            matches!(
                op,
                Op::DisableConnection(_) | Op::DestroyConnection(_) | Op::DestroyComponent(_)
            )
        })
        .collect();
    assert!(matches!(teardown[0], Op::DisableConnection(_)));
    assert!(matches!(teardown[1], Op::DestroyConnection(_)));
    assert_eq!(
        &teardown[2..],
        &[Op::DestroyComponent(renderer), Op::DestroyComponent(camera)]
    );
    Ok(())
}

#[test]
fn failed_open_leaves_nothing_behind() -> anyhow::Result<()> {
    init_logging();
    let sim = Arc::new(SimFirmware::new()?);

    sim.inject(Fault::new(Command::EnableComponent, Status::ENOSPC).kind(ComponentKind::Camera));
    let err = Pipeline::open(sim.clone(), PipelineConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfResources);
    assert!(sim.live_components().is_empty());

    sim.inject(Fault::new(Command::SetParameter, Status::ENOSYS).tag(ParamTag::Saturation));
    let err = Pipeline::open(sim.clone(), PipelineConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert!(sim.live_components().is_empty());

    let err = Pipeline::open(sim.clone(), PipelineConfig::new().jpeg_quality(0)).unwrap_err();
    assert!(err.is_validation());
    Ok(())
}

#[test]
fn failed_preview_is_unwound() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;

    sim.inject(Fault::new(Command::SetParameter, Status::EINVAL).tag(ParamTag::DisplayRegion));
    assert!(pipeline.start_preview().is_err());
    assert!(!pipeline.is_previewing());
    assert_eq!(kinds(&sim), vec![ComponentKind::Camera]);

    sim.inject(Fault::new(Command::EnableConnection, Status::ENOTREADY));
    assert_eq!(pipeline.start_preview().unwrap_err().kind(), ErrorKind::NotReady);
    assert_eq!(kinds(&sim), vec![ComponentKind::Camera]);
    assert_eq!(sim.live_connections(), 0);

    pipeline.start_preview()?;
    let err = pipeline.start_preview().unwrap_err();
    assert!(err.is_runtime());
    assert_eq!(err.kind(), ErrorKind::AlreadyConnected);
    assert_eq!(err.to_string(), "Preview is already running");
    Ok(())
}

#[test]
fn capture_timeout_resumes_preview() -> anyhow::Result<()> {
    init_logging();
    let sim = Arc::new(SimFirmware::new()?);
    let config = PipelineConfig::new().capture_timeout(Duration::from_millis(200));
    let pipeline = Pipeline::open(sim.clone(), config)?;
    pipeline.start_preview()?;

    sim.stall_next_capture();
    let path = scratch("timeout");
    let err = pipeline.capture(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotReady);
    assert!(!path.exists());

    assert!(pipeline.is_previewing());
    assert_eq!(kinds(&sim), vec![ComponentKind::Camera, ComponentKind::Renderer]);
    assert_eq!(sim.live_connections(), 1);

    let mut still = Vec::new();
    let written = pipeline.capture_to(&mut still)?;
    assert_eq!(written, still.len() as u64);
    assert_eq!(&still[..2], &[0xFF, 0xD8]);
    Ok(())
}

#[test]
fn corrupt_capture_is_an_io_error() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;

    sim.corrupt_next_capture();
    let path = scratch("corrupt");
    let err = pipeline.capture(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoError);
    assert!(!path.exists());
    assert_eq!(kinds(&sim), vec![ComponentKind::Camera]);
    assert!(!pipeline.is_previewing());
    Ok(())
}

#[test]
fn capture_after_close_is_refused() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    pipeline.close()?;

    let path = scratch("closed");
    let err = pipeline.capture(&path).unwrap_err();
    assert!(err.is_runtime());
    assert!(!path.exists());
    assert!(pipeline.start_preview().unwrap_err().is_runtime());
    assert!(pipeline.set_sharpness(10).unwrap_err().is_runtime());
    Ok(())
}

#[test]
fn stills_resolution_resizes_the_capture() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    assert_eq!(pipeline.stills_resolution()?, (2592, 1944));
    assert_eq!(pipeline.preview_resolution()?, (1920, 1080));

    pipeline.set_stills_resolution((1024, 768))?;
    pipeline.set_preview_resolution((640, 480))?;
    assert_eq!(pipeline.stills_resolution()?, (1024, 768));
    assert_eq!(pipeline.preview_resolution()?, (640, 480));
    assert!(pipeline.set_stills_resolution((0, 768)).unwrap_err().is_validation());
    assert!(pipeline.set_preview_resolution((8192, 480)).unwrap_err().is_validation());

    let mut still = Vec::new();
    pipeline.capture_to(&mut still)?;
    assert!(!still.is_empty());
    Ok(())
}

#[test]
fn dropping_the_pipeline_closes_it() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    {
        let pipeline = open(&sim)?;
        pipeline.start_preview()?;
    }
    assert!(sim.live_components().is_empty());
    assert_eq!(sim.live_connections(), 0);
    Ok(())
}

#[test]
fn pipeline_is_shared_across_threads() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    std::thread::scope(|s| {
        s.spawn(|| pipeline.set_sharpness(25));
        s.spawn(|| pipeline.capture_to(&mut Vec::<u8>::new()).map(|_| ()));
    });
    assert_eq!(pipeline.sharpness(), 25);
    assert_eq!(sim.captures(), 1);
    Ok(())
}

#[cfg(feature = "serialize")]
#[test]
fn state_exports_as_json() -> anyhow::Result<()> {
    let sim = Arc::new(SimFirmware::new()?);
    let pipeline = open(&sim)?;
    pipeline.set_sharpness(-30)?;
    let state = pipeline.export_state()?;
    assert_eq!(state["settings"]["sharpness"], -30);
    assert_eq!(state["config"]["jpeg_quality"], 95);
    assert_eq!(state["previewing"], false);
    Ok(())
}
