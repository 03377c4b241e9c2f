// picroscopy/examples/capture_demo.rs
//
// Runs a preview and takes a still against the simulated firmware.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use picroscopy::prelude::*;
use picroscopy_simulation::SimFirmware;

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let fw = Arc::new(SimFirmware::new()?);
    let config = PipelineConfig::new()
        .stills_resolution(1024, 768)
        .jpeg_quality(90)
        .capture_timeout(Duration::from_secs(5));
    let pipeline = Pipeline::open(fw, config)?;

    pipeline.set_sharpness(20)?;
    pipeline.set_awb_mode(AwbMode::Sunlight)?;
    if let Err(e) = pipeline.set_brightness(120) {
        println!("rejected as expected: {}", e);
    }

    pipeline.start_preview()?;
    println!("preview running: {}", pipeline.is_previewing());

    let path = std::env::temp_dir().join("picroscopy-demo.jpg");
    let start = Instant::now();
    let bytes = pipeline.capture(&path)?;
    println!(
        "captured {} bytes to {} in {:?}",
        bytes,
        path.display(),
        start.elapsed()
    );

    #[cfg(feature = "serialize")]
    println!("{}", serde_json::to_string_pretty(&pipeline.export_state()?)?);

    pipeline.stop_preview()?;
    pipeline.close()?;
    Ok(())
}
