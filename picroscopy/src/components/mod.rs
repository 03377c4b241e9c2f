//! Builders for the three firmware components the pipeline uses.
//!
//! Each builder hands [`Component::create`](crate::component::Component::create)
//! the configuration sequence for its kind, so a failure anywhere in that
//! sequence leaves nothing behind.

mod camera;
mod encoder;
mod renderer;

pub use camera::{camera, camera_config, PREVIEW_PORT, STILL_PORT, VIDEO_PORT};
pub use encoder::encoder;
pub use renderer::renderer;
