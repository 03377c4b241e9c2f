//! Camera pipeline lifecycle manager.
//!
//! [`Pipeline`] drives the firmware's camera, preview renderer and JPEG
//! encoder through any [`Firmware`](picroscopy_core::traits::Firmware)
//! implementation.

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod component;
pub mod components;
pub mod connection;
mod graph;
pub mod pipeline;
pub mod pool;
pub mod port;
mod teardown;

pub use pipeline::Pipeline;

/// Common imports: `use picroscopy::prelude::*;`
pub mod prelude {
    pub use crate::pipeline::Pipeline;
    pub use picroscopy_core::prelude::*;
}
