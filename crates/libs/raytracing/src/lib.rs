//! Hybrid raster / ray traced renderer core.
//!
//! Acceleration structures, the raytracing pipeline, the shader binding table and the
//! descriptor heap are built here against the [`Device`] trait. A backend provides the
//! actual GPU objects.

pub use log;
pub use nalgebra;

mod acceleration_structure;
mod allocator;
mod config;
mod descriptor_heap;
mod device;
mod error;
mod frame;
mod pipeline;
mod programs;
mod raster;
mod render_mode;
mod scene;
mod shader_binding_table;
mod sync;
mod types;

#[cfg(test)]
mod mock;

pub use acceleration_structure::*;
pub use allocator::*;
pub use config::*;
pub use descriptor_heap::*;
pub use device::*;
pub use error::*;
pub use frame::*;
pub use pipeline::*;
pub use programs::*;
pub use raster::*;
pub use render_mode::*;
pub use scene::*;
pub use shader_binding_table::*;
pub use sync::*;
pub use types::*;
