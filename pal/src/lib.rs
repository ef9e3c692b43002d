//! # RedLilium PAL
//!
//! Platform abstraction layer for GPU vertex and index geometry.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`AttributeBuffer`] - Resizable element stream with dirty tracking and partial uploads
//! - [`VertexArray`] - Attribute buffers plus an optional index buffer, drawn as one batch
//! - [`HandleTable`] - Generational slot map behind the opaque handles
//! - [`GraphicsInterface`] - Handle-keyed facade over the backend selected at startup
//! - [`GpuBackend`] - Trait for backend implementations: wgpu and Dummy (for testing)
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_pal::{GraphicsInterface, InstanceParameters, PrimitiveTopology};
//!
//! let mut gi = GraphicsInterface::new(&InstanceParameters::from_env())?;
//! let positions = gi.create_attribute_buffer(AttributeBufferDescriptor::new(12, 4))?;
//! gi.set_elements(positions, Some(bytemuck::cast_slice(&vertices)), 4, true)?;
//! let vao = gi.create_vertex_array(PrimitiveTopology::TriangleList)?;
//! gi.specify_vertex_attribute(vao, positions, VertexAttribute::float(0, 0, 3))?;
//! gi.draw(vao, 0, 0)?;
//! ```

pub mod backend;
pub mod error;
pub mod handle;
pub mod instance;
pub mod interface;
pub mod resources;
pub mod types;

// Re-export main types for convenience
pub use backend::{DummyBackend, DummyStats, GpuBackend, GpuBuffer, GpuVertexArray};
pub use error::GraphicsError;
pub use handle::{BufferHandle, Handle, HandleTable, VertexArrayHandle};
pub use instance::{BackendType, InstanceParameters, WgpuBackendType};
pub use interface::{GraphicsInterface, global};
pub use resources::{AttributeBuffer, CommitState, VertexArray};
pub use types::{
    AttributeBinding, AttributeBufferDescriptor, BufferIntent, BufferMode, BufferStorage,
    BufferUsage, DrawCall, IndexFormat, PrimitiveTopology, VertexAttribute, VertexDataType,
};

#[cfg(feature = "wgpu-backend")]
pub use backend::wgpu_backend::WgpuBackend;

/// PAL library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the PAL.
///
/// This should be called before creating a [`GraphicsInterface`].
pub fn init() {
    log::info!("RedLilium PAL v{} initialized", VERSION);
}
