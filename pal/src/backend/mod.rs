//! GPU backend abstraction layer.
//!
//! This module provides a trait-based abstraction for GPU backends, allowing
//! attribute buffers and vertex arrays to work with different GPU APIs
//! behind one call surface.
//!
//! # Available Backends
//!
//! - `dummy` (default): No-GPU backend for testing and development. Keeps
//!   committed bytes in memory and counts every call.
//! - `wgpu-backend`: Cross-platform backend using wgpu (Vulkan, Metal,
//!   DX12, GL ES, WebGPU).
//!
//! # Architecture
//!
//! Each backend implements the [`GpuBackend`] trait, which provides:
//! - Native buffer allocation, uploads, copies and readback
//! - Vertex array objects (native or emulated)
//! - Attribute and index buffer binding
//! - Indexed and non-indexed draws

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub mod dummy;

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::instance::{BackendType, InstanceParameters};
use crate::types::{AttributeBinding, DrawCall, IndexFormat, NativeBufferDescriptor};

pub use dummy::{DummyBackend, DummyStats};

/// Handle to a native GPU buffer.
#[derive(Clone)]
pub enum GpuBuffer {
    /// Dummy backend buffer (host memory)
    Dummy(Arc<dummy::DummyBuffer>),
    /// wgpu backend buffer
    #[cfg(feature = "wgpu-backend")]
    Wgpu { buffer: Arc<wgpu::Buffer>, size: u64 },
}

impl GpuBuffer {
    /// Allocated size in bytes.
    pub fn size(&self) -> u64 {
        match self {
            Self::Dummy(buffer) => buffer.size(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu { size, .. } => *size,
        }
    }
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(buffer) => f
                .debug_struct("GpuBuffer::Dummy")
                .field("id", &buffer.id())
                .field("size", &buffer.size())
                .finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu { buffer, size } => f
                .debug_struct("GpuBuffer::Wgpu")
                .field("buffer", buffer)
                .field("size", size)
                .finish(),
        }
    }
}

/// Handle to a native (or emulated) vertex array object.
#[derive(Clone)]
pub enum GpuVertexArray {
    /// Dummy backend vertex array
    Dummy(Arc<dummy::DummyVertexArray>),
    /// wgpu has no vertex array objects; bindings are recorded and replayed
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu_backend::EmulatedVertexArray>),
}

impl std::fmt::Debug for GpuVertexArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(vao) => f
                .debug_tuple("GpuVertexArray::Dummy")
                .field(&vao.id())
                .finish(),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(_) => write!(f, "GpuVertexArray::Wgpu"),
        }
    }
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// Binding calls are stateful: attribute and index bindings apply to the
/// vertex array bound last, or to loose per-draw state when none is bound.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Required alignment in bytes for upload offsets and sizes.
    fn upload_alignment(&self) -> u64 {
        1
    }

    /// Whether the backend retains attribute bindings in vertex array objects.
    fn supports_vertex_arrays(&self) -> bool;

    /// Allocate a native buffer.
    fn create_buffer(
        &self,
        descriptor: &NativeBufferDescriptor,
    ) -> Result<GpuBuffer, GraphicsError>;

    /// Upload `data` into `buffer` at `offset`.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Copy the first `size` bytes of `source` into `destination`.
    fn copy_buffer(
        &self,
        source: &GpuBuffer,
        destination: &GpuBuffer,
        size: u64,
    ) -> Result<(), GraphicsError>;

    /// Read data back from a buffer.
    ///
    /// This is a blocking operation that waits for the GPU to finish.
    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8>;

    /// Create a vertex array object, or `None` if the backend has no such
    /// concept.
    fn create_vertex_array(&self) -> Result<Option<GpuVertexArray>, GraphicsError>;

    /// Bind a vertex array object, or unbind with `None`.
    ///
    /// Unbinding also drops loose attribute and index bindings.
    fn bind_vertex_array(&self, vertex_array: Option<&GpuVertexArray>);

    /// Point an attribute location at `buffer`.
    fn bind_attribute(&self, buffer: &GpuBuffer, binding: &AttributeBinding);

    /// Bind the index buffer used by indexed draws.
    fn bind_index_buffer(&self, buffer: &GpuBuffer, format: IndexFormat);

    /// Drop every attribute and index binding of the bound vertex array, or
    /// of the loose state when none is bound.
    fn clear_bindings(&self);

    /// Issue a draw with the current bindings.
    fn draw(&self, call: &DrawCall) -> Result<(), GraphicsError>;
}

/// Selects and creates the backend requested by `params`.
///
/// [`BackendType::Auto`] prefers a real GPU and falls back to the dummy
/// backend. Explicitly requested backends do not fall back.
pub fn create_backend(params: &InstanceParameters) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    match params.backend {
        BackendType::Dummy => create_dummy_backend(),
        BackendType::Wgpu => create_wgpu_backend(params),
        BackendType::Auto => match create_wgpu_backend(params) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                log::warn!("Failed to create wgpu backend: {}", e);
                create_dummy_backend()
            }
        },
    }
}

#[cfg(feature = "wgpu-backend")]
fn create_wgpu_backend(params: &InstanceParameters) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    let backend = wgpu_backend::WgpuBackend::with_params(params)?;
    log::info!("Using wgpu backend");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "wgpu-backend"))]
fn create_wgpu_backend(_params: &InstanceParameters) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    Err(GraphicsError::InitializationFailed(
        "wgpu backend not compiled in (enable the `wgpu-backend` feature)".to_string(),
    ))
}

#[cfg(feature = "dummy")]
fn create_dummy_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    log::info!("Using dummy backend");
    Ok(Arc::new(DummyBackend::new()))
}

#[cfg(not(feature = "dummy"))]
fn create_dummy_backend() -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    Err(GraphicsError::InitializationFailed(
        "no graphics backend available".to_string(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "wgpu-backend")
}
