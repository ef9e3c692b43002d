//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't touch a GPU but provides a complete implementation
//! of [`GpuBackend`]: native buffers are host byte vectors, vertex array
//! objects record their bindings, and every call is counted in
//! [`DummyStats`] so tests can assert exactly what reached the "driver".

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{
    AttributeBinding, BufferMode, BufferUsage, DrawCall, IndexFormat, NativeBufferDescriptor,
};

use super::{GpuBackend, GpuBuffer, GpuVertexArray};

/// Host-memory stand-in for a native buffer.
pub struct DummyBuffer {
    id: u64,
    usage: BufferUsage,
    mode: BufferMode,
    contents: Mutex<Vec<u8>>,
}

impl DummyBuffer {
    /// Backend-unique buffer id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Allocated size in bytes.
    pub fn size(&self) -> u64 {
        self.contents.lock().len() as u64
    }

    /// Usage flags the buffer was created with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Allocation hint the buffer was created with.
    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Copy of the buffer contents.
    pub fn contents(&self) -> Vec<u8> {
        self.contents.lock().clone()
    }
}

/// Attribute and index bindings as seen by a draw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingState {
    /// Attribute location → (buffer id, binding).
    pub attributes: BTreeMap<u32, (u64, AttributeBinding)>,
    /// Index buffer id and format.
    pub index: Option<(u64, IndexFormat)>,
}

/// Recorded vertex array object.
pub struct DummyVertexArray {
    id: u64,
    state: Mutex<BindingState>,
}

impl DummyVertexArray {
    /// Backend-unique vertex array id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bindings currently recorded in this vertex array.
    pub fn bindings(&self) -> BindingState {
        self.state.lock().clone()
    }
}

/// Call counters of a [`DummyBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    /// Native buffers allocated.
    pub buffers_created: u64,
    /// Upload calls.
    pub buffer_writes: u64,
    /// Bytes uploaded.
    pub bytes_written: u64,
    /// Buffer-to-buffer copies.
    pub buffer_copies: u64,
    /// Vertex array objects created.
    pub vertex_arrays_created: u64,
    /// Vertex array binds (not counting unbinds).
    pub vertex_array_binds: u64,
    /// Attribute pointer binds.
    pub attribute_binds: u64,
    /// Index buffer binds.
    pub index_buffer_binds: u64,
    /// Draw calls.
    pub draws: u64,
}

/// A draw as it reached the dummy backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedDraw {
    /// The draw parameters.
    pub call: DrawCall,
    /// Bindings in effect for the draw.
    pub bindings: BindingState,
}

/// Dummy GPU backend.
pub struct DummyBackend {
    vertex_arrays: bool,
    allocation_limit: Option<u64>,
    next_id: AtomicU64,
    stats: Mutex<DummyStats>,
    bound: Mutex<Option<Arc<DummyVertexArray>>>,
    loose: Mutex<BindingState>,
    draws: Mutex<Vec<RecordedDraw>>,
}

impl DummyBackend {
    /// Create a new dummy backend with vertex array object support.
    pub fn new() -> Self {
        Self {
            vertex_arrays: true,
            allocation_limit: None,
            next_id: AtomicU64::new(1),
            stats: Mutex::new(DummyStats::default()),
            bound: Mutex::new(None),
            loose: Mutex::new(BindingState::default()),
            draws: Mutex::new(Vec::new()),
        }
    }

    /// Behave like a backend without vertex array objects.
    pub fn without_vertex_arrays(mut self) -> Self {
        self.vertex_arrays = false;
        self
    }

    /// Fail every allocation larger than `bytes`, simulating memory exhaustion.
    pub fn with_allocation_limit(mut self, bytes: u64) -> Self {
        self.allocation_limit = Some(bytes);
        self
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> DummyStats {
        *self.stats.lock()
    }

    /// Reset the call counters and forget recorded draws.
    pub fn reset_stats(&self) {
        *self.stats.lock() = DummyStats::default();
        self.draws.lock().clear();
    }

    /// Draws issued so far.
    pub fn draws(&self) -> Vec<RecordedDraw> {
        self.draws.lock().clone()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn dummy_buffer(buffer: &GpuBuffer) -> Result<&Arc<DummyBuffer>, GraphicsError> {
        match buffer {
            GpuBuffer::Dummy(buffer) => Ok(buffer),
            #[cfg(feature = "wgpu-backend")]
            GpuBuffer::Wgpu { .. } => Err(GraphicsError::Internal(
                "DummyBackend used with a non-dummy buffer".to_string(),
            )),
        }
    }

    fn buffer_id(buffer: &GpuBuffer) -> u64 {
        match buffer {
            GpuBuffer::Dummy(buffer) => buffer.id,
            #[cfg(feature = "wgpu-backend")]
            GpuBuffer::Wgpu { .. } => 0,
        }
    }

    fn with_current_state<R>(&self, f: impl FnOnce(&mut BindingState) -> R) -> R {
        let bound = self.bound.lock();
        match bound.as_ref() {
            Some(vao) => f(&mut vao.state.lock()),
            None => f(&mut self.loose.lock()),
        }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("vertex_arrays", &self.vertex_arrays)
            .field("stats", &self.stats())
            .finish()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn supports_vertex_arrays(&self) -> bool {
        self.vertex_arrays
    }

    fn create_buffer(
        &self,
        descriptor: &NativeBufferDescriptor,
    ) -> Result<GpuBuffer, GraphicsError> {
        if let Some(limit) = self.allocation_limit
            && descriptor.size > limit
        {
            return Err(GraphicsError::AllocationFailed {
                requested: descriptor.size,
            });
        }

        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {}, hint: {})",
            descriptor.label,
            descriptor.size,
            descriptor.mode.usage_hint()
        );
        self.stats.lock().buffers_created += 1;
        Ok(GpuBuffer::Dummy(Arc::new(DummyBuffer {
            id: self.next_id(),
            usage: descriptor.usage,
            mode: descriptor.mode,
            contents: Mutex::new(vec![0u8; descriptor.size as usize]),
        })))
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let buffer = Self::dummy_buffer(buffer)?;
        let mut contents = buffer.contents.lock();
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} overflows buffer of {} bytes",
                data.len(),
                offset,
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);

        log::trace!(
            "DummyBackend: write_buffer id={} offset={} len={}",
            buffer.id,
            offset,
            data.len()
        );
        let mut stats = self.stats.lock();
        stats.buffer_writes += 1;
        stats.bytes_written += data.len() as u64;
        Ok(())
    }

    fn copy_buffer(
        &self,
        source: &GpuBuffer,
        destination: &GpuBuffer,
        size: u64,
    ) -> Result<(), GraphicsError> {
        let source = Self::dummy_buffer(source)?;
        let destination = Self::dummy_buffer(destination)?;
        let bytes = source.contents.lock()[..size as usize].to_vec();
        destination.contents.lock()[..size as usize].copy_from_slice(&bytes);

        log::trace!(
            "DummyBackend: copy_buffer {} -> {} size={}",
            source.id,
            destination.id,
            size
        );
        self.stats.lock().buffer_copies += 1;
        Ok(())
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        log::trace!("DummyBackend: read_buffer offset={} size={}", offset, size);
        match Self::dummy_buffer(buffer) {
            Ok(buffer) => {
                let contents = buffer.contents.lock();
                let start = (offset as usize).min(contents.len());
                let end = (start + size as usize).min(contents.len());
                contents[start..end].to_vec()
            }
            Err(_) => vec![0u8; size as usize],
        }
    }

    fn create_vertex_array(&self) -> Result<Option<GpuVertexArray>, GraphicsError> {
        if !self.vertex_arrays {
            return Ok(None);
        }
        self.stats.lock().vertex_arrays_created += 1;
        Ok(Some(GpuVertexArray::Dummy(Arc::new(DummyVertexArray {
            id: self.next_id(),
            state: Mutex::new(BindingState::default()),
        }))))
    }

    fn bind_vertex_array(&self, vertex_array: Option<&GpuVertexArray>) {
        let mut bound = self.bound.lock();
        match vertex_array {
            Some(GpuVertexArray::Dummy(vao)) => {
                self.stats.lock().vertex_array_binds += 1;
                *bound = Some(vao.clone());
            }
            #[cfg(feature = "wgpu-backend")]
            Some(GpuVertexArray::Wgpu(_)) => {
                log::warn!("DummyBackend: ignoring bind of a wgpu vertex array");
            }
            None => {
                *bound = None;
                *self.loose.lock() = BindingState::default();
            }
        }
    }

    fn bind_attribute(&self, buffer: &GpuBuffer, binding: &AttributeBinding) {
        let id = Self::buffer_id(buffer);
        self.with_current_state(|state| {
            state
                .attributes
                .insert(binding.attribute.index, (id, *binding));
        });
        self.stats.lock().attribute_binds += 1;
    }

    fn bind_index_buffer(&self, buffer: &GpuBuffer, format: IndexFormat) {
        let id = Self::buffer_id(buffer);
        self.with_current_state(|state| state.index = Some((id, format)));
        self.stats.lock().index_buffer_binds += 1;
    }

    fn clear_bindings(&self) {
        log::trace!("DummyBackend: clear_bindings");
        self.with_current_state(|state| *state = BindingState::default());
    }

    fn draw(&self, call: &DrawCall) -> Result<(), GraphicsError> {
        let bindings = self.with_current_state(|state| state.clone());
        if call.is_indexed() && bindings.index.is_none() {
            return Err(GraphicsError::InvalidParameter(
                "indexed draw without an index buffer".to_string(),
            ));
        }

        log::trace!(
            "DummyBackend: draw {:?} range={:?} indexed={}",
            call.topology,
            call.range(),
            call.is_indexed()
        );
        self.stats.lock().draws += 1;
        self.draws.lock().push(RecordedDraw {
            call: *call,
            bindings,
        });
        Ok(())
    }
}
