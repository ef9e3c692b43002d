//! Handle-based graphics interface.
//!
//! The [`GraphicsInterface`] is the entry point for rendering code. It owns
//! the backend selected at startup plus one [`HandleTable`] per resource
//! kind, and mirrors every [`AttributeBuffer`] and [`VertexArray`] operation
//! keyed by handle.

use std::sync::Arc;

use crate::backend::{self, GpuBackend};
use crate::error::GraphicsError;
use crate::handle::{BufferHandle, HandleTable, VertexArrayHandle};
use crate::instance::InstanceParameters;
use crate::resources::{AttributeBuffer, VertexArray};
use crate::types::{
    AttributeBufferDescriptor, BufferIntent, BufferMode, BufferStorage, PrimitiveTopology,
    VertexAttribute,
};

/// Backend-agnostic, handle-keyed access to buffers and vertex arrays.
///
/// Stale or unknown handles are reported as
/// [`GraphicsError::InvalidHandle`]. Contract violations inside the
/// resolved object still panic.
///
/// # Example
///
/// ```ignore
/// let mut gi = GraphicsInterface::new(&InstanceParameters::from_env())?;
/// let positions = gi.create_attribute_buffer(AttributeBufferDescriptor::new(12, 4))?;
/// gi.set_elements(positions, Some(bytes), 4, true)?;
/// let vao = gi.create_vertex_array(PrimitiveTopology::TriangleList)?;
/// gi.specify_vertex_attribute(vao, positions, VertexAttribute::float(0, 0, 3))?;
/// gi.draw(vao, 0, 0)?;
/// gi.shutdown();
/// ```
pub struct GraphicsInterface {
    backend: Arc<dyn GpuBackend>,
    params: InstanceParameters,
    buffers: HandleTable<Arc<AttributeBuffer>>,
    vertex_arrays: HandleTable<Arc<VertexArray>>,
}

impl GraphicsInterface {
    /// Create the interface with the backend selected by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InitializationFailed`] if the requested
    /// backend is unavailable.
    pub fn new(params: &InstanceParameters) -> Result<Self, GraphicsError> {
        log::info!("Creating GraphicsInterface ({:?})", params.backend);
        let backend = backend::create_backend(params)?;
        Ok(Self::with_backend(backend, params))
    }

    /// Create the interface around an existing backend.
    pub fn with_backend(backend: Arc<dyn GpuBackend>, params: &InstanceParameters) -> Self {
        log::info!("Using GPU backend: {}", backend.name());
        Self {
            backend,
            params: params.clone(),
            buffers: HandleTable::with_capacity(params.handle_table_capacity),
            vertex_arrays: HandleTable::with_capacity(params.handle_table_capacity),
        }
    }

    /// Get the GPU backend.
    pub fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// Get the parameters the interface was created with.
    pub fn params(&self) -> &InstanceParameters {
        &self.params
    }

    /// Number of live attribute buffers.
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of live vertex arrays.
    pub fn live_vertex_array_count(&self) -> usize {
        self.vertex_arrays.len()
    }

    // === Attribute buffers ===

    /// Create an attribute buffer.
    pub fn create_attribute_buffer(
        &mut self,
        descriptor: AttributeBufferDescriptor,
    ) -> Result<BufferHandle, GraphicsError> {
        let buffer = AttributeBuffer::new(self.backend.clone(), descriptor)?;
        Ok(self.buffers.allocate(buffer).into())
    }

    /// Create an attribute buffer from its individual parameters.
    pub fn create_buffer(
        &mut self,
        element_size: u32,
        capacity: u32,
        mode: BufferMode,
        intent: BufferIntent,
        storage: BufferStorage,
        zero: bool,
    ) -> Result<BufferHandle, GraphicsError> {
        let mut descriptor = AttributeBufferDescriptor::new(element_size, capacity)
            .with_mode(mode)
            .with_intent(intent)
            .with_storage(storage);
        descriptor.zero = zero;
        self.create_attribute_buffer(descriptor)
    }

    /// Destroy an attribute buffer.
    ///
    /// Vertex arrays still referencing the buffer keep it alive until they
    /// release it; its storage is released right away otherwise.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<(), GraphicsError> {
        self.buffer(handle)?;
        let Some(buffer) = self.buffers.free(handle.raw()) else {
            return Err(GraphicsError::InvalidHandle(handle.raw()));
        };
        if Arc::strong_count(&buffer) == 1 {
            buffer.destroy();
        } else {
            log::debug!(
                "GraphicsInterface: {:?} still referenced by vertex arrays",
                handle
            );
        }
        Ok(())
    }

    /// Resolve a buffer handle.
    pub fn buffer(&self, handle: BufferHandle) -> Result<&Arc<AttributeBuffer>, GraphicsError> {
        self.buffers
            .get(handle.raw())
            .ok_or(GraphicsError::InvalidHandle(handle.raw()))
    }

    /// See [`AttributeBuffer::set_elements`].
    pub fn set_elements(
        &self,
        handle: BufferHandle,
        data: Option<&[u8]>,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        self.buffer(handle)?.set_elements(data, count, defer)
    }

    /// See [`AttributeBuffer::update_elements`].
    pub fn update_elements(
        &self,
        handle: BufferHandle,
        data: Option<&[u8]>,
        start: u32,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        self.buffer(handle)?.update_elements(data, start, count, defer)
    }

    /// See [`AttributeBuffer::insert_elements`].
    pub fn insert_elements(
        &self,
        handle: BufferHandle,
        data: Option<&[u8]>,
        start: u32,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        self.buffer(handle)?.insert_elements(data, start, count, defer)
    }

    /// See [`AttributeBuffer::append_elements`].
    pub fn append_elements(
        &self,
        handle: BufferHandle,
        data: Option<&[u8]>,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        self.buffer(handle)?.append_elements(data, count, defer)
    }

    /// See [`AttributeBuffer::remove_elements`].
    pub fn remove_elements(
        &self,
        handle: BufferHandle,
        start: u32,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        self.buffer(handle)?.remove_elements(start, count, defer)
    }

    /// See [`AttributeBuffer::swap_elements`].
    pub fn swap_elements(
        &self,
        handle: BufferHandle,
        source: u32,
        dest: u32,
        count: u32,
    ) -> Result<(), GraphicsError> {
        self.buffer(handle)?.swap_elements(source, dest, count);
        Ok(())
    }

    /// See [`AttributeBuffer::move_elements`].
    pub fn move_elements(
        &self,
        handle: BufferHandle,
        source: u32,
        dest: u32,
        count: u32,
    ) -> Result<(), GraphicsError> {
        self.buffer(handle)?.move_elements(source, dest, count)
    }

    /// See [`AttributeBuffer::add_capacity`].
    pub fn add_capacity(&self, handle: BufferHandle, count: u32, zero: bool) -> Result<(), GraphicsError> {
        self.buffer(handle)?.add_capacity(count, zero)
    }

    /// See [`AttributeBuffer::set_capacity`].
    pub fn set_capacity(
        &self,
        handle: BufferHandle,
        capacity: u32,
        zero: bool,
    ) -> Result<(), GraphicsError> {
        self.buffer(handle)?.set_capacity(capacity, zero)
    }

    /// See [`AttributeBuffer::size`].
    pub fn buffer_size(&self, handle: BufferHandle) -> Result<u64, GraphicsError> {
        Ok(self.buffer(handle)?.size())
    }

    /// See [`AttributeBuffer::capacity_in_bytes`].
    pub fn buffer_capacity_in_bytes(&self, handle: BufferHandle) -> Result<u64, GraphicsError> {
        Ok(self.buffer(handle)?.capacity_in_bytes())
    }

    /// See [`AttributeBuffer::is_dirty`].
    pub fn is_buffer_dirty(&self, handle: BufferHandle) -> Result<bool, GraphicsError> {
        Ok(self.buffer(handle)?.is_dirty())
    }

    /// See [`AttributeBuffer::set_dirty`].
    pub fn set_buffer_dirty(&self, handle: BufferHandle, dirty: bool) -> Result<(), GraphicsError> {
        self.buffer(handle)?.set_dirty(dirty);
        Ok(())
    }

    /// See [`AttributeBuffer::clear`].
    pub fn clear_buffer(&self, handle: BufferHandle) -> Result<(), GraphicsError> {
        self.buffer(handle)?.clear();
        Ok(())
    }

    /// See [`AttributeBuffer::commit`].
    pub fn commit_buffer(&self, handle: BufferHandle) -> Result<(), GraphicsError> {
        self.buffer(handle)?.commit()
    }

    // === Vertex arrays ===

    /// Create a vertex array.
    pub fn create_vertex_array(
        &mut self,
        topology: PrimitiveTopology,
    ) -> Result<VertexArrayHandle, GraphicsError> {
        let vertex_array = VertexArray::new(self.backend.clone(), topology)?;
        Ok(self.vertex_arrays.allocate(vertex_array).into())
    }

    /// Destroy a vertex array, releasing its buffer references.
    pub fn destroy_vertex_array(&mut self, handle: VertexArrayHandle) -> Result<(), GraphicsError> {
        self.vertex_array(handle)?;
        let Some(vertex_array) = self.vertex_arrays.free(handle.raw()) else {
            return Err(GraphicsError::InvalidHandle(handle.raw()));
        };
        vertex_array.destroy();
        Ok(())
    }

    /// Resolve a vertex array handle.
    pub fn vertex_array(&self, handle: VertexArrayHandle) -> Result<&Arc<VertexArray>, GraphicsError> {
        self.vertex_arrays
            .get(handle.raw())
            .ok_or(GraphicsError::InvalidHandle(handle.raw()))
    }

    /// See [`VertexArray::specify_vertex_attribute`].
    pub fn specify_vertex_attribute(
        &self,
        handle: VertexArrayHandle,
        buffer: BufferHandle,
        attribute: VertexAttribute,
    ) -> Result<(), GraphicsError> {
        let buffer = self.buffer(buffer)?.clone();
        self.vertex_array(handle)?
            .specify_vertex_attribute(buffer, attribute);
        Ok(())
    }

    /// See [`VertexArray::remove_vertex_attribute`].
    pub fn remove_vertex_attribute(
        &self,
        handle: VertexArrayHandle,
        index: u32,
    ) -> Result<bool, GraphicsError> {
        Ok(self.vertex_array(handle)?.remove_vertex_attribute(index))
    }

    /// See [`VertexArray::specify_index_buffer`].
    pub fn specify_index_buffer(
        &self,
        handle: VertexArrayHandle,
        buffer: BufferHandle,
    ) -> Result<(), GraphicsError> {
        let buffer = self.buffer(buffer)?.clone();
        self.vertex_array(handle)?.specify_index_buffer(buffer);
        Ok(())
    }

    /// See [`VertexArray::remove_index_buffer`].
    pub fn remove_index_buffer(&self, handle: VertexArrayHandle) -> Result<(), GraphicsError> {
        self.vertex_array(handle)?.remove_index_buffer();
        Ok(())
    }

    /// See [`VertexArray::empty`].
    pub fn vertex_array_empty(&self, handle: VertexArrayHandle) -> Result<bool, GraphicsError> {
        Ok(self.vertex_array(handle)?.empty())
    }

    /// See [`VertexArray::clear`].
    pub fn clear_vertex_array(&self, handle: VertexArrayHandle) -> Result<(), GraphicsError> {
        self.vertex_array(handle)?.clear();
        Ok(())
    }

    /// See [`VertexArray::count`].
    pub fn vertex_array_count(&self, handle: VertexArrayHandle) -> Result<u32, GraphicsError> {
        Ok(self.vertex_array(handle)?.count())
    }

    /// See [`VertexArray::capacity`].
    pub fn vertex_array_capacity(&self, handle: VertexArrayHandle) -> Result<u32, GraphicsError> {
        Ok(self.vertex_array(handle)?.capacity())
    }

    /// See [`VertexArray::is_dirty`].
    pub fn is_vertex_array_dirty(&self, handle: VertexArrayHandle) -> Result<bool, GraphicsError> {
        Ok(self.vertex_array(handle)?.is_dirty())
    }

    /// See [`VertexArray::set_dirty`].
    pub fn set_vertex_array_dirty(
        &self,
        handle: VertexArrayHandle,
        dirty: bool,
        cascade: bool,
    ) -> Result<(), GraphicsError> {
        self.vertex_array(handle)?.set_dirty(dirty, cascade);
        Ok(())
    }

    /// See [`VertexArray::draw`].
    pub fn draw(&self, handle: VertexArrayHandle, start: u32, count: u32) -> Result<(), GraphicsError> {
        self.vertex_array(handle)?.draw(start, count)
    }

    // === Lifecycle ===

    /// Reallocate every native resource after the native context was lost.
    ///
    /// Buffers are recreated first so vertex arrays rebind fresh storage.
    /// Buffers whose handle was destroyed while a vertex array still holds
    /// them are recreated too.
    pub fn recreate(&self) -> Result<(), GraphicsError> {
        let mut buffers: Vec<Arc<AttributeBuffer>> =
            self.buffers.iter().map(|(_, buffer)| buffer.clone()).collect();
        for (_, vertex_array) in self.vertex_arrays.iter() {
            for buffer in vertex_array.buffers() {
                if !buffers.iter().any(|known| Arc::ptr_eq(known, &buffer)) {
                    buffers.push(buffer);
                }
            }
        }

        log::info!(
            "GraphicsInterface: recreating {} buffers ({} detached) and {} vertex arrays",
            buffers.len(),
            buffers.len() - self.buffers.len(),
            self.vertex_arrays.len()
        );
        for buffer in &buffers {
            buffer.recreate()?;
        }
        for (_, vertex_array) in self.vertex_arrays.iter() {
            vertex_array.recreate()?;
        }
        Ok(())
    }

    /// Release every managed object.
    pub fn shutdown(mut self) {
        let (vertex_arrays, buffers) = self.release_all();
        log::info!(
            "GraphicsInterface shut down: released {} vertex arrays and {} buffers",
            vertex_arrays,
            buffers
        );
    }

    fn release_all(&mut self) -> (usize, usize) {
        let vertex_arrays = self.vertex_arrays.drain();
        for (_, vertex_array) in &vertex_arrays {
            vertex_array.destroy();
        }
        let buffers = self.buffers.drain();
        for (_, buffer) in &buffers {
            buffer.destroy();
        }
        (vertex_arrays.len(), buffers.len())
    }
}

impl Drop for GraphicsInterface {
    fn drop(&mut self) {
        let (vertex_arrays, buffers) = self.release_all();
        if vertex_arrays + buffers > 0 {
            log::debug!(
                "GraphicsInterface dropped with {} vertex arrays and {} buffers live",
                vertex_arrays,
                buffers
            );
        }
    }
}

impl std::fmt::Debug for GraphicsInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsInterface")
            .field("backend", &self.backend.name())
            .field("buffers", &self.buffers)
            .field("vertex_arrays", &self.vertex_arrays)
            .finish()
    }
}

// Ensure GraphicsInterface is Send + Sync
static_assertions::assert_impl_all!(GraphicsInterface: Send, Sync);

/// Process-wide graphics interface.
///
/// The engine initializes the interface once at startup and shuts it down
/// once on exit; everything in between goes through [`with`].
pub mod global {
    use parking_lot::Mutex;

    use super::GraphicsInterface;
    use crate::error::GraphicsError;
    use crate::instance::InstanceParameters;

    static INTERFACE: Mutex<Option<GraphicsInterface>> = Mutex::new(None);

    /// Create the process-wide interface.
    ///
    /// # Errors
    ///
    /// Fails if the interface is already initialized or no backend is
    /// available.
    pub fn init(params: &InstanceParameters) -> Result<(), GraphicsError> {
        let mut slot = INTERFACE.lock();
        if slot.is_some() {
            return Err(GraphicsError::InitializationFailed(
                "graphics interface already initialized".to_string(),
            ));
        }
        *slot = Some(GraphicsInterface::new(params)?);
        Ok(())
    }

    /// Install an existing interface as the process-wide one.
    pub fn install(interface: GraphicsInterface) -> Result<(), GraphicsError> {
        let mut slot = INTERFACE.lock();
        if slot.is_some() {
            return Err(GraphicsError::InitializationFailed(
                "graphics interface already initialized".to_string(),
            ));
        }
        *slot = Some(interface);
        Ok(())
    }

    /// Returns `true` between [`init`] and [`shutdown`].
    pub fn is_initialized() -> bool {
        INTERFACE.lock().is_some()
    }

    /// Run `f` with the process-wide interface.
    ///
    /// # Errors
    ///
    /// Fails if the interface is not initialized.
    pub fn with<R>(f: impl FnOnce(&mut GraphicsInterface) -> R) -> Result<R, GraphicsError> {
        let mut slot = INTERFACE.lock();
        match slot.as_mut() {
            Some(interface) => Ok(f(interface)),
            None => Err(GraphicsError::InitializationFailed(
                "graphics interface not initialized".to_string(),
            )),
        }
    }

    /// Shut down the process-wide interface.
    ///
    /// Returns `false` if it was not initialized.
    pub fn shutdown() -> bool {
        let interface = INTERFACE.lock().take();
        match interface {
            Some(interface) => {
                interface.shutdown();
                true
            }
            None => false,
        }
    }
}
