//! Vertex array resource.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{GpuBackend, GpuVertexArray};
use crate::error::GraphicsError;
use crate::types::{AttributeBinding, DrawCall, PrimitiveTopology, VertexAttribute};

use super::AttributeBuffer;

struct AttachedBuffer {
    buffer: Arc<AttributeBuffer>,
    /// Native generation of `buffer` when it was last bound.
    bound_generation: Option<u64>,
}

impl AttachedBuffer {
    fn new(buffer: Arc<AttributeBuffer>) -> Self {
        Self {
            buffer,
            bound_generation: None,
        }
    }

    fn is_stale(&self) -> bool {
        self.bound_generation != Some(self.buffer.native_generation())
    }
}

struct AttributeSlot {
    attached: AttachedBuffer,
    attribute: VertexAttribute,
}

struct VertexArrayState {
    attributes: BTreeMap<u32, AttributeSlot>,
    index: Option<AttachedBuffer>,
    native: Option<GpuVertexArray>,
    interleaved: bool,
    dirty: bool,
    configured: bool,
    destroyed: bool,
}

impl VertexArrayState {
    fn buffers(&self) -> impl Iterator<Item = &Arc<AttributeBuffer>> {
        self.attributes
            .values()
            .map(|slot| &slot.attached.buffer)
            .chain(self.index.iter().map(|index| &index.buffer))
    }

    /// Attached buffers with duplicates removed.
    fn unique_buffers(&self) -> Vec<Arc<AttributeBuffer>> {
        let mut unique: Vec<Arc<AttributeBuffer>> = Vec::new();
        for buffer in self.buffers() {
            if !unique.iter().any(|b| Arc::ptr_eq(b, buffer)) {
                unique.push(buffer.clone());
            }
        }
        unique
    }

    fn update_interleaved(&mut self) {
        let mut buffers = self.attributes.values().map(|slot| &slot.attached.buffer);
        self.interleaved = match buffers.next() {
            Some(first) => buffers.all(|buffer| Arc::ptr_eq(buffer, first)),
            None => false,
        };
    }

    fn common<F: Fn(&AttributeBuffer) -> u32>(&self, what: &str, query: F) -> u32 {
        let mut values = self
            .attributes
            .iter()
            .map(|(index, slot)| (*index, query(slot.attached.buffer.as_ref())));
        let Some((first_index, first)) = values.next() else {
            return 0;
        };
        for (index, value) in values {
            assert_eq!(
                value, first,
                "vertex array attribute {index} has {what} {value}, attribute {first_index} has {first}"
            );
        }
        first
    }
}

/// A drawable batch: attribute buffers bound to attribute locations plus
/// an optional index buffer.
///
/// The vertex array holds a shared reference to every attached buffer.
/// Attribute bindings are (re)issued only when attachments change or a
/// buffer's native storage was reallocated; content changes go through the
/// buffers' partial commits.
///
/// # Example
///
/// ```ignore
/// let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList)?;
/// vao.specify_vertex_attribute(positions, VertexAttribute::float(0, 0, 3));
/// vao.draw(0, 0)?;
/// ```
pub struct VertexArray {
    backend: Arc<dyn GpuBackend>,
    topology: PrimitiveTopology,
    state: Mutex<VertexArrayState>,
}

impl VertexArray {
    /// Create an empty vertex array.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        topology: PrimitiveTopology,
    ) -> Result<Arc<Self>, GraphicsError> {
        let native = backend.create_vertex_array()?;
        log::trace!(
            "VertexArray: created {:?} (native: {})",
            topology,
            native.is_some()
        );
        Ok(Arc::new(Self {
            backend,
            topology,
            state: Mutex::new(VertexArrayState {
                attributes: BTreeMap::new(),
                index: None,
                native,
                interleaved: false,
                dirty: true,
                configured: false,
                destroyed: false,
            }),
        }))
    }

    /// Attach `buffer` at `attribute.index`, replacing any previous one.
    ///
    /// # Panics
    ///
    /// Panics if the attribute does not fit inside one element of `buffer`.
    pub fn specify_vertex_attribute(&self, buffer: Arc<AttributeBuffer>, attribute: VertexAttribute) {
        assert!(
            attribute.offset + attribute.size() <= buffer.element_size(),
            "attribute {} ({} bytes at offset {}) exceeds element size {}",
            attribute.index,
            attribute.size(),
            attribute.offset,
            buffer.element_size()
        );
        let mut state = self.state.lock();
        self.assert_alive(&state);
        state.attributes.insert(
            attribute.index,
            AttributeSlot {
                attached: AttachedBuffer::new(buffer),
                attribute,
            },
        );
        state.update_interleaved();
        state.dirty = true;
    }

    /// Detach the buffer at attribute location `index`.
    ///
    /// Returns `false` if nothing was attached there.
    pub fn remove_vertex_attribute(&self, index: u32) -> bool {
        let mut state = self.state.lock();
        self.assert_alive(&state);
        let removed = state.attributes.remove(&index).is_some();
        state.update_interleaved();
        state.dirty = true;
        removed
    }

    /// Attach the index buffer.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` was not created with an index intent.
    pub fn specify_index_buffer(&self, buffer: Arc<AttributeBuffer>) {
        assert!(
            buffer.intent().is_index(),
            "index buffer must have an index intent, got {:?}",
            buffer.intent()
        );
        let mut state = self.state.lock();
        self.assert_alive(&state);
        let unchanged = state
            .index
            .as_ref()
            .is_some_and(|index| Arc::ptr_eq(&index.buffer, &buffer));
        if !unchanged {
            state.index = Some(AttachedBuffer::new(buffer));
            state.dirty = true;
        }
    }

    /// Detach the index buffer.
    pub fn remove_index_buffer(&self) {
        let mut state = self.state.lock();
        if state.index.take().is_some() {
            state.dirty = true;
        }
    }

    /// Attached attribute and index buffers, each listed once.
    pub fn buffers(&self) -> Vec<Arc<AttributeBuffer>> {
        self.state.lock().unique_buffers()
    }

    /// Returns `true` if every attached buffer has zero elements.
    pub fn empty(&self) -> bool {
        let state = self.state.lock();
        state.buffers().all(|buffer| buffer.element_count() == 0)
    }

    /// Clear every attached buffer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.dirty = true;
        for buffer in state.unique_buffers() {
            buffer.clear();
        }
    }

    /// Common element count of the attribute buffers.
    ///
    /// # Panics
    ///
    /// Panics if the attribute buffers disagree.
    pub fn count(&self) -> u32 {
        self.state.lock().common("element count", AttributeBuffer::element_count)
    }

    /// Common capacity of the attribute buffers.
    ///
    /// # Panics
    ///
    /// Panics if the attribute buffers disagree.
    pub fn capacity(&self) -> u32 {
        self.state.lock().common("capacity", AttributeBuffer::capacity)
    }

    /// Returns `true` if the array or any attached buffer is dirty.
    pub fn is_dirty(&self) -> bool {
        let state = self.state.lock();
        state.dirty || state.buffers().any(|buffer| buffer.is_dirty())
    }

    /// Set the dirty flag, and with `cascade` that of every attached buffer.
    pub fn set_dirty(&self, dirty: bool, cascade: bool) {
        let mut state = self.state.lock();
        state.dirty = dirty;
        if cascade {
            for buffer in state.unique_buffers() {
                buffer.set_dirty(dirty);
            }
        }
    }

    /// Draw `count` vertices (or indices) starting at `start`.
    ///
    /// A `count` of zero draws every element: the index count when indexed,
    /// otherwise the common vertex count. Dirty buffers are committed first.
    pub fn draw(&self, start: u32, count: u32) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        self.assert_alive(&state);

        let count = match (count, state.index.as_ref()) {
            (0, Some(index)) => index.buffer.element_count(),
            (0, None) => state.common("element count", AttributeBuffer::element_count),
            (count, _) => count,
        };

        if let Some(native) = state.native.as_ref() {
            self.backend.bind_vertex_array(Some(native));
        }
        let result = self.draw_bound(&mut state, start, count);
        self.backend.bind_vertex_array(None);
        result
    }

    fn draw_bound(&self, state: &mut VertexArrayState, start: u32, count: u32) -> Result<(), GraphicsError> {
        for buffer in state.unique_buffers() {
            if buffer.is_dirty() {
                buffer.commit()?;
            }
        }

        let stale = state.attributes.values().any(|slot| slot.attached.is_stale())
            || state.index.as_ref().is_some_and(AttachedBuffer::is_stale);
        if !state.configured || state.dirty || stale || state.native.is_none() {
            self.bind_attributes(state);
        }

        if count == 0 {
            log::trace!("VertexArray: nothing to draw");
            return Ok(());
        }
        self.backend.draw(&DrawCall {
            topology: self.topology,
            first: start,
            count,
            index_format: state.index.as_ref().and_then(|index| index.buffer.index_format()),
        })
    }

    fn bind_attributes(&self, state: &mut VertexArrayState) {
        if state.native.is_some() {
            log::debug!(
                "VertexArray: binding {} attributes (indexed: {})",
                state.attributes.len(),
                state.index.is_some()
            );
        }

        // Detached attributes and index buffers must not survive in the native state.
        self.backend.clear_bindings();

        for slot in state.attributes.values_mut() {
            let buffer = &slot.attached.buffer;
            let Some(native) = buffer.native_buffer() else {
                slot.attached.bound_generation = None;
                continue;
            };
            self.backend.bind_attribute(
                &native,
                &AttributeBinding {
                    attribute: slot.attribute,
                    stride: buffer.element_size(),
                },
            );
            slot.attached.bound_generation = Some(buffer.native_generation());
        }

        if let Some(index) = state.index.as_mut() {
            match (index.buffer.native_buffer(), index.buffer.index_format()) {
                (Some(native), Some(format)) => {
                    self.backend.bind_index_buffer(&native, format);
                    index.bound_generation = Some(index.buffer.native_generation());
                }
                _ => index.bound_generation = None,
            }
        }

        state.configured = true;
        state.dirty = false;
    }

    /// Primitive topology drawn by this array.
    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    /// Returns `true` if every attribute reads from one shared buffer.
    pub fn is_interleaved(&self) -> bool {
        self.state.lock().interleaved
    }

    /// Buffer and attribute attached at location `index`.
    pub fn attribute(&self, index: u32) -> Option<(Arc<AttributeBuffer>, VertexAttribute)> {
        self.state
            .lock()
            .attributes
            .get(&index)
            .map(|slot| (slot.attached.buffer.clone(), slot.attribute))
    }

    /// Number of attached attributes.
    pub fn attribute_count(&self) -> usize {
        self.state.lock().attributes.len()
    }

    /// The attached index buffer.
    pub fn index_buffer(&self) -> Option<Arc<AttributeBuffer>> {
        self.state.lock().index.as_ref().map(|index| index.buffer.clone())
    }

    /// Returns `true` if an index buffer is attached.
    pub fn is_indexed(&self) -> bool {
        self.state.lock().index.is_some()
    }

    /// Returns `true` if the backend gave this array a vertex array object.
    pub fn has_native(&self) -> bool {
        self.state.lock().native.is_some()
    }

    /// Replace the native vertex array object and force rebinding.
    pub fn recreate(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Ok(());
        }
        state.native = self.backend.create_vertex_array()?;
        state.configured = false;
        state.dirty = true;
        Ok(())
    }

    /// Release every attached buffer and the native vertex array object.
    ///
    /// Further mutation panics.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.attributes.clear();
        state.index = None;
        state.native = None;
        state.interleaved = false;
        state.destroyed = true;
    }

    /// Returns `true` once [`destroy`](Self::destroy) ran.
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    fn assert_alive(&self, state: &VertexArrayState) {
        assert!(!state.destroyed, "VertexArray used after destroy()");
    }
}

impl std::fmt::Debug for VertexArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("VertexArray")
            .field("topology", &self.topology)
            .field("attributes", &state.attributes.keys().collect::<Vec<_>>())
            .field("indexed", &state.index.is_some())
            .field("interleaved", &state.interleaved)
            .field("dirty", &state.dirty)
            .finish()
    }
}

// Ensure VertexArray is Send + Sync
static_assertions::assert_impl_all!(VertexArray: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::{AttributeBufferDescriptor, IndexFormat, VertexDataType};

    fn backend() -> (Arc<DummyBackend>, Arc<dyn GpuBackend>) {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        (dummy, backend)
    }

    fn positions(backend: &Arc<dyn GpuBackend>, count: usize) -> Arc<AttributeBuffer> {
        let buffer =
            AttributeBuffer::new(backend.clone(), AttributeBufferDescriptor::new(12, 0)).unwrap();
        let data: Vec<[f32; 3]> = (0..count).map(|i| [i as f32, 0.0, 0.0]).collect();
        buffer.set_typed(&data, true).unwrap();
        buffer
    }

    #[test]
    fn test_dirty_until_drawn() {
        let (dummy, backend) = backend();
        let buffer = positions(&backend, 3);
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(buffer, VertexAttribute::float(0, 0, 3));
        assert!(vao.is_dirty());

        vao.draw(0, 0).unwrap();
        assert!(!vao.is_dirty());
        assert_eq!(dummy.stats().attribute_binds, 1);

        vao.draw(0, 0).unwrap();
        let stats = dummy.stats();
        assert_eq!(stats.attribute_binds, 1);
        assert_eq!(stats.draws, 2);
    }

    #[test]
    fn test_content_change_commits_without_rebinding() {
        let (dummy, backend) = backend();
        let buffer = positions(&backend, 3);
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(buffer.clone(), VertexAttribute::float(0, 0, 3));
        vao.draw(0, 0).unwrap();

        buffer.update_typed(&[[9.0f32, 9.0, 9.0]], 1, true).unwrap();
        assert!(vao.is_dirty());
        dummy.reset_stats();
        vao.draw(0, 0).unwrap();

        let stats = dummy.stats();
        assert_eq!(stats.buffer_writes, 1);
        assert_eq!(stats.bytes_written, 12);
        assert_eq!(stats.attribute_binds, 0);
    }

    #[test]
    fn test_reallocation_forces_rebinding() {
        let (dummy, backend) = backend();
        let buffer = positions(&backend, 3);
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(buffer.clone(), VertexAttribute::float(0, 0, 3));
        vao.draw(0, 0).unwrap();

        buffer.append_typed(&[[1.0f32; 3]; 3], true).unwrap();
        dummy.reset_stats();
        vao.draw(0, 0).unwrap();

        let stats = dummy.stats();
        assert_eq!(stats.buffers_created, 1);
        assert_eq!(stats.attribute_binds, 1);
        assert_eq!(dummy.draws()[0].call.count, 6);
    }

    #[test]
    fn test_interleave_detection() {
        let (_, backend) = backend();
        let shared =
            AttributeBuffer::new(backend.clone(), AttributeBufferDescriptor::new(24, 4)).unwrap();
        let other =
            AttributeBuffer::new(backend.clone(), AttributeBufferDescriptor::new(8, 4)).unwrap();
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        assert!(!vao.is_interleaved());

        vao.specify_vertex_attribute(shared.clone(), VertexAttribute::float(0, 0, 3));
        vao.specify_vertex_attribute(shared.clone(), VertexAttribute::float(1, 12, 2));
        vao.specify_vertex_attribute(
            shared,
            VertexAttribute::new(2, 20, VertexDataType::UnsignedByte, 4).normalized(),
        );
        assert!(vao.is_interleaved());

        vao.specify_vertex_attribute(other, VertexAttribute::float(3, 0, 2));
        assert!(!vao.is_interleaved());

        vao.remove_vertex_attribute(3);
        assert!(vao.is_interleaved());
        assert_eq!(vao.attribute_count(), 3);
    }

    #[test]
    fn test_indexed_draw_uses_index_count() {
        let (dummy, backend) = backend();
        let vertices = positions(&backend, 4);
        let indices = AttributeBuffer::new(
            backend.clone(),
            AttributeBufferDescriptor::index(IndexFormat::Uint16, 0),
        )
        .unwrap();
        indices.set_typed(&[0u16, 1, 2, 2, 3, 0], true).unwrap();

        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(vertices, VertexAttribute::float(0, 0, 3));
        vao.specify_index_buffer(indices.clone());
        vao.draw(0, 0).unwrap();

        let draws = dummy.draws();
        assert_eq!(draws[0].call.count, 6);
        assert_eq!(draws[0].call.index_format, Some(IndexFormat::Uint16));
        assert!(draws[0].bindings.index.is_some());

        // Re-specifying the same index buffer does not dirty the array.
        vao.specify_index_buffer(indices);
        assert!(!vao.is_dirty());
    }

    #[test]
    fn test_removed_attribute_is_unbound() {
        let (dummy, backend) = backend();
        let vao = VertexArray::new(backend.clone(), PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(positions(&backend, 3), VertexAttribute::float(0, 0, 3));
        vao.specify_vertex_attribute(positions(&backend, 3), VertexAttribute::float(1, 0, 3));
        vao.draw(0, 0).unwrap();
        assert_eq!(dummy.draws()[0].bindings.attributes.len(), 2);

        assert!(vao.remove_vertex_attribute(1));
        vao.draw(0, 0).unwrap();

        let draws = dummy.draws();
        let locations: Vec<u32> = draws[1].bindings.attributes.keys().copied().collect();
        assert_eq!(locations, vec![0]);
    }

    #[test]
    fn test_removed_index_buffer_is_unbound() {
        let (dummy, backend) = backend();
        let indices = AttributeBuffer::new(
            backend.clone(),
            AttributeBufferDescriptor::index(IndexFormat::Uint32, 0),
        )
        .unwrap();
        indices.set_typed(&[0u32, 1, 2], true).unwrap();
        let vao = VertexArray::new(backend.clone(), PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(positions(&backend, 4), VertexAttribute::float(0, 0, 3));
        vao.specify_index_buffer(indices);
        vao.draw(0, 0).unwrap();

        vao.remove_index_buffer();
        assert!(vao.is_dirty());
        vao.draw(0, 0).unwrap();

        let draws = dummy.draws();
        assert!(draws[0].bindings.index.is_some());
        assert!(draws[1].bindings.index.is_none());
        assert_eq!(draws[1].call.index_format, None);
        assert_eq!(draws[1].call.count, 4);
        assert_eq!(draws[1].bindings.attributes.len(), 1);
    }

    #[test]
    fn test_removed_attribute_is_unbound_without_vertex_arrays() {
        let dummy = Arc::new(DummyBackend::new().without_vertex_arrays());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        let vao = VertexArray::new(backend.clone(), PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(positions(&backend, 3), VertexAttribute::float(0, 0, 3));
        vao.specify_vertex_attribute(positions(&backend, 3), VertexAttribute::float(2, 0, 3));
        vao.draw(0, 0).unwrap();

        vao.remove_vertex_attribute(2);
        vao.draw(0, 0).unwrap();
        assert!(!dummy.draws()[1].bindings.attributes.contains_key(&2));
    }

    #[test]
    fn test_without_vertex_arrays_rebinds_every_draw() {
        let dummy = Arc::new(DummyBackend::new().without_vertex_arrays());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        let buffer = positions(&backend, 3);
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        assert!(!vao.has_native());
        vao.specify_vertex_attribute(buffer, VertexAttribute::float(0, 0, 3));

        vao.draw(0, 0).unwrap();
        vao.draw(0, 0).unwrap();
        let stats = dummy.stats();
        assert_eq!(stats.attribute_binds, 2);
        assert_eq!(stats.buffer_writes, 1);
        assert_eq!(dummy.draws()[1].bindings.attributes.len(), 1);
    }

    #[test]
    fn test_empty_and_clear() {
        let (_, backend) = backend();
        let vao = VertexArray::new(backend.clone(), PrimitiveTopology::PointList).unwrap();
        assert!(vao.empty());

        let buffer = positions(&backend, 2);
        vao.specify_vertex_attribute(buffer.clone(), VertexAttribute::float(0, 0, 3));
        assert!(!vao.empty());
        assert_eq!(vao.count(), 2);

        vao.clear();
        assert!(vao.empty());
        assert_eq!(buffer.element_count(), 0);
        assert!(vao.is_dirty());
    }

    #[test]
    #[should_panic(expected = "element count")]
    fn test_mismatched_counts_panic() {
        let (_, backend) = backend();
        let vao = VertexArray::new(backend.clone(), PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(positions(&backend, 3), VertexAttribute::float(0, 0, 3));
        vao.specify_vertex_attribute(positions(&backend, 4), VertexAttribute::float(1, 0, 3));
        vao.count();
    }

    #[test]
    fn test_set_dirty_cascades() {
        let (_, backend) = backend();
        let buffer = positions(&backend, 3);
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(buffer.clone(), VertexAttribute::float(0, 0, 3));
        vao.draw(0, 0).unwrap();

        vao.set_dirty(true, false);
        assert!(vao.is_dirty());
        assert!(!buffer.is_dirty());

        vao.set_dirty(true, true);
        assert!(buffer.is_dirty());

        vao.set_dirty(false, true);
        assert!(!vao.is_dirty());
    }

    #[test]
    fn test_recreate_forces_rebinding() {
        let (dummy, backend) = backend();
        let buffer = positions(&backend, 3);
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(buffer, VertexAttribute::float(0, 0, 3));
        vao.draw(0, 0).unwrap();

        vao.recreate().unwrap();
        vao.draw(0, 0).unwrap();
        let stats = dummy.stats();
        assert_eq!(stats.vertex_arrays_created, 2);
        assert_eq!(stats.attribute_binds, 2);
    }

    #[test]
    #[should_panic(expected = "exceeds element size")]
    fn test_attribute_outside_element_panics() {
        let (_, backend) = backend();
        let buffer = positions(&backend, 1);
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(buffer, VertexAttribute::float(0, 4, 3));
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let (_, backend) = backend();
        let buffer = positions(&backend, 3);
        let vao = VertexArray::new(backend, PrimitiveTopology::TriangleList).unwrap();
        vao.specify_vertex_attribute(buffer.clone(), VertexAttribute::float(0, 0, 3));
        assert_eq!(Arc::strong_count(&buffer), 2);

        vao.destroy();
        assert_eq!(Arc::strong_count(&buffer), 1);
        assert!(vao.is_destroyed());
    }
}
