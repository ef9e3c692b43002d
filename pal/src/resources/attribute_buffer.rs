//! Attribute buffer resource.
//!
//! An [`AttributeBuffer`] is one stream of fixed-size elements (vertices,
//! indices or a single per-vertex attribute). It keeps a client-side copy of
//! its elements, tracks which element range changed since the last commit,
//! and uploads only that range to its native buffer.

use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{GpuBackend, GpuBuffer};
use crate::error::GraphicsError;
use crate::types::{
    AttributeBufferDescriptor, BufferIntent, BufferMode, BufferStorage, IndexFormat,
    MAX_ELEMENT_SIZE, NativeBufferDescriptor,
};

/// Synchronization state between client and native storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommitState {
    /// Native storage matches client storage.
    #[default]
    Clean,
    /// Client storage holds writes not yet committed.
    DirtyPending,
    /// A commit is in progress.
    Committing,
}

/// Where the bytes of a write come from.
#[derive(Clone, Copy)]
enum WriteSource<'a> {
    Bytes(&'a [u8]),
    Zeroed,
    /// Elements already in client storage, starting at this element.
    SelfCopy(u32),
}

impl WriteSource<'_> {
    fn has_data(&self) -> bool {
        !matches!(self, Self::Zeroed)
    }
}

struct BufferState {
    element_count: u32,
    capacity: u32,
    client: Option<Vec<u8>>,
    native: Option<GpuBuffer>,
    commit: CommitState,
    /// Union of element ranges written since the last commit.
    dirty: Option<Range<u32>>,
    native_generation: u64,
    destroyed: bool,
}

impl BufferState {
    fn mark_dirty(&mut self, range: Range<u32>) {
        self.commit = CommitState::DirtyPending;
        if range.is_empty() {
            return;
        }
        self.dirty = Some(match self.dirty.take() {
            Some(prev) => prev.start.min(range.start)..prev.end.max(range.end),
            None => range,
        });
    }

    fn mark_clean(&mut self) {
        self.commit = CommitState::Clean;
        self.dirty = None;
    }
}

/// A resizable stream of fixed-size elements with lazy native upload.
///
/// Buffers are created with [`AttributeBuffer::new`] (or through the
/// [`GraphicsInterface`](crate::GraphicsInterface)) and shared as
/// `Arc<AttributeBuffer>` between vertex arrays.
///
/// Mutators record the touched element range and leave the buffer dirty.
/// Passing `defer = false` commits immediately when the buffer already has
/// native storage; otherwise the next [`commit`](Self::commit), usually
/// issued by [`VertexArray::draw`](super::VertexArray::draw), uploads it.
///
/// Buffers created with [`BufferStorage::NativeOnly`] keep no client copy:
/// writes go straight to native storage and the operations that need to
/// read existing elements (insert, remove, swap, move) panic.
///
/// # Example
///
/// ```ignore
/// let positions = AttributeBuffer::new(backend, AttributeBufferDescriptor::new(12, 4))?;
/// positions.set_typed(&[[0.0f32; 3]; 4], true)?;
/// assert!(positions.is_dirty());
/// positions.commit()?;
/// ```
pub struct AttributeBuffer {
    backend: Arc<dyn GpuBackend>,
    descriptor: AttributeBufferDescriptor,
    state: Mutex<BufferState>,
}

impl AttributeBuffer {
    /// Create a buffer with `descriptor.capacity` element slots.
    ///
    /// # Panics
    ///
    /// Panics unless `0 < element_size < MAX_ELEMENT_SIZE`.
    pub fn new(
        backend: Arc<dyn GpuBackend>,
        descriptor: AttributeBufferDescriptor,
    ) -> Result<Arc<Self>, GraphicsError> {
        assert!(
            descriptor.element_size > 0 && descriptor.element_size < MAX_ELEMENT_SIZE,
            "element size must be in 1..{}, got {}",
            MAX_ELEMENT_SIZE,
            descriptor.element_size
        );

        let client = match descriptor.storage {
            BufferStorage::ClientAndNative => Some(Vec::new()),
            BufferStorage::NativeOnly => None,
        };
        let buffer = Self {
            backend,
            descriptor,
            state: Mutex::new(BufferState {
                element_count: 0,
                capacity: 0,
                client,
                native: None,
                commit: CommitState::Clean,
                dirty: None,
                native_generation: 0,
                destroyed: false,
            }),
        };

        {
            let mut state = buffer.state.lock();
            let capacity = buffer.descriptor.capacity;
            if capacity > 0 {
                buffer.grow(&mut state, capacity)?;
                if state.native.is_none() {
                    state.native = Some(buffer.allocate_native(capacity)?);
                }
            }
        }

        log::trace!(
            "AttributeBuffer: created {:?} (element size: {}, capacity: {}, {:?}, {:?})",
            buffer.descriptor.label,
            buffer.descriptor.element_size,
            buffer.descriptor.capacity,
            buffer.descriptor.intent,
            buffer.descriptor.storage
        );
        Ok(Arc::new(buffer))
    }

    /// Replace the content with `count` elements starting at element 0.
    ///
    /// `data` must hold exactly `count * element_size` bytes; `None`
    /// zero-fills.
    pub fn set_elements(
        &self,
        data: Option<&[u8]>,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        self.set_element_count(count)?;
        self.update_elements(data, 0, count, defer)
    }

    /// Overwrite `count` elements at `start`, growing the buffer as needed.
    ///
    /// Writes past the end extend the element count; writes inside the
    /// current range never shrink it.
    pub fn update_elements(
        &self,
        data: Option<&[u8]>,
        start: u32,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        let source = self.source(data, count);
        let mut state = self.state.lock();
        self.write(&mut state, source, start, count, defer)
    }

    /// Insert `count` elements at `start`, shifting later elements up.
    pub fn insert_elements(
        &self,
        data: Option<&[u8]>,
        start: u32,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        let source = self.source(data, count);
        let mut state = self.state.lock();
        self.assert_client(&state, "insert_elements");
        if count == 0 {
            return Ok(());
        }

        let old_count = state.element_count;
        if start < old_count {
            self.reserve(&mut state, old_count + count)?;
            let es = self.element_size() as usize;
            if let Some(client) = state.client.as_mut() {
                client.copy_within(
                    start as usize * es..old_count as usize * es,
                    (start + count) as usize * es,
                );
            }
            state.element_count = old_count + count;
            state.mark_dirty(start + count..old_count + count);
        }
        self.write(&mut state, source, start, count, defer)
    }

    /// Append `count` elements after the last one.
    pub fn append_elements(
        &self,
        data: Option<&[u8]>,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        let source = self.source(data, count);
        let mut state = self.state.lock();
        let start = state.element_count;
        self.write(&mut state, source, start, count, defer)
    }

    /// Remove `count` elements at `start`, shifting later elements down.
    ///
    /// # Panics
    ///
    /// Panics if `start + count` exceeds the element count.
    pub fn remove_elements(&self, start: u32, count: u32, defer: bool) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        self.assert_client(&state, "remove_elements");
        let old_count = state.element_count;
        assert!(
            start as u64 + count as u64 <= old_count as u64,
            "remove_elements: range {}..{} exceeds element count {}",
            start,
            start as u64 + count as u64,
            old_count
        );
        if count == 0 {
            return Ok(());
        }

        let es = self.element_size() as usize;
        if let Some(client) = state.client.as_mut() {
            client.copy_within(
                (start + count) as usize * es..old_count as usize * es,
                start as usize * es,
            );
        }
        state.element_count = old_count - count;
        let new_count = state.element_count;
        state.mark_dirty(start..new_count);

        if !defer && state.native.is_some() {
            self.commit_locked(&mut state)?;
        }
        Ok(())
    }

    /// Exchange the `count` elements at `source` with those at `dest`.
    ///
    /// Overlapping ranges behave as a block move: the source block lands at
    /// `dest` and the displaced elements fill the vacated slots in order.
    ///
    /// # Panics
    ///
    /// Panics if either range exceeds the element count.
    pub fn swap_elements(&self, source: u32, dest: u32, count: u32) {
        let mut state = self.state.lock();
        self.assert_client(&state, "swap_elements");
        let element_count = state.element_count as u64;
        assert!(
            source as u64 + count as u64 <= element_count
                && dest as u64 + count as u64 <= element_count,
            "swap_elements: ranges at {} and {} of {} elements exceed element count {}",
            source,
            dest,
            count,
            element_count
        );
        if count == 0 || source == dest {
            return;
        }

        let es = self.element_size() as usize;
        if let Some(client) = state.client.as_mut() {
            swap_ranges(
                client,
                source as usize * es,
                dest as usize * es,
                count as usize * es,
            );
        }
        state.mark_dirty(source.min(dest)..source.max(dest) + count);
    }

    /// Copy `count` elements from `source` to `dest`, overwriting `dest`.
    ///
    /// The copy is committed right away once native storage exists.
    ///
    /// # Panics
    ///
    /// Panics if the source range exceeds the element count.
    pub fn move_elements(&self, source: u32, dest: u32, count: u32) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        self.assert_client(&state, "move_elements");
        assert!(
            source as u64 + count as u64 <= state.element_count as u64,
            "move_elements: source range {}..{} exceeds element count {}",
            source,
            source as u64 + count as u64,
            state.element_count
        );
        if source == dest {
            return Ok(());
        }
        self.write(&mut state, WriteSource::SelfCopy(source), dest, count, false)
    }

    /// Grow the capacity by `count` elements.
    pub fn add_capacity(&self, count: u32, zero: bool) -> Result<(), GraphicsError> {
        let capacity = self.capacity();
        self.set_capacity(capacity.saturating_add(count), zero)
    }

    /// Grow the capacity to `capacity` elements.
    ///
    /// Requests below the current capacity are ignored. Existing bytes are
    /// preserved; new bytes always read as zero, so `zero` only documents
    /// the caller's intent. Growing a buffer with client storage marks it
    /// dirty so the next commit reallocates native storage.
    pub fn set_capacity(&self, capacity: u32, zero: bool) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        self.assert_alive(&state);
        if capacity <= state.capacity {
            log::trace!(
                "AttributeBuffer: ignoring capacity request {} (current {})",
                capacity,
                state.capacity
            );
            return Ok(());
        }
        log::trace!(
            "AttributeBuffer: capacity {} -> {} (zero: {})",
            state.capacity,
            capacity,
            zero
        );
        self.grow(&mut state, capacity)?;
        if state.client.is_some() {
            // Native storage is resized on the next commit.
            state.mark_dirty(0..0);
        }
        Ok(())
    }

    /// Set the element count, growing the capacity if needed.
    pub fn set_element_count(&self, count: u32) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        self.assert_alive(&state);
        self.reserve(&mut state, count)?;
        let old_count = state.element_count;
        state.element_count = count;
        state.mark_dirty(old_count.min(count)..old_count.max(count));
        Ok(())
    }

    /// Drop all elements, keeping the capacity.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        self.assert_alive(&state);
        state.element_count = 0;
        state.mark_dirty(0..0);
    }

    /// Size of the live elements in bytes.
    pub fn size(&self) -> u64 {
        self.element_count() as u64 * self.element_size() as u64
    }

    /// Size of the allocated element slots in bytes.
    pub fn capacity_in_bytes(&self) -> u64 {
        self.capacity() as u64 * self.element_size() as u64
    }

    /// Returns `true` if client content has not been committed.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().commit != CommitState::Clean
    }

    /// Force the dirty state.
    ///
    /// Marking dirty schedules every live element for upload. Marking clean
    /// asserts that native storage already matches and drops pending ranges.
    pub fn set_dirty(&self, dirty: bool) {
        let mut state = self.state.lock();
        if dirty {
            let count = state.element_count;
            state.mark_dirty(0..count);
        } else {
            state.mark_clean();
        }
    }

    /// Current commit state.
    pub fn commit_state(&self) -> CommitState {
        self.state.lock().commit
    }

    /// Upload pending writes to native storage.
    ///
    /// Reallocates native storage with a full upload when the capacity grew
    /// past it, otherwise uploads only the changed range.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is clean.
    pub fn commit(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        self.commit_locked(&mut state)
    }

    // Typed helpers accept any `T` spanning a whole number of elements, so a
    // quad of four vertices can be written as one value. Positions and counts
    // are in units of `T`.

    /// Replace the content with `data`.
    pub fn set_typed<T: bytemuck::Pod>(&self, data: &[T], defer: bool) -> Result<(), GraphicsError> {
        let per = self.elements_per::<T>();
        self.set_elements(Some(bytemuck::cast_slice(data)), data.len() as u32 * per, defer)
    }

    /// Overwrite values starting at `start` with `data`.
    pub fn update_typed<T: bytemuck::Pod>(
        &self,
        data: &[T],
        start: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        let per = self.elements_per::<T>();
        self.update_elements(
            Some(bytemuck::cast_slice(data)),
            start * per,
            data.len() as u32 * per,
            defer,
        )
    }

    /// Append `data` after the last element.
    pub fn append_typed<T: bytemuck::Pod>(&self, data: &[T], defer: bool) -> Result<(), GraphicsError> {
        let per = self.elements_per::<T>();
        self.append_elements(Some(bytemuck::cast_slice(data)), data.len() as u32 * per, defer)
    }

    /// Insert `data` before the value at `start`.
    pub fn insert_typed<T: bytemuck::Pod>(
        &self,
        data: &[T],
        start: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        let per = self.elements_per::<T>();
        self.insert_elements(
            Some(bytemuck::cast_slice(data)),
            start * per,
            data.len() as u32 * per,
            defer,
        )
    }

    /// Remove `count` values starting at `start`.
    pub fn remove_typed<T: bytemuck::Pod>(
        &self,
        start: u32,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        let per = self.elements_per::<T>();
        self.remove_elements(start * per, count * per, defer)
    }

    /// Exchange `count` values at `source` with those at `dest`.
    pub fn swap_typed<T: bytemuck::Pod>(&self, source: u32, dest: u32, count: u32) {
        let per = self.elements_per::<T>();
        self.swap_elements(source * per, dest * per, count * per)
    }

    /// Copy `count` values from `source` to `dest`.
    pub fn move_typed<T: bytemuck::Pod>(
        &self,
        source: u32,
        dest: u32,
        count: u32,
    ) -> Result<(), GraphicsError> {
        let per = self.elements_per::<T>();
        self.move_elements(source * per, dest * per, count * per)
    }

    /// Grow the capacity by room for `count` values.
    pub fn add_capacity_typed<T: bytemuck::Pod>(&self, count: u32, zero: bool) -> Result<(), GraphicsError> {
        let per = self.elements_per::<T>();
        self.add_capacity(count * per, zero)
    }

    /// Read the live elements, from client storage or native storage.
    ///
    /// # Panics
    ///
    /// Panics if the live bytes do not split into whole values of `T`.
    pub fn read_typed<T: bytemuck::Pod>(&self) -> Vec<T> {
        self.elements_per::<T>();
        let bytes = self
            .client_bytes()
            .or_else(|| self.read_native())
            .unwrap_or_default();
        let size = std::mem::size_of::<T>();
        assert!(
            bytes.len() % size == 0,
            "{} live bytes do not split into {}-byte values",
            bytes.len(),
            size
        );
        bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    /// Reallocate native storage and re-upload client content.
    ///
    /// Used after the native context was lost. Native-only buffers come back
    /// zeroed.
    pub fn recreate(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Ok(());
        }
        let state = &mut *state;
        state.native = None;
        if state.capacity > 0 {
            let native = self.allocate_native(state.capacity)?;
            match state.client.as_ref() {
                Some(client) => self.backend.write_buffer(&native, 0, client)?,
                None => log::warn!(
                    "AttributeBuffer {:?}: native-only content lost on recreate",
                    self.descriptor.label
                ),
            }
            state.native = Some(native);
        }
        state.native_generation += 1;
        state.mark_clean();
        Ok(())
    }

    /// Release client and native storage.
    ///
    /// Further mutation panics.
    pub fn destroy(&self) {
        let mut state = self.state.lock();
        state.native = None;
        state.client = None;
        state.element_count = 0;
        state.capacity = 0;
        state.mark_clean();
        state.destroyed = true;
    }

    /// Returns `true` once [`destroy`](Self::destroy) ran.
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Copy of the live elements from client storage.
    pub fn client_bytes(&self) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let len = state.element_count as usize * self.element_size() as usize;
        state.client.as_ref().map(|client| client[..len].to_vec())
    }

    /// Read the live elements back from native storage.
    ///
    /// This blocks until the GPU is idle.
    pub fn read_native(&self) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let native = state.native.as_ref()?;
        Some(self.backend.read_buffer(native, 0, state.element_count as u64 * self.element_size() as u64))
    }

    /// Returns `true` if native storage is allocated.
    pub fn has_native(&self) -> bool {
        self.state.lock().native.is_some()
    }

    /// Counter bumped every time native storage is reallocated.
    pub fn native_generation(&self) -> u64 {
        self.state.lock().native_generation
    }

    pub(crate) fn native_buffer(&self) -> Option<GpuBuffer> {
        self.state.lock().native.clone()
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &AttributeBufferDescriptor {
        &self.descriptor
    }

    /// Bytes per element.
    pub fn element_size(&self) -> u32 {
        self.descriptor.element_size
    }

    /// Number of live elements.
    pub fn element_count(&self) -> u32 {
        self.state.lock().element_count
    }

    /// Number of allocated element slots.
    pub fn capacity(&self) -> u32 {
        self.state.lock().capacity
    }

    /// Allocation strategy hint.
    pub fn mode(&self) -> BufferMode {
        self.descriptor.mode
    }

    /// Bind target.
    pub fn intent(&self) -> BufferIntent {
        self.descriptor.intent
    }

    /// Index format for index buffers.
    pub fn index_format(&self) -> Option<IndexFormat> {
        self.descriptor.intent.index_format()
    }

    /// Where elements are stored.
    pub fn storage(&self) -> BufferStorage {
        self.descriptor.storage
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Returns `true` if a client-side copy is kept.
    pub fn has_client_storage(&self) -> bool {
        self.state.lock().client.is_some()
    }

    fn source<'a>(&self, data: Option<&'a [u8]>, count: u32) -> WriteSource<'a> {
        match data {
            Some(bytes) => {
                assert_eq!(
                    bytes.len() as u64,
                    count as u64 * self.element_size() as u64,
                    "data holds {} bytes, expected {} elements of {} bytes",
                    bytes.len(),
                    count,
                    self.element_size()
                );
                WriteSource::Bytes(bytes)
            }
            None => WriteSource::Zeroed,
        }
    }

    fn assert_alive(&self, state: &BufferState) {
        assert!(
            !state.destroyed,
            "AttributeBuffer {:?} used after destroy()",
            self.descriptor.label
        );
    }

    fn assert_client(&self, state: &BufferState, operation: &str) {
        self.assert_alive(state);
        assert!(
            state.client.is_some(),
            "{operation} requires client storage, but {:?} is native-only",
            self.descriptor.label
        );
    }

    /// Number of elements one `T` spans.
    fn elements_per<T>(&self) -> u32 {
        let size = std::mem::size_of::<T>();
        let element_size = self.element_size() as usize;
        assert!(
            size != 0 && size % element_size == 0,
            "element type is {} bytes, not a multiple of the {}-byte buffer elements",
            size,
            element_size
        );
        (size / element_size) as u32
    }

    fn write(
        &self,
        state: &mut BufferState,
        source: WriteSource<'_>,
        start: u32,
        count: u32,
        defer: bool,
    ) -> Result<(), GraphicsError> {
        self.assert_alive(state);
        if count == 0 {
            return Ok(());
        }
        let end = start
            .checked_add(count)
            .unwrap_or_else(|| panic!("element range {start}+{count} overflows"));

        state.mark_dirty(start..end);
        let defer = defer && state.client.is_some();
        self.reserve(state, end)?;

        let es = self.element_size() as usize;
        let bytes = start as usize * es..end as usize * es;
        match state.client.as_mut() {
            Some(client) => match source {
                WriteSource::Bytes(data) => client[bytes].copy_from_slice(data),
                WriteSource::Zeroed => client[bytes].fill(0),
                WriteSource::SelfCopy(from) => client.copy_within(
                    from as usize * es..(from + count) as usize * es,
                    bytes.start,
                ),
            },
            None => {
                let zeros;
                let data = match source {
                    WriteSource::Bytes(data) => data,
                    WriteSource::Zeroed => {
                        zeros = vec![0u8; bytes.len()];
                        &zeros
                    }
                    WriteSource::SelfCopy(_) => unreachable!("self copies require client storage"),
                };
                self.write_native(state, bytes.start as u64, data)?;
            }
        }
        state.element_count = state.element_count.max(end);

        if state.client.is_none() {
            state.mark_clean();
        } else if !defer && source.has_data() && state.native.is_some() {
            self.commit_locked(state)?;
        }
        Ok(())
    }

    fn reserve(&self, state: &mut BufferState, required: u32) -> Result<(), GraphicsError> {
        if required > state.capacity {
            self.grow(state, required)?;
        }
        Ok(())
    }

    fn grow(&self, state: &mut BufferState, capacity: u32) -> Result<(), GraphicsError> {
        let es = self.element_size() as usize;
        match state.client.as_mut() {
            Some(client) => client.resize(capacity as usize * es, 0),
            None => {
                let native = self.allocate_native(capacity)?;
                if let Some(old) = state.native.as_ref() {
                    self.backend.copy_buffer(old, &native, old.size())?;
                }
                log::debug!(
                    "AttributeBuffer {:?}: native-only growth {} -> {} elements",
                    self.descriptor.label,
                    state.capacity,
                    capacity
                );
                state.native = Some(native);
                state.native_generation += 1;
            }
        }
        state.capacity = capacity;
        Ok(())
    }

    fn allocate_native(&self, capacity: u32) -> Result<GpuBuffer, GraphicsError> {
        let size = align_up(
            capacity as u64 * self.element_size() as u64,
            self.backend.upload_alignment(),
        );
        let descriptor =
            NativeBufferDescriptor::new(size, self.descriptor.intent.usage(), self.descriptor.mode)
                .with_label(self.descriptor.label.as_deref());
        self.backend.create_buffer(&descriptor)
    }

    /// Write to native storage, patching partial alignment units in place.
    fn write_native(&self, state: &BufferState, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        let Some(native) = state.native.as_ref() else {
            return Err(GraphicsError::Internal(
                "native-only buffer has no native storage".to_string(),
            ));
        };

        let alignment = self.backend.upload_alignment();
        let end = offset + data.len() as u64;
        if offset % alignment == 0 && end % alignment == 0 {
            return self.backend.write_buffer(native, offset, data);
        }

        let window_start = offset - offset % alignment;
        let window_end = align_up(end, alignment).min(native.size());
        let mut window = self
            .backend
            .read_buffer(native, window_start, window_end - window_start);
        let lead = (offset - window_start) as usize;
        window[lead..lead + data.len()].copy_from_slice(data);
        self.backend.write_buffer(native, window_start, &window)
    }

    fn commit_locked(&self, state: &mut BufferState) -> Result<(), GraphicsError> {
        assert!(
            state.commit != CommitState::Clean,
            "commit() on clean buffer {:?}: nothing was written since the last commit",
            self.descriptor.label
        );
        assert!(
            state.commit != CommitState::Committing,
            "commit() re-entered on buffer {:?}",
            self.descriptor.label
        );

        state.commit = CommitState::Committing;
        match self.upload(state) {
            Ok(()) => {
                state.mark_clean();
                Ok(())
            }
            Err(e) => {
                state.commit = CommitState::DirtyPending;
                Err(e)
            }
        }
    }

    fn upload(&self, state: &mut BufferState) -> Result<(), GraphicsError> {
        let Some(client) = state.client.as_ref() else {
            return Ok(());
        };
        if state.capacity == 0 {
            return Ok(());
        }

        let alignment = self.backend.upload_alignment();
        let required = align_up(client.len() as u64, alignment);
        let reallocate = state
            .native
            .as_ref()
            .is_none_or(|native| native.size() < required);

        if reallocate {
            let native = self.allocate_native(state.capacity)?;
            self.backend.write_buffer(&native, 0, client)?;
            log::debug!(
                "AttributeBuffer {:?}: reallocated native storage ({} bytes)",
                self.descriptor.label,
                native.size()
            );
            state.native = Some(native);
            state.native_generation += 1;
            return Ok(());
        }

        let Some(range) = state.dirty.clone() else {
            return Ok(());
        };
        let es = self.element_size() as u64;
        let start = range.start as u64 * es;
        let end = (range.end.min(state.capacity) as u64 * es).min(client.len() as u64);
        if start >= end {
            return Ok(());
        }
        let start = start - start % alignment;
        let end = align_up(end, alignment).min(client.len() as u64);

        if let Some(native) = state.native.as_ref() {
            log::trace!(
                "AttributeBuffer {:?}: commit bytes {}..{}",
                self.descriptor.label,
                start,
                end
            );
            self.backend
                .write_buffer(native, start, &client[start as usize..end as usize])?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for AttributeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AttributeBuffer")
            .field("label", &self.descriptor.label)
            .field("element_size", &self.descriptor.element_size)
            .field("element_count", &state.element_count)
            .field("capacity", &state.capacity)
            .field("intent", &self.descriptor.intent)
            .field("commit", &state.commit)
            .finish()
    }
}

// Ensure AttributeBuffer is Send + Sync
static_assertions::assert_impl_all!(AttributeBuffer: Send, Sync);

fn align_up(value: u64, alignment: u64) -> u64 {
    value.next_multiple_of(alignment.max(1))
}

/// Exchange the byte ranges `[source, source + len)` and `[dest, dest + len)`.
///
/// When the ranges overlap only the displaced part goes through scratch
/// memory; the source block is moved in place.
fn swap_ranges(bytes: &mut [u8], source: usize, dest: usize, len: usize) {
    if source == dest || len == 0 {
        return;
    }

    if source + len <= dest || dest + len <= source {
        let (low, high) = (source.min(dest), source.max(dest));
        let (head, tail) = bytes.split_at_mut(high);
        head[low..low + len].swap_with_slice(&mut tail[..len]);
    } else if source < dest {
        let scratch = bytes[source + len..dest + len].to_vec();
        bytes.copy_within(source..source + len, dest);
        bytes[source..source + scratch.len()].copy_from_slice(&scratch);
    } else {
        let scratch = bytes[dest..source].to_vec();
        bytes.copy_within(source..source + len, dest);
        bytes[dest + len..dest + len + scratch.len()].copy_from_slice(&scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn backend() -> (Arc<DummyBackend>, Arc<dyn GpuBackend>) {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GpuBackend> = dummy.clone();
        (dummy, backend)
    }

    fn int_buffer(backend: &Arc<dyn GpuBackend>, values: &[i32]) -> Arc<AttributeBuffer> {
        let buffer =
            AttributeBuffer::new(backend.clone(), AttributeBufferDescriptor::new(4, 0)).unwrap();
        buffer.set_typed(values, true).unwrap();
        buffer
    }

    /// Swap through two independent temporaries.
    fn reference_swap(values: &mut [i32], source: usize, dest: usize, count: usize) {
        let a = values[source..source + count].to_vec();
        let b = values[dest..dest + count].to_vec();
        if source < dest {
            values[source..source + count].copy_from_slice(&b);
            values[dest..dest + count].copy_from_slice(&a);
        } else {
            values[dest..dest + count].copy_from_slice(&a);
            values[source..source + count].copy_from_slice(&b);
        }
    }

    #[test]
    #[should_panic(expected = "element size")]
    fn test_zero_element_size_panics() {
        let (_, backend) = backend();
        let _ = AttributeBuffer::new(backend, AttributeBufferDescriptor::new(0, 4));
    }

    #[test]
    #[should_panic(expected = "element size")]
    fn test_oversized_element_panics() {
        let (_, backend) = backend();
        let _ = AttributeBuffer::new(backend, AttributeBufferDescriptor::new(MAX_ELEMENT_SIZE, 4));
    }

    #[test]
    fn test_new_buffer_is_clean() {
        let (dummy, backend) = backend();
        let buffer =
            AttributeBuffer::new(backend, AttributeBufferDescriptor::new(12, 8)).unwrap();
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.element_count(), 0);
        assert_eq!(buffer.capacity_in_bytes(), 96);
        assert!(!buffer.is_dirty());
        assert!(buffer.has_native());
        assert_eq!(dummy.stats().buffers_created, 1);
    }

    #[test]
    fn test_update_extends_count() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1, 2, 3]);
        buffer.update_typed(&[9, 9], 2, true).unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![1, 2, 9, 9]);

        // Writes inside the range never shrink it.
        buffer.update_typed(&[7], 0, true).unwrap();
        assert_eq!(buffer.element_count(), 4);
        assert_eq!(buffer.size(), 16);
    }

    #[test]
    fn test_update_with_no_data_zero_fills() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1, 2, 3, 4]);
        buffer.update_elements(None, 1, 2, true).unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![1, 0, 0, 4]);
    }

    #[test]
    fn test_zero_count_is_noop() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1]);
        buffer.commit().unwrap();
        buffer.update_elements(Some(&[]), 5, 0, true).unwrap();
        assert!(!buffer.is_dirty());
        assert_eq!(buffer.element_count(), 1);
    }

    #[test]
    #[should_panic(expected = "expected 2 elements")]
    fn test_data_length_mismatch_panics() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[]);
        let _ = buffer.update_elements(Some(&[0u8; 4]), 0, 2, true);
    }

    #[test]
    fn test_insert_shifts_tail() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[0, 1, 2, 3]);
        buffer
            .insert_elements(Some(bytemuck::cast_slice(&[7i32, 8])), 1, 2, true)
            .unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![0, 7, 8, 1, 2, 3]);

        // Inserting at the end behaves like an append.
        buffer
            .insert_elements(Some(bytemuck::cast_slice(&[5i32])), 6, 1, true)
            .unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![0, 7, 8, 1, 2, 3, 5]);
    }

    #[test]
    fn test_remove_shifts_tail() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[0, 1, 2, 3, 4]);
        buffer.remove_elements(1, 2, true).unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![0, 3, 4]);
        assert_eq!(buffer.capacity(), 5);
    }

    #[test]
    #[should_panic(expected = "exceeds element count")]
    fn test_remove_out_of_range_panics() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[0, 1, 2]);
        let _ = buffer.remove_elements(2, 2, true);
    }

    #[test]
    fn test_append_then_remove_restores_count() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[4, 5, 6]);
        buffer.append_elements(None, 3, true).unwrap();
        assert_eq!(buffer.element_count(), 6);
        buffer.remove_elements(3, 3, true).unwrap();
        assert_eq!(buffer.element_count(), 3);
        assert_eq!(buffer.read_typed::<i32>(), vec![4, 5, 6]);
    }

    #[test]
    fn test_swap_overlapping_forward() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        buffer.swap_elements(2, 5, 4);
        assert_eq!(
            buffer.read_typed::<i32>(),
            vec![0, 1, 6, 7, 8, 2, 3, 4, 5, 9]
        );
    }

    #[test]
    fn test_swap_matches_reference() {
        let (_, backend) = backend();
        let initial: Vec<i32> = (0..10).collect();
        for (source, dest, count) in [(1, 6, 3), (0, 9, 1), (3, 4, 1), (2, 4, 4), (6, 3, 4), (7, 2, 2)] {
            let buffer = int_buffer(&backend, &initial);
            buffer.swap_elements(source, dest, count);

            let mut expected = initial.clone();
            if source + count <= dest || dest + count <= source {
                reference_swap(&mut expected, source as usize, dest as usize, count as usize);
            }
            if source + count > dest && dest + count > source {
                // Overlap moves the source block to dest and keeps the rest in order.
                let block: Vec<i32> = initial[source as usize..(source + count) as usize].to_vec();
                let mut rest: Vec<i32> = initial
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| {
                        let i = *i as u32;
                        (i < source || i >= source + count) && i >= source.min(dest) && i < source.max(dest) + count
                    })
                    .map(|(_, v)| *v)
                    .collect();
                let low = source.min(dest) as usize;
                let mut span = Vec::new();
                if source < dest {
                    span.append(&mut rest);
                    span.extend(&block);
                } else {
                    span.extend(&block);
                    span.append(&mut rest);
                }
                expected[low..low + span.len()].copy_from_slice(&span);
            }
            assert_eq!(
                buffer.read_typed::<i32>(),
                expected,
                "swap({source}, {dest}, {count})"
            );
        }
    }

    #[test]
    fn test_swap_same_range_is_noop() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1, 2, 3]);
        buffer.commit().unwrap();
        buffer.swap_elements(1, 1, 2);
        assert!(!buffer.is_dirty());
        assert_eq!(buffer.read_typed::<i32>(), vec![1, 2, 3]);
    }

    #[test]
    #[should_panic(expected = "swap_elements")]
    fn test_swap_out_of_range_panics() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1, 2, 3]);
        buffer.swap_elements(0, 2, 2);
    }

    #[test]
    fn test_move_overwrites_dest() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[0, 1, 2, 3, 4]);
        buffer.move_elements(0, 2, 3).unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![0, 1, 0, 1, 2]);

        // Moving past the end extends the buffer.
        buffer.move_elements(3, 5, 2).unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![0, 1, 0, 1, 2, 1, 2]);
    }

    #[test]
    fn test_capacity_is_monotonic() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[10, 20]);
        buffer.set_capacity(16, true).unwrap();
        assert_eq!(buffer.capacity(), 16);
        buffer.set_capacity(4, false).unwrap();
        assert_eq!(buffer.capacity(), 16);
        buffer.add_capacity(4, false).unwrap();
        assert_eq!(buffer.capacity(), 20);
        assert_eq!(buffer.read_typed::<i32>(), vec![10, 20]);
    }

    #[test]
    fn test_capacity_growth_reallocates_on_commit() {
        let (dummy, backend) = backend();
        let buffer = int_buffer(&backend, &[10, 20]);
        buffer.commit().unwrap();
        let generation = buffer.native_generation();
        dummy.reset_stats();

        buffer.set_capacity(64, true).unwrap();
        assert!(buffer.is_dirty());
        buffer.commit().unwrap();

        assert_eq!(dummy.stats().buffers_created, 1);
        assert!(buffer.native_generation() > generation);
        assert!(buffer.native_buffer().unwrap().size() >= 64 * 4);
        assert_eq!(buffer.read_native(), Some(bytemuck::cast_slice(&[10i32, 20]).to_vec()));

        // Ignored requests leave the buffer clean.
        buffer.set_capacity(8, true).unwrap();
        assert!(!buffer.is_dirty());
    }

    #[test]
    fn test_move_commits_when_native_exists() {
        let (dummy, backend) = backend();
        let buffer = int_buffer(&backend, &[0, 1, 2, 3, 4]);
        buffer.move_elements(0, 1, 1).unwrap();
        assert!(buffer.is_dirty());

        buffer.commit().unwrap();
        dummy.reset_stats();
        buffer.move_elements(3, 0, 2).unwrap();
        assert!(!buffer.is_dirty());
        assert_eq!(dummy.stats().buffer_writes, 1);
        assert_eq!(
            buffer.read_native(),
            Some(bytemuck::cast_slice(&[3i32, 4, 2, 3, 4]).to_vec())
        );
    }

    #[test]
    fn test_typed_values_span_elements() {
        let (_, backend) = backend();
        let buffer =
            AttributeBuffer::new(backend, AttributeBufferDescriptor::new(4, 0)).unwrap();
        buffer.set_typed(&[[1i32, 2], [3, 4]], true).unwrap();
        assert_eq!(buffer.element_count(), 4);

        buffer.insert_typed(&[[5i32, 6]], 1, true).unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![1, 2, 5, 6, 3, 4]);

        buffer.swap_typed::<[i32; 2]>(0, 2, 1);
        assert_eq!(buffer.read_typed::<[i32; 2]>(), vec![[3, 4], [5, 6], [1, 2]]);

        buffer.move_typed::<[i32; 2]>(2, 0, 1).unwrap();
        buffer.update_typed(&[[7i32, 8]], 1, true).unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![1, 2, 7, 8, 1, 2]);

        buffer.remove_typed::<[i32; 2]>(0, 2, true).unwrap();
        buffer.append_typed(&[[9i32, 9]], true).unwrap();
        assert_eq!(buffer.read_typed::<i32>(), vec![1, 2, 9, 9]);

        let capacity = buffer.capacity();
        buffer.add_capacity_typed::<[i32; 4]>(2, true).unwrap();
        assert_eq!(buffer.capacity(), capacity + 8);
    }

    #[test]
    #[should_panic(expected = "not a multiple")]
    fn test_typed_size_mismatch_panics() {
        let (_, backend) = backend();
        let buffer =
            AttributeBuffer::new(backend, AttributeBufferDescriptor::new(8, 0)).unwrap();
        let _ = buffer.append_typed(&[1i32], true);
    }

    #[test]
    #[should_panic(expected = "do not split")]
    fn test_read_typed_partial_value_panics() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1, 2, 3]);
        buffer.read_typed::<[i32; 2]>();
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1, 2, 3]);
        buffer.commit().unwrap();
        buffer.clear();
        assert_eq!(buffer.element_count(), 0);
        assert_eq!(buffer.capacity(), 3);
        assert!(buffer.is_dirty());
    }

    #[test]
    fn test_commit_round_trip() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[3, 1, 4, 1, 5]);
        assert!(buffer.is_dirty());
        buffer.commit().unwrap();
        assert!(!buffer.is_dirty());
        assert_eq!(buffer.read_native(), buffer.client_bytes());
    }

    #[test]
    #[should_panic(expected = "clean buffer")]
    fn test_redundant_commit_panics() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1]);
        buffer.commit().unwrap();
        let _ = buffer.commit();
    }

    #[test]
    fn test_partial_commit_uploads_dirty_range() {
        let (dummy, backend) = backend();
        let buffer = AttributeBuffer::new(backend, AttributeBufferDescriptor::new(4, 8)).unwrap();
        buffer.set_typed(&[0i32; 8], true).unwrap();
        buffer.commit().unwrap();

        dummy.reset_stats();
        buffer.update_typed(&[42i32], 5, true).unwrap();
        buffer.commit().unwrap();

        let stats = dummy.stats();
        assert_eq!(stats.buffer_writes, 1);
        assert_eq!(stats.bytes_written, 4);
        assert_eq!(stats.buffers_created, 0);
    }

    #[test]
    fn test_growth_reallocates_native() {
        let (dummy, backend) = backend();
        let buffer = AttributeBuffer::new(backend, AttributeBufferDescriptor::new(4, 2)).unwrap();
        let generation = buffer.native_generation();
        buffer.set_typed(&[1i32, 2, 3, 4], true).unwrap();
        buffer.commit().unwrap();

        assert_eq!(dummy.stats().buffers_created, 2);
        assert!(buffer.native_generation() > generation);
        assert_eq!(buffer.read_native(), buffer.client_bytes());
    }

    #[test]
    fn test_immediate_commit() {
        let (dummy, backend) = backend();
        let buffer = AttributeBuffer::new(backend, AttributeBufferDescriptor::new(4, 4)).unwrap();
        buffer.set_typed(&[1i32, 2], false).unwrap();
        assert!(!buffer.is_dirty());
        assert_eq!(dummy.stats().buffer_writes, 1);

        // Zero-fills are never committed eagerly.
        buffer.append_elements(None, 1, false).unwrap();
        assert!(buffer.is_dirty());
    }

    #[test]
    fn test_set_dirty_marks_everything() {
        let (dummy, backend) = backend();
        let buffer = int_buffer(&backend, &[1, 2, 3]);
        buffer.commit().unwrap();
        dummy.reset_stats();

        buffer.set_dirty(true);
        assert_eq!(buffer.commit_state(), CommitState::DirtyPending);
        buffer.commit().unwrap();
        assert_eq!(dummy.stats().bytes_written, 12);

        buffer.update_typed(&[0i32], 0, true).unwrap();
        buffer.set_dirty(false);
        assert!(!buffer.is_dirty());
    }

    #[test]
    fn test_native_only_writes_immediately() {
        let (dummy, backend) = backend();
        let buffer = AttributeBuffer::new(
            backend,
            AttributeBufferDescriptor::new(2, 2).with_storage(BufferStorage::NativeOnly),
        )
        .unwrap();
        assert!(!buffer.has_client_storage());

        buffer.set_typed(&[1u16, 2], true).unwrap();
        assert!(!buffer.is_dirty());

        // Growing past the capacity copies the native content over.
        buffer.append_typed(&[3u16], true).unwrap();
        assert_eq!(buffer.read_typed::<u16>(), vec![1, 2, 3]);
        assert_eq!(dummy.stats().buffer_copies, 1);
    }

    #[test]
    #[should_panic(expected = "requires client storage")]
    fn test_native_only_rejects_insert() {
        let (_, backend) = backend();
        let buffer = AttributeBuffer::new(
            backend,
            AttributeBufferDescriptor::new(4, 2).with_storage(BufferStorage::NativeOnly),
        )
        .unwrap();
        let _ = buffer.insert_elements(None, 0, 1, true);
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let dummy = Arc::new(DummyBackend::new().with_allocation_limit(16));
        let backend: Arc<dyn GpuBackend> = dummy;
        let buffer = AttributeBuffer::new(backend, AttributeBufferDescriptor::new(4, 2)).unwrap();
        buffer.set_typed(&[0i32; 8], true).unwrap();

        let err = buffer.commit().unwrap_err();
        assert_eq!(err, GraphicsError::AllocationFailed { requested: 32 });
        assert_eq!(buffer.commit_state(), CommitState::DirtyPending);
    }

    #[test]
    fn test_recreate_reuploads_client_content() {
        let (dummy, backend) = backend();
        let buffer = int_buffer(&backend, &[5, 6, 7]);
        buffer.commit().unwrap();
        let generation = buffer.native_generation();
        dummy.reset_stats();

        buffer.recreate().unwrap();
        assert_eq!(dummy.stats().buffers_created, 1);
        assert!(buffer.native_generation() > generation);
        assert_eq!(buffer.read_native(), buffer.client_bytes());
    }

    #[test]
    #[should_panic(expected = "after destroy")]
    fn test_destroyed_buffer_rejects_writes() {
        let (_, backend) = backend();
        let buffer = int_buffer(&backend, &[1]);
        buffer.destroy();
        assert!(buffer.is_destroyed());
        let _ = buffer.update_typed(&[2i32], 0, true);
    }

    #[test]
    fn test_swap_ranges_disjoint() {
        let mut bytes = [0u8, 1, 2, 3, 4, 5];
        swap_ranges(&mut bytes, 4, 0, 2);
        assert_eq!(bytes, [4, 5, 2, 3, 0, 1]);
    }
}
