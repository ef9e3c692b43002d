//! Vertex array emulation and draw recording for the wgpu backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::types::{AttributeBinding, DrawCall, IndexFormat, NativeBufferDescriptor};

use super::super::{GpuBackend, GpuBuffer, GpuVertexArray};
use super::WgpuBackend;
use super::conversion::{convert_index_format, convert_vertex_format};

/// Attribute and index bindings captured from bind calls.
#[derive(Clone, Default)]
pub struct VertexBindings {
    /// Attribute location → (buffer, binding).
    pub attributes: BTreeMap<u32, (Arc<wgpu::Buffer>, AttributeBinding)>,
    /// Index buffer and format.
    pub index: Option<(Arc<wgpu::Buffer>, IndexFormat)>,
}

impl VertexBindings {
    /// Group attributes into vertex buffer slots.
    ///
    /// Attributes sourced from the same buffer with the same stride share a
    /// slot; slots are ordered by their lowest attribute location.
    pub fn slots(&self) -> Result<Vec<VertexSlot>, GraphicsError> {
        let mut slots: Vec<VertexSlot> = Vec::new();
        for (buffer, binding) in self.attributes.values() {
            let format = convert_vertex_format(&binding.attribute).ok_or_else(|| {
                GraphicsError::FeatureNotSupported(format!(
                    "vertex format {:?}x{} (normalized: {})",
                    binding.attribute.data_type,
                    binding.attribute.components,
                    binding.attribute.normalized
                ))
            })?;
            let attribute = wgpu::VertexAttribute {
                format,
                offset: binding.attribute.offset as u64,
                shader_location: binding.attribute.index,
            };

            let stride = binding.stride as u64;
            match slots
                .iter_mut()
                .find(|slot| Arc::ptr_eq(&slot.buffer, buffer) && slot.stride == stride)
            {
                Some(slot) => slot.attributes.push(attribute),
                None => slots.push(VertexSlot {
                    buffer: buffer.clone(),
                    stride,
                    attributes: vec![attribute],
                }),
            }
        }
        Ok(slots)
    }
}

impl std::fmt::Debug for VertexBindings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VertexBindings")
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("index", &self.index.as_ref().map(|(_, format)| format))
            .finish()
    }
}

/// One vertex buffer slot of a draw.
#[derive(Debug, Clone)]
pub struct VertexSlot {
    /// Source buffer.
    pub buffer: Arc<wgpu::Buffer>,
    /// Bytes between consecutive vertices.
    pub stride: u64,
    /// Attributes fetched from this buffer.
    pub attributes: Vec<wgpu::VertexAttribute>,
}

impl VertexSlot {
    /// Layout for pipeline creation.
    pub fn layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }
}

/// Emulated vertex array object: remembers bindings between draws.
#[derive(Default)]
pub struct EmulatedVertexArray {
    bindings: Mutex<VertexBindings>,
}

impl EmulatedVertexArray {
    /// Bindings currently recorded in this vertex array.
    pub fn bindings(&self) -> VertexBindings {
        self.bindings.lock().clone()
    }
}

#[derive(Default)]
pub(super) struct CurrentBindings {
    bound: Option<Arc<EmulatedVertexArray>>,
    loose: VertexBindings,
}

impl CurrentBindings {
    fn with_state<R>(&mut self, f: impl FnOnce(&mut VertexBindings) -> R) -> R {
        match self.bound.as_ref() {
            Some(vao) => f(&mut vao.bindings.lock()),
            None => f(&mut self.loose),
        }
    }
}

/// A draw captured by the backend, ready to be encoded into a render pass.
#[derive(Debug, Clone)]
pub struct RecordedDraw {
    /// The draw parameters.
    pub call: DrawCall,
    /// Vertex buffer slots, in slot order.
    pub slots: Vec<VertexSlot>,
    /// Index buffer for indexed draws.
    pub index: Option<(Arc<wgpu::Buffer>, IndexFormat)>,
}

impl RecordedDraw {
    /// Vertex buffer layouts matching [`Self::slots`], for building a
    /// compatible render pipeline.
    pub fn vertex_buffer_layouts(&self) -> Vec<wgpu::VertexBufferLayout<'_>> {
        self.slots.iter().map(VertexSlot::layout).collect()
    }

    /// Primitive topology of the draw.
    pub fn topology(&self) -> wgpu::PrimitiveTopology {
        super::conversion::convert_topology(self.call.topology)
    }
}

/// Encode recorded draws into a render pass.
///
/// The caller sets a pipeline whose vertex layouts and topology match each
/// draw before calling this.
pub fn encode_draws(draws: &[RecordedDraw], pass: &mut wgpu::RenderPass<'_>) {
    for draw in draws {
        for (slot, vertex) in draw.slots.iter().enumerate() {
            pass.set_vertex_buffer(slot as u32, vertex.buffer.slice(..));
        }
        match (&draw.index, draw.call.index_format) {
            (Some((buffer, format)), Some(_)) => {
                pass.set_index_buffer(buffer.slice(..), convert_index_format(*format));
                pass.draw_indexed(draw.call.range(), 0, 0..1);
            }
            _ => pass.draw(draw.call.range(), 0..1),
        }
    }
}

fn native_buffer(buffer: &GpuBuffer) -> Option<Arc<wgpu::Buffer>> {
    match buffer {
        GpuBuffer::Wgpu { buffer, .. } => Some(buffer.clone()),
        GpuBuffer::Dummy(_) => None,
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu Backend"
    }

    fn upload_alignment(&self) -> u64 {
        wgpu::COPY_BUFFER_ALIGNMENT
    }

    fn supports_vertex_arrays(&self) -> bool {
        true
    }

    fn create_buffer(
        &self,
        descriptor: &NativeBufferDescriptor,
    ) -> Result<GpuBuffer, GraphicsError> {
        self.create_wgpu_buffer(descriptor)
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        self.write_wgpu_buffer(buffer, offset, data)
    }

    fn copy_buffer(
        &self,
        source: &GpuBuffer,
        destination: &GpuBuffer,
        size: u64,
    ) -> Result<(), GraphicsError> {
        self.copy_wgpu_buffer(source, destination, size)
    }

    fn read_buffer(&self, buffer: &GpuBuffer, offset: u64, size: u64) -> Vec<u8> {
        self.read_wgpu_buffer(buffer, offset, size)
    }

    fn create_vertex_array(&self) -> Result<Option<GpuVertexArray>, GraphicsError> {
        Ok(Some(GpuVertexArray::Wgpu(Arc::new(
            EmulatedVertexArray::default(),
        ))))
    }

    fn bind_vertex_array(&self, vertex_array: Option<&GpuVertexArray>) {
        let mut current = self.current.lock();
        match vertex_array {
            Some(GpuVertexArray::Wgpu(vao)) => current.bound = Some(vao.clone()),
            Some(GpuVertexArray::Dummy(_)) => {
                log::warn!("WgpuBackend: ignoring bind of a dummy vertex array");
            }
            None => {
                current.bound = None;
                current.loose = VertexBindings::default();
            }
        }
    }

    fn bind_attribute(&self, buffer: &GpuBuffer, binding: &AttributeBinding) {
        let Some(buffer) = native_buffer(buffer) else {
            log::warn!("WgpuBackend: ignoring attribute bound to a non-wgpu buffer");
            return;
        };
        self.current.lock().with_state(|state| {
            state
                .attributes
                .insert(binding.attribute.index, (buffer, *binding));
        });
    }

    fn bind_index_buffer(&self, buffer: &GpuBuffer, format: IndexFormat) {
        let Some(buffer) = native_buffer(buffer) else {
            log::warn!("WgpuBackend: ignoring non-wgpu index buffer");
            return;
        };
        self.current
            .lock()
            .with_state(|state| state.index = Some((buffer, format)));
    }

    fn clear_bindings(&self) {
        self.current
            .lock()
            .with_state(|state| *state = VertexBindings::default());
    }

    fn draw(&self, call: &DrawCall) -> Result<(), GraphicsError> {
        let bindings = self.current.lock().with_state(|state| state.clone());
        if call.is_indexed() && bindings.index.is_none() {
            return Err(GraphicsError::InvalidParameter(
                "indexed draw without an index buffer".to_string(),
            ));
        }

        let slots = bindings.slots()?;
        log::trace!(
            "WgpuBackend: recorded draw {:?} range={:?} slots={}",
            call.topology,
            call.range(),
            slots.len()
        );
        self.recorded.lock().push(RecordedDraw {
            call: *call,
            slots,
            index: if call.is_indexed() {
                bindings.index
            } else {
                None
            },
        });
        Ok(())
    }
}
