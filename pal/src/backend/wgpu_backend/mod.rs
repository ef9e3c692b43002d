//! wgpu GPU backend implementation.
//!
//! This backend uses wgpu for cross-platform GPU access, supporting
//! Vulkan, Metal, DX12 and OpenGL ES.
//!
//! wgpu has no vertex array objects and no immediate-mode draw calls, so
//! both are emulated: an [`EmulatedVertexArray`] records the buffers bound
//! to each attribute location, and [`GpuBackend::draw`] records a
//! [`RecordedDraw`]. The renderer drains the recorded draws with
//! [`WgpuBackend::take_draws`] and replays them into its render pass with
//! [`encode_draws`].

pub(crate) mod conversion;
mod resources;
mod vertex_array;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::GraphicsError;
use crate::instance::InstanceParameters;

pub use vertex_array::{EmulatedVertexArray, RecordedDraw, VertexBindings, VertexSlot, encode_draws};

/// wgpu-based GPU backend.
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    current: Mutex<vertex_array::CurrentBindings>,
    recorded: Mutex<Vec<RecordedDraw>>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.adapter.get_info().name)
            .finish()
    }
}

impl WgpuBackend {
    /// Create a new wgpu backend with default parameters.
    pub fn new() -> Result<Self, GraphicsError> {
        Self::with_params(&InstanceParameters::default())
    }

    /// Create a new wgpu backend with custom parameters.
    pub fn with_params(params: &InstanceParameters) -> Result<Self, GraphicsError> {
        let backends = params.wgpu_backend.to_wgpu_backends();

        let mut flags = wgpu::InstanceFlags::default();
        if params.validation {
            flags |= wgpu::InstanceFlags::VALIDATION;
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            flags,
            backend_options: wgpu::BackendOptions::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("No compatible GPU adapter: {e}"))
        })?;

        log::info!("wgpu adapter: {:?}", adapter.get_info());

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("RedLilium PAL Device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GraphicsError::InitializationFailed(format!("Device creation failed: {e}")))?;

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            current: Mutex::new(vertex_array::CurrentBindings::default()),
            recorded: Mutex::new(Vec::new()),
        })
    }

    /// Get the wgpu adapter.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Get the wgpu device.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Get the wgpu queue.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Drain the draws recorded since the last call.
    pub fn take_draws(&self) -> Vec<RecordedDraw> {
        std::mem::take(&mut *self.recorded.lock())
    }
}
