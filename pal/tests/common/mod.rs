//! Common utilities for PAL integration tests.
//!
//! This module provides shared test infrastructure that can be reused
//! across different backend implementations.

use std::sync::Arc;

use redlilium_pal::{
    AttributeBufferDescriptor, BackendType, BufferHandle, DummyBackend, DummyStats,
    GraphicsInterface, InstanceParameters,
};
use redlilium_pal::backend::dummy::RecordedDraw;

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available GPU backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (no actual GPU operations).
    Dummy,
    /// WebGPU backend (via wgpu).
    WebGpu,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            // Dummy backend is always available
            Backend::Dummy => true,
            // WebGpu backend (wgpu) is available when the feature is enabled
            #[cfg(feature = "wgpu-backend")]
            Backend::WebGpu => true,
            #[cfg(not(feature = "wgpu-backend"))]
            Backend::WebGpu => false,
        }
    }

    /// Convert to InstanceParameters for creating a GraphicsInterface.
    pub fn to_instance_parameters(self) -> InstanceParameters {
        match self {
            Backend::Dummy => InstanceParameters::new().with_backend(BackendType::Dummy),
            Backend::WebGpu => InstanceParameters::new().with_backend(BackendType::Wgpu),
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// Test context owning a graphics interface for one backend.
pub struct TestContext {
    /// The backend being tested.
    #[allow(dead_code)]
    pub backend: Backend,
    /// The interface under test.
    pub gi: GraphicsInterface,
    /// Direct access to the dummy backend for call counters.
    dummy: Option<Arc<DummyBackend>>,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not available (not compiled in, or
    /// no GPU adapter on this machine).
    pub fn new(backend: Backend) -> Option<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        if !backend.is_available() {
            return None;
        }

        let params = backend.to_instance_parameters();
        match backend {
            Backend::Dummy => {
                let dummy = Arc::new(DummyBackend::new());
                let gi = GraphicsInterface::with_backend(dummy.clone(), &params);
                Some(Self {
                    backend,
                    gi,
                    dummy: Some(dummy),
                })
            }
            Backend::WebGpu => {
                let gi = GraphicsInterface::new(&params).ok()?;
                Some(Self {
                    backend,
                    gi,
                    dummy: None,
                })
            }
        }
    }

    /// Call counters, for the dummy backend only.
    #[allow(dead_code)]
    pub fn stats(&self) -> Option<DummyStats> {
        self.dummy.as_ref().map(|dummy| dummy.stats())
    }

    /// Reset the dummy backend's call counters.
    #[allow(dead_code)]
    pub fn reset_stats(&self) {
        if let Some(dummy) = &self.dummy {
            dummy.reset_stats();
        }
    }

    /// Draws recorded by the dummy backend.
    #[allow(dead_code)]
    pub fn draws(&self) -> Vec<RecordedDraw> {
        self.dummy
            .as_ref()
            .map(|dummy| dummy.draws())
            .unwrap_or_default()
    }

    /// Create a buffer of `i32` elements holding `values`.
    #[allow(dead_code)]
    pub fn int_buffer(&mut self, values: &[i32]) -> BufferHandle {
        let handle = self
            .gi
            .create_attribute_buffer(AttributeBufferDescriptor::new(4, 0))
            .expect("Failed to create buffer");
        self.gi
            .buffer(handle)
            .expect("Fresh handle must resolve")
            .set_typed(values, true)
            .expect("Failed to write buffer");
        handle
    }

    /// Read a buffer of `i32` elements back from client storage.
    #[allow(dead_code)]
    pub fn read_ints(&self, handle: BufferHandle) -> Vec<i32> {
        self.gi
            .buffer(handle)
            .expect("Handle must resolve")
            .read_typed()
    }
}

/// Deterministic pseudo-random sequence for property-style tests.
#[allow(dead_code)]
pub struct Lcg(u64);

#[allow(dead_code)]
impl Lcg {
    /// Create a sequence from a seed.
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Next value in `0..bound`.
    pub fn next_below(&mut self, bound: u32) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) % bound.max(1) as u64) as u32
    }
}
