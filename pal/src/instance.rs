//! Startup configuration.
//!
//! [`InstanceParameters`] decides which backend the
//! [`GraphicsInterface`](crate::GraphicsInterface) selects and how its
//! handle tables are seeded.

use crate::handle::DEFAULT_TABLE_CAPACITY;

/// Environment variable selecting the backend (`auto`, `dummy`, `wgpu`).
pub const BACKEND_ENV: &str = "REDLILIUM_PAL_BACKEND";

/// Environment variable enabling backend validation (`1`, `true`, `on`).
pub const VALIDATION_ENV: &str = "REDLILIUM_PAL_VALIDATION";

/// Which backend to create at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Use a GPU backend when one is available, otherwise the dummy backend.
    #[default]
    Auto,
    /// The no-GPU dummy backend.
    Dummy,
    /// The wgpu backend; fails if no adapter is available.
    Wgpu,
}

impl BackendType {
    /// Parse a backend name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "dummy" => Some(Self::Dummy),
            "wgpu" => Some(Self::Wgpu),
            _ => None,
        }
    }
}

/// Which native API wgpu should drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WgpuBackendType {
    /// Let wgpu pick the primary API for the platform.
    #[default]
    Auto,
    /// Vulkan.
    Vulkan,
    /// Metal (Apple platforms).
    Metal,
    /// Direct3D 12.
    Dx12,
    /// OpenGL / OpenGL ES.
    Gl,
}

#[cfg(feature = "wgpu-backend")]
impl WgpuBackendType {
    /// Convert to the wgpu backend mask.
    pub fn to_wgpu_backends(self) -> wgpu::Backends {
        match self {
            Self::Auto => wgpu::Backends::all(),
            Self::Vulkan => wgpu::Backends::VULKAN,
            Self::Metal => wgpu::Backends::METAL,
            Self::Dx12 => wgpu::Backends::DX12,
            Self::Gl => wgpu::Backends::GL,
        }
    }
}

/// Parameters for creating a [`GraphicsInterface`](crate::GraphicsInterface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceParameters {
    /// Backend to create.
    pub backend: BackendType,
    /// Native API used by the wgpu backend.
    pub wgpu_backend: WgpuBackendType,
    /// Enable backend validation layers.
    pub validation: bool,
    /// Initial slot count of each handle table.
    pub handle_table_capacity: usize,
}

impl Default for InstanceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            wgpu_backend: WgpuBackendType::Auto,
            validation: false,
            handle_table_capacity: DEFAULT_TABLE_CAPACITY,
        }
    }
}

impl InstanceParameters {
    /// Create parameters with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read parameters from [`BACKEND_ENV`] and [`VALIDATION_ENV`].
    ///
    /// Unknown values are logged and ignored.
    pub fn from_env() -> Self {
        let mut params = Self::default();
        if let Ok(name) = std::env::var(BACKEND_ENV) {
            match BackendType::from_name(&name) {
                Some(backend) => params.backend = backend,
                None => log::warn!("Ignoring unknown {}={:?}", BACKEND_ENV, name),
            }
        }
        if let Ok(value) = std::env::var(VALIDATION_ENV) {
            params.validation = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "on"
            );
        }
        params
    }

    /// Select the backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Select the native API used by wgpu.
    pub fn with_wgpu_backend(mut self, wgpu_backend: WgpuBackendType) -> Self {
        self.wgpu_backend = wgpu_backend;
        self
    }

    /// Enable or disable validation.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the initial slot count of each handle table.
    pub fn with_handle_table_capacity(mut self, capacity: usize) -> Self {
        self.handle_table_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = InstanceParameters::new();
        assert_eq!(params.backend, BackendType::Auto);
        assert_eq!(params.handle_table_capacity, 1000);
        assert!(!params.validation);
    }

    #[test]
    fn test_builder() {
        let params = InstanceParameters::new()
            .with_backend(BackendType::Dummy)
            .with_wgpu_backend(WgpuBackendType::Gl)
            .with_validation(true)
            .with_handle_table_capacity(16);
        assert_eq!(params.backend, BackendType::Dummy);
        assert_eq!(params.wgpu_backend, WgpuBackendType::Gl);
        assert!(params.validation);
        assert_eq!(params.handle_table_capacity, 16);
    }

    #[test]
    fn test_backend_from_name() {
        assert_eq!(BackendType::from_name("Dummy"), Some(BackendType::Dummy));
        assert_eq!(BackendType::from_name(" wgpu "), Some(BackendType::Wgpu));
        assert_eq!(BackendType::from_name("metal"), None);
    }
}
