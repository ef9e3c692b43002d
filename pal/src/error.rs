//! PAL error types.

use std::fmt;

use crate::handle::Handle;

/// Errors that can occur in the platform abstraction layer.
///
/// Contract violations (bad element sizes, mismatched stream lengths,
/// redundant commits, out-of-range removals) are not represented here: they
/// are programmer errors and panic at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the graphics backend.
    InitializationFailed(String),
    /// Failed to create a native resource.
    ResourceCreationFailed(String),
    /// A native allocation of the given size could not be satisfied.
    AllocationFailed {
        /// Requested size in bytes.
        requested: u64,
    },
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// The handle does not name a live object.
    InvalidHandle(Handle),
    /// A requested feature is not supported by the active backend.
    FeatureNotSupported(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::AllocationFailed { requested } => {
                write!(f, "native allocation of {requested} bytes failed")
            }
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::InvalidHandle(handle) => write!(f, "invalid handle {handle}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}
