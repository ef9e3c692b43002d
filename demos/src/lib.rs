//! # RedLilium PAL Demos
//!
//! Command line programs driving the PAL against a real or dummy backend.
//!
//! ## Available Demos
//!
//! - `pal_smoke` - Builds a small mesh, edits it and draws it, then reports what reached the backend

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
