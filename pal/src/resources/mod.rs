//! PAL resources.
//!
//! This module contains the resource types that rendering code draws with:
//! - [`AttributeBuffer`] - one stream of fixed-size vertex or index elements
//! - [`VertexArray`] - attribute buffers plus an optional index buffer
//!
//! Resources are reference-counted with [`Arc`] and can be shared across threads.
//! Each resource holds the backend it was created with.
//!
//! [`Arc`]: std::sync::Arc

mod attribute_buffer;
mod vertex_array;

pub use attribute_buffer::{AttributeBuffer, CommitState};
pub use vertex_array::VertexArray;
