//! Common types and descriptors for PAL resources.
//!
//! This module contains the buffer configuration enums, usage flags, vertex
//! attribute descriptors and the draw call record handed to backends.

mod buffer;
mod vertex;

pub use buffer::{
    AttributeBufferDescriptor, BufferIntent, BufferMode, BufferStorage, BufferUsage, IndexFormat,
    MAX_ELEMENT_SIZE, NativeBufferDescriptor,
};
pub use vertex::{AttributeBinding, DrawCall, PrimitiveTopology, VertexAttribute, VertexDataType};
