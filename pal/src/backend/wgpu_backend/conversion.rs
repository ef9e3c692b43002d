//! Type conversions between PAL types and wgpu types.

use crate::types::{BufferUsage, IndexFormat, PrimitiveTopology, VertexAttribute, VertexDataType};

/// Convert BufferUsage flags to wgpu buffer usages.
pub fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut result = wgpu::BufferUsages::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= wgpu::BufferUsages::COPY_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= wgpu::BufferUsages::COPY_DST;
    }

    result
}

/// Convert IndexFormat to wgpu index format.
pub fn convert_index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

/// Convert PrimitiveTopology to wgpu primitive topology.
pub fn convert_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

/// Convert a vertex attribute to a wgpu vertex format.
///
/// Returns `None` for combinations wgpu cannot fetch (three-wide 8/16-bit
/// vectors, normalized 32-bit integers).
pub fn convert_vertex_format(attribute: &VertexAttribute) -> Option<wgpu::VertexFormat> {
    use wgpu::VertexFormat as F;

    let format = match (attribute.data_type, attribute.normalized, attribute.components) {
        (VertexDataType::Float, _, 1) => F::Float32,
        (VertexDataType::Float, _, 2) => F::Float32x2,
        (VertexDataType::Float, _, 3) => F::Float32x3,
        (VertexDataType::Float, _, 4) => F::Float32x4,

        (VertexDataType::UnsignedInt, false, 1) => F::Uint32,
        (VertexDataType::UnsignedInt, false, 2) => F::Uint32x2,
        (VertexDataType::UnsignedInt, false, 3) => F::Uint32x3,
        (VertexDataType::UnsignedInt, false, 4) => F::Uint32x4,
        (VertexDataType::Int, false, 1) => F::Sint32,
        (VertexDataType::Int, false, 2) => F::Sint32x2,
        (VertexDataType::Int, false, 3) => F::Sint32x3,
        (VertexDataType::Int, false, 4) => F::Sint32x4,

        (VertexDataType::UnsignedShort, false, 2) => F::Uint16x2,
        (VertexDataType::UnsignedShort, false, 4) => F::Uint16x4,
        (VertexDataType::UnsignedShort, true, 2) => F::Unorm16x2,
        (VertexDataType::UnsignedShort, true, 4) => F::Unorm16x4,
        (VertexDataType::Short, false, 2) => F::Sint16x2,
        (VertexDataType::Short, false, 4) => F::Sint16x4,
        (VertexDataType::Short, true, 2) => F::Snorm16x2,
        (VertexDataType::Short, true, 4) => F::Snorm16x4,

        (VertexDataType::UnsignedByte, false, 2) => F::Uint8x2,
        (VertexDataType::UnsignedByte, false, 4) => F::Uint8x4,
        (VertexDataType::UnsignedByte, true, 2) => F::Unorm8x2,
        (VertexDataType::UnsignedByte, true, 4) => F::Unorm8x4,
        (VertexDataType::Byte, false, 2) => F::Sint8x2,
        (VertexDataType::Byte, false, 4) => F::Sint8x4,
        (VertexDataType::Byte, true, 2) => F::Snorm8x2,
        (VertexDataType::Byte, true, 4) => F::Snorm8x4,

        _ => return None,
    };
    Some(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage() {
        let usage = convert_buffer_usage(BufferUsage::VERTEX | BufferUsage::COPY_DST);
        assert_eq!(
            usage,
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST
        );
    }

    #[test]
    fn test_vertex_format() {
        assert_eq!(
            convert_vertex_format(&VertexAttribute::float(0, 0, 3)),
            Some(wgpu::VertexFormat::Float32x3)
        );
        let color = VertexAttribute::new(1, 12, VertexDataType::UnsignedByte, 4).normalized();
        assert_eq!(
            convert_vertex_format(&color),
            Some(wgpu::VertexFormat::Unorm8x4)
        );
        let odd = VertexAttribute::new(2, 0, VertexDataType::UnsignedByte, 3);
        assert_eq!(convert_vertex_format(&odd), None);
    }
}
