//! Vertex attribute descriptors and draw call records.

use super::buffer::IndexFormat;

/// Primitive topology of a vertex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Each vertex is a separate point.
    PointList,
    /// Every two vertices form a line.
    LineList,
    /// Vertices form a connected strip of lines.
    LineStrip,
    /// Every three vertices form a triangle.
    #[default]
    TriangleList,
    /// Vertices form a connected strip of triangles.
    TriangleStrip,
}

impl PrimitiveTopology {
    /// Get the number of vertices per primitive (for non-strip topologies).
    pub fn vertices_per_primitive(&self) -> Option<u32> {
        match self {
            Self::PointList => Some(1),
            Self::LineList => Some(2),
            Self::TriangleList => Some(3),
            Self::LineStrip | Self::TriangleStrip => None,
        }
    }

    /// Number of primitives produced by `count` vertices.
    pub fn primitive_count(&self, count: u32) -> u32 {
        match self {
            Self::PointList => count,
            Self::LineList => count / 2,
            Self::LineStrip => count.saturating_sub(1),
            Self::TriangleList => count / 3,
            Self::TriangleStrip => count.saturating_sub(2),
        }
    }
}

/// Component type of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexDataType {
    /// Signed 8-bit integer.
    Byte,
    /// Unsigned 8-bit integer.
    UnsignedByte,
    /// Signed 16-bit integer.
    Short,
    /// Unsigned 16-bit integer.
    UnsignedShort,
    /// Signed 32-bit integer.
    Int,
    /// Unsigned 32-bit integer.
    UnsignedInt,
    /// 32-bit float.
    Float,
}

impl VertexDataType {
    /// Size of one component in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::Byte | Self::UnsignedByte => 1,
            Self::Short | Self::UnsignedShort => 2,
            Self::Int | Self::UnsignedInt | Self::Float => 4,
        }
    }
}

/// Where one vertex attribute lives inside its buffer's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader attribute location.
    pub index: u32,
    /// Byte offset within an element.
    pub offset: u32,
    /// Component type.
    pub data_type: VertexDataType,
    /// Number of components, 1 to 4.
    pub components: u32,
    /// Map integer components into `[0, 1]` / `[-1, 1]`.
    pub normalized: bool,
}

impl VertexAttribute {
    /// Create a new, non-normalized vertex attribute.
    pub fn new(index: u32, offset: u32, data_type: VertexDataType, components: u32) -> Self {
        Self {
            index,
            offset,
            data_type,
            components,
            normalized: false,
        }
    }

    /// A `components`-wide float attribute.
    pub fn float(index: u32, offset: u32, components: u32) -> Self {
        Self::new(index, offset, VertexDataType::Float, components)
    }

    /// Normalize integer components.
    pub fn normalized(mut self) -> Self {
        self.normalized = true;
        self
    }

    /// Size of the attribute in bytes.
    pub fn size(&self) -> u32 {
        self.data_type.size() * self.components
    }
}

/// A vertex attribute as the backend binds it: the attribute plus the
/// stride of the buffer it reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributeBinding {
    /// The attribute being bound.
    pub attribute: VertexAttribute,
    /// Distance in bytes between consecutive elements.
    pub stride: u32,
}

/// A single draw issued by a vertex array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DrawCall {
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// First vertex (or index, when indexed).
    pub first: u32,
    /// Number of vertices (or indices).
    pub count: u32,
    /// Index format when drawing indexed.
    pub index_format: Option<IndexFormat>,
}

impl DrawCall {
    /// Returns `true` for indexed draws.
    pub fn is_indexed(&self) -> bool {
        self.index_format.is_some()
    }

    /// The drawn range.
    pub fn range(&self) -> std::ops::Range<u32> {
        self.first..self.first + self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_size() {
        assert_eq!(VertexAttribute::float(0, 0, 3).size(), 12);
        let color = VertexAttribute::new(1, 12, VertexDataType::UnsignedByte, 4).normalized();
        assert_eq!(color.size(), 4);
        assert!(color.normalized);
    }

    #[test]
    fn test_primitive_count() {
        assert_eq!(PrimitiveTopology::TriangleList.primitive_count(6), 2);
        assert_eq!(PrimitiveTopology::TriangleStrip.primitive_count(4), 2);
        assert_eq!(PrimitiveTopology::LineStrip.primitive_count(0), 0);
        assert_eq!(PrimitiveTopology::PointList.vertices_per_primitive(), Some(1));
    }

    #[test]
    fn test_draw_call_range() {
        let call = DrawCall {
            topology: PrimitiveTopology::TriangleList,
            first: 3,
            count: 6,
            index_format: Some(IndexFormat::Uint16),
        };
        assert!(call.is_indexed());
        assert_eq!(call.range(), 3..9);
    }
}
