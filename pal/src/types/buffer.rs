//! Buffer types and descriptors.

use bitflags::bitflags;

/// Exclusive upper bound for [`AttributeBufferDescriptor::element_size`].
pub const MAX_ELEMENT_SIZE: u32 = 512;

bitflags! {
    /// Native usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 2;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 3;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Allocation strategy hint for the backend.
///
/// Maps onto the classic static / dynamic / streaming usage hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferMode {
    /// Written once, drawn many times.
    Immutable,
    /// Rewritten occasionally, drawn many times.
    #[default]
    LongLived,
    /// Rewritten every frame.
    Dynamic,
}

impl BufferMode {
    /// Name of the equivalent classic usage hint.
    pub fn usage_hint(&self) -> &'static str {
        match self {
            Self::Immutable => "static",
            Self::LongLived => "dynamic",
            Self::Dynamic => "stream",
        }
    }
}

/// Semantic role of a buffer, which decides its native bind target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferIntent {
    /// Per-vertex attribute data.
    #[default]
    VertexData,
    /// 16-bit indices.
    IndexData16,
    /// 32-bit indices.
    IndexData32,
}

impl BufferIntent {
    /// Index format for index intents, `None` for vertex data.
    pub fn index_format(&self) -> Option<IndexFormat> {
        match self {
            Self::VertexData => None,
            Self::IndexData16 => Some(IndexFormat::Uint16),
            Self::IndexData32 => Some(IndexFormat::Uint32),
        }
    }

    /// Returns `true` for index intents.
    pub fn is_index(&self) -> bool {
        self.index_format().is_some()
    }

    /// Native usage flags for this intent.
    pub fn usage(&self) -> BufferUsage {
        let target = if self.is_index() {
            BufferUsage::INDEX
        } else {
            BufferUsage::VERTEX
        };
        target | BufferUsage::COPY_DST | BufferUsage::COPY_SRC
    }
}

/// Where a buffer keeps its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferStorage {
    /// A client-side copy is kept and committed to native storage lazily.
    #[default]
    ClientAndNative,
    /// Elements live only in native storage; every write commits at once.
    NativeOnly,
}

/// Index format for indexed drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    /// 16-bit unsigned integers.
    #[default]
    Uint16,
    /// 32-bit unsigned integers.
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

/// Descriptor for creating an [`AttributeBuffer`](crate::resources::AttributeBuffer).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeBufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Bytes per element, in `1..MAX_ELEMENT_SIZE`.
    pub element_size: u32,
    /// Number of element slots allocated up front.
    pub capacity: u32,
    /// Allocation strategy hint.
    pub mode: BufferMode,
    /// Bind target.
    pub intent: BufferIntent,
    /// Whether a client-side copy is kept.
    pub storage: BufferStorage,
    /// Zero-fill the initial capacity.
    pub zero: bool,
}

impl AttributeBufferDescriptor {
    /// Create a vertex data descriptor with client storage.
    pub fn new(element_size: u32, capacity: u32) -> Self {
        Self {
            label: None,
            element_size,
            capacity,
            mode: BufferMode::default(),
            intent: BufferIntent::VertexData,
            storage: BufferStorage::ClientAndNative,
            zero: false,
        }
    }

    /// Create a descriptor for 16- or 32-bit indices.
    pub fn index(format: IndexFormat, capacity: u32) -> Self {
        let intent = match format {
            IndexFormat::Uint16 => BufferIntent::IndexData16,
            IndexFormat::Uint32 => BufferIntent::IndexData32,
        };
        Self::new(format.size(), capacity).with_intent(intent)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the allocation strategy hint.
    pub fn with_mode(mut self, mode: BufferMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the bind target.
    pub fn with_intent(mut self, intent: BufferIntent) -> Self {
        self.intent = intent;
        self
    }

    /// Set where elements are stored.
    pub fn with_storage(mut self, storage: BufferStorage) -> Self {
        self.storage = storage;
        self
    }

    /// Zero-fill the initial capacity.
    pub fn zeroed(mut self) -> Self {
        self.zero = true;
        self
    }
}

/// Descriptor for a native buffer allocation, handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NativeBufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Allocation strategy hint.
    pub mode: BufferMode,
}

impl NativeBufferDescriptor {
    /// Create a new native buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage, mode: BufferMode) -> Self {
        Self {
            label: None,
            size,
            usage,
            mode,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: Option<&str>) -> Self {
        self.label = label.map(str::to_owned);
        self
    }
}
