//! Opaque handles and the generational table that resolves them.
//!
//! Upper rendering code never holds backend objects directly. It holds a
//! [`Handle`]: a slot index plus the generation the slot had when the object
//! was stored. Freeing an object bumps the slot generation and returns the
//! slot to a free list, so a later allocation may reuse the same index while
//! every handle to the old object stops resolving.
//!
//! Resource kinds get their own handle types ([`BufferHandle`],
//! [`VertexArrayHandle`]) so a buffer handle can never be passed where a
//! vertex array is expected.

use std::fmt;

/// Default number of slots a table is seeded with.
///
/// Scene setup creates many buffers in a burst; seeding avoids growing the
/// table repeatedly during the first frames.
pub const DEFAULT_TABLE_CAPACITY: usize = 1000;

/// An opaque reference to an object stored in a [`HandleTable`].
///
/// The index is signed so that [`Handle::INVALID`] can be `-1`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: i32,
    generation: u32,
}

impl Handle {
    /// A handle that never names an object.
    pub const INVALID: Handle = Handle {
        index: -1,
        generation: 0,
    };

    pub(crate) fn new(index: i32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the raw slot index (`-1` for [`Handle::INVALID`]).
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Returns the slot generation this handle was issued for.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns `true` unless this is [`Handle::INVALID`].
    pub fn is_valid(&self) -> bool {
        self.index >= 0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({}@{})", self.index, self.generation)
        } else {
            write!(f, "Handle(invalid)")
        }
    }
}

macro_rules! typed_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(Handle);

        impl $name {
            /// A handle that never names an object.
            pub const INVALID: $name = $name(Handle::INVALID);

            /// Returns the untyped handle.
            pub fn raw(&self) -> Handle {
                self.0
            }

            /// Returns `true` unless this is the invalid handle.
            pub fn is_valid(&self) -> bool {
                self.0.is_valid()
            }
        }

        impl From<Handle> for $name {
            fn from(handle: Handle) -> Self {
                Self(handle)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

typed_handle!(
    /// Handle to an [`AttributeBuffer`](crate::resources::AttributeBuffer).
    BufferHandle
);

typed_handle!(
    /// Handle to a [`VertexArray`](crate::resources::VertexArray).
    VertexArrayHandle
);

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A generational slot map from [`Handle`]s to values.
///
/// Allocation pops a slot from a LIFO free list; when the free list is empty
/// the table doubles. Freed slots are recycled with a bumped generation, so
/// two simultaneously live handles never compare equal.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live: usize,
}

impl<T> HandleTable<T> {
    /// Create a table with [`DEFAULT_TABLE_CAPACITY`] pre-seeded slots.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TABLE_CAPACITY)
    }

    /// Create a table with `capacity` pre-seeded slots.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut table = Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::with_capacity(capacity),
            live: 0,
        };
        table.grow_to(capacity);
        table
    }

    fn grow_to(&mut self, new_len: usize) {
        let old_len = self.slots.len();
        assert!(
            new_len <= i32::MAX as usize,
            "handle table cannot grow past {} slots",
            i32::MAX
        );
        self.slots.reserve(new_len - old_len);
        for _ in old_len..new_len {
            self.slots.push(Slot {
                generation: 0,
                value: None,
            });
        }
        // Lowest indices are handed out first.
        self.free_list.extend((old_len as u32..new_len as u32).rev());
    }

    /// Store `value` and return a handle to it.
    pub fn allocate(&mut self, value: T) -> Handle {
        if self.free_list.is_empty() {
            let new_len = (self.slots.len() * 2).max(1);
            log::debug!(
                "HandleTable: growing from {} to {} slots",
                self.slots.len(),
                new_len
            );
            self.grow_to(new_len);
        }

        let Some(index) = self.free_list.pop() else {
            unreachable!("free list refilled by grow_to");
        };
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.value.is_none(), "free list held an occupied slot");
        slot.value = Some(value);
        self.live += 1;
        Handle::new(index as i32, slot.generation)
    }

    /// Remove the value named by `handle` and return it.
    ///
    /// Returns `None` if the handle is stale (its slot was already freed or
    /// reused).
    ///
    /// # Panics
    ///
    /// Panics if the handle index is outside the table.
    pub fn free(&mut self, handle: Handle) -> Option<T> {
        assert!(
            handle.is_valid() && (handle.index() as usize) < self.slots.len(),
            "{handle} is out of range for a table of {} slots",
            self.slots.len()
        );
        let index = handle.index() as usize;
        let slot = &mut self.slots[index];
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(index as u32);
        self.live -= 1;
        Some(value)
    }

    fn slot(&self, handle: Handle) -> Option<&Slot<T>> {
        if !handle.is_valid() {
            return None;
        }
        self.slots
            .get(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
    }

    /// Resolve a handle.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.value.as_ref())
    }

    /// Resolve a handle mutably.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        if !handle.is_valid() {
            return None;
        }
        self.slots
            .get_mut(handle.index() as usize)
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    /// Returns `true` if `handle` names a live value.
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no values are live.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index as i32, slot.generation), value))
        })
    }

    /// Free every live value, returning them in slot order.
    pub fn drain(&mut self) -> Vec<(Handle, T)> {
        let handles: Vec<Handle> = self.iter().map(|(handle, _)| handle).collect();
        handles
            .into_iter()
            .filter_map(|handle| self.free(handle).map(|value| (handle, value)))
            .collect()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("live", &self.live)
            .field("capacity", &self.slots.len())
            .finish()
    }
}
