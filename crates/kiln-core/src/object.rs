//! Managed object model
//!
//! A managed object is a header followed by one data layer per type in its
//! ancestry, base type first. Layers are opaque to the collector; each is
//! created by its type's construct callback and handed back to that type's
//! visit and finalize callbacks.

use crate::types::TypeRef;
use std::any::Any;
use std::fmt;

/// Handle to a managed object
///
/// Handles carry the generation of their slot, so a handle to a finalized
/// object never resolves to an object allocated later in the same slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    index: u32,
    generation: u32,
}

impl ObjectRef {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({}#{})", self.index, self.generation)
    }
}

/// Tri-color marking state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    /// Not yet found reachable in this cycle (or between cycles)
    #[default]
    White,
    /// Reachable, children not yet scanned
    Gray,
    /// Reachable and scanned
    Black,
}

/// Object header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Most derived type of the object
    pub ty: TypeRef,
    /// Marking color
    pub color: Color,
    /// Allocation size in bytes, header included
    pub size: usize,
}

/// Size of the object header in bytes
///
/// The smallest valid allocation size.
pub const OBJECT_HEADER_SIZE: usize = std::mem::size_of::<ObjectHeader>();

/// Per-type object data
pub type Layer = Box<dyn Any + Send>;

/// Object body: one layer per type in the ancestry, base type first
pub(crate) type Layers = Vec<(TypeRef, Layer)>;

/// Find the layer a type contributes to an object
pub(crate) fn find_layer(layers: &Layers, ty: TypeRef) -> Option<&Layer> {
    layers.iter().find(|(t, _)| *t == ty).map(|(_, layer)| layer)
}

/// Find the layer a type contributes to an object, mutably
pub(crate) fn find_layer_mut(layers: &mut Layers, ty: TypeRef) -> Option<&mut Layer> {
    layers
        .iter_mut()
        .find(|(t, _)| *t == ty)
        .map(|(_, layer)| layer)
}
