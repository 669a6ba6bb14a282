//! Tri-color mark-sweep collector
//!
//! Objects live in generation-checked slots threaded on a singly linked
//! "all objects" list, newest first. A collection runs to completion:
//!
//! 1. Pre-mark hooks report roots to a [`Marker`]. Reached white objects turn
//!    gray if some type in their ancestry has a visit callback, black
//!    otherwise.
//! 2. The gray list is drained. Each popped object turns black and its
//!    layers are visited, most derived type first.
//! 3. The all-objects list is swept once. White objects are finalized (hooks
//!    first, then type finalizers from most derived to root) and reclaimed;
//!    black objects are reset to white for the next collection.

use super::hooks::{HookHandle, HookList};
use super::stats::{GcRunStats, GcStats};
use crate::object::{find_layer, find_layer_mut, Color, Layers, ObjectHeader, ObjectRef, OBJECT_HEADER_SIZE};
use crate::status::{KilnResult, Status};
use crate::types::{TypeRef, Types};
use crate::value::Value;
use std::any::Any;
use std::time::Instant;

/// Pre-mark hook: report roots
pub type PreMarkHook = Box<dyn FnMut(&mut Marker<'_>) + Send>;

/// Finalize hook: observe an object about to be reclaimed
pub type FinalizeHook = Box<dyn FnMut(ObjectRef) + Send>;

#[derive(Default)]
struct Slot {
    generation: u32,
    header: Option<ObjectHeader>,
    traced: bool,
    next: Option<u32>,
    layers: Option<Layers>,
}

impl Slot {
    fn matches(&self, object: ObjectRef) -> bool {
        self.generation == object.generation() && self.header.is_some()
    }
}

/// Reports reachable objects during marking
pub struct Marker<'a> {
    slots: &'a mut [Slot],
    gray: &'a mut Vec<ObjectRef>,
    marked: &'a mut usize,
}

impl Marker<'_> {
    /// Mark `object` reachable
    ///
    /// Stale handles and objects already marked are ignored.
    pub fn visit_object(&mut self, object: ObjectRef) {
        let Some(slot) = self.slots.get_mut(object.index() as usize) else {
            return;
        };
        if slot.generation != object.generation() {
            return;
        }
        let Some(header) = slot.header.as_mut() else {
            return;
        };
        if header.color != Color::White {
            return;
        }

        *self.marked += 1;
        if slot.traced {
            header.color = Color::Gray;
            self.gray.push(object);
        } else {
            header.color = Color::Black;
        }
    }

    /// Mark the object held by `value`, if any
    pub fn visit_value(&mut self, value: &Value) {
        if let Value::Object(object) = value {
            self.visit_object(*object);
        }
    }
}

/// The collector and its heap
pub struct Gc {
    slots: Vec<Slot>,
    free: Vec<u32>,
    head: Option<u32>,
    gray: Vec<ObjectRef>,
    pre_mark_hooks: HookList<PreMarkHook>,
    finalize_hooks: HookList<FinalizeHook>,
    live_objects: usize,
    live_bytes: usize,
    max_objects: Option<usize>,
    stats: GcStats,
}

impl Gc {
    /// Create an empty heap with no object limit
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Create an empty heap holding at most `max_objects` live objects
    pub fn with_max_objects(max_objects: usize) -> Self {
        Self::with_limit(Some(max_objects))
    }

    fn with_limit(max_objects: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            gray: Vec::new(),
            pre_mark_hooks: HookList::new(),
            finalize_hooks: HookList::new(),
            live_objects: 0,
            live_bytes: 0,
            max_objects,
            stats: GcStats::default(),
        }
    }

    /// Register a pre-mark hook
    pub fn add_pre_mark_hook<F>(&mut self, hook: F) -> HookHandle
    where
        F: FnMut(&mut Marker<'_>) + Send + 'static,
    {
        self.pre_mark_hooks.add(Box::new(hook))
    }

    /// Remove a pre-mark hook; fails with `NotExists` if already removed
    pub fn remove_pre_mark_hook(&mut self, handle: &HookHandle) -> KilnResult<()> {
        self.pre_mark_hooks.remove(handle)
    }

    /// Register a finalize hook
    pub fn add_finalize_hook<F>(&mut self, hook: F) -> HookHandle
    where
        F: FnMut(ObjectRef) + Send + 'static,
    {
        self.finalize_hooks.add(Box::new(hook))
    }

    /// Remove a finalize hook; fails with `NotExists` if already removed
    pub fn remove_finalize_hook(&mut self, handle: &HookHandle) -> KilnResult<()> {
        self.finalize_hooks.remove(handle)
    }

    /// Number of registered (pre-mark, finalize) hooks
    pub fn hook_counts(&self) -> (usize, usize) {
        (self.pre_mark_hooks.len(), self.finalize_hooks.len())
    }

    /// Allocate an object of `ty` at the type's instance size
    pub fn allocate(&mut self, types: &Types, ty: TypeRef, args: &[Value]) -> KilnResult<ObjectRef> {
        let size = types.instance_size(ty)?;
        self.allocate_sized(types, ty, size, args)
    }

    /// Allocate an object of `ty` occupying `size` bytes
    ///
    /// Each type in the ancestry constructs its layer, root type first. If a
    /// constructor fails, the layers already built are finalized in reverse
    /// and the error is returned.
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than [`OBJECT_HEADER_SIZE`].
    pub fn allocate_sized(
        &mut self,
        types: &Types,
        ty: TypeRef,
        size: usize,
        args: &[Value],
    ) -> KilnResult<ObjectRef> {
        assert!(
            size >= OBJECT_HEADER_SIZE,
            "allocation of {} bytes is smaller than the object header ({} bytes)",
            size,
            OBJECT_HEADER_SIZE
        );
        if !types.is_object_type(ty) {
            return Err(Status::ArgumentTypeInvalid);
        }
        if self.max_objects.is_some_and(|max| self.live_objects >= max) {
            return Err(Status::AllocationFailed);
        }

        let mut chain = types.ancestors(ty)?;
        chain.reverse();
        let traced = chain
            .iter()
            .any(|t| types.descriptor(*t).is_ok_and(|d| d.visit.is_some()));

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| Status::AllocationFailed)?;
                self.slots.push(Slot::default());
                index
            }
        };
        let object = ObjectRef::new(index, self.slots[index as usize].generation);

        let mut layers: Layers = Vec::with_capacity(chain.len());
        for t in &chain {
            let construct = types.descriptor(*t).ok().and_then(|d| d.construct.clone());
            let built = match construct {
                Some(construct) => construct(object, args),
                None => Ok(Box::new(()) as Box<dyn Any + Send>),
            };
            match built {
                Ok(layer) => layers.push((*t, layer)),
                Err(status) => {
                    finalize_layers(types, object, &mut layers);
                    let slot = &mut self.slots[index as usize];
                    slot.generation = slot.generation.wrapping_add(1);
                    self.free.push(index);
                    tracing::debug!(?ty, %status, "object construction failed");
                    return Err(status);
                }
            }
        }

        let slot = &mut self.slots[index as usize];
        slot.header = Some(ObjectHeader {
            ty,
            color: Color::White,
            size,
        });
        slot.traced = traced;
        slot.layers = Some(layers);
        slot.next = self.head;
        self.head = Some(index);

        self.live_objects += 1;
        self.live_bytes += size;
        self.stats.objects_allocated += 1;
        Ok(object)
    }

    fn slot(&self, object: ObjectRef) -> KilnResult<&Slot> {
        self.slots
            .get(object.index() as usize)
            .filter(|slot| slot.matches(object))
            .ok_or(Status::NotExists)
    }

    fn slot_mut(&mut self, object: ObjectRef) -> KilnResult<&mut Slot> {
        self.slots
            .get_mut(object.index() as usize)
            .filter(|slot| slot.matches(object))
            .ok_or(Status::NotExists)
    }

    /// Check whether `object` is live
    pub fn contains(&self, object: ObjectRef) -> bool {
        self.slot(object).is_ok()
    }

    /// Header of a live object
    pub fn header(&self, object: ObjectRef) -> KilnResult<ObjectHeader> {
        self.slot(object)?.header.ok_or(Status::NotExists)
    }

    /// Most derived type of a live object
    pub fn type_of(&self, object: ObjectRef) -> KilnResult<TypeRef> {
        Ok(self.header(object)?.ty)
    }

    /// Marking color of a live object
    pub fn color(&self, object: ObjectRef) -> KilnResult<Color> {
        Ok(self.header(object)?.color)
    }

    /// Borrow the layer `ty` contributes to `object`
    ///
    /// Fails with `NotExists` for a dead object and `ArgumentTypeInvalid` if
    /// `ty` is not in the object's ancestry or the layer is not a `T`.
    pub fn layer<T: Any>(&self, object: ObjectRef, ty: TypeRef) -> KilnResult<&T> {
        let layers = self.slot(object)?.layers.as_ref().ok_or(Status::NotExists)?;
        find_layer(layers, ty)
            .and_then(|layer| layer.downcast_ref::<T>())
            .ok_or(Status::ArgumentTypeInvalid)
    }

    /// Mutably borrow the layer `ty` contributes to `object`
    pub fn layer_mut<T: Any>(&mut self, object: ObjectRef, ty: TypeRef) -> KilnResult<&mut T> {
        let layers = self
            .slot_mut(object)?
            .layers
            .as_mut()
            .ok_or(Status::NotExists)?;
        find_layer_mut(layers, ty)
            .and_then(|layer| layer.downcast_mut::<T>())
            .ok_or(Status::ArgumentTypeInvalid)
    }

    /// Iterate over live objects, newest first
    pub fn objects(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        std::iter::successors(self.head, move |index| self.slots[*index as usize].next)
            .map(move |index| ObjectRef::new(index, self.slots[index as usize].generation))
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.live_objects
    }

    /// Check whether the heap has no live objects
    pub fn is_empty(&self) -> bool {
        self.live_objects == 0
    }

    /// Bytes held by live objects
    pub fn live_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Cumulative statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Run a full collection
    pub fn run(&mut self, types: &Types) -> GcRunStats {
        let start = Instant::now();
        let mut marked = 0;

        // Roots
        {
            let Self {
                slots,
                gray,
                pre_mark_hooks,
                ..
            } = self;
            pre_mark_hooks.notify(|hook| {
                let mut marker = Marker {
                    slots: slots.as_mut_slice(),
                    gray: &mut *gray,
                    marked: &mut marked,
                };
                hook(&mut marker);
            });
            pre_mark_hooks.purge();
        }

        // Trace
        while let Some(object) = self.gray.pop() {
            let index = object.index() as usize;
            let Some(slot) = self.slots.get_mut(index).filter(|slot| slot.matches(object)) else {
                continue;
            };
            let Some(header) = slot.header.as_mut() else {
                continue;
            };
            if header.color != Color::Gray {
                continue;
            }
            header.color = Color::Black;

            // Detach the layers so the marker can borrow the slots
            let Some(layers) = slot.layers.take() else {
                continue;
            };
            {
                let mut marker = Marker {
                    slots: self.slots.as_mut_slice(),
                    gray: &mut self.gray,
                    marked: &mut marked,
                };
                for (ty, layer) in layers.iter().rev() {
                    if let Some(visit) = types.descriptor(*ty).ok().and_then(|d| d.visit.as_ref()) {
                        visit(&**layer, &mut marker);
                    }
                }
            }
            self.slots[index].layers = Some(layers);
        }

        // Sweep
        let mut freed = 0;
        let mut freed_bytes = 0;
        let mut prev: Option<u32> = None;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            let slot = &mut self.slots[index as usize];
            let next = slot.next;
            let Some(header) = slot.header.as_mut() else {
                tracing::error!(index, "empty slot on the all-objects list");
                cursor = next;
                continue;
            };

            let color = header.color;
            match color {
                Color::White => {
                    let object = ObjectRef::new(index, slot.generation);
                    let size = header.size;
                    match prev {
                        Some(p) => self.slots[p as usize].next = next,
                        None => self.head = next,
                    }
                    self.reclaim(types, object);
                    freed += 1;
                    freed_bytes += size;
                }
                Color::Black => {
                    header.color = Color::White;
                    prev = Some(index);
                }
                Color::Gray => {
                    tracing::error!(?header, "gray object found during sweep");
                    header.color = Color::White;
                    prev = Some(index);
                }
            }
            cursor = next;
        }
        self.finalize_hooks.purge();

        let run = GcRunStats {
            marked,
            freed,
            freed_bytes,
            live_objects: self.live_objects,
            live_bytes: self.live_bytes,
            pause_time: start.elapsed(),
        };
        self.stats.update(&run);

        tracing::debug!(
            marked = run.marked,
            freed = run.freed,
            live = run.live_objects,
            pause_us = run.pause_time.as_micros() as u64,
            "collection finished"
        );
        run
    }

    /// Finalize and free an object already unlinked from the all-objects list
    fn reclaim(&mut self, types: &Types, object: ObjectRef) {
        self.finalize_hooks.notify(|hook| hook(object));

        let slot = &mut self.slots[object.index() as usize];
        let header = slot.header.take();
        let layers = slot.layers.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.traced = false;
        slot.next = None;
        self.free.push(object.index());

        if let Some(mut layers) = layers {
            finalize_layers(types, object, &mut layers);
        }
        if let Some(header) = header {
            self.live_objects -= 1;
            self.live_bytes -= header.size;
        }
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

/// Run type finalizers over `layers`, most derived first
fn finalize_layers(types: &Types, object: ObjectRef, layers: &mut Layers) {
    for (ty, layer) in layers.iter_mut().rev() {
        if let Some(finalize) = types.descriptor(*ty).ok().and_then(|d| d.finalize.as_ref()) {
            finalize(object, &mut **layer);
        }
    }
}
