//! Per-assembly handle slab
//!
//! Every handle an assembly allocates (object handles, interface wrappers,
//! method tokens, type tokens) lives in that assembly's slab. Other tables
//! refer to a handle by `HandleSlot`, never by owning a copy.
//!
//! Disposing a single handle frees its index for reuse and bumps that
//! index's generation, so the old slot stops resolving. Releasing the whole
//! slab bumps the slab epoch, which retires every slot issued before it.

use hostbridge_sdk::{ForeignPtr, ForeignRuntime, Handle};

use crate::error::fatal;

/// What a slab entry was allocated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlePurpose {
    /// Foreign counterpart of a native object
    Object,
    /// Per-interface wrapper of an object
    InterfaceWrapper,
    /// Method token
    Method,
    /// Type token
    TypeToken,
}

/// Reference to a slab entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleSlot {
    index: u32,
    generation: u32,
    epoch: u32,
}

impl HandleSlot {
    /// Epoch the slot was issued in
    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

#[derive(Debug)]
struct SlabEntry {
    handle: Handle,
    purpose: HandlePurpose,
    sequence: u64,
}

#[derive(Debug, Default)]
struct SlabCell {
    generation: u32,
    entry: Option<SlabEntry>,
}

/// Every live handle an assembly allocated since its last unload
#[derive(Debug, Default)]
pub struct HandleSlab {
    cells: Vec<SlabCell>,
    free: Vec<u32>,
    next_sequence: u64,
    epoch: u32,
}

impl HandleSlab {
    /// Create an empty slab
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `handle`, reusing a freed index when one exists
    pub fn allocate(&mut self, handle: Handle, purpose: HandlePurpose) -> HandleSlot {
        let entry = SlabEntry {
            handle,
            purpose,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.cells.len())
                    .unwrap_or_else(|_| fatal("handle slab exhausted its index space"));
                self.cells.push(SlabCell::default());
                index
            }
        };
        let cell = &mut self.cells[index as usize];
        cell.entry = Some(entry);
        HandleSlot {
            index,
            generation: cell.generation,
            epoch: self.epoch,
        }
    }

    fn cell_mut(&mut self, slot: HandleSlot) -> Option<&mut SlabCell> {
        if slot.epoch != self.epoch {
            return None;
        }
        self.cells
            .get_mut(slot.index as usize)
            .filter(|cell| cell.generation == slot.generation && cell.entry.is_some())
    }

    fn entry(&self, slot: HandleSlot) -> Option<&SlabEntry> {
        if slot.epoch != self.epoch {
            return None;
        }
        self.cells
            .get(slot.index as usize)
            .filter(|cell| cell.generation == slot.generation)
            .and_then(|cell| cell.entry.as_ref())
    }

    /// Pointer behind `slot`, or `None` if stale or disposed
    pub fn pointer(&self, slot: HandleSlot) -> Option<ForeignPtr> {
        self.entry(slot).and_then(|e| e.handle.pointer().non_null())
    }

    /// Check whether `slot` still holds a live handle
    pub fn is_live(&self, slot: HandleSlot) -> bool {
        self.pointer(slot).is_some()
    }

    /// Purpose `slot` was allocated for, while it is still held
    pub fn purpose(&self, slot: HandleSlot) -> Option<HandlePurpose> {
        self.entry(slot).map(|e| e.purpose)
    }

    /// Dispose one handle through `module` and free its index.
    /// Stale slots are ignored.
    pub fn dispose(
        &mut self,
        slot: HandleSlot,
        runtime: &dyn ForeignRuntime,
        module: Option<ForeignPtr>,
    ) -> bool {
        let Some(cell) = self.cell_mut(slot) else {
            return false;
        };
        let Some(mut entry) = cell.entry.take() else {
            return false;
        };
        cell.generation = cell.generation.wrapping_add(1);
        self.free.push(slot.index);
        entry.handle.dispose(runtime, module)
    }

    /// Dispose every live handle in allocation order, then start a new epoch.
    ///
    /// Returns the number of handles released.
    pub fn dispose_all(&mut self, runtime: &dyn ForeignRuntime, module: Option<ForeignPtr>) -> usize {
        let mut live: Vec<SlabEntry> = self.cells.drain(..).filter_map(|cell| cell.entry).collect();
        live.sort_by_key(|entry| entry.sequence);

        let mut released = 0;
        for mut entry in live {
            if entry.handle.dispose(runtime, module) {
                released += 1;
            }
        }
        self.free.clear();
        self.epoch = self.epoch.wrapping_add(1);
        released
    }

    /// Number of live handles
    pub fn live_count(&self) -> usize {
        self.live_entries().count()
    }

    /// Number of live handles allocated for `purpose`
    pub fn live_count_of(&self, purpose: HandlePurpose) -> usize {
        self.live_entries().filter(|e| e.purpose == purpose).count()
    }

    fn live_entries(&self) -> impl Iterator<Item = &SlabEntry> {
        self.cells
            .iter()
            .filter_map(|cell| cell.entry.as_ref())
            .filter(|e| !e.handle.is_null())
    }

    /// Number of indices the slab holds, live or free
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Current epoch
    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}
