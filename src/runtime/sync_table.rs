//! Sync-block side table: per-object slots hosting interop back-pointers.

use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::context::ExternalObjectContext;
use crate::interop::NativePtr;
use crate::runtime::heap::ObjectRef;

/// Index of a managed object's sync block. Zero is reserved as invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncBlockIndex(NonZeroU32);

impl SyncBlockIndex {
    pub(crate) fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(SyncBlockIndex)
    }

    pub fn as_u32(self) -> u32 {
        self.0.get()
    }

    fn index(self) -> usize {
        self.0.get() as usize - 1
    }

    fn from_index(index: usize) -> Self {
        match NonZeroU32::new(index as u32 + 1) {
            Some(raw) => SyncBlockIndex(raw),
            None => unreachable!("sync-block table overflow"),
        }
    }
}

/// Interop state hosted on a managed object's sync block.
///
/// Both slots publish at most once; `try_set_*` reports whether the caller's
/// value won. Readers tolerate a transiently empty slot and recompute.
#[derive(Default)]
pub struct InteropInfo {
    wrapper: OnceLock<NativePtr>,
    context: OnceLock<Arc<ExternalObjectContext>>,
}

impl InteropInfo {
    /// The managed object wrapper published for this object, if any.
    pub fn managed_object_wrapper(&self) -> Option<NativePtr> {
        self.wrapper.get().copied()
    }

    /// Publish a wrapper; fails if one is already present.
    pub fn try_set_managed_object_wrapper(&self, wrapper: NativePtr) -> bool {
        self.wrapper.set(wrapper).is_ok()
    }

    /// The external object context bound to this object, if any.
    pub fn external_object_context(&self) -> Option<&Arc<ExternalObjectContext>> {
        self.context.get()
    }

    /// Bind an external object context; fails if one is already bound.
    pub fn try_set_external_object_context(&self, context: Arc<ExternalObjectContext>) -> bool {
        self.context.set(context).is_ok()
    }
}

struct SyncEntry {
    object: ObjectRef,
    interop: Arc<InteropInfo>,
}

/// Side table mapping sync-block indices to objects and their interop state.
pub struct SyncTable {
    entries: Mutex<Vec<Option<SyncEntry>>>,
}

impl SyncTable {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Allocate a sync block for `object`.
    pub(crate) fn create(&self, object: ObjectRef) -> SyncBlockIndex {
        let mut entries = self.entries.lock();
        let entry = SyncEntry {
            object,
            interop: Arc::new(InteropInfo::default()),
        };
        if let Some(index) = entries.iter().position(Option::is_none) {
            entries[index] = Some(entry);
            SyncBlockIndex::from_index(index)
        } else {
            entries.push(Some(entry));
            SyncBlockIndex::from_index(entries.len() - 1)
        }
    }

    /// The object owning the sync block at `index`.
    pub fn object_at(&self, index: SyncBlockIndex) -> Option<ObjectRef> {
        let entries = self.entries.lock();
        entries
            .get(index.index())
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.object)
    }

    /// The interop state of the sync block at `index`.
    pub fn interop_info(&self, index: SyncBlockIndex) -> Option<Arc<InteropInfo>> {
        let entries = self.entries.lock();
        entries
            .get(index.index())
            .and_then(|slot| slot.as_ref())
            .map(|entry| entry.interop.clone())
    }

    /// Free the sync block at `index` along with its interop state.
    pub(crate) fn free(&self, index: SyncBlockIndex) {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get_mut(index.index()) {
            *slot = None;
        }
    }
}
