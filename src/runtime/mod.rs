//! Host-runtime model: the side tables and thread state the wrapping service
//! consumes.
//!
//! A full embedding supplies these services from its VM; this module provides
//! the same seam in-crate so the wrapping service is usable and testable on
//! its own. It covers the managed object table, the sync-block side table,
//! the handle table and thread registration, plus the stop-the-world
//! collection driver in [`heap`].

pub mod handles;
pub mod heap;
pub mod sync_table;
pub mod thread;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::Mutex;

use handles::HandleTable;
use heap::{ObjectHeap, ObjectRef};
use sync_table::{InteropInfo, SyncBlockIndex, SyncTable};
use thread::ThreadRegistry;

/// The host runtime as seen by the wrapping service: managed objects, side
/// tables, handles and thread state.
pub struct HostRuntime {
    pub(crate) heap: ObjectHeap,
    pub(crate) sync_table: SyncTable,
    pub(crate) handles: HandleTable,
    threads: ThreadRegistry,
    /// Native memory attributed to the managed heap by the interop library.
    memory_pressure: AtomicU64,
    suspended: AtomicBool,
    gc_thread: Mutex<Option<ThreadId>>,
}

impl HostRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            heap: ObjectHeap::new(),
            sync_table: SyncTable::new(),
            handles: HandleTable::new(),
            threads: ThreadRegistry::new(),
            memory_pressure: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
            gc_thread: Mutex::new(None),
        })
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn sync_table(&self) -> &SyncTable {
        &self.sync_table
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// The sync-block index of `obj`, creating the side-table entry on demand.
    pub fn get_or_create_sync_block(&self, obj: ObjectRef) -> SyncBlockIndex {
        if let Some(index) = self.heap.sync_block_of(obj) {
            return index;
        }
        let index = self.sync_table.create(obj);
        // Another thread may have raced the assignment; keep the winner.
        match self.heap.try_set_sync_block(obj, index) {
            Ok(()) => index,
            Err(existing) => {
                self.sync_table.free(index);
                existing
            }
        }
    }

    /// The interop state of `obj`'s sync block, creating both on demand.
    pub fn get_or_create_interop_info(&self, obj: ObjectRef) -> Arc<InteropInfo> {
        let index = self.get_or_create_sync_block(obj);
        match self.sync_table.interop_info(index) {
            Some(info) => info,
            None => unreachable!("sync block vanished under a live object"),
        }
    }

    /// Mark the calling thread as the GC thread and suspend mutators.
    pub fn begin_suspension(&self) {
        let mut gc_thread = self.gc_thread.lock();
        debug_assert!(gc_thread.is_none());
        *gc_thread = Some(std::thread::current().id());
        self.suspended.store(true, Ordering::SeqCst);
    }

    pub fn end_suspension(&self) {
        self.suspended.store(false, Ordering::SeqCst);
        *self.gc_thread.lock() = None;
    }

    /// Whether mutators are currently suspended for a collection.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Whether the calling thread is the one driving a collection.
    pub fn is_gc_thread(&self) -> bool {
        let current = std::thread::current().id();
        *self.gc_thread.lock() == Some(current)
    }

    pub fn add_memory_pressure(&self, bytes: u64) {
        self.memory_pressure.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn remove_memory_pressure(&self, bytes: u64) {
        let mut current = self.memory_pressure.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.memory_pressure.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn memory_pressure(&self) -> u64 {
        self.memory_pressure.load(Ordering::Relaxed)
    }
}
