//! Per-external-object state tracked by the runtime.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::flags::ContextFlags;
use crate::interop::{InteropLib, NativePtr};
use crate::runtime::heap::ObjectRef;
use crate::runtime::sync_table::SyncBlockIndex;
use crate::runtime::thread::ContextCookie;
use crate::runtime::HostRuntime;

/// Sync-block index value of a context without a managed target.
const INVALID_SYNC_BLOCK_INDEX: u32 = 0;

/// Tracks an external object within the runtime.
///
/// One context exists per (identity, thread context) pair. The identity is
/// immutable and serves as the cache key. A context starts inert; it becomes
/// active when [`initialize`](Self::initialize) binds it to a managed proxy
/// and stays active until the GC marks it collected.
pub struct ExternalObjectContext {
    identity: NativePtr,
    thread_context: ContextCookie,
    sync_block_index: AtomicU32,
    flags: AtomicU32,
}

impl ExternalObjectContext {
    pub(crate) fn new(identity: NativePtr, thread_context: ContextCookie) -> Self {
        Self {
            identity,
            thread_context,
            sync_block_index: AtomicU32::new(INVALID_SYNC_BLOCK_INDEX),
            flags: AtomicU32::new(ContextFlags::empty().bits()),
        }
    }

    /// Bind the context to its managed proxy's sync block and state flags.
    pub(crate) fn initialize(&self, sync_block_index: SyncBlockIndex, flags: ContextFlags) {
        self.sync_block_index
            .store(sync_block_index.as_u32(), Ordering::Release);
        self.flags.store(flags.bits(), Ordering::Release);
    }

    pub fn identity(&self) -> NativePtr {
        self.identity
    }

    pub fn thread_context(&self) -> ContextCookie {
        self.thread_context
    }

    pub fn flags(&self) -> ContextFlags {
        ContextFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_set(&self, flags: ContextFlags) -> bool {
        self.flags().contains(flags)
    }

    pub fn sync_block_index(&self) -> Option<SyncBlockIndex> {
        SyncBlockIndex::from_raw(self.sync_block_index.load(Ordering::Acquire))
    }

    /// Active contexts have a live managed target and have not been collected.
    pub fn is_active(&self) -> bool {
        !self.is_set(ContextFlags::COLLECTED) && self.sync_block_index().is_some()
    }

    /// Terminal transition made on the GC thread during suspension, once the
    /// managed proxy has been reclaimed.
    pub(crate) fn mark_collected(&self) {
        self.sync_block_index
            .store(INVALID_SYNC_BLOCK_INDEX, Ordering::Release);
        self.flags
            .fetch_or(ContextFlags::COLLECTED.bits(), Ordering::AcqRel);
    }

    /// The managed proxy this context backs.
    pub fn object_ref(&self, runtime: &HostRuntime) -> Option<ObjectRef> {
        let index = self.sync_block_index()?;
        runtime.sync_table().object_at(index)
    }
}

impl fmt::Debug for ExternalObjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalObjectContext")
            .field("identity", &self.identity)
            .field("flags", &self.flags())
            .field("sync_block_index", &self.sync_block_index())
            .finish()
    }
}

/// Owns a freshly created context until it is published; unpublished contexts
/// are handed back to the interop library on drop.
pub(crate) struct ExternalWrapperHolder<'a> {
    interop: &'a dyn InteropLib,
    context: Option<Arc<ExternalObjectContext>>,
}

impl<'a> ExternalWrapperHolder<'a> {
    pub(crate) fn new(interop: &'a dyn InteropLib, context: Arc<ExternalObjectContext>) -> Self {
        Self {
            interop,
            context: Some(context),
        }
    }

    pub(crate) fn context(&self) -> &Arc<ExternalObjectContext> {
        match &self.context {
            Some(context) => context,
            None => unreachable!("holder queried after detach"),
        }
    }

    /// Keep the context alive past this scope; the holder no longer releases
    /// it.
    pub(crate) fn detach(mut self) -> Arc<ExternalObjectContext> {
        match self.context.take() {
            Some(context) => context,
            None => unreachable!("holder detached twice"),
        }
    }
}

impl Drop for ExternalWrapperHolder<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.interop.destroy_wrapper_for_external(&context);
        }
    }
}
