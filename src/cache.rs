//! Process-wide cache of external object contexts, keyed by native identity.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::context::ExternalObjectContext;
use crate::flags::ContextFlags;
use crate::interop::{InteropLib, NativePtr};
use crate::ref_cache::RefCache;
use crate::runtime::heap::ObjectRef;
use crate::runtime::thread::{self, ContextCookie, ThreadMode};
use crate::runtime::HostRuntime;

type CacheMap = HashMap<NativePtr, Arc<ExternalObjectContext>>;

/// Cache of live external object contexts.
///
/// Mutator threads access the map through [`ExtObjectCache::lock`], taken in
/// cooperative mode so a collection cannot start while it is held. The GC
/// thread instead relies on thread-suspension exclusion and uses the
/// `*_during_suspension` accessors.
pub struct ExtObjectCache {
    map: Mutex<CacheMap>,
    ref_cache: RefCache,
}

impl ExtObjectCache {
    pub(crate) fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            ref_cache: RefCache::new(),
        }
    }

    /// The reference-path cache associated with this cache.
    pub fn ref_cache(&self) -> &RefCache {
        &self.ref_cache
    }

    /// Take the cache lock for a batch of lookups and updates.
    pub fn lock(&self) -> CacheGuard<'_> {
        debug_assert_eq!(thread::current_mode(), ThreadMode::Cooperative);
        CacheGuard {
            map: self.map.lock(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a context on the GC thread without taking the lock.
    ///
    /// # Safety
    ///
    /// Mutators must be suspended. The lock is only ever held in cooperative
    /// mode, so suspension excludes every possible holder and the map can be
    /// mutated in place.
    pub(crate) unsafe fn remove_during_suspension(&self, context: &ExternalObjectContext) {
        let map = unsafe { &mut *self.map.data_ptr() };
        map.remove(&context.identity());
    }

    /// Snapshot every context while mutators are suspended.
    ///
    /// # Safety
    ///
    /// Same requirement as [`Self::remove_during_suspension`].
    pub(crate) unsafe fn snapshot_during_suspension(&self) -> Vec<Arc<ExternalObjectContext>> {
        let map = unsafe { &*self.map.data_ptr() };
        map.values().cloned().collect()
    }

    /// Collect the managed proxies of contexts matching `with_flags` in the
    /// given thread context, separating each matched wrapper from the tracker
    /// runtime on the way out.
    ///
    /// The count is read under the lock, the buffer is allocated outside it
    /// (allocation may trigger a collection), and the refill stops at the
    /// entries actually matched, tolerating cache churn in between.
    pub fn snapshot_filtered(
        &self,
        runtime: &HostRuntime,
        interop: &dyn InteropLib,
        with_flags: ContextFlags,
        thread_context: ContextCookie,
    ) -> Vec<ObjectRef> {
        let capacity = self.lock().len();
        let mut matched = Vec::with_capacity(capacity);
        {
            let guard = self.lock();
            for context in guard.iter() {
                if matched.len() == capacity {
                    break;
                }
                if context.thread_context() != thread_context {
                    continue;
                }
                if !with_flags.is_empty() && !context.is_set(with_flags) {
                    continue;
                }
                // Safe to call even when the context never came from the
                // tracker runtime.
                interop.separate_wrapper_from_tracker_runtime(context);
                if let Some(obj) = context.object_ref(runtime) {
                    trace!(context = ?context, "snapshotting external object context");
                    matched.push(obj);
                }
            }
        }
        matched
    }
}

/// Holds the cache lock; all lookups and updates happen through this guard.
pub struct CacheGuard<'a> {
    map: MutexGuard<'a, CacheMap>,
}

impl CacheGuard<'_> {
    pub fn find(&self, identity: NativePtr) -> Option<Arc<ExternalObjectContext>> {
        self.map.get(&identity).cloned()
    }

    pub fn add(&mut self, context: Arc<ExternalObjectContext>) -> Arc<ExternalObjectContext> {
        debug_assert!(self.find(context.identity()).is_none());
        self.map.insert(context.identity(), context.clone());
        context
    }

    /// Return the context cached for `identity`, inserting `candidate` when
    /// none is. The winner is the linearization point for publication.
    pub fn find_or_add(
        &mut self,
        identity: NativePtr,
        candidate: Arc<ExternalObjectContext>,
    ) -> Arc<ExternalObjectContext> {
        debug_assert_eq!(identity, candidate.identity());
        match self.find(identity) {
            Some(existing) => existing,
            None => self.add(candidate),
        }
    }

    pub fn remove(&mut self, context: &ExternalObjectContext) {
        self.map.remove(&context.identity());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ExternalObjectContext>> {
        self.map.values()
    }
}
