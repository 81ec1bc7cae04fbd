//! Dependent-link cache rebuilt during each major collection.

use parking_lot::Mutex;

use crate::runtime::handles::{DependentHandle, HandleTable};
use crate::runtime::heap::ObjectRef;

/// Pool of dependent handles expressing "keep target alive while source is"
/// for reference paths discovered by the tracker runtime.
///
/// Touched only while mutators are suspended, so the lock is never contended;
/// it exists to keep the type `Sync`.
pub struct RefCache {
    inner: Mutex<RefCacheInner>,
}

struct RefCacheInner {
    pool: Vec<DependentHandle>,
    used: usize,
}

impl RefCache {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RefCacheInner {
                pool: Vec::new(),
                used: 0,
            }),
        }
    }

    /// Clear every pooled link at the start of a tracking window.
    pub(crate) fn reset_dependent_handles(&self, handles: &HandleTable) {
        let mut inner = self.inner.lock();
        for handle in &inner.pool {
            handles.set_dependent(*handle, None, None);
        }
        inner.used = 0;
    }

    /// Record a dependent link `source -> target`, reusing a pooled handle
    /// when one is free.
    pub(crate) fn add_reference(&self, handles: &HandleTable, source: ObjectRef, target: ObjectRef) {
        let mut inner = self.inner.lock();
        let handle = if inner.used < inner.pool.len() {
            inner.pool[inner.used]
        } else {
            let handle = handles.create_dependent();
            inner.pool.push(handle);
            handle
        };
        handles.set_dependent(handle, Some(source), Some(target));
        inner.used += 1;
    }

    /// Free pooled handles beyond current use once usage drops well below the
    /// pool size.
    pub(crate) fn shrink_dependent_handles(&self, handles: &HandleTable) {
        let mut inner = self.inner.lock();
        if inner.pool.len() > inner.used * 2 {
            let used = inner.used;
            for handle in inner.pool.drain(used..) {
                handles.destroy_dependent(handle);
            }
        }
    }

    /// Number of links recorded in the current window.
    pub fn len(&self) -> usize {
        self.inner.lock().used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
