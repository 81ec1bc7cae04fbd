//! GC coordination: the major-collection reference-tracking window and the
//! collection and destruction notifications for interop state.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::bridge::ComWrappers;
use crate::cache::ExtObjectCache;
use crate::context::ExternalObjectContext;
use crate::flags::ContextFlags;
use crate::interop::NativePtr;
use crate::ref_cache::RefCache;
use crate::runtime::handles::ObjectHandle;
use crate::runtime::HostRuntime;

/// Call context handed to the interop library for one reference-tracking
/// window. Valid only while mutators are suspended.
pub struct RuntimeCallContext<'a> {
    entries: Vec<Arc<ExternalObjectContext>>,
    pos: usize,
    ref_cache: &'a RefCache,
    runtime: &'a HostRuntime,
}

impl<'a> RuntimeCallContext<'a> {
    pub(crate) fn new(cache: &'a ExtObjectCache, runtime: &'a HostRuntime) -> Self {
        debug_assert!(runtime.is_suspended());
        // Mutators stay suspended for the whole window, so the snapshot is
        // stable against cache churn.
        let entries = unsafe { cache.snapshot_during_suspension() };
        Self {
            entries,
            pos: 0,
            ref_cache: cache.ref_cache(),
            runtime,
        }
    }

    /// The next known external object context, or `None` at the end.
    pub fn iterator_next(&mut self) -> Option<Arc<ExternalObjectContext>> {
        let next = self.entries.get(self.pos).cloned();
        if next.is_some() {
            self.pos += 1;
        }
        next
    }

    /// Record a reference path from an external object's managed proxy to the
    /// managed target behind `handle`. Returns whether a link was recorded;
    /// self-loops are suppressed.
    pub fn found_reference_path(
        &mut self,
        context: &ExternalObjectContext,
        handle: ObjectHandle,
    ) -> bool {
        debug_assert!(self.runtime.is_suspended());

        let Some(source) = context.object_ref(self.runtime) else {
            return false;
        };
        let Some(target) = self.runtime.handles().resolve(handle) else {
            return false;
        };
        if source == target {
            return false;
        }

        trace!(?source, ?target, "found reference path");
        self.ref_cache
            .add_reference(self.runtime.handles(), source, target);
        true
    }
}

impl ComWrappers {
    /// Hook invoked by the GC when a collection starts.
    ///
    /// Collections below generation 2 are ignored, which also keeps nested
    /// start/finish pairs (a foreground collection inside a background one)
    /// from re-entering the tracking window.
    pub fn on_gc_started(&self, condemned_generation: i32) {
        if condemned_generation < 2 {
            return;
        }
        let Some(cache) = self.cache_no_create() else {
            return;
        };

        debug!("begin external object reference tracking");
        cache
            .ref_cache()
            .reset_dependent_handles(self.runtime().handles());

        let mut cxt = RuntimeCallContext::new(cache, self.runtime());
        self.interop().begin_external_object_reference_tracking(&mut cxt);

        cache
            .ref_cache()
            .shrink_dependent_handles(self.runtime().handles());
    }

    /// Hook invoked by the GC when a collection finishes. Gated like
    /// [`Self::on_gc_started`].
    pub fn on_gc_finished(&self, condemned_generation: i32) {
        if condemned_generation < 2 {
            return;
        }
        if self.cache_no_create().is_none() {
            return;
        }
        self.interop().end_external_object_reference_tracking();
        debug!("end external object reference tracking");
    }

    /// Notification that a context's managed proxy has been reclaimed. Runs
    /// on the GC thread during suspension.
    pub fn mark_external_com_object_context_collected(
        &self,
        context: &Arc<ExternalObjectContext>,
    ) {
        debug_assert!(self.runtime().is_suspended());
        debug_assert!(context.is_active());
        context.mark_collected();

        let in_cache = context.is_set(ContextFlags::IN_CACHE);
        debug!(context = ?context, in_cache, "marked external object context collected");
        if in_cache {
            if let Some(cache) = self.cache_no_create() {
                // SAFETY: mutators are suspended, so no thread holds the
                // cache lock.
                unsafe { cache.remove_during_suspension(context) };
            }
        }
    }

    /// Destroy a context the interop library no longer references.
    pub fn destroy_external_object_context(&self, context: &Arc<ExternalObjectContext>) {
        debug_assert!(!context.is_active());
        debug!(context = ?context, "destroying external object context");
        self.interop().destroy_wrapper_for_external(context);
    }

    /// Destroy the wrapper of a reclaimed managed object.
    pub fn destroy_managed_object_wrapper(&self, wrapper: NativePtr) {
        debug!(?wrapper, "destroying managed object wrapper");
        self.interop().destroy_wrapper_for_object(wrapper);
    }

    /// Mark a wrapper as activated through the native activation path. Not an
    /// error when `wrapper` is not one of this process's wrappers.
    pub fn mark_wrapper_as_com_activated(&self, wrapper: NativePtr) {
        let _ = self.interop().mark_com_activated(wrapper);
    }
}
