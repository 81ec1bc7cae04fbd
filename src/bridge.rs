//! The ComWrappers engine: shared services, global state and policy dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::cache::ExtObjectCache;
use crate::error::InteropError;
use crate::flags::ComWrappersScenario;
use crate::interop::InteropLib;
use crate::policy::WrapperPolicy;
use crate::runtime::handles::ObjectHandle;
use crate::runtime::thread::{self, ThreadMode};
use crate::runtime::HostRuntime;

/// How the interop library asks for a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcRequest {
    Default,
    FullBlocking,
}

/// Runtime support for ComWrappers: the managed/native wrapping services, the
/// external-object cache and the GC-time reference-tracking protocol.
///
/// One engine exists per host runtime. Its shared state is deliberately
/// small: the cache is installed on first use, the global policy instance and
/// the marshalling-registered flag are set once, and the pegging flag is a
/// plain atomic observed by the tracker runtime.
pub struct ComWrappers {
    runtime: Arc<HostRuntime>,
    interop: Arc<dyn InteropLib>,
    cache: OnceLock<ExtObjectCache>,
    global_instance: OnceLock<Arc<dyn WrapperPolicy>>,
    marshalling_registered: AtomicBool,
    pegging: AtomicBool,
}

impl ComWrappers {
    pub fn new(runtime: Arc<HostRuntime>, interop: Arc<dyn InteropLib>) -> Self {
        Self {
            runtime,
            interop,
            cache: OnceLock::new(),
            global_instance: OnceLock::new(),
            marshalling_registered: AtomicBool::new(false),
            // Pegging starts on; the tracker runtime turns it off for the
            // collection phases that unify cross-heap cycles.
            pegging: AtomicBool::new(true),
        }
    }

    pub fn runtime(&self) -> &Arc<HostRuntime> {
        &self.runtime
    }

    pub fn interop(&self) -> &dyn InteropLib {
        self.interop.as_ref()
    }

    /// The external-object cache, installing it on first use.
    pub(crate) fn cache(&self) -> &ExtObjectCache {
        self.cache.get_or_init(ExtObjectCache::new)
    }

    /// The external-object cache if one has been installed.
    pub(crate) fn cache_no_create(&self) -> Option<&ExtObjectCache> {
        self.cache.get()
    }

    /// Number of contexts currently cached. Zero before any proxy exists.
    pub fn cached_context_count(&self) -> usize {
        self.cache_no_create().map_or(0, ExtObjectCache::len)
    }

    /// Number of reference paths recorded in the current tracking window.
    pub fn tracked_reference_count(&self) -> usize {
        self.cache_no_create().map_or(0, |cache| cache.ref_cache().len())
    }

    /// Register the policy used for global-instance scenarios. Set once;
    /// returns whether this call performed the registration.
    pub fn register_global_instance(&self, policy: Arc<dyn WrapperPolicy>) -> bool {
        self.global_instance.set(policy).is_ok()
    }

    /// Gate the marshalling fast paths on the registered global instance.
    /// Set once.
    pub fn set_global_instance_registered_for_marshalling(&self) {
        debug_assert!(!self.marshalling_registered.load(Ordering::Relaxed));
        self.marshalling_registered.store(true, Ordering::Release);
    }

    pub fn is_global_instance_registered_for_marshalling(&self) -> bool {
        self.marshalling_registered.load(Ordering::Acquire)
    }

    pub(crate) fn global_instance(&self) -> Option<&Arc<dyn WrapperPolicy>> {
        self.global_instance.get()
    }

    /// Resolve the effective policy for a request: the caller's instance, or
    /// the registered global one for global-instance scenarios.
    pub(crate) fn resolve_policy<'p>(
        &'p self,
        policy: Option<&'p Arc<dyn WrapperPolicy>>,
        scenario: ComWrappersScenario,
    ) -> Result<&'p Arc<dyn WrapperPolicy>, InteropError> {
        debug_assert_eq!(policy.is_some(), scenario == ComWrappersScenario::Instance);
        match policy {
            Some(policy) => Ok(policy),
            None => self.global_instance().ok_or(InteropError::NoGlobalInstance),
        }
    }

    /// Whether boundary objects rooted through the tracker runtime are frozen
    /// in place for the current GC phases.
    pub fn global_pegging_state(&self) -> bool {
        self.pegging.load(Ordering::SeqCst)
    }

    pub fn set_global_pegging_state(&self, state: bool) {
        self.pegging.store(state, Ordering::SeqCst);
    }

    /// Attribute native memory retained on behalf of external objects.
    pub fn add_memory_pressure_for_external(&self, bytes: u64) {
        debug_assert_eq!(thread::current_mode(), ThreadMode::Preemptive);
        self.runtime.add_memory_pressure(bytes);
    }

    pub fn remove_memory_pressure_for_external(&self, bytes: u64) {
        debug_assert_eq!(thread::current_mode(), ThreadMode::Preemptive);
        self.runtime.remove_memory_pressure(bytes);
    }

    /// Run a collection on behalf of the interop library.
    pub fn request_garbage_collection_for_external(&self, request: GcRequest) {
        // The host model only runs blocking full collections.
        let _ = request;
        self.runtime.collect(self, 2);
    }

    /// Release an instance handle owned by the interop library.
    pub fn delete_object_instance_handle(&self, handle: ObjectHandle) {
        self.runtime.handles().destroy(handle);
    }
}
