//! The wrapping service: managed object to native wrapper, external object to
//! managed proxy, and the entry points layered on both.

use std::sync::Arc;

use tracing::debug;

use crate::bridge::ComWrappers;
use crate::context::{ExternalObjectContext, ExternalWrapperHolder};
use crate::error::InteropError;
use crate::flags::{
    ComWrappersScenario, ContextFlags, CreateComInterfaceFlags, CreateObjectFlags,
};
use crate::interop::{IdentityVtable, InterfaceId, NativePtr};
use crate::policy::{
    CustomQueryInterfaceResult, TryInvokeCustomQueryInterfaceResult, WrapperPolicy,
};
use crate::runtime::handles::ObjectHandle;
use crate::runtime::heap::ObjectRef;
use crate::runtime::thread;

impl ComWrappers {
    /// Get or create the native wrapper for a managed object.
    ///
    /// A freshly created wrapper is returned with the reference it was created
    /// with; a reactivated wrapper gains no extra reference. `Ok(None)` means
    /// the policy produced no usable layout for the object.
    pub fn try_get_or_create_com_interface_for_object(
        &self,
        policy: Option<&Arc<dyn WrapperPolicy>>,
        instance: ObjectRef,
        flags: CreateComInterfaceFlags,
        scenario: ComWrappersScenario,
    ) -> Result<Option<NativePtr>, InteropError> {
        debug_assert_eq!(policy.is_some(), scenario == ComWrappersScenario::Instance);
        let _coop = thread::enter_cooperative();

        let runtime = self.runtime();
        let info = runtime.get_or_create_interop_info(instance);

        let mut wrapper_maybe = info.managed_object_wrapper();
        let mut new_wrapper = None;

        if wrapper_maybe.is_none() {
            // Compute the layout before taking any lock; the policy's result
            // is idempotent for a given object, so a discarded computation is
            // only wasted work.
            let policy = self.resolve_policy(policy, scenario)?;
            let vtables = policy.compute_vtables(scenario, instance, flags)?;

            // Another thread may have published a wrapper during the upcall.
            wrapper_maybe = info.managed_object_wrapper();
            if wrapper_maybe.is_none() && vtables.is_usable() {
                let handle = runtime.handles().create_strong(instance);
                let created =
                    match self.interop().create_wrapper_for_object(handle, vtables, flags) {
                        Ok(created) => created,
                        Err(e) => {
                            runtime.handles().destroy(handle);
                            return Err(e);
                        }
                    };

                if info.try_set_managed_object_wrapper(created) {
                    new_wrapper = Some(created);
                } else {
                    // Lost the publish race: drop the creation reference and
                    // take the winner.
                    self.interop().release_wrapper(created);
                    wrapper_maybe = info.managed_object_wrapper();
                    debug_assert!(wrapper_maybe.is_some());
                }
            }
        }

        if let Some(wrapper) = new_wrapper {
            debug!(?wrapper, "created managed object wrapper");
            return Ok(Some(wrapper));
        }

        if let Some(wrapper) = wrapper_maybe {
            // The stored wrapper may have outlived its managed target; rebind
            // it to a fresh handle before handing it out.
            if !self.interop().is_active_wrapper(wrapper)? {
                debug!(?wrapper, "reactivating managed object wrapper");
                let handle = runtime.handles().create_strong(instance);
                if let Err(e) = self.interop().reactivate_wrapper(wrapper, handle) {
                    runtime.handles().destroy(handle);
                    return Err(e);
                }
            }
        }

        Ok(wrapper_maybe)
    }

    /// Get or create the managed proxy for an external object.
    ///
    /// `identity` must already be the canonical identity pointer for the
    /// external object; canonicalization is the caller's responsibility.
    /// `Ok(None)` means the policy declined to produce a proxy.
    pub fn try_get_or_create_object_for_com_instance(
        &self,
        policy: Option<&Arc<dyn WrapperPolicy>>,
        identity: NativePtr,
        flags: CreateObjectFlags,
        scenario: ComWrappersScenario,
        wrapper_maybe: Option<ObjectRef>,
    ) -> Result<Option<ObjectRef>, InteropError> {
        debug_assert_eq!(policy.is_some(), scenario == ComWrappersScenario::Instance);
        let _coop = thread::enter_cooperative();

        let runtime = self.runtime();
        let cache = self.cache();

        let unique_instance = flags.contains(CreateObjectFlags::UNIQUE_INSTANCE);

        let mut unwrapped = None;
        if !unique_instance {
            let guard = cache.lock();
            if let Some(context) = guard.find(identity) {
                return Ok(context.object_ref(runtime));
            }

            // A cache miss during marshalling may still be one of our own
            // wrappers. Unwrap it to the original managed object so the
            // round trip object -> native -> object preserves identity,
            // unless the wrapper was activated through the native activation
            // path and therefore owns an external identity of its own.
            if scenario == ComWrappersScenario::MarshallingGlobalInstance {
                if let Some(handle) = self.interop().get_object_for_wrapper(identity) {
                    if !self.interop().is_com_activated(identity) {
                        unwrapped = Some(handle);
                    }
                }
            }
        }

        if let Some(handle) = unwrapped {
            return Ok(runtime.handles().resolve(handle));
        }

        // Take the native references for the possibly new external object.
        let result = {
            let _preempt = thread::enter_preemptive();
            self.interop().create_wrapper_for_external(identity, flags)?
        };
        let holder = ExternalWrapperHolder::new(
            self.interop(),
            Arc::new(ExternalObjectContext::new(
                identity,
                runtime.threads().context_cookie(),
            )),
        );

        // The caller may have supplied the proxy; otherwise ask the policy
        // for one.
        let proxy = match wrapper_maybe {
            Some(supplied) => Some(supplied),
            None => match self.resolve_policy(policy, scenario) {
                Ok(policy) => policy.create_object(scenario, identity, flags)?,
                // No registered global instance behaves like a declined
                // creation; the caller decides whether that is an error.
                Err(InteropError::NoGlobalInstance) => None,
                Err(e) => return Err(e),
            },
        };

        let Some(proxy) = proxy else {
            // The holder returns the native references on the way out.
            return Ok(None);
        };

        let mut context_flags = ContextFlags::empty();
        if result.from_tracker_runtime {
            context_flags |= ContextFlags::REFERENCE_TRACKER;
        }
        if !unique_instance {
            context_flags |= ContextFlags::IN_CACHE;
        }
        let sync_block = runtime.get_or_create_sync_block(proxy);
        holder.context().initialize(sync_block, context_flags);

        let published = if unique_instance {
            holder.context().clone()
        } else {
            // Publication point: after this, other threads can observe the
            // context even though the proxy's back-pointer still lags.
            let mut guard = cache.lock();
            guard.find_or_add(identity, holder.context().clone())
        };

        if Arc::ptr_eq(&published, holder.context()) {
            // The new context went in (or a unique instance was requested);
            // bind the proxy's sync block back to it. The caller may have
            // supplied a wrapper that is already bound elsewhere, and an
            // object can host at most one context.
            let info = runtime.get_or_create_interop_info(proxy);
            if !info.try_set_external_object_context(published.clone()) {
                if published.is_set(ContextFlags::IN_CACHE) {
                    cache.lock().remove(&published);
                }
                return Err(InteropError::WrapperAlreadyBound);
            }
            let context = holder.detach();
            debug_assert!(context.is_active());
            debug!(context = ?context, unique_instance, "created external object context");
        }
        // When another context won the race, the holder releases the fresh
        // one and the freshly created proxy is still handed back; the next
        // lookup returns the cached winner.

        Ok(Some(proxy))
    }

    /// Marshalling fast path for managed to native. `Ok(None)` when no global
    /// instance is registered for marshalling.
    pub fn try_get_or_create_com_interface_for_object_marshalling(
        &self,
        instance: ObjectRef,
    ) -> Result<Option<NativePtr>, InteropError> {
        if !self.is_global_instance_registered_for_marshalling() {
            return Ok(None);
        }
        self.try_get_or_create_com_interface_for_object(
            None,
            instance,
            CreateComInterfaceFlags::TRACKER_SUPPORT,
            ComWrappersScenario::MarshallingGlobalInstance,
        )
    }

    /// Marshalling fast path for native to managed. `Ok(None)` when no global
    /// instance is registered for marshalling.
    pub fn try_get_or_create_object_for_com_instance_marshalling(
        &self,
        identity: NativePtr,
        unique_instance: bool,
    ) -> Result<Option<ObjectRef>, InteropError> {
        if !self.is_global_instance_registered_for_marshalling() {
            return Ok(None);
        }
        let mut flags = CreateObjectFlags::TRACKER_OBJECT;
        if unique_instance {
            flags |= CreateObjectFlags::UNIQUE_INSTANCE;
        }
        self.try_get_or_create_object_for_com_instance(
            None,
            identity,
            flags,
            ComWrappersScenario::MarshallingGlobalInstance,
            None,
        )
    }

    /// Produce the native tracker target for an external object: its managed
    /// proxy, wrapped back out as a native wrapper.
    pub fn get_or_create_tracker_target_for_external(
        &self,
        identity: NativePtr,
        external_object_flags: CreateObjectFlags,
        tracker_target_flags: CreateComInterfaceFlags,
    ) -> Result<NativePtr, InteropError> {
        let _coop = thread::enter_cooperative();

        let proxy = self
            .try_get_or_create_object_for_com_instance(
                None,
                identity,
                external_object_flags,
                ComWrappersScenario::TrackerSupportGlobalInstance,
                None,
            )?
            .ok_or(InteropError::PolicyReturnedNull)?;

        let target = self
            .try_get_or_create_com_interface_for_object(
                None,
                proxy,
                tracker_target_flags,
                ComWrappersScenario::TrackerSupportGlobalInstance,
            )?
            .ok_or(InteropError::WrapperUnavailable)?;

        debug!(?proxy, ?target, "created tracker target for external object");
        Ok(target)
    }

    /// Release every tracker-runtime proxy living in the calling thread's
    /// context, through the registered global instance.
    pub fn release_external_objects_on_current_thread(&self) -> Result<(), InteropError> {
        let _coop = thread::enter_cooperative();

        let cookie = self.runtime().threads().context_cookie();
        let snapshot = match self.cache_no_create() {
            Some(cache) => cache.snapshot_filtered(
                self.runtime(),
                self.interop(),
                ContextFlags::REFERENCE_TRACKER,
                cookie,
            ),
            None => Vec::new(),
        };

        let policy = self
            .global_instance()
            .ok_or(InteropError::NoGlobalInstance)?;
        policy.release_objects(snapshot)
    }

    /// Invoke the custom type-query implementation of the managed object
    /// behind `handle`.
    ///
    /// Callable from threads the runtime has never seen; the thread is
    /// attached on demand. Never runs managed code on the GC thread.
    pub fn try_invoke_icustom_query_interface(
        &self,
        handle: ObjectHandle,
        iid: &InterfaceId,
    ) -> (TryInvokeCustomQueryInterfaceResult, Option<NativePtr>) {
        // A query on the GC thread arrives while managed code cannot run;
        // report it so the caller can fall back.
        if self.runtime().is_gc_thread() {
            return (TryInvokeCustomQueryInterfaceResult::OnGcThread, None);
        }

        let threads = self.runtime().threads();
        if !threads.is_attached() && !threads.try_attach() {
            return (TryInvokeCustomQueryInterfaceResult::FailedToInvoke, None);
        }

        let Some(policy) = self.global_instance() else {
            return (TryInvokeCustomQueryInterfaceResult::FailedToInvoke, None);
        };
        let Some(instance) = self.runtime().handles().resolve(handle) else {
            return (TryInvokeCustomQueryInterfaceResult::FailedToInvoke, None);
        };

        let _coop = thread::enter_cooperative();
        match policy.call_icustom_query_interface(instance, iid) {
            CustomQueryInterfaceResult::Handled(obj) => {
                (TryInvokeCustomQueryInterfaceResult::Handled, Some(obj))
            }
            CustomQueryInterfaceResult::NotHandled => {
                (TryInvokeCustomQueryInterfaceResult::NotHandled, None)
            }
            CustomQueryInterfaceResult::Failed => {
                (TryInvokeCustomQueryInterfaceResult::Failed, None)
            }
        }
    }

    /// Function pointers for the identity interface's three base methods.
    pub fn get_identity_vtable_impl(&self) -> IdentityVtable {
        self.interop().get_identity_vtable_impl()
    }
}
