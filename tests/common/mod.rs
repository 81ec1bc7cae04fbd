//! Shared fixture: a working interop library and wrapper policy over the host
//! runtime model.
#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use dotnet_interop::runtime::handles::ObjectHandle;
use dotnet_interop::runtime::heap::ObjectRef;
use dotnet_interop::runtime::HostRuntime;
use dotnet_interop::{
    ComWrappers, ComWrappersScenario, CreateComInterfaceFlags, CreateObjectFlags,
    CustomQueryInterfaceResult, ExternalObjectContext, ExternalWrapperResult, IdentityVtable,
    InterfaceId, InteropError, InteropLib, NativePtr, RuntimeCallContext, VtableBlock,
    WrapperPolicy,
};

pub const E_FAIL: i32 = 0x8000_4005u32 as i32;
pub const E_INVALIDARG: i32 = 0x8007_0057u32 as i32;
pub const E_NOINTERFACE: i32 = 0x8000_4002u32 as i32;

pub const IID_TEST: InterfaceId = InterfaceId([0xAB; 16]);

struct WrapperRecord {
    instance: Option<ObjectHandle>,
    /// Native references held by ordinary native code, including the creation
    /// reference handed to the caller.
    ref_count: u32,
    /// Native references held by tracked external objects; these do not keep
    /// the managed target rooted on their own.
    tracker_ref_count: u32,
    active: bool,
    com_activated: bool,
    flags: CreateComInterfaceFlags,
    vtables: VtableBlock,
}

#[derive(Default)]
struct ExternalRecord {
    tracker: bool,
    /// References held by native code outside the tracker graph.
    external_ref_count: u32,
    /// Outstanding create_wrapper_for_external calls not yet destroyed.
    bridge_refs: u32,
    /// Instance handles of wrappers this external object references; reported
    /// as reference paths during tracking.
    native_refs: Vec<ObjectHandle>,
    /// Root keeping the managed proxy alive while the tracker demands it.
    proxy_root: Option<ObjectHandle>,
}

#[derive(Default)]
struct InteropState {
    wrappers: HashMap<NativePtr, WrapperRecord>,
    externals: HashMap<NativePtr, ExternalRecord>,
    destroyed_wrappers: Vec<NativePtr>,
    destroyed_contexts: Vec<NativePtr>,
    separated: Vec<NativePtr>,
    tracking_open: bool,
    tracking_windows: u32,
}

/// Test double for the interop library, including the tracker-runtime side of
/// the reference-tracking protocol.
pub struct TestInterop {
    runtime: Arc<HostRuntime>,
    engine: Mutex<Weak<ComWrappers>>,
    next_addr: AtomicUsize,
    fail_wrapper_create: AtomicBool,
    state: Mutex<InteropState>,
}

impl TestInterop {
    pub fn new(runtime: Arc<HostRuntime>) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            engine: Mutex::new(Weak::new()),
            next_addr: AtomicUsize::new(0x1000),
            fail_wrapper_create: AtomicBool::new(false),
            state: Mutex::new(InteropState::default()),
        })
    }

    pub fn set_engine(&self, com: &Arc<ComWrappers>) {
        *self.engine.lock() = Arc::downgrade(com);
    }

    fn alloc_addr(&self) -> NativePtr {
        let addr = self.next_addr.fetch_add(16, Ordering::Relaxed);
        NativePtr::new(addr).expect("non-zero address")
    }

    /// Register an external native object and return its identity.
    pub fn register_external(&self, tracker: bool) -> NativePtr {
        let identity = self.alloc_addr();
        self.state.lock().externals.insert(
            identity,
            ExternalRecord {
                tracker,
                ..ExternalRecord::default()
            },
        );
        identity
    }

    /// Set the number of non-tracker native references on an external object.
    pub fn set_external_ref_count(&self, identity: NativePtr, count: u32) {
        if let Some(record) = self.state.lock().externals.get_mut(&identity) {
            record.external_ref_count = count;
        }
    }

    /// Record that the external object `identity` natively references the
    /// managed object behind `wrapper`. The reference moves from the ordinary
    /// count to the tracker count.
    pub fn add_native_reference(&self, identity: NativePtr, wrapper: NativePtr) {
        let mut state = self.state.lock();
        let handle = {
            let record = state
                .wrappers
                .get_mut(&wrapper)
                .expect("unknown wrapper in add_native_reference");
            record.ref_count = record.ref_count.saturating_sub(1);
            record.tracker_ref_count += 1;
            record.instance.expect("wrapper without an instance handle")
        };
        state
            .externals
            .get_mut(&identity)
            .expect("unknown external in add_native_reference")
            .native_refs
            .push(handle);
    }

    /// Simulate the last native reference dropping off a wrapper.
    pub fn deactivate_wrapper(&self, wrapper: NativePtr) {
        let mut state = self.state.lock();
        if let Some(record) = state.wrappers.get_mut(&wrapper) {
            record.ref_count = 0;
            record.tracker_ref_count = 0;
            record.active = false;
            if let Some(handle) = record.instance.take() {
                self.runtime.handles().destroy(handle);
            }
        }
    }

    pub fn set_fail_wrapper_create(&self, fail: bool) {
        self.fail_wrapper_create.store(fail, Ordering::Relaxed);
    }

    pub fn wrapper_ref_count(&self, wrapper: NativePtr) -> u32 {
        self.state
            .lock()
            .wrappers
            .get(&wrapper)
            .map_or(0, |record| record.ref_count)
    }

    pub fn wrapper_is_active(&self, wrapper: NativePtr) -> bool {
        self.state
            .lock()
            .wrappers
            .get(&wrapper)
            .is_some_and(|record| record.active)
    }

    pub fn wrapper_instance_handle(&self, wrapper: NativePtr) -> Option<ObjectHandle> {
        self.state
            .lock()
            .wrappers
            .get(&wrapper)
            .and_then(|record| record.instance)
    }

    pub fn active_wrappers(&self) -> Vec<NativePtr> {
        self.state
            .lock()
            .wrappers
            .iter()
            .filter(|(_, record)| record.active)
            .map(|(wrapper, _)| *wrapper)
            .collect()
    }

    pub fn wrappers_created(&self) -> usize {
        let state = self.state.lock();
        state.wrappers.len() + state.destroyed_wrappers.len()
    }

    pub fn external_bridge_refs(&self, identity: NativePtr) -> u32 {
        self.state
            .lock()
            .externals
            .get(&identity)
            .map_or(0, |record| record.bridge_refs)
    }

    pub fn destroyed_wrappers(&self) -> Vec<NativePtr> {
        self.state.lock().destroyed_wrappers.clone()
    }

    pub fn destroyed_contexts(&self) -> Vec<NativePtr> {
        self.state.lock().destroyed_contexts.clone()
    }

    pub fn separated(&self) -> Vec<NativePtr> {
        self.state.lock().separated.clone()
    }

    pub fn is_tracking_open(&self) -> bool {
        self.state.lock().tracking_open
    }

    pub fn tracking_windows(&self) -> u32 {
        self.state.lock().tracking_windows
    }

    fn pegging_on(&self) -> bool {
        self.engine
            .lock()
            .upgrade()
            .map_or(true, |com| com.global_pegging_state())
    }
}

unsafe extern "C" fn test_query_interface(
    _this: *mut c_void,
    _iid: *const InterfaceId,
    out: *mut *mut c_void,
) -> i32 {
    if !out.is_null() {
        unsafe { *out = std::ptr::null_mut() };
    }
    E_NOINTERFACE
}

unsafe extern "C" fn test_add_ref(_this: *mut c_void) -> u32 {
    1
}

unsafe extern "C" fn test_release(_this: *mut c_void) -> u32 {
    0
}

impl InteropLib for TestInterop {
    fn create_wrapper_for_object(
        &self,
        instance: ObjectHandle,
        vtables: VtableBlock,
        flags: CreateComInterfaceFlags,
    ) -> Result<NativePtr, InteropError> {
        if self.fail_wrapper_create.load(Ordering::Relaxed) {
            // The caller keeps ownership of the instance handle on failure.
            return Err(InteropError::Interop(E_FAIL));
        }
        let wrapper = self.alloc_addr();
        self.state.lock().wrappers.insert(
            wrapper,
            WrapperRecord {
                instance: Some(instance),
                ref_count: 1,
                tracker_ref_count: 0,
                active: true,
                com_activated: false,
                flags,
                vtables,
            },
        );
        Ok(wrapper)
    }

    fn destroy_wrapper_for_object(&self, wrapper: NativePtr) {
        let mut state = self.state.lock();
        if let Some(record) = state.wrappers.remove(&wrapper) {
            if let Some(handle) = record.instance {
                self.runtime.handles().destroy(handle);
            }
        }
        state.destroyed_wrappers.push(wrapper);
    }

    fn release_wrapper(&self, wrapper: NativePtr) {
        let mut state = self.state.lock();
        if let Some(record) = state.wrappers.get_mut(&wrapper) {
            record.ref_count = record.ref_count.saturating_sub(1);
            if record.ref_count == 0 && record.tracker_ref_count == 0 {
                record.active = false;
                if let Some(handle) = record.instance.take() {
                    self.runtime.handles().destroy(handle);
                }
            }
        }
    }

    fn create_wrapper_for_external(
        &self,
        identity: NativePtr,
        flags: CreateObjectFlags,
    ) -> Result<ExternalWrapperResult, InteropError> {
        let mut state = self.state.lock();
        let record = state.externals.entry(identity).or_default();
        record.bridge_refs += 1;
        Ok(ExternalWrapperResult {
            from_tracker_runtime: record.tracker
                && flags.contains(CreateObjectFlags::TRACKER_OBJECT),
        })
    }

    fn destroy_wrapper_for_external(&self, context: &ExternalObjectContext) {
        let mut state = self.state.lock();
        let identity = context.identity();
        if let Some(record) = state.externals.get_mut(&identity) {
            record.bridge_refs = record.bridge_refs.saturating_sub(1);
        }
        state.destroyed_contexts.push(identity);
    }

    fn is_active_wrapper(&self, wrapper: NativePtr) -> Result<bool, InteropError> {
        Ok(self
            .state
            .lock()
            .wrappers
            .get(&wrapper)
            .is_some_and(|record| record.active))
    }

    fn reactivate_wrapper(
        &self,
        wrapper: NativePtr,
        instance: ObjectHandle,
    ) -> Result<(), InteropError> {
        let mut state = self.state.lock();
        match state.wrappers.get_mut(&wrapper) {
            Some(record) => {
                record.instance = Some(instance);
                record.active = true;
                Ok(())
            }
            None => Err(InteropError::Interop(E_INVALIDARG)),
        }
    }

    fn get_object_for_wrapper(&self, native: NativePtr) -> Option<ObjectHandle> {
        self.state
            .lock()
            .wrappers
            .get(&native)
            .and_then(|record| record.instance)
    }

    fn is_com_activated(&self, native: NativePtr) -> bool {
        self.state
            .lock()
            .wrappers
            .get(&native)
            .is_some_and(|record| record.com_activated)
    }

    fn mark_com_activated(&self, native: NativePtr) -> Result<(), InteropError> {
        let mut state = self.state.lock();
        match state.wrappers.get_mut(&native) {
            Some(record) => {
                record.com_activated = true;
                Ok(())
            }
            None => Err(InteropError::Interop(E_INVALIDARG)),
        }
    }

    fn separate_wrapper_from_tracker_runtime(&self, context: &ExternalObjectContext) {
        self.state.lock().separated.push(context.identity());
    }

    fn begin_external_object_reference_tracking(&self, cxt: &mut RuntimeCallContext<'_>) {
        {
            let mut state = self.state.lock();
            state.tracking_open = true;
            state.tracking_windows += 1;
        }
        let pegging = self.pegging_on();

        // Walk every known external object: decide whether its proxy stays
        // rooted, then report the reference paths out of it.
        while let Some(context) = cxt.iterator_next() {
            let identity = context.identity();
            let proxy = context.object_ref(&self.runtime);
            let refs = {
                let mut state = self.state.lock();
                let Some(record) = state.externals.get_mut(&identity) else {
                    continue;
                };
                let want_root = record.tracker
                    && pegging
                    && record.external_ref_count > 0
                    && context.is_active();
                match (want_root, record.proxy_root) {
                    (true, None) => {
                        if let Some(proxy) = proxy {
                            record.proxy_root =
                                Some(self.runtime.handles().create_strong(proxy));
                        }
                    }
                    (false, Some(handle)) => {
                        self.runtime.handles().destroy(handle);
                        record.proxy_root = None;
                    }
                    _ => {}
                }
                record.native_refs.clone()
            };
            for handle in refs {
                cxt.found_reference_path(&context, handle);
            }
        }

        // Wrappers whose only native references come from tracked objects
        // must not root their targets; the dependent links recorded above
        // carry their liveness instead.
        let state = self.state.lock();
        for record in state.wrappers.values() {
            if record.flags.contains(CreateComInterfaceFlags::TRACKER_SUPPORT) {
                if let Some(handle) = record.instance {
                    self.runtime.handles().set_rooting(handle, record.ref_count > 0);
                }
            }
        }
    }

    fn end_external_object_reference_tracking(&self) {
        self.state.lock().tracking_open = false;
    }

    fn get_identity_vtable_impl(&self) -> IdentityVtable {
        IdentityVtable {
            query_interface: test_query_interface,
            add_ref: test_add_ref,
            release: test_release,
        }
    }
}

/// Test double for the managed ComWrappers policy.
pub struct TestPolicy {
    runtime: Arc<HostRuntime>,
    pub vtables: Mutex<VtableBlock>,
    pub fail_compute: AtomicBool,
    pub return_null_object: AtomicBool,
    pub compute_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub created: Mutex<Vec<(NativePtr, ObjectRef)>>,
    pub released: Mutex<Vec<Vec<ObjectRef>>>,
    pub qi_result: Mutex<CustomQueryInterfaceResult>,
}

impl TestPolicy {
    pub fn new(runtime: Arc<HostRuntime>) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            vtables: Mutex::new(VtableBlock {
                data: 0x7000,
                count: 2,
            }),
            fail_compute: AtomicBool::new(false),
            return_null_object: AtomicBool::new(false),
            compute_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            qi_result: Mutex::new(CustomQueryInterfaceResult::NotHandled),
        })
    }

    pub fn last_release_batch(&self) -> Option<Vec<ObjectRef>> {
        self.released.lock().last().cloned()
    }
}

impl WrapperPolicy for TestPolicy {
    fn compute_vtables(
        &self,
        _scenario: ComWrappersScenario,
        _instance: ObjectRef,
        _flags: CreateComInterfaceFlags,
    ) -> Result<VtableBlock, InteropError> {
        self.compute_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_compute.load(Ordering::Relaxed) {
            return Err(InteropError::Policy("compute_vtables failed".into()));
        }
        Ok(*self.vtables.lock())
    }

    fn create_object(
        &self,
        _scenario: ComWrappersScenario,
        identity: NativePtr,
        _flags: CreateObjectFlags,
    ) -> Result<Option<ObjectRef>, InteropError> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        if self.return_null_object.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let proxy = self.runtime.heap().alloc();
        self.created.lock().push((identity, proxy));
        Ok(Some(proxy))
    }

    fn release_objects(&self, objects: Vec<ObjectRef>) -> Result<(), InteropError> {
        self.released.lock().push(objects);
        Ok(())
    }

    fn call_icustom_query_interface(
        &self,
        _instance: ObjectRef,
        _iid: &InterfaceId,
    ) -> CustomQueryInterfaceResult {
        *self.qi_result.lock()
    }
}

pub struct Fixture {
    pub runtime: Arc<HostRuntime>,
    pub interop: Arc<TestInterop>,
    pub policy: Arc<TestPolicy>,
    pub com: Arc<ComWrappers>,
}

impl Fixture {
    /// The policy as a trait object, for instance-scenario calls.
    pub fn policy_instance(&self) -> Arc<dyn WrapperPolicy> {
        self.policy.clone()
    }
}

pub fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let runtime = HostRuntime::new();
    let interop = TestInterop::new(runtime.clone());
    let com = Arc::new(ComWrappers::new(runtime.clone(), interop.clone()));
    interop.set_engine(&com);

    let policy = TestPolicy::new(runtime.clone());
    com.register_global_instance(policy.clone());

    Fixture {
        runtime,
        interop,
        policy,
        com,
    }
}
