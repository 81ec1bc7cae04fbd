//! Upcalls into the managed ComWrappers implementation.

use crate::error::InteropError;
use crate::flags::{ComWrappersScenario, CreateComInterfaceFlags, CreateObjectFlags};
use crate::interop::{InterfaceId, NativePtr, VtableBlock};
use crate::runtime::heap::ObjectRef;

/// Outcome of a managed object's custom type-query implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomQueryInterfaceResult {
    Handled(NativePtr),
    NotHandled,
    Failed,
}

/// Result of attempting to invoke a custom type query from native code.
///
/// Values match the native enumeration shared with the interop library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TryInvokeCustomQueryInterfaceResult {
    FailedToInvoke = -1,
    Handled = 0,
    NotHandled = 1,
    Failed = 2,
    OnGcThread = 3,
}

/// The managed policy that supplies wrapper layouts and proxy objects.
///
/// All four upcalls run in cooperative mode and may trigger a collection, so
/// callers must not hold raw references to managed objects across them.
pub trait WrapperPolicy: Send + Sync {
    /// Produce the v-table block for a managed object about to be wrapped.
    ///
    /// The runtime may call this before taking any lock and discard the
    /// result, so the returned layout must be idempotent for a given object.
    fn compute_vtables(
        &self,
        scenario: ComWrappersScenario,
        instance: ObjectRef,
        flags: CreateComInterfaceFlags,
    ) -> Result<VtableBlock, InteropError>;

    /// Produce a managed proxy for an external object. `None` is a valid
    /// outcome and propagates as "not created".
    fn create_object(
        &self,
        scenario: ComWrappersScenario,
        identity: NativePtr,
        flags: CreateObjectFlags,
    ) -> Result<Option<ObjectRef>, InteropError>;

    /// Release a batch of managed proxies on behalf of the tracker runtime.
    fn release_objects(&self, objects: Vec<ObjectRef>) -> Result<(), InteropError>;

    /// Forward a native type query to the managed object's custom
    /// implementation.
    fn call_icustom_query_interface(
        &self,
        instance: ObjectRef,
        iid: &InterfaceId,
    ) -> CustomQueryInterfaceResult;
}
