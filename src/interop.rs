//! The seam to the interop library that owns wrapper v-tables and native
//! reference counting.

use std::ffi::c_void;
use std::fmt;
use std::num::NonZeroUsize;

use crate::context::ExternalObjectContext;
use crate::error::InteropError;
use crate::flags::{CreateComInterfaceFlags, CreateObjectFlags};
use crate::gc::RuntimeCallContext;
use crate::runtime::handles::ObjectHandle;

/// An opaque pointer into the native object model.
///
/// When used as a cache key this must be the canonical identity pointer for
/// the object, obtained by querying it for the identity interface.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativePtr(NonZeroUsize);

impl NativePtr {
    pub fn new(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(NativePtr)
    }

    pub fn addr(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.0)
    }
}

/// A block of computed wrapper v-tables, opaque to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VtableBlock {
    pub data: usize,
    pub count: u32,
}

impl VtableBlock {
    /// A layout with no native interfaces. Still a valid wrapper layout.
    pub const EMPTY: Self = VtableBlock { data: 0, count: 0 };

    /// Whether the block can back a wrapper: real entries, or an explicitly
    /// empty layout.
    pub fn is_usable(self) -> bool {
        (self.data != 0 && self.count > 0) || self.count == 0
    }
}

/// Interface identifier in the native type-query protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub [u8; 16]);

pub type QueryInterfaceFn =
    unsafe extern "C" fn(*mut c_void, *const InterfaceId, *mut *mut c_void) -> i32;
pub type AddRefFn = unsafe extern "C" fn(*mut c_void) -> u32;
pub type ReleaseFn = unsafe extern "C" fn(*mut c_void) -> u32;

/// Function pointers implementing the identity interface's three base methods.
#[derive(Clone, Copy)]
pub struct IdentityVtable {
    pub query_interface: QueryInterfaceFn,
    pub add_ref: AddRefFn,
    pub release: ReleaseFn,
}

/// Result of [`InteropLib::create_wrapper_for_external`].
#[derive(Debug, Clone, Copy)]
pub struct ExternalWrapperResult {
    /// The external object is managed by the reference-tracker runtime.
    pub from_tracker_runtime: bool,
}

/// Operations the interop library provides to the runtime.
///
/// Wrapper layout, type-query dispatch and native reference counting all live
/// behind this trait; the runtime only tracks identity and lifetime.
pub trait InteropLib: Send + Sync {
    /// Create a native wrapper for the managed object behind `instance`.
    ///
    /// The returned wrapper carries one reference owned by the caller. The
    /// library takes ownership of `instance` and releases it when the wrapper
    /// loses its last native reference.
    fn create_wrapper_for_object(
        &self,
        instance: ObjectHandle,
        vtables: VtableBlock,
        flags: CreateComInterfaceFlags,
    ) -> Result<NativePtr, InteropError>;

    /// Destroy a wrapper whose managed object has been reclaimed.
    fn destroy_wrapper_for_object(&self, wrapper: NativePtr);

    /// Drop one native reference from a wrapper.
    fn release_wrapper(&self, wrapper: NativePtr);

    /// Take the native references required to track `identity` and report
    /// whether the external object belongs to the tracker runtime.
    fn create_wrapper_for_external(
        &self,
        identity: NativePtr,
        flags: CreateObjectFlags,
    ) -> Result<ExternalWrapperResult, InteropError>;

    /// Release the native references held for `context`'s identity.
    fn destroy_wrapper_for_external(&self, context: &ExternalObjectContext);

    /// Whether the wrapper still holds a live managed target.
    fn is_active_wrapper(&self, wrapper: NativePtr) -> Result<bool, InteropError>;

    /// Rebind an inactive wrapper to a fresh handle of its resurrected managed
    /// target. Does not add a reference.
    fn reactivate_wrapper(
        &self,
        wrapper: NativePtr,
        instance: ObjectHandle,
    ) -> Result<(), InteropError>;

    /// If `native` is a wrapper produced by this process, the handle of the
    /// managed object it wraps.
    fn get_object_for_wrapper(&self, native: NativePtr) -> Option<ObjectHandle>;

    /// Whether the wrapper was activated through the native activation path.
    fn is_com_activated(&self, native: NativePtr) -> bool;

    /// Mark a wrapper as activated through the native activation path.
    /// Invalid-argument failures are expected when `native` is not a wrapper.
    fn mark_com_activated(&self, native: NativePtr) -> Result<(), InteropError>;

    /// Detach `context` from the tracker runtime. Idempotent and safe to call
    /// on non-tracker contexts.
    fn separate_wrapper_from_tracker_runtime(&self, context: &ExternalObjectContext);

    /// Drive the tracker runtime over every known external object, reporting
    /// reference paths back through `cxt`. Called only while mutators are
    /// suspended for a major collection.
    fn begin_external_object_reference_tracking(&self, cxt: &mut RuntimeCallContext<'_>);

    fn end_external_object_reference_tracking(&self);

    /// The function pointers implementing the identity interface.
    fn get_identity_vtable_impl(&self) -> IdentityVtable;
}
