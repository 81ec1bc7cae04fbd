//! Flag sets shared with the managed ComWrappers surface.
//!
//! The numeric values are bit-compatible with the managed enum definitions and
//! must not be renumbered.

use bitflags::bitflags;

bitflags! {
    /// Options for creating a managed proxy for an external object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateObjectFlags: u32 {
        /// The external object is managed by the reference-tracker runtime.
        const TRACKER_OBJECT = 1;
        /// Never consult or populate the identity cache.
        const UNIQUE_INSTANCE = 2;
        /// The proxy participates in aggregation with the external object.
        const AGGREGATED = 4;
        /// Unwrap to the underlying managed object if the instance is one of
        /// this process's wrappers.
        const UNWRAP = 8;
    }
}

bitflags! {
    /// Options for creating a native wrapper for a managed object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateComInterfaceFlags: u32 {
        /// The caller supplies its own base-interface implementation.
        const CALLER_DEFINED_IUNKNOWN = 1;
        /// The wrapper supports the reference-tracker runtime.
        const TRACKER_SUPPORT = 2;
    }
}

bitflags! {
    /// State bits of an external object context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextFlags: u32 {
        /// The managed proxy has been reclaimed. Terminal.
        const COLLECTED = 1;
        /// The external object belongs to the reference-tracker runtime.
        const REFERENCE_TRACKER = 2;
        /// The context is a member of the external-object cache.
        const IN_CACHE = 4;
    }
}

/// Which ComWrappers implementation drives a wrapping request.
///
/// Values match the managed definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ComWrappersScenario {
    Instance = 0,
    TrackerSupportGlobalInstance = 1,
    MarshallingGlobalInstance = 2,
}
