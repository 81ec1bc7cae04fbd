//! # dotnet-interop
//!
//! Managed/native object-identity and lifetime bridge for a .NET-shaped
//! runtime. Managed objects handed to native code get a refcounted wrapper;
//! external refcounted objects handed to managed code get a proxy backed by an
//! external object context. An identity-keyed cache keeps round trips stable,
//! and a GC-time reference-tracking protocol turns cross-heap cycles into
//! dependent links the collector understands natively.
//!
//! ## Subsystems
//!
//! - **Wrapping service** (`wrappers`): the two get-or-create operations and
//!   the entry points layered on them.
//! - **External-object cache** (`cache`, `context`): identity to context
//!   mapping with cooperative-mode locking and GC-suspension bypass.
//! - **Reference tracking** (`gc`, `ref_cache`): the major-collection window
//!   driving the tracker runtime and recording discovered edges.
//! - **Host runtime model** (`runtime`): object, sync-block and handle tables
//!   plus thread state, with a stop-the-world collection driver.

pub mod bridge;
pub mod cache;
pub mod context;
pub mod error;
pub mod flags;
pub mod gc;
pub mod interop;
pub mod policy;
pub mod ref_cache;
pub mod runtime;
mod wrappers;

pub use bridge::{ComWrappers, GcRequest};
pub use context::ExternalObjectContext;
pub use error::InteropError;
pub use flags::{
    ComWrappersScenario, ContextFlags, CreateComInterfaceFlags, CreateObjectFlags,
};
pub use gc::RuntimeCallContext;
pub use interop::{
    ExternalWrapperResult, IdentityVtable, InterfaceId, InteropLib, NativePtr, VtableBlock,
};
pub use policy::{
    CustomQueryInterfaceResult, TryInvokeCustomQueryInterfaceResult, WrapperPolicy,
};
