use thiserror::Error;

/// Errors surfaced by the wrapping service and its entry points.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InteropError {
    /// The wrapper policy returned no object where one was required.
    #[error("wrapper policy returned no object for the external instance")]
    PolicyReturnedNull,

    /// The supplied managed object already hosts an external object context.
    #[error("managed object is already bound to an external object context")]
    WrapperAlreadyBound,

    /// The interop library reported a failing status.
    #[error("interop library call failed with status {0:#010x}")]
    Interop(i32),

    /// A managed policy upcall failed.
    #[error("wrapper policy upcall failed: {0}")]
    Policy(String),

    /// No global ComWrappers instance has been registered.
    #[error("no global ComWrappers instance is registered")]
    NoGlobalInstance,

    /// No native wrapper could be produced for the managed object.
    #[error("no native wrapper could be created for the managed object")]
    WrapperUnavailable,
}
