//! The invocation engine: a pooled-worker, fresh-context-per-call runtime
//! for user-supplied guest functions, with value marshalling, dependency
//! injection, promise settling, file staging, and host-mediated network and
//! platform bindings.
//!
//! The guest language engines themselves are external collaborators behind
//! the [`engine`] seam: opaque evaluators that load source, call values,
//! and register host-callable bindings.

pub mod bridge;
pub mod convert;
pub mod engine;
pub mod invoker;
pub mod request;
pub mod staging;
pub mod worker_pool;

#[cfg(any(test, feature = "testing"))]
pub mod test_helpers;


pub use engine::{
    CallArg,
    ContextOptions,
    EngineRegistry,
    GuestContext,
    GuestEngine,
    GuestValue,
    HostFunction,
    InterruptHandle,
};
pub use invoker::Invoker;
pub use request::{
    FileInput,
    InvocationRequest,
};
