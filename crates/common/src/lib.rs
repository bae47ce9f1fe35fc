//! Shared plumbing for the FaaS host: env-var knobs, HTTP error framing,
//! request ids, and filesystem helpers. Everything here is policy-free;
//! the interesting behavior lives in the crates that consume it.

pub mod env;
pub mod fs;
pub mod http;
pub mod knobs;

pub use crate::http::RequestId;
