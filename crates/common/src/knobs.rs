//! Runtime tunables for the FaaS host.
//!
//! Each knob is a `LazyLock` static read once from the environment variable
//! of the same name and carrying a documented default. Aside from log
//! filtering, this module is the complete inventory of configuration the
//! host responds to.

use std::{
    sync::LazyLock,
    time::Duration,
};

use crate::env::env_config;

/// Path to the binary IP blocklist consulted by the egress filter. Relative
/// paths resolve against the process working directory.
pub static EGRESS_BLOCKLIST_FILE: LazyLock<String> =
    LazyLock::new(|| env_config("EGRESS_BLOCKLIST_FILE", String::from("blocklist.bin")));

/// How often the background reloader polls the blocklist file for changes.
pub static EGRESS_RELOAD_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("EGRESS_RELOAD_INTERVAL_SECS", 60)));

/// Maximum number of invocation workers. 0 -> max(number of cores, 2).
/// Invocations are bursty and short; zero resident workers avoids thread
/// hoarding while still allowing parallelism up to the core count.
pub static MAX_INVOCATION_WORKERS: LazyLock<usize> =
    LazyLock::new(|| env_config("MAX_INVOCATION_WORKERS", 0));

/// How long an idle invocation worker waits for work before retiring.
pub static WORKER_IDLE_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("WORKER_IDLE_TIMEOUT_SECS", 30)));

/// Connect timeout for outbound requests issued on behalf of guests.
pub static NET_CONNECT_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("NET_CONNECT_TIMEOUT_SECS", 10)));

/// End-to-end timeout for outbound requests issued on behalf of guests.
pub static NET_REQUEST_TIMEOUT: LazyLock<Duration> =
    LazyLock::new(|| Duration::from_secs(env_config("NET_REQUEST_TIMEOUT_SECS", 20)));

/// Per-invocation timeout applied by the HTTP dispatcher, in milliseconds.
pub static HTTP_INVOKE_TIMEOUT_MS: LazyLock<u64> =
    LazyLock::new(|| env_config("HTTP_INVOKE_TIMEOUT_MS", 5000));

/// Directory holding persisted function assets and resource records,
/// resolved against the process working directory.
pub static FAAS_STORE_DIR: LazyLock<String> =
    LazyLock::new(|| env_config("FAAS_STORE_DIR", String::from(".faas")));
