//! Logging utilities for the jsbridge runtime
//!
//! Lightweight structured events for proxy transitions, overload picks,
//! context hand-offs and marshalling failures. The host application owns the
//! subscriber; `init_runtime_logging` is a convenience for tests and tools.

pub use tracing::{debug, error, info, trace, warn, Level};

use crate::value::ObjectId;

/// Install a compact subscriber honouring `RUST_LOG`, defaulting to
/// `jsbridge_runtime=debug` in debug builds and `info` otherwise.
pub fn init_runtime_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            EnvFilter::new("jsbridge_runtime=debug")
        }
        #[cfg(not(debug_assertions))]
        {
            EnvFilter::new("jsbridge_runtime=info")
        }
    });

    fmt()
        .with_env_filter(filter)
        .compact()
        .try_init()
        .ok(); // Ignore error if already initialized
}

/// Log a host object gaining a guest wrapper
#[inline]
pub fn log_proxy_attached(id: ObjectId, class: &str) {
    trace!(
        target: "proxy",
        object = %id,
        class,
        "host object proxied"
    );
}

/// Log a proxy entry being torn down
#[inline]
pub fn log_proxy_released(id: ObjectId, reason: &str) {
    debug!(
        target: "proxy",
        object = %id,
        reason,
        "proxy released"
    );
}

/// Log the overload picked for a call
#[inline]
pub fn log_overload_resolved(member: &str, candidates: usize, chosen: usize) {
    trace!(
        target: "overload",
        member,
        candidates,
        chosen,
        "overload resolved"
    );
}

/// Log an overload resolution failure
#[inline]
pub fn log_overload_failed(member: &str, error: &str) {
    debug!(
        target: "overload",
        member,
        error,
        "overload resolution failed"
    );
}

/// Log an adapter invocation from the guest
#[inline]
pub fn log_adapter_call(adapter: &str, args_count: usize) {
    trace!(
        target: "marshal",
        adapter,
        args_count,
        "adapter call"
    );
}

/// Log a conversion failure surfaced to the guest
#[inline]
pub fn log_conversion_error(adapter: &str, error: &str) {
    debug!(
        target: "marshal",
        adapter,
        error,
        "conversion failed"
    );
}

/// Log a host exception surfaced to the guest
#[inline]
pub fn log_host_exception(binding: &str, error: &str) {
    warn!(
        target: "marshal",
        binding,
        error,
        "host exception"
    );
}
