//! Prometheus metrics for asto.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`
//! and defines the metric names recorded by storage backends and the
//! storage lock.  Recording is a no-op until [`init_metrics`] runs.

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

// -- Metric name constants ----------------------------------------------------

/// Total storage operations (counter). Labels: operation, status.
pub const STORAGE_OPERATIONS_TOTAL: &str = "asto_storage_operations_total";

/// Total lock acquisition attempts (counter). Labels: outcome.
pub const LOCK_ATTEMPTS_TOTAL: &str = "asto_lock_attempts_total";

/// Total lock releases (counter).
pub const LOCK_RELEASES_TOTAL: &str = "asto_lock_releases_total";

// -- Global recorder installation ---------------------------------------------

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the process-wide Prometheus recorder on first use and return its
/// handle.  Later calls return the same handle without reinstalling.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Attach help text to the storage and lock counters.
pub fn describe_metrics() {
    describe_counter!(STORAGE_OPERATIONS_TOTAL, "Total storage operations by type");
    describe_counter!(LOCK_ATTEMPTS_TOTAL, "Total lock acquisition attempts by outcome");
    describe_counter!(LOCK_RELEASES_TOTAL, "Total lock releases");
}

/// Render the current metrics in Prometheus exposition format, or `None`
/// if no recorder has been installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

// -- Recording helpers --------------------------------------------------------

/// Record the outcome of one storage operation.
pub(crate) fn record_storage_op<T>(operation: &'static str, result: &Result<T, crate::errors::StorageError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    counter!(STORAGE_OPERATIONS_TOTAL, "operation" => operation, "status" => status).increment(1);
}

/// Record one lock attempt. `outcome` is `acquired`, `conflict` or `error`.
pub(crate) fn record_lock_attempt(outcome: &'static str) {
    counter!(LOCK_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
}

pub(crate) fn record_lock_release() {
    counter!(LOCK_RELEASES_TOTAL).increment(1);
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;
    use crate::key::Key;

    #[test]
    fn test_init_metrics_is_idempotent() {
        let first = init_metrics() as *const PrometheusHandle;
        let second = init_metrics() as *const PrometheusHandle;
        assert_eq!(first, second);
        describe_metrics();
    }

    #[test]
    fn test_recorded_counters_are_rendered() {
        init_metrics();
        record_storage_op::<()>("delete", &Err(StorageError::not_found(&Key::new("k"))));
        record_lock_attempt("conflict");
        record_lock_release();

        let body = render().expect("recorder installed");
        assert!(body.contains(STORAGE_OPERATIONS_TOTAL));
        assert!(body.contains("status=\"NotFound\""));
        assert!(body.contains(LOCK_ATTEMPTS_TOTAL));
        assert!(body.contains(LOCK_RELEASES_TOTAL));
    }
}
