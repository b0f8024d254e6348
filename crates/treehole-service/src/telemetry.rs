use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Category of a failed request, as counted on `/api/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCode {
    Validation,
    QuotaExceeded,
    Unauthorized,
    Internal,
}

#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
pub struct ServiceTelemetry {
    requests_total: AtomicU64,
    requests_success_total: AtomicU64,
    requests_failure_total: AtomicU64,
    timeout_total: AtomicU64,
    validation_error_total: AtomicU64,
    quota_exceeded_total: AtomicU64,
    unauthorized_total: AtomicU64,
    internal_error_total: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_field_names)]
pub struct ServiceTelemetrySnapshot {
    pub requests_total: u64,
    pub requests_success_total: u64,
    pub requests_failure_total: u64,
    pub timeout_total: u64,
    pub validation_error_total: u64,
    pub quota_exceeded_total: u64,
    pub unauthorized_total: u64,
    pub internal_error_total: u64,
}

impl ServiceTelemetry {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.requests_success_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one failed request. Call at most once per request.
    pub fn record_failure(&self, code: FailureCode, timeout: bool) {
        self.requests_failure_total.fetch_add(1, Ordering::Relaxed);
        if timeout {
            self.timeout_total.fetch_add(1, Ordering::Relaxed);
        }
        let counter = match code {
            FailureCode::Validation => &self.validation_error_total,
            FailureCode::QuotaExceeded => &self.quota_exceeded_total,
            FailureCode::Unauthorized => &self.unauthorized_total,
            FailureCode::Internal => &self.internal_error_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ServiceTelemetrySnapshot {
        ServiceTelemetrySnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success_total: self.requests_success_total.load(Ordering::Relaxed),
            requests_failure_total: self.requests_failure_total.load(Ordering::Relaxed),
            timeout_total: self.timeout_total.load(Ordering::Relaxed),
            validation_error_total: self.validation_error_total.load(Ordering::Relaxed),
            quota_exceeded_total: self.quota_exceeded_total.load(Ordering::Relaxed),
            unauthorized_total: self.unauthorized_total.load(Ordering::Relaxed),
            internal_error_total: self.internal_error_total.load(Ordering::Relaxed),
        }
    }
}
