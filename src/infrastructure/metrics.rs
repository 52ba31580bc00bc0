use std::sync::Mutex;
use std::time::Duration;

/// External metrics collaborator. Implementations must be cheap and must not fail.
pub trait MetricsSink: Send + Sync {
    fn record_request(&self, method: &str, endpoint: &str, status: &str, duration: Duration);

    fn record_error(&self, method: &str, endpoint: &str, error_kind: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub method: String,
    pub endpoint: String,
    pub status: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub method: String,
    pub endpoint: String,
    pub error_kind: String,
}

/// Sink that keeps every record in memory.
///
/// Records are never dropped, so memory grows with every call. Meant for tests and
/// short CLI runs, not for long-lived processes.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    requests: Mutex<Vec<RequestRecord>>,
    errors: Mutex<Vec<ErrorRecord>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Number of requests recorded with the given status
    pub fn count_status(&self, status: &str) -> usize {
        self.requests()
            .iter()
            .filter(|record| record.status == status)
            .count()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_request(&self, method: &str, endpoint: &str, status: &str, duration: Duration) {
        if let Ok(mut records) = self.requests.lock() {
            records.push(RequestRecord {
                method: method.to_string(),
                endpoint: endpoint.to_string(),
                status: status.to_string(),
                duration,
            });
        }
    }

    fn record_error(&self, method: &str, endpoint: &str, error_kind: &str) {
        if let Ok(mut records) = self.errors.lock() {
            records.push(ErrorRecord {
                method: method.to_string(),
                endpoint: endpoint.to_string(),
                error_kind: error_kind.to_string(),
            });
        }
    }
}
