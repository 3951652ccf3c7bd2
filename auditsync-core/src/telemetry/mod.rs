//! Operation tracing and metric descriptions

use metrics::{describe_counter, describe_histogram, histogram};
use std::time::{Duration, Instant};
use tracing::{span, Level, Span};

/// Describe every metric the crate records. Call once at startup, after the
/// host installed its recorder.
pub fn init_metrics() {
    // Sync
    describe_counter!("sync.cycles.total", "Sync cycles started");
    describe_counter!("sync.cycles.failed", "Sync cycles with at least one failed phase");
    describe_counter!("sync.events.pushed", "Events sent to the remote store");
    describe_counter!("sync.events.pulled", "Events received and newly stored");
    describe_counter!("sync.watermarks.applied", "Remote low watermarks that advanced a local log");
    describe_histogram!("sync.cycle.duration_ms", "Sync cycle duration in milliseconds");

    // Store
    describe_counter!("store.events.written", "Events newly written to a log");
    describe_counter!("store.lock.busy", "Log lock acquisitions that gave up");

    // Repository
    describe_counter!("repository.commits", "Repository versions created by commit");
}

/// Span around one sync cycle, identified by a fresh `cycle_id`
pub struct TracedOperation {
    id: String,
    span: Span,
    start: Instant,
}

impl TracedOperation {
    /// Start a traced operation tagged with the name of what it works on
    pub fn for_subject(operation_name: &str, subject: &str) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let span = span!(
            Level::INFO,
            "operation",
            name = operation_name,
            subject = subject,
            cycle_id = %id
        );

        Self { id, span, start: Instant::now() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Complete the operation and record duration
    pub fn complete(self) -> Duration {
        let duration = self.start.elapsed();
        tracing::debug!(
            parent: &self.span,
            duration_ms = duration.as_millis() as u64,
            "operation completed"
        );
        duration
    }
}

/// Records its lifetime into a histogram when stopped
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration in milliseconds
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
        duration
    }
}
