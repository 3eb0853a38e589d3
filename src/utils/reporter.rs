/// Receives human-readable messages and download progress from long-running
/// operations. Both callbacks run inline on the calling task.
pub trait Reporter: Send + Sync {
    fn notify(&self, _message: &str) {}

    fn progress(&self, _done: u64, _total: u64) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {}

/// Sends messages to the `tracing` subscriber at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn notify(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn progress(&self, done: u64, total: u64) {
        tracing::debug!("{}/{} bytes", done, total);
    }
}
