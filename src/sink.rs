use std::sync::Arc;

use async_trait::async_trait;
use google_logging2::api::LogEntry;

use crate::error::Error;

/// Destination for normalized log entries.
///
/// Implementations buffer internally: [`log`](LogSink::log) enqueues and may
/// be called concurrently from any thread, [`flush`](LogSink::flush) drains
/// whatever is buffered to the backend. Flushes may race with each other and
/// with enqueues; implementations provide their own locking.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Buffers a single entry. Enqueue problems are not surfaced.
    fn log(&self, entry: LogEntry);

    /// Drains the buffer to the backend, returning the transport outcome.
    async fn flush(&self) -> Result<(), Error>;
}

/// One-shot factory for the sink behind a logger.
///
/// Invoked at most once per logger, on first use or on an explicit
/// [`init`](crate::logger::Logger::init) call.
pub trait Connector: Send + Sync {
    fn connect(&self, project_id: &str, log_name: &str) -> Result<Arc<dyn LogSink>, Error>;
}
