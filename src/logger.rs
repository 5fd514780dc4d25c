use std::collections::HashMap;
use std::fmt;
use std::fmt::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use slog::{self, Drain, Key, Never, OwnedKVList, Record, KV};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::entry::Line;
use crate::error::Error;
use crate::shipper::ApiConnector;
use crate::sink::{Connector, LogSink};

/// Flush cadence used when the configured interval is zero.
pub const DEFAULT_AUTO_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

const FLUSH_ERROR_CHANNEL_SIZE: usize = 100;

/// Builder for the [`Logger`]
pub struct Builder {
    project_id: String,
    log_name: String,
    auto_flush_interval: Duration,
    trace_prefix: Option<String>,
    connector: Arc<dyn Connector>,
}

impl Builder {
    /// Creates a Builder object.
    ///
    /// # Parameters
    /// - `project_id`: The Google Cloud project to log to.
    /// - `log_name`: The log id within that project; ends up as
    ///   `projects/<project_id>/logs/<log_name>` in the [LogEntry](https://cloud.google.com/logging/docs/reference/v2/rest/v2/LogEntry).
    ///
    /// # Example
    ///
    /// ```
    /// use slog_cloudlogging::logger::Builder;
    ///
    /// let logger = Builder::new("my-gcp-project", "my-log-id").build();
    /// ```
    #[must_use = "The builder must be used"]
    pub fn new(project_id: &str, log_name: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            log_name: log_name.to_string(),
            auto_flush_interval: DEFAULT_AUTO_FLUSH_INTERVAL,
            trace_prefix: None,
            connector: Arc::new(ApiConnector::new()),
        }
    }

    /// Sets the cadence of the background task started by
    /// [`auto_flush`](Logger::auto_flush).
    ///
    /// A zero duration means "use [`DEFAULT_AUTO_FLUSH_INTERVAL`]".
    #[must_use = "The builder must be used"]
    pub fn auto_flush_interval(self, interval: Duration) -> Self {
        Self {
            auto_flush_interval: interval,
            ..self
        }
    }

    /// Enables trace propagation.
    ///
    /// When the current OpenTelemetry context carries a valid span at log
    /// time, entries get their `trace` field set to this prefix followed by
    /// the trace id, plus `span_id` and `trace_sampled`. The conventional
    /// prefix is `projects/<project_id>/traces/`.
    #[must_use = "The builder must be used"]
    pub fn with_trace_prefix(self, prefix: &str) -> Self {
        Self {
            trace_prefix: Some(prefix.to_string()),
            ..self
        }
    }

    /// Replaces the [`Connector`] that creates the backend sink on first use.
    ///
    /// The default connects a [`Shipper`](crate::shipper::Shipper) to the
    /// production Google Logging API.
    #[must_use = "The builder must be used"]
    pub fn with_connector(self, connector: Arc<dyn Connector>) -> Self {
        Self { connector, ..self }
    }

    /// Consumes the builder, returning the logger.
    ///
    /// No connection is made yet; the sink is created once, on the first
    /// [`print`](Logger::print), [`auto_flush`](Logger::auto_flush),
    /// [`init`](Logger::init) or logged record.
    pub fn build(self) -> Logger {
        Logger {
            inner: Arc::new(Inner {
                project_id: self.project_id,
                log_name: self.log_name,
                auto_flush_interval: self.auto_flush_interval,
                trace_prefix: self.trace_prefix,
                connector: self.connector,
                sink: Mutex::new(None),
            }),
        }
    }

    /// Consumes the builder, returning a logger whose sink is created right
    /// away.
    ///
    /// # Errors
    ///
    /// Will return `Err` when the connector cannot create the sink, which
    /// the lazy path would surface as a panic at first use instead.
    pub fn build_connected(self) -> Result<Logger, Error> {
        let logger = self.build();
        logger.init()?;
        Ok(logger)
    }
}

/// Main struct for the Google Cloud Logging drain.
///
/// Cloning is cheap and all clones share one sink. The logger is a
/// [`slog::Drain`]; it can also be driven directly through
/// [`print`](Logger::print) and [`flush`](Logger::flush).
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    project_id: String,
    log_name: String,
    auto_flush_interval: Duration,
    trace_prefix: Option<String>,
    connector: Arc<dyn Connector>,
    sink: Mutex<Option<Arc<dyn LogSink>>>,
}

impl Logger {
    /// Creates the backend sink if none exists yet.
    ///
    /// Idempotent, and serialized against concurrent first uses: however
    /// many threads arrive here at once, the connector runs at most once.
    pub fn init(&self) -> Result<(), Error> {
        let mut sink = self.inner.sink.lock().unwrap();
        if sink.is_none() {
            *sink = Some(
                self.inner
                    .connector
                    .connect(&self.inner.project_id, &self.inner.log_name)?,
            );
        }
        Ok(())
    }

    // Lazy variant of init for the infallible entry points.
    fn ensure_sink(&self) -> Arc<dyn LogSink> {
        let mut sink = self.inner.sink.lock().unwrap();
        match &*sink {
            Some(sink) => Arc::clone(sink),
            None => {
                let connected = self
                    .inner
                    .connector
                    .connect(&self.inner.project_id, &self.inner.log_name)
                    .unwrap_or_else(|e| {
                        panic!("could not connect the Google Cloud Logging sink: {}", e)
                    });
                *sink = Some(Arc::clone(&connected));
                connected
            }
        }
    }

    fn current_sink(&self) -> Option<Arc<dyn LogSink>> {
        self.inner.sink.lock().unwrap().clone()
    }

    /// Normalizes the line and buffers the resulting entry in the sink.
    ///
    /// # Panics
    ///
    /// When the sink must be created on this call and the connector fails.
    /// Misconfiguration surfaces loudly at first use; use
    /// [`init`](Logger::init) or
    /// [`build_connected`](Builder::build_connected) beforehand to handle it
    /// as an error instead.
    pub fn print(&self, line: Line) {
        let sink = self.ensure_sink();
        sink.log(line.into_entry(self.inner.trace_prefix.as_deref()));
    }

    /// Drains buffered entries to the backend and returns the transport
    /// outcome unchanged.
    ///
    /// # Errors
    ///
    /// [`Error::UninitializedLogger`] when nothing has initialized the
    /// logger yet; otherwise whatever the sink's flush reports.
    pub async fn flush(&self) -> Result<(), Error> {
        match self.current_sink() {
            Some(sink) => sink.flush().await,
            None => Err(Error::UninitializedLogger),
        }
    }

    /// Starts a background task that flushes the sink periodically.
    ///
    /// The first flush happens one full interval after this call. Flush
    /// errors are delivered on the returned channel; when they pile up
    /// beyond its capacity they go to stderr instead. The task stops when
    /// the handle is cancelled or dropped.
    ///
    /// Calling this more than once starts that many independent tasks, each
    /// with its own handle.
    ///
    /// # Panics
    ///
    /// Same first-use policy as [`print`](Logger::print): a failing
    /// connector panics.
    #[must_use = "The handle must be kept, dropping it stops the periodic flushing"]
    pub fn auto_flush(&self) -> (AutoFlushHandle, mpsc::Receiver<Error>) {
        let sink = self.ensure_sink();
        let interval = if self.inner.auto_flush_interval.is_zero() {
            DEFAULT_AUTO_FLUSH_INTERVAL
        } else {
            self.inner.auto_flush_interval
        };

        let (error_tx, error_rx) = mpsc::channel(FLUSH_ERROR_CHANNEL_SIZE);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();

        let task_sink = Arc::clone(&sink);
        let task = tokio::spawn(async move {
            // First tick fires one full interval after start.
            let mut ticker = interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => return,
                    _ = ticker.tick() => {
                        if let Err(e) = task_sink.flush().await {
                            if let Err(e) = error_tx.try_send(e) {
                                eprintln!(
                                    "Flush error not delivered, the error channel is full or gone: {}",
                                    e.into_inner()
                                );
                            }
                        }
                    }
                }
            }
        });

        (
            AutoFlushHandle {
                cancel_tx,
                task,
                sink,
            },
            error_rx,
        )
    }
}

/// Handle on one background flush task.
///
/// Dropping it stops the task; [`shutdown`](AutoFlushHandle::shutdown)
/// additionally drains what is still buffered.
pub struct AutoFlushHandle {
    cancel_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
    sink: Arc<dyn LogSink>,
}

impl AutoFlushHandle {
    /// Stops the periodic flushing.
    ///
    /// The returned join handle resolves once the background task is gone.
    pub fn cancel(self) -> JoinHandle<()> {
        let _ = self.cancel_tx.send(());
        self.task
    }

    /// Stops the periodic flushing, waits for the task to finish and runs
    /// one final flush.
    ///
    /// Entries logged after this call are only shipped by an explicit
    /// [`flush`](Logger::flush).
    pub async fn shutdown(self) -> Result<(), Error> {
        let sink = Arc::clone(&self.sink);
        let _ = self.cancel().await;
        sink.flush().await
    }
}

#[derive(Debug)]
struct Serializer {
    map: HashMap<String, String>,
}

impl Serializer {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }
}

impl slog::Serializer for Serializer {
    fn emit_arguments(&mut self, key: Key, val: &fmt::Arguments) -> slog::Result {
        let mut value = String::new();
        write!(value, "{val}")?;
        self.map.insert(key.into(), value);
        Ok(())
    }
}

impl Drain for Logger {
    type Ok = ();
    type Err = Never;

    fn log(&self, record: &Record<'_>, values: &OwnedKVList) -> Result<Self::Ok, Self::Err> {
        let mut serializer = Serializer::new();

        let kv = record.kv();
        let _ = kv.serialize(record, &mut serializer);

        let _ = values.serialize(record, &mut serializer);

        // Attribute values become their display strings; `message` wins over
        // an attribute by that name.
        let mut data: HashMap<String, serde_json::Value> = serializer
            .map
            .into_iter()
            .map(|(key, value)| (key, json!(value)))
            .collect();
        data.insert("message".to_string(), json!(format!("{}", record.msg())));

        self.print(Line::now(record.level(), data));

        Ok(())
    }
}
