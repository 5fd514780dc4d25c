use slog::{Drain, Level, OwnedKVList, Record};

use crate::logger::Logger;

/// Tees every record to a cloud [`Logger`] and then to a wrapped drain.
///
/// The cloud copy is fire-and-forget; the wrapped drain's result is what
/// callers see, and it also decides [`is_enabled`](Drain::is_enabled).
/// Without this decorator a plain [`Logger`] never touches another drain.
///
/// # Example
///
/// ```no_run
/// use slog::{o, Drain};
/// use slog_cloudlogging::forward::Forward;
/// use slog_cloudlogging::logger::Builder;
///
/// let cloud = Builder::new("my-gcp-project", "my-log-id").build();
///
/// let decorator = slog_term::TermDecorator::new().build();
/// let term = slog_term::CompactFormat::new(decorator).build().fuse();
///
/// let drain = slog_async::Async::new(Forward::new(cloud, term).fuse())
///     .build()
///     .fuse();
/// let log = slog::Logger::root(drain, o!());
/// slog::info!(log, "sent to the cloud and the terminal");
/// ```
#[derive(Clone)]
pub struct Forward<D: Drain> {
    cloud: Logger,
    next: D,
}

impl<D: Drain> Forward<D> {
    pub fn new(cloud: Logger, next: D) -> Self {
        Self { cloud, next }
    }
}

impl<D: Drain> Drain for Forward<D> {
    type Ok = D::Ok;
    type Err = D::Err;

    fn log(&self, record: &Record<'_>, values: &OwnedKVList) -> Result<Self::Ok, Self::Err> {
        let _ = self.cloud.log(record, values);
        self.next.log(record, values)
    }

    #[inline]
    fn is_enabled(&self, level: Level) -> bool {
        self.next.is_enabled(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use google_logging2::api::LogEntry;
    use pretty_assertions::assert_eq;
    use slog::{b, o, record_static, Never};

    use crate::error::Error;
    use crate::logger::Builder;
    use crate::sink::{Connector, LogSink};

    #[derive(Default)]
    struct CollectingSink {
        entries: Mutex<Vec<LogEntry>>,
    }

    #[async_trait::async_trait]
    impl LogSink for CollectingSink {
        fn log(&self, entry: LogEntry) {
            self.entries.lock().unwrap().push(entry);
        }

        async fn flush(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    struct FixedConnector(Arc<CollectingSink>);

    impl Connector for FixedConnector {
        fn connect(&self, _project_id: &str, _log_name: &str) -> Result<Arc<dyn LogSink>, Error> {
            Ok(Arc::clone(&self.0) as Arc<dyn LogSink>)
        }
    }

    fn cloud_logger(sink: Arc<CollectingSink>) -> Logger {
        Builder::new("my-gcp-project", "my-log-id")
            .with_connector(Arc::new(FixedConnector(sink)))
            .build()
    }

    struct CountingDrain {
        records: Arc<AtomicUsize>,
    }

    impl Drain for CountingDrain {
        type Ok = ();
        type Err = Never;

        fn log(&self, _record: &Record<'_>, _values: &OwnedKVList) -> Result<(), Never> {
            self.records.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingDrain;

    impl Drain for FailingDrain {
        type Ok = ();
        type Err = slog::Error;

        fn log(&self, _record: &Record<'_>, _values: &OwnedKVList) -> Result<(), slog::Error> {
            Err(slog::Error::Other)
        }
    }

    struct LevelGate {
        min: Level,
    }

    impl Drain for LevelGate {
        type Ok = ();
        type Err = Never;

        fn log(&self, _record: &Record<'_>, _values: &OwnedKVList) -> Result<(), Never> {
            Ok(())
        }

        fn is_enabled(&self, level: Level) -> bool {
            level.is_at_least(self.min)
        }
    }

    fn log_once<D: Drain>(drain: &D) -> Result<D::Ok, D::Err> {
        let location = record_static!(Level::Info, "");
        drain.log(
            &Record::new(&location, &format_args!("hello"), b!()),
            &o!().into(),
        )
    }

    #[test]
    fn records_reach_the_cloud_and_the_wrapped_drain() {
        let sink = Arc::new(CollectingSink::default());
        let records = Arc::new(AtomicUsize::new(0));
        let forward = Forward::new(
            cloud_logger(Arc::clone(&sink)),
            CountingDrain {
                records: Arc::clone(&records),
            },
        );

        log_once(&forward).unwrap();

        assert_eq!(sink.entries.lock().unwrap().len(), 1);
        assert_eq!(records.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrapped_drain_errors_come_back_verbatim() {
        let sink = Arc::new(CollectingSink::default());
        let forward = Forward::new(cloud_logger(Arc::clone(&sink)), FailingDrain);

        let result = log_once(&forward);

        assert!(matches!(result, Err(slog::Error::Other)));
        // The cloud copy went out before the wrapped drain failed.
        assert_eq!(sink.entries.lock().unwrap().len(), 1);
    }

    #[test]
    fn is_enabled_delegates_to_the_wrapped_drain() {
        let sink = Arc::new(CollectingSink::default());
        let forward = Forward::new(cloud_logger(sink), LevelGate { min: Level::Info });

        assert!(forward.is_enabled(Level::Info));
        assert!(forward.is_enabled(Level::Error));
        assert!(!forward.is_enabled(Level::Debug));
    }
}
