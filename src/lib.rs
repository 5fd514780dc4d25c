//! A buffering [`slog::Drain`](https://slog-rs.github.io/slog/slog/trait.Drain.html) for [Google Cloud Logging](https://cloud.google.com/logging).
//!
//! Log records are normalized into [log entries](https://cloud.google.com/logging/docs/reference/v2/rest/v2/LogEntry),
//! buffered in memory and shipped to the [Google Logging API](https://cloud.google.com/logging/docs/reference/v2/rest)
//! in batches: periodically by a background task ([`auto_flush`](logger::Logger::auto_flush))
//! or on demand ([`flush`](logger::Logger::flush)).
//!
//! Warning: the default transport only works in the context of
//! [workload identity](https://cloud.google.com/iam/docs/workload-identity-federation).
//! Other transports can be plugged in through the [`Connector`](sink::Connector) seam.
//!
//! # Usage
//!
//! Configure the logger with the builder ([`Builder`](logger::Builder)) and hand the
//! drain to slog [as usual](https://docs.rs/slog/latest/slog/#where-to-start). Nothing
//! connects until the first record arrives (or [`init`](logger::Logger::init) is
//! called); after that the backend sink exists exactly once, however many clones of
//! the logger are around.
//!
//! ```no_run
//! use slog::{info, o, Drain};
//! use slog_cloudlogging::logger::Builder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cloud = Builder::new("my-gcp-project", "my-log-id")
//!         .with_trace_prefix("projects/my-gcp-project/traces/")
//!         .build();
//!
//!     // Ship buffered entries every 500ms; watch for shipping failures.
//!     let (handle, mut flush_errors) = cloud.auto_flush();
//!     tokio::spawn(async move {
//!         while let Some(e) = flush_errors.recv().await {
//!             eprintln!("log shipping failed: {}", e);
//!         }
//!     });
//!
//!     let drain = slog_async::Async::new(cloud.clone().fuse()).build().fuse();
//!     let log = slog::Logger::root(drain, o!());
//!     info!(log, "Send me to {}!", "Google Cloud Logging"; "msg" => "Hello World!");
//!
//!     // Stop the background task and drain what is left.
//!     handle.shutdown().await.unwrap();
//! }
//! ```
//!
//! To keep an existing drain in the loop as well, compose with
//! [`Forward`](forward::Forward) instead of handing the logger to slog directly.

/// Log lines and their normalization into API entries
pub mod entry;

/// Error types
pub mod error;

/// Decorator that tees records to the cloud and a wrapped drain
pub mod forward;

/// The [`slog::Drain`] implementation and its builder
pub mod logger;

/// The default sink: buffers entries and ships them to the Google Logging API
pub mod shipper;

/// Traits for replacing the backend transport
pub mod sink;
