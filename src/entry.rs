use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use google_logging2::api::LogEntry;
use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;
use serde_json::{json, Value};
use slog::Level;

/// Severity accepted by the [Google Logging API](https://cloud.google.com/logging/docs/reference/v2/rest/v2/LogEntry#logseverity).
///
/// Only the four severities the drain maps from [`slog::Level`] are named;
/// everything else collapses into [`Severity::Default`], the API's zero value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Default,
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Determine the severity for a log level.
    ///
    /// `Critical` and `Trace` have no counterpart in the mapping and come out
    /// as [`Severity::Default`]. That is a passthrough, not an error.
    pub fn from_level(log_level: Level) -> Self {
        match log_level {
            Level::Error => Severity::Error,
            Level::Warning => Severity::Warning,
            Level::Info => Severity::Info,
            Level::Debug => Severity::Debug,
            Level::Critical | Level::Trace => Severity::Default,
        }
    }

    /// The string form the API expects in `LogEntry.severity`.
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Default => "DEFAULT",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

/// A single log line before normalization into a [`LogEntry`].
///
/// Carries the level, the moment of logging as both unix seconds and an
/// RFC 3339 string, and the flattened key/value attributes.
#[derive(Debug, Clone)]
pub struct Line {
    pub level: Level,
    pub timestamp: i64,
    pub time: String,
    pub data: HashMap<String, Value>,
}

impl Line {
    /// Creates a line stamped with the current UTC time.
    pub fn now(level: Level, data: HashMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            level,
            timestamp: now.timestamp(),
            time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            data,
        }
    }

    /// Normalizes the line into an API log entry.
    ///
    /// The payload starts as a copy of the attributes; the `timestamp` and
    /// `time` keys are written afterwards so they win over attributes with
    /// those names.
    ///
    /// When a trace prefix is given and the current OpenTelemetry context
    /// carries a valid span, `trace` (prefix + trace id), `span_id` and
    /// `trace_sampled` are filled in. Without a prefix the ambient context is
    /// never consulted.
    pub fn into_entry(self, trace_prefix: Option<&str>) -> LogEntry {
        let mut payload = self.data;
        payload.insert("timestamp".to_string(), json!(self.timestamp));
        payload.insert("time".to_string(), json!(self.time));

        let mut entry = LogEntry {
            json_payload: Some(payload),
            severity: Some(Severity::from_level(self.level).as_str().to_string()),
            ..Default::default()
        };

        if let Some(prefix) = trace_prefix {
            let context = Context::current();
            let span = context.span();
            let span_context = span.span_context();
            if span_context.is_valid() {
                entry.trace = Some(format!("{}{}", prefix, span_context.trace_id()));
                entry.span_id = Some(span_context.span_id().to_string());
                entry.trace_sampled = Some(span_context.is_sampled());
            }
        }

        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};
    use pretty_assertions::assert_eq;

    fn line(level: Level, data: HashMap<String, Value>) -> Line {
        Line {
            level,
            timestamp: 1000,
            time: "2024-01-01T00:00:00Z".to_string(),
            data,
        }
    }

    #[test]
    fn severity_maps_the_four_levels() {
        assert_eq!(Severity::from_level(Level::Error), Severity::Error);
        assert_eq!(Severity::from_level(Level::Warning), Severity::Warning);
        assert_eq!(Severity::from_level(Level::Info), Severity::Info);
        assert_eq!(Severity::from_level(Level::Debug), Severity::Debug);
    }

    #[test]
    fn severity_for_unmapped_levels_is_default() {
        assert_eq!(Severity::from_level(Level::Critical), Severity::Default);
        assert_eq!(Severity::from_level(Level::Trace), Severity::Default);
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Default < Severity::Debug);
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn normalizes_an_error_line() {
        let data = HashMap::from([
            ("msg".to_string(), json!("boom")),
            ("code".to_string(), json!("500")),
        ]);

        let entry = line(Level::Error, data).into_entry(None);

        assert_eq!(entry.severity, Some("ERROR".to_string()));
        let payload = entry.json_payload.unwrap();
        assert_eq!(payload.len(), 4);
        assert_eq!(payload["msg"], json!("boom"));
        assert_eq!(payload["code"], json!("500"));
        assert_eq!(payload["timestamp"], json!(1000));
        assert_eq!(payload["time"], json!("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn line_fields_override_attributes_named_timestamp_and_time() {
        let data = HashMap::from([
            ("timestamp".to_string(), json!("not-a-timestamp")),
            ("time".to_string(), json!("not-a-time")),
        ]);

        let payload = line(Level::Info, data).into_entry(None).json_payload.unwrap();

        assert_eq!(payload["timestamp"], json!(1000));
        assert_eq!(payload["time"], json!("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn empty_string_and_non_string_attributes_are_kept() {
        let data = HashMap::from([
            ("empty".to_string(), json!("")),
            ("count".to_string(), json!(42)),
            ("flag".to_string(), json!(true)),
        ]);

        let payload = line(Level::Debug, data).into_entry(None).json_payload.unwrap();

        assert_eq!(payload["empty"], json!(""));
        assert_eq!(payload["count"], json!(42));
        assert_eq!(payload["flag"], json!(true));
    }

    fn sampled_span_context() -> SpanContext {
        SpanContext::new(
            TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736_u128),
            SpanId::from(0x00f0_67aa_0ba9_02b7_u64),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        )
    }

    #[test]
    fn trace_fields_come_from_the_current_span() {
        let context = Context::current().with_remote_span_context(sampled_span_context());
        let _guard = context.attach();

        let entry = line(Level::Info, HashMap::new())
            .into_entry(Some("projects/my-gcp-project/traces/"));

        assert_eq!(
            entry.trace,
            Some("projects/my-gcp-project/traces/4bf92f3577b34da6a3ce929d0e0e4736".to_string())
        );
        assert_eq!(entry.span_id, Some("00f067aa0ba902b7".to_string()));
        assert_eq!(entry.trace_sampled, Some(true));
    }

    #[test]
    fn no_trace_fields_without_a_prefix() {
        let context = Context::current().with_remote_span_context(sampled_span_context());
        let _guard = context.attach();

        let entry = line(Level::Info, HashMap::new()).into_entry(None);

        assert_eq!(entry.trace, None);
        assert_eq!(entry.span_id, None);
        assert_eq!(entry.trace_sampled, None);
    }

    #[test]
    fn no_trace_fields_without_a_valid_span() {
        let entry = line(Level::Info, HashMap::new())
            .into_entry(Some("projects/my-gcp-project/traces/"));

        assert_eq!(entry.trace, None);
        assert_eq!(entry.span_id, None);
        assert_eq!(entry.trace_sampled, None);
    }
}
