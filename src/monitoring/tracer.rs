/*!
 * Structured Tracing
 * Subscriber setup and per-task spans using the tracing crate
 */

use crate::manager::types::TaskIdentifier;
use std::time::{Duration, Instant};
use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Tasks running longer than this are reported at warn level
const SLOW_TASK_THRESHOLD: Duration = Duration::from_secs(1);

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - COORDINATOR_TRACE_JSON: Enable JSON output (default: false)
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("COORDINATOR_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
        info!("Structured tracing initialized with JSON output");
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .init();
        info!("Structured tracing initialized");
    }
}

/// Generate a unique trace ID for task correlation
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span around one task run
pub struct TaskSpan {
    span: tracing::Span,
    start: Instant,
    trace_id: String,
}

impl TaskSpan {
    pub fn new(function: &str, identifier: &TaskIdentifier) -> Self {
        let trace_id = generate_trace_id();
        let span = span!(
            Level::DEBUG,
            "task",
            trace_id = %trace_id,
            function = function,
            group = identifier.group_id.0,
            index = identifier.index,
            total = identifier.total_tasks,
            duration_us = tracing::field::Empty,
            result = tracing::field::Empty,
        );

        Self {
            span,
            start: Instant::now(),
            trace_id,
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Run `f` inside the span so nested logs and submissions attach to it
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        self.span.in_scope(f)
    }

    /// Record the outcome and duration, closing the span
    pub fn finish(self, success: bool) -> Duration {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        self.span
            .record("result", if success { "success" } else { "error" });

        let _entered = self.span.enter();
        if duration > SLOW_TASK_THRESHOLD {
            warn!(
                trace_id = %self.trace_id,
                duration_ms = duration.as_millis() as u64,
                slow = true,
                "slow task"
            );
        } else {
            debug!(duration_us = duration.as_micros() as u64, success, "task finished");
        }
        duration
    }
}
