//! Progress reporting for operators.
//!
//! Reporting is **fire-and-forget**: it narrates what a reconcile is doing
//! and never influences control flow. Implementations must not fail.

use std::sync::Mutex;

use tracing::{error, info, warn};

use crate::Error;

/// Narrates the steps of an operation.
pub trait Reporter: Send + Sync {
    /// A step is starting
    fn started(&self, message: &str);

    /// The current step finished successfully
    fn succeeded(&self, message: &str);

    /// The current step failed
    fn failed(&self, err: &Error);

    /// Something noteworthy that is not a failure
    fn warning(&self, message: &str);

    /// Report `err` as a failure and hand it back for propagation.
    ///
    /// ```ignore
    /// let vpc = locate_vpc().await.map_err(|e| reporter.error(e))?;
    /// ```
    fn error(&self, err: Error) -> Error {
        self.failed(&err);
        err
    }
}

/// Reporter that writes every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn started(&self, message: &str) {
        info!(status = "started", "{message}");
    }

    fn succeeded(&self, message: &str) {
        info!(status = "succeeded", "{message}");
    }

    fn failed(&self, err: &Error) {
        error!(status = "failed", error = %err, "step failed");
    }

    fn warning(&self, message: &str) {
        warn!(status = "warning", "{message}");
    }
}

/// Reporter that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl Reporter for NoopReporter {
    fn started(&self, _message: &str) {}
    fn succeeded(&self, _message: &str) {}
    fn failed(&self, _err: &Error) {}
    fn warning(&self, _message: &str) {}
}

/// One recorded reporter event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    /// `started(message)`
    Started(String),
    /// `succeeded(message)`
    Succeeded(String),
    /// `failed(err)`, rendered with `Display`
    Failed(String),
    /// `warning(message)`
    Warning(String),
}

/// Reporter that keeps every event in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReporter {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far
    pub fn events(&self) -> Vec<ReportEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Messages of all recorded failures
    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ReportEvent::Failed(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ReportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Reporter for RecordingReporter {
    fn started(&self, message: &str) {
        self.push(ReportEvent::Started(message.to_string()));
    }

    fn succeeded(&self, message: &str) {
        self.push(ReportEvent::Succeeded(message.to_string()));
    }

    fn failed(&self, err: &Error) {
        self.push(ReportEvent::Failed(err.to_string()));
    }

    fn warning(&self, message: &str) {
        self.push(ReportEvent::Warning(message.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_reporter_keeps_order() {
        let reporter = RecordingReporter::new();
        reporter.started("Opening ports");
        reporter.succeeded("Opened ports");
        reporter.warning("nothing to do");

        assert_eq!(
            reporter.events(),
            vec![
                ReportEvent::Started("Opening ports".into()),
                ReportEvent::Succeeded("Opened ports".into()),
                ReportEvent::Warning("nothing to do".into()),
            ]
        );
    }

    #[test]
    fn test_error_reports_and_returns_the_same_error() {
        let reporter = RecordingReporter::new();
        let err = reporter.error(Error::not_found("vpc", "abc-vpc"));

        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(reporter.failures(), vec!["vpc \"abc-vpc\" not found"]);
    }

    #[test]
    fn test_tracing_and_noop_reporters_never_panic() {
        let err = Error::validation("x");
        for reporter in [&TracingReporter as &dyn Reporter, &NoopReporter] {
            reporter.started("a");
            reporter.succeeded("b");
            reporter.failed(&err);
            reporter.warning("c");
        }
    }
}
