//! Telemetry as an ambient, externally-dispatched concern: this
//! module defines the shape of what gets recorded, not where it goes. A
//! real deployment supplies its own [`Sink`]; [`NoopSink`] is the default
//! so the rest of the crate never has to special-case "no telemetry
//! configured".

use std::time::Instant;

use crate::model::{EndpointId, Medium};

/// Whether an upgrade attempt for one medium ended in success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// Coarse stage at which an upgrade attempt failed, for dashboards that
/// bucket failures by where in the handshake they occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorStage {
    MediumInitialize,
    Dial,
    ClientIntroduction,
    Drain,
}

/// One upgrade attempt's outcome, the unit [`Sink::record`] is called with.
#[derive(Debug, Clone)]
pub struct UpgradeAttemptRecord {
    pub endpoint_id: EndpointId,
    pub start: Instant,
    pub medium: Medium,
    pub outcome: AttemptOutcome,
    pub error_stage: Option<ErrorStage>,
}

/// Where [`UpgradeAttemptRecord`]s go. Dispatch (to logs, metrics, an
/// analytics pipeline) is external to this crate; the default
/// method body simply drops the record.
pub trait Sink: Send + Sync {
    fn record(&self, _record: UpgradeAttemptRecord) {}
}

/// The sink used when a caller doesn't supply one of its own.
pub struct NoopSink;

impl Sink for NoopSink {}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CollectingSink {
        records: Mutex<Vec<UpgradeAttemptRecord>>,
    }

    impl Sink for CollectingSink {
        fn record(&self, record: UpgradeAttemptRecord) {
            self.records.lock().push(record);
        }
    }

    #[test]
    fn collecting_sink_retains_records() {
        let sink = CollectingSink {
            records: Mutex::new(Vec::new()),
        };
        sink.record(UpgradeAttemptRecord {
            endpoint_id: "1".into(),
            start: Instant::now(),
            medium: Medium::WifiLan,
            outcome: AttemptOutcome::Success,
            error_stage: None,
        });
        assert_eq!(sink.records.lock().len(), 1);
    }

    #[test]
    fn noop_sink_accepts_records_without_panicking() {
        let sink = NoopSink;
        sink.record(UpgradeAttemptRecord {
            endpoint_id: "1".into(),
            start: Instant::now(),
            medium: Medium::Ble,
            outcome: AttemptOutcome::Failure,
            error_stage: Some(ErrorStage::Dial),
        });
    }
}
