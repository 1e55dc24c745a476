//! Results and the event stream of a run

use crate::error::Error;
use crate::progress::ProgressEvent;
use crate::strategy::{Accuracy, StrategyKind};
use crate::units::format_speed;
use serde::Serialize;
use std::time::Duration;

/// Measured bandwidth of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Write throughput in MiB/s, including the final sync
    pub write_speed_mbps: f64,
    /// Read throughput in MiB/s
    pub read_speed_mbps: f64,
    /// Bytes written
    pub bytes_written: u64,
    /// Bytes read back
    pub bytes_read: u64,
    /// Write phase duration
    #[serde(with = "duration_secs")]
    pub write_elapsed: Duration,
    /// Read phase duration
    #[serde(with = "duration_secs")]
    pub read_elapsed: Duration,
    /// Transfer size per chunk
    pub buffer_size: usize,
    /// Strategy the read phase used
    pub strategy: StrategyKind,
    /// How far the read number can be trusted
    pub accuracy: Accuracy,
    /// Cache-bypass problems met during the run
    pub warnings: Vec<String>,
}

impl TestResult {
    /// `Write: X MB/s | Read: Y MB/s`
    pub fn summary(&self) -> String {
        format!(
            "Write: {} | Read: {}",
            format_speed(self.write_speed_mbps),
            format_speed(self.read_speed_mbps)
        )
    }
}

mod duration_secs {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }
}

/// How a run ended
#[derive(Debug)]
pub enum TestOutcome {
    /// Both phases finished
    Completed(TestResult),
    /// An error stopped the run
    Failed(Error),
    /// The caller cancelled the run
    Cancelled,
}

impl TestOutcome {
    /// The result, if the run completed
    pub fn result(&self) -> Option<&TestResult> {
        match self {
            TestOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    /// Convert into a `Result`, with cancellation as [`Error::Cancelled`]
    pub fn into_result(self) -> crate::Result<TestResult> {
        match self {
            TestOutcome::Completed(result) => Ok(result),
            TestOutcome::Failed(err) => Err(err),
            TestOutcome::Cancelled => Err(Error::Cancelled),
        }
    }
}

/// One item of a run's event stream. A stream holds any number of
/// `Progress` events followed by exactly one `Finished`.
#[derive(Debug)]
pub enum TestEvent {
    /// Progress update
    Progress(ProgressEvent),
    /// Terminal event
    Finished(TestOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TestResult {
        TestResult {
            write_speed_mbps: 38.5,
            read_speed_mbps: 120.25,
            bytes_written: 100 * 1024 * 1024,
            bytes_read: 100 * 1024 * 1024,
            write_elapsed: Duration::from_millis(2600),
            read_elapsed: Duration::from_millis(831),
            buffer_size: 4 * 1024 * 1024,
            strategy: StrategyKind::NoBuffering,
            accuracy: Accuracy::Physical,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_summary() {
        assert_eq!(sample().summary(), "Write: 38.50 MB/s | Read: 120.25 MB/s");
    }

    #[test]
    fn test_result_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["strategy"], "direct");
        assert_eq!(json["accuracy"], "physical");
        assert_eq!(json["write_elapsed"], 2.6);
        assert_eq!(json["bytes_read"], 104_857_600);
    }

    #[test]
    fn test_outcome_into_result() {
        assert!(TestOutcome::Completed(sample()).into_result().is_ok());
        assert!(matches!(
            TestOutcome::Cancelled.into_result(),
            Err(Error::Cancelled)
        ));
        assert!(TestOutcome::Cancelled.result().is_none());
    }
}
