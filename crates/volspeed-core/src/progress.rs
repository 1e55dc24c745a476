//! Progress events emitted while a speed test runs
//!
//! The overall percent is split evenly between the phases: the write phase
//! covers 0 to 50 and the read phase 50 to 100. The status text carries the
//! phase-local percentage instead.

use serde::Serialize;
use std::fmt;

/// Phase a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Writing the temporary file
    Writing,
    /// Evicting the file from caches between the phases
    ClearingCache,
    /// Reading the file back
    Reading,
    /// Measurement finished
    Done,
}

impl Phase {
    /// Gerund used in error messages
    pub fn activity(&self) -> &'static str {
        match self {
            Phase::Writing => "writing",
            Phase::ClearingCache => "clearing cache",
            Phase::Reading => "reading",
            Phase::Done => "finishing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Writing => "Writing",
            Phase::ClearingCache => "Clearing cache",
            Phase::Reading => "Reading",
            Phase::Done => "Done",
        };
        f.write_str(s)
    }
}

/// Severity of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    /// Normal progress
    #[default]
    Info,
    /// A non-fatal problem, typically a cache bypass that could not be applied
    Warning,
}

/// One progress update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Phase the event belongs to
    pub phase: Phase,
    /// Human-readable status text
    pub message: String,
    /// Overall completion, 0 to 100
    pub percent: u8,
    /// Severity of the message
    pub level: StatusLevel,
}

impl ProgressEvent {
    /// Whether this event carries a warning
    pub fn is_warning(&self) -> bool {
        self.level == StatusLevel::Warning
    }
}

/// Overall percent after `written` of `total` bytes: `floor(written * 50 / total)`
pub fn write_percent(written: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((written as u128 * 50) / total as u128).min(50) as u8
}

/// Overall percent after `read` of `total` bytes: `50 + floor(read * 50 / total)`
pub fn read_percent(read: u64, total: u64) -> u8 {
    if total == 0 {
        return 50;
    }
    50 + ((read as u128 * 50) / total as u128).min(50) as u8
}

/// Write-phase percentage shown in the status text, from an overall percent
pub fn write_phase_percent(overall: u8) -> u8 {
    overall.min(50) * 2
}

/// Read-phase percentage shown in the status text. An overall 50 is the
/// start of reading, so it maps to 0.
pub fn read_phase_percent(overall: u8) -> u8 {
    overall.clamp(50, 100).saturating_sub(50) * 2
}

/// Event sink that keeps the reported percent monotonic and in range
pub struct ProgressReporter<'a> {
    sink: &'a mut dyn FnMut(ProgressEvent),
    last_percent: u8,
}

impl<'a> ProgressReporter<'a> {
    /// Wrap a callback
    pub fn new(sink: &'a mut dyn FnMut(ProgressEvent)) -> Self {
        Self {
            sink,
            last_percent: 0,
        }
    }

    /// Emit an event. A percent lower than one already reported is raised
    /// to it.
    pub fn emit(
        &mut self,
        phase: Phase,
        level: StatusLevel,
        message: impl Into<String>,
        percent: u8,
    ) {
        let percent = percent.clamp(self.last_percent, 100);
        self.last_percent = percent;
        (self.sink)(ProgressEvent {
            phase,
            message: message.into(),
            percent,
            level,
        });
    }

    /// Emit an informational event
    pub fn info(&mut self, phase: Phase, message: impl Into<String>, percent: u8) {
        self.emit(phase, StatusLevel::Info, message, percent);
    }

    /// Emit a warning at the current percent
    pub fn warn(&mut self, phase: Phase, message: impl Into<String>) {
        let percent = self.last_percent;
        self.emit(phase, StatusLevel::Warning, message, percent);
    }

    /// Highest percent reported so far
    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }
}
