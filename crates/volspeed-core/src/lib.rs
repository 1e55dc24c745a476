//! # Volspeed Core
//!
//! Measures the sequential write and read bandwidth of the filesystem behind
//! a directory, keeping the operating system's page cache out of the read
//! measurement.
//!
//! ## Modules
//!
//! - `engine`: orchestration of the write, cache-clearing and read phases
//! - `strategy`: the uncached read strategies and their selection
//! - `progress`: progress events and percent arithmetic
//! - `state`: lifecycle state machine of a run
//! - `request`: run parameters and their validation
//! - `outcome`: results and the event stream
//! - `error`: Error types and result aliases
//! - `config`: Runtime configuration
//! - `settings`: Persistent user settings from configuration file
//!
//! ## Example
//!
//! ```ignore
//! use volspeed_core::{SpeedTestEngine, TestEvent, TestOutcome, TestRequest};
//!
//! let engine = SpeedTestEngine::new();
//! let handle = engine.start(TestRequest::new("/media/usb", 100 * 1024 * 1024))?;
//!
//! for event in handle {
//!     match event {
//!         TestEvent::Progress(p) => println!("{:>3}% {}", p.percent, p.message),
//!         TestEvent::Finished(TestOutcome::Completed(r)) => println!("{}", r.summary()),
//!         TestEvent::Finished(other) => eprintln!("{:?}", other),
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod progress;
pub mod request;
pub mod settings;
pub mod state;
pub mod strategy;
pub mod temp;
pub mod units;

pub use config::EngineConfig;
pub use engine::{SpeedTestEngine, SpeedTestHandle};
pub use error::{Error, Result};
pub use outcome::{TestEvent, TestOutcome, TestResult};
pub use progress::{Phase, ProgressEvent, StatusLevel};
pub use request::{
    TestRequest, DEFAULT_BUFFER_SIZE, DEFAULT_TEST_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE,
};
pub use settings::{BehaviorSettings, Settings, SettingsError, SpeedTestSettings};
pub use state::TestState;
pub use strategy::{
    Accuracy, BufferedRead, DirectCopyRead, NoBufferingRead, NoCacheRead, ReadContext,
    ReadMeasurement, ReadStrategy, StrategyChoice, StrategyKind,
};
pub use temp::TempFileGuard;
pub use units::{format_duration, format_size, format_speed, mib_per_sec, parse_size, MIB};
