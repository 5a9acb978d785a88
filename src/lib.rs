//! Buffered, thread-safe timing of function calls, appended to a CSV file for later analysis.
//!
//! A [`LogSink`] owns an in-memory buffer and a target file. An [`Instrumenter`] times
//! operations and forwards each measurement to its sink, which writes the buffered rows once
//! `buffer_size` of them have accumulated, or after every call when `flush_on_return` is set.
mod config;
mod delimiter;
mod errors;
mod instrument;
mod record;
mod registry;
mod runner;
mod sink;

pub use config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_LOG_FILENAME, InstrumentOptions, SinkConfig, SinkOptions,
};
pub use delimiter::Delimiter;
pub use errors::{TimelogError, TimelogResult};
pub use instrument::{CallMeta, Instrumenter, RecordFailed, Timed, Wrapped};
pub use record::{Layout, MeasurementRecord};
pub use registry::{SinkRegistry, instrument};
pub use runner::{RunOptions, run_timelog, run_timelog_with_options};
pub use sink::{FlushStats, LogSink};
