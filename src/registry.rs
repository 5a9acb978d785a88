use std::collections::HashMap;
use std::collections::hash_map::Entry::{Occupied, Vacant};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::config::{InstrumentOptions, SinkConfig, SinkOptions};
use crate::errors::{TimelogError, TimelogResult};
use crate::instrument::Instrumenter;
use crate::sink::LogSink;

/// Keeps one `LogSink` per target path, so every wrapper writing to a file shares its buffer.
///
/// Paths are compared as given, without resolving them.
#[derive(Debug, Default)]
pub struct SinkRegistry {
    sinks: Mutex<HashMap<PathBuf, Arc<LogSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        SinkRegistry::default()
    }

    /// Process-wide registry, created on first use
    pub fn global() -> &'static SinkRegistry {
        static GLOBAL: OnceLock<SinkRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SinkRegistry::new)
    }

    /// Return the sink bound to the options' target path, creating it on first use.
    ///
    /// Fails with `SinkConflict` if the path is already bound to a sink with another
    /// configuration.
    pub fn get_or_create(&self, options: SinkOptions) -> TimelogResult<Arc<LogSink>> {
        let config = SinkConfig::try_from(options)?;
        let mut sinks = self.lock();
        match sinks.entry(config.target_path().to_path_buf()) {
            Occupied(e) => {
                let sink = e.get();
                if sink.config() != &config {
                    return Err(TimelogError::SinkConflict(
                        config.target_path().display().to_string(),
                    ));
                }
                Ok(Arc::clone(sink))
            }
            Vacant(e) => {
                tracing::debug!(path = %config.target_path().display(), "creating sink");
                let sink = Arc::new(LogSink::with_config(config));
                Ok(Arc::clone(e.insert(sink)))
            }
        }
    }

    pub fn instrument(
        &self,
        options: SinkOptions,
        instrument_options: InstrumentOptions,
    ) -> TimelogResult<Instrumenter> {
        let sink = self.get_or_create(options)?;
        Ok(Instrumenter::new(sink, instrument_options))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Flush every registered sink. All sinks are attempted, the first error is returned.
    pub fn flush_all(&self) -> TimelogResult<()> {
        // Clone the handles out so that no sink is flushed while the registry is locked
        let sinks: Vec<Arc<LogSink>> = self.lock().values().cloned().collect();
        let mut first_error = None;
        for sink in sinks {
            if let Err(e) = sink.flush() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<LogSink>>> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Instrumenter backed by the process-wide registry.
///
/// Example:
///
/// ```
/// use timelog::{instrument, InstrumentOptions, SinkOptions, SinkRegistry};
///
/// # let dir = tempfile::tempdir().unwrap();
/// # let path = dir.path().join("timings.csv");
/// let instrumenter = instrument(SinkOptions::new(&path), InstrumentOptions::default()).unwrap();
/// let square = instrumenter.wrap_named("square", |x: u64| x * x).unwrap();
/// assert_eq!(square.call(7).unwrap(), 49);
/// SinkRegistry::global().flush_all().unwrap();
/// ```
pub fn instrument(
    options: SinkOptions,
    instrument_options: InstrumentOptions,
) -> TimelogResult<Instrumenter> {
    SinkRegistry::global().instrument(options, instrument_options)
}
