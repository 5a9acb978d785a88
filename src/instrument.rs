use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::config::InstrumentOptions;
use crate::errors::{TimelogError, TimelogResult};
use crate::sink::LogSink;

/// Per-call metadata recorded next to the measurement. Never passed to the wrapped operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallMeta {
    /// Distinguishes repeated invocations of the same operation within one run
    pub iteration: i64,
}

impl CallMeta {
    pub fn iteration(iteration: i64) -> Self {
        CallMeta { iteration }
    }
}

/// The operation ran, but its measurement could not be recorded. Holds the operation's output
/// untouched.
pub struct RecordFailed<R> {
    output: R,
    error: TimelogError,
}

impl<R> RecordFailed<R> {
    pub fn output(&self) -> &R {
        &self.output
    }

    pub fn into_output(self) -> R {
        self.output
    }

    pub fn error(&self) -> &TimelogError {
        &self.error
    }

    pub fn into_parts(self) -> (R, TimelogError) {
        (self.output, self.error)
    }
}

impl<R> fmt::Debug for RecordFailed<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RecordFailed")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<R> fmt::Display for RecordFailed<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Failed to record timing: {}", self.error)
    }
}

impl<R> std::error::Error for RecordFailed<R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

pub type Timed<R> = std::result::Result<R, RecordFailed<R>>;

/// Times operations and forwards each measurement to a bound `LogSink`.
///
/// Example:
///
/// ```
/// use std::sync::Arc;
/// use timelog::{CallMeta, InstrumentOptions, Instrumenter, LogSink, SinkOptions};
///
/// # let dir = tempfile::tempdir().unwrap();
/// # let path = dir.path().join("timings.csv");
/// let sink = Arc::new(LogSink::new(SinkOptions::new(&path)).unwrap());
/// let instrumenter = Instrumenter::new(sink, InstrumentOptions::default());
///
/// let add = instrumenter.wrap_named("add", |(a, b): (i32, i32)| a + b).unwrap();
/// let sum = add
///     .call_with(CallMeta::iteration(5), (2, 3))
///     .unwrap_or_else(|failed| failed.into_output());
/// assert_eq!(sum, 5);
/// ```
#[derive(Clone, Debug)]
pub struct Instrumenter {
    sink: Arc<LogSink>,
    options: InstrumentOptions,
}

impl Instrumenter {
    pub fn new(sink: Arc<LogSink>, options: InstrumentOptions) -> Self {
        Instrumenter { sink, options }
    }

    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }

    pub fn options(&self) -> InstrumentOptions {
        self.options
    }

    /// Run `op`, recording how long it took under `operation_name`.
    ///
    /// Whatever `op` returns (including an `Err`) is handed back unchanged. If `op` panics, the
    /// measurement is recorded while unwinding and the panic carries on.
    pub fn time<R>(
        &self,
        operation_name: &str,
        meta: CallMeta,
        op: impl FnOnce() -> R,
    ) -> Timed<R> {
        let guard = CallGuard {
            instrumenter: self,
            operation_name,
            iteration: meta.iteration,
            start: Instant::now(),
            finished: false,
        };
        let output = op();
        match guard.finish() {
            Ok(()) => Ok(output),
            Err(error) => Err(RecordFailed { output, error }),
        }
    }

    /// Wrap `op`, naming it after its function item.
    ///
    /// For closures the name of the enclosing function is used; prefer `wrap_named` there.
    pub fn wrap<F>(&self, op: F) -> Wrapped<F> {
        Wrapped {
            name: operation_name_of::<F>(),
            op,
            instrumenter: self.clone(),
        }
    }

    pub fn wrap_named<F>(&self, name: impl Into<String>, op: F) -> TimelogResult<Wrapped<F>> {
        let name = name.into();
        if name.is_empty() {
            return Err(TimelogError::EmptyOperationName);
        }
        Ok(Wrapped {
            name,
            op,
            instrumenter: self.clone(),
        })
    }
}

/// An operation bound to an `Instrumenter`. Multiple arguments are passed as a tuple.
pub struct Wrapped<F> {
    name: String,
    op: F,
    instrumenter: Instrumenter,
}

impl<F> Wrapped<F> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call<A, R>(&self, args: A) -> Timed<R>
    where
        F: Fn(A) -> R,
    {
        self.call_with(CallMeta::default(), args)
    }

    pub fn call_with<A, R>(&self, meta: CallMeta, args: A) -> Timed<R>
    where
        F: Fn(A) -> R,
    {
        self.instrumenter.time(&self.name, meta, || (self.op)(args))
    }
}

impl<F> fmt::Debug for Wrapped<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Wrapped")
            .field("name", &self.name)
            .field("instrumenter", &self.instrumenter)
            .finish_non_exhaustive()
    }
}

struct CallGuard<'a> {
    instrumenter: &'a Instrumenter,
    operation_name: &'a str,
    iteration: i64,
    start: Instant,
    finished: bool,
}

impl CallGuard<'_> {
    fn finish(mut self) -> TimelogResult<()> {
        self.finished = true;
        self.submit()
    }

    fn submit(&self) -> TimelogResult<()> {
        let elapsed_time = self.start.elapsed().as_secs_f64();
        self.instrumenter.sink.record(
            self.operation_name,
            elapsed_time,
            self.iteration,
            self.instrumenter.options.flush_on_return,
        )
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        // Only reached without finish() when the operation panicked
        if !self.finished {
            if let Err(e) = self.submit() {
                tracing::error!(
                    operation = self.operation_name,
                    error = %e,
                    "failed to record timing of panicked operation"
                );
            }
        }
    }
}

/// Last path segment of a type name, skipping closures and generic arguments
fn operation_name_of<F>() -> String {
    let full_name = std::any::type_name::<F>();
    let path = match full_name.find('<') {
        Some(0) | None => full_name,
        Some(i) => &full_name[..i],
    };
    path.rsplit("::")
        .find(|segment| !segment.is_empty() && !segment.starts_with('{'))
        .unwrap_or(full_name)
        .to_string()
}
