use crate::config::{DEFAULT_BUFFER_SIZE, DEFAULT_LOG_FILENAME, InstrumentOptions, SinkOptions};
use crate::delimiter::Delimiter;
use crate::errors::{TimelogError, TimelogResult};
use crate::instrument::{CallMeta, Instrumenter};
use crate::record::Layout;
use crate::sink::LogSink;

#[cfg(feature = "cli")]
use clap::{Parser, command};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// CSV file the timings are appended to. Created with a header row if absent.
    #[arg(short, long, value_name = "path", default_value = DEFAULT_LOG_FILENAME)]
    log: PathBuf,

    /// Operation name to record (the program name by default)
    #[arg(short, long)]
    name: Option<String>,

    /// Iteration tag of the first run
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    iteration: i64,

    /// Run the command this many times, tagging runs with consecutive iterations. Stops at the
    /// first run that fails.
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    repeat: u32,

    /// Number of buffered timings that triggers a write
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Only write when the buffer is full (and at exit) instead of after every run
    #[arg(long)]
    batch: bool,

    /// Write only the function_name and elapsed_time columns
    #[arg(long)]
    minimal: bool,

    /// Delimiter character (comma by default)
    #[arg(short, long, value_name = "char")]
    delimiter: Option<String>,

    /// Use tab separation. Shortcut for -d '\t'.
    #[arg(short = 't', long)]
    tab_separated: bool,

    /// Log filter for diagnostics on stderr. RUST_LOG takes precedence.
    #[arg(long, value_name = "filter", default_value = "warn")]
    log_level: String,

    /// Command to time, followed by its arguments
    #[arg(
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "COMMAND"
    )]
    command: Vec<OsString>,
}

#[cfg(feature = "cli")]
impl From<Args> for RunOptions {
    fn from(args: Args) -> Self {
        Self {
            command: args.command,
            log: args.log,
            name: args.name,
            iteration: args.iteration,
            repeat: args.repeat,
            buffer_size: args.buffer_size,
            batch: args.batch,
            minimal: args.minimal,
            delimiter: args.delimiter,
            tab_separated: args.tab_separated,
        }
    }
}

// Struct for library usage without clap directives
#[derive(Debug)]
pub struct RunOptions {
    pub command: Vec<OsString>,
    pub log: PathBuf,
    pub name: Option<String>,
    pub iteration: i64,
    pub repeat: u32,
    pub buffer_size: usize,
    pub batch: bool,
    pub minimal: bool,
    pub delimiter: Option<String>,
    pub tab_separated: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            command: vec![],
            log: PathBuf::from(DEFAULT_LOG_FILENAME),
            name: None,
            iteration: 0,
            repeat: 1,
            buffer_size: DEFAULT_BUFFER_SIZE,
            batch: false,
            minimal: false,
            delimiter: None,
            tab_separated: false,
        }
    }
}

/// Run a command with options provided in a `RunOptions` struct, appending one timing row per run
/// to the log file.
///
/// On success, the result contains the exit code of the last run: 0 if every run succeeded,
/// otherwise the code of the first failing run (1 if it was killed by a signal).
///
/// Example:
///
/// ```no_run
/// use timelog::{run_timelog_with_options, RunOptions};
///
/// let options = RunOptions {
///     command: vec!["sleep".into(), "1".into()],
///     repeat: 3,
///     ..Default::default()
/// };
/// match run_timelog_with_options(options) {
///     Ok(code) => println!("Exited with {}", code),
///     Err(e) => eprintln!("Error: {:?}", e),
/// }
/// ```
pub fn run_timelog_with_options(options: RunOptions) -> TimelogResult<i32> {
    let (program, args) = options
        .command
        .split_first()
        .ok_or(TimelogError::EmptyCommand)?;
    let name = options.name.clone().unwrap_or_else(|| program_name(program));
    if name.is_empty() {
        return Err(TimelogError::EmptyOperationName);
    }
    let repeat = options.repeat.max(1);
    // The last run is tagged iteration + repeat - 1
    if options.iteration.checked_add(i64::from(repeat - 1)).is_none() {
        return Err(TimelogError::IterationOverflow {
            start: options.iteration,
            repeat,
        });
    }

    let layout = if options.minimal {
        Layout::Minimal
    } else {
        Layout::Full
    };
    let sink_options = SinkOptions {
        target_path: options.log.clone(),
        buffer_size: options.buffer_size,
        layout,
        delimiter: Delimiter::from_arg(&options.delimiter, options.tab_separated)?,
    };
    let sink = Arc::new(LogSink::new(sink_options)?);
    let instrumenter = Instrumenter::new(
        Arc::clone(&sink),
        InstrumentOptions {
            flush_on_return: !options.batch,
        },
    );

    let outcome = run_repeated(&instrumenter, &name, program, args, &options);
    // Drain what is left even when a run could not be started
    let flushed = sink.flush();
    let exit_code = outcome?;
    flushed?;
    Ok(exit_code)
}

fn run_repeated(
    instrumenter: &Instrumenter,
    name: &str,
    program: &OsStr,
    args: &[OsString],
    options: &RunOptions,
) -> TimelogResult<i32> {
    for n in 0..options.repeat.max(1) {
        let iteration = options
            .iteration
            .checked_add(i64::from(n))
            .ok_or(TimelogError::IterationOverflow {
                start: options.iteration,
                repeat: options.repeat,
            })?;
        let status = instrumenter
            .time(name, CallMeta::iteration(iteration), || {
                Command::new(program).args(args).status()
            })
            .map_err(|failed| failed.into_parts().1)?
            .map_err(|source| TimelogError::Spawn {
                program: program.to_string_lossy().into_owned(),
                source,
            })?;

        tracing::info!(operation = name, iteration, %status, "command finished");
        if !status.success() {
            return Ok(status.code().unwrap_or(1));
        }
    }
    Ok(0)
}

fn program_name(program: &OsStr) -> String {
    Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

#[cfg(feature = "cli")]
fn init_tracing(log_level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    // Ignore error if already set
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Run timelog with a list of arguments. The accepted arguments are the same as the command line
/// arguments for the timelog binary.
///
/// Example:
///
/// ```no_run
/// use timelog::run_timelog;
///
/// match run_timelog(&["--log", "timings.csv", "--repeat", "5", "--", "ls", "-l"]) {
///     Ok(code) => println!("Exited with {}", code),
///     Err(e) => eprintln!("Error: {:?}", e),
/// }
/// ```
#[cfg(feature = "cli")]
pub fn run_timelog<I, T>(args: I) -> TimelogResult<i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut args_items = vec![OsString::from("timelog")];
    for item in args {
        args_items.push(item.into());
    }
    let args = Args::parse_from(args_items);
    init_tracing(&args.log_level);
    run_timelog_with_options(args.into())
}

#[cfg(not(feature = "cli"))]
pub fn run_timelog<I, T>(_args: I) -> TimelogResult<i32>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    eprintln!("Error: CLI is not enabled. Compile with the 'cli' feature to use this binary.");
    std::process::exit(1);
}
