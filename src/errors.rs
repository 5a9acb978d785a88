use thiserror::Error;

pub type TimelogResult<T> = std::result::Result<T, TimelogError>;

/// Errors timelog can have
#[derive(Debug, Error)]
pub enum TimelogError {
    #[error("Target path should not be empty")]
    EmptyTargetPath,

    #[error("Buffer size should be a positive integer, got {0}")]
    InvalidBufferSize(usize),

    #[error("Operation name should not be empty")]
    EmptyOperationName,

    #[error("Elapsed time should be a finite, non-negative number of seconds, got {0}")]
    InvalidElapsedTime(f64),

    #[error("Delimiter should not be empty")]
    DelimiterEmpty,

    #[error("Delimiter should be within the ASCII range: {0} is too fancy")]
    DelimiterNotAscii(char),

    #[error("Delimiter should be exactly one character (or \\t), got '{0}'")]
    DelimiterMultipleCharacters(String),

    #[error("Delimiter {0:?} is reserved by the CSV format")]
    DelimiterReserved(char),

    #[error("A sink with a different configuration is already bound to {0}")]
    SinkConflict(String),

    #[error("Cannot open log file {path}: {source}")]
    OpenLog {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Iteration tags overflow: {repeat} runs starting at {start}")]
    IterationOverflow { start: i64, repeat: u32 },

    #[error("No command given to time")]
    EmptyCommand,

    #[error("Failed to run command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
