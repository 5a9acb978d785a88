use std::path::{Path, PathBuf};

use crate::delimiter::Delimiter;
use crate::errors::{TimelogError, TimelogResult};
use crate::record::Layout;

pub const DEFAULT_LOG_FILENAME: &str = "function_log.csv";
pub const DEFAULT_BUFFER_SIZE: usize = 10;

/// Options for constructing a `LogSink`.
///
/// Example:
///
/// ```
/// use timelog::SinkOptions;
///
/// let options = SinkOptions {
///     buffer_size: 100,
///     ..SinkOptions::new("/tmp/timings.csv")
/// };
/// assert_eq!(options.buffer_size, 100);
/// ```
#[derive(Clone, Debug)]
pub struct SinkOptions {
    pub target_path: PathBuf,
    pub buffer_size: usize,
    pub layout: Layout,
    pub delimiter: Delimiter,
}

impl SinkOptions {
    pub fn new(target_path: impl Into<PathBuf>) -> Self {
        SinkOptions {
            target_path: target_path.into(),
            ..Default::default()
        }
    }
}

impl Default for SinkOptions {
    fn default() -> Self {
        SinkOptions {
            target_path: PathBuf::from(DEFAULT_LOG_FILENAME),
            buffer_size: DEFAULT_BUFFER_SIZE,
            layout: Layout::default(),
            delimiter: Delimiter::default(),
        }
    }
}

/// Validated sink configuration. Can only be obtained from `SinkOptions` that passed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    target_path: PathBuf,
    buffer_size: usize,
    layout: Layout,
    delimiter: u8,
}

impl SinkConfig {
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Number of buffered records that triggers an automatic flush
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }
}

impl TryFrom<SinkOptions> for SinkConfig {
    type Error = TimelogError;

    fn try_from(options: SinkOptions) -> TimelogResult<Self> {
        if options.target_path.as_os_str().is_empty() {
            return Err(TimelogError::EmptyTargetPath);
        }
        if options.buffer_size == 0 {
            return Err(TimelogError::InvalidBufferSize(options.buffer_size));
        }
        let delimiter = options.delimiter.validated()?;
        Ok(SinkConfig {
            target_path: options.target_path,
            buffer_size: options.buffer_size,
            layout: options.layout,
            delimiter: delimiter.as_byte(),
        })
    }
}

/// Options for an `Instrumenter`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstrumentOptions {
    /// Force a flush after every call instead of relying on the buffer size alone
    pub flush_on_return: bool,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        InstrumentOptions {
            flush_on_return: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SinkConfig::try_from(SinkOptions::default()).unwrap();
        assert_eq!(config.target_path(), Path::new("function_log.csv"));
        assert_eq!(config.buffer_size(), 10);
        assert_eq!(config.layout(), Layout::Full);
        assert_eq!(config.delimiter(), b',');
        assert!(InstrumentOptions::default().flush_on_return);
    }

    #[test]
    fn test_empty_target_path() {
        let err = SinkConfig::try_from(SinkOptions::new("")).unwrap_err();
        assert!(matches!(err, TimelogError::EmptyTargetPath));
    }

    #[test]
    fn test_zero_buffer_size() {
        let options = SinkOptions {
            buffer_size: 0,
            ..SinkOptions::new("out.csv")
        };
        let err = SinkConfig::try_from(options).unwrap_err();
        assert!(matches!(err, TimelogError::InvalidBufferSize(0)));
    }

    #[test]
    fn test_reserved_delimiter() {
        let options = SinkOptions {
            delimiter: Delimiter::Character(b'\n'),
            ..SinkOptions::new("out.csv")
        };
        let err = SinkConfig::try_from(options).unwrap_err();
        assert!(matches!(err, TimelogError::DelimiterReserved('\n')));
    }
}
