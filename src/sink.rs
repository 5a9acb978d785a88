use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::{SinkConfig, SinkOptions};
use crate::errors::{TimelogError, TimelogResult};
use crate::record::MeasurementRecord;

/// Counters describing what a sink has written so far
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub flushes: u64,
    pub rows_written: u64,
    pub failed_flushes: u64,
}

#[derive(Debug, Default)]
struct LogBuffer {
    records: Vec<MeasurementRecord>,
    stats: FlushStats,
}

/// Buffered, thread-safe writer of `MeasurementRecord`s to an append-only CSV file.
///
/// Records are kept in memory until `buffer_size` of them have accumulated, or a caller asks for
/// an immediate flush. The flush itself happens while holding the buffer lock, so flushes on one
/// sink are totally ordered and every buffered record is written exactly once. On a failed write
/// the buffer is kept as is, and the next flush retries it.
///
/// Nothing is flushed on drop: call `flush` before shutting down to drain the buffer.
#[derive(Debug)]
pub struct LogSink {
    config: SinkConfig,
    internal: Mutex<LogBuffer>,
}

impl LogSink {
    pub fn new(options: SinkOptions) -> TimelogResult<LogSink> {
        let config = SinkConfig::try_from(options)?;
        Ok(LogSink::with_config(config))
    }

    pub fn with_config(config: SinkConfig) -> LogSink {
        LogSink {
            config,
            internal: Mutex::new(LogBuffer::default()),
        }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Buffer a measurement, flushing if the buffer is full or `flush_now` is set.
    pub fn record(
        &self,
        operation_name: &str,
        elapsed_time: f64,
        iteration: i64,
        flush_now: bool,
    ) -> TimelogResult<()> {
        let record = MeasurementRecord::new(operation_name, elapsed_time, iteration)?;
        self.push(record, flush_now)
    }

    pub fn push(&self, record: MeasurementRecord, flush_now: bool) -> TimelogResult<()> {
        let mut buffer = self.lock();
        tracing::debug!(operation = record.operation_name(), "saving results");
        buffer.records.push(record);
        if buffer.records.len() >= self.config.buffer_size() || flush_now {
            self.flush_locked(&mut buffer)?;
        }
        Ok(())
    }

    /// Write all buffered records to the target file. No-op when nothing is buffered.
    pub fn flush(&self) -> TimelogResult<()> {
        let mut buffer = self.lock();
        self.flush_locked(&mut buffer)
    }

    /// Number of records waiting for the next flush
    pub fn pending(&self) -> usize {
        self.lock().records.len()
    }

    pub fn stats(&self) -> FlushStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, LogBuffer> {
        // The buffer is only ever pushed to or cleared, so it is consistent even if a holder
        // panicked
        self.internal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_locked(&self, buffer: &mut LogBuffer) -> TimelogResult<()> {
        if buffer.records.is_empty() {
            return Ok(());
        }
        match self.write_rows(&buffer.records) {
            Ok(()) => {
                let n = buffer.records.len() as u64;
                buffer.stats.flushes += 1;
                buffer.stats.rows_written += n;
                buffer.records.clear();
                tracing::debug!(
                    path = %self.config.target_path().display(),
                    rows = n,
                    "flushed timings"
                );
                Ok(())
            }
            Err(e) => {
                buffer.stats.failed_flushes += 1;
                tracing::warn!(
                    path = %self.config.target_path().display(),
                    pending = buffer.records.len(),
                    error = %e,
                    "failed to flush timings, keeping them buffered"
                );
                Err(e)
            }
        }
    }

    fn write_rows(&self, records: &[MeasurementRecord]) -> TimelogResult<()> {
        let path = self.config.target_path();
        let open_error = |source: io::Error| TimelogError::OpenLog {
            path: path.display().to_string(),
            source,
        };

        // An empty file also gets a header: a previous flush may have created it and then failed
        let needs_header = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(open_error(e)),
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_error)?;

        let layout = self.config.layout();
        let mut writer = WriterBuilder::new()
            .delimiter(self.config.delimiter())
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(layout.header())?;
        }
        for record in records {
            writer.write_record(record.fields(layout))?;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_data()?;
        Ok(())
    }
}

impl Drop for LogSink {
    fn drop(&mut self) {
        let buffer = self
            .internal
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !buffer.records.is_empty() {
            tracing::warn!(
                path = %self.config.target_path().display(),
                pending = buffer.records.len(),
                "dropping sink with unflushed timings"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;

    use rstest::rstest;
    use tempfile::tempdir;

    use super::*;
    use crate::delimiter::Delimiter;
    use crate::record::Layout;

    fn sink_at(path: &Path, buffer_size: usize) -> LogSink {
        let options = SinkOptions {
            buffer_size,
            ..SinkOptions::new(path)
        };
        LogSink::new(options).unwrap()
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(String::from).collect())
            .collect()
    }

    fn header() -> Vec<String> {
        Layout::Full.header().iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_three_records_fill_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = sink_at(&path, 3);
        sink.record("op", 0.1, 0, false).unwrap();
        sink.record("op", 0.1, 0, false).unwrap();
        assert!(!path.exists());
        sink.record("op", 0.1, 0, false).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], header());
        for row in &rows[1..] {
            assert_eq!(row, &vec!["op", "0.1", "0"]);
        }
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_flush_now_keeps_call_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = sink_at(&path, 10);
        for i in 0..25 {
            sink.record(&format!("op{i}"), 0.5, i, true).unwrap();
        }
        let rows = read_rows(&path);
        assert_eq!(rows.len(), 26);
        for (i, row) in rows[1..].iter().enumerate() {
            assert_eq!(row[0], format!("op{i}"));
            assert_eq!(row[2], i.to_string());
        }
        assert_eq!(sink.stats().flushes, 25);
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    #[case(10)]
    fn test_batching_threshold(#[case] k: usize) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = sink_at(&path, k);
        let count_rows = || read_rows(&path).len() - 1;

        for i in 0..k {
            sink.record("op", 0.0, i as i64, false).unwrap();
        }
        assert_eq!(count_rows(), k);
        assert_eq!(sink.pending(), 0);

        sink.record("op", 0.0, 0, false).unwrap();
        if k > 1 {
            assert_eq!(count_rows(), k);
            assert_eq!(sink.pending(), 1);
        }
        for _ in 1..k {
            sink.record("op", 0.0, 0, false).unwrap();
        }
        assert_eq!(count_rows(), 2 * k);
        assert_eq!(
            sink.stats(),
            FlushStats {
                flushes: 2,
                rows_written: 2 * k as u64,
                failed_flushes: 0,
            }
        );
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = sink_at(&path, 100);
        sink.record("a", 1.0, 0, false).unwrap();
        sink.flush().unwrap();
        sink.record("b", 2.0, 0, false).unwrap();
        sink.flush().unwrap();
        sink.flush().unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| **r == header()).count(), 1);
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        std::fs::write(&path, "operation_name,elapsed_time,iteration\nold,1,0\n").unwrap();
        let sink = sink_at(&path, 1);
        sink.record("new", 2.0, 1, false).unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["old", "1", "0"]);
        assert_eq!(rows[2], vec!["new", "2", "1"]);
    }

    #[test]
    fn test_header_written_to_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        std::fs::File::create(&path).unwrap();
        let sink = sink_at(&path, 10);
        sink.record("op", 0.5, 2, true).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "operation_name,elapsed_time,iteration\nop,0.5,2\n");
    }

    #[test]
    fn test_drop_does_not_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = sink_at(&path, 10);
        sink.record("op", 0.1, 0, false).unwrap();
        assert_eq!(sink.pending(), 1);
        drop(sink);
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_flush_creates_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = sink_at(&path, 1);
        sink.flush().unwrap();
        assert!(!path.exists());
        assert_eq!(sink.stats(), FlushStats::default());
    }

    #[test]
    fn test_quotes_names_with_delimiter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = sink_at(&path, 1);
        sink.record("load, \"big\" file", 0.5, 0, false).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"load, \"\"big\"\" file\""));
        assert_eq!(read_rows(&path)[1][0], "load, \"big\" file");
    }

    #[test]
    fn test_minimal_layout_with_custom_delimiter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        let options = SinkOptions {
            buffer_size: 1,
            layout: Layout::Minimal,
            delimiter: Delimiter::Character(b'\t'),
            ..SinkOptions::new(&path)
        };
        let sink = LogSink::new(options).unwrap();
        sink.record("op", 0.25, 7, false).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "function_name\telapsed_time\nop\t0.25\n");
    }

    #[test]
    fn test_invalid_record_is_not_buffered() {
        let dir = tempdir().unwrap();
        let sink = sink_at(&dir.path().join("log.csv"), 10);
        assert!(matches!(
            sink.record("", 0.1, 0, false),
            Err(TimelogError::EmptyOperationName)
        ));
        assert!(sink.record("op", -1.0, 0, false).is_err());
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_failed_flush_keeps_buffer() {
        let dir = tempdir().unwrap();
        let missing_dir = dir.path().join("not_yet");
        let path = missing_dir.join("log.csv");
        let sink = sink_at(&path, 2);

        sink.record("a", 0.1, 0, false).unwrap();
        let err = sink.record("b", 0.2, 1, false).unwrap_err();
        assert!(matches!(err, TimelogError::OpenLog { .. }));
        assert_eq!(sink.pending(), 2);
        assert_eq!(sink.stats().failed_flushes, 1);

        std::fs::create_dir(&missing_dir).unwrap();
        sink.flush().unwrap();
        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1][0], "a");
        assert_eq!(rows[2][0], "b");
        assert_eq!(sink.pending(), 0);
    }

    #[test]
    fn test_concurrent_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let sink = Arc::new(sink_at(&path, 7));
        let num_threads = 8;
        let calls_per_thread = 50;

        thread::scope(|s| {
            for t in 0..num_threads {
                let sink = Arc::clone(&sink);
                s.spawn(move || {
                    for i in 0..calls_per_thread {
                        sink.record(&format!("worker{t}"), 0.001, i, false).unwrap();
                    }
                });
            }
        });
        sink.flush().unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows[0], header());
        let data = &rows[1..];
        assert_eq!(data.len(), (num_threads * calls_per_thread) as usize);
        let unique: HashSet<(String, String)> = data
            .iter()
            .map(|row| {
                assert_eq!(row.len(), 3);
                (row[0].clone(), row[2].clone())
            })
            .collect();
        assert_eq!(unique.len(), data.len());
    }
}
