use crate::errors::{TimelogError, TimelogResult};

/// Columns written to the target file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Layout {
    /// `operation_name,elapsed_time,iteration`
    #[default]
    Full,

    /// `function_name,elapsed_time`, without the iteration tag
    Minimal,
}

impl Layout {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            Layout::Full => &["operation_name", "elapsed_time", "iteration"],
            Layout::Minimal => &["function_name", "elapsed_time"],
        }
    }
}

/// One observation of a single timed invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementRecord {
    operation_name: String,
    elapsed_time: f64,
    iteration: i64,
}

impl MeasurementRecord {
    pub fn new(operation_name: &str, elapsed_time: f64, iteration: i64) -> TimelogResult<Self> {
        if operation_name.is_empty() {
            return Err(TimelogError::EmptyOperationName);
        }
        // Also rejects NaN
        if !(elapsed_time.is_finite() && elapsed_time >= 0.0) {
            return Err(TimelogError::InvalidElapsedTime(elapsed_time));
        }
        Ok(MeasurementRecord {
            operation_name: operation_name.to_owned(),
            elapsed_time,
            iteration,
        })
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Elapsed wall-clock time in seconds
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }

    pub fn iteration(&self) -> i64 {
        self.iteration
    }

    /// Fields of the data row for this record, in header order
    pub fn fields(&self, layout: Layout) -> Vec<String> {
        let mut fields = vec![self.operation_name.clone(), self.elapsed_time.to_string()];
        if layout == Layout::Full {
            fields.push(self.iteration.to_string());
        }
        fields
    }
}
