use thiserror::Error;

/// Errors surfaced by the whitening pipeline.
///
/// Every error is fatal to the run: a partially whitened output is worse
/// than no output, so workers propagate the first failure to the
/// orchestrator and the remaining pool work is abandoned. Callers that
/// want retries wrap the whole run.
#[derive(Error, Debug)]
pub enum WhitenError {
    #[error("I/O failure while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("shape mismatch while {context}: expected {expected_rows} channel rows, found {actual_rows}")]
    ShapeMismatch {
        context: String,
        expected_rows: usize,
        actual_rows: usize,
    },

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl WhitenError {
    /// Wraps an I/O error with a description of the operation that failed,
    /// e.g. "reading chunk 7 of the input timeseries".
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        WhitenError::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, WhitenError>;
