use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for corpus loading, annotation, aggregation, and export failures.
#[derive(Debug, Error)]
pub enum TrendError {
    /// A required input file (corpus, dictionary, scores) does not exist.
    /// Fatal: the run aborts with no partial output.
    #[error("resource not found: {}", path.display())]
    MissingResource { path: PathBuf },

    /// The opaque classifier failed for one text. Propagated instead of
    /// substituting a default score, which would bias the yearly mean
    /// undetectably.
    #[error("classifier failed on entry '{date}': {source}")]
    Classify {
        date: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The classifier produced a label outside the declared universe and the
    /// configured policy rejects unrecognized labels.
    #[error("classifier returned unrecognized label '{0}'")]
    UnknownLabel(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("corpus is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("chart rendering failed: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, TrendError>;
