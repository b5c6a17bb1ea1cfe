use std::path::PathBuf;

/// Failures that abort a filtering run.
///
/// Missing categorical data is not represented here: stages skip or flag
/// such rows and carry on.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("{axis} keys of the count matrix do not match the {axis} metadata (first difference at position {position}: matrix has {matrix:?}, metadata has {metadata:?})")]
    KeyMismatch {
        axis: &'static str,
        position: usize,
        matrix: Option<String>,
        metadata: Option<String>,
    },

    #[error("Duplicate {axis} key {key:?}")]
    DuplicateKey { axis: &'static str, key: String },

    #[error("Count matrix is {rows}x{cols} but metadata describes {expected_rows} rows and {expected_cols} MOTUs")]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },

    #[error("Cannot decode reaction identifier {name:?}: {reason}")]
    Decode { name: String, reason: String },

    #[error("MOTU {id:?} has no contamination label; run the contamination classifier first")]
    Unclassified { id: String },

    #[error("Replicates of sample {sample:?} disagree on {field}")]
    InconsistentMerge { sample: String, field: &'static str },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Correspondence analysis failed: {0}")]
    Embedding(#[from] ndarray_linalg::error::LinalgError),

    #[error("Malformed input table {path:?}: {reason}")]
    Table { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FilterError>;
