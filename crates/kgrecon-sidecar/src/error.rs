use kgrecon_model::ParseJudgmentError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{cells} cells but {rows} row indices")]
    LengthMismatch { cells: usize, rows: usize },

    #[error("row {row_index} of dataset '{dataset_id}' has a corrupt judgment")]
    CorruptJudgment {
        dataset_id: String,
        row_index: u64,
        #[source]
        source: ParseJudgmentError,
    },

    #[error("row index {0} does not fit the store's integer column")]
    RowIndexOverflow(u64),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error("sidecar store is closed")]
    Closed,

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SidecarError>;
