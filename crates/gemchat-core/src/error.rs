use std::path::PathBuf;

use thiserror::Error;

/// The conversation store could not be read or written.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create store directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open conversation store {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("conversation store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored conversation is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// The completion service call failed or returned data we could not read.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no API key configured; set GOOGLE_API_KEY or add api_key to the config file")]
    MissingApiKey,

    #[error("request to completion service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("completion service reported an error: {0}")]
    Api(String),

    #[error("malformed response chunk: {0}")]
    Malformed(String),
}

/// Failure of a whole chat turn.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
