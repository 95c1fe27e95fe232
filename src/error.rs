use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error("protocol mismatch on {request_id}: expected echo of {expected}, got {got}")]
    ProtocolMismatch {
        request_id: String,
        expected: &'static str,
        got: String,
    },

    #[error("frame truncated or malformed, connection closed")]
    FrameError,
}

pub type Result<T> = std::result::Result<T, Error>;
