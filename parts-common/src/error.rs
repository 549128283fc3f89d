use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid preference key: {0:?}")]
    InvalidKey(String),
    #[error("not writable: {0}")]
    NotWritable(String),
    #[error("unexpected value in {path}: {value:?}")]
    InvalidValue { path: String, value: String },
}
