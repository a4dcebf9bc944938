pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid metric key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid summary document: {0}")]
    InvalidSummary(#[from] serde_json::Error),

    #[error("summary document has no `metrics` object")]
    MissingMetrics,
}
