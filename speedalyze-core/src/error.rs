pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    EmptyStages,

    #[error("stage {index} has a zero duration")]
    ZeroDurationStage { index: usize },

    #[error("invalid threshold `{expression}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("unknown operation `{0}` (expected list, detail, create, update or delete)")]
    UnknownOperation(String),

    #[error("invalid base url `{0}` (expected an absolute http:// or https:// url)")]
    InvalidBaseUrl(String),

    #[error("scheduler already ran; create a new one for another run")]
    AlreadyStarted,

    #[error(transparent)]
    Metrics(#[from] speedalyze_metrics::Error),
}
