use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::RuntimeError(e) => e,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.anyhow())
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.anyhow().as_ref())
    }
}

/// Configuration problems surfaced by the core crate are the user's input.
pub(crate) fn classify_core_error(err: speedalyze_core::Error) -> RunError {
    use speedalyze_core::Error as CoreError;

    match err {
        CoreError::EmptyStages
        | CoreError::ZeroDurationStage { .. }
        | CoreError::InvalidThreshold { .. }
        | CoreError::UnknownOperation(_)
        | CoreError::InvalidBaseUrl(_)
        | CoreError::Metrics(_) => RunError::InvalidInput(err.into()),
        CoreError::AlreadyStarted => RunError::RuntimeError(err.into()),
    }
}
