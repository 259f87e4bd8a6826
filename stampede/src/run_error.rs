use crate::exit_codes::ExitCode;

#[derive(Debug)]
pub enum RunError {
    InvalidInput(anyhow::Error),
    SetupFailed(anyhow::Error),
    RuntimeError(anyhow::Error),
}

impl RunError {
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InvalidInput(_) => ExitCode::InvalidInput,
            Self::SetupFailed(_) => ExitCode::SetupFailed,
            Self::RuntimeError(_) => ExitCode::RuntimeError,
        }
    }

    #[must_use]
    pub fn anyhow(&self) -> &anyhow::Error {
        match self {
            Self::InvalidInput(e) | Self::SetupFailed(e) | Self::RuntimeError(e) => e,
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

/// Maps a core failure to the exit-code class it belongs to.
pub(crate) fn classify_core_error(context: &'static str, err: stampede_core::Error) -> RunError {
    use stampede_core::Error as CoreError;

    let kind = match &err {
        CoreError::Setup(_) => RunError::SetupFailed,

        CoreError::InvalidVus { .. }
        | CoreError::InvalidIterations { .. }
        | CoreError::InvalidDuration { .. }
        | CoreError::InvalidExecutor { .. }
        | CoreError::InvalidStages { .. }
        | CoreError::InvalidMaxDuration { .. }
        | CoreError::DurationTooLong { .. }
        | CoreError::MetricNameConflict { .. }
        | CoreError::DuplicateScenario(_)
        | CoreError::UnknownScenario(_)
        | CoreError::NoScenarios
        | CoreError::InvalidThreshold { .. } => RunError::InvalidInput,

        CoreError::Join(_) => RunError::RuntimeError,
    };

    kind(anyhow::Error::new(err).context(context))
}
