#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// Unexpected failures or parse errors were observed.
    UnexpectedFailures = 10,

    /// One or more thresholds failed.
    ThresholdsFailed = 11,

    /// Unexpected failures observed and thresholds failed.
    UnexpectedAndThresholdsFailed = 12,

    /// Setup failed; no scenario executed.
    SetupFailed = 20,

    /// Invalid CLI/config input (bad flags, unreadable document, invalid thresholds, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, task panics).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_quality_gates(unexpected: bool, thresholds_failed: bool) -> Self {
        match (unexpected, thresholds_failed) {
            (false, false) => Self::Success,
            (true, false) => Self::UnexpectedFailures,
            (false, true) => Self::ThresholdsFailed,
            (true, true) => Self::UnexpectedAndThresholdsFailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_gates_map_to_codes() {
        assert_eq!(ExitCode::from_quality_gates(false, false).as_i32(), 0);
        assert_eq!(ExitCode::from_quality_gates(true, false).as_i32(), 10);
        assert_eq!(ExitCode::from_quality_gates(false, true).as_i32(), 11);
        assert_eq!(ExitCode::from_quality_gates(true, true).as_i32(), 12);
    }
}
