use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing dependency: '{binary}' not found on PATH ({purpose})")]
    MissingDependency { binary: String, purpose: String },

    #[error("Camera device not found: {0}")]
    DeviceNotFound(String),

    #[error("Port {port} still busy after {waited_ms} ms")]
    PortBusyTimeout { port: u16, waited_ms: u64 },

    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(String),

    #[error("Process '{program}' exited during startup ({status}); {attempts} attempt(s) made")]
    ProcessCrashOnStart {
        program: String,
        status: String,
        attempts: u32,
    },

    #[error("Process '{program}' exited while running ({status})")]
    ProcessExited { program: String, status: String },

    #[error("Preflight failed for {device}: {reason}")]
    PreflightFailed { device: String, reason: String },

    #[error("Install Error: {0}")]
    Install(String),

    #[error("File I/O Error: {0}")]
    Io(String),
}

impl AppError {
    /// Process exit code reported for this failure kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(_) | AppError::Io(_) => 1,
            AppError::PreflightFailed { .. } => 2,
            AppError::MissingDependency { .. } => 3,
            AppError::DeviceNotFound(_) => 4,
            AppError::PortBusyTimeout { .. } => 5,
            AppError::EncoderUnavailable(_) | AppError::ProcessCrashOnStart { .. } => 6,
            AppError::ProcessExited { .. } => 7,
            AppError::Install(_) => 8,
            AppError::InvalidValue { .. } => 9,
        }
    }
}

// Allow conversion from std::io::Error to AppError::Io
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

/// Walks an `anyhow` chain and returns the exit code of the first `AppError` in it.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<AppError>())
        .map(AppError::exit_code)
        .unwrap_or(1)
}
