use thiserror::Error;

/// Failures while bringing up or running the process around the engine.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("database error: {message}")]
    Database { message: String },
    #[error("invalid runtime configuration: {message}")]
    Configuration { message: String },
    #[error("failed to initialise telemetry: {message}")]
    Telemetry { message: String },
    #[error("scan worker stopped unexpectedly: {0}")]
    Worker(#[from] std::io::Error),
}

impl InfraError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry {
            message: message.into(),
        }
    }
}
