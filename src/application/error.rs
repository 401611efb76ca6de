use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::repos::RepoError, config::LoadError, domain::error::DomainError,
    infra::error::InfraError,
};

/// Errors raised by the transition engine.
#[derive(Debug, Error)]
pub enum TemporalError {
    /// Strategy selection could not be honoured. Callers resolve this to the
    /// documented default; it never aborts work.
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error(transparent)]
    Repository(#[from] RepoError),
    #[error("reference index lookup failed: {message}")]
    ReferenceIndex { message: String },
    #[error("required collaborator `{dependency}` is missing")]
    DependencyMissing { dependency: &'static str },
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("cache tag flush failed: {message}")]
    Flush { message: String },
}

impl TemporalError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn reference_index(err: impl std::fmt::Display) -> Self {
        Self::ReferenceIndex {
            message: err.to_string(),
        }
    }

    pub fn dependency_missing(dependency: &'static str) -> Self {
        Self::DependencyMissing { dependency }
    }

    pub fn flush(err: impl std::fmt::Display) -> Self {
        Self::Flush {
            message: err.to_string(),
        }
    }
}

/// Flatten an error and its sources into log-friendly messages.
pub fn error_chain(error: &dyn StdError) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Temporal(#[from] TemporalError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("batch run did not succeed: {processed} processed, {errors} failed")]
    BatchFailed { processed: usize, errors: usize },
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 78,
            AppError::Infra(InfraError::Database { .. }) => 69,
            AppError::Temporal(TemporalError::Repository(_)) => 69,
            AppError::BatchFailed { .. } => 75,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_walks_sources() {
        let error = AppError::from(TemporalError::Repository(RepoError::Timeout));
        let chain = error_chain(&error);
        assert_eq!(chain.first().map(String::as_str), Some("database timeout"));
    }

    #[test]
    fn exit_codes_distinguish_failure_kinds() {
        assert_eq!(
            AppError::BatchFailed {
                processed: 0,
                errors: 2
            }
            .exit_code(),
            75
        );
        assert_eq!(
            AppError::from(TemporalError::Repository(RepoError::NotFound)).exit_code(),
            69
        );
        assert_eq!(AppError::unexpected("boom").exit_code(), 1);
    }
}
