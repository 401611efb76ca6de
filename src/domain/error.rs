use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("invalid transition type `{value}`; expected one of start, end, unknown")]
    InvalidTransitionType { value: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_transition_type(value: impl Into<String>) -> Self {
        Self::InvalidTransitionType {
            value: value.into(),
        }
    }
}
