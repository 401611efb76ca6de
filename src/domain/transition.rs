//! Visibility transitions produced by range scans.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::content::{TemporalContent, UnixTimestamp};
use super::error::DomainError;

/// Which bound of a record's window was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    Start,
    End,
    Unknown,
}

impl TransitionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransitionType::Start => "start",
            TransitionType::End => "end",
            TransitionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "start" => Ok(TransitionType::Start),
            "end" => Ok(TransitionType::End),
            "unknown" => Ok(TransitionType::Unknown),
            other => Err(DomainError::invalid_transition_type(other)),
        }
    }
}

/// A record paired with the instant one of its bounds was crossed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    content: TemporalContent,
    timestamp: UnixTimestamp,
    transition_type: TransitionType,
    workspace_id: i32,
    language_id: i32,
}

impl TransitionEvent {
    pub fn new(
        content: TemporalContent,
        timestamp: UnixTimestamp,
        transition_type: TransitionType,
    ) -> Self {
        let workspace_id = content.workspace_id();
        let language_id = content.language_id();
        Self {
            content,
            timestamp,
            transition_type,
            workspace_id,
            language_id,
        }
    }

    /// Build an event from a stringly-typed transition kind.
    pub fn from_raw(
        content: TemporalContent,
        timestamp: UnixTimestamp,
        transition_type: &str,
    ) -> Result<Self, DomainError> {
        let transition_type = transition_type.parse()?;
        Ok(Self::new(content, timestamp, transition_type))
    }

    pub fn content(&self) -> &TemporalContent {
        &self.content
    }

    pub fn timestamp(&self) -> UnixTimestamp {
        self.timestamp
    }

    pub fn transition_type(&self) -> TransitionType {
        self.transition_type
    }

    pub fn workspace_id(&self) -> i32 {
        self.workspace_id
    }

    pub fn language_id(&self) -> i32 {
        self.language_id
    }
}
