//! Domain layer types and invariants.

pub mod content;
pub mod error;
pub mod transition;

pub use content::{ContentTable, TemporalContent, TemporalContentParams, UnixTimestamp};
pub use error::DomainError;
pub use transition::{TransitionEvent, TransitionType};
