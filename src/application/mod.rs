//! Application services: strategies, the cached repository and the batch runner.

pub mod clock;
pub mod context;
pub mod error;
pub mod harmonize;
pub mod jobs;
pub mod lifetime;
pub mod repos;
pub mod scoping;
pub mod temporal;
pub mod timing;
