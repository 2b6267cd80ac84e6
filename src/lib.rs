pub mod config;
pub mod coordinator;
pub mod error;
pub mod fetch;
pub mod flow;
pub mod infra;
pub mod output;
pub mod schedule;
pub mod sensor;
pub mod services;

pub use error::{Result, TrackerError};
