//! Error type shared by the tracker library.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API rejected the subscription key")]
    InvalidAuth,

    #[error("resource not found: {url}")]
    NotFound { url: String },

    #[error("API returned status {status} for {url}")]
    Status {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("invalid URL `{url}`: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("invalid header: {message}")]
    InvalidHeader { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("halte {halte} not found in any entity")]
    HalteNotFound { halte: String },

    #[error("halte {halte} has no `{rel}` link")]
    MissingLink { halte: String, rel: String },

    #[error("no lines available for halte {halte}")]
    NoLines { halte: String },

    #[error("no times available for line {line} at halte {halte}")]
    NoTimes { halte: String, line: String },

    #[error("line {line} is not served at the selected halte")]
    UnknownLine { line: String },

    #[error("time option `{option}` is not available")]
    UnknownTime { option: String },

    #[error("invalid time value `{value}`")]
    InvalidTime { value: String },

    #[error("device {unique_id} is already tracked")]
    DuplicateDevice { unique_id: String },

    #[error("device {unique_id} not found in configuration")]
    DeviceNotFound { unique_id: String },

    #[error("flow step `{step}` called out of order")]
    FlowOrder { step: &'static str },

    #[error("error communicating with API: {message}")]
    UpdateFailed { message: String },
}

impl TrackerError {
    /// Short error key reported by the setup flow.
    pub fn flow_key(&self) -> &'static str {
        match self {
            TrackerError::InvalidAuth => "invalid_auth",
            TrackerError::NoLines { .. } => "no_lines_available",
            TrackerError::NoTimes { .. } => "no_times_available",
            TrackerError::DeviceNotFound { .. } => "device_not_found",
            TrackerError::UnknownTime { .. } => "time_error",
            TrackerError::Http(_)
            | TrackerError::Status { .. }
            | TrackerError::NotFound { .. }
            | TrackerError::HalteNotFound { .. }
            | TrackerError::MissingLink { .. }
            | TrackerError::Json(_) => "cannot_connect",
            _ => "unknown",
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
