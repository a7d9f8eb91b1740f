// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Error types for the stress test engine core.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Requested execution does not exist.
    #[error("execution '{0}' not found")]
    NotFound(String),

    /// Requested plugin kind is not registered.
    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    /// Test configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation requires a running execution but it isn't running.
    #[error("execution '{0}' is not running")]
    NotRunning(String),

    /// Operation attempted on an execution that already reached a terminal state.
    #[error("execution '{0}' already finished")]
    AlreadyFinished(String),

    /// A resource the execution needs (memory, disk, file handles) could not be obtained.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The safety monitor forced the execution to stop.
    #[error("safety violation: {0}")]
    SafetyViolation(String),

    /// The execution was cancelled by a stop request, not a failure.
    #[error("execution cancelled")]
    Cancelled,

    /// A workload plugin returned an error from one of its lifecycle methods.
    #[error("plugin '{plugin}' fault: {message}")]
    PluginFault { plugin: String, message: String },

    /// The system probe failed to produce a reading.
    #[error("probe failure: {0}")]
    ProbeFailure(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl EngineError {
    /// Create a new invalid-configuration error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new plugin-fault error.
    pub fn plugin_fault(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PluginFault {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    /// True when this represents a cooperative cancellation rather than a real failure.
    ///
    /// The orchestrator uses this to decide whether a driver task's early exit should be
    /// recorded as `Stopped` instead of `Failed`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for failures a caller may reasonably retry (used only for ambient maintenance
    /// operations like plugin health checks, never for `Execute`).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceUnavailable(_) | Self::ProbeFailure(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = EngineError::invalid_config("ramp_up exceeds duration");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_is_cancellation() {
        assert!(EngineError::Cancelled.is_cancellation());
        assert!(!EngineError::NotFound("x".into()).is_cancellation());
    }

    #[test]
    fn test_is_retryable() {
        assert!(EngineError::ResourceUnavailable("disk full".into()).is_retryable());
        assert!(!EngineError::InvalidConfig("bad".into()).is_retryable());
    }
}
