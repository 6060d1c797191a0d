//! Error types for the control domain
//!
//! The audio thread never produces these. Real-time anomalies are reported
//! through [`crate::audio::engine::BlockAnomaly`] instead.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while locating, instantiating or configuring a processing unit
#[derive(Debug, Error)]
pub enum UnitError {
    /// No usable unit was found by the provider
    #[error("No processing unit found (searched {searched} location(s))")]
    NotFound { searched: usize },

    /// A unit was found but could not be created
    #[error("Failed to instantiate processing unit '{name}': {reason}")]
    InstantiationFailed { name: String, reason: String },

    /// The unit cannot run with a stereo input/output layout
    #[error("Unsupported channel layout: {inputs} in / {outputs} out (stereo required)")]
    LayoutUnsupported { inputs: u32, outputs: u32 },

    /// Resource allocation or activation failed while preparing
    #[error("Failed to prepare processing unit '{name}': {reason}")]
    PrepareFailed { name: String, reason: String },

    /// The lifecycle was asked to do something its current state forbids
    #[error("Cannot {action} while the processing unit is {from}")]
    InvalidTransition { from: &'static str, action: &'static str },
}

/// Broad failure class, used when reporting to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitErrorKind {
    NotFound,
    InstantiationFailed,
    LayoutUnsupported,
    Resource,
    Lifecycle,
}

impl UnitError {
    pub fn kind(&self) -> UnitErrorKind {
        match self {
            Self::NotFound { .. } => UnitErrorKind::NotFound,
            Self::InstantiationFailed { .. } => UnitErrorKind::InstantiationFailed,
            Self::LayoutUnsupported { .. } => UnitErrorKind::LayoutUnsupported,
            Self::PrepareFailed { .. } => UnitErrorKind::Resource,
            Self::InvalidTransition { .. } => UnitErrorKind::Lifecycle,
        }
    }
}

/// Result type for processing unit operations
pub type UnitResult<T> = Result<T, UnitError>;

/// Errors from the audio device layer
#[derive(Debug, Error)]
pub enum AudioError {
    /// No device of the requested direction exists
    #[error("No default {0} device found")]
    NoDefaultDevice(&'static str),

    /// A named device is not present
    #[error("Audio device '{0}' not found")]
    DeviceNotFound(String),

    /// Enumeration failed
    #[error("Failed to enumerate devices: {0}")]
    Enumeration(String),

    /// Device configuration could not be read or matched
    #[error("Failed to get device config: {0}")]
    Config(String),

    /// Stream construction failed
    #[error("Failed to build {direction} stream: {reason}")]
    StreamBuild { direction: &'static str, reason: String },

    /// Stream could not be started
    #[error("Failed to start {direction} stream: {reason}")]
    StreamPlay { direction: &'static str, reason: String },
}

/// Result type for audio device operations
pub type AudioResult<T> = Result<T, AudioError>;

/// Errors reading or writing the session configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
