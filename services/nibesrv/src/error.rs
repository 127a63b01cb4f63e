//! Error handling for the NIBE gateway service
//!
//! Module errors (`FrameError`, `DirectoryError`, ...) stay typed inside their
//! modules and are folded into [`NibeSrvError`] at the service boundary.

use thiserror::Error;

use crate::core::TransactionError;
use crate::protocol::FrameError;
use crate::registers::DirectoryError;

/// NIBE gateway service error type
#[derive(Error, Debug, Clone)]
pub enum NibeSrvError {
    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Socket and file errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Bus frame errors
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Register catalogue and value conversion errors
    #[error("Register error: {0}")]
    RegisterError(String),

    /// MQTT client errors
    #[error("MQTT error: {0}")]
    MqttError(String),

    /// Payload (de)serialization errors
    #[error("Data error: {0}")]
    DataError(String),

    /// Internal errors (task failures, logging setup)
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the NIBE gateway service
pub type Result<T> = std::result::Result<T, NibeSrvError>;

impl NibeSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        NibeSrvError::ConfigError(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        NibeSrvError::IoError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        NibeSrvError::DataError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        NibeSrvError::InternalError(msg.into())
    }
}

impl From<std::io::Error> for NibeSrvError {
    fn from(err: std::io::Error) -> Self {
        NibeSrvError::IoError(err.to_string())
    }
}

impl From<FrameError> for NibeSrvError {
    fn from(err: FrameError) -> Self {
        NibeSrvError::ProtocolError(err.to_string())
    }
}

impl From<DirectoryError> for NibeSrvError {
    fn from(err: DirectoryError) -> Self {
        NibeSrvError::RegisterError(err.to_string())
    }
}

impl From<TransactionError> for NibeSrvError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Frame(e) => e.into(),
            other => NibeSrvError::RegisterError(other.to_string()),
        }
    }
}

impl From<figment::Error> for NibeSrvError {
    fn from(err: figment::Error) -> Self {
        NibeSrvError::ConfigError(err.to_string())
    }
}

impl From<rumqttc::ClientError> for NibeSrvError {
    fn from(err: rumqttc::ClientError) -> Self {
        NibeSrvError::MqttError(err.to_string())
    }
}

impl From<serde_json::Error> for NibeSrvError {
    fn from(err: serde_json::Error) -> Self {
        NibeSrvError::DataError(err.to_string())
    }
}

impl From<common::anyhow::Error> for NibeSrvError {
    fn from(err: common::anyhow::Error) -> Self {
        NibeSrvError::InternalError(format!("{:#}", err))
    }
}
