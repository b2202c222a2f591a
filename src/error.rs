//! Error types for the RFB server core.

use std::io;
use thiserror::Error;

/// Result type for RFB core operations.
pub type Result<T> = std::result::Result<T, VncError>;

/// Errors that can occur while negotiating or running an RFB session.
#[derive(Debug, Error)]
pub enum VncError {
    /// Short read, short write, or connection reset. Fatal to the owning session.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// Malformed framing, unknown message tag, or an out-of-range value.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Password mismatch or an invalid security-type selection.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Invalid server configuration, fatal at startup only.
    #[error("configuration error: {0}")]
    Config(String),

    /// Password provider failure, capability failure, or other internal fault.
    #[error("internal error: {0}")]
    Internal(String),

    /// The connection was already closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl VncError {
    /// Shorthand for constructing a [`VncError::Protocol`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Shorthand for constructing a [`VncError::Auth`].
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Shorthand for constructing a [`VncError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for constructing a [`VncError::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
