//! # Error Module
//!
//! This module provides the error type shared by every serial session operation.
//! It uses the `thiserror` crate for ergonomic error handling.

use thiserror::Error;

/// Result type alias for `serial_session` operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Main error type for the `serial_session` crate.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The host cannot hand out serial ports at all.
    #[error("Serial ports are not supported in this environment")]
    UnsupportedEnvironment,

    /// Failed to choose or open a serial port.
    #[error("Failed to open serial port '{port_name}': {reason}")]
    PortOpen { port_name: String, reason: String },

    /// The port's byte streams were already claimed by another adapter.
    #[error("Streams of serial port '{0}' are already claimed")]
    Adapter(String),

    /// Operation needs an open session.
    #[error("No serial connection is open")]
    NotConnected,

    /// A session is already open.
    #[error("Serial port '{0}' is already connected")]
    AlreadyConnected(String),

    /// Failed to write to serial port.
    #[error("Failed to write to serial port: {0}")]
    PortWrite(String),

    /// The port cannot drive DTR/RTS.
    #[error("Serial port '{0}' does not support DTR/RTS signal control")]
    SignalsUnsupported(String),

    /// Toggling DTR/RTS failed.
    #[error("Failed to toggle DTR/RTS: {0}")]
    Signal(String),

    /// A bootloader sequence is still running.
    #[error("A bootloader sequence is already in progress")]
    Busy,

    /// Baud rate can only change while disconnected.
    #[error("Baud rate cannot change while connected (current: {current})")]
    BaudRateLocked { current: u32 },

    /// Baud rate must be positive.
    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    /// Text that is not a firmware command.
    #[error("Unknown firmware command: {0}")]
    UnknownCommand(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File I/O error.
    #[error("File I/O error: {0}")]
    FileIo(#[from] std::io::Error),
}

impl SessionError {
    /// Creates a new port open error.
    #[must_use]
    pub fn port_open(port_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortOpen {
            port_name: port_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new adapter error.
    #[must_use]
    pub fn adapter(port_name: impl Into<String>) -> Self {
        Self::Adapter(port_name.into())
    }

    /// Creates a new port write error.
    #[must_use]
    pub fn port_write(msg: impl ToString) -> Self {
        Self::PortWrite(msg.to_string())
    }

    /// Creates a new signal error.
    #[must_use]
    pub fn signal(msg: impl ToString) -> Self {
        Self::Signal(msg.to_string())
    }

    /// Creates a new configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
