//! # Serial Session
//!
//! Serial session manager for ESP32 water-tank controllers.
//!
//! This crate opens one serial port at a time, decodes what the board prints
//! into a bounded, timestamped log, sends text and firmware commands, and can
//! pulse DTR/RTS to drop the board into its bootloader.
//!
//! ## Features
//!
//! - **Session Lifecycle**: ordered, best-effort teardown that always ends in a
//!   closed state.
//! - **Async Serial Communication**: non-blocking port I/O using the Tokio
//!   async runtime and `tokio-serial`.
//! - **Streaming Text Decoding**: UTF-8 decoding that survives characters split
//!   across reads.
//! - **Bounded Log**: the last 300 events, with live subscription.
//!
//! ## Architecture
//!
//! - [`serial`]: port boundary, stream adapter, read loop, log and session
//! - [`config`]: RON-backed configuration
//! - [`error`]: error type for the crate

pub mod config;
pub mod error;
pub mod serial;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::error::*;
    pub use crate::serial::{
        LogEntry, LogHandle, LogKind, NativeHost, SerialHost, SerialSession, SessionStatus,
        TankCommand,
    };
}
