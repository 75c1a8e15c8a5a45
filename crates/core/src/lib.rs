//! Core traits and types for smart card channels
//!
//! This crate provides the foundational types every card backend shares:
//!
//! - APDU [`Command`] and [`Response`] values according to ISO/IEC 7816-4
//! - The [`CardChannel`] trait implemented by physical, simulated and remote cards
//! - The [`WrappingChannel`] decorator that normalizes APDUs before they reach a backend
//! - [`TerminalSource`] for backends that enumerate reader slots
//! - Error types shared by all transports
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod channel;
pub mod command;
pub mod response;
pub mod terminal;
pub mod transport;
pub mod wrapping;

// Core error types
mod error;
pub use error::{Error, Result, ResultExt};

// Re-exports for common types
pub use channel::{Atr, Card, CardChannel, Protocol};
pub use command::{Command, ExpectedLength};
pub use response::Response;
pub use response::status::StatusWord;
pub use terminal::{TerminalInfo, TerminalSource};
pub use transport::TransportError;
pub use wrapping::{NormalizeDefaults, NormalizeOptions, WrappingChannel};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Atr, Bytes, BytesMut, CardChannel, Command, Error, Response, Result, StatusWord,
        TransportError, WrappingChannel,
    };
}
