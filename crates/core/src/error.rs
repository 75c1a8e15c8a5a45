//! Core error type for card channel operations
//!
//! Every backend surfaces its failures through this type so callers can treat
//! physical, simulated and remote cards alike.

use crate::command::CommandError;
use crate::response::error::{ResponseError, StatusError};
use crate::transport::TransportError;

/// Core error type that encompasses all channel errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    //
    // Configuration errors
    //
    /// A normalizing channel was wrapped around another normalizing channel
    #[error("Configuration error: channel is already wrapped")]
    DoubleWrap,

    /// The channel does not implement the operation
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    //
    // Lifecycle errors
    //
    /// The channel was closed and cannot be reused
    #[error("Channel is closed")]
    Closed,

    /// The channel has no connection to a card
    #[error("Channel is not connected")]
    NotConnected,

    //
    // Transport related errors
    //
    /// Transport failure outside of an APDU exchange (connect, ATR, close)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An APDU exchange failed; the channel should be closed
    #[error("Transmit failed: {0}")]
    Transmit(#[source] TransportError),

    /// Buffer too small
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available
        available: usize,
    },

    //
    // APDU errors
    //
    /// Command could not be encoded or parsed
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Response could not be parsed
    #[error(transparent)]
    Response(#[from] ResponseError),

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },

    /// Generic dynamic error with string message
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new error with a dynamic message
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self::Message(message.into())
    }

    /// Whether this is a configuration error (never retried)
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::DoubleWrap | Self::Unsupported(_))
    }

    /// Whether the error leaves the channel unusable
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Transmit(_) | Self::Closed => true,
            Self::Context { source, .. } => source.is_terminal(),
            _ => false,
        }
    }
}

impl From<StatusError> for Error {
    fn from(error: StatusError) -> Self {
        Self::Response(ResponseError::Status(error))
    }
}

/// Extension trait for Result with channel errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

/// Result type for channel operations
pub type Result<T, E = Error> = core::result::Result<T, E>;
