//! Error types specific to card transports
//!
//! Framing problems (oversized length fields, a data read with no pending
//! frame) are part of this taxonomy: a corrupt stream is as terminal for the
//! channel as a dropped socket.

use std::io;

use thiserror::Error;

/// Transport error type
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream before a full frame arrived
    #[error("Connection closed by peer after {received} of {expected} bytes")]
    ConnectionClosed {
        /// Bytes the frame required
        expected: usize,
        /// Bytes received before the stream ended
        received: usize,
    },

    /// The peer stopped sending in the middle of a frame
    #[error("Peer stalled mid-frame after {received} of {expected} bytes")]
    Stalled {
        /// Bytes the frame part required
        expected: usize,
        /// Bytes received before the read deadline hit
        received: usize,
    },

    /// A length field exceeded the accepted maximum
    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Declared length
        len: usize,
        /// Accepted maximum
        max: usize,
    },

    /// A data read was requested while no data frame was announced
    #[error("No data frame pending")]
    NoPendingFrame,

    /// Failed to establish the connection
    #[error("Failed to connect: {0}")]
    Connection(String),

    /// Device or driver level failure
    #[error("Device error: {0}")]
    Device(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Cancelled operation
    #[error("Operation cancelled")]
    Cancelled,
}

impl TransportError {
    /// Map an I/O error, folding read deadlines into [`TransportError::Timeout`]
    pub fn from_io(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::Timeout,
            _ => Self::Io(error),
        }
    }

    /// Whether the error is a framing violation rather than an I/O failure
    pub const fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. } | Self::NoPendingFrame | Self::Stalled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_deadlines() {
        let err = TransportError::from_io(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(err, TransportError::Timeout));

        let err = TransportError::from_io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(err, TransportError::Io(_)));
        assert!(!err.is_protocol_error());
        assert!(TransportError::NoPendingFrame.is_protocol_error());
        assert!(
            TransportError::Stalled {
                expected: 2,
                received: 1
            }
            .is_protocol_error()
        );
    }
}
