//! Error types specific to APDU responses

use std::fmt;

use thiserror::Error;

use super::status::StatusWord;

/// Error for a non-success status word in an APDU response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct StatusError {
    /// Status word that caused the error
    pub status: StatusWord,
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Status error {} ({})",
            self.status,
            self.status.description()
        )
    }
}

impl StatusError {
    /// Create a new status error
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self {
            status: StatusWord::new(sw1, sw2),
        }
    }
}

/// Error for APDU response processing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// Incomplete response (less than 2 bytes)
    #[error("Incomplete response: {0} bytes")]
    Incomplete(usize),

    /// Status error
    #[error(transparent)]
    Status(#[from] StatusError),
}
