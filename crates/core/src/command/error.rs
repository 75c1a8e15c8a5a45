//! Error types specific to APDU commands

use thiserror::Error;

use super::ExpectedLength;

/// Error for APDU command encoding and parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidLength(usize),

    /// Data too long
    #[error("Data too long: {0} bytes (max {1})")]
    DataTooLong(usize, usize),

    /// Expected length not representable in a short APDU
    #[error("Invalid expected length: {0}")]
    InvalidExpectedLength(ExpectedLength),
}

impl CommandError {
    /// Create a data too long error
    pub const fn data_too_long(actual: usize, max: usize) -> Self {
        Self::DataTooLong(actual, max)
    }
}
