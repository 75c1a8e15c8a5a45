//! Error types for the PC/SC backend

use rcard_apdu_core::{Error, TransportError};

/// PC/SC-specific errors
#[derive(Debug, thiserror::Error)]
pub enum PcscError {
    /// PC/SC error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No readers available
    #[error("No readers available")]
    NoReadersAvailable,

    /// Reader not found
    #[error("Reader not found: {0}")]
    ReaderNotFound(String),

    /// No card present in reader
    #[error("No card present in reader: {0}")]
    NoCard(String),

    /// Card was reset
    #[error("Card was reset")]
    CardReset,

    /// Card was removed
    #[error("Card was removed")]
    CardRemoved,
}

impl PcscError {
    /// Map a driver error, naming reset and removal explicitly
    pub(crate) fn from_pcsc(error: pcsc::Error) -> Self {
        match error {
            pcsc::Error::ResetCard => Self::CardReset,
            pcsc::Error::RemovedCard => Self::CardRemoved,
            pcsc::Error::NoReadersAvailable => Self::NoReadersAvailable,
            other => Self::Pcsc(other),
        }
    }

    /// Transport error equivalent
    pub fn into_transport(self) -> TransportError {
        match self {
            Self::Pcsc(pcsc::Error::Timeout) => TransportError::Timeout,
            Self::Pcsc(pcsc::Error::Cancelled) => TransportError::Cancelled,
            other => TransportError::Device(other.to_string()),
        }
    }
}

impl From<PcscError> for Error {
    fn from(error: PcscError) -> Self {
        Self::Transport(error.into_transport())
    }
}
