//! Error types for the connection dispatcher

use crate::card_type::CardType;

/// Dispatcher errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(&'static str),

    /// The card type exists but has no implementation
    #[error("Unsupported card type: {0}")]
    UnsupportedCardType(CardType),

    /// No terminal at the configured index holds a card
    #[error("No card terminal found at index {index}")]
    NoTerminalFound {
        /// Configured reader index
        index: usize,
    },

    /// No reader matches the configured name
    #[error("Reader could not be found: {0}")]
    ReaderNotFound(String),

    /// No channel is connected
    #[error("Not connected to a card")]
    NotConnected,

    /// Channel level failure
    #[error(transparent)]
    Card(#[from] rcard_apdu_core::Error),

    /// Simulator failure
    #[error("Simulator error: {0}")]
    Simulator(String),
}

impl Error {
    /// Whether retrying without changing the configuration is pointless
    pub const fn is_config(&self) -> bool {
        match self {
            Self::Config(_) | Self::UnsupportedCardType(_) => true,
            Self::Card(e) => e.is_config(),
            _ => false,
        }
    }
}

#[cfg(feature = "pcsc")]
impl From<rcard_transport_pcsc::PcscError> for Error {
    fn from(error: rcard_transport_pcsc::PcscError) -> Self {
        Self::Card(error.into())
    }
}

/// Result type for dispatcher operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
