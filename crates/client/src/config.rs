//! Run configuration

use std::time::Duration;

use bytes::Bytes;
use rcard_transport_vsmartcard::{DEFAULT_PORT, VirtualCardConfig};

use crate::card_type::CardType;

/// Settings for one connection session
///
/// Read once by [`CardManager::connect`](crate::CardManager::connect); changing
/// it afterwards does not affect a live channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Index of the reader terminal for reader based kinds
    pub target_reader_index: usize,
    /// Reader name override for [`CardType::Physical`] (case-insensitive substring)
    pub reader_name: Option<String>,
    /// Application identifier to select after connecting
    pub aid: Option<Bytes>,
    /// Install parameters for the local simulator
    pub install_data: Option<Bytes>,
    /// Remote host; empty makes the vsmartcard channel listen
    pub remote_address: Option<String>,
    /// vsmartcard port
    pub remote_vicc_port: u16,
    /// Tear down the previous session before connecting
    pub remote_disconnect_previous: bool,
    /// Backend kind
    pub card_type: CardType,
    /// Kind of the card behind a remote endpoint
    pub remote_card_type: CardType,
    /// Select [`RunConfig::aid`] after connecting
    pub do_select: bool,
    /// How many times callers should repeat their workload
    pub num_repeats: u32,
    /// Deadline for socket connect and accept
    pub connect_timeout: Option<Duration>,
    /// Deadline for socket reads
    pub read_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_reader_index: 0,
            reader_name: None,
            aid: None,
            install_data: None,
            remote_address: None,
            remote_vicc_port: DEFAULT_PORT,
            remote_disconnect_previous: false,
            card_type: CardType::Physical,
            remote_card_type: CardType::Physical,
            do_select: true,
            num_repeats: 1,
            connect_timeout: None,
            read_timeout: None,
        }
    }
}

impl RunConfig {
    /// Create the default configuration (physical card on reader 0)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backend kind
    pub const fn with_card_type(mut self, card_type: CardType) -> Self {
        self.card_type = card_type;
        self
    }

    /// Set the reader index
    pub const fn with_target_reader_index(mut self, index: usize) -> Self {
        self.target_reader_index = index;
        self
    }

    /// Set the reader name override
    pub fn with_reader_name(mut self, name: impl Into<String>) -> Self {
        self.reader_name = Some(name.into());
        self
    }

    /// Set the application identifier
    pub fn with_aid(mut self, aid: impl Into<Bytes>) -> Self {
        self.aid = Some(aid.into());
        self
    }

    /// Set the simulator install parameters
    pub fn with_install_data(mut self, data: impl Into<Bytes>) -> Self {
        self.install_data = Some(data.into());
        self
    }

    /// Set the remote host
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    /// Set the vsmartcard port
    pub const fn with_remote_vicc_port(mut self, port: u16) -> Self {
        self.remote_vicc_port = port;
        self
    }

    /// Set whether the previous session is torn down first
    pub const fn with_remote_disconnect_previous(mut self, disconnect: bool) -> Self {
        self.remote_disconnect_previous = disconnect;
        self
    }

    /// Set the kind of the card behind a remote endpoint
    pub const fn with_remote_card_type(mut self, card_type: CardType) -> Self {
        self.remote_card_type = card_type;
        self
    }

    /// Set automatic selection
    pub const fn with_do_select(mut self, do_select: bool) -> Self {
        self.do_select = do_select;
        self
    }

    /// Set the repeat count
    pub const fn with_num_repeats(mut self, num_repeats: u32) -> Self {
        self.num_repeats = num_repeats;
        self
    }

    /// Set the connect deadline
    pub const fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read deadline
    pub const fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl From<&RunConfig> for VirtualCardConfig {
    fn from(config: &RunConfig) -> Self {
        Self::default()
            .with_remote_address(config.remote_address.clone())
            .with_port(config.remote_vicc_port)
            .with_connect_timeout(config.connect_timeout)
            .with_read_timeout(config.read_timeout)
    }
}
