//! Configuration for the vsmartcard socket transport

use std::time::Duration;

use crate::proto::DEFAULT_MAX_RESPONSE_LEN;

/// Default vsmartcard port
pub const DEFAULT_PORT: u16 = 35963;

/// Socket role and timing for a [`VirtualCardChannel`](crate::VirtualCardChannel)
/// or a [`VirtualCard`](crate::VirtualCard)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualCardConfig {
    /// Peer host; `None` or empty selects the listener role
    pub remote_address: Option<String>,
    /// Port to bind (listener) or dial (connector)
    pub port: u16,
    /// Deadline for accepting or establishing the connection
    pub connect_timeout: Option<Duration>,
    /// Read deadline for every frame read
    pub read_timeout: Option<Duration>,
    /// Pause after the connection is up, before the first frame is sent
    pub settle_delay: Duration,
    /// Largest response frame accepted
    pub max_response_len: usize,
}

impl Default for VirtualCardConfig {
    fn default() -> Self {
        Self {
            remote_address: None,
            port: DEFAULT_PORT,
            connect_timeout: None,
            read_timeout: None,
            settle_delay: Duration::ZERO,
            max_response_len: DEFAULT_MAX_RESPONSE_LEN,
        }
    }
}

impl VirtualCardConfig {
    /// Listener role on `port`; port 0 picks a free port
    pub fn listener(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Connector role dialing `host:port`
    pub fn connector(host: impl Into<String>, port: u16) -> Self {
        Self {
            remote_address: Some(host.into()),
            port,
            ..Self::default()
        }
    }

    /// Set the peer host
    pub fn with_remote_address(mut self, remote_address: Option<String>) -> Self {
        self.remote_address = remote_address;
        self
    }

    /// Set the port
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connect/accept deadline
    pub const fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the frame read deadline
    pub const fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the pause after connecting
    pub const fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the response size limit
    pub const fn with_max_response_len(mut self, max: usize) -> Self {
        self.max_response_len = max;
        self
    }

    /// Peer host when the connector role is configured
    pub fn host(&self) -> Option<&str> {
        self.remote_address
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
    }

    /// Whether this side binds and waits for the peer
    pub fn is_listener(&self) -> bool {
        self.host().is_none()
    }
}
