//! Reader-side channel to a remote virtual card

use std::fmt;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use rcard_apdu_core::{
    Atr, CardChannel, Command, Error, Response, Result, TransportError,
};
use tracing::{debug, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::VirtualCardConfig;
use crate::net;
use crate::proto::{ControlCode, VpcdProto};

type Proto = VpcdProto<TcpStream, TcpStream>;

/// Card channel backed by a vsmartcard socket (the VPCD role)
///
/// Nothing touches the network until the first transmit or ATR request. The
/// configured remote address decides the role: empty means bind and accept a
/// single virtual card, anything else means dial it. A POWER_ON frame opens
/// every session.
///
/// A failed transmit leaves the connection as it is; callers should treat the
/// channel as unusable and close it.
pub struct VirtualCardChannel {
    config: VirtualCardConfig,
    cancel: CancelToken,
    listener: Option<TcpListener>,
    proto: Option<Proto>,
    closed: bool,
}

impl fmt::Debug for VirtualCardChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualCardChannel")
            .field("remote_address", &self.config.remote_address)
            .field("port", &self.config.port)
            .field("connected", &self.proto.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

impl VirtualCardChannel {
    /// Create an unconnected channel
    pub fn new(config: VirtualCardConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
            listener: None,
            proto: None,
            closed: false,
        }
    }

    /// Use an external token to abort a pending accept or dial
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token aborting a pending accept or dial
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Configuration
    pub const fn config(&self) -> &VirtualCardConfig {
        &self.config
    }

    /// Whether the session is established
    pub const fn is_connected(&self) -> bool {
        self.proto.is_some()
    }

    /// Bind the listening socket ahead of the first transmit
    ///
    /// Returns the bound address, which tells the peer where to connect when
    /// the configured port is 0. Only valid for the listener role.
    pub fn bind(&mut self) -> Result<SocketAddr> {
        if self.closed {
            return Err(Error::Closed);
        }
        if !self.config.is_listener() {
            return Err(Error::Unsupported("bind on a connector channel"));
        }
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => net::bind(self.config.port)?,
        };
        let addr = listener.local_addr().map_err(TransportError::from);
        self.listener = Some(listener);
        Ok(addr?)
    }

    /// Establish the session if it is not up yet
    #[instrument(level = "debug", skip(self), fields(port = self.config.port))]
    pub fn connect_if_needed(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.proto.is_some() {
            return Ok(());
        }

        let stream = net::establish(&self.config, &mut self.listener, &self.cancel)?;
        let reader = stream.try_clone().map_err(TransportError::from)?;
        let mut proto = VpcdProto::new(reader, stream)
            .with_max_response_len(self.config.max_response_len);
        proto.write_command(ControlCode::PowerOn)?;

        debug!("Virtual card session established");
        self.proto = Some(proto);
        Ok(())
    }

    fn proto(&mut self) -> Result<&mut Proto> {
        self.connect_if_needed()?;
        self.proto.as_mut().ok_or(Error::NotConnected)
    }
}

impl CardChannel for VirtualCardChannel {
    fn do_transmit(&mut self, command: &Command) -> Result<Response> {
        let proto = self.proto()?;

        let exchange = proto
            .write_data(&command.to_bytes())
            .and_then(|()| proto.read_response());
        let raw = exchange.map_err(|e| {
            warn!(error = %e, "Transmit failed");
            Error::Transmit(e)
        })?;

        Ok(Response::from_bytes(&raw)?)
    }

    fn atr(&mut self) -> Result<Atr> {
        let proto = self.proto()?;
        proto.write_command(ControlCode::GetAtr)?;
        Ok(Atr::new(proto.read_response()?))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(mut proto) = self.proto.take() {
            if let Err(e) = proto.write_command(ControlCode::Reset) {
                debug!(error = %e, "Ignoring failed RESET on close");
            }
            let _ = proto.writer().shutdown(Shutdown::Both);
            debug!("Closed virtual card socket");
        }
        if self.listener.take().is_some() {
            debug!("Closed listening socket");
        }
        Ok(())
    }
}

impl Drop for VirtualCardChannel {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
