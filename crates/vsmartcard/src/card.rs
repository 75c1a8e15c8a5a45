//! Card-side serving loop (the VICC role)
//!
//! [`VirtualCard`] exposes any [`CardChannel`] to a VPCD, so a reader on
//! another machine sees the card as if it were inserted locally.

use std::fmt;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use rcard_apdu_core::{CardChannel, Command, Error, Response, Result, StatusWord, TransportError};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::config::VirtualCardConfig;
use crate::net;
use crate::proto::{ControlCode, HEADER_SIZE, Incoming, VpcdProto};

/// Status answered when the backing channel cannot process an APDU
pub const SW_NO_PRECISE_DIAGNOSIS: StatusWord = StatusWord::new(0x6F, 0x00);

/// Serves a card channel to a remote reader
pub struct VirtualCard<C: CardChannel> {
    channel: C,
    config: VirtualCardConfig,
    cancel: CancelToken,
    listener: Option<TcpListener>,
    served: usize,
}

impl<C: CardChannel> fmt::Debug for VirtualCard<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualCard")
            .field("channel", &self.channel)
            .field("config", &self.config)
            .field("served", &self.served)
            .finish_non_exhaustive()
    }
}

impl<C: CardChannel> VirtualCard<C> {
    /// Serve `channel` using the role described by `config`
    pub fn new(channel: C, config: VirtualCardConfig) -> Self {
        Self {
            channel,
            config,
            cancel: CancelToken::new(),
            listener: None,
            served: 0,
        }
    }

    /// Use an external token to stop the loop
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token stopping the loop
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Number of APDUs answered so far
    pub const fn served(&self) -> usize {
        self.served
    }

    /// The served channel
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    /// Stop serving and hand back the channel
    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Bind the listening socket early and report its address (listener role)
    pub fn bind(&mut self) -> Result<SocketAddr> {
        if !self.config.is_listener() {
            return Err(Error::Unsupported("bind on a connecting virtual card"));
        }
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => net::bind(self.config.port)?,
        };
        let addr = listener.local_addr().map_err(TransportError::from);
        self.listener = Some(listener);
        Ok(addr?)
    }

    /// Connect to (or accept) the reader and serve until it goes away
    #[instrument(level = "debug", skip(self), fields(port = self.config.port))]
    pub fn run(&mut self) -> Result<()> {
        let stream = net::establish(&self.config, &mut self.listener, &self.cancel)?;
        let reader = stream.try_clone().map_err(TransportError::from)?;
        let mut proto: VpcdProto<TcpStream, TcpStream> =
            VpcdProto::new(reader, stream).with_max_response_len(self.config.max_response_len);
        info!("Virtual card attached to reader");
        self.serve(&mut proto)
    }

    /// Answer frames from `proto` until the peer closes or the token fires
    ///
    /// POWER_ON and RESET refresh the card, GET_ATR returns its ATR and data
    /// frames are transmitted to the channel. POWER_OFF and unknown codes are
    /// ignored. A read deadline hit between frames only wakes the loop to check
    /// the cancel token; a peer that stalls or hangs up inside a frame ends the
    /// loop with an error.
    pub fn serve<R: Read, W: Write>(&mut self, proto: &mut VpcdProto<R, W>) -> Result<()> {
        loop {
            if self.cancel.is_cancelled() {
                info!("Virtual card cancelled");
                return Ok(());
            }

            let incoming = match proto.read_command() {
                Ok(incoming) => incoming,
                Err(TransportError::ConnectionClosed {
                    expected: HEADER_SIZE,
                    received: 0,
                }) => {
                    info!(served = self.served, "Reader closed the connection");
                    return Ok(());
                }
                Err(TransportError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            };

            match incoming {
                Incoming::Control(ControlCode::PowerOn | ControlCode::Reset) => {
                    let atr = self.channel.atr()?;
                    debug!(%atr, "Card powered");
                }
                Incoming::Control(ControlCode::GetAtr) => {
                    let atr = self.channel.atr()?;
                    proto.write_data(&atr)?;
                }
                Incoming::Control(ControlCode::PowerOff) => debug!("Ignoring POWER_OFF"),
                Incoming::Control(code @ ControlCode::Other(_)) => {
                    warn!(%code, "Ignoring unknown command")
                }
                Incoming::Data(_) => {
                    let apdu = proto.read_data()?;
                    let response = self.answer(&apdu);
                    proto.write_data(&response.to_bytes())?;
                    self.served += 1;
                }
            }
        }
    }

    fn answer(&mut self, apdu: &[u8]) -> Response {
        let result = Command::from_bytes(apdu)
            .map_err(Error::from)
            .and_then(|command| self.channel.transmit(&command));
        result.unwrap_or_else(|e| {
            warn!(error = %e, apdu = %hex::encode_upper(apdu), "APDU failed");
            Response::status_only(SW_NO_PRECISE_DIAGNOSIS)
        })
    }
}
