//! In-process card simulation
//!
//! [`Simulator`] is what the local-simulator backend needs: install an
//! application, select it and hand out a channel. [`AppletSimulator`] is the
//! built-in implementation hosting [`Applet`] objects keyed by AID.

use std::fmt::Debug;

use bytes::Bytes;
use rcard_apdu_core::response::status::common::{
    CONDITIONS_NOT_SATISFIED, FILE_NOT_FOUND, SUCCESS,
};
use rcard_apdu_core::{Atr, CardChannel, Command, Error as CardError, Protocol, Response};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// ATR reported by [`AppletSimulator`] unless configured otherwise
pub const DEFAULT_SIMULATOR_ATR: [u8; 11] = [
    0x3B, 0xFA, 0x18, 0x00, 0x00, 0x81, 0x31, 0xFE, 0x45, 0x4A, 0x43,
];

/// Card simulator consumed by the local-simulator backend
pub trait Simulator: Debug + Send {
    /// Install the simulated application under `aid`
    fn install(&mut self, aid: &[u8], install_data: &[u8]) -> Result<()>;

    /// Select the application, returning the card's answer
    fn select(&mut self, aid: &[u8]) -> Result<Response>;

    /// Turn the simulator into a channel
    fn into_channel(self: Box<Self>) -> Box<dyn CardChannel>;
}

/// Application hosted by [`AppletSimulator`]
pub trait Applet: Debug + Send {
    /// Called once with the install parameters
    fn install(&mut self, install_data: &[u8]) -> Result<()> {
        let _ = install_data;
        Ok(())
    }

    /// Called when the applet becomes selected; the answer goes back to the reader
    fn select(&mut self) -> Response {
        Response::status_only(SUCCESS)
    }

    /// Called when another applet gets selected
    fn deselect(&mut self) {}

    /// Process a command while selected
    fn process(&mut self, command: &Command) -> Response;
}

/// Simulator routing APDUs to installed applets
#[derive(Debug)]
pub struct AppletSimulator {
    atr: Atr,
    applets: Vec<(Bytes, Box<dyn Applet>)>,
    pending: Option<Box<dyn Applet>>,
    selected: Option<usize>,
    closed: bool,
}

impl Default for AppletSimulator {
    fn default() -> Self {
        Self {
            atr: Atr::new(Bytes::from_static(&DEFAULT_SIMULATOR_ATR)),
            applets: Vec::new(),
            pending: None,
            selected: None,
            closed: false,
        }
    }
}

impl AppletSimulator {
    /// Create an empty simulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a different ATR
    pub fn with_atr(mut self, atr: impl Into<Bytes>) -> Self {
        self.atr = Atr::new(atr);
        self
    }

    /// Applet installed by the next [`Simulator::install`]
    pub fn with_applet(mut self, applet: impl Applet + 'static) -> Self {
        self.pending = Some(Box::new(applet));
        self
    }

    /// Install an applet directly
    pub fn install_applet(
        &mut self,
        aid: impl Into<Bytes>,
        mut applet: Box<dyn Applet>,
        install_data: &[u8],
    ) -> Result<()> {
        let aid = aid.into();
        if aid.is_empty() || aid.len() > 16 {
            return Err(Error::Simulator(format!("invalid AID length {}", aid.len())));
        }
        applet.install(install_data)?;
        debug!(aid = %hex::encode_upper(&aid), "Installed applet");

        if let Some(index) = self.position(&aid) {
            if self.selected == Some(index) {
                self.selected = None;
            }
            self.applets[index].1 = applet;
        } else {
            self.applets.push((aid, applet));
        }
        Ok(())
    }

    /// AID of the selected applet
    pub fn selected_aid(&self) -> Option<&[u8]> {
        self.selected.map(|index| self.applets[index].0.as_ref())
    }

    fn position(&self, aid: &[u8]) -> Option<usize> {
        self.applets
            .iter()
            .position(|(installed, _)| installed.as_ref() == aid)
    }

    fn select_aid(&mut self, aid: &[u8]) -> Response {
        let Some(index) = self.position(aid) else {
            trace!(aid = %hex::encode_upper(aid), "SELECT for unknown applet");
            return Response::status_only(FILE_NOT_FOUND);
        };

        if let Some(previous) = self.selected.take() {
            self.applets[previous].1.deselect();
        }
        self.selected = Some(index);
        self.applets[index].1.select()
    }

    fn dispatch(&mut self, command: &Command) -> Response {
        if is_select_by_aid(command) {
            return self.select_aid(command.data());
        }
        match self.selected {
            Some(index) => self.applets[index].1.process(command),
            None => Response::status_only(CONDITIONS_NOT_SATISFIED),
        }
    }
}

const fn is_select_by_aid(command: &Command) -> bool {
    command.cla & 0x80 == 0 && command.ins == 0xA4 && command.p1 == 0x04
}

impl Simulator for AppletSimulator {
    fn install(&mut self, aid: &[u8], install_data: &[u8]) -> Result<()> {
        let applet = self
            .pending
            .take()
            .ok_or_else(|| Error::Simulator("no applet to install".into()))?;
        self.install_applet(Bytes::copy_from_slice(aid), applet, install_data)
    }

    fn select(&mut self, aid: &[u8]) -> Result<Response> {
        Ok(self.select_aid(aid))
    }

    fn into_channel(self: Box<Self>) -> Box<dyn CardChannel> {
        self
    }
}

impl CardChannel for AppletSimulator {
    fn do_transmit(&mut self, command: &Command) -> rcard_apdu_core::Result<Response> {
        if self.closed {
            return Err(CardError::Closed);
        }
        Ok(self.dispatch(command))
    }

    fn atr(&mut self) -> rcard_apdu_core::Result<Atr> {
        if self.closed {
            return Err(CardError::Closed);
        }
        Ok(self.atr.clone())
    }

    fn protocol(&mut self) -> rcard_apdu_core::Result<Option<Protocol>> {
        Ok(Some(Protocol::T1))
    }

    fn disconnect(&mut self, reset: bool) -> rcard_apdu_core::Result<()> {
        if reset {
            if let Some(index) = self.selected.take() {
                self.applets[index].1.deselect();
            }
        }
        self.closed = true;
        Ok(())
    }

    fn close(&mut self) -> rcard_apdu_core::Result<()> {
        self.disconnect(false)
    }
}
