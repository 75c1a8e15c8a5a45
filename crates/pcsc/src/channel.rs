//! PC/SC card channel

use std::ffi::CString;
use std::fmt;

use bytes::Bytes;
use pcsc::{Attribute, Card, Context, Disposition};
use rcard_apdu_core::{Atr, CardChannel, Command, Error, Protocol, Response, Result};
use tracing::{debug, trace};

use crate::{config::PcscConfig, error::PcscError};

/// Card channel talking to a card in a PC/SC reader
pub struct PcscChannel {
    /// PC/SC context
    context: Context,
    /// Card connection, if established
    card: Option<Card>,
    /// Reader name
    reader_name: String,
    /// Configuration
    config: PcscConfig,
    /// Whether the channel was closed
    closed: bool,
}

impl fmt::Debug for PcscChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscChannel")
            .field("reader_name", &self.reader_name)
            .field("has_card", &self.card.is_some())
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish()
    }
}

impl PcscChannel {
    /// Connect to the card in the given reader
    pub(crate) fn connect(
        context: Context,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<Self, PcscError> {
        let mut channel = Self {
            context,
            card: None,
            reader_name: reader_name.to_string(),
            config,
            closed: false,
        };
        channel.connect_card()?;
        Ok(channel)
    }

    fn connect_card(&mut self) -> Result<&Card, PcscError> {
        if self.card.is_none() {
            let reader = CString::new(self.reader_name.as_str())
                .map_err(|_| PcscError::ReaderNotFound(self.reader_name.clone()))?;

            let card = self
                .context
                .connect(&reader, self.config.share_mode.into(), self.config.protocols)
                .map_err(|e| match e {
                    pcsc::Error::NoSmartcard => PcscError::NoCard(self.reader_name.clone()),
                    pcsc::Error::UnknownReader => {
                        PcscError::ReaderNotFound(self.reader_name.clone())
                    }
                    other => PcscError::from_pcsc(other),
                })?;
            debug!(reader = %self.reader_name, "Connected to card");
            self.card = Some(card);
        }

        self.card
            .as_ref()
            .ok_or_else(|| PcscError::NoCard(self.reader_name.clone()))
    }

    fn card(&mut self) -> Result<&Card> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(self.connect_card()?)
    }

    /// Get the reader name
    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Check if the channel is connected to a card
    pub const fn has_card(&self) -> bool {
        self.card.is_some()
    }
}

impl CardChannel for PcscChannel {
    fn do_transmit(&mut self, command: &Command) -> Result<Response> {
        let card = self.card()?;
        let mut buffer = [0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];

        let raw = match card.transmit(&command.to_bytes(), &mut buffer) {
            Ok(raw) => Bytes::copy_from_slice(raw),
            Err(e) => {
                let error = PcscError::from_pcsc(e);
                // A reset or removed card invalidates the handle
                if matches!(error, PcscError::CardReset | PcscError::CardRemoved) {
                    self.card = None;
                }
                return Err(Error::Transmit(error.into_transport()));
            }
        };
        trace!(len = raw.len(), "PC/SC response");

        Ok(Response::from_bytes(&raw)?)
    }

    fn atr(&mut self) -> Result<Atr> {
        let atr = self
            .card()?
            .get_attribute_owned(Attribute::AtrString)
            .map_err(PcscError::from_pcsc)?;
        Ok(Atr::new(atr))
    }

    fn protocol(&mut self) -> Result<Option<Protocol>> {
        let status = self
            .card()?
            .status2_owned()
            .map_err(PcscError::from_pcsc)?;
        Ok(match status.protocol2() {
            Some(pcsc::Protocol::T0) => Some(Protocol::T0),
            Some(pcsc::Protocol::T1) => Some(Protocol::T1),
            _ => None,
        })
    }

    fn disconnect(&mut self, reset: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(card) = self.card.take() {
            let disposition = if reset {
                Disposition::ResetCard
            } else {
                Disposition::LeaveCard
            };
            card.disconnect(disposition)
                .map_err(|(_, e)| PcscError::from_pcsc(e))?;
            debug!(reader = %self.reader_name, reset, "Disconnected from card");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.disconnect(false)
    }
}

impl Drop for PcscChannel {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
