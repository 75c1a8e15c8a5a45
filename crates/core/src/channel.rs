//! Card channel abstraction
//!
//! A channel is the one capability every backend exposes: exchange APDUs,
//! report the card identity and release the card. Physical readers,
//! in-process simulators and remote virtual cards all implement
//! [`CardChannel`], so callers never branch on where the card lives.

use std::fmt;

use bytes::Bytes;
use derive_more::Deref;
use tracing::{debug, instrument, trace};

use crate::command::Command;
use crate::error::Result;
use crate::response::Response;

/// Answer To Reset, the identification bytes a card sends at power-up
#[derive(Clone, PartialEq, Eq, Hash, Deref)]
pub struct Atr(Bytes);

impl Atr {
    /// Wrap raw ATR bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Raw ATR bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into the underlying bytes
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for Atr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Atr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atr({})", hex::encode_upper(&self.0))
    }
}

impl fmt::Display for Atr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(&self.0))
    }
}

/// Transmission protocol negotiated with the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Protocol {
    /// Character oriented T=0
    #[display("T=0")]
    T0,
    /// Block oriented T=1
    #[display("T=1")]
    T1,
    /// Contactless
    #[display("T=CL")]
    Contactless,
}

/// Trait for card channels
///
/// Lifecycle is unconnected, connected, closed. A closed channel cannot be
/// reused; implementations answer every call after close with
/// [`Error::Closed`](crate::Error::Closed).
///
/// Channels are driven by one logical session at a time. There is no internal
/// locking: APDU exchange is half-duplex and callers sharing a channel must
/// serialize access themselves.
pub trait CardChannel: fmt::Debug + Send {
    /// Transmit a command APDU and return the card's response
    #[instrument(level = "trace", skip_all, fields(channel = std::any::type_name::<Self>()))]
    fn transmit(&mut self, command: &Command) -> Result<Response> {
        trace!(command = %command, "Transmitting command");
        let result = self.do_transmit(command);
        match &result {
            Ok(response) => trace!(response = %response, "Received response"),
            Err(e) => debug!(error = %e, "Error during transmission"),
        }
        result
    }

    /// Backend specific implementation of [`CardChannel::transmit`]
    fn do_transmit(&mut self, command: &Command) -> Result<Response>;

    /// Answer To Reset of the card behind this channel
    fn atr(&mut self) -> Result<Atr>;

    /// Transmission protocol in use, if the backend knows it
    fn protocol(&mut self) -> Result<Option<Protocol>> {
        Ok(None)
    }

    /// Logical channel number
    fn channel_number(&self) -> u8 {
        0
    }

    /// Request exclusive access to the card
    fn begin_exclusive(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release exclusive access to the card
    fn end_exclusive(&mut self) -> Result<()> {
        Ok(())
    }

    /// Disconnect from the card, optionally resetting it
    fn disconnect(&mut self, reset: bool) -> Result<()> {
        let _ = reset;
        self.close()
    }

    /// Close the channel. Closing twice is not an error.
    fn close(&mut self) -> Result<()>;

    /// Whether this channel already normalizes APDUs
    fn is_wrapped(&self) -> bool {
        false
    }

    /// Card identity view routed through this channel
    fn card(&mut self) -> Card<'_, Self>
    where
        Self: Sized,
    {
        Card::new(self)
    }
}

impl<C: CardChannel + ?Sized> CardChannel for Box<C> {
    fn transmit(&mut self, command: &Command) -> Result<Response> {
        (**self).transmit(command)
    }

    fn do_transmit(&mut self, command: &Command) -> Result<Response> {
        (**self).do_transmit(command)
    }

    fn atr(&mut self) -> Result<Atr> {
        (**self).atr()
    }

    fn protocol(&mut self) -> Result<Option<Protocol>> {
        (**self).protocol()
    }

    fn channel_number(&self) -> u8 {
        (**self).channel_number()
    }

    fn begin_exclusive(&mut self) -> Result<()> {
        (**self).begin_exclusive()
    }

    fn end_exclusive(&mut self) -> Result<()> {
        (**self).end_exclusive()
    }

    fn disconnect(&mut self, reset: bool) -> Result<()> {
        (**self).disconnect(reset)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_wrapped(&self) -> bool {
        (**self).is_wrapped()
    }
}

/// Card identity bound to a channel
///
/// Holds a non-owning reference back to the channel, so identity queries and
/// the "basic channel" it hands out go through the same object (and the same
/// normalization) as regular transmits.
#[derive(Debug)]
pub struct Card<'a, C: CardChannel + ?Sized> {
    channel: &'a mut C,
}

impl<'a, C: CardChannel + ?Sized> Card<'a, C> {
    /// Create a card view over a channel
    pub const fn new(channel: &'a mut C) -> Self {
        Self { channel }
    }

    /// Answer To Reset
    pub fn atr(&mut self) -> Result<Atr> {
        self.channel.atr()
    }

    /// Transmission protocol
    pub fn protocol(&mut self) -> Result<Option<Protocol>> {
        self.channel.protocol()
    }

    /// The basic channel, which is the channel this view was created from
    pub fn basic_channel(&mut self) -> &mut C {
        self.channel
    }

    /// Logical channels are not multiplexed; this is the basic channel
    pub fn open_logical_channel(&mut self) -> Result<&mut C> {
        Ok(self.channel)
    }

    /// Request exclusive access
    pub fn begin_exclusive(&mut self) -> Result<()> {
        self.channel.begin_exclusive()
    }

    /// Release exclusive access
    pub fn end_exclusive(&mut self) -> Result<()> {
        self.channel.end_exclusive()
    }

    /// Disconnect the card
    pub fn disconnect(self, reset: bool) -> Result<()> {
        self.channel.disconnect(reset)
    }
}

#[cfg(test)]
pub(crate) use mock::MockChannel;

#[cfg(test)]
mod mock {
    use super::*;
    use crate::Error;
    use crate::transport::TransportError;

    /// Mock channel for testing
    #[derive(Debug, Default)]
    pub(crate) struct MockChannel {
        /// Responses to return, the last one repeats
        pub(crate) responses: Vec<Response>,
        /// Commands that were sent
        pub(crate) commands: Vec<Command>,
        /// Fail every transmit
        pub(crate) fail: bool,
        /// Number of close calls
        pub(crate) closed: usize,
    }

    impl MockChannel {
        /// Create a mock channel that always answers 90 00
        pub(crate) fn with_success() -> Self {
            Self {
                responses: vec![Response::success(Bytes::new())],
                ..Default::default()
            }
        }

        /// Create a mock channel that fails every transmit
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    impl CardChannel for MockChannel {
        fn do_transmit(&mut self, command: &Command) -> Result<Response> {
            self.commands.push(command.clone());
            if self.fail {
                return Err(Error::Transmit(TransportError::Timeout));
            }
            if self.responses.len() > 1 {
                Ok(self.responses.remove(0))
            } else {
                self.responses.first().cloned().ok_or(Error::NotConnected)
            }
        }

        fn atr(&mut self) -> Result<Atr> {
            Ok(Atr::new(Bytes::from_static(&[0x3B, 0x80, 0x80, 0x01, 0x01])))
        }

        fn protocol(&mut self) -> Result<Option<Protocol>> {
            Ok(Some(Protocol::T1))
        }

        fn close(&mut self) -> Result<()> {
            self.closed += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_view_routes_to_channel() {
        let mut channel = MockChannel::with_success();
        let mut card = channel.card();

        assert_eq!(card.atr().unwrap().to_string(), "3B80800101");
        assert_eq!(card.protocol().unwrap(), Some(Protocol::T1));

        let response = card
            .basic_channel()
            .transmit(&Command::new(0x00, 0xB0, 0x00, 0x00))
            .unwrap();
        assert!(response.is_success());
        card.disconnect(true).unwrap();

        assert_eq!(channel.commands.len(), 1);
        assert_eq!(channel.closed, 1);
    }

    #[test]
    fn test_boxed_channel_forwards() {
        let mut channel: Box<dyn CardChannel> = Box::new(MockChannel::with_success());
        assert!(!channel.is_wrapped());
        assert_eq!(channel.channel_number(), 0);
        assert!(channel.transmit(&Command::new(0x00, 0xCA, 0x00, 0x00)).is_ok());

        let mut card = Card::new(&mut *channel);
        assert_eq!(card.atr().unwrap().as_bytes(), &[0x3B, 0x80, 0x80, 0x01, 0x01]);
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(Protocol::T0.to_string(), "T=0");
        assert_eq!(Protocol::Contactless.to_string(), "T=CL");
    }
}
