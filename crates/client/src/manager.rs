//! Connection dispatcher
//!
//! [`CardManager`] turns a [`RunConfig`] into a ready channel: it builds the
//! concrete backend for the configured [`CardType`], wraps it in a
//! [`WrappingChannel`] and optionally selects the configured application.
//!
//! There is no reconnect logic. A failed transmit clears the connected flag and
//! the caller has to call [`CardManager::connect`] again.

use std::time::Duration;

use bytes::Bytes;
use rcard_apdu_core::{
    Atr, CardChannel, Command, ExpectedLength, NormalizeOptions, Protocol, Response,
    TerminalInfo, TerminalSource, WrappingChannel,
};
use rcard_transport_vsmartcard::{VirtualCardChannel, VirtualCardConfig};
use tracing::{debug, info, instrument, warn};

use crate::card_type::CardType;
use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::remote::RemoteConnector;
use crate::simulator::Simulator;

/// Normalized channel handed out by the dispatcher
pub type ManagedChannel = WrappingChannel<Box<dyn CardChannel>>;

/// Dispatcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing attempted yet
    #[default]
    Idle,
    /// A connect is in progress
    Connecting,
    /// A channel is ready
    Connected,
    /// The last connect or transmit failed
    Failed,
    /// The channel was torn down
    Disconnected,
}

/// Builds and owns the card channel for one session
#[derive(Debug)]
pub struct CardManager {
    state: ConnectionState,
    channel: Option<ManagedChannel>,
    aid: Option<Bytes>,
    options: NormalizeOptions,
    do_select: bool,
    select_response: Option<Response>,
    last_card_type: Option<CardType>,
    terminals: Option<Box<dyn TerminalSource>>,
    legacy_terminals: Option<Box<dyn TerminalSource>>,
    simulator: Option<Box<dyn Simulator>>,
    remote: Option<Box<dyn RemoteConnector>>,
}

impl Default for CardManager {
    fn default() -> Self {
        Self::new(false, None)
    }
}

impl CardManager {
    /// Create a dispatcher, optionally with debug logging and a fixed AID
    ///
    /// An AID given here wins over [`RunConfig::aid`].
    pub fn new(debug: bool, aid: Option<Bytes>) -> Self {
        Self {
            state: ConnectionState::Idle,
            channel: None,
            aid,
            options: NormalizeOptions::default().with_debug(debug),
            do_select: true,
            select_response: None,
            last_card_type: None,
            terminals: None,
            legacy_terminals: None,
            simulator: None,
            remote: None,
        }
    }

    /// Terminal source used by the physical kinds
    pub fn with_terminal_source(mut self, source: Box<dyn TerminalSource>) -> Self {
        self.terminals = Some(source);
        self
    }

    /// Terminal source of the legacy network simulator
    pub fn with_legacy_simulator(mut self, source: Box<dyn TerminalSource>) -> Self {
        self.legacy_terminals = Some(source);
        self
    }

    /// Simulator used by the next local-simulator connect
    pub fn with_simulator(mut self, simulator: Box<dyn Simulator>) -> Self {
        self.simulator = Some(simulator);
        self
    }

    /// Connector used by the remote kind
    pub fn with_remote_connector(mut self, connector: Box<dyn RemoteConnector>) -> Self {
        self.remote = Some(connector);
        self
    }

    /// Normalization settings applied to every channel
    pub const fn with_options(mut self, options: NormalizeOptions) -> Self {
        self.options = options;
        self
    }

    /// Connect to the card source described by `config`
    ///
    /// Returns whether a channel now exists. A missing card on the legacy
    /// simulator is not an error and yields `false`.
    #[instrument(level = "debug", skip_all, fields(card_type = %config.card_type))]
    pub fn connect(&mut self, config: &RunConfig) -> Result<bool> {
        if self.aid.is_none() {
            self.aid.clone_from(&config.aid);
        }
        if config.remote_disconnect_previous && self.channel.is_some() {
            debug!("Tearing down the previous session");
            if let Err(e) = self.disconnect(true) {
                warn!(error = %e, "Failed to tear down the previous session");
            }
        }

        self.state = ConnectionState::Connecting;
        self.select_response = None;

        match self.open(config) {
            Ok(connected) => {
                self.last_card_type = Some(config.card_type);
                self.state = if connected {
                    ConnectionState::Connected
                } else {
                    ConnectionState::Failed
                };
                if connected {
                    info!(card_type = %config.card_type, "Card connected");
                }
                Ok(connected)
            }
            Err(e) => {
                warn!(error = %e, "Connect failed");
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    fn open(&mut self, config: &RunConfig) -> Result<bool> {
        let do_select = self.do_select && config.do_select;

        let channel = match config.card_type {
            CardType::Physical => Some(self.physical_channel(config, true)?),
            CardType::PhysicalDirect => Some(self.physical_channel(config, false)?),
            CardType::LegacySimulator => self.legacy_channel(config)?,
            CardType::LocalSimulator => return self.local_simulator(config, do_select),
            CardType::RemoteSimulator => {
                return Err(Error::UnsupportedCardType(CardType::RemoteSimulator));
            }
            CardType::Remote => {
                let connector = self
                    .remote
                    .as_ref()
                    .ok_or(Error::Config("remote card type requires a remote connector"))?;
                Some(connector.connect(config)?)
            }
            CardType::VirtualCard => Some(Box::new(VirtualCardChannel::new(
                VirtualCardConfig::from(config),
            )) as Box<dyn CardChannel>),
        };

        let Some(channel) = channel else {
            self.channel = None;
            return Ok(false);
        };
        self.set_channel(channel)?;
        if do_select {
            self.maybe_select()?;
        }
        Ok(true)
    }

    fn physical_channel(
        &self,
        config: &RunConfig,
        by_name: bool,
    ) -> Result<Box<dyn CardChannel>> {
        debug!("Looking for physical cards");
        match &self.terminals {
            Some(source) => connect_terminal(source.as_ref(), config, by_name),
            None => default_terminals(config, by_name),
        }
    }

    fn legacy_channel(&self, config: &RunConfig) -> Result<Option<Box<dyn CardChannel>>> {
        debug!("Looking for simulator terminals");
        let source = self
            .legacy_terminals
            .as_ref()
            .ok_or(Error::Config("legacy simulator requires a terminal source"))?;

        let terminals = source.terminals()?;
        if !terminals.iter().any(|terminal| terminal.card_present) {
            warn!("No simulator terminal reports a card");
            return Ok(None);
        }
        debug!(count = terminals.len(), "Simulator terminals found");

        let index = config.target_reader_index;
        let terminal = terminals
            .get(index)
            .ok_or(Error::NoTerminalFound { index })?;
        Ok(Some(source.connect(&terminal.name)?))
    }

    fn local_simulator(&mut self, config: &RunConfig, do_select: bool) -> Result<bool> {
        let aid = self
            .aid
            .clone()
            .ok_or(Error::Config("local simulator requires an application identifier"))?;
        let mut simulator = self
            .simulator
            .take()
            .ok_or(Error::Config("local simulator requires a simulator"))?;

        let install_data = config.install_data.clone().unwrap_or_default();
        simulator.install(&aid, &install_data)?;
        if do_select {
            let response = simulator.select(&aid)?;
            debug!(sw = %response.status(), "Simulator select");
            self.select_response = Some(response);
        }

        self.set_channel(simulator.into_channel())?;
        Ok(true)
    }

    /// Adopt an existing channel
    ///
    /// Fails with a configuration error when the channel is already normalized.
    pub fn connect_channel(&mut self, channel: Box<dyn CardChannel>) -> Result<()> {
        self.set_channel(channel)?;
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Use a prepared simulator whose applets are already installed
    pub fn connect_simulator(&mut self, simulator: Box<dyn Simulator>) -> Result<()> {
        self.set_channel(simulator.into_channel())?;
        self.last_card_type = Some(CardType::LocalSimulator);
        self.state = ConnectionState::Connected;
        if self.do_select {
            self.maybe_select()?;
        }
        Ok(())
    }

    fn set_channel(&mut self, channel: Box<dyn CardChannel>) -> Result<()> {
        let channel = WrappingChannel::with_options(channel, self.options)?;
        self.channel = Some(channel);
        Ok(())
    }

    fn maybe_select(&mut self) -> Result<()> {
        if self.aid.is_some() {
            debug!("Selecting applet");
            let response = self.select_applet()?;
            self.select_response = Some(response);
        }
        Ok(())
    }

    /// Send SELECT for the configured AID
    pub fn select_applet(&mut self) -> Result<Response> {
        let aid = self
            .aid
            .clone()
            .ok_or(Error::Config("no application identifier configured"))?;
        self.send(&Command::select_aid(aid))
    }

    /// Transmit a command over the current channel
    ///
    /// Any failure clears the connected flag.
    pub fn transmit(&mut self, command: &Command) -> Result<Response> {
        if self.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        self.send(command)
    }

    fn send(&mut self, command: &Command) -> Result<Response> {
        let channel = self.channel.as_mut().ok_or(Error::NotConnected)?;
        match channel.transmit(command) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e.into())
            }
        }
    }

    /// Tear down the current channel
    ///
    /// The connected flag is cleared whether or not the teardown succeeds.
    pub fn disconnect(&mut self, reset: bool) -> Result<()> {
        let result = match self.channel.take() {
            Some(mut channel) => channel.card().disconnect(reset),
            None => Ok(()),
        };
        self.state = ConnectionState::Disconnected;
        Ok(result?)
    }

    /// Hand the channel over to the caller, leaving the dispatcher disconnected
    pub fn take_channel(&mut self) -> Option<ManagedChannel> {
        self.state = ConnectionState::Disconnected;
        self.channel.take()
    }

    /// Re-read the ATR, which power-cycles virtual cards
    pub fn reset(&mut self) -> Result<Atr> {
        self.atr()
    }

    /// ATR of the connected card
    pub fn atr(&mut self) -> Result<Atr> {
        Ok(self.channel_mut()?.card().atr()?)
    }

    /// Protocol of the connected card
    pub fn protocol(&mut self) -> Result<Option<Protocol>> {
        Ok(self.channel_mut()?.card().protocol()?)
    }

    /// Current lifecycle state
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a usable channel exists
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The normalized channel
    pub const fn channel(&self) -> Option<&ManagedChannel> {
        self.channel.as_ref()
    }

    /// The normalized channel, mutably
    pub fn channel_mut(&mut self) -> Result<&mut ManagedChannel> {
        self.channel.as_mut().ok_or(Error::NotConnected)
    }

    /// Answer to the automatic SELECT
    pub const fn select_response(&self) -> Option<&Response> {
        self.select_response.as_ref()
    }

    /// Kind used by the last connect
    pub const fn last_card_type(&self) -> Option<CardType> {
        self.last_card_type
    }

    /// Last command handed to the backend, after normalization
    pub fn last_command(&self) -> Option<&Command> {
        self.channel.as_ref().and_then(WrappingChannel::last_command)
    }

    /// Duration of the last transmit
    pub fn last_transmit_duration(&self) -> Option<Duration> {
        self.channel
            .as_ref()
            .map(WrappingChannel::last_transmit_duration)
    }

    /// Configured AID
    pub fn aid(&self) -> Option<&[u8]> {
        self.aid.as_deref()
    }

    /// Replace the AID
    pub fn set_aid(&mut self, aid: Option<Bytes>) -> &mut Self {
        self.aid = aid;
        self
    }

    /// Current normalization settings
    pub const fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    /// Whether connect selects the AID
    pub const fn do_select(&self) -> bool {
        self.do_select
    }

    /// Enable or disable the automatic SELECT
    pub const fn set_do_select(&mut self, do_select: bool) -> &mut Self {
        self.do_select = do_select;
        self
    }

    /// Enable or disable debug logging, also on the live channel
    pub fn set_debug(&mut self, debug: bool) -> &mut Self {
        self.options.debug = debug;
        self.sync_options()
    }

    /// Enable or disable the Lc fix-up, also on the live channel
    pub fn set_fix_lc(&mut self, fix_lc: bool) -> &mut Self {
        self.options.fix_lc = fix_lc;
        self.sync_options()
    }

    /// Enable or disable the Ne fix-up, also on the live channel
    pub fn set_fix_ne(&mut self, fix_ne: Option<bool>) -> &mut Self {
        self.options.fix_ne = fix_ne;
        self.sync_options()
    }

    /// Set the forced Ne, also on the live channel
    pub fn set_default_ne(&mut self, default_ne: Option<ExpectedLength>) -> &mut Self {
        self.options.default_ne = default_ne;
        self.sync_options()
    }

    fn sync_options(&mut self) -> &mut Self {
        if let Some(channel) = self.channel.as_mut() {
            channel.set_options(self.options);
        }
        self
    }
}

/// Pick a terminal and connect to it
///
/// With `by_name` and a configured reader name the first reader whose name
/// contains it (ignoring case) is used. Otherwise the terminal at the
/// configured index is used, provided it holds a card.
fn connect_terminal(
    source: &dyn TerminalSource,
    config: &RunConfig,
    by_name: bool,
) -> Result<Box<dyn CardChannel>> {
    let terminals = source.terminals()?;
    let name = select_terminal(&terminals, config, by_name)?;
    debug!(reader = %name, "Connecting to terminal");
    Ok(source.connect(name)?)
}

fn select_terminal<'a>(
    terminals: &'a [TerminalInfo],
    config: &RunConfig,
    by_name: bool,
) -> Result<&'a str> {
    if let Some(wanted) = config.reader_name.as_deref().filter(|_| by_name) {
        let needle = wanted.to_lowercase();
        return terminals
            .iter()
            .find(|terminal| terminal.name.to_lowercase().contains(&needle))
            .map(|terminal| terminal.name.as_str())
            .ok_or_else(|| Error::ReaderNotFound(wanted.to_string()));
    }

    let index = config.target_reader_index;
    terminals
        .get(index)
        .filter(|terminal| terminal.card_present)
        .map(|terminal| terminal.name.as_str())
        .ok_or(Error::NoTerminalFound { index })
}

#[cfg(feature = "pcsc")]
fn default_terminals(config: &RunConfig, by_name: bool) -> Result<Box<dyn CardChannel>> {
    let manager = rcard_transport_pcsc::PcscDeviceManager::new()?;
    connect_terminal(&manager, config, by_name)
}

#[cfg(not(feature = "pcsc"))]
fn default_terminals(_config: &RunConfig, _by_name: bool) -> Result<Box<dyn CardChannel>> {
    Err(Error::Config(
        "physical card types require a terminal source or the `pcsc` feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terminals() -> Vec<TerminalInfo> {
        vec![
            TerminalInfo::new("Gemalto PC Twin Reader 00 00", false),
            TerminalInfo::new("ACS ACR1252 Dual Reader 01 00", true),
        ]
    }

    #[test]
    fn test_select_terminal_by_index_requires_card() {
        let terminals = terminals();
        let config = RunConfig::new().with_target_reader_index(1);
        assert_eq!(
            select_terminal(&terminals, &config, true).unwrap(),
            "ACS ACR1252 Dual Reader 01 00"
        );

        let config = RunConfig::new();
        assert!(matches!(
            select_terminal(&terminals, &config, true),
            Err(Error::NoTerminalFound { index: 0 })
        ));

        let config = RunConfig::new().with_target_reader_index(5);
        assert!(matches!(
            select_terminal(&terminals, &config, true),
            Err(Error::NoTerminalFound { index: 5 })
        ));
    }

    #[test]
    fn test_select_terminal_by_name() {
        let terminals = terminals();
        let config = RunConfig::new()
            .with_reader_name("gemalto")
            .with_target_reader_index(1);
        assert_eq!(
            select_terminal(&terminals, &config, true).unwrap(),
            "Gemalto PC Twin Reader 00 00"
        );
        // The direct kind ignores the name
        assert_eq!(
            select_terminal(&terminals, &config, false).unwrap(),
            "ACS ACR1252 Dual Reader 01 00"
        );

        let config = RunConfig::new().with_reader_name("yubikey");
        assert!(matches!(
            select_terminal(&terminals, &config, true),
            Err(Error::ReaderNotFound(_))
        ));
    }
}
