//! Normalizing channel decorator
//!
//! [`WrappingChannel`] sits in front of every concrete backend and applies the
//! APDU fix-ups some readers and card firmware need, so a caller sees the same
//! behaviour whether the card is physical, simulated or remote:
//!
//! - a command without data is sent as `CLA INS P1 P2 00` (explicit zero Lc),
//! - a command with data gets its Ne forced to a configured default.
//!
//! The two fix-ups are mutually exclusive: the Lc rewrite only fires for
//! commands without data, the Ne rewrite only for commands with data.
//!
//! Settings and the last-call bookkeeping are plain fields behind `&mut self`;
//! they are not meant to be mutated from several threads without a lock.

use std::env;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use crate::channel::{Atr, CardChannel, Protocol};
use crate::command::{Command, ExpectedLength, MAX_EXPECTED_LEN};
use crate::error::{Error, Result};
use crate::response::Response;

/// Environment variable consulted by [`NormalizeDefaults::from_env`] for the Ne toggle
pub const FIX_NE_ENV: &str = "RCARD_FIX_NE";

/// Environment variable consulted by [`NormalizeDefaults::from_env`] for the Ne value
pub const DEFAULT_NE_ENV: &str = "RCARD_DEFAULT_NE";

/// Deployment-wide fallbacks used when [`NormalizeOptions`] leaves a setting unset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeDefaults {
    /// Apply the Ne fix-up when the channel does not say otherwise
    pub fix_ne: bool,
    /// Ne value used by the fix-up when the channel does not set one
    pub default_ne: ExpectedLength,
}

impl Default for NormalizeDefaults {
    fn default() -> Self {
        Self {
            fix_ne: false,
            default_ne: 255,
        }
    }
}

impl NormalizeDefaults {
    /// Read the defaults from [`FIX_NE_ENV`] and [`DEFAULT_NE_ENV`]
    ///
    /// Unset or unparsable variables keep the built-in default, as does an Ne
    /// outside `1..=256`.
    pub fn from_env() -> Self {
        let mut defaults = Self::default();
        if let Ok(value) = env::var(FIX_NE_ENV) {
            defaults.fix_ne = value.trim().eq_ignore_ascii_case("true") || value.trim() == "1";
        }
        if let Some(ne) = env::var(DEFAULT_NE_ENV)
            .ok()
            .and_then(|value| value.trim().parse::<ExpectedLength>().ok())
            .filter(|ne| (1..=MAX_EXPECTED_LEN).contains(ne))
        {
            defaults.default_ne = ne;
        }
        defaults
    }
}

/// APDU normalization settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Send commands without data as header plus an explicit zero Lc
    pub fix_lc: bool,
    /// Force Ne on commands with data; `None` defers to [`NormalizeDefaults::fix_ne`]
    pub fix_ne: Option<bool>,
    /// Ne to force; `None` defers to [`NormalizeDefaults::default_ne`]
    pub default_ne: Option<ExpectedLength>,
    /// Log every request, response and timing at info level
    pub debug: bool,
    /// Fallbacks for unset settings
    pub defaults: NormalizeDefaults,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            fix_lc: true,
            fix_ne: None,
            default_ne: None,
            debug: false,
            defaults: NormalizeDefaults::default(),
        }
    }
}

impl NormalizeOptions {
    /// Create the default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Lc fix-up
    pub const fn with_fix_lc(mut self, fix_lc: bool) -> Self {
        self.fix_lc = fix_lc;
        self
    }

    /// Set the Ne fix-up
    pub const fn with_fix_ne(mut self, fix_ne: Option<bool>) -> Self {
        self.fix_ne = fix_ne;
        self
    }

    /// Set the Ne used by the fix-up
    pub const fn with_default_ne(mut self, default_ne: Option<ExpectedLength>) -> Self {
        self.default_ne = default_ne;
        self
    }

    /// Set debug logging
    pub const fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set the deployment defaults
    pub const fn with_defaults(mut self, defaults: NormalizeDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Whether the Ne fix-up is active after applying defaults
    pub fn effective_fix_ne(&self) -> bool {
        self.fix_ne.unwrap_or(self.defaults.fix_ne)
    }

    /// Ne forced by the fix-up after applying defaults
    pub fn effective_default_ne(&self) -> ExpectedLength {
        self.default_ne.unwrap_or(self.defaults.default_ne)
    }
}

/// Channel decorator applying APDU normalization, timing and debug logging
#[derive(Debug)]
pub struct WrappingChannel<C: CardChannel> {
    inner: C,
    options: NormalizeOptions,
    last_command: Option<Command>,
    last_transmit: Duration,
}

impl<C: CardChannel> WrappingChannel<C> {
    /// Wrap a channel with default options
    ///
    /// Fails with [`Error::DoubleWrap`] when `inner` is already a normalizing
    /// channel, before any I/O happens.
    pub fn new(inner: C) -> Result<Self> {
        Self::with_options(inner, NormalizeOptions::default())
    }

    /// Wrap a channel with the given options
    pub fn with_options(inner: C, options: NormalizeOptions) -> Result<Self> {
        if inner.is_wrapped() {
            return Err(Error::DoubleWrap);
        }
        Ok(Self {
            inner,
            options,
            last_command: None,
            last_transmit: Duration::ZERO,
        })
    }

    /// Current options
    pub const fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    /// Replace the options; they apply from the next transmit on
    pub const fn set_options(&mut self, options: NormalizeOptions) {
        self.options = options;
    }

    /// Set the Lc fix-up
    pub const fn set_fix_lc(&mut self, fix_lc: bool) {
        self.options.fix_lc = fix_lc;
    }

    /// Set the Ne fix-up
    pub const fn set_fix_ne(&mut self, fix_ne: Option<bool>) {
        self.options.fix_ne = fix_ne;
    }

    /// Set the Ne used by the fix-up
    pub const fn set_default_ne(&mut self, default_ne: Option<ExpectedLength>) {
        self.options.default_ne = default_ne;
    }

    /// Set debug logging
    pub const fn set_debug(&mut self, debug: bool) {
        self.options.debug = debug;
    }

    /// The last command handed to the wrapped channel, after normalization
    pub const fn last_command(&self) -> Option<&Command> {
        self.last_command.as_ref()
    }

    /// Wall-clock time of the last transmit, measured also when it failed
    pub const fn last_transmit_duration(&self) -> Duration {
        self.last_transmit
    }

    /// The wrapped channel
    pub const fn inner(&self) -> &C {
        &self.inner
    }

    /// The wrapped channel, mutably
    pub const fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// Unwrap the channel
    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Apply the configured fix-ups to a command
    pub fn normalize(&self, command: &Command) -> Command {
        if !command.has_data() {
            if self.options.fix_lc {
                return Command {
                    data: Some(Bytes::new()),
                    le: None,
                    ..Command::new(command.cla, command.ins, command.p1, command.p2)
                };
            }
            return command.clone();
        }

        if !self.options.effective_fix_ne() {
            return command.clone();
        }

        let ne = self.options.effective_default_ne();
        debug!(ne, "Fixed Ne for the APDU");
        command.clone().with_le(ne)
    }

    /// Transmit from and into raw buffers
    ///
    /// Copies through the [`Command`]/[`Response`] path; returns the number of
    /// bytes written into `response`.
    pub fn transmit_buffer(&mut self, command: &[u8], response: &mut [u8]) -> Result<usize> {
        let command = Command::from_bytes(command)?;
        let bytes = self.transmit(&command)?.to_bytes();
        if bytes.len() > response.len() {
            return Err(Error::BufferTooSmall {
                needed: bytes.len(),
                available: response.len(),
            });
        }
        response[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
}

impl<C: CardChannel> CardChannel for WrappingChannel<C> {
    fn do_transmit(&mut self, command: &Command) -> Result<Response> {
        let command = self.normalize(command);
        command.check_lengths()?;

        if self.options.debug {
            info!(command = %command, "--> APDU");
        }

        let started = Instant::now();
        let result = self.inner.transmit(&command);
        self.last_transmit = started.elapsed();
        self.last_command = Some(command);

        if self.options.debug {
            let elapsed_ms = self.last_transmit.as_millis() as u64;
            match &result {
                Ok(response) => info!(
                    response = %response,
                    sw = %response.status(),
                    elapsed_ms,
                    "<-- APDU"
                ),
                Err(e) => info!(error = %e, elapsed_ms, "<-- APDU failed"),
            }
        }

        result
    }

    fn atr(&mut self) -> Result<Atr> {
        self.inner.atr()
    }

    fn protocol(&mut self) -> Result<Option<Protocol>> {
        self.inner.protocol()
    }

    fn channel_number(&self) -> u8 {
        self.inner.channel_number()
    }

    fn begin_exclusive(&mut self) -> Result<()> {
        self.inner.begin_exclusive()
    }

    fn end_exclusive(&mut self) -> Result<()> {
        self.inner.end_exclusive()
    }

    fn disconnect(&mut self, reset: bool) -> Result<()> {
        self.inner.disconnect(reset)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn is_wrapped(&self) -> bool {
        true
    }
}
