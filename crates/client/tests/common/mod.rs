//! Shared fixtures for dispatcher tests

#![allow(dead_code, unreachable_pub)]

use std::sync::{Arc, Mutex};

use rcard_apdu_core::{
    Atr, CardChannel, Command, Error, Response, Result, TerminalInfo, TerminalSource,
    TransportError,
};
use rcard_client::{Applet, RemoteConnector, RunConfig};

/// Commands seen by a [`RecordingCard`], shared with the test
pub type Log = Arc<Mutex<Vec<Command>>>;

/// Card that records every command and answers 90 00, optionally failing
#[derive(Debug, Default)]
pub struct RecordingCard {
    pub log: Log,
    pub fail: bool,
}

impl RecordingCard {
    pub fn new(log: &Log) -> Self {
        Self {
            log: Arc::clone(log),
            fail: false,
        }
    }

    pub fn failing(log: &Log) -> Self {
        Self {
            log: Arc::clone(log),
            fail: true,
        }
    }
}

impl CardChannel for RecordingCard {
    fn do_transmit(&mut self, command: &Command) -> Result<Response> {
        self.log.lock().unwrap().push(command.clone());
        if self.fail {
            return Err(Error::Transmit(TransportError::ConnectionClosed {
                expected: 2,
                received: 0,
            }));
        }
        Ok(Response::success(Vec::new()))
    }

    fn atr(&mut self) -> Result<Atr> {
        Ok(Atr::new(vec![0x3B, 0x00]))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fixed list of terminals backed by [`RecordingCard`]s
#[derive(Debug, Default)]
pub struct FakeTerminals {
    pub terminals: Vec<TerminalInfo>,
    pub log: Log,
    pub connected: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminals {
    pub fn new(terminals: &[(&str, bool)]) -> Self {
        Self {
            terminals: terminals
                .iter()
                .map(|(name, present)| TerminalInfo::new(*name, *present))
                .collect(),
            ..Default::default()
        }
    }
}

impl TerminalSource for FakeTerminals {
    fn terminals(&self) -> Result<Vec<TerminalInfo>> {
        Ok(self.terminals.clone())
    }

    fn connect(&self, name: &str) -> Result<Box<dyn CardChannel>> {
        self.connected.lock().unwrap().push(name.to_string());
        Ok(Box::new(RecordingCard::new(&self.log)))
    }
}

/// Remote connector handing out [`RecordingCard`]s
#[derive(Debug, Default)]
pub struct FakeRemote {
    pub log: Log,
}

impl RemoteConnector for FakeRemote {
    fn connect(&self, _config: &RunConfig) -> rcard_client::Result<Box<dyn CardChannel>> {
        Ok(Box::new(RecordingCard::new(&self.log)))
    }
}

/// Applet answering GET DATA with a fixed value
#[derive(Debug)]
pub struct Fixed(pub Vec<u8>);

impl Applet for Fixed {
    fn process(&mut self, _command: &Command) -> Response {
        Response::success(self.0.clone())
    }
}
