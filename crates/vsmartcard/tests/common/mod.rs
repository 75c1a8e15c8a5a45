//! Shared helpers for the socket tests

#![allow(dead_code, unreachable_pub)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use rcard_apdu_core::{Atr, CardChannel, Command, Response, Result};

/// ATR reported by [`EchoCard`]
pub const ECHO_ATR: [u8; 5] = [0x3B, 0x80, 0x80, 0x01, 0x01];

/// Deadline keeping a broken test from hanging forever
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Card answering every APDU with its own data and 90 00
#[derive(Debug, Default)]
pub struct EchoCard {
    pub commands: Vec<Command>,
    pub atr_requests: usize,
    pub closed: bool,
}

impl CardChannel for EchoCard {
    fn do_transmit(&mut self, command: &Command) -> Result<Response> {
        self.commands.push(command.clone());
        Ok(Response::success(command.data().to_vec()))
    }

    fn atr(&mut self) -> Result<Atr> {
        self.atr_requests += 1;
        Ok(Atr::new(ECHO_ATR.to_vec()))
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Listener on an ephemeral loopback port
pub fn loopback_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Accept one peer with a read deadline set
pub fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = listener.accept().unwrap();
    stream.set_read_timeout(Some(TEST_TIMEOUT)).unwrap();
    stream
}

/// Read exactly `len` bytes
pub fn read_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).unwrap();
    buf
}

/// Read one frame (length prefix plus payload) as raw bytes
pub fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let header = read_exact(stream, 2);
    let len = u16::from_be_bytes([header[0], header[1]]) as usize;
    read_exact(stream, len)
}

/// Write one data frame
pub fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
    let mut frame = (payload.len() as u16).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).unwrap();
}

/// Reader replaying scripted chunks; `None` is a read deadline expiring
#[derive(Debug, Default)]
pub struct ScriptedReader {
    steps: VecDeque<Option<Vec<u8>>>,
}

impl ScriptedReader {
    pub fn new(steps: impl IntoIterator<Item = Option<Vec<u8>>>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            None => Ok(0),
            Some(None) => Err(io::ErrorKind::WouldBlock.into()),
            Some(Some(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.steps.push_front(Some(chunk.split_off(n)));
                }
                Ok(n)
            }
        }
    }
}
