//! Socket role establishment shared by both ends of the protocol

use std::io::ErrorKind;
use std::net::{Ipv4Addr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use rcard_apdu_core::TransportError;
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::config::VirtualCardConfig;

/// How often a pending accept checks its deadline and cancel token
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bind the listening socket on all interfaces
pub(crate) fn bind(port: u16) -> Result<TcpListener, TransportError> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
    debug!(addr = ?listener.local_addr().ok(), "Listening for vsmartcard peer");
    Ok(listener)
}

/// Accept exactly one peer, honouring the deadline and the cancel token
pub(crate) fn accept_one(
    listener: &TcpListener,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<TcpStream, TransportError> {
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    listener.set_nonblocking(true)?;

    let result = loop {
        if cancel.is_cancelled() {
            break Err(TransportError::Cancelled);
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "Accepted vsmartcard peer");
                break Ok(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    break Err(TransportError::Timeout);
                }
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => break Err(TransportError::Io(e)),
        }
    };

    listener.set_nonblocking(false)?;
    let stream = result?;
    stream.set_nonblocking(false)?;
    Ok(stream)
}

/// Dial `host:port`, trying every resolved address in turn
pub(crate) fn dial(
    host: &str,
    port: u16,
    timeout: Option<Duration>,
    cancel: &CancelToken,
) -> Result<TcpStream, TransportError> {
    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connection(format!("cannot resolve {host}:{port}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        trace!(%addr, "Dialing vsmartcard peer");
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                debug!(%addr, "Connected to vsmartcard peer");
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(match last_error {
        Some(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
            TransportError::Timeout
        }
        Some(e) => TransportError::Connection(format!("{host}:{port}: {e}")),
        None => TransportError::Connection(format!("{host}:{port}: no address resolved")),
    })
}

/// Establish the stream for the configured role
///
/// A listener bound earlier (see [`VirtualCardChannel::bind`](crate::VirtualCardChannel::bind))
/// is reused; otherwise the listener role binds `config.port` first.
pub(crate) fn establish(
    config: &VirtualCardConfig,
    listener: &mut Option<TcpListener>,
    cancel: &CancelToken,
) -> Result<TcpStream, TransportError> {
    let stream = match config.host() {
        Some(host) => dial(host, config.port, config.connect_timeout, cancel)?,
        None => {
            let bound = match listener.take() {
                Some(bound) => bound,
                None => bind(config.port)?,
            };
            let accepted = accept_one(&bound, config.connect_timeout, cancel);
            *listener = Some(bound);
            accepted?
        }
    };

    stream.set_read_timeout(config.read_timeout)?;
    stream.set_nodelay(true)?;
    if !config.settle_delay.is_zero() {
        thread::sleep(config.settle_delay);
    }
    Ok(stream)
}
