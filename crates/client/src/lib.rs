//! Connection dispatcher for heterogeneous card backends
//!
//! [`CardManager`] is the single entry point: give it a [`RunConfig`] naming a
//! [`CardType`] and it returns a normalized channel to a physical reader, an
//! in-process simulator, a remote service or a vsmartcard virtual card.
//!
//! # Examples
//!
//! ```
//! use rcard_apdu_core::Command;
//! use rcard_client::{CardManager, CardType, RunConfig};
//! use rcard_client::simulator::{Applet, AppletSimulator};
//! use rcard_apdu_core::Response;
//!
//! #[derive(Debug)]
//! struct Hello;
//!
//! impl Applet for Hello {
//!     fn process(&mut self, _command: &Command) -> Response {
//!         Response::success(b"hello".to_vec())
//!     }
//! }
//!
//! # fn main() -> Result<(), rcard_client::Error> {
//! let config = RunConfig::new()
//!     .with_card_type(CardType::LocalSimulator)
//!     .with_aid(vec![0xF0, 0x00, 0x00, 0x00, 0x01]);
//!
//! let mut manager = CardManager::default()
//!     .with_simulator(Box::new(AppletSimulator::new().with_applet(Hello)));
//! assert!(manager.connect(&config)?);
//!
//! let response = manager.transmit(&Command::new(0x80, 0x01, 0x00, 0x00))?;
//! assert_eq!(response.data(), b"hello");
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod card_type;
mod config;
mod error;
mod manager;
mod remote;
pub mod simulator;

pub use card_type::CardType;
pub use config::RunConfig;
pub use error::{Error, Result};
pub use manager::{CardManager, ConnectionState, ManagedChannel};
pub use remote::RemoteConnector;
pub use simulator::{Applet, AppletSimulator, Simulator};
