//! PC/SC backend for rcard card channels
//!
//! This crate implements [`CardChannel`](rcard_apdu_core::CardChannel) for cards
//! in PC/SC readers and exposes the readers as a
//! [`TerminalSource`](rcard_apdu_core::TerminalSource).
//!
//! # Examples
//!
//! ```no_run
//! use rcard_apdu_core::{CardChannel, Command};
//! use rcard_transport_pcsc::PcscDeviceManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = PcscDeviceManager::new()?;
//!
//! let readers = manager.list_readers()?;
//! let Some(reader) = readers.iter().find(|reader| reader.has_card()) else {
//!     println!("No card found");
//!     return Ok(());
//! };
//!
//! let mut channel = manager.open_reader(reader.name())?;
//! let response = channel.transmit(&Command::select_aid(vec![0xA0, 0x00, 0x00, 0x00, 0x03]))?;
//! println!("Response: {response}");
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![warn(missing_docs)]

mod channel;
mod config;
mod error;
mod manager;
mod reader;

pub use channel::PcscChannel;
pub use config::{PcscConfig, ShareMode};
pub use error::PcscError;
pub use manager::PcscDeviceManager;
pub use reader::PcscReader;

// Re-export some pcsc types for convenience
pub use pcsc::Protocols;
