//! vsmartcard socket transport
//!
//! Implements the VPCD/VICC protocol used by the vsmartcard project to emulate
//! a smart card reader over TCP:
//!
//! - [`VpcdProto`]: the length-prefixed frame codec
//! - [`VirtualCardChannel`]: a [`CardChannel`](rcard_apdu_core::CardChannel)
//!   whose card is a remote virtual card (reader side)
//! - [`VirtualCard`]: serves any channel to a remote reader (card side)
//!
//! # Examples
//!
//! ```no_run
//! use rcard_apdu_core::{CardChannel, Command};
//! use rcard_transport_vsmartcard::{VirtualCardChannel, VirtualCardConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VirtualCardConfig::connector("127.0.0.1", 35963);
//! let mut channel = VirtualCardChannel::new(config);
//!
//! let response = channel.transmit(&Command::select_aid(vec![0xA0, 0x00, 0x00, 0x00, 0x03]))?;
//! println!("SW: {}", response.status());
//! channel.close()?;
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod cancel;
mod card;
mod channel;
mod config;
mod net;
pub mod proto;

pub use cancel::CancelToken;
pub use card::{SW_NO_PRECISE_DIAGNOSIS, VirtualCard};
pub use channel::VirtualCardChannel;
pub use config::{DEFAULT_PORT, VirtualCardConfig};
pub use proto::{ControlCode, Incoming, VpcdProto};
