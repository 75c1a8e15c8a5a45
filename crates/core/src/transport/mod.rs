//! Transport level error taxonomy shared by every backend

pub mod error;

pub use error::TransportError;
