//! Remote card collaborator

use std::fmt::Debug;

use rcard_apdu_core::CardChannel;

use crate::config::RunConfig;
use crate::error::Result;

/// Builds channels to cards reachable through a remote service
///
/// The transport (HTTP or otherwise) is up to the implementation; the
/// dispatcher only needs an opaque channel back.
pub trait RemoteConnector: Debug + Send {
    /// Open a channel using the remote settings of `config`
    fn connect(&self, config: &RunConfig) -> Result<Box<dyn CardChannel>>;
}
