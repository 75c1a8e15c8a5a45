//! Terminal enumeration
//!
//! A terminal is a reader slot a card may sit in. PC/SC readers and
//! reader-emulating simulators both enumerate terminals; the client selects one
//! by index or by name and asks the source to connect to it.

use crate::channel::CardChannel;
use crate::error::Result;

/// A reader slot as reported by a [`TerminalSource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInfo {
    /// Reader name
    pub name: String,
    /// Whether a card is inserted
    pub card_present: bool,
}

impl TerminalInfo {
    /// Create terminal info
    pub fn new(name: impl Into<String>, card_present: bool) -> Self {
        Self {
            name: name.into(),
            card_present,
        }
    }
}

/// Source of terminals and their card channels
pub trait TerminalSource: std::fmt::Debug + Send {
    /// List all terminals, with or without a card
    fn terminals(&self) -> Result<Vec<TerminalInfo>>;

    /// Connect to the card in the named terminal
    fn connect(&self, name: &str) -> Result<Box<dyn CardChannel>>;
}
