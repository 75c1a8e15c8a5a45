//! Backend kinds the dispatcher can connect to

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Where the card lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CardType {
    /// Card in a reader, selected by name or index
    #[default]
    Physical,
    /// Card in a reader, selected by index only
    PhysicalDirect,
    /// Network simulator exposing reader terminals
    LegacySimulator,
    /// In-process applet simulator
    LocalSimulator,
    /// Remote simulator; reserved, not supported
    RemoteSimulator,
    /// Remote card behind an injected connector
    Remote,
    /// Virtual card over the vsmartcard socket protocol
    VirtualCard,
}

impl CardType {
    /// Every kind, in declaration order
    pub const ALL: [Self; 7] = [
        Self::Physical,
        Self::PhysicalDirect,
        Self::LegacySimulator,
        Self::LocalSimulator,
        Self::RemoteSimulator,
        Self::Remote,
        Self::VirtualCard,
    ];

    /// Stable name used in configuration and on the command line
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::PhysicalDirect => "physical-direct",
            Self::LegacySimulator => "legacy-sim",
            Self::LocalSimulator => "local-sim",
            Self::RemoteSimulator => "remote-sim",
            Self::Remote => "remote",
            Self::VirtualCard => "vsmartcard",
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or(Error::Config("unknown card type"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for kind in CardType::ALL {
            assert_eq!(kind.to_string().parse::<CardType>().unwrap(), kind);
        }
        assert_eq!("VSmartCard".parse::<CardType>().unwrap(), CardType::VirtualCard);
        assert!("jcardsim".parse::<CardType>().is_err());
    }
}
