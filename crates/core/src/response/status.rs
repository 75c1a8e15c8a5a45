//! Status word definitions for APDU responses

use std::fmt;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if this status word indicates more data is available (61 XX)
    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == 0x61
    }

    /// Get a short description of this status word, used in logs
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, _) => "Warning, state unchanged",
            (0x63, _) => "Warning, state changed",
            (0x67, 0x00) => "Wrong length",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x81) => "Function not supported",
            (0x6A, 0x82) => "File or application not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Common status words
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    /// Wrong length (67 00)
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);

    /// Conditions of use not satisfied (69 85)
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);

    /// File or application not found (6A 82)
    pub const FILE_NOT_FOUND: StatusWord = StatusWord::new(0x6A, 0x82);

    /// Invalid instruction (6D 00)
    pub const INVALID_INSTRUCTION: StatusWord = StatusWord::new(0x6D, 0x00);

    /// Class not supported (6E 00)
    pub const CLASS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6E, 0x00);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_from_to_u16() {
        let sw = StatusWord::from_u16(0x9000);
        assert_eq!(sw.sw1, 0x90);
        assert_eq!(sw.sw2, 0x00);
        assert_eq!(sw.to_u16(), 0x9000);
        assert_eq!(u16::from(StatusWord::new(0x6A, 0x82)), 0x6A82);
    }

    #[test]
    fn test_status_word_display() {
        assert_eq!(StatusWord::new(0x90, 0x00).to_string(), "9000");
        assert_eq!(common::FILE_NOT_FOUND.to_string(), "6A82");
        assert_eq!(
            common::FILE_NOT_FOUND.description(),
            "File or application not found"
        );
    }
}
