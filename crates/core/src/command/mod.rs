//! APDU command definitions
//!
//! This module provides the command APDU type according to ISO/IEC 7816-4,
//! restricted to short (non-extended) length fields.

pub mod error;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

pub use error::CommandError;

/// Expected response length (Ne) type for APDU commands
///
/// Short APDUs carry Ne in a single Le byte, where `0x00` means 256.
pub type ExpectedLength = u16;

/// Maximum number of data bytes in a short command APDU
pub const MAX_DATA_LEN: usize = 255;

/// Maximum expected response length expressible in a short command APDU
pub const MAX_EXPECTED_LEN: ExpectedLength = 256;

/// Generic APDU command structure
///
/// `data: Some(empty)` is distinct from `data: None`: the former is encoded with an
/// explicit zero Lc byte, the latter with no Lc byte at all.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Expected response length Ne (optional)
    pub le: Option<ExpectedLength>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with expected response length (Ne)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: ExpectedLength) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: Some(le),
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Some(data.into()),
            le: None,
        }
    }

    /// Create a new command with both data and expected length
    pub fn new_with_data_and_le<T: Into<Bytes>>(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: T,
        le: ExpectedLength,
    ) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Some(data.into()),
            le: Some(le),
        }
    }

    /// SELECT by application identifier (`00 A4 04 00 Lc AID`)
    pub fn select_aid<T: Into<Bytes>>(aid: T) -> Self {
        Self::new_with_data(0x00, 0xA4, 0x04, 0x00, aid)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: ExpectedLength) -> Self {
        self.le = Some(le);
        self
    }

    /// Header bytes (CLA, INS, P1, P2)
    pub const fn header(&self) -> [u8; 4] {
        [self.cla, self.ins, self.p1, self.p2]
    }

    /// Command data, empty when absent
    pub fn data(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    /// Number of data bytes (Nc)
    pub fn nc(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Whether the command carries at least one data byte
    pub fn has_data(&self) -> bool {
        self.nc() != 0
    }

    /// Check that the command fits the short APDU encoding
    ///
    /// Ne must lie in `1..=256`; an expected length of zero is not expressible.
    pub fn check_lengths(&self) -> Result<(), CommandError> {
        if self.nc() > MAX_DATA_LEN {
            return Err(CommandError::data_too_long(self.nc(), MAX_DATA_LEN));
        }
        if let Some(le) = self.le {
            // 0x00 on the wire already means 256
            if le == 0 || le > MAX_EXPECTED_LEN {
                return Err(CommandError::InvalidExpectedLength(le));
            }
        }
        Ok(())
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        // Header (CLA, INS, P1, P2) is always 4 bytes
        let mut length = 4;
        if let Some(data) = &self.data {
            length += 1 + data.len();
        }
        if self.le.is_some() {
            length += 1;
        }
        length
    }

    /// Convert to raw APDU bytes
    ///
    /// Lengths are truncated to a single byte; call [`Command::check_lengths`] first
    /// when the command comes from an untrusted source.
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.command_length());
        buffer.put_slice(&self.header());

        if let Some(data) = &self.data {
            buffer.put_u8(data.len() as u8);
            buffer.put_slice(data);
        }

        if let Some(le) = self.le {
            // Ne = 256 is encoded as 0x00
            buffer.put_u8((le & 0xFF) as u8);
        }

        buffer.freeze()
    }

    /// Parse a command from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, CommandError> {
        if data.len() < 4 {
            return Err(CommandError::InvalidLength(data.len()));
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);
        let body = &data[4..];

        match body.len() {
            0 => {}
            // Case 2: only Le present
            1 => command.le = Some(decode_le(body[0])),
            _ => {
                let lc = body[0] as usize;
                if lc == 0 {
                    return Err(CommandError::InvalidLength(data.len()));
                }
                let rest = &body[1..];
                if rest.len() == lc {
                    command.data = Some(Bytes::copy_from_slice(rest));
                } else if rest.len() == lc + 1 {
                    command.data = Some(Bytes::copy_from_slice(&rest[..lc]));
                    command.le = Some(decode_le(rest[lc]));
                } else {
                    return Err(CommandError::InvalidLength(data.len()));
                }
            }
        }

        Ok(command)
    }
}

const fn decode_le(byte: u8) -> ExpectedLength {
    if byte == 0 { 256 } else { byte as ExpectedLength }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("header", &hex::encode(self.header()))
            .field("data", &self.data.as_ref().map(hex::encode))
            .field("le", &self.le)
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.to_bytes()))
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = CommandError;

    fn try_from(data: &[u8]) -> Result<Self, CommandError> {
        Self::from_bytes(data)
    }
}

impl From<Command> for Bytes {
    fn from(command: Command) -> Self {
        command.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_command_serialization() {
        let data = Bytes::from_static(&[0xA0, 0x00, 0x00, 0x01, 0x51, 0x00]);
        let cmd = Command::new_with_data_and_le(0x00, 0xA4, 0x04, 0x00, data, 256);
        let bytes = cmd.to_bytes();

        assert_eq!(bytes.as_ref(), hex!("00A4040006A0000001510000"));
    }

    #[test]
    fn test_empty_data_keeps_lc() {
        let cmd = Command::new_with_data(0x80, 0xCA, 0x00, 0x00, Bytes::new());
        assert_eq!(cmd.to_bytes().as_ref(), hex!("80CA000000"));
        assert!(!cmd.has_data());

        let bare = Command::new(0x80, 0xCA, 0x00, 0x00);
        assert_eq!(bare.to_bytes().as_ref(), hex!("80CA0000"));
    }

    #[test]
    fn test_command_length() {
        let cmd1 = Command::new(0x00, 0xB0, 0x00, 0x00);
        assert_eq!(cmd1.command_length(), 4);

        let cmd2 = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0xFF);
        assert_eq!(cmd2.command_length(), 5);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let cmd3 = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, data.clone());
        assert_eq!(cmd3.command_length(), 8);

        let cmd4 = Command::new_with_data_and_le(0x00, 0xD6, 0x00, 0x00, data, 0xFF);
        assert_eq!(cmd4.command_length(), 9);
    }

    #[test]
    fn test_command_from_bytes() {
        // Simple command with no data or Le
        let cmd = Command::from_bytes(&hex!("00A40400")).unwrap();
        assert_eq!(cmd.header(), [0x00, 0xA4, 0x04, 0x00]);
        assert!(cmd.data.is_none());
        assert!(cmd.le.is_none());

        // Data but no Le
        let cmd = Command::from_bytes(&hex!("00A4040003010203")).unwrap();
        assert_eq!(cmd.data(), &[0x01, 0x02, 0x03]);
        assert!(cmd.le.is_none());

        // Data and Le
        let cmd = Command::from_bytes(&hex!("00A4040003010203FF")).unwrap();
        assert_eq!(cmd.data(), &[0x01, 0x02, 0x03]);
        assert_eq!(cmd.le, Some(0xFF));

        // No data but Le
        let cmd = Command::from_bytes(&hex!("00B00000FF")).unwrap();
        assert!(cmd.data.is_none());
        assert_eq!(cmd.le, Some(0xFF));

        // Le = 00 means 256
        let cmd = Command::from_bytes(&hex!("00B0000000")).unwrap();
        assert_eq!(cmd.le, Some(256));
    }

    #[test]
    fn test_command_from_bytes_rejects_bad_lengths() {
        assert!(Command::from_bytes(&hex!("00A404")).is_err());
        assert!(Command::from_bytes(&hex!("00A404000501")).is_err());
        assert!(Command::from_bytes(&hex!("00A40400020102FFFF")).is_err());
    }

    #[test]
    fn test_check_lengths() {
        let cmd = Command::new_with_data(0x00, 0xD6, 0x00, 0x00, vec![0u8; 256]);
        assert!(matches!(
            cmd.check_lengths(),
            Err(CommandError::DataTooLong(256, 255))
        ));
        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 257);
        assert!(cmd.check_lengths().is_err());
        let cmd = Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 0);
        assert_eq!(
            cmd.check_lengths(),
            Err(CommandError::InvalidExpectedLength(0))
        );
        assert!(Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 256).check_lengths().is_ok());
        assert!(Command::select_aid(vec![0xA0; 16]).check_lengths().is_ok());
    }
}
