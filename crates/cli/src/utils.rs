use std::fmt;
use std::str::FromStr;

use colored::Colorize;
use rcard_apdu_core::{Bytes, Response};

/// Byte string given on the command line in hex
///
/// Spaces and colons are ignored, so `00 A4 04 00` and `00:A4:04:00` both parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexBytes(Vec<u8>);

impl HexBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0.into()
    }
}

impl FromStr for HexBytes {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        hex::decode(cleaned).map(Self)
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(&self.0))
    }
}

/// Render a response with its status word colored by outcome
pub fn format_response(response: &Response) -> String {
    let data = hex::encode_upper(response.data());
    let status = response.status();
    let sw = format!("{status} ({})", status.description());
    let sw = if status.is_success() {
        sw.green()
    } else {
        sw.red()
    };
    if data.is_empty() {
        sw.to_string()
    } else {
        format!("{data} {sw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_bytes_parsing() {
        let bytes: HexBytes = "00 a4:04 00".parse().unwrap();
        assert_eq!(bytes.as_slice(), &[0x00, 0xA4, 0x04, 0x00]);
        assert_eq!(bytes.to_string(), "00A40400");
        assert!("0G".parse::<HexBytes>().is_err());
        assert!("ABC".parse::<HexBytes>().is_err());
    }
}
