//! APDU response definitions
//!
//! Responses are always fully buffered: the data bytes followed by the
//! two status bytes.

pub mod error;
pub mod status;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use error::{ResponseError, StatusError};
use status::StatusWord;

/// Basic APDU response structure
#[derive(Clone, PartialEq, Eq)]
pub struct Response {
    /// Response data, without the status word
    data: Bytes,
    /// Status word
    status: StatusWord,
}

impl Response {
    /// Create a new response with data and status
    pub fn new(data: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            data: data.into(),
            status: status.into(),
        }
    }

    /// Create a success response
    pub fn success(data: impl Into<Bytes>) -> Self {
        Self::new(data, status::common::SUCCESS)
    }

    /// Create a response carrying only a status word
    pub fn status_only(status: impl Into<StatusWord>) -> Self {
        Self::new(Bytes::new(), status)
    }

    /// Parse response from raw bytes (including status word)
    pub fn from_bytes(raw: &Bytes) -> Result<Self, ResponseError> {
        let len = raw.len();
        if len < 2 {
            return Err(ResponseError::Incomplete(len));
        }

        let status = StatusWord::new(raw[len - 2], raw[len - 1]);
        let data = raw.slice(..len - 2);

        trace!(
            sw = %status,
            data_len = data.len(),
            "Parsed APDU response"
        );

        Ok(Self { data, status })
    }

    /// Response data without the status word
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Response data as shared bytes
    pub const fn data_bytes(&self) -> &Bytes {
        &self.data
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Status word as a u16 (SW1 << 8 | SW2)
    pub const fn sw(&self) -> u16 {
        self.status.to_u16()
    }

    /// Check if the response indicates success
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Total encoded length, data plus status word
    pub fn len(&self) -> usize {
        self.data.len() + 2
    }

    /// A response always carries a status word
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Encode back into raw bytes (data followed by SW1 SW2)
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        buf.put_slice(&self.data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }

    /// Convert to the data bytes, failing on a non-success status word
    pub fn into_result(self) -> Result<Bytes, StatusError> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(StatusError::new(self.status.sw1, self.status.sw2))
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("data", &hex::encode(&self.data))
            .field("status", &self.status)
            .finish()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.to_bytes()))
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = ResponseError;

    fn try_from(data: &[u8]) -> Result<Self, ResponseError> {
        Self::from_bytes(&Bytes::copy_from_slice(data))
    }
}

impl TryFrom<Bytes> for Response {
    type Error = ResponseError;

    fn try_from(data: Bytes) -> Result<Self, ResponseError> {
        Self::from_bytes(&data)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}
