//! Framed wire protocol spoken between a VPCD (reader side) and a VICC (card side)
//!
//! Every frame starts with a 2-byte big-endian length `L`. A frame with `L == 1`
//! carries a single command code; any other length announces a data frame of
//! `L` bytes, an APDU towards the card or ATR/response bytes back from it.
//!
//! The length field is the envelope length only; it has nothing to do with the
//! Lc byte inside an APDU.

use std::fmt;
use std::io::{ErrorKind, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use rcard_apdu_core::TransportError;
use tracing::trace;

/// Size of the length prefix
pub const HEADER_SIZE: usize = 2;

/// Default upper bound for a response frame
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 1024 * 1024;

/// Largest payload a 16-bit length prefix can describe
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Command codes carried by 1-byte frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// Remove power from the card
    PowerOff,
    /// Power the card up
    PowerOn,
    /// Warm reset
    Reset,
    /// Ask the card for its ATR
    GetAtr,
    /// Any code this implementation does not know
    Other(u8),
}

impl From<u8> for ControlCode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::PowerOff,
            1 => Self::PowerOn,
            2 => Self::Reset,
            4 => Self::GetAtr,
            other => Self::Other(other),
        }
    }
}

impl From<ControlCode> for u8 {
    fn from(code: ControlCode) -> Self {
        match code {
            ControlCode::PowerOff => 0,
            ControlCode::PowerOn => 1,
            ControlCode::Reset => 2,
            ControlCode::GetAtr => 4,
            ControlCode::Other(other) => other,
        }
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerOff => write!(f, "POWER_OFF"),
            Self::PowerOn => write!(f, "POWER_ON"),
            Self::Reset => write!(f, "RESET"),
            Self::GetAtr => write!(f, "GET_ATR"),
            Self::Other(code) => write!(f, "UNKNOWN({code:#04x})"),
        }
    }
}

/// What [`VpcdProto::read_command`] found on the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming {
    /// A command frame
    Control(ControlCode),
    /// A data frame of this many bytes follows; read it with [`VpcdProto::read_data`]
    Data(usize),
}

/// Frame codec over a pair of byte streams
///
/// Reads loop until the requested byte count arrives. A read returning 0 means
/// the peer went away and is reported as [`TransportError::ConnectionClosed`].
/// A read deadline configured on the underlying stream surfaces as
/// [`TransportError::Timeout`] only while no byte of the next frame has been
/// consumed; once a frame is under way it becomes [`TransportError::Stalled`]
/// and the stream must be dropped. Nothing is retried.
pub struct VpcdProto<R, W> {
    reader: R,
    writer: W,
    pending: Option<usize>,
    max_response_len: usize,
}

impl<R, W> fmt::Debug for VpcdProto<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VpcdProto")
            .field("pending", &self.pending)
            .field("max_response_len", &self.max_response_len)
            .finish_non_exhaustive()
    }
}

impl<R: Read, W: Write> VpcdProto<R, W> {
    /// Create a codec over a reader and a writer
    pub const fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending: None,
            max_response_len: DEFAULT_MAX_RESPONSE_LEN,
        }
    }

    /// Set the largest response frame [`VpcdProto::read_response`] accepts
    pub const fn with_max_response_len(mut self, max: usize) -> Self {
        self.max_response_len = max;
        self
    }

    /// Largest accepted response frame
    pub const fn max_response_len(&self) -> usize {
        self.max_response_len
    }

    /// Length of the data frame announced by the last [`VpcdProto::read_command`]
    pub const fn pending(&self) -> Option<usize> {
        self.pending
    }

    /// Read the next frame header
    ///
    /// A data frame is only announced; its payload stays on the stream until
    /// [`VpcdProto::read_data`] is called.
    pub fn read_command(&mut self) -> Result<Incoming, TransportError> {
        let len = self.read_len()?;
        if len == 1 {
            let mut code = [0u8; 1];
            self.read_rest(&mut code)?;
            let code = ControlCode::from(code[0]);
            trace!(%code, "Received command frame");
            return Ok(Incoming::Control(code));
        }

        trace!(len, "Data frame announced");
        self.pending = Some(len);
        Ok(Incoming::Data(len))
    }

    /// Read the payload of the data frame announced by [`VpcdProto::read_command`]
    pub fn read_data(&mut self) -> Result<Bytes, TransportError> {
        let len = self.pending.ok_or(TransportError::NoPendingFrame)?;
        let data = self.read_payload(len)?;
        self.pending = None;
        Ok(data)
    }

    /// Read a complete data frame sent by the card side
    pub fn read_response(&mut self) -> Result<Bytes, TransportError> {
        let len = self.read_len()?;
        if len > self.max_response_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_response_len,
            });
        }
        self.read_payload(len)
    }

    /// Write a 3-byte command frame
    pub fn write_command(&mut self, code: ControlCode) -> Result<(), TransportError> {
        trace!(%code, "Sending command frame");
        let frame = [0x00, 0x01, u8::from(code)];
        self.write_frame(&frame)
    }

    /// Write a data frame (an APDU, an ATR or a response)
    pub fn write_data(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge {
                len: data.len(),
                max: MAX_FRAME_LEN,
            });
        }

        let mut frame = BytesMut::with_capacity(HEADER_SIZE + data.len());
        frame.put_u16(data.len() as u16);
        frame.put_slice(data);
        trace!(data = %hex::encode_upper(data), "Sending data frame");
        self.write_frame(&frame)
    }

    /// Split the codec back into its streams
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// The underlying writer
    pub const fn writer(&self) -> &W {
        &self.writer
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.writer
            .write_all(frame)
            .and_then(|()| self.writer.flush())
            .map_err(TransportError::from_io)
    }

    fn read_len(&mut self) -> Result<usize, TransportError> {
        let mut header = [0u8; HEADER_SIZE];
        self.read_full(&mut header)?;
        Ok(u16::from_be_bytes(header) as usize)
    }

    fn read_payload(&mut self, len: usize) -> Result<Bytes, TransportError> {
        let mut payload = BytesMut::zeroed(len);
        self.read_rest(&mut payload)?;
        Ok(payload.freeze())
    }

    fn read_full(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let mut received = 0;
        while received < buf.len() {
            match self.reader.read(&mut buf[received..]) {
                Ok(0) => {
                    return Err(TransportError::ConnectionClosed {
                        expected: buf.len(),
                        received,
                    });
                }
                Ok(n) => received += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(match TransportError::from_io(e) {
                        TransportError::Timeout if received > 0 => TransportError::Stalled {
                            expected: buf.len(),
                            received,
                        },
                        other => other,
                    });
                }
            }
        }
        Ok(())
    }

    /// Read bytes belonging to a frame whose header was already consumed
    fn read_rest(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let expected = buf.len();
        self.read_full(buf).map_err(|e| match e {
            TransportError::Timeout => TransportError::Stalled {
                expected,
                received: 0,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use std::io::{self, Cursor};

    /// Reader handing out its data in fixed chunks; an empty chunk is a read
    /// deadline expiring
    struct ChunkedReader {
        chunks: Vec<Vec<u8>>,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.chunks.is_empty() {
                return Ok(0);
            }
            if self.chunks[0].is_empty() {
                self.chunks.remove(0);
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let chunk = &mut self.chunks[0];
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.chunks.remove(0);
            }
            Ok(n)
        }
    }

    fn proto_over(bytes: Vec<u8>) -> VpcdProto<Cursor<Vec<u8>>, Vec<u8>> {
        VpcdProto::new(Cursor::new(bytes), Vec::new())
    }

    fn written(codes: &[ControlCode]) -> Vec<u8> {
        let mut proto = VpcdProto::new(io::empty(), Vec::new());
        for code in codes {
            proto.write_command(*code).unwrap();
        }
        proto.into_inner().1
    }

    #[test]
    fn test_command_frames_round_trip() {
        let codes = [
            ControlCode::PowerOff,
            ControlCode::PowerOn,
            ControlCode::Reset,
            ControlCode::GetAtr,
        ];
        let bytes = written(&codes);
        assert_eq!(bytes, hex!("000100 000101 000102 000104"));

        let mut proto = proto_over(bytes);
        for code in codes {
            assert_eq!(proto.read_command().unwrap(), Incoming::Control(code));
        }
    }

    #[test]
    fn test_data_round_trip() {
        for payload in [vec![], vec![0x90, 0x00], vec![0xAB; 300], vec![0x5A; MAX_FRAME_LEN]] {
            let mut writer = VpcdProto::new(io::empty(), Vec::new());
            writer.write_data(&payload).unwrap();
            let bytes = writer.into_inner().1;
            assert_eq!(bytes.len(), HEADER_SIZE + payload.len());

            // Card side: announced then read
            let mut proto = proto_over(bytes.clone());
            assert_eq!(proto.read_command().unwrap(), Incoming::Data(payload.len()));
            assert_eq!(proto.read_data().unwrap().as_ref(), payload.as_slice());
            assert_eq!(proto.pending(), None);

            // Reader side: one call
            let mut proto = proto_over(bytes);
            assert_eq!(proto.read_response().unwrap().as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn test_read_data_without_pending_frame() {
        let mut proto = proto_over(hex!("00029000").to_vec());
        assert!(matches!(proto.read_data(), Err(TransportError::NoPendingFrame)));
    }

    #[test]
    fn test_partial_reads_are_reassembled() {
        // 2-byte header plus 8 payload bytes, delivered as 3/3/4
        let reader = ChunkedReader {
            chunks: vec![
                hex!("000800").to_vec(),
                hex!("A40400").to_vec(),
                hex!("023F0090").to_vec(),
            ],
        };
        let mut proto = VpcdProto::new(reader, io::sink());
        assert_eq!(proto.read_command().unwrap(), Incoming::Data(8));
        assert_eq!(proto.read_data().unwrap().as_ref(), hex!("00A40400023F0090"));
    }

    #[test]
    fn test_deadline_between_frames_is_retryable() {
        let reader = ChunkedReader {
            chunks: vec![vec![], hex!("000104").to_vec()],
        };
        let mut proto = VpcdProto::new(reader, io::sink());
        assert!(matches!(proto.read_command(), Err(TransportError::Timeout)));
        assert_eq!(
            proto.read_command().unwrap(),
            Incoming::Control(ControlCode::GetAtr)
        );
    }

    #[test]
    fn test_deadline_inside_frame_is_fatal() {
        // Half a header, then silence
        let reader = ChunkedReader {
            chunks: vec![hex!("00").to_vec(), vec![], hex!("0104").to_vec()],
        };
        let mut proto = VpcdProto::new(reader, io::sink());
        assert!(matches!(
            proto.read_command(),
            Err(TransportError::Stalled {
                expected: 2,
                received: 1
            })
        ));

        // Full header, command byte missing
        let reader = ChunkedReader {
            chunks: vec![hex!("0001").to_vec(), vec![]],
        };
        let mut proto = VpcdProto::new(reader, io::sink());
        assert!(matches!(
            proto.read_command(),
            Err(TransportError::Stalled {
                expected: 1,
                received: 0
            })
        ));

        // Announced payload never arrives
        let reader = ChunkedReader {
            chunks: vec![hex!("0004").to_vec(), vec![]],
        };
        let mut proto = VpcdProto::new(reader, io::sink());
        assert_eq!(proto.read_command().unwrap(), Incoming::Data(4));
        assert!(matches!(
            proto.read_data(),
            Err(TransportError::Stalled {
                expected: 4,
                received: 0
            })
        ));
    }

    #[test]
    fn test_response_length_guard() {
        // Only the header is on the stream, so an attempted read of the body
        // would fail with ConnectionClosed rather than FrameTooLarge
        let mut proto = proto_over(hex!("FFFF").to_vec()).with_max_response_len(1024);
        match proto.read_response() {
            Err(TransportError::FrameTooLarge { len, max }) => {
                assert_eq!(len, 0xFFFF);
                assert_eq!(max, 1024);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_short_stream_is_connection_closed() {
        let mut proto = proto_over(hex!("0004 9000").to_vec());
        assert!(matches!(
            proto.read_response(),
            Err(TransportError::ConnectionClosed {
                expected: 4,
                received: 2
            })
        ));

        let mut proto = proto_over(Vec::new());
        assert!(matches!(
            proto.read_command(),
            Err(TransportError::ConnectionClosed { .. })
        ));
    }

    #[test]
    fn test_unknown_code_and_oversized_write() {
        let mut proto = proto_over(hex!("000107").to_vec());
        assert_eq!(
            proto.read_command().unwrap(),
            Incoming::Control(ControlCode::Other(7))
        );
        assert_eq!(ControlCode::Other(7).to_string(), "UNKNOWN(0x07)");

        let mut proto = VpcdProto::new(io::empty(), io::sink());
        assert!(matches!(
            proto.write_data(&vec![0; MAX_FRAME_LEN + 1]),
            Err(TransportError::FrameTooLarge { .. })
        ));
    }
}
