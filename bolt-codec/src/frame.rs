use std::mem;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::close::{CloseCode, CloseFrame};
use crate::mask::{self, Mask};
use crate::{Error, Opcode, Result};

/// The longest frame header: 2 fixed bytes, an 8 byte length and a 4 byte mask.
const MAX_HEADER_LEN: usize = 14;

/// The most buffer space reserved at once for a payload that has not arrived yet.
const MAX_PAYLOAD_RESERVE: usize = 64 * 1024;

/// Describes the length of the payload data within an individual WebSocket frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataLength {
    /// Holds the length of a payload of 125 bytes or shorter.
    Small(u8),
    /// Holds the length of a payload between 126 and 65535 bytes.
    Medium(u16),
    /// Holds the length of a payload between 65536 and 2^63 bytes.
    Large(u64),
}

impl From<u64> for DataLength {
    fn from(n: u64) -> Self {
        if n <= 125 {
            Self::Small(n as u8)
        } else if n <= 65535 {
            Self::Medium(n as u16)
        } else {
            Self::Large(n)
        }
    }
}

impl TryFrom<DataLength> for u64 {
    type Error = Error;

    fn try_from(len: DataLength) -> Result<Self> {
        match len {
            DataLength::Small(n) => Ok(n as u64),
            DataLength::Medium(n) => {
                if n <= 125 {
                    return Err(Error::malformed(format!(
                        "payload length {} should not be represented using 16 bits",
                        n
                    )));
                }

                Ok(n as u64)
            }
            DataLength::Large(n) => {
                if n <= 65535 {
                    return Err(Error::malformed(format!(
                        "payload length {} should not be represented using 64 bits",
                        n
                    )));
                }

                if n >= 0x80000000_00000000 {
                    return Err(Error::malformed(format!("frame is too long: {} bytes ({:x})", n, n)));
                }

                Ok(n)
            }
        }
    }
}

impl From<usize> for DataLength {
    fn from(n: usize) -> Self {
        Self::from(n as u64)
    }
}

impl TryFrom<DataLength> for usize {
    type Error = Error;

    fn try_from(len: DataLength) -> Result<Self> {
        let len = u64::try_from(len)?;
        usize::try_from(len).map_err(|_| {
            Error::malformed(format!(
                "frame of {} bytes can't be parsed on a {}-bit platform",
                len,
                mem::size_of::<usize>() * 8
            ))
        })
    }
}

/// Describes an individual frame within a WebSocket message at a low level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub(crate) fin: bool,
    pub(crate) rsv: u8,
    pub(crate) opcode: Opcode,
    pub(crate) mask: Option<Mask>,
    pub(crate) data_len: DataLength,
}

impl FrameHeader {
    /// Returns a `FrameHeader` struct.
    ///
    /// `rsv` holds the RSV1, RSV2 and RSV3 bits in their wire positions (`0x40`, `0x20` and `0x10`).
    pub fn new(fin: bool, rsv: u8, opcode: Opcode, mask: Option<Mask>, data_len: DataLength) -> Self {
        Self {
            fin,
            rsv,
            opcode,
            mask,
            data_len,
        }
    }

    /// Returns the WebSocket FIN bit, which indicates that this is the last frame in the message.
    pub fn fin(&self) -> bool {
        self.fin
    }

    /// Returns the WebSocket RSV1, RSV2 and RSV3 bits.
    pub fn rsv(&self) -> u8 {
        self.rsv
    }

    /// Returns the WebSocket opcode, which defines the interpretation of the frame payload data.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns the frame's mask.
    pub fn mask(&self) -> Option<Mask> {
        self.mask
    }

    /// Returns the length of the payload data that follows this header.
    pub fn data_len(&self) -> DataLength {
        self.data_len
    }

    /// Returns the total length of the frame header.
    ///
    /// The frame header is between 2 bytes and 14 bytes in length, depending on the presence of a mask
    /// and the length of the payload data.
    pub fn header_len(&self) -> usize {
        let mut len = 1 /* fin|rsv|opcode */ + 1 /* mask|len1 */;
        len += match self.data_len {
            DataLength::Small(_) => 0,
            DataLength::Medium(_) => 2,
            DataLength::Large(_) => 8,
        };

        if self.mask.is_some() {
            len += 4;
        }

        len
    }

    /// Parses a frame header from the start of `src` without consuming anything.
    ///
    /// Returns `Ok(None)` if `src` does not yet hold the whole header.
    ///
    /// # Errors
    ///
    /// Fails when a header field is outside the bounds of the protocol.
    pub fn parse(src: &[u8]) -> Result<Option<Self>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let fin_opcode = src[0];
        let mask_data_len = src[1];
        let mut buf = &src[2..];
        let fin = (fin_opcode & 0x80) != 0;
        let rsv = fin_opcode & 0x70;
        if rsv != 0 {
            return Err(Error::malformed(format!("reserved bits must be zero, got {:#04x}", rsv)));
        }

        let opcode = Opcode::try_from(fin_opcode & 0x0f)
            .ok_or_else(|| Error::malformed(format!("reserved opcode {}", fin_opcode & 0x0f)))?;

        let data_len = match mask_data_len & 0x7f {
            127 => {
                if buf.len() < 8 {
                    return Ok(None);
                }

                DataLength::Large(buf.get_u64())
            }
            126 => {
                if buf.len() < 2 {
                    return Ok(None);
                }

                DataLength::Medium(buf.get_u16())
            }
            n => DataLength::Small(n),
        };

        let len = u64::try_from(data_len)?;
        if opcode.is_control() {
            if !fin {
                return Err(Error::malformed(format!("{:?} frames must not be fragmented", opcode)));
            }

            if len > 125 {
                return Err(Error::malformed(format!(
                    "{:?} frame payload of {} bytes is longer than 125 bytes",
                    opcode, len
                )));
            }
        }

        let mask = if mask_data_len & 0x80 == 0 {
            None
        } else {
            if buf.len() < 4 {
                return Ok(None);
            }

            let mut key = [0; 4];
            buf.copy_to_slice(&mut key);
            Some(Mask::from(key))
        };

        Ok(Some(Self {
            fin,
            rsv,
            opcode,
            mask,
            data_len,
        }))
    }

    /// Appends the encoded header to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        let fin_bit = if self.fin { 0x80 } else { 0x00 };
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0x00 };

        dst.reserve(self.header_len());
        dst.put_u8(fin_bit | self.rsv | u8::from(self.opcode));

        match self.data_len {
            DataLength::Small(n) => {
                dst.put_u8(mask_bit | n);
            }
            DataLength::Medium(n) => {
                dst.put_u8(mask_bit | 126);
                dst.put_u16(n);
            }
            DataLength::Large(n) => {
                dst.put_u8(mask_bit | 127);
                dst.put_u64(n);
            }
        }

        if let Some(mask) = self.mask {
            dst.put_slice(&mask.key());
        }
    }
}

/// A complete WebSocket frame: a header plus its unmasked payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    /// Creates an unmasked frame with the RSV bits clear.
    pub fn new<B: Into<Bytes>>(fin: bool, opcode: Opcode, payload: B) -> Self {
        let payload = payload.into();
        Self {
            header: FrameHeader::new(fin, 0, opcode, None, payload.len().into()),
            payload,
        }
    }

    /// Creates a complete text frame.
    pub fn text<S: Into<String>>(data: S) -> Self {
        let data: String = data.into();
        Self::new(true, Opcode::Text, data)
    }

    /// Creates a complete binary frame.
    pub fn binary<B: Into<Bytes>>(data: B) -> Self {
        Self::new(true, Opcode::Binary, data)
    }

    /// Creates a frame continuing a fragmented message.
    pub fn continuation<B: Into<Bytes>>(fin: bool, data: B) -> Self {
        Self::new(fin, Opcode::Continuation, data)
    }

    /// Creates a ping frame.
    pub fn ping<B: Into<Bytes>>(data: B) -> Self {
        Self::new(true, Opcode::Ping, data)
    }

    /// Creates a pong frame.
    pub fn pong<B: Into<Bytes>>(data: B) -> Self {
        Self::new(true, Opcode::Pong, data)
    }

    /// Creates a close frame, with an optional status code and reason.
    pub fn close(reason: Option<&CloseFrame>) -> Self {
        let payload = reason.map(CloseFrame::to_payload).unwrap_or_default();
        Self::new(true, Opcode::Close, payload)
    }

    /// Creates a close frame with the given code and no reason text.
    pub fn close_with_code(code: CloseCode) -> Self {
        Self::close(Some(&CloseFrame::new(code, "")))
    }

    /// Sets the key that the payload is masked with on the wire.
    #[must_use]
    pub fn with_mask(mut self, mask: Mask) -> Self {
        self.header.mask = Some(mask);
        self
    }

    /// Returns the frame header.
    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Returns the FIN bit.
    pub fn fin(&self) -> bool {
        self.header.fin
    }

    /// Returns the RSV1 bit.
    pub fn rsv1(&self) -> bool {
        self.header.rsv & 0x40 != 0
    }

    /// Returns the RSV2 bit.
    pub fn rsv2(&self) -> bool {
        self.header.rsv & 0x20 != 0
    }

    /// Returns the RSV3 bit.
    pub fn rsv3(&self) -> bool {
        self.header.rsv & 0x10 != 0
    }

    /// Returns the opcode.
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    /// Returns `true` if the payload is masked on the wire.
    pub fn is_masked(&self) -> bool {
        self.header.mask.is_some()
    }

    /// Returns the masking key, if the payload is masked on the wire.
    pub fn masking_key(&self) -> Option<Mask> {
        self.header.mask
    }

    /// Returns the payload length.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Returns the unmasked payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consumes the frame, returning its unmasked payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

enum DecodeState {
    /// Waiting for a complete header. Nothing of the frame has been consumed.
    Header,
    /// The header has been consumed; `payload` holds the unmasked bytes received so far.
    Payload {
        header: FrameHeader,
        len: usize,
        payload: BytesMut,
    },
}

/// Tokio codec for individual WebSocket frames.
///
/// Decoding is resumable: a header that has been decoded, and any payload bytes received after it,
/// are kept between calls, so the frame may arrive in chunks split at any byte. Bytes after the end
/// of the frame stay in the source buffer for the next call.
///
/// Encoding always masks the payload, as every frame sent by a client must be masked. Frames
/// without a key are given a fresh random one.
pub struct FrameCodec {
    state: DecodeState,
    max_payload_len: usize,
}

impl FrameCodec {
    /// Creates a `FrameCodec` that accepts payloads of any length.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_payload_len(usize::MAX)
    }

    /// Creates a `FrameCodec` that rejects frames whose payload is longer than `max_payload_len`.
    #[must_use]
    pub fn with_max_payload_len(max_payload_len: usize) -> Self {
        FrameCodec {
            state: DecodeState::Header,
            max_payload_len,
        }
    }

    /// Returns `true` if a frame header has been decoded but its payload has not fully arrived.
    pub fn is_mid_frame(&self) -> bool {
        matches!(self.state, DecodeState::Payload { .. })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let (header, len, mut payload) = match mem::replace(&mut self.state, DecodeState::Header) {
            DecodeState::Header => {
                let header = if let Some(header) = FrameHeader::parse(src)? {
                    header
                } else {
                    src.reserve(MAX_HEADER_LEN);
                    return Ok(None);
                };

                let len = usize::try_from(header.data_len)?;
                if len > self.max_payload_len {
                    return Err(Error::malformed(format!(
                        "payload of {} bytes exceeds the limit of {} bytes",
                        len, self.max_payload_len
                    )));
                }

                src.advance(header.header_len());
                (header, len, BytesMut::new())
            }
            DecodeState::Payload { header, len, payload } => (header, len, payload),
        };

        let take = (len - payload.len()).min(src.len());
        let mut data = src.split_to(take);
        if let Some(mask) = header.mask {
            mask::mask_slice_at(&mut data, mask, payload.len());
        }

        if payload.is_empty() {
            payload = data;
        } else {
            payload.extend_from_slice(&data);
        }

        if payload.len() < len {
            // The declared length is untrusted, so the reservation is capped.
            src.reserve((len - payload.len()).min(MAX_PAYLOAD_RESERVE) + MAX_HEADER_LEN);
            self.state = DecodeState::Payload { header, len, payload };
            return Ok(None);
        }

        tracing::trace!(opcode = ?header.opcode, fin = header.fin, len, "decoded frame");
        Ok(Some(Frame {
            header,
            payload: payload.freeze(),
        }))
    }
}

impl<'a> Encoder<&'a Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: &'a Frame, dst: &mut BytesMut) -> Result<()> {
        let mask = item.header.mask.unwrap_or_else(Mask::new);
        let header = FrameHeader {
            mask: Some(mask),
            data_len: item.payload.len().into(),
            ..item.header.clone()
        };

        header.write_to(dst);
        dst.reserve(item.payload.len());

        let offset = dst.len();
        dst.resize(offset + item.payload.len(), 0);
        mask::mask_slice_copy(&mut dst[offset..], &item.payload, mask);
        Ok(())
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        Encoder::<&Frame>::encode(self, &item, dst)
    }
}
