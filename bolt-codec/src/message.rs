use std::result;
use std::str::{self, Utf8Error};

use bytes::{Bytes, BytesMut};

use crate::frame::Frame;
use crate::{Error, Opcode, Result};

/// A complete text or binary message, reassembled from one or more frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    opcode: Opcode,
    data: Bytes,
}

impl Message {
    /// Creates a message from a `Bytes` object.
    ///
    /// When the `opcode` parameter is [`Opcode::Text`](enum.Opcode.html) this function validates the bytes in
    /// `data` and returns `Err` if they do not contain valid UTF-8 text.
    pub fn new<B: Into<Bytes>>(opcode: Opcode, data: B) -> result::Result<Self, Utf8Error> {
        let data = data.into();

        if opcode.is_text() {
            str::from_utf8(&data)?;
        }

        Ok(Message { opcode, data })
    }

    /// Creates a text message from a `String`.
    pub fn text<S: Into<String>>(data: S) -> Self {
        let data: String = data.into();
        Message {
            opcode: Opcode::Text,
            data: data.into(),
        }
    }

    /// Creates a binary message from any type that can be converted to `Bytes`, such as `&[u8]` or `Vec<u8>`.
    pub fn binary<B: Into<Bytes>>(data: B) -> Self {
        Message {
            opcode: Opcode::Binary,
            data: data.into(),
        }
    }

    /// Returns this message's WebSocket opcode: either `Text` or `Binary`.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Returns a reference to the data held in this message.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consumes the message, returning its data.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// For text messages, returns a reference to the text. Returns `None` otherwise.
    pub fn as_text(&self) -> Option<&str> {
        if self.opcode.is_text() {
            str::from_utf8(&self.data).ok()
        } else {
            None
        }
    }

    /// Returns the message as a single unfragmented frame.
    pub fn to_frame(&self) -> Frame {
        Frame::new(true, self.opcode, self.data.clone())
    }
}

/// Reassembles fragmented messages from a sequence of data frames.
///
/// Control frames must be handled by the caller; they may arrive between the fragments of a
/// message without disturbing the message in progress.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    in_progress: Option<(Opcode, BytesMut)>,
}

impl MessageAssembler {
    /// Creates an assembler with no message in progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the first fragments of a message have arrived but the final one has not.
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.is_some()
    }

    /// Accepts the next data frame, returning the message it completes, if any.
    ///
    /// # Errors
    ///
    /// Fails on a continuation frame with no message in progress, a new text or binary frame while a
    /// message is in progress, a control frame, or a text message that is not valid UTF-8.
    pub fn accept(&mut self, frame: Frame) -> Result<Option<Message>> {
        let fin = frame.fin();
        let opcode = frame.opcode();
        if opcode.is_control() {
            return Err(Error::violation(format!("{:?} frame passed to the message assembler", opcode)));
        }

        let (opcode, data) = match (self.in_progress.take(), opcode) {
            (None, Opcode::Continuation) => {
                return Err(Error::violation("continuation must not be first frame"));
            }
            (None, opcode) => {
                if !fin {
                    self.in_progress = Some((opcode, BytesMut::from(&frame.payload()[..])));
                    return Ok(None);
                }

                (opcode, frame.into_payload())
            }
            (Some((partial_opcode, mut partial_data)), Opcode::Continuation) => {
                partial_data.extend_from_slice(frame.payload());
                if !fin {
                    self.in_progress = Some((partial_opcode, partial_data));
                    return Ok(None);
                }

                (partial_opcode, partial_data.freeze())
            }
            (Some(_), opcode) => {
                return Err(Error::violation(format!(
                    "continuation frame must have continuation opcode, not {:?}",
                    opcode
                )));
            }
        };

        let message = Message::new(opcode, data)
            .map_err(|e| Error::violation(format!("text message is not valid UTF-8: {}", e)))?;

        Ok(Some(message))
    }
}
