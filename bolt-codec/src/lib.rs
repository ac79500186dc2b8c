#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

//! A resumable codec for the client side of the WebSocket protocol (RFC 6455).
//!
//! This crate does not do any I/O directly. It decodes frames from byte buffers that may end anywhere,
//! including in the middle of a frame header, reassembles fragmented messages, and validates the server's
//! answer to the HTTP upgrade request. For a connection state machine with heartbeats, see the `bolt` crate.

#[cfg(test)]
#[macro_use]
extern crate quickcheck_macros;

mod close;
mod error;
mod frame;
mod mask;
mod message;
mod opcode;
mod upgrade;

pub mod protocol;

pub use crate::close::{CloseCode, CloseFrame};
pub use crate::error::{Error, Result};
pub use crate::frame::{Frame, FrameCodec};
pub use crate::mask::Mask;
pub use crate::message::{Message, MessageAssembler};
pub use crate::opcode::Opcode;
pub use crate::upgrade::{accept_key, Handshake, ProtocolVersion};

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use crate::{Error, Frame, FrameCodec, Handshake, Message, MessageAssembler};

    assert_impl_all!(Frame: Send, Sync, Clone);
    assert_impl_all!(Message: Send, Sync, Clone);
    assert_impl_all!(FrameCodec: Send, Sync);
    assert_impl_all!(MessageAssembler: Send, Sync);
    assert_impl_all!(Handshake: Send, Sync);
    assert_impl_all!(Error: Send, Sync, std::error::Error);
}
