#![no_main]
use bolt_codec::{FrameCodec, MessageAssembler, Result};
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

// The first byte picks the chunk size, so frames get split at every possible offset.
fn run(data: &[u8]) -> Result<()> {
    let (chunk_len, data) = match data.split_first() {
        Some((&n, rest)) => (usize::from(n).max(1), rest),
        None => return Ok(()),
    };

    let mut codec = FrameCodec::new();
    let mut assembler = MessageAssembler::new();
    let mut src = BytesMut::new();
    for chunk in data.chunks(chunk_len) {
        src.extend_from_slice(chunk);
        while let Some(frame) = codec.decode(&mut src)? {
            if frame.opcode().is_data() {
                assembler.accept(frame)?;
            }
        }
    }

    Ok(())
}

fuzz_target!(|data: &[u8]| {
    let _ = run(data);
});
