#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use sliq::wire::Frame;

/// Fuzz the top-level frame decoder with arbitrary datagram contents.
///
/// `Frame::decode` must never panic on any input; malformed data yields
/// `Err`, never a crash. Anything that does decode must re-encode and
/// decode back to an equal frame.
fuzz_target!(|data: &[u8]| {
    let payload = Bytes::copy_from_slice(data);
    if let Ok(frame) = Frame::decode(payload) {
        let re = frame.encode();
        assert!(Frame::decode(re).is_ok(), "re-encode of a decoded frame must itself decode");
    }
});
