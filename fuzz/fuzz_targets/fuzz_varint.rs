#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use sliq::wire::VarInt;

/// Fuzz VarInt decode/encode roundtrip.
///
/// If decode succeeds, the re-encoded form must decode to the same value.
fuzz_target!(|data: &[u8]| {
    if let Ok(vi) = VarInt::decode(&mut &data[..]) {
        assert!(vi.value() <= VarInt::MAX);

        let mut buf = BytesMut::new();
        vi.encode(&mut buf);
        let decoded = VarInt::decode(&mut &buf[..]).expect("re-decode must succeed");
        assert_eq!(decoded.value(), vi.value());
        assert_eq!(buf.len(), vi.encoded_len());
    }
});
