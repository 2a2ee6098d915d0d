#![no_main]

use libfuzzer_sys::fuzz_target;
use sliq::wire::AckHeader;

/// Fuzz `AckHeader::decode` directly, independent of the enclosing `Frame`
/// dispatch covered by `fuzz_wire_parser` — ACK blocks, observed-time
/// entries and the received-history list each have their own
/// attacker-controlled repeat counts that must be bounds-checked rather
/// than trusted.
fuzz_target!(|data: &[u8]| {
    let _ = AckHeader::decode(&mut &data[..]);
});
