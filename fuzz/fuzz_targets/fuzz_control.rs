#![no_main]

use libfuzzer_sys::fuzz_target;
use sliq::vdm_fec::FecGroupDecoder;

/// Fuzz the FEC group decoder with an adversarial sequence of
/// (group-index, symbol) inserts. `k` and `symbol_len` are derived from the
/// first two bytes so the fuzzer can explore degenerate shapes (`k == 0`,
/// a `symbol_len` of zero, group indices far past `k`, duplicate indices).
///
/// `insert`/`try_decode` must never panic, regardless of how the group
/// fills in or how malformed the claimed geometry is.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let k = (data[0] as usize % 12).max(1);
    let symbol_len = data[1] as usize % 32;
    let mut dec = FecGroupDecoder::new(k, symbol_len);

    for chunk in data[2..].chunks(4) {
        if chunk.len() < 2 {
            break;
        }
        let idx = chunk[0] as usize;
        let payload = chunk[1..].to_vec();
        dec.insert(idx, payload);
        let _ = dec.try_decode();
        if dec.is_complete() {
            break;
        }
    }
});
