#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use sliq::types::DeliveryMode;
use sliq::wire::DataHeader;

/// Fuzz the received-packet pipeline end to end: decode a `DataHeader` off
/// the front of the input and feed the rest through
/// `ReceivedPacketManager::on_data`, across several calls so out-of-window
/// rejection, FEC group bookkeeping, and ACK synthesis all get exercised
/// against adversarial sequence numbers and FEC group ids.
///
/// Must never panic, whatever the header claims about itself.
fuzz_target!(|data: &[u8]| {
    let mut rpm = sliq::received::ReceivedPacketManager::new(64);
    let mut buf = data;
    let mut now_us = 0u32;
    while !buf.is_empty() {
        let before_len = buf.len();
        match DataHeader::decode(&mut buf) {
            Ok(header) => {
                let take = (header.payload_length as usize).min(buf.len());
                let payload = Bytes::copy_from_slice(&buf[..take]);
                buf = &buf[take..];
                let _ = rpm.on_data(&header, payload, now_us, DeliveryMode::Ordered);
                let _ = rpm.build_ack(now_us);
                now_us = now_us.wrapping_add(1000);
            }
            Err(_) => break,
        }
        if buf.len() == before_len {
            break;
        }
    }
});
