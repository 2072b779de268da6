#![no_main]

use amqp_transport::socket::peer_common_name;
use amqp_transport::verify_peer_hostname;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as a DER certificate must never panic
    if let Some(cn) = peer_common_name(data) {
        if let Ok(host) = std::str::from_utf8(&cn) {
            let _ = verify_peer_hostname(data, host);
        }
    }
});
