//! Fuzz target for pkt-line header decoding.

#![no_main]

use g2g_git::{decode_header, HEADER_LEN, MAX_PKT_LEN};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|header: [u8; HEADER_LEN]| {
    if let Ok(len) = decode_header(&header) {
        assert!(len == 0 || (HEADER_LEN..=MAX_PKT_LEN).contains(&len));
    }
});
