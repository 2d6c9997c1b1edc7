//! Fuzz target for the pkt-line scanner.
//!
//! The scanner must never panic, must halt after its first error, and every
//! frame it yields must be exactly the bytes it consumed.

#![no_main]

use g2g_git::PktLineScanner;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(runtime) => runtime,
        Err(_) => return,
    };

    runtime.block_on(async {
        let mut scanner = PktLineScanner::new(data);
        let mut consumed = Vec::new();
        loop {
            match scanner.read().await {
                Ok(Some(frame)) => consumed.extend_from_slice(frame.as_bytes()),
                Ok(None) => break,
                Err(_) => {
                    assert!(scanner.is_halted());
                    assert!(matches!(scanner.read().await, Ok(None)));
                    break;
                }
            }
        }
        assert!(data.starts_with(&consumed));
    });
});
