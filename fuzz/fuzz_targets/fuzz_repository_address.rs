//! Fuzz target for `g2g://` address parsing.
//!
//! Any address that parses must print back to a string that parses to the
//! same address.

#![no_main]

use g2g_node::RepositoryAddress;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(address) = RepositoryAddress::parse(input) {
        let printed = address.to_string();
        let reparsed = RepositoryAddress::parse(&printed).expect("printed address must parse");
        assert_eq!(reparsed.to_string(), printed);
    }
});
