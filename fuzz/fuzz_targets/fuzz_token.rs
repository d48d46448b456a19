//! Fuzz testing for token validation and scope key construction.
//!
//! Checks, for arbitrary client ids and tokens, that:
//!
//! - `validate_token` never panics
//! - every token that passes validation round-trips through a `ScopeKey`
//! - distinct accepted `(client, token)` pairs never share a key
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_token -- -max_total_time=60
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use request_dedup::store::{SCOPE_DELIMITER, ScopeKey};
use request_dedup::validation::{DEFAULT_MAX_TOKEN_LEN, validate_token};

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    client_a: &'a str,
    token_a: &'a str,
    client_b: &'a str,
    token_b: &'a str,
}

/// Client ids are IP addresses or "unknown" and never carry the delimiter.
fn plausible_client(client: &str) -> bool {
    !client.contains(SCOPE_DELIMITER)
}

fuzz_target!(|input: Input<'_>| {
    let ok_a = validate_token(input.token_a, DEFAULT_MAX_TOKEN_LEN).is_ok();
    let ok_b = validate_token(input.token_b, DEFAULT_MAX_TOKEN_LEN).is_ok();

    if !(ok_a && plausible_client(input.client_a)) {
        return;
    }

    let a = ScopeKey::new(input.client_a, input.token_a);
    assert_eq!(a.client(), input.client_a);
    assert_eq!(a.token(), input.token_a);

    if ok_b && plausible_client(input.client_b) {
        let b = ScopeKey::new(input.client_b, input.token_b);
        let same_pair = input.client_a == input.client_b && input.token_a == input.token_b;
        assert_eq!(a.as_str() == b.as_str(), same_pair);
    }
});
