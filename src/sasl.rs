//! SASL PLAIN authentication payloads.
//!
//! The PLAIN response is `authzid NUL authcid NUL password`, base64
//! encoded, sent in `AUTHENTICATE` lines of at most 400 bytes. A payload
//! that is empty or an exact multiple of the chunk size is terminated by
//! a bare `+` line so the server knows it is complete.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Maximum payload bytes per AUTHENTICATE line.
pub const CHUNK_SIZE: usize = 400;

/// Build the base64 PLAIN response for `account` and `password`, using
/// the account as both authorization and authentication identity.
pub fn plain_payload(account: &str, password: &str) -> String {
    STANDARD.encode(format!("{account}\0{account}\0{password}"))
}

/// Split a payload into the AUTHENTICATE argument sequence.
pub fn chunk_payload(payload: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = payload;
    while rest.len() >= CHUNK_SIZE {
        let (chunk, tail) = rest.split_at(CHUNK_SIZE);
        out.push(chunk.to_string());
        rest = tail;
    }
    if rest.is_empty() {
        out.push("+".to_string());
    } else {
        out.push(rest.to_string());
    }
    out
}
