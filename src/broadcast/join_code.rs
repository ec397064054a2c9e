//! Six-digit room join codes

use rand::Rng;

use crate::constants::JOIN_CODE_LEN;

const CODE_SPACE: u32 = 1_000_000;

/// Exactly six ASCII decimal digits; leading zeros are allowed.
pub fn is_valid(code: &str) -> bool {
    code.len() == JOIN_CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

/// Random code, not checked for collisions
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("{:0width$}", rng.gen_range(0..CODE_SPACE), width = JOIN_CODE_LEN)
}

/// Random code for which `taken` returns false.
///
/// Returns `None` only when every code is in use.
pub fn generate_unique<R: Rng + ?Sized>(rng: &mut R, taken: impl Fn(&str) -> bool) -> Option<String> {
    for _ in 0..64 {
        let code = generate(rng);
        if !taken(&code) {
            return Some(code);
        }
    }

    // crowded space: walk from a random start instead of sampling forever
    let start = rng.gen_range(0..CODE_SPACE);
    (0..CODE_SPACE)
        .map(|offset| format!("{:0width$}", (start + offset) % CODE_SPACE, width = JOIN_CODE_LEN))
        .find(|code| !taken(code))
}
