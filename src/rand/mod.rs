
use rand::{thread_rng, Rng};

// Base-32 digits, the alphabet used for ICE credentials.
const RUNES_BASE32: &[u8] = b"0123456789abcdefghijklmnopqrstuv";
const RUNES_CANDIDATE_ID: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789/+";

// An 8 digit base-32 fragment carries 40 bits of entropy, comfortably
// above the 24 bit floor RFC 8445 §5.3 requires.
const LEN_UFRAG: usize = 8;
const LEN_PWD: usize = 22;

fn generate_random_string(n: usize, runes: &[u8]) -> String {
    let mut rng = thread_rng();

    (0..n)
        .map(|_| {
            let idx = rng.gen_range(0..runes.len());
            runes[idx] as char
        })
        .collect()
}

/// Generates an ICE username fragment: an optional caller prefix followed
/// by a base-32 fragment.
pub fn generate_ufrag(prefix: &str) -> String {
    format!("{}{}", prefix, generate_random_string(LEN_UFRAG, RUNES_BASE32))
}

/// Generates an ICE password: 22 base-32 digits drawn from 128 bits of
/// thread-RNG output.
pub fn generate_pwd() -> String {
    generate_random_string(LEN_PWD, RUNES_BASE32)
}

/// <https://tools.ietf.org/html/rfc5245#section-15.1>
/// candidate-id = "candidate" ":" foundation
/// foundation   = 1*32ice-char
/// ice-char     = ALPHA / DIGIT / "+" / "/"
pub fn generate_cand_id() -> String {
    format!(
        "candidate:{}",
        generate_random_string(32, RUNES_CANDIDATE_ID)
    )
}

/// Generates the 63-bit tie-breaker used for role-conflict resolution
/// (RFC 5245 §7.1.3.1).
pub fn generate_tie_breaker() -> u64 {
    thread_rng().gen::<u64>() >> 1
}
