use rand::rngs::OsRng;
use rand::RngCore;

/// Alphabet for receiver ids: lowercase letters and digits only, so the id is
/// usable both as a DNS label and as the first token of a `Host` header.
const ALPHABET: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a receiver id.
pub const RECEIVER_ID_LEN: usize = 12;

/// Generate a fresh receiver id: 12 characters drawn uniformly from
/// `[a-z0-9]` using the OS RNG. Each character is an independent pick, so
/// collisions are negligible for any realistic peer population.
pub fn receiver_id() -> String {
    let mut rng = OsRng;
    (0..RECEIVER_ID_LEN)
        .map(|_| ALPHABET[(rng.next_u32() % ALPHABET.len() as u32) as usize] as char)
        .collect()
}
