/// Symbols used for short keys: digits, then lowercase, then uppercase.
pub const ALPHABET: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Number of symbols in [`ALPHABET`].
pub const BASE: u64 = ALPHABET.len() as u64;

const INITIAL_WIDTH: usize = 6;

/// Encodes `value` in base62, most significant digit first.
///
/// Digits are written from the back of a fixed-width buffer towards the
/// front, so no reverse pass is needed. When the value needs more digits than
/// the buffer holds, the buffer doubles and the already written tail moves to
/// the new back half.
///
/// # Examples
///
/// ```
/// use snip_core::base62;
///
/// assert_eq!(base62::encode(61), "Z");
/// assert_eq!(base62::encode(62), "10");
/// ```
pub fn encode(value: u64) -> String {
    if value == 0 {
        return (ALPHABET[0] as char).to_string();
    }

    let mut width = INITIAL_WIDTH;
    let mut buf = vec![0u8; width];
    let mut written = 0;
    let mut rest = value;

    while rest > 0 {
        written += 1;
        if written > width {
            // [old | old]: the digits written so far now sit at the back.
            buf.extend_from_within(..);
            width *= 2;
        }
        buf[width - written] = ALPHABET[(rest % BASE) as usize];
        rest /= BASE;
    }

    buf.drain(..width - written);
    // Every byte left in `buf` comes from ALPHABET, which is ASCII.
    buf.into_iter().map(char::from).collect()
}

/// Returns `true` if every byte of `s` belongs to [`ALPHABET`].
pub fn is_base62(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_alphanumeric())
}
