use crate::Generator;
use snip_core::base62;
use std::sync::atomic::{AtomicU64, Ordering};
use typed_builder::TypedBuilder;

/// Counter value used when the backend cannot report how many records it holds.
///
/// Keeps generated keys visually distinct from small hand-written keys.
pub const DEFAULT_COUNTER_FLOOR: u64 = 100_000;

/// Number of random symbols appended to every key.
pub const DEFAULT_SUFFIX_LEN: usize = 3;

/// Configures a [`KeyCodec`].
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct KeyCodecSettings {
    /// Last counter value already in use. The first key encodes `seed + 1`.
    #[builder(default = DEFAULT_COUNTER_FLOOR)]
    pub seed: u64,
    /// Random symbols appended after the encoded counter.
    #[builder(default = DEFAULT_SUFFIX_LEN)]
    pub suffix_len: usize,
}

/// Short key generator backed by a monotonic counter.
///
/// Each key is the base62 encoding of the next counter value followed by a
/// few random symbols from the same alphabet. The suffix only makes
/// sequential keys harder to guess; uniqueness comes from the counter.
#[derive(Debug)]
pub struct KeyCodec {
    counter: AtomicU64,
    suffix_len: usize,
}

impl KeyCodec {
    /// Creates a codec whose first key encodes `seed + 1`.
    pub fn new(seed: u64) -> Self {
        Self::with_settings(KeyCodecSettings::builder().seed(seed).build())
    }

    /// Creates a codec from a persisted record count, falling back to
    /// [`DEFAULT_COUNTER_FLOOR`] when none is known.
    pub fn seeded(last_id: Option<u64>) -> Self {
        Self::new(last_id.unwrap_or(DEFAULT_COUNTER_FLOOR))
    }

    pub fn with_settings(settings: KeyCodecSettings) -> Self {
        Self {
            counter: AtomicU64::new(settings.seed),
            suffix_len: settings.suffix_len,
        }
    }

    /// Replaces the number of random suffix symbols.
    pub fn with_suffix_len(mut self, suffix_len: usize) -> Self {
        self.suffix_len = suffix_len;
        self
    }

    /// Returns the last counter value handed out.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Returns the next short key.
    pub fn next_key(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let mut key = base62::encode(id);
        key.reserve(self.suffix_len);
        key.extend((0..self.suffix_len).map(|_| random_symbol()));
        key
    }
}

impl Generator for KeyCodec {
    fn generate(&self) -> String {
        self.next_key()
    }
}

fn random_symbol() -> char {
    char::from(base62::ALPHABET[rand::random_range(0..base62::ALPHABET.len())])
}
