pub mod codec;

pub use codec::{KeyCodec, KeyCodecSettings, DEFAULT_COUNTER_FLOOR, DEFAULT_SUFFIX_LEN};

/// Trait for generating short keys.
///
/// Implementations are pure generators that don't interact with storage.
pub trait Generator: Send + Sync + 'static {
    /// Generates a new short key.
    ///
    /// Every call must return a key never returned before by the same generator.
    fn generate(&self) -> String;
}
