//! Running log checksum.

use serde::{Deserialize, Serialize};

/// Running checksum over log bytes.
///
/// Input is consumed as 8-byte chunks of two big-endian words. Each chunk
/// folds into both words with wrapping addition, so every word depends on
/// all bytes before it. A trailing partial chunk is zero-padded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChecksum {
    low: u32,
    high: u32,
}

impl LogChecksum {
    /// Creates a checksum with the given words.
    #[must_use]
    pub const fn new(low: u32, high: u32) -> Self {
        Self { low, high }
    }

    /// Returns the low word.
    #[must_use]
    pub const fn low(&self) -> u32 {
        self.low
    }

    /// Returns the high word.
    #[must_use]
    pub const fn high(&self) -> u32 {
        self.high
    }

    /// Folds `data` into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        let mut chunks = data.chunks_exact(8);
        for chunk in &mut chunks {
            self.mix(be_word(&chunk[..4]), be_word(&chunk[4..]));
        }
        let tail = chunks.remainder();
        if !tail.is_empty() {
            let mut padded = [0u8; 8];
            padded[..tail.len()].copy_from_slice(tail);
            self.mix(be_word(&padded[..4]), be_word(&padded[4..]));
        }
    }

    /// Resets both words to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Returns the checksum as it is stored in a COMMIT record.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.low.to_be_bytes());
        out[4..].copy_from_slice(&self.high.to_be_bytes());
        out
    }

    /// Parses the stored form produced by [`to_bytes`](Self::to_bytes).
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            low: be_word(&bytes[..4]),
            high: be_word(&bytes[4..]),
        }
    }

    fn mix(&mut self, w0: u32, w1: u32) {
        self.low = self.low.wrapping_add(w0).wrapping_add(self.high);
        self.high = self.high.wrapping_add(w1).wrapping_add(self.low);
    }
}

fn be_word(bytes: &[u8]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(bytes);
    u32::from_be_bytes(word)
}
