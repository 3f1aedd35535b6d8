//! Random material for keyfiles and disk wiping.

use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use zeroize::Zeroizing;

/// Length of a member-disk keyfile in bytes.
pub const KEYFILE_LEN: usize = 64;

/// Generate one keyfile's worth of entropy from the operating system.
pub fn generate_keyfile() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; KEYFILE_LEN]);
    OsRng.fill_bytes(&mut key);
    key
}

/// Keyed pseudorandom byte stream for overwriting block devices.
///
/// Seeded once from the OS entropy pool, then expanded with ChaCha20. The
/// output is indistinguishable from random data for wiping purposes but does
/// not drain the entropy pool per block.
pub struct WipeStream {
    rng: ChaCha20Rng,
}

impl WipeStream {
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self {
            rng: ChaCha20Rng::from_seed(seed),
        }
    }

    /// Fill `buf` with the next stretch of the stream.
    pub fn fill(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }
}

impl Default for WipeStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyfiles_are_full_length_and_distinct() {
        let a = generate_keyfile();
        let b = generate_keyfile();
        assert_eq!(a.len(), KEYFILE_LEN);
        assert_eq!(b.len(), KEYFILE_LEN);
        assert_ne!(&a[..], &b[..]);
    }

    #[test]
    fn wipe_stream_does_not_repeat_across_blocks() {
        let mut stream = WipeStream::new();
        let mut first = vec![0u8; 4096];
        let mut second = vec![0u8; 4096];
        stream.fill(&mut first);
        stream.fill(&mut second);
        assert_ne!(first, second);
        assert!(first.iter().any(|b| *b != 0));
    }
}
