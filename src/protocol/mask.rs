//! Payload masking and mask-key sources.
//!
//! Clients XOR every outgoing payload byte with a 4-byte key. The key only
//! has to be unpredictable to intermediaries, not cryptographically strong,
//! so [`RandomMask`] seeds once from the OS and then mixes a counter.
//! [`FixedMask`] makes encoded output deterministic for tests.

/// XOR `data` in place with `mask[i % 4]`. Applying it twice is the identity.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&(val ^ mask_u32).to_ne_bytes());
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

/// Supplier of masking keys for outgoing client frames.
pub trait MaskSource: Send {
    /// Produce the key for the next frame.
    fn next_mask(&mut self) -> [u8; 4];
}

/// Mask keys from an OS-seeded mixing generator.
#[derive(Debug, Clone)]
pub struct RandomMask {
    counter: u32,
}

impl RandomMask {
    /// Seed a new generator from the operating system.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: random_seed(),
        }
    }
}

impl Default for RandomMask {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskSource for RandomMask {
    fn next_mask(&mut self) -> [u8; 4] {
        self.counter = self.counter.wrapping_add(0x9E37_79B9);
        let a = self.counter;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        d.to_le_bytes()
    }
}

/// Always yields the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedMask(pub [u8; 4]);

impl MaskSource for FixedMask {
    fn next_mask(&mut self) -> [u8; 4] {
        self.0
    }
}

/// Falls back to the system clock if the OS source is unavailable.
fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}
