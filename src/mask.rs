//! Payload masking (RFC 6455 §5.3).
//!
//! Client frames are XOR-masked with a per-frame 4-byte key. Masking is its own
//! inverse, so the same routine serves both directions. The offset variant
//! exists because one logical frame may reach the write pipeline as several
//! payload chunks; the key position must carry over between chunks.

/// Mask/unmask a full frame payload.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    apply_mask_offset(buf, mask, 0);
}

/// Mask/unmask `buf` as if it started `offset` bytes into the frame payload.
pub fn apply_mask_offset(buf: &mut [u8], mask: [u8; 4], offset: usize) {
    // Rotate the key so byte 0 of `buf` lines up with position `offset` of the
    // payload, then work in 4-byte blocks.
    let shift = offset & 3;
    let rotated = [
        mask[shift],
        mask[(shift + 1) & 3],
        mask[(shift + 2) & 3],
        mask[(shift + 3) & 3],
    ];

    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        for (byte, key) in chunk.iter_mut().zip(rotated) {
            *byte ^= key;
        }
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= rotated[i];
    }
}
