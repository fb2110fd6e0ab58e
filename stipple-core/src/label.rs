//! Seed label <-> color encoding for color-buffer based partitions.
//!
//! A label is stored in the RGB channels of an 8-bit RGBA pixel, most
//! significant byte in red. Alpha is always opaque and ignored on decode.

/// Number of distinct labels representable in 24 bits
pub const MAX_LABELS: usize = 1 << 24;

/// Encode a seed index as an RGBA8 color
#[inline]
pub fn encode_label(index: u32) -> [u8; 4] {
    debug_assert!((index as usize) < MAX_LABELS);
    [
        ((index >> 16) & 0xff) as u8,
        ((index >> 8) & 0xff) as u8,
        (index & 0xff) as u8,
        0xff,
    ]
}

/// Decode a seed index from an RGBA8 color
#[inline]
pub fn decode_label(rgba: [u8; 4]) -> u32 {
    (rgba[0] as u32) << 16 | (rgba[1] as u32) << 8 | rgba[2] as u32
}
