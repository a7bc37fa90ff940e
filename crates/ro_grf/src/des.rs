//! Legacy per-entry DES obfuscation.
//!
//! Only a single Feistel round is applied, which makes the block transform its own inverse. What
//! differs between the directions is the byte shuffle applied to some of the plain blocks.

use crate::cipher::{sealed, Cipher};
use crate::error::Result;

const BLOCK: usize = 8;

/// Blocks at the start of a payload that are always transformed
const HEADER_BLOCKS: usize = 20;

/// Every n-th untransformed block is shuffled
const SHUFFLE_INTERVAL: usize = 7;

/// Extensions that only receive header encryption
const HEADER_ONLY_EXTENSIONS: [&str; 4] = [".gnd", ".gat", ".act", ".str"];

const MASK: [u8; 8] = [0x80, 0x40, 0x20, 0x10, 0x08, 0x04, 0x02, 0x01];

#[rustfmt::skip]
const INITIAL_PERMUTATION: [u8; 64] = [
    58, 50, 42, 34, 26, 18, 10, 2, 60, 52, 44, 36, 28, 20, 12, 4,
    62, 54, 46, 38, 30, 22, 14, 6, 64, 56, 48, 40, 32, 24, 16, 8,
    57, 49, 41, 33, 25, 17,  9, 1, 59, 51, 43, 35, 27, 19, 11, 3,
    61, 53, 45, 37, 29, 21, 13, 5, 63, 55, 47, 39, 31, 23, 15, 7,
];

#[rustfmt::skip]
const FINAL_PERMUTATION: [u8; 64] = [
    40, 8, 48, 16, 56, 24, 64, 32, 39, 7, 47, 15, 55, 23, 63, 31,
    38, 6, 46, 14, 54, 22, 62, 30, 37, 5, 45, 13, 53, 21, 61, 29,
    36, 4, 44, 12, 52, 20, 60, 28, 35, 3, 43, 11, 51, 19, 59, 27,
    34, 2, 42, 10, 50, 18, 58, 26, 33, 1, 41,  9, 49, 17, 57, 25,
];

#[rustfmt::skip]
const TRANSPOSITION: [u8; 32] = [
    16, 7, 20, 21, 29, 12, 28, 17,  1, 15, 23, 26,  5, 18, 31, 10,
     2, 8, 24, 14, 32, 27,  3,  9, 19, 13, 30,  6, 22, 11,  4, 25,
];

#[rustfmt::skip]
const SUBSTITUTION: [[u8; 64]; 4] = [
    [
        0xef, 0x03, 0x41, 0xfd, 0xd8, 0x74, 0x1e, 0x47, 0x26, 0xef, 0xfb, 0x22, 0xb3, 0xd8, 0x84, 0x1e,
        0x39, 0xac, 0xa7, 0x60, 0x62, 0xc1, 0xcd, 0xba, 0x5c, 0x96, 0x90, 0x59, 0x05, 0x3b, 0x7a, 0x85,
        0x40, 0xfd, 0x1e, 0xc8, 0xe7, 0x8a, 0x8b, 0x21, 0xda, 0x43, 0x64, 0x9f, 0x2d, 0x14, 0xb1, 0x72,
        0xf5, 0x5b, 0xc8, 0xb6, 0x9c, 0x37, 0x76, 0xec, 0x39, 0xa0, 0xa3, 0x05, 0x52, 0x6e, 0x0f, 0xd9,
    ],
    [
        0xa7, 0xdd, 0x0d, 0x78, 0x9e, 0x0b, 0xe3, 0x95, 0x60, 0x36, 0x36, 0x4f, 0xf9, 0x60, 0x5a, 0xa3,
        0x11, 0x24, 0xd2, 0x87, 0xc8, 0x52, 0x75, 0xec, 0xbb, 0xc1, 0x4c, 0xba, 0x24, 0xfe, 0x8f, 0x19,
        0xda, 0x13, 0x66, 0xaf, 0x49, 0xd0, 0x90, 0x06, 0x8c, 0x6a, 0xfb, 0x91, 0x37, 0x8d, 0x0d, 0x78,
        0xbf, 0x49, 0x11, 0xf4, 0x23, 0xe5, 0xce, 0x3b, 0x55, 0xbc, 0xa2, 0x57, 0xe8, 0x22, 0x74, 0xce,
    ],
    [
        0x2c, 0xea, 0xc1, 0xbf, 0x4a, 0x24, 0x1f, 0xc2, 0x79, 0x47, 0xa2, 0x7c, 0xb6, 0xd9, 0x68, 0x15,
        0x80, 0x56, 0x5d, 0x01, 0x33, 0xfd, 0xf4, 0xae, 0xde, 0x30, 0x07, 0x9b, 0xe5, 0x83, 0x9b, 0x68,
        0x49, 0xb4, 0x2e, 0x83, 0x1f, 0xc2, 0xb5, 0x7c, 0xa2, 0x19, 0xd8, 0xe5, 0x7c, 0x2f, 0x83, 0xda,
        0xf7, 0x6b, 0x90, 0xfe, 0xc4, 0x01, 0x5a, 0x97, 0x61, 0xa6, 0x3d, 0x40, 0x0b, 0x58, 0xe6, 0x3d,
    ],
    [
        0x4d, 0xd1, 0xb2, 0x0f, 0x28, 0xbd, 0xe4, 0x78, 0xf6, 0x4a, 0x0f, 0x93, 0x8b, 0x17, 0xd1, 0xa4,
        0x3a, 0xec, 0xc9, 0x35, 0x93, 0x56, 0x7e, 0xcb, 0x55, 0x20, 0xa0, 0xfe, 0x6c, 0x89, 0x17, 0x62,
        0x17, 0x62, 0x4b, 0xb1, 0xb4, 0xde, 0xd1, 0x87, 0xc9, 0x14, 0x3c, 0x4a, 0x7e, 0xa8, 0xe2, 0x7d,
        0xa0, 0x9f, 0xf6, 0x5c, 0x6a, 0x09, 0x8d, 0xf0, 0x0f, 0xe3, 0x53, 0x25, 0x95, 0x36, 0x28, 0xcb,
    ],
];

/// Byte pairs exchanged by the shuffle on the last byte of a block
const SHUFFLE_SWAPS: [(u8, u8); 7] = [
    (0x00, 0x2B),
    (0x6C, 0x80),
    (0x01, 0x68),
    (0x48, 0x77),
    (0x60, 0xFF),
    (0xB9, 0xC0),
    (0xEB, 0xFE),
];

fn permute(block: &mut [u8; BLOCK], table: &[u8; 64]) {
    let mut out = [0u8; BLOCK];
    for (i, &source) in table.iter().enumerate() {
        let j = usize::from(source - 1);
        if block[j >> 3] & MASK[j & 7] != 0 {
            out[i >> 3] |= MASK[i & 7];
        }
    }
    *block = out;
}

fn expansion(block: &[u8; BLOCK]) -> [u8; BLOCK] {
    [
        ((block[7] << 5) | (block[4] >> 3)) & 0x3f,
        ((block[4] << 1) | (block[5] >> 7)) & 0x3f,
        ((block[4] << 5) | (block[5] >> 3)) & 0x3f,
        ((block[5] << 1) | (block[6] >> 7)) & 0x3f,
        ((block[5] << 5) | (block[6] >> 3)) & 0x3f,
        ((block[6] << 1) | (block[7] >> 7)) & 0x3f,
        ((block[6] << 5) | (block[7] >> 3)) & 0x3f,
        ((block[7] << 1) | (block[4] >> 7)) & 0x3f,
    ]
}

fn substitution(block: &[u8; BLOCK]) -> [u8; BLOCK] {
    let mut out = [0u8; BLOCK];
    for (i, table) in SUBSTITUTION.iter().enumerate() {
        out[i] = (table[usize::from(block[i * 2])] & 0xf0) | (table[usize::from(block[i * 2 + 1])] & 0x0f);
    }
    out
}

fn transposition(block: &[u8; BLOCK]) -> [u8; BLOCK] {
    let mut out = [0u8; BLOCK];
    for (i, &source) in TRANSPOSITION.iter().enumerate() {
        let j = usize::from(source - 1);
        if block[j >> 3] & MASK[j & 7] != 0 {
            out[(i >> 3) + 4] |= MASK[i & 7];
        }
    }
    out
}

fn round_function(block: &mut [u8; BLOCK]) {
    let mixed = transposition(&substitution(&expansion(block)));
    for i in 0..4 {
        block[i] ^= mixed[i + 4];
    }
}

/// Transforms one block, applying it twice restores the input
pub fn des_block(block: &mut [u8; BLOCK]) {
    permute(block, &INITIAL_PERMUTATION);
    round_function(block);
    permute(block, &FINAL_PERMUTATION);
}

fn swap_byte(value: u8) -> u8 {
    SHUFFLE_SWAPS
        .iter()
        .find_map(|&(a, b)| match value {
            v if v == a => Some(b),
            v if v == b => Some(a),
            _ => None,
        })
        .unwrap_or(value)
}

fn shuffle_decode(block: &mut [u8; BLOCK]) {
    let src = *block;
    *block = [src[3], src[4], src[6], src[0], src[1], src[2], src[5], swap_byte(src[7])];
}

fn shuffle_encode(block: &mut [u8; BLOCK]) {
    let src = *block;
    *block = [src[3], src[4], src[5], src[0], src[1], src[6], src[2], swap_byte(src[7])];
}

fn for_each_block(buf: &mut [u8], mut f: impl FnMut(usize, &mut [u8; BLOCK])) {
    for (index, chunk) in buf.chunks_exact_mut(BLOCK).enumerate() {
        let mut block = [0u8; BLOCK];
        block.copy_from_slice(chunk);
        f(index, &mut block);
        chunk.copy_from_slice(&block);
    }
}

fn transform(buf: &mut [u8], cycle: i32, shuffle: fn(&mut [u8; BLOCK])) {
    if cycle < 0 {
        return;
    }

    let cycle = cycle as usize;
    let mut plain = 0usize;
    for_each_block(buf, |index, block| {
        if index < HEADER_BLOCKS {
            des_block(block);
            return;
        }
        if cycle == 0 {
            return;
        }
        if index % cycle == 0 {
            des_block(block);
            return;
        }
        if plain != 0 && plain % SHUFFLE_INTERVAL == 0 {
            shuffle(block);
        }
        plain += 1;
    });
}

/// Removes the obfuscation of a payload; only whole blocks are touched
pub fn decode(buf: &mut [u8], cycle: i32) {
    transform(buf, cycle, shuffle_decode);
}

/// Applies the obfuscation to a payload; only whole blocks are touched
pub fn encode(buf: &mut [u8], cycle: i32) {
    transform(buf, cycle, shuffle_encode);
}

/// Derives the mixed encryption cycle from the compressed size
pub fn cycle_for_size(compressed: u32) -> i32 {
    let mut digits = 1;
    let mut limit: u64 = 10;
    while limit <= u64::from(compressed) {
        digits += 1;
        limit *= 10;
    }

    match digits {
        d if d < 3 => 1,
        d if d < 5 => d + 1,
        d if d < 7 => d + 9,
        d => d + 15,
    }
}

/// Whether the legacy writer only obfuscates the header blocks of this path
pub fn is_header_only(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    HEADER_ONLY_EXTENSIONS
        .iter()
        .any(|extension| lower.ends_with(extension))
}

/// Cycle a legacy writer assigns to a path with the given compressed size
pub fn cycle_for_entry(path: &str, compressed: u32) -> i32 {
    if is_header_only(path) {
        0
    } else {
        cycle_for_size(compressed)
    }
}

/// Swaps the nibbles of every byte
pub fn nibble_swap(buf: &mut [u8]) {
    for byte in buf {
        *byte = byte.rotate_left(4);
    }
}

/// Decodes a name stored in a 0x1xx table, returning the bytes before the terminator
pub fn decode_name(coded: &[u8]) -> Vec<u8> {
    let mut buf = coded.to_vec();
    for_each_block(&mut buf, |_, block| {
        nibble_swap(block);
        des_block(block);
    });
    buf.truncate(coded.len() - coded.len() % BLOCK);
    if let Some(end) = buf.iter().position(|&b| b == 0) {
        buf.truncate(end);
    }
    buf
}

/// Encodes a name for a 0x1xx table, terminated and padded to whole blocks
pub fn encode_name(name: &[u8]) -> Vec<u8> {
    let mut buf = name.to_vec();
    buf.push(0);
    buf.resize(buf.len().div_ceil(BLOCK) * BLOCK, 0);
    for_each_block(&mut buf, |_, block| {
        des_block(block);
        nibble_swap(block);
    });
    buf
}

/// The legacy per-entry cipher, keyed by the entry cycle
///
/// A cycle of `-1` disables it, `0` only covers the leading blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyCipher;

impl sealed::Sealed for LegacyCipher {}

impl Cipher for LegacyCipher {
    type Key = i32;

    fn encrypt(&self, cycle: &i32, buffer: &mut [u8], len: usize) -> Result<()> {
        let len = len.min(buffer.len());
        encode(&mut buffer[..len], *cycle);
        Ok(())
    }

    fn decrypt(&self, cycle: &i32, buffer: &mut [u8], len: usize) -> Result<()> {
        let len = len.min(buffer.len());
        decode(&mut buffer[..len], *cycle);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 + 7) as u8).collect()
    }

    #[test]
    fn block_is_an_involution() {
        let mut block = *b"GRFblock";
        des_block(&mut block);
        assert_ne!(&block, b"GRFblock");
        des_block(&mut block);
        assert_eq!(&block, b"GRFblock");
    }

    #[test]
    fn shuffle_inverts() {
        let mut block = [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x00];
        let original = block;
        shuffle_encode(&mut block);
        shuffle_decode(&mut block);
        assert_eq!(block, original);
    }

    #[test]
    fn mixed_round_trip() {
        for cycle in [0, 1, 4, 14, 22] {
            let original = sample(8 * 64 + 5);
            let mut data = original.clone();
            encode(&mut data, cycle);
            assert_ne!(data, original);
            decode(&mut data, cycle);
            assert_eq!(data, original, "cycle {cycle}");
        }
    }

    #[test]
    fn shuffled_blocks_follow_the_legacy_schedule() {
        // 40 blocks, cycle 4: blocks 20, 24, .. 36 are DES blocks, every 8th plain block after
        // block 20 is shuffled
        let original: Vec<u8> = (0..40 * BLOCK).map(|i| (i % 251) as u8).collect();
        let mut data = original.clone();
        encode(&mut data, 4);

        let block = |buf: &[u8], index: usize| -> [u8; BLOCK] {
            let mut out = [0u8; BLOCK];
            out.copy_from_slice(&buf[index * BLOCK..(index + 1) * BLOCK]);
            out
        };
        let changed: Vec<usize> = (HEADER_BLOCKS..40)
            .filter(|i| i % 4 != 0)
            .filter(|&i| block(&data, i) != block(&original, i))
            .collect();
        assert_eq!(changed, vec![30, 39]);

        let mut expected = block(&original, 30);
        shuffle_encode(&mut expected);
        assert_eq!(block(&data, 30), expected);
        let src = block(&original, 30);
        assert_eq!(block(&data, 30)[..7], [src[3], src[4], src[5], src[0], src[1], src[6], src[2]]);
    }

    #[test]
    fn header_cycle_leaves_tail_alone() {
        let original = sample(8 * 30);
        let mut data = original.clone();
        encode(&mut data, 0);
        assert_eq!(data[8 * 20..], original[8 * 20..]);
    }

    #[test]
    fn negative_cycle_is_plaintext() {
        let original = sample(64);
        let mut data = original.clone();
        encode(&mut data, -1);
        assert_eq!(data, original);
    }

    #[test]
    fn cycle_from_digit_count() {
        assert_eq!(cycle_for_size(9), 1);
        assert_eq!(cycle_for_size(99), 1);
        assert_eq!(cycle_for_size(100), 4);
        assert_eq!(cycle_for_size(9999), 5);
        assert_eq!(cycle_for_size(10000), 14);
        assert_eq!(cycle_for_size(999_999), 15);
        assert_eq!(cycle_for_size(1_000_000), 22);
    }

    #[test]
    fn exempt_extensions() {
        assert_eq!(cycle_for_entry("data\\prontera.GAT", 5000), 0);
        assert_eq!(cycle_for_entry("data\\sprite\\poring.act", 5000), 0);
        assert_eq!(cycle_for_entry("data\\sprite\\poring.spr", 5000), 5);
    }

    #[test]
    fn name_round_trip() {
        let name = b"data\\texture\\lobby.bmp";
        let coded = encode_name(name);
        assert_eq!(coded.len() % 8, 0);
        assert_eq!(decode_name(&coded), name.to_vec());
    }
}
