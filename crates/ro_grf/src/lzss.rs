//! Decoder for the LZSS streams found in early containers.
//!
//! Each control byte announces eight tokens, least significant bit first. A clear bit is a literal
//! byte; a set bit is a little endian codeword whose high nibble is `length - 2` and whose low 12 bits
//! are the backward distance into the output produced so far.

use crate::error::{Error, Result};

const MIN_MATCH: usize = 2;

/// Expands an LZSS stream, stopping once `expected` bytes are produced
pub fn decompress(input: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected);
    let mut pos = 0;

    while pos < input.len() && out.len() < expected {
        let control = input[pos];
        pos += 1;

        for bit in 0..8 {
            if pos >= input.len() || out.len() >= expected {
                break;
            }

            if control & (1 << bit) == 0 {
                out.push(input[pos]);
                pos += 1;
                continue;
            }

            let Some(word) = input.get(pos..pos + 2) else {
                return Err(Error::Compression("lzss: truncated codeword".into()));
            };
            pos += 2;

            let code = u16::from_le_bytes([word[0], word[1]]);
            let length = usize::from(code >> 12) + MIN_MATCH;
            let distance = usize::from(code & 0x0FFF);
            if distance == 0 || distance > out.len() {
                return Err(Error::Compression(format!(
                    "lzss: distance {distance} outside of {} decoded bytes",
                    out.len()
                )));
            }

            // byte by byte, the run may overlap what it produces
            let start = out.len() - distance;
            for i in 0..length {
                let byte = out[start + i];
                out.push(byte);
            }
        }
    }

    out.truncate(expected);
    Ok(out)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::decompress;
    use crate::error::Result;

    #[test]
    fn literals_only() -> Result<()> {
        let input = [0x00, b'g', b'r', b'f'];
        assert_eq!(decompress(&input, 3)?, b"grf");
        Ok(())
    }

    #[test]
    fn overlapping_back_reference() -> Result<()> {
        // two literals, then copy 6 bytes from 2 back
        #[rustfmt::skip]
        let input = [
            0b0000_0100,
            b'a', b'b',
            0x02, 0x40,
        ];
        assert_eq!(decompress(&input, 8)?, b"abababab");
        Ok(())
    }

    #[test]
    fn stops_at_expected_length() -> Result<()> {
        let input = [0b0000_0100, b'x', b'y', 0x01, 0xF0];
        assert_eq!(decompress(&input, 5)?, b"xyyyy");
        Ok(())
    }

    #[test]
    fn invalid_distance() {
        let input = [0b0000_0001, 0x05, 0x00];
        assert!(decompress(&input, 4).is_err());
    }
}
