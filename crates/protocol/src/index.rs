//! Run-length-delta codec for file indices.
//!
//! Indices are sent relative to the previously seen positive (or negative)
//! index: a diff of 1-253 packs into one byte, a diff up to 0x7fff into
//! `0xfe` plus two bytes, anything else into `0xfe` plus the absolute value
//! in four bytes with the high bit of the leading byte set. Negative
//! indices are prefixed with `0xff` and transmitted by magnitude. The
//! sentinel [`DONE`] is a single zero byte.

/// End-of-phase sentinel.
pub const DONE: i32 = -1;

/// End-of-recursive-expansion sentinel.
pub const EOF: i32 = -2;

/// Base for stub-directory references: a directory with index `d` is
/// referenced as `OFFSET - d`, placing all such references below every
/// valid index and sentinel.
pub const OFFSET: i32 = -101;

/// Encoder state: the previously sent positive and negative indices.
#[derive(Clone, Debug)]
pub struct IndexEncoder {
    prev_positive: i32,
    prev_negative: i32,
}

impl Default for IndexEncoder {
    fn default() -> Self {
        Self {
            prev_positive: -1,
            prev_negative: 1,
        }
    }
}

impl IndexEncoder {
    /// Appends the encoding of `index` to `out`.
    pub fn encode(&mut self, index: i32, out: &mut Vec<u8>) {
        if index == DONE {
            out.push(0);
            return;
        }

        let num;
        let diff;
        if index >= 0 {
            diff = index.wrapping_sub(self.prev_positive);
            self.prev_positive = index;
            num = index;
        } else {
            num = -index;
            diff = num.wrapping_sub(self.prev_negative);
            self.prev_negative = num;
            out.push(0xff);
        }

        if diff > 0 && diff < 0xfe {
            out.push(diff as u8);
        } else if !(0..=0x7fff).contains(&diff) {
            out.push(0xfe);
            out.push(((num >> 24) as u8) | 0x80);
            out.push(num as u8);
            out.push((num >> 8) as u8);
            out.push((num >> 16) as u8);
        } else {
            out.push(0xfe);
            out.push((diff >> 8) as u8);
            out.push(diff as u8);
        }
    }
}

/// Decoder state: the previously seen positive and negative indices.
#[derive(Clone, Debug)]
pub struct IndexDecoder {
    prev_positive: i32,
    prev_negative: i32,
}

impl Default for IndexDecoder {
    fn default() -> Self {
        Self {
            prev_positive: -1,
            prev_negative: 1,
        }
    }
}

impl IndexDecoder {
    /// Decodes one index, pulling bytes from `next`.
    ///
    /// # Errors
    ///
    /// Propagates whatever error `next` surfaces.
    pub fn decode<E>(&mut self, mut next: impl FnMut() -> Result<u8, E>) -> Result<i32, E> {
        let mut lead = next()?;
        if lead == 0 {
            return Ok(DONE);
        }

        let negative = lead == 0xff;
        if negative {
            lead = next()?;
        }

        let prev = if negative {
            &mut self.prev_negative
        } else {
            &mut self.prev_positive
        };

        let num = if lead == 0xfe {
            let b0 = next()?;
            let b1 = next()?;
            if b0 & 0x80 != 0 {
                let lsb = i32::from(b1);
                let mid0 = i32::from(next()?);
                let mid1 = i32::from(next()?);
                let msb = i32::from(b0 & 0x7f);
                lsb | (mid0 << 8) | (mid1 << 16) | (msb << 24)
            } else {
                ((i32::from(b0) << 8) | i32::from(b1)).wrapping_add(*prev)
            }
        } else {
            i32::from(lead).wrapping_add(*prev)
        };

        *prev = num;
        Ok(if negative { -num } else { num })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn decode_all(bytes: &[u8], count: usize) -> Vec<i32> {
        let mut decoder = IndexDecoder::default();
        let mut iter = bytes.iter().copied();
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let value = decoder
                .decode(|| Ok::<u8, Infallible>(iter.next().expect("enough bytes")))
                .expect("infallible");
            out.push(value);
        }
        assert!(iter.next().is_none(), "trailing bytes left over");
        out
    }

    fn round_trip(indices: &[i32]) {
        let mut encoder = IndexEncoder::default();
        let mut bytes = Vec::new();
        for &index in indices {
            encoder.encode(index, &mut bytes);
        }
        assert_eq!(decode_all(&bytes, indices.len()), indices);
    }

    #[test]
    fn done_is_a_single_zero_byte() {
        let mut encoder = IndexEncoder::default();
        let mut bytes = Vec::new();
        encoder.encode(DONE, &mut bytes);
        assert_eq!(bytes, vec![0]);
    }

    #[test]
    fn consecutive_indices_pack_into_single_bytes() {
        let mut encoder = IndexEncoder::default();
        let mut bytes = Vec::new();
        for index in 0..4 {
            encoder.encode(index, &mut bytes);
        }
        // Each index is one more than the previous one.
        assert_eq!(bytes, vec![1, 1, 1, 1]);
    }

    #[test]
    fn eof_sentinel_round_trips() {
        round_trip(&[EOF, DONE, EOF]);
    }

    #[test]
    fn stub_directory_references_round_trip() {
        round_trip(&[OFFSET, OFFSET - 1, OFFSET - 7, 3, OFFSET - 1024]);
    }

    #[test]
    fn large_jumps_use_the_absolute_form() {
        let mut encoder = IndexEncoder::default();
        let mut bytes = Vec::new();
        encoder.encode(0x12_3456, &mut bytes);
        assert_eq!(bytes[0], 0xfe);
        assert_eq!(bytes[1] & 0x80, 0x80);
        assert_eq!(decode_all(&bytes, 1), vec![0x12_3456]);
    }

    #[test]
    fn mixed_positive_and_negative_streams_keep_separate_state() {
        round_trip(&[0, 1, EOF, 2, OFFSET - 2, 3, 4, DONE, 5]);
    }

    #[test]
    fn backwards_jumps_round_trip() {
        round_trip(&[1000, 3, 500, 0x7fff_0000, 1]);
    }
}
