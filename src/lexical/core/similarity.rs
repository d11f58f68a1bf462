//! Length normalization used to compute per-document norm bytes.
//!
//! Relevance scoring is not part of the indexing core; the similarity is only
//! consulted at flush time to turn (field boost, document boost, token count)
//! into the one-byte norm stored for each document and field.

use std::fmt::Debug;

/// Pluggable length-norm and term-frequency functions.
pub trait Similarity: Send + Sync + Debug {
    /// Normalization factor for a field holding `num_terms` tokens.
    fn length_norm(&self, field: &str, num_terms: u32) -> f32;

    /// Weight of a term occurring `freq` times in a document.
    fn tf(&self, freq: f32) -> f32;

    /// Encode a norm into a single byte.
    fn encode_norm(&self, norm: f32) -> u8 {
        float_to_byte(norm)
    }

    /// Decode a byte produced by [`Similarity::encode_norm`].
    fn decode_norm(&self, byte: u8) -> f32 {
        byte_to_float(byte)
    }
}

/// `1 / sqrt(num_terms)` length normalization and `sqrt(freq)` term weight.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSimilarity;

impl Similarity for DefaultSimilarity {
    fn length_norm(&self, _field: &str, num_terms: u32) -> f32 {
        if num_terms == 0 {
            0.0
        } else {
            1.0 / (num_terms as f32).sqrt()
        }
    }

    fn tf(&self, freq: f32) -> f32 {
        freq.sqrt()
    }
}

/// Encode a non-negative float as a byte with a 3-bit mantissa and a 5-bit
/// exponent (zero exponent point 15). Precision is coarse: only 256 distinct
/// values survive, with every encoded value at most the input.
pub fn float_to_byte(f: f32) -> u8 {
    if f.is_nan() || f <= 0.0 {
        return 0;
    }
    let bits = f.to_bits() as i32;
    let mut smallfloat = bits >> (24 - 3);
    let lower = (63 - 15) << 3;
    if smallfloat <= lower {
        return if bits <= 0 { 0 } else { 1 };
    }
    if smallfloat >= lower + 0x100 {
        return 0xFF;
    }
    smallfloat -= lower;
    smallfloat as u8
}

/// Inverse of [`float_to_byte`].
pub fn byte_to_float(b: u8) -> f32 {
    if b == 0 {
        return 0.0;
    }
    let mut bits = (b as u32) << (24 - 3);
    bits += (63 - 15) << 24;
    f32::from_bits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_byte_encoding() {
        assert_eq!(float_to_byte(0.0), 0);
        assert_eq!(float_to_byte(-3.0), 0);
        assert_eq!(byte_to_float(0), 0.0);
        assert_eq!(byte_to_float(float_to_byte(1.0)), 1.0);
        assert_eq!(byte_to_float(float_to_byte(0.5)), 0.5);

        // Encoding rounds down and is monotonic.
        let mut last = 0u8;
        for i in 1..1000 {
            let f = i as f32 / 100.0;
            let b = float_to_byte(f);
            assert!(b >= last);
            assert!(byte_to_float(b) <= f);
            last = b;
        }
        assert_eq!(float_to_byte(f32::MAX), 0xFF);
    }

    #[test]
    fn test_default_similarity() {
        let sim = DefaultSimilarity;
        assert_eq!(sim.length_norm("f", 4), 0.5);
        assert_eq!(sim.length_norm("f", 0), 0.0);
        assert_eq!(sim.tf(9.0), 3.0);
        assert_eq!(sim.decode_norm(sim.encode_norm(0.25)), 0.25);
    }
}
