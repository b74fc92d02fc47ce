//! Shannon entropy over a byte buffer.
//!
//! `H = -Σ p(x)·log2(p(x))` over the 256 possible byte values. Ranges from 0 (a single
//! repeated value) to 8 (uniform over all 256 values). No heap allocation: the
//! histogram is a fixed, stack-allocated array of 64-bit counters, since a write
//! buffer can in principle exceed 2^32 bytes.

/// Computes the Shannon entropy, in bits per byte, of `buf`.
///
/// Returns `0.0` for an empty buffer. The result is always in `[0, 8]` up to
/// floating-point rounding; callers that need a hard upper bound should clamp
/// explicitly, since this function does not.
pub fn shannon_entropy(buf: &[u8]) -> f64 {
	if buf.is_empty() {
		return 0.0;
	}

	let mut histogram = [0u64; 256];
	for &byte in buf {
		histogram[byte as usize] += 1;
	}

	let len = buf.len() as f64;
	histogram
		.iter()
		.filter(|&&count| count > 0)
		.map(|&count| {
			let p = count as f64 / len;
			-p * p.log2()
		})
		.sum()
}
