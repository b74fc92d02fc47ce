//! The two-stage, short-circuit write decision policy.
//!
//! 1. If the whitelist policy says `Safe`, allow — entropy is never computed.
//! 2. Otherwise compute entropy; block iff it is *strictly greater* than the
//!    configured threshold (a buffer exactly at the threshold is allowed).
//!
//! The detector is non-stateful: each buffer is judged independently, with no memory
//! of prior calls. It cannot fail — every path through it produces a decision, never
//! an error — which is why `DecisionRecord` and `Error` are kept as distinct types
//! even though a `Block` verdict is ultimately rendered to the caller as an I/O error.

use tracing::{debug, info};

use super::classify::ContentLabel;
use super::entropy::shannon_entropy;
use super::whitelist::{self, WhitelistDecision};
use super::stats::Stats;
use super::{DecisionLabel, DecisionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	Allow,
	Block,
}

/// Runs the classifier, whitelist, and entropy check over one write buffer.
#[derive(Debug, Default)]
pub struct Detector {
	entropy_threshold: f64,
}

impl Detector {
	pub fn new(entropy_threshold: f64) -> Self {
		Self { entropy_threshold }
	}

	/// Classifies and judges `buf`, updating `stats` as a side effect.
	pub fn evaluate(&self, buf: &[u8], label: ContentLabel, stats: &Stats) -> DecisionRecord {
		stats.record_write();

		let decision = whitelist::evaluate(label, buf);
		let record = match decision {
			WhitelistDecision::Safe => DecisionRecord {
				label: DecisionLabel::Whitelisted,
				entropy: None,
				verdict: Verdict::Allow,
			},
			WhitelistDecision::Unknown => {
				let h = shannon_entropy(buf);
				let verdict = if h > self.entropy_threshold {
					Verdict::Block
				} else {
					Verdict::Allow
				};
				DecisionRecord {
					label: DecisionLabel::Unknown,
					entropy: Some(h),
					verdict,
				}
			}
		};

		match record.verdict {
			Verdict::Block => {
				stats.record_block();
				info!(entropy = ?record.entropy, mime = label.as_mime(), "blocked write: entropy exceeds threshold");
			}
			Verdict::Allow => {
				debug!(?record.label, entropy = ?record.entropy, mime = label.as_mime(), "allowed write");
			}
		}

		record
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::classify;

	fn detector() -> Detector {
		Detector::new(7.5)
	}

	/// Mirrors the real write-path call pattern (`fs::mod`'s `write`): classify once,
	/// then evaluate with the resulting label.
	fn classify_and_evaluate(d: &Detector, buf: &[u8], stats: &Stats) -> DecisionRecord {
		let label = classify::classify(buf);
		d.evaluate(buf, label, stats)
	}

	#[test]
	fn empty_buffer_is_allowed() {
		let stats = Stats::default();
		let record = classify_and_evaluate(&detector(), b"", &stats);
		assert_eq!(record.verdict, Verdict::Allow);
	}

	#[test]
	fn plain_text_is_allowed_regardless_of_entropy_stance() {
		let stats = Stats::default();
		let record = classify_and_evaluate(&detector(), b"Hello from SentinelFS\n", &stats);
		assert_eq!(record.verdict, Verdict::Allow);
		assert_eq!(record.label, DecisionLabel::Whitelisted);
	}

	#[test]
	fn pseudorandom_bytes_are_blocked() {
		use rand::{RngCore, SeedableRng};
		let stats = Stats::default();
		let mut rng = rand::rngs::StdRng::seed_from_u64(0x1337_BEEF);
		let mut buf = vec![0u8; 1024];
		rng.fill_bytes(&mut buf);
		let record = classify_and_evaluate(&detector(), &buf, &stats);
		assert_eq!(record.verdict, Verdict::Block);
		assert_eq!(stats.snapshot().blocked_writes, 1);
	}

	#[test]
	fn shebang_wrapper_is_allowed_even_with_high_entropy_payload() {
		let stats = Stats::default();
		let mut buf = b"#!/bin/sh\n".to_vec();
		let mut x: u32 = 0xC0FFEE;
		buf.extend((0..500).map(|_| {
			x = x.wrapping_mul(1664525).wrapping_add(1013904223);
			(x >> 16) as u8
		}));
		let record = classify_and_evaluate(&detector(), &buf, &stats);
		assert_eq!(record.verdict, Verdict::Allow);
	}

	#[test]
	fn boundary_entropy_equal_to_threshold_is_allowed() {
		let stats = Stats::default();
		// Construct a buffer whose entropy is exactly representable and then probe
		// around the threshold via a detector configured to match it exactly.
		let buf = uniform_alphabet_buffer(4); // log2(4) = 2.0 bits/byte exactly
		let d = Detector::new(2.0);
		let record = d.evaluate(&buf, ContentLabel::Unknown, &stats);
		assert_eq!(record.entropy, Some(2.0));
		assert_eq!(record.verdict, Verdict::Allow, "H == threshold must be allowed (strict >)");
	}

	#[test]
	fn entropy_just_above_threshold_is_blocked() {
		let stats = Stats::default();
		let buf = uniform_alphabet_buffer(4);
		let d = Detector::new(1.999);
		let record = d.evaluate(&buf, ContentLabel::Unknown, &stats);
		assert_eq!(record.verdict, Verdict::Block);
	}

	#[test]
	fn total_writes_increments_on_every_call() {
		let stats = Stats::default();
		let d = detector();
		classify_and_evaluate(&d, b"a", &stats);
		classify_and_evaluate(&d, b"b", &stats);
		assert_eq!(stats.snapshot().total_writes, 2);
	}

	/// A buffer over an alphabet of `n` distinct, equally-frequent byte values has
	/// entropy exactly `log2(n)`.
	fn uniform_alphabet_buffer(n: u8) -> Vec<u8> {
		let mut buf = Vec::new();
		for _ in 0..256 {
			for v in 0..n {
				buf.push(v);
			}
		}
		buf
	}
}
