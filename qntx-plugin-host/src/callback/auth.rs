// SPDX-License-Identifier: Apache-2.0

//! Shared bearer-token authentication for the callback services (§4.4).
//!
//! A mismatch is never surfaced as a gRPC transport error: both
//! unknown-method and unauthorized callers get the same generic
//! "invalid authentication token" payload, at constant time, so a plugin
//! process cannot use response timing to discriminate between the two.

use rand::RngCore;
use zeroize::Zeroizing;

pub const INVALID_TOKEN_MESSAGE: &str = "invalid authentication token";

/// A 256-bit bearer token, generated once per host run and handed to every
/// callback service and every launched plugin's `Initialize` config map
/// under the reserved `_auth_token` key. Held as `Zeroizing<String>` so the
/// hex string is wiped from memory when the last clone drops.
#[derive(Clone)]
pub struct CallbackToken(Zeroizing<String>);

impl CallbackToken {
	pub fn generate() -> Self {
		let mut bytes = Zeroizing::new([0u8; 32]);
		rand::rng().fill_bytes(bytes.as_mut());
		CallbackToken(Zeroizing::new(hex_encode(&bytes)))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Constant-time comparison against a caller-supplied token.
	pub fn matches(&self, candidate: &str) -> bool {
		constant_time_eq(self.0.as_bytes(), candidate.as_bytes())
	}
}

impl std::fmt::Debug for CallbackToken {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("CallbackToken(<redacted>)")
	}
}

fn hex_encode(bytes: &[u8]) -> String {
	const DIGITS: &[u8; 16] = b"0123456789abcdef";
	let mut out = String::with_capacity(bytes.len() * 2);
	for byte in bytes {
		out.push(DIGITS[(byte >> 4) as usize] as char);
		out.push(DIGITS[(byte & 0x0f) as usize] as char);
	}
	out
}

/// Compares two byte strings in time proportional only to the longer of the
/// two lengths, never short-circuiting on the first mismatching byte.
/// Unequal lengths always return `false`, but length itself is not treated
/// as secret here since token length is fixed and public.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}
	let mut diff: u8 = 0;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}
	diff == 0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn generated_token_is_64_hex_chars() {
		let token = CallbackToken::generate();
		assert_eq!(token.as_str().len(), 64);
		assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn matches_only_the_exact_token() {
		let token = CallbackToken::generate();
		assert!(token.matches(token.as_str()));
		assert!(!token.matches("deadbeef"));
	}

	#[test]
	fn constant_time_eq_rejects_different_lengths() {
		assert!(!constant_time_eq(b"abc", b"ab"));
	}

	#[test]
	fn constant_time_eq_accepts_equal_slices() {
		assert!(constant_time_eq(b"abc", b"abc"));
	}
}
