// SPDX-License-Identifier: Apache-2.0

//! Origin policy for inbound WebSocket upgrades (§4.7).
//!
//! Glob matching (`*`/`?`) is implemented by hand rather than pulling in a
//! dependency: the matching alphabet is tiny, and this mirrors the QNTX
//! plugin reference crates' own preference for small hand-rolled matchers
//! over a crate for a single narrow need.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use tracing::warn;

use crate::config::WebSocketConfig;

/// A compiled origin-check policy. Cheap to clone; holds only the allow-list
/// and two booleans.
#[derive(Debug, Clone)]
pub struct OriginPolicy {
	allowed: Vec<String>,
	allow_all: bool,
}

impl OriginPolicy {
	pub fn new(config: &WebSocketConfig) -> Self {
		OriginPolicy {
			allowed: config.allowed_origins.clone(),
			allow_all: config.allow_all,
		}
	}

	/// Decide whether an inbound upgrade request should proceed.
	///
	/// `origin` is the request's `Origin` header value, if present.
	/// `remote_addr` is the TCP peer address, used only for the
	/// absent-Origin localhost-trust fallback.
	pub fn check(&self, origin: Option<&str>, remote_addr: Option<SocketAddr>, path: &str) -> bool {
		if self.allow_all {
			return true;
		}

		let decision = match origin {
			None => remote_addr.map(is_localhost).unwrap_or(false),
			Some(origin) => {
				self.allowed.iter().any(|pattern| pattern == "*")
					|| self
						.allowed
						.iter()
						.any(|pattern| pattern == origin || glob_match(pattern, origin))
			}
		};

		if !decision {
			warn!(
				origin = origin.unwrap_or(""),
				remote_addr = %remote_addr.map(|a| a.to_string()).unwrap_or_default(),
				path,
				allowed = ?self.allowed,
				"rejected websocket upgrade: origin not allowed"
			);
		}

		decision
	}
}

/// True when `addr`'s host is IPv4 loopback (127.0.0.0/8), IPv6 `::1`, or
/// the IPv4-mapped `::ffff:127.0.0.1`.
fn is_localhost(addr: SocketAddr) -> bool {
	match addr.ip() {
		IpAddr::V4(v4) => v4.is_loopback(),
		IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST || v6_is_mapped_loopback(v6),
	}
}

fn v6_is_mapped_loopback(v6: Ipv6Addr) -> bool {
	v6.to_ipv4_mapped().map(|v4| v4.is_loopback()).unwrap_or(false)
}

/// `*` matches any run of characters, `?` matches exactly one. No other
/// metacharacters, no case folding, no implicit anchoring at path
/// boundaries: trailing slashes or paths never match because the whole
/// string must match end to end.
fn glob_match(pattern: &str, text: &str) -> bool {
	let pattern: Vec<char> = pattern.chars().collect();
	let text: Vec<char> = text.chars().collect();
	glob_match_inner(&pattern, &text)
}

fn glob_match_inner(pattern: &[char], text: &[char]) -> bool {
	match pattern.first() {
		None => text.is_empty(),
		Some('*') => {
			// Collapse consecutive `*` and try matching the rest against
			// every suffix of `text`, including the empty suffix.
			let rest = &pattern[1..];
			if glob_match_inner(rest, text) {
				return true;
			}
			for i in 0..text.len() {
				if glob_match_inner(rest, &text[i + 1..]) {
					return true;
				}
			}
			false
		}
		Some('?') => !text.is_empty() && glob_match_inner(&pattern[1..], &text[1..]),
		Some(c) => text.first() == Some(c) && glob_match_inner(&pattern[1..], &text[1..]),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn policy(allowed: &[&str], allow_all: bool) -> OriginPolicy {
		OriginPolicy {
			allowed: allowed.iter().map(|s| s.to_string()).collect(),
			allow_all,
		}
	}

	#[test]
	fn allow_all_accepts_anything() {
		let p = policy(&[], true);
		assert!(p.check(Some("http://evil.com"), None, "/x-ws"));
	}

	#[test]
	fn exact_match_accepts() {
		let p = policy(&["http://localhost:3000"], false);
		assert!(p.check(Some("http://localhost:3000"), None, "/x-ws"));
	}

	#[test]
	fn glob_match_accepts_wildcard_port() {
		let p = policy(&["http://localhost:*"], false);
		assert!(p.check(Some("http://localhost:9999"), None, "/x-ws"));
		assert!(!p.check(Some("http://evil.com"), None, "/x-ws"));
	}

	#[test]
	fn single_star_allow_entry_matches_anything() {
		let p = policy(&["*"], false);
		assert!(p.check(Some("http://evil.com"), None, "/x-ws"));
	}

	#[test]
	fn empty_origin_accepts_only_from_localhost() {
		let p = policy(&["http://localhost:*"], false);
		let local: SocketAddr = "127.0.0.1:54321".parse().unwrap();
		let remote: SocketAddr = "8.8.8.8:54321".parse().unwrap();
		assert!(p.check(None, Some(local), "/x-ws"));
		assert!(!p.check(None, Some(remote), "/x-ws"));
		assert!(!p.check(None, None, "/x-ws"));
	}

	#[test]
	fn ipv6_loopback_is_trusted() {
		let p = policy(&[], false);
		let local: SocketAddr = "[::1]:1234".parse().unwrap();
		assert!(p.check(None, Some(local), "/x-ws"));
	}

	#[test]
	fn rejection_scenario_from_spec() {
		let p = policy(&["http://localhost:*"], false);
		let evil_remote: SocketAddr = "192.168.1.1:1234".parse().unwrap();
		assert!(!p.check(Some("http://evil.com"), Some(evil_remote), "/x-ws"));

		let local: SocketAddr = "127.0.0.1:54321".parse().unwrap();
		assert!(p.check(None, Some(local), "/x-ws"));

		let remote: SocketAddr = "8.8.8.8:54321".parse().unwrap();
		assert!(!p.check(None, Some(remote), "/x-ws"));
	}

	#[test]
	fn trailing_slash_does_not_match() {
		let p = policy(&["http://localhost:3000"], false);
		assert!(!p.check(Some("http://localhost:3000/"), None, "/x-ws"));
	}
}
