//! Immutable cached token values.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

// Roughly 68 years; keeps instant arithmetic far from overflow.
const MAX_EXPIRES_IN_SECS: u64 = i32::MAX as u64;

/// Bearer token plus the instant after which it must no longer be served.
///
/// Values are never mutated in place. A refresh builds a new [`CachedToken`] and replaces
/// the previous one wholesale.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
	/// Opaque bearer value.
	pub value: TokenSecret,
	/// Instant the token was stored.
	pub fetched_at: OffsetDateTime,
	/// Instant from which the token is considered invalid.
	pub expires_at: OffsetDateTime,
}
impl CachedToken {
	/// Builds a token whose expiry is `fetched_at + (expires_in - safety_buffer)`.
	///
	/// `expires_in` falls back to [`DEFAULT_EXPIRES_IN_SECS`]. A buffer larger than the
	/// lifetime produces a token that is already invalid at `fetched_at`.
	pub fn new(
		value: TokenSecret,
		expires_in: Option<u64>,
		safety_buffer: Duration,
		fetched_at: OffsetDateTime,
	) -> Self {
		let expires_in = expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).min(MAX_EXPIRES_IN_SECS);
		let lifetime = Duration::seconds(i64::try_from(expires_in).unwrap_or(i64::MAX));
		let usable = lifetime.saturating_sub(safety_buffer);
		let usable = if usable.is_negative() { Duration::ZERO } else { usable };
		let expires_at = fetched_at.checked_add(usable).unwrap_or(fetched_at);

		Self { value, fetched_at, expires_at }
	}

	/// Returns `true` iff `instant < expires_at`.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		instant < self.expires_at
	}

	/// Time left before expiry at `instant`, clamped at zero.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		let left = self.expires_at - instant;

		if left.is_negative() { Duration::ZERO } else { left }
	}
}
impl Debug for CachedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CachedToken")
			.field("value", &"<redacted>")
			.field("fetched_at", &self.fetched_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}
