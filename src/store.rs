//! In-memory slot holding at most one cached bearer token.
//!
//! [`TokenStore`] is pure state: it never performs I/O and never decides when to fetch.
//! The owning [`TokenManager`](crate::manager::TokenManager) is its only writer.

// self
use crate::{
	_prelude::*,
	auth::{CachedToken, TokenSecret},
	clock::{Clock, SystemClock},
};

/// Single-slot token cache with a safety buffer applied on every write.
pub struct TokenStore {
	slot: RwLock<Option<CachedToken>>,
	safety_buffer: Duration,
	clock: Arc<dyn Clock>,
}
impl TokenStore {
	/// Creates an empty store reading the system clock.
	pub fn new(safety_buffer: Duration) -> Self {
		Self::with_clock(safety_buffer, Arc::new(SystemClock))
	}

	/// Creates an empty store reading the provided clock.
	pub fn with_clock(safety_buffer: Duration, clock: Arc<dyn Clock>) -> Self {
		Self { slot: RwLock::new(None), safety_buffer, clock }
	}

	/// Safety buffer subtracted from every upstream lifetime.
	pub fn safety_buffer(&self) -> Duration {
		self.safety_buffer
	}

	/// Current instant according to the store's clock.
	pub fn now(&self) -> OffsetDateTime {
		self.clock.now()
	}

	/// Returns `true` iff a token is present and has not reached its expiry.
	pub fn is_valid(&self) -> bool {
		self.is_valid_at(self.now())
	}

	/// Validity check against an explicit instant.
	pub fn is_valid_at(&self, instant: OffsetDateTime) -> bool {
		self.slot.read().as_ref().is_some_and(|token| token.is_valid_at(instant))
	}

	/// Stores `token`, replacing any previous value, and returns the stored record.
	///
	/// `expires_in` is the upstream lifetime in seconds; `None` means one hour.
	pub fn set(&self, token: impl Into<TokenSecret>, expires_in: Option<u64>) -> CachedToken {
		self.set_at(token, expires_in, self.now())
	}

	/// Same as [`set`](Self::set) with an explicit fetch instant.
	pub fn set_at(
		&self,
		token: impl Into<TokenSecret>,
		expires_in: Option<u64>,
		instant: OffsetDateTime,
	) -> CachedToken {
		let cached = CachedToken::new(token.into(), expires_in, self.safety_buffer, instant);

		*self.slot.write() = Some(cached.clone());

		cached
	}

	/// Empties the slot.
	pub fn clear(&self) {
		self.slot.write().take();
	}

	/// Raw token value without any validity check.
	pub fn get(&self) -> Option<TokenSecret> {
		self.slot.read().as_ref().map(|token| token.value.clone())
	}

	/// Full copy of the cached record, valid or not.
	pub fn snapshot(&self) -> Option<CachedToken> {
		self.slot.read().clone()
	}

	/// Token value only when it is still valid.
	pub fn valid_token(&self) -> Option<TokenSecret> {
		self.valid_token_at(self.now())
	}

	/// Same as [`valid_token`](Self::valid_token) with an explicit instant.
	pub fn valid_token_at(&self, instant: OffsetDateTime) -> Option<TokenSecret> {
		self.slot
			.read()
			.as_ref()
			.filter(|token| token.is_valid_at(instant))
			.map(|token| token.value.clone())
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenStore")
			.field("cached", &*self.slot.read())
			.field("safety_buffer", &self.safety_buffer)
			.finish()
	}
}
