//! Single-flight token orchestration.
//!
//! [`TokenManager`] serves cached tokens to any number of concurrent callers and makes sure
//! that at most one exchange is in flight at a time. The in-flight exchange is represented
//! by a shared [`OnceCell`]: the caller that installs it drives the fetch, everyone else
//! awaits the same cell, and the settled `Result` (token or error) is cloned out to each of
//! them. The marker is removed before the result is published, so the next caller after a
//! failure starts a fresh attempt. If the driving caller is dropped mid-fetch, the cell
//! hands initialization to the next waiter instead of staying wedged.

mod metrics;

pub use self::metrics::TokenMetrics;

// crates.io
use async_lock::OnceCell;
// self
use crate::{
	_prelude::*,
	auth::{CachedToken, TokenSecret},
	clock::Clock,
	config::ClientConfig,
	fetcher::{ClientCredentialsFetcher, TokenFetcher},
	obs::{self, OpKind, OpOutcome, OpSpan},
	store::TokenStore,
};

type FetchOutcome = Result<TokenSecret>;
type InFlightRefresh = Arc<OnceCell<FetchOutcome>>;

/// Shared handle over one token cache and its refresh marker.
///
/// Cloning is cheap and every clone observes the same cache, so construct one manager per
/// credential scope and hand clones to collaborators. Separate managers share nothing.
#[derive(Clone)]
pub struct TokenManager {
	inner: Arc<ManagerInner>,
}
struct ManagerInner {
	store: TokenStore,
	fetcher: Arc<dyn TokenFetcher>,
	in_flight: Mutex<Option<InFlightRefresh>>,
	metrics: TokenMetrics,
}
impl TokenManager {
	/// Creates a manager that exchanges `config` credentials over reqwest.
	pub fn new(config: &ClientConfig) -> Result<Self> {
		let fetcher = ClientCredentialsFetcher::new(config)?;

		Ok(Self::with_fetcher(Arc::new(fetcher), config.safety_buffer))
	}

	/// Creates a manager around a custom fetcher and the system clock.
	pub fn with_fetcher(fetcher: Arc<dyn TokenFetcher>, safety_buffer: Duration) -> Self {
		Self::with_store(TokenStore::new(safety_buffer), fetcher)
	}

	/// Creates a manager that takes ownership of a pre-built store.
	///
	/// Use this to inject a [`Clock`] through [`TokenStore::with_clock`]. The store is moved
	/// in, so nothing else can write to it afterwards.
	pub fn with_store(store: TokenStore, fetcher: Arc<dyn TokenFetcher>) -> Self {
		Self {
			inner: Arc::new(ManagerInner {
				store,
				fetcher,
				in_flight: Mutex::new(None),
				metrics: TokenMetrics::default(),
			}),
		}
	}

	/// Convenience constructor pairing a config with an explicit clock.
	pub fn with_clock(config: &ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
		let fetcher = ClientCredentialsFetcher::new(config)?;

		Ok(Self::with_store(TokenStore::with_clock(config.safety_buffer, clock), Arc::new(fetcher)))
	}

	/// Returns a valid bearer token, fetching one if needed.
	///
	/// With `force_refresh` the cache is bypassed. A forced call that finds an exchange
	/// already in flight joins it rather than starting another one.
	pub async fn get_token(&self, force_refresh: bool) -> Result<TokenSecret> {
		let cell = {
			let mut in_flight = self.inner.in_flight.lock();

			let cached = if force_refresh { None } else { self.inner.store.valid_token() };

			if let Some(token) = cached {
				self.inner.metrics.record_cache_hit();
				obs::debug_event!("serving cached token");

				return Ok(token);
			}

			match in_flight.as_ref() {
				Some(existing) => {
					self.inner.metrics.record_join();
					obs::debug_event!(force_refresh, "joining in-flight token fetch");

					existing.clone()
				},
				None => {
					let cell = Arc::new(OnceCell::new());

					*in_flight = Some(cell.clone());

					cell
				},
			}
		};
		let handle = cell.clone();

		cell.get_or_init(move || self.drive(handle)).await.clone()
	}

	/// Shorthand for `get_token(false)`.
	pub async fn token(&self) -> Result<TokenSecret> {
		self.get_token(false).await
	}

	/// Shorthand for `get_token(true)`.
	pub async fn force_refresh(&self) -> Result<TokenSecret> {
		self.get_token(true).await
	}

	/// Drops the cached token so the next call fetches.
	pub fn invalidate(&self) {
		self.inner.store.clear();
	}

	/// Snapshot of the cached token, valid or not.
	pub fn cached(&self) -> Option<CachedToken> {
		self.inner.store.snapshot()
	}

	/// Returns `true` if the cache currently holds a servable token.
	pub fn has_valid_token(&self) -> bool {
		self.inner.store.is_valid()
	}

	/// Returns `true` while an exchange is in flight.
	pub fn is_refreshing(&self) -> bool {
		self.inner.in_flight.lock().is_some()
	}

	/// Counters describing cache behaviour since construction.
	pub fn metrics(&self) -> &TokenMetrics {
		&self.inner.metrics
	}

	// Runs inside the shared cell; whichever caller executes it owns the exchange.
	async fn drive(&self, cell: InFlightRefresh) -> FetchOutcome {
		const KIND: OpKind = OpKind::TokenFetch;

		let span = OpSpan::new(KIND, "fetch");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);
		self.inner.metrics.record_fetch();

		let fetched = span.instrument(self.inner.fetcher.fetch()).await;
		let outcome = {
			let mut in_flight = self.inner.in_flight.lock();
			let outcome = fetched.map(|token| {
				let now = self.inner.store.now();

				self.inner.store.set_at(token.access_token, token.expires_in, now).value
			});

			if in_flight.as_ref().is_some_and(|current| Arc::ptr_eq(current, &cell)) {
				*in_flight = None;
			}

			outcome
		};

		match &outcome {
			Ok(_) => {
				self.inner.metrics.record_success();
				obs::record_op_outcome(KIND, OpOutcome::Success);
			},
			Err(e) => {
				self.inner.metrics.record_failure();
				obs::record_op_outcome(KIND, OpOutcome::Failure);
				obs::warn_failure(KIND, e);
			},
		}

		outcome
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("store", &self.inner.store)
			.field("refreshing", &self.is_refreshing())
			.field("metrics", &self.inner.metrics)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration as StdDuration,
	};
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		clock::ManualClock,
		error::AuthError,
		fetcher::{FetchFuture, FetchedToken},
	};

	const T0: OffsetDateTime = macros::datetime!(2025-01-01 00:00 UTC);

	struct ScriptedFetcher {
		calls: AtomicUsize,
		script: Mutex<VecDeque<FetchOutcomeScript>>,
		delay: StdDuration,
	}
	enum FetchOutcomeScript {
		Token(&'static str, Option<u64>),
		Status(u16),
	}
	impl ScriptedFetcher {
		fn new(script: impl IntoIterator<Item = FetchOutcomeScript>, delay: StdDuration) -> Self {
			Self { calls: AtomicUsize::new(0), script: Mutex::new(script.into_iter().collect()), delay }
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl TokenFetcher for ScriptedFetcher {
		fn fetch(&self) -> FetchFuture<'_> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);

				if !self.delay.is_zero() {
					tokio::time::sleep(self.delay).await;
				}

				let next = self.script.lock().pop_front();

				match next {
					Some(FetchOutcomeScript::Token(value, expires_in)) =>
						Ok(FetchedToken { access_token: value.into(), expires_in }),
					Some(FetchOutcomeScript::Status(status)) =>
						Err(AuthError::FetchFailed { status, body: None }.into()),
					None => Err(AuthError::MissingToken.into()),
				}
			})
		}
	}

	fn manager(fetcher: Arc<ScriptedFetcher>, buffer_secs: i64) -> (TokenManager, ManualClock) {
		let clock = ManualClock::new(T0);
		let store = TokenStore::with_clock(Duration::seconds(buffer_secs), Arc::new(clock.clone()));

		(TokenManager::with_store(store, fetcher), clock)
	}

	#[tokio::test]
	async fn cached_token_is_served_without_fetching() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Token("tok1", Some(3600))],
			StdDuration::ZERO,
		));
		let (manager, _) = manager(fetcher.clone(), 30);
		let first = manager.token().await.expect("First call should fetch a token.");
		let second = manager.token().await.expect("Second call should hit the cache.");

		assert_eq!(first.expose(), "tok1");
		assert_eq!(second, first);
		assert_eq!(fetcher.calls(), 1);
		assert_eq!(manager.metrics().cache_hits(), 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_callers_share_one_fetch() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Token("shared", Some(3600))],
			StdDuration::from_millis(100),
		));
		let (manager, _) = manager(fetcher.clone(), 30);
		let handles = (0..8)
			.map(|_| {
				let manager = manager.clone();

				tokio::spawn(async move { manager.token().await })
			})
			.collect::<Vec<_>>();

		for handle in handles {
			let token = handle
				.await
				.expect("Task should not panic.")
				.expect("Every caller should receive the shared token.");

			assert_eq!(token.expose(), "shared");
		}

		assert_eq!(fetcher.calls(), 1);
		assert!(!manager.is_refreshing());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_callers_share_one_failure() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Status(503)],
			StdDuration::from_millis(200),
		));
		let (manager, _) = manager(fetcher.clone(), 30);
		let handles = (0..4)
			.map(|_| {
				let manager = manager.clone();

				tokio::spawn(async move { manager.token().await })
			})
			.collect::<Vec<_>>();

		for handle in handles {
			let err = handle
				.await
				.expect("Task should not panic.")
				.expect_err("Every caller should observe the failed fetch.");

			assert_eq!(err.as_auth(), Some(&AuthError::FetchFailed { status: 503, body: None }));
		}

		assert_eq!(fetcher.calls(), 1);
		assert_eq!(manager.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn failure_clears_marker_for_next_attempt() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Status(500), FetchOutcomeScript::Token("recovered", None)],
			StdDuration::ZERO,
		));
		let (manager, _) = manager(fetcher.clone(), 30);
		let err = manager.token().await.expect_err("First fetch should fail.");

		assert_eq!(err.as_auth().map(AuthError::code), Some("token_fetch_failed"));
		assert!(!manager.is_refreshing());
		assert!(manager.cached().is_none());

		let token = manager.token().await.expect("Second call should start a fresh fetch.");

		assert_eq!(token.expose(), "recovered");
		assert_eq!(fetcher.calls(), 2);
	}

	#[tokio::test]
	async fn force_refresh_bypasses_valid_cache() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Token("old", Some(3600)), FetchOutcomeScript::Token("new", Some(3600))],
			StdDuration::ZERO,
		));
		let (manager, _) = manager(fetcher.clone(), 30);

		manager.token().await.expect("Initial fetch should succeed.");

		assert!(manager.has_valid_token());

		let refreshed = manager.force_refresh().await.expect("Forced refresh should succeed.");

		assert_eq!(refreshed.expose(), "new");
		assert_eq!(fetcher.calls(), 2);
		assert_eq!(manager.token().await.expect("Cache should hold the new token.").expose(), "new");
	}

	#[tokio::test]
	async fn failed_forced_refresh_keeps_previous_token_served() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Token("still-good", Some(3600)), FetchOutcomeScript::Status(502)],
			StdDuration::ZERO,
		));
		let (manager, _) = manager(fetcher.clone(), 30);

		manager.token().await.expect("Initial fetch should succeed.");
		manager.force_refresh().await.expect_err("Forced refresh should surface the failure.");

		let token = manager.token().await.expect("Valid cached token should still be served.");

		assert_eq!(token.expose(), "still-good");
		assert_eq!(fetcher.calls(), 2);
	}

	#[tokio::test]
	async fn expiry_triggers_exactly_one_new_fetch() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Token("tok1", Some(3600)), FetchOutcomeScript::Token("tok2", Some(3600))],
			StdDuration::ZERO,
		));
		let (manager, clock) = manager(fetcher.clone(), 300);

		assert_eq!(manager.token().await.expect("Fetch at T=0 should succeed.").expose(), "tok1");

		clock.set(T0 + Duration::seconds(3299));

		assert!(manager.has_valid_token());
		assert_eq!(manager.token().await.expect("Cache hit at T=3299.").expose(), "tok1");
		assert_eq!(fetcher.calls(), 1);

		clock.set(T0 + Duration::seconds(3300));

		assert!(!manager.has_valid_token());
		assert_eq!(manager.token().await.expect("Refetch at T=3300.").expose(), "tok2");
		assert_eq!(fetcher.calls(), 2);
	}

	#[tokio::test]
	async fn invalidate_forces_next_fetch() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Token("a", None), FetchOutcomeScript::Token("b", None)],
			StdDuration::ZERO,
		));
		let (manager, _) = manager(fetcher.clone(), 30);

		manager.token().await.expect("Initial fetch should succeed.");
		manager.invalidate();

		assert!(manager.cached().is_none());
		assert_eq!(manager.token().await.expect("Fetch after invalidate.").expose(), "b");
	}

	#[tokio::test]
	async fn dropped_driver_does_not_wedge_marker() {
		let fetcher = Arc::new(ScriptedFetcher::new(
			[FetchOutcomeScript::Token("lost", None), FetchOutcomeScript::Token("kept", None)],
			StdDuration::from_millis(200),
		));
		let (manager, _) = manager(fetcher.clone(), 30);
		let abandoned =
			tokio::time::timeout(StdDuration::from_millis(20), manager.token()).await;

		assert!(abandoned.is_err(), "First call should be cancelled mid-fetch.");
		assert!(manager.is_refreshing());

		let token = manager.token().await.expect("Next caller should take over the fetch.");

		// The cancelled exchange never consumed its script entry.
		assert_eq!(token.expose(), "lost");
		assert_eq!(fetcher.calls(), 2);
		assert!(!manager.is_refreshing());
	}
}
