//! Single-flight client-credentials token cache plus an authenticated request gateway that
//! retries once when the upstream rejects a stale token.
//!
//! - [`store::TokenStore`] holds at most one token and applies the safety buffer.
//! - [`fetcher::ClientCredentialsFetcher`] performs the `client_credentials` exchange.
//! - [`manager::TokenManager`] serves cached tokens and collapses concurrent refreshes.
//! - [`gateway::AuthenticatedRequestGateway`] attaches the bearer token and handles `401`.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod gateway;
pub mod manager;
pub mod obs;
pub mod store;
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and helpers shared by unit tests, integration tests, and demos.

	pub use crate::_prelude::*;

	// self
	use crate::{config::ClientConfig, gateway::AuthenticatedRequestGateway, manager::TokenManager};

	/// Client identifier used across tests.
	pub const TEST_CLIENT_ID: &str = "abc";
	/// Client secret used across tests.
	pub const TEST_CLIENT_SECRET: &str = "xyz";

	/// Builds a config pointing at `token_url` with the shared test credentials.
	pub fn test_config(token_url: &str) -> ClientConfig {
		ClientConfig::builder(Url::parse(token_url).expect("Test token URL should parse."))
			.client_id(TEST_CLIENT_ID)
			.client_secret(TEST_CLIENT_SECRET)
			.build()
			.expect("Test config should build.")
	}

	/// Builds a gateway backed by a reqwest manager for `token_url`.
	pub fn build_test_gateway(token_url: &str) -> AuthenticatedRequestGateway {
		let manager =
			TokenManager::new(&test_config(token_url)).expect("Test manager should build.");

		AuthenticatedRequestGateway::new(manager)
	}

	/// Parses a URL produced by a mock server.
	pub fn test_url(value: impl AsRef<str>) -> Url {
		Url::parse(value.as_ref()).expect("Mock server URL should parse.")
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
