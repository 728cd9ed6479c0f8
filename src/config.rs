//! Client credentials and cache tuning for one upstream authorization server.
//!
//! [`ClientConfig`] is validated at construction, whether it comes from
//! [`ClientConfigBuilder`], the process environment, or a deserialized config file.

// std
use std::{env, time::Duration as StdDuration};
// self
use crate::{_prelude::*, auth::TokenSecret, error::ConfigError};

/// Immutable, validated credentials + endpoint + cache tuning.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ClientConfigBuilder")]
pub struct ClientConfig {
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret.
	pub client_secret: TokenSecret,
	/// Token endpoint receiving the `client_credentials` exchange.
	pub token_url: Url,
	/// Time subtracted from the upstream lifetime before a token stops being served.
	pub safety_buffer: Duration,
	/// Upper bound on a single token exchange.
	pub fetch_timeout: StdDuration,
}
impl ClientConfig {
	/// Buffer used when none is configured.
	pub const DEFAULT_SAFETY_BUFFER: Duration = Duration::seconds(300);
	/// Fetch timeout used when none is configured.
	pub const DEFAULT_FETCH_TIMEOUT: StdDuration = StdDuration::from_secs(10);
	/// Environment prefix read by [`from_env`](Self::from_env).
	pub const DEFAULT_ENV_PREFIX: &'static str = "UPSTREAM";

	/// Starts a builder for the given token endpoint.
	pub fn builder(token_url: Url) -> ClientConfigBuilder {
		ClientConfigBuilder::new(token_url)
	}

	/// Reads `UPSTREAM_*` variables from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_env_with_prefix(Self::DEFAULT_ENV_PREFIX)
	}

	/// Reads `{prefix}_TOKEN_URL`, `{prefix}_CLIENT_ID`, `{prefix}_CLIENT_SECRET` and the
	/// optional `{prefix}_SAFETY_BUFFER_SECS` / `{prefix}_FETCH_TIMEOUT_SECS`.
	pub fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
		Self::from_lookup(prefix, |name| env::var(name).ok())
	}

	/// Same as [`from_env_with_prefix`](Self::from_env_with_prefix) with a custom lookup.
	pub fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let required = |suffix: &str| {
			let name = format!("{prefix}_{suffix}");

			lookup(&name).filter(|v| !v.trim().is_empty()).ok_or(ConfigError::MissingEnv { name })
		};
		let optional_secs = |suffix: &str| -> Result<Option<u64>, ConfigError> {
			let name = format!("{prefix}_{suffix}");

			match lookup(&name) {
				Some(raw) => raw
					.trim()
					.parse::<u64>()
					.map(Some)
					.map_err(|_| ConfigError::InvalidEnv { name }),
				None => Ok(None),
			}
		};
		let token_url = Url::parse(required("TOKEN_URL")?.trim())
			.map_err(|source| ConfigError::InvalidTokenUrl { source })?;
		let mut builder = ClientConfigBuilder::new(token_url)
			.client_id(required("CLIENT_ID")?)
			.client_secret(required("CLIENT_SECRET")?);

		if let Some(secs) = optional_secs("SAFETY_BUFFER_SECS")? {
			builder.safety_buffer_secs = Some(secs);
		}
		if let Some(secs) = optional_secs("FETCH_TIMEOUT_SECS")? {
			builder = builder.fetch_timeout(StdDuration::from_secs(secs));
		}

		builder.build()
	}
}
impl Debug for ClientConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret)
			.field("token_url", &self.token_url.as_str())
			.field("safety_buffer", &self.safety_buffer)
			.field("fetch_timeout", &self.fetch_timeout)
			.finish()
	}
}

/// Builder for [`ClientConfig`].
#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfigBuilder {
	/// Token endpoint.
	pub token_url: Url,
	/// OAuth client identifier.
	#[serde(default)]
	pub client_id: String,
	/// OAuth client secret.
	#[serde(default)]
	pub client_secret: String,
	/// Safety buffer in whole seconds, as read from config files and the environment.
	#[serde(default)]
	pub safety_buffer_secs: Option<u64>,
	/// Fetch timeout in whole seconds, as read from config files and the environment.
	#[serde(default)]
	pub fetch_timeout_secs: Option<u64>,
	#[serde(skip)]
	safety_buffer: Option<Duration>,
	#[serde(skip)]
	fetch_timeout: Option<StdDuration>,
}
impl ClientConfigBuilder {
	/// Creates a builder seeded with the token endpoint.
	pub fn new(token_url: Url) -> Self {
		Self {
			token_url,
			client_id: String::new(),
			client_secret: String::new(),
			safety_buffer_secs: None,
			fetch_timeout_secs: None,
			safety_buffer: None,
			fetch_timeout: None,
		}
	}

	/// Sets the client identifier.
	pub fn client_id(mut self, id: impl Into<String>) -> Self {
		self.client_id = id.into();

		self
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = secret.into();

		self
	}

	/// Overrides the safety buffer (defaults to 300 seconds).
	///
	/// Takes precedence over [`safety_buffer_secs`](Self::safety_buffer_secs).
	pub fn safety_buffer(mut self, buffer: Duration) -> Self {
		self.safety_buffer = Some(buffer);

		self
	}

	/// Overrides the fetch timeout (defaults to 10 seconds).
	///
	/// Takes precedence over [`fetch_timeout_secs`](Self::fetch_timeout_secs).
	pub fn fetch_timeout(mut self, timeout: StdDuration) -> Self {
		self.fetch_timeout = Some(timeout);

		self
	}

	/// Consumes the builder and validates the resulting config.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::MissingClientId);
		}
		if self.client_secret.is_empty() {
			return Err(ConfigError::MissingClientSecret);
		}
		if !matches!(self.token_url.scheme(), "http" | "https") {
			return Err(ConfigError::UnsupportedScheme { url: self.token_url.to_string() });
		}

		let safety_buffer = match (self.safety_buffer, self.safety_buffer_secs) {
			(Some(buffer), _) => buffer,
			(None, Some(secs)) => Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)),
			(None, None) => ClientConfig::DEFAULT_SAFETY_BUFFER,
		};

		validate_safety_buffer(safety_buffer)?;

		let fetch_timeout = self
			.fetch_timeout
			.or(self.fetch_timeout_secs.map(StdDuration::from_secs))
			.unwrap_or(ClientConfig::DEFAULT_FETCH_TIMEOUT);

		if fetch_timeout.is_zero() {
			return Err(ConfigError::ZeroFetchTimeout);
		}

		Ok(ClientConfig {
			client_id: self.client_id,
			client_secret: TokenSecret::new(self.client_secret),
			token_url: self.token_url,
			safety_buffer,
			fetch_timeout,
		})
	}
}
impl TryFrom<ClientConfigBuilder> for ClientConfig {
	type Error = ConfigError;

	fn try_from(builder: ClientConfigBuilder) -> Result<Self, Self::Error> {
		builder.build()
	}
}

// A buffer of an hour or more would swallow the default token lifetime entirely.
fn validate_safety_buffer(buffer: Duration) -> Result<(), ConfigError> {
	let max = Duration::seconds(crate::auth::DEFAULT_EXPIRES_IN_SECS as i64);

	if buffer.is_negative() || buffer >= max {
		return Err(ConfigError::SafetyBufferOutOfRange { seconds: buffer.whole_seconds() });
	}

	Ok(())
}
