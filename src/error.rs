//! Gateway-level error types shared by the token cache, fetcher, and request gateway.
//!
//! Every variant is [`Clone`] so a single failed fetch can be handed to each caller that
//! was waiting on it. Transport sources are kept behind [`Arc`] for the same reason.

// self
use crate::_prelude::*;

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Token acquisition or authorization failure.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl Error {
	/// Returns the wrapped [`AuthError`], if any.
	pub fn as_auth(&self) -> Option<&AuthError> {
		match self {
			Self::Auth(e) => Some(e),
			_ => None,
		}
	}
}
impl From<ReqwestError> for Error {
	fn from(e: ReqwestError) -> Self {
		TransportError::from(e).into()
	}
}

/// Failures tied to obtaining or using a bearer token.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthError {
	/// Token endpoint answered with a non-success status.
	#[error("Token endpoint returned HTTP {status}.")]
	FetchFailed {
		/// HTTP status code returned by the token endpoint.
		status: u16,
		/// Truncated response body, when one was readable.
		body: Option<String>,
	},
	/// Token endpoint response parsed but carried no `access_token`.
	#[error("Token endpoint response is missing access_token.")]
	MissingToken,
	/// Token endpoint issued an `access_token` that cannot be sent in an HTTP header.
	#[error("Token endpoint issued an access_token that is not a valid header value.")]
	InvalidToken,
	/// Token endpoint returned a success status with a body that is not valid JSON.
	#[error("Token endpoint returned malformed JSON at `{path}`: {message}.")]
	MalformedResponse {
		/// JSON path where parsing failed.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Upstream still rejected the request after a forced token refresh.
	#[error("Upstream rejected the request to {url} after a token refresh.")]
	Unauthorized {
		/// Target URL of the rejected request.
		url: String,
	},
}
impl AuthError {
	/// Stable machine-readable label for the failure.
	pub const fn code(&self) -> &'static str {
		match self {
			Self::FetchFailed { .. } => "token_fetch_failed",
			Self::MissingToken => "missing_access_token",
			Self::InvalidToken => "invalid_access_token",
			Self::MalformedResponse { .. } => "malformed_token_response",
			Self::Unauthorized { .. } => "unauthorized",
		}
	}
}

/// Configuration and validation failures.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying builder failure.
		#[source]
		source: SharedError,
	},
	/// Client identifier is empty.
	#[error("Client id must not be empty.")]
	MissingClientId,
	/// Client secret is empty.
	#[error("Client secret must not be empty.")]
	MissingClientSecret,
	/// Token URL cannot be parsed.
	#[error("Token URL is invalid.")]
	InvalidTokenUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Token URL uses a scheme other than HTTP(S).
	#[error("Token URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Offending URL.
		url: String,
	},
	/// Safety buffer is negative or swallows the default token lifetime.
	#[error("Safety buffer of {seconds}s is outside the supported range.")]
	SafetyBufferOutOfRange {
		/// Requested buffer in seconds.
		seconds: i64,
	},
	/// Fetch timeout is zero.
	#[error("Fetch timeout must be greater than zero.")]
	ZeroFetchTimeout,
	/// Required environment variable is absent.
	#[error("Environment variable `{name}` is not set.")]
	MissingEnv {
		/// Variable name.
		name: String,
	},
	/// Environment variable could not be parsed.
	#[error("Environment variable `{name}` has an invalid value.")]
	InvalidEnv {
		/// Variable name.
		name: String,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized: {message}.")]
	RequestBody {
		/// Serializer message.
		message: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}

/// Transport-level failures surfaced unchanged from the HTTP client.
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling {target}.")]
	Network {
		/// Which leg failed (`token endpoint` or `upstream`).
		target: &'static str,
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
	/// Request exceeded its deadline.
	#[error("Request to {target} timed out.")]
	Timeout {
		/// Which leg failed (`token endpoint` or `upstream`).
		target: &'static str,
		/// Transport-specific timeout error.
		#[source]
		source: SharedError,
	},
}
impl TransportError {
	pub(crate) const TOKEN_ENDPOINT: &'static str = "the token endpoint";
	pub(crate) const UPSTREAM: &'static str = "the upstream API";

	/// Classifies a reqwest failure for the given leg.
	pub fn from_reqwest(target: &'static str, e: ReqwestError) -> Self {
		if e.is_timeout() {
			Self::Timeout { target, source: Arc::new(e) }
		} else {
			Self::Network { target, source: Arc::new(e) }
		}
	}

	/// Returns `true` for deadline failures.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::from_reqwest(Self::UPSTREAM, e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn auth_codes_are_stable() {
		assert_eq!(AuthError::FetchFailed { status: 500, body: None }.code(), "token_fetch_failed");
		assert_eq!(AuthError::MissingToken.code(), "missing_access_token");
		assert_eq!(AuthError::InvalidToken.code(), "invalid_access_token");
		assert_eq!(AuthError::Unauthorized { url: "https://x".into() }.code(), "unauthorized");
	}

	#[test]
	fn auth_error_converts_and_clones() {
		let err: Error = AuthError::FetchFailed { status: 503, body: Some("down".into()) }.into();
		let copy = err.clone();

		assert_eq!(copy.as_auth(), err.as_auth());
		assert!(err.to_string().contains("503"));
	}

	#[test]
	fn config_error_keeps_source() {
		let source = url::ParseError::RelativeUrlWithoutBase;
		let err: Error = ConfigError::InvalidTokenUrl { source }.into();
		let inner = StdError::source(&err).expect("Config error should expose its source.");

		assert_eq!(inner.to_string(), source.to_string());
	}
}
