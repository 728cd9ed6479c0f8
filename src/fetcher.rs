//! Credential exchange against the upstream token endpoint.
//!
//! [`TokenFetcher`] is the manager's only dependency on the network. The reqwest-backed
//! [`ClientCredentialsFetcher`] performs the `client_credentials` grant; tests swap in
//! their own implementation to count or script exchanges.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
	header::{ACCEPT, AUTHORIZATION, HeaderValue},
	redirect::Policy,
};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::ClientConfig,
	error::{AuthError, ConfigError, TransportError},
};

/// Boxed future returned by [`TokenFetcher::fetch`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<FetchedToken>> + 'a + Send>>;

const BODY_PREVIEW_LIMIT: usize = 256;

/// Performs one credential exchange per call.
///
/// Implementations must not touch any cache; storing the result is the manager's job.
pub trait TokenFetcher
where
	Self: Send + Sync,
{
	/// Exchanges credentials for a fresh access token.
	fn fetch(&self) -> FetchFuture<'_>;
}

/// Raw outcome of a successful exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedToken {
	/// Access token issued by the upstream.
	pub access_token: TokenSecret,
	/// Lifetime in seconds, if the upstream declared one.
	pub expires_in: Option<u64>,
}

/// `client_credentials` exchange over reqwest.
///
/// Credentials are sent both as HTTP Basic auth and in the form body, which satisfies
/// servers that accept either `client_secret_basic` or `client_secret_post`. Redirects
/// are never followed; a token endpoint answers directly.
#[derive(Clone)]
pub struct ClientCredentialsFetcher {
	client: ReqwestClient,
	token_url: Url,
	client_id: String,
	client_secret: TokenSecret,
	basic: HeaderValue,
}
impl ClientCredentialsFetcher {
	/// Builds a fetcher with its own reqwest client bounded by the configured timeout.
	pub fn new(config: &ClientConfig) -> Result<Self> {
		let client = ReqwestClient::builder()
			.timeout(config.fetch_timeout)
			.redirect(Policy::none())
			.build()
			.map_err(ConfigError::http_client_build)?;

		Self::with_client(config, client)
	}

	/// Wraps an existing reqwest client. The caller owns its timeout and redirect policy.
	pub fn with_client(config: &ClientConfig, client: ReqwestClient) -> Result<Self> {
		let basic = basic_authorization(&config.client_id, config.client_secret.expose())?;

		Ok(Self {
			client,
			token_url: config.token_url.clone(),
			client_id: config.client_id.clone(),
			client_secret: config.client_secret.clone(),
			basic,
		})
	}

	/// Token endpoint this fetcher posts to.
	pub fn token_url(&self) -> &Url {
		&self.token_url
	}

	async fn exchange(&self) -> Result<FetchedToken> {
		let form = [
			("grant_type", "client_credentials"),
			("client_id", self.client_id.as_str()),
			("client_secret", self.client_secret.expose()),
		];
		let response = self
			.client
			.post(self.token_url.clone())
			.header(AUTHORIZATION, self.basic.clone())
			.header(ACCEPT, "application/json")
			.form(&form)
			.send()
			.await
			.map_err(token_endpoint_error)?;
		let status = response.status();
		let body = response.bytes().await.map_err(token_endpoint_error)?;

		if !status.is_success() {
			return Err(AuthError::FetchFailed {
				status: status.as_u16(),
				body: body_preview(&body),
			}
			.into());
		}

		parse_token_response(&body)
	}
}
impl TokenFetcher for ClientCredentialsFetcher {
	fn fetch(&self) -> FetchFuture<'_> {
		Box::pin(self.exchange())
	}
}
impl Debug for ClientCredentialsFetcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientCredentialsFetcher")
			.field("token_url", &self.token_url.as_str())
			.field("client_id", &self.client_id)
			.finish()
	}
}

#[derive(Deserialize)]
struct TokenResponse {
	#[serde(default)]
	access_token: Option<Value>,
	#[serde(default)]
	expires_in: Option<Value>,
}

/// Builds the `Basic base64(client_id:client_secret)` header value.
pub fn basic_authorization(client_id: &str, client_secret: &str) -> Result<HeaderValue> {
	let encoded = STANDARD.encode(format!("{client_id}:{client_secret}"));
	let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
		.map_err(ConfigError::http_client_build)?;

	value.set_sensitive(true);

	Ok(value)
}

/// Builds the sensitive `Bearer {token}` header value.
pub fn bearer_header(token: &TokenSecret) -> Result<HeaderValue> {
	let mut value =
		HeaderValue::from_str(&token.bearer()).map_err(|_| AuthError::InvalidToken)?;

	value.set_sensitive(true);

	Ok(value)
}

fn parse_token_response(body: &[u8]) -> Result<FetchedToken> {
	let de = &mut serde_json::Deserializer::from_slice(body);
	let response: TokenResponse = serde_path_to_error::deserialize(de).map_err(|e| {
		AuthError::MalformedResponse { path: e.path().to_string(), message: e.inner().to_string() }
	})?;
	let access_token = match response.access_token {
		Some(Value::String(token)) if !token.is_empty() => TokenSecret::new(token),
		_ => return Err(AuthError::MissingToken.into()),
	};

	// Reject here so an unsendable token never reaches the cache.
	bearer_header(&access_token)?;

	Ok(FetchedToken { access_token, expires_in: response.expires_in.as_ref().and_then(seconds) })
}

// Some gateways stringify `expires_in`; anything unreadable falls back to the default lifetime.
// A negative lifetime means the token is already expired.
fn seconds(value: &Value) -> Option<u64> {
	let secs = match value {
		Value::Number(n) => n.as_f64()?,
		Value::String(s) => s.trim().parse::<f64>().ok()?,
		_ => return None,
	};

	if secs.is_nan() {
		return None;
	}

	Some(if secs <= 0. { 0 } else { secs as u64 })
}

fn body_preview(body: &[u8]) -> Option<String> {
	if body.is_empty() {
		return None;
	}

	let text = String::from_utf8_lossy(body);

	if text.chars().count() <= BODY_PREVIEW_LIMIT {
		return Some(text.into_owned());
	}

	let mut buf = text.chars().take(BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	Some(buf)
}

fn token_endpoint_error(e: ReqwestError) -> Error {
	TransportError::from_reqwest(TransportError::TOKEN_ENDPOINT, e).into()
}
