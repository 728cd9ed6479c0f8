//! Outbound requests carrying the managed bearer token.
//!
//! [`AuthenticatedRequestGateway`] attaches the current token to each call. When the
//! upstream answers `401`, it forces exactly one token refresh and resends the request
//! once. Any other status, transport error, or timeout goes straight back to the caller.
//!
//! ```text
//! UNAUTHENTICATED -> SENT(T1) -> DONE
//!                             -> 401 -> REFRESHING -> SENT(T2) -> DONE
//! ```

// std
use std::time::Duration as StdDuration;
// crates.io
use reqwest::{
	Method, Response, StatusCode,
	header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	error::{AuthError, ConfigError, TransportError},
	fetcher::bearer_header,
	manager::TokenManager,
	obs::{self, OpKind, OpOutcome, OpSpan},
};

/// Per-request settings. The body is kept as bytes so the retry can resend it.
#[derive(Clone, Debug)]
pub struct RequestOptions {
	/// HTTP method (defaults to `GET`).
	pub method: Method,
	/// Caller headers; any `Authorization` entry is replaced by the bearer token.
	pub headers: HeaderMap,
	/// Query pairs appended to the URL.
	pub query: Vec<(String, String)>,
	/// Request body.
	pub body: Option<Vec<u8>>,
	/// Per-request timeout overriding the client default.
	pub timeout: Option<StdDuration>,
}
impl RequestOptions {
	/// Creates options for the given method.
	pub fn new(method: Method) -> Self {
		Self { method, headers: HeaderMap::new(), query: Vec::new(), body: None, timeout: None }
	}

	/// `GET` with no body.
	pub fn get() -> Self {
		Self::new(Method::GET)
	}

	/// `POST` with no body.
	pub fn post() -> Self {
		Self::new(Method::POST)
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Appends a query pair.
	pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Sets a raw body together with its content type.
	pub fn with_body(mut self, content_type: HeaderValue, body: impl Into<Vec<u8>>) -> Self {
		self.headers.insert(CONTENT_TYPE, content_type);
		self.body = Some(body.into());

		self
	}

	/// Encodes `pairs` as an `application/x-www-form-urlencoded` body.
	pub fn with_form<I, K, V>(self, pairs: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: AsRef<str>,
	{
		let body =
			url::form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();

		self.with_body(HeaderValue::from_static("application/x-www-form-urlencoded"), body)
	}

	/// Serializes `body` as JSON.
	pub fn with_json<T>(self, body: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		let bytes = serde_json::to_vec(body)
			.map_err(|e| ConfigError::RequestBody { message: e.to_string() })?;

		Ok(self.with_body(HeaderValue::from_static("application/json"), bytes))
	}

	/// Overrides the timeout for this request only.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = Some(timeout);

		self
	}
}
impl Default for RequestOptions {
	fn default() -> Self {
		Self::get()
	}
}

/// Bearer-attaching HTTP gateway backed by a shared [`TokenManager`].
#[derive(Clone, Debug)]
pub struct AuthenticatedRequestGateway {
	client: ReqwestClient,
	manager: TokenManager,
}
impl AuthenticatedRequestGateway {
	/// Creates a gateway with a default reqwest client.
	pub fn new(manager: TokenManager) -> Self {
		Self::with_client(manager, ReqwestClient::default())
	}

	/// Creates a gateway around an existing reqwest client.
	pub fn with_client(manager: TokenManager, client: ReqwestClient) -> Self {
		Self { client, manager }
	}

	/// Token manager used for every call.
	pub fn manager(&self) -> &TokenManager {
		&self.manager
	}

	/// Sends `options` to `url` with a bearer token, retrying once after a `401`.
	///
	/// HTTP error statuses are returned as responses, including a second `401`. Errors are
	/// reserved for token acquisition failures and transport problems.
	pub async fn request(&self, url: Url, options: RequestOptions) -> Result<Response> {
		const KIND: OpKind = OpKind::GatewayRequest;

		let span = OpSpan::new(KIND, "request");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span
			.instrument(async {
				let token = self.manager.get_token(false).await?;
				let first = self.send(&url, &options, &token).await?;

				if first.status() != StatusCode::UNAUTHORIZED {
					return Ok(first);
				}

				obs::record_op_outcome(KIND, OpOutcome::Retry);
				obs::debug_event!(url = url.as_str(), "upstream returned 401; forcing token refresh");

				drop(first);

				let token = self.manager.get_token(true).await?;
				let retried = self.send(&url, &options, &token).await?;

				#[cfg(feature = "tracing")]
				if retried.status() == StatusCode::UNAUTHORIZED {
					::tracing::warn!(url = url.as_str(), "upstream rejected the refreshed token");
				}

				Ok(retried)
			})
			.await;

		match &result {
			Ok(_) => obs::record_op_outcome(KIND, OpOutcome::Success),
			Err(e) => {
				obs::record_op_outcome(KIND, OpOutcome::Failure);
				obs::warn_failure(KIND, e);
			},
		}

		result
	}

	/// Same as [`request`](Self::request), but a `401` that survives the retry becomes
	/// [`AuthError::Unauthorized`].
	pub async fn request_authorized(&self, url: Url, options: RequestOptions) -> Result<Response> {
		let response = self.request(url.clone(), options).await?;

		if response.status() == StatusCode::UNAUTHORIZED {
			return Err(AuthError::Unauthorized { url: url.to_string() }.into());
		}

		Ok(response)
	}

	/// Authenticated `GET`.
	pub async fn get(&self, url: Url) -> Result<Response> {
		self.request(url, RequestOptions::get()).await
	}

	/// Authenticated `POST` with a JSON body.
	pub async fn post_json<T>(&self, url: Url, body: &T) -> Result<Response>
	where
		T: ?Sized + Serialize,
	{
		self.request(url, RequestOptions::post().with_json(body)?).await
	}

	async fn send(
		&self,
		url: &Url,
		options: &RequestOptions,
		token: &TokenSecret,
	) -> Result<Response> {
		let mut headers = options.headers.clone();

		headers.insert(AUTHORIZATION, bearer_header(token)?);

		let mut builder =
			self.client.request(options.method.clone(), url.clone()).headers(headers);

		if !options.query.is_empty() {
			builder = builder.query(&options.query);
		}
		if let Some(body) = &options.body {
			builder = builder.body(body.clone());
		}
		if let Some(timeout) = options.timeout {
			builder = builder.timeout(timeout);
		}

		builder
			.send()
			.await
			.map_err(|e| TransportError::from_reqwest(TransportError::UPSTREAM, e).into())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn options_builders_compose() {
		let options = RequestOptions::post()
			.with_header(HeaderName::from_static("x-csrf-token"), HeaderValue::from_static("fetch"))
			.with_query("$top", "10")
			.with_json(&serde_json::json!({ "claim": 1 }))
			.expect("JSON body should serialize.")
			.with_timeout(StdDuration::from_secs(3));

		assert_eq!(options.method, Method::POST);
		assert_eq!(
			options.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
			Some("application/json")
		);
		assert_eq!(options.query, vec![("$top".to_owned(), "10".to_owned())]);
		assert_eq!(options.body.as_deref(), Some(&br#"{"claim":1}"#[..]));
		assert_eq!(options.timeout, Some(StdDuration::from_secs(3)));
	}

	#[test]
	fn form_body_is_urlencoded() {
		let options = RequestOptions::post().with_form([("grant", "a b"), ("scope", "x&y")]);

		assert_eq!(options.body.as_deref(), Some(&b"grant=a+b&scope=x%26y"[..]));
		assert_eq!(
			options.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
			Some("application/x-www-form-urlencoded")
		);
	}

	#[test]
	fn bearer_header_is_sensitive() {
		let header = bearer_header(&TokenSecret::from("tok1")).expect("Header should build.");

		assert_eq!(header.to_str().expect("Header should be ASCII."), "Bearer tok1");
		assert!(header.is_sensitive());
	}

	#[test]
	fn bearer_header_rejects_control_characters() {
		let err = bearer_header(&TokenSecret::from("bad\ntoken"))
			.expect_err("Newlines cannot appear in header values.");

		assert_eq!(err.as_auth(), Some(&AuthError::InvalidToken));
	}
}
