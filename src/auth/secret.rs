//! Redacting wrapper for bearer tokens and client secrets.

// self
use crate::_prelude::*;

/// Secret string that never prints its contents.
///
/// Used for both access tokens and the OAuth client secret. Cloning is cheap because the
/// value is reference counted, which matters when one token is handed to many waiters.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct TokenSecret(Arc<str>);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		let value: String = value.into();

		Self(Arc::from(value))
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the secret holds no characters.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Formats the value as an `Authorization: Bearer` header value.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.expose())
	}
}
impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}
impl From<&str> for TokenSecret {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secret_formatters_redact() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");
		assert_eq!(secret.expose(), "super-secret");
	}

	#[test]
	fn bearer_header_uses_raw_value() {
		assert_eq!(TokenSecret::from("tok1").bearer(), "Bearer tok1");
	}

	#[test]
	fn deserializes_from_plain_string() {
		let secret: TokenSecret =
			serde_json::from_str("\"from-config\"").expect("Secret should deserialize.");

		assert_eq!(secret.expose(), "from-config");
	}
}
