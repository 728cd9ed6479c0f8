//! Optional observability helpers for token fetches and gateway requests.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `token_gateway.op` with the `op`
//!   (operation) and `stage` (call site) fields, plus debug/warn events on cache hits,
//!   joined fetches, and retries.
//! - Enable `metrics` to increment the `token_gateway_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use self::{metrics::*, tracing::*};

// self
#[cfg(feature = "tracing")] use crate::error::AuthError;
use crate::_prelude::*;

/// Emits a `debug` event when tracing is enabled.
macro_rules! debug_event {
	($($arg:tt)+) => {
		#[cfg(feature = "tracing")]
		::tracing::debug!($($arg)+);
	};
}
pub(crate) use debug_event;

/// Operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Credential exchange against the token endpoint.
	TokenFetch,
	/// Authenticated call through the gateway.
	GatewayRequest,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::TokenFetch => "token_fetch",
			OpKind::GatewayRequest => "gateway_request",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Operation started.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Gateway request retried after a `401`.
	Retry,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
			OpOutcome::Retry => "retry",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Logs a failed operation at `warn` level (when tracing is enabled).
pub fn warn_failure(kind: OpKind, error: &Error) {
	#[cfg(feature = "tracing")]
	{
		::tracing::warn!(
			op = kind.as_str(),
			code = error.as_auth().map(AuthError::code),
			%error,
			"operation failed"
		);
	}

	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, error);
	}
}
