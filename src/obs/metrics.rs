// self
use crate::obs::{OpKind, OpOutcome};

/// Records an operation outcome via the global metrics recorder (when enabled).
///
/// Token fetches report `attempt`, `success`, and `failure`. Gateway requests also report
/// `retry` when a `401` triggers the forced refresh, so `retry / attempt` for
/// `op="gateway_request"` is the share of calls that hit a rejected token.
pub fn record_op_outcome(kind: OpKind, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"token_gateway_op_total",
			"op" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}
