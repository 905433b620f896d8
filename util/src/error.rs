/// Conditions detected while decoding or validating a packet off the wire.
///
/// Every variant here is handled the same way by callers: log and drop. This
/// type never crosses the public `Engine` API — see `rdt_engine::TransportError`
/// for the errors an application actually observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
	/// Buffer shorter than a header, or the `length` field doesn't match the
	/// number of payload bytes actually present.
	Malformed,
	/// The one's-complement checksum did not fold to zero.
	ChecksumFail,
}

impl std::fmt::Display for WireError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			WireError::Malformed => write!(f, "malformed packet"),
			WireError::ChecksumFail => write!(f, "checksum verification failed"),
		}
	}
}

impl std::error::Error for WireError {}

pub type WireResult<T> = Result<T, WireError>;
