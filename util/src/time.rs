use std::time::{Duration, Instant};

/// Returns `true` if `since` is farther in the past than `limit`.
#[inline]
pub fn elapsed_since(since: Instant, limit: Duration) -> bool {
	since.elapsed() >= limit
}
