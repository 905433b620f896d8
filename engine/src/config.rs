use std::time::Duration;

use rdt_proto::sender::SenderConfig;

/// Tunable constants for an [`crate::Engine`], grouped the way the teacher
/// groups timer tunables as a cluster of constants near their owning module.
/// The `Default` impl matches the literal values named in the data model.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
	pub mss: usize,
	pub initial_rto: Duration,
	pub rto_ceiling: Duration,
	pub max_retries: u32,
	pub connect_timeout: Duration,
	pub max_buffer: u32,
	/// If set, an ESTABLISHED connection whose `last_activity` exceeds this
	/// is reaped by the timer wheel even with no FIN exchange. Disabled by
	/// default to keep default behavior identical to the protocol as
	/// specified.
	pub idle_timeout: Option<Duration>,
	/// How often the timer-wheel thread wakes to scan for expired RTOs,
	/// handshake deadlines, and (if enabled) idle connections.
	pub timer_tick: Duration,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			mss: rdt_proto::MSS,
			initial_rto: Duration::from_secs(1),
			rto_ceiling: Duration::from_secs(64),
			max_retries: 10,
			connect_timeout: Duration::from_secs(5),
			max_buffer: rdt_proto::MAX_BUFFER,
			idle_timeout: None,
			timer_tick: Duration::from_millis(100),
		}
	}
}

impl EngineConfig {
	pub(crate) fn sender_config(&self) -> SenderConfig {
		SenderConfig { mss: self.mss, initial_rto: self.initial_rto, rto_ceiling: self.rto_ceiling, max_retries: self.max_retries }
	}
}
