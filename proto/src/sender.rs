//! Sender Engine: chunking, sliding-window transmission, and RTO-driven
//! retransmission. Pure logic, no I/O or sockets — the caller (the engine
//! crate's per-connection glue) is responsible for actually writing the
//! packets this module hands back onto the wire and for calling
//! [`Sender::check_rto`] periodically from a timer thread.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::packet::{Flags, Header, MSS};

/// Tunables for a [`Sender`], matching the literal constants in the data
/// model (MSS=1400, RTO=1s, ceiling=64s, max_retries=10).
#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
	pub mss: usize,
	pub initial_rto: Duration,
	pub rto_ceiling: Duration,
	pub max_retries: u32,
}

impl Default for SenderConfig {
	fn default() -> Self {
		Self { mss: MSS, initial_rto: Duration::from_secs(1), rto_ceiling: Duration::from_secs(64), max_retries: 10 }
	}
}

struct InFlight {
	header: Header,
	payload: Bytes,
	send_time: Instant,
	current_rto: Duration,
	deadline: Instant,
	/// Karn's algorithm: don't sample RTT off a segment that's been
	/// retransmitted, since we can no longer tell which transmission the
	/// ack actually corresponds to.
	retransmitted: bool,
}

/// Packets produced by [`Sender::check_rto`].
pub struct RtoOutcome {
	/// Segments to resend verbatim (same header, same payload).
	pub retransmits: Vec<(Header, Bytes)>,
	/// `true` once `max_retries` consecutive retransmission rounds have
	/// passed with no acknowledged progress; the connection should be torn
	/// down.
	pub dead: bool,
}

pub struct Sender {
	conn_id: u32,
	config: SenderConfig,
	base_seq: u32,
	next_seq: u32,
	send_queue: VecDeque<Bytes>,
	in_flight: BTreeMap<u32, InFlight>,
	peer_rwnd: u16,
	retries_since_progress: u32,
	rtt_samples: VecDeque<Duration>,
}

const RTT_SAMPLE_CAP: usize = 16;

impl Sender {
	pub fn new(conn_id: u32, initial_seq: u32, config: SenderConfig) -> Self {
		Self {
			conn_id,
			config,
			base_seq: initial_seq,
			next_seq: initial_seq,
			send_queue: VecDeque::new(),
			in_flight: BTreeMap::new(),
			// Assume nothing about the peer's buffer until its first ACK arrives.
			peer_rwnd: u16::MAX,
			retries_since_progress: 0,
			rtt_samples: VecDeque::with_capacity(RTT_SAMPLE_CAP),
		}
	}

	/// Split `data` into MSS-sized chunks, preserving order, and queue them.
	/// Does not transmit by itself — call [`Sender::drain`] after.
	pub fn enqueue(&mut self, data: &[u8]) {
		for chunk in data.chunks(self.config.mss) {
			self.send_queue.push_back(Bytes::copy_from_slice(chunk));
		}
	}

	pub fn in_flight_len(&self) -> usize {
		self.in_flight.len()
	}

	pub fn queue_len(&self) -> usize {
		self.send_queue.len()
	}

	/// Adopt the server-assigned connection id once the handshake completes;
	/// the client doesn't know it before then.
	pub fn set_conn_id(&mut self, conn_id: u32) {
		self.conn_id = conn_id;
	}

	/// Transmit as many queued chunks as the peer's advertised window allows.
	pub fn drain(&mut self, now: Instant) -> Vec<(Header, Bytes)> {
		let mut out = Vec::new();

		while let Some(head) = self.send_queue.front() {
			let in_flight_bytes = self.next_seq.wrapping_sub(self.base_seq) as u64;
			if in_flight_bytes + head.len() as u64 > self.peer_rwnd as u64 {
				break;
			}

			let payload = self.send_queue.pop_front().unwrap();
			let seq = self.next_seq;
			let header = Header { ver: crate::packet::PROTOCOL_VERSION, flags: Flags::PSH, conn_id: self.conn_id, seq, ack: 0, rwnd: 0 };

			self.next_seq = self.next_seq.wrapping_add(payload.len() as u32);

			self.in_flight.insert(
				seq,
				InFlight {
					header,
					payload: payload.clone(),
					send_time: now,
					current_rto: self.config.initial_rto,
					deadline: now + self.config.initial_rto,
					retransmitted: false,
				},
			);

			out.push((header, payload));
		}

		out
	}

	/// Process a cumulative ACK: retire fully-acked segments, slide the
	/// window, adopt the peer's advertised window, and drain more data if
	/// the window opened up.
	pub fn on_ack(&mut self, header: &Header, now: Instant) -> Vec<(Header, Bytes)> {
		let to_remove: Vec<u32> = self.in_flight.range(..header.ack).map(|(seq, _)| *seq).collect();

		let mut made_progress = false;
		for seq in to_remove {
			if let Some(seg) = self.in_flight.remove(&seq) {
				made_progress = true;
				if !seg.retransmitted {
					let rtt = now.saturating_duration_since(seg.send_time);
					if self.rtt_samples.len() == RTT_SAMPLE_CAP {
						self.rtt_samples.pop_front();
					}
					self.rtt_samples.push_back(rtt);
				}
			}
		}

		if made_progress {
			self.retries_since_progress = 0;
		}

		self.base_seq = header.ack;
		self.peer_rwnd = header.rwnd;

		self.drain(now)
	}

	/// Check all in-flight segments for expired retransmission timers.
	pub fn check_rto(&mut self, now: Instant) -> RtoOutcome {
		let mut retransmits = Vec::new();

		for seg in self.in_flight.values_mut() {
			if seg.deadline > now {
				continue;
			}

			seg.retransmitted = true;
			seg.current_rto = (seg.current_rto * 2).min(self.config.rto_ceiling);
			seg.deadline = now + seg.current_rto;

			retransmits.push((seg.header, seg.payload.clone()));
		}

		if !retransmits.is_empty() {
			self.retries_since_progress += 1;
			log::warn!("conn {}: RTO fired for {} segment(s) ({} consecutive rounds without progress)", self.conn_id, retransmits.len(), self.retries_since_progress);
		}

		RtoOutcome { retransmits, dead: self.retries_since_progress >= self.config.max_retries }
	}

	/// Mean of the most recent (non-retransmitted) RTT samples, if any.
	pub fn smoothed_rtt(&self) -> Option<Duration> {
		if self.rtt_samples.is_empty() {
			return None;
		}
		let total: Duration = self.rtt_samples.iter().sum();
		Some(total / self.rtt_samples.len() as u32)
	}
}
