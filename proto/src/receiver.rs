//! Receiver Engine: cumulative-ACK reassembly with a bounded reorder buffer.
//!
//! Pure logic, no I/O — mirrors the shape of the teacher's
//! `wireguard::tunnel::window` (seen-segment bookkeeping) but tracks byte
//! ranges rather than a fixed-size bitmap, since segments here vary in length
//! and must be delivered to the application rather than merely deduplicated.

use std::collections::HashMap;

use bytes::Bytes;

use crate::packet::Header;

/// 64 KiB, per the data model.
pub const MAX_BUFFER: u32 = 64 * 1024;

/// The cumulative-ack state to report back to the peer after processing a
/// segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckInfo {
	pub ack: u32,
	pub rwnd: u16,
}

/// Result of feeding one data segment to the receiver.
#[derive(Debug, Default)]
pub struct ReceiverEvent {
	/// Payloads newly made contiguous, in the order the bytes were sent.
	/// Never splits a received segment; may be empty.
	pub delivered: Vec<Bytes>,
	/// The cumulative ACK to send back. Always present — a data segment
	/// always provokes an ACK, even a duplicate or an overflow drop.
	pub ack: AckInfo,
}

pub struct Receiver {
	next_expected_seq: u32,
	buffer: HashMap<u32, Bytes>,
	max_buffer: u32,
}

impl Receiver {
	pub fn new() -> Self {
		Self::with_capacity(MAX_BUFFER)
	}

	pub fn with_capacity(max_buffer: u32) -> Self {
		Self { next_expected_seq: 0, buffer: HashMap::new(), max_buffer }
	}

	pub fn next_expected(&self) -> u32 {
		self.next_expected_seq
	}

	fn buffered_len(&self) -> u32 {
		self.buffer.values().map(|p| p.len() as u32).sum()
	}

	pub fn advertised_window(&self) -> u16 {
		self.max_buffer.saturating_sub(self.buffered_len()).min(u16::MAX as u32) as u16
	}

	fn ack(&self) -> AckInfo {
		AckInfo { ack: self.next_expected_seq, rwnd: self.advertised_window() }
	}

	/// Handle an incoming data segment per §4.2 of the protocol design.
	pub fn on_data(&mut self, header: &Header, payload: Bytes) -> ReceiverEvent {
		let seq = header.seq;

		// Old or duplicate: do not buffer, just report current state.
		if seq < self.next_expected_seq {
			return ReceiverEvent { delivered: Vec::new(), ack: self.ack() };
		}

		let span = (seq as u64 + payload.len() as u64).saturating_sub(self.next_expected_seq as u64);
		if span > self.max_buffer as u64 {
			log::debug!("receiver buffer would overflow (seq={seq}, len={}); dropping", payload.len());
			return ReceiverEvent { delivered: Vec::new(), ack: self.ack() };
		}

		self.buffer.insert(seq, payload);

		let mut delivered = Vec::new();
		while let Some(chunk) = self.buffer.remove(&self.next_expected_seq) {
			self.next_expected_seq = self.next_expected_seq.wrapping_add(chunk.len() as u32);
			delivered.push(chunk);
		}

		ReceiverEvent { delivered, ack: self.ack() }
	}
}

impl Default for Receiver {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::packet::Flags;

	fn data_header(seq: u32) -> Header {
		Header { ver: 1, flags: Flags::PSH, conn_id: 1, seq, ack: 0, rwnd: 0 }
	}

	#[test]
	fn in_order_delivery() {
		let mut r = Receiver::new();
		let ev = r.on_data(&data_header(0), Bytes::from_static(b"hello"));
		assert_eq!(ev.delivered, vec![Bytes::from_static(b"hello")]);
		assert_eq!(ev.ack, AckInfo { ack: 5, rwnd: u16::MAX });
		assert_eq!(r.next_expected(), 5);
	}

	#[test]
	fn out_of_order_then_fill_gap() {
		let mut r = Receiver::new();

		// second chunk arrives first; must not be delivered yet
		let ev = r.on_data(&data_header(5), Bytes::from_static(b"world"));
		assert!(ev.delivered.is_empty());
		assert_eq!(r.next_expected(), 0);

		// filling the gap delivers both chunks in order, as two callbacks
		let ev = r.on_data(&data_header(0), Bytes::from_static(b"hello"));
		assert_eq!(ev.delivered, vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")]);
		assert_eq!(r.next_expected(), 10);
	}

	#[test]
	fn duplicate_segment_is_dropped_not_redelivered() {
		let mut r = Receiver::new();
		r.on_data(&data_header(0), Bytes::from_static(b"hello"));

		let ev = r.on_data(&data_header(0), Bytes::from_static(b"hello"));
		assert!(ev.delivered.is_empty());
		assert_eq!(ev.ack.ack, 5);
	}

	#[test]
	fn overflow_is_dropped_but_still_acked() {
		let mut r = Receiver::with_capacity(10);
		let huge = vec![0u8; 20];
		let ev = r.on_data(&data_header(0), Bytes::from(huge));
		assert!(ev.delivered.is_empty());
		assert_eq!(ev.ack, AckInfo { ack: 0, rwnd: 10 });
	}

	#[test]
	fn advertised_window_shrinks_with_buffered_gap() {
		let mut r = Receiver::with_capacity(100);
		r.on_data(&data_header(10), Bytes::from_static(b"xxxxx"));
		assert_eq!(r.advertised_window(), 95);
	}
}
