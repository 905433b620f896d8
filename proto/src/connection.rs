//! Connection State Machine: owns one Receiver and one Sender, and decides,
//! for each inbound segment or application call, what the engine should do
//! next. Pure logic — this module never touches a socket or a thread; it
//! hands back a list of [`Action`]s for the caller to execute.
//!
//! The back-reference problem (the FSM needs to emit packets and notify the
//! application, but shouldn't own a cyclic pointer back to the engine) is
//! solved the way the teacher's `wireguard::tunnel` handles the same shape
//! against its `Tunn` type: the FSM returns data describing what happened,
//! and the caller performs the actual I/O and callback invocation outside
//! any lock.

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::packet::{Flags, Header, PROTOCOL_VERSION};
use crate::receiver::Receiver;
use crate::sender::{Sender, SenderConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
	Listening,
	SynSent,
	SynRecv,
	Established,
	FinWait,
	Closed,
}

/// Something the caller (the engine) must do as a result of feeding an event
/// to a [`Connection`]. A single event may produce several actions.
#[derive(Debug)]
pub enum Action {
	/// Write this header+payload to the connection's peer address.
	Send(Header, Bytes),
	/// Invoke the application's `on_message` callback with this payload.
	Deliver(Bytes),
	/// The connection just reached ESTABLISHED (fires `on_new_connection` on
	/// the accepting side, and unblocks a waiting `connect()` on the
	/// initiating side).
	Established,
	/// The connection just reached CLOSED; invoke `on_disconnect` and remove
	/// it from the engine's map.
	Disconnected,
}

/// Returned by [`Connection::close`] when the connection is already past
/// ESTABLISHED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyClosed;

/// Returned by [`Connection::send`] when called before ESTABLISHED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotEstablished;

pub struct Connection {
	pub conn_id: u32,
	pub state: ConnState,
	pub last_activity: Instant,
	pub receiver: Receiver,
	pub sender: Sender,
	/// ISN the peer presented in its SYN, needed only to ack the handshake;
	/// not wired to `receiver.next_expected_seq`, which per the protocol's
	/// deliberate simplification always starts at 0.
	peer_isn: u32,
	/// Our own ISN, kept around only to re-build the SYN on retransmit.
	local_isn: u32,
	handshake_deadline: Option<Instant>,
	syn_retransmit_at: Option<Instant>,
}

impl Connection {
	/// `app:connect` — the outbound half of the handshake. Returns the new
	/// connection (state SYN_SENT) and the SYN to transmit.
	pub fn connect(now: Instant, isn: u32, timeout: Duration, rto: Duration, sender_config: SenderConfig, max_buffer: u32) -> (Connection, Header) {
		let receiver = Receiver::with_capacity(max_buffer);
		let header = Header { ver: PROTOCOL_VERSION, flags: Flags::SYN, conn_id: 0, seq: isn, ack: 0, rwnd: receiver.advertised_window() };

		let conn = Connection {
			conn_id: 0,
			state: ConnState::SynSent,
			last_activity: now,
			receiver,
			sender: Sender::new(0, isn, sender_config),
			peer_isn: 0,
			local_isn: isn,
			handshake_deadline: Some(now + timeout),
			syn_retransmit_at: Some(now + rto),
		};

		(conn, header)
	}

	/// `rx SYN` on a fresh peer address — the inbound half of the handshake.
	/// Returns the new connection (state SYN_RECV) and the SYN+ACK to send.
	pub fn accept(now: Instant, conn_id: u32, server_isn: u32, client_syn_seq: u32, sender_config: SenderConfig, max_buffer: u32) -> (Connection, Header) {
		let receiver = Receiver::with_capacity(max_buffer);
		let header = Header { ver: PROTOCOL_VERSION, flags: Flags::SYN | Flags::ACK, conn_id, seq: server_isn, ack: client_syn_seq.wrapping_add(1), rwnd: receiver.advertised_window() };

		let conn = Connection {
			conn_id,
			state: ConnState::SynRecv,
			last_activity: now,
			receiver,
			sender: Sender::new(conn_id, server_isn, sender_config),
			peer_isn: client_syn_seq,
			local_isn: server_isn,
			handshake_deadline: None,
			syn_retransmit_at: None,
		};

		(conn, header)
	}

	/// Dispatch one inbound segment per the state table. `payload` is empty
	/// for control-only segments (SYN, SYN|ACK, bare ACK, FIN).
	pub fn on_segment(&mut self, header: &Header, payload: Bytes, now: Instant) -> Vec<Action> {
		match self.state {
			ConnState::SynSent => self.on_segment_syn_sent(header, now),
			ConnState::SynRecv => self.on_segment_syn_recv(header, now),
			ConnState::Established => self.on_segment_established(header, payload, now),
			ConnState::FinWait => self.on_segment_fin_wait(header, now),
			ConnState::Listening | ConnState::Closed => Vec::new(),
		}
	}

	fn on_segment_syn_sent(&mut self, header: &Header, now: Instant) -> Vec<Action> {
		if !(header.flags.contains(Flags::SYN) && header.flags.contains(Flags::ACK)) {
			return Vec::new();
		}

		self.conn_id = header.conn_id;
		self.sender.set_conn_id(self.conn_id);
		self.peer_isn = header.seq;
		self.state = ConnState::Established;
		self.last_activity = now;
		self.handshake_deadline = None;
		self.syn_retransmit_at = None;

		let ack = Header::ack_only(self.conn_id, header.seq.wrapping_add(1), self.receiver.advertised_window());
		log::info!("conn {}: handshake complete (client side)", self.conn_id);
		vec![Action::Send(ack, Bytes::new()), Action::Established]
	}

	fn on_segment_syn_recv(&mut self, header: &Header, now: Instant) -> Vec<Action> {
		if header.flags != Flags::ACK {
			return Vec::new();
		}

		self.state = ConnState::Established;
		self.last_activity = now;
		log::info!("conn {}: handshake complete (server side)", self.conn_id);
		vec![Action::Established]
	}

	fn on_segment_established(&mut self, header: &Header, payload: Bytes, now: Instant) -> Vec<Action> {
		if header.flags.contains(Flags::FIN) {
			self.state = ConnState::Closed;
			self.last_activity = now;
			let ack = Header::ack_only(self.conn_id, self.receiver.next_expected(), self.receiver.advertised_window());
			log::info!("conn {}: peer closed, acking FIN", self.conn_id);
			return vec![Action::Send(ack, Bytes::new()), Action::Disconnected];
		}

		self.last_activity = now;

		if !payload.is_empty() || header.flags.contains(Flags::PSH) {
			let event = self.receiver.on_data(header, payload);
			let mut actions: Vec<Action> = event.delivered.into_iter().map(Action::Deliver).collect();
			let ack = Header::ack_only(self.conn_id, event.ack.ack, event.ack.rwnd);
			actions.push(Action::Send(ack, Bytes::new()));
			return actions;
		}

		if header.flags.contains(Flags::ACK) {
			return self.sender.on_ack(header, now).into_iter().map(|(h, p)| Action::Send(h, p)).collect();
		}

		Vec::new()
	}

	fn on_segment_fin_wait(&mut self, header: &Header, now: Instant) -> Vec<Action> {
		if header.flags != Flags::ACK {
			return Vec::new();
		}

		self.state = ConnState::Closed;
		self.last_activity = now;
		log::info!("conn {}: FIN acked, closed", self.conn_id);
		vec![Action::Disconnected]
	}

	/// `app:send` — queue and immediately drain as much as the window
	/// allows. Fails with [`NotEstablished`] outside ESTABLISHED.
	pub fn send(&mut self, data: &[u8], now: Instant) -> Result<Vec<Action>, NotEstablished> {
		if self.state != ConnState::Established {
			return Err(NotEstablished);
		}

		self.sender.enqueue(data);
		Ok(self.sender.drain(now).into_iter().map(|(h, p)| Action::Send(h, p)).collect())
	}

	/// `app:close` — emit FIN and move to FIN_WAIT. No-op (surfacing
	/// [`AlreadyClosed`]) outside ESTABLISHED.
	/// The ISN the peer presented during the handshake.
	pub fn peer_isn(&self) -> u32 {
		self.peer_isn
	}

	pub fn close(&mut self, now: Instant) -> Result<Action, AlreadyClosed> {
		if self.state != ConnState::Established {
			return Err(AlreadyClosed);
		}

		self.state = ConnState::FinWait;
		self.last_activity = now;
		let fin = Header { ver: PROTOCOL_VERSION, flags: Flags::FIN, conn_id: self.conn_id, seq: 0, ack: 0, rwnd: 0 };
		log::info!("conn {}: closing, FIN sent", self.conn_id);
		Ok(Action::Send(fin, Bytes::new()))
	}

	/// Drive the sender's RTO machinery. Returns the retransmissions to send
	/// plus, if the connection just died, a [`Action::Disconnected`].
	pub fn check_rto(&mut self, now: Instant) -> Vec<Action> {
		if self.state != ConnState::Established {
			return Vec::new();
		}

		let outcome = self.sender.check_rto(now);
		let mut actions: Vec<Action> = outcome.retransmits.into_iter().map(|(h, p)| Action::Send(h, p)).collect();

		if outcome.dead {
			self.state = ConnState::Closed;
			log::warn!("conn {}: declared dead after exhausting retransmission budget", self.conn_id);
			actions.push(Action::Disconnected);
		}

		actions
	}

	/// Handshake watchdog for SYN_SENT: resend the SYN on an RTO cadence, or
	/// report timeout once `connect()`'s deadline has passed.
	pub fn check_handshake(&mut self, now: Instant, rto: Duration) -> HandshakeTick {
		if self.state != ConnState::SynSent {
			return HandshakeTick::Idle;
		}

		if let Some(deadline) = self.handshake_deadline {
			if now >= deadline {
				self.state = ConnState::Closed;
				return HandshakeTick::TimedOut;
			}
		}

		if let Some(at) = self.syn_retransmit_at {
			if now >= at {
				self.syn_retransmit_at = Some(now + rto);
				let syn = Header { ver: PROTOCOL_VERSION, flags: Flags::SYN, conn_id: 0, seq: self.local_isn, ack: 0, rwnd: self.receiver.advertised_window() };
				return HandshakeTick::Resend(syn);
			}
		}

		HandshakeTick::Idle
	}
}

#[derive(Debug)]
pub enum HandshakeTick {
	Idle,
	Resend(Header),
	TimedOut,
}
