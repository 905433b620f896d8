//! The Transport Engine: owns the UDP socket, the peer-address → connection
//! map, the receive-loop thread, and the timer-wheel thread.
//!
//! Grounded on the shape of the teacher's `runtime::exec` loop (bind, poll,
//! dispatch, repeat) but rebuilt on blocking `std::net::UdpSocket` plus real
//! OS threads instead of a single-threaded `stakker` reactor, per the
//! concurrency model this protocol mandates.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use rdt_proto::connection::{Action, Connection as ConnCore, HandshakeTick};
use rdt_proto::packet::{Flags, MAX_DATAGRAM};
use rdt_proto::{deserialize, serialize, verify, ConnState};
use rdt_util::elapsed_since;

use crate::config::EngineConfig;
use crate::conn::ConnEntry;
use crate::error::TransportError;
use crate::handle::Connection;

type NewConnectionCb = Box<dyn Fn(Connection) + Send + Sync>;

struct Shared {
	socket: UdpSocket,
	config: EngineConfig,
	connections: Mutex<HashMap<SocketAddr, Arc<ConnEntry>>>,
	on_new_connection: Mutex<Option<NewConnectionCb>>,
	stopped: AtomicBool,
}

struct Threads {
	recv: Option<JoinHandle<()>>,
	timer: Option<JoinHandle<()>>,
}

/// The public transport engine. Cheap to clone; clones share the same
/// socket, connection map, and background threads.
#[derive(Clone)]
pub struct Engine {
	shared: Arc<Shared>,
	threads: Arc<Mutex<Threads>>,
}

impl Engine {
	/// Bind a UDP socket to `local_port` and start the receive-loop and
	/// timer-wheel threads.
	pub fn bind(local_port: u16, config: EngineConfig) -> io::Result<Engine> {
		let socket = UdpSocket::bind(("127.0.0.1", local_port))?;
		// A bounded timeout lets the receive loop notice `stop()` without a
		// dedicated wakeup socket.
		socket.set_read_timeout(Some(Duration::from_millis(200)))?;

		let shared = Arc::new(Shared {
			socket,
			config,
			connections: Mutex::new(HashMap::new()),
			on_new_connection: Mutex::new(None),
			stopped: AtomicBool::new(false),
		});

		let engine = Engine { shared, threads: Arc::new(Mutex::new(Threads { recv: None, timer: None })) };

		let recv_engine = engine.clone();
		let recv_handle = thread::spawn(move || recv_loop(recv_engine));

		let timer_engine = engine.clone();
		let timer_handle = thread::spawn(move || timer_loop(timer_engine));

		{
			let mut threads = engine.threads.lock().unwrap();
			threads.recv = Some(recv_handle);
			threads.timer = Some(timer_handle);
		}

		Ok(engine)
	}

	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.shared.socket.local_addr()
	}

	/// Register the callback fired once per inbound connection, right after
	/// its handshake completes.
	pub fn on_new_connection(&self, cb: impl Fn(Connection) + Send + Sync + 'static) {
		*self.shared.on_new_connection.lock().unwrap() = Some(Box::new(cb));
	}

	/// Initiate an outbound connection and block until it reaches
	/// ESTABLISHED or `config.connect_timeout` elapses.
	pub fn connect(&self, peer: impl ToSocketAddrs) -> Result<Connection, TransportError> {
		let peer = peer.to_socket_addrs().map_err(|_| TransportError::Timeout)?.next().ok_or(TransportError::Timeout)?;

		let isn: u32 = rand::random();
		let now = Instant::now();
		let config = &self.shared.config;
		let (core, syn) = ConnCore::connect(now, isn, config.connect_timeout, config.initial_rto, config.sender_config(), config.max_buffer);

		let entry = Arc::new(ConnEntry::new(peer, core, false));
		self.shared.connections.lock().unwrap().insert(peer, entry.clone());
		self.send_raw(&syn, peer);

		let guard = entry.core.lock().unwrap();
		let (guard, timed_out) = entry
			.cv
			.wait_timeout_while(guard, config.connect_timeout, |c| c.state == ConnState::SynSent)
			.unwrap();
		let state = guard.state;
		drop(guard);

		if state == ConnState::Established {
			return Ok(Connection::new(self.clone(), entry));
		}

		self.shared.connections.lock().unwrap().remove(&peer);
		if timed_out.timed_out() {
			log::warn!("connect to {peer}: timed out waiting for SYN+ACK");
		}
		Err(TransportError::Timeout)
	}

	pub(crate) fn send(&self, conn: &Connection, data: &[u8]) -> Result<(), TransportError> {
		let actions = {
			let mut core = conn.entry.core.lock().unwrap();
			core.send(data, Instant::now()).map_err(|_| TransportError::NotEstablished)?
		};
		self.apply_actions(&conn.entry, actions);
		Ok(())
	}

	pub(crate) fn close(&self, conn: &Connection) -> Result<(), TransportError> {
		let action = {
			let mut core = conn.entry.core.lock().unwrap();
			core.close(Instant::now()).map_err(|_| TransportError::AlreadyClosed)?
		};
		self.apply_actions(&conn.entry, vec![action]);
		Ok(())
	}

	/// Close the socket, join both background threads, and mark every
	/// connection CLOSED without emitting FIN — an abrupt shutdown, per the
	/// router's shutdown contract.
	pub fn stop(&self) {
		self.shared.stopped.store(true, Ordering::SeqCst);

		for (_, entry) in self.shared.connections.lock().unwrap().drain() {
			let mut core = entry.core.lock().unwrap();
			core.state = ConnState::Closed;
			drop(core);
			entry.cv.notify_all();
		}

		let mut threads = self.threads.lock().unwrap();
		if let Some(h) = threads.recv.take() {
			let _ = h.join();
		}
		if let Some(h) = threads.timer.take() {
			let _ = h.join();
		}
	}

	fn send_raw(&self, header: &rdt_proto::Header, dest: SocketAddr) {
		send_raw_on(&self.shared.socket, header, &[], dest);
	}

	/// Execute a batch of [`Action`]s outside any connection lock: write
	/// packets, deliver messages, and fire callbacks. Returns `true` if the
	/// connection should be removed from the map afterward.
	fn apply_actions(&self, entry: &Arc<ConnEntry>, actions: Vec<Action>) -> bool {
		apply_actions_on(self, entry, actions)
	}
}

fn send_raw_on(socket: &UdpSocket, header: &rdt_proto::Header, payload: &[u8], dest: SocketAddr) {
	let wire = serialize(header, payload);
	if let Err(err) = socket.send_to(&wire, dest) {
		log::warn!("send to {dest} failed: {err}");
	}
}

fn apply_actions_on(engine: &Engine, entry: &Arc<ConnEntry>, actions: Vec<Action>) -> bool {
	let mut disconnected = false;

	for action in actions {
		match action {
			Action::Send(header, payload) => send_raw_on(&engine.shared.socket, &header, &payload, entry.peer_addr),
			Action::Deliver(bytes) => {
				if let Some(cb) = entry.on_message.lock().unwrap().as_ref() {
					cb(bytes);
				}
			}
			Action::Established => {
				entry.cv.notify_all();
				if entry.inbound {
					if let Some(cb) = engine.shared.on_new_connection.lock().unwrap().as_ref() {
						cb(Connection::new(engine.clone(), entry.clone()));
					}
				}
			}
			Action::Disconnected => {
				disconnected = true;
				entry.cv.notify_all();
				if let Some(cb) = entry.on_disconnect.lock().unwrap().as_ref() {
					cb(Connection::new(engine.clone(), entry.clone()));
				}
			}
		}
	}

	disconnected
}

fn recv_loop(engine: Engine) {
	let mut buf = [0u8; MAX_DATAGRAM];

	loop {
		if engine.shared.stopped.load(Ordering::SeqCst) {
			return;
		}

		match engine.shared.socket.recv_from(&mut buf) {
			Ok((n, addr)) => handle_datagram(&engine, &buf[..n], addr),
			Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
			Err(err) => {
				if !engine.shared.stopped.load(Ordering::SeqCst) {
					log::error!("receive loop stopped: {err}");
				}
				return;
			}
		}
	}
}

fn handle_datagram(engine: &Engine, bytes: &[u8], addr: SocketAddr) {
	if bytes.len() > MAX_DATAGRAM {
		log::debug!("dropping oversized datagram from {addr} ({} bytes)", bytes.len());
		return;
	}

	if !verify(bytes) {
		log::debug!("dropping datagram from {addr}: checksum failed");
		return;
	}

	let (header, payload) = match deserialize(bytes) {
		Ok(v) => v,
		Err(err) => {
			log::debug!("dropping malformed datagram from {addr}: {err}");
			return;
		}
	};

	let existing = engine.shared.connections.lock().unwrap().get(&addr).cloned();

	match existing {
		Some(entry) => {
			let now = Instant::now();
			let actions = {
				let mut core = entry.core.lock().unwrap();
				core.on_segment(&header, payload, now)
			};
			if apply_actions_on(engine, &entry, actions) {
				engine.shared.connections.lock().unwrap().remove(&addr);
			}
		}
		None if header.flags.contains(Flags::SYN) && !header.flags.contains(Flags::ACK) => {
			let mut conn_id: u32 = rand::random();
			while conn_id == 0 {
				conn_id = rand::random();
			}
			let server_isn: u32 = rand::random();
			let now = Instant::now();

			let (core, syn_ack) = ConnCore::accept(now, conn_id, server_isn, header.seq, engine.shared.config.sender_config(), engine.shared.config.max_buffer);
			let entry = Arc::new(ConnEntry::new(addr, core, true));
			engine.shared.connections.lock().unwrap().insert(addr, entry);
			log::info!("conn {conn_id}: SYN received from {addr}, replying SYN|ACK");
			send_raw_on(&engine.shared.socket, &syn_ack, &[], addr);
		}
		None => {
			log::debug!("dropping datagram from unknown peer {addr} (not a SYN)");
		}
	}
}

fn timer_loop(engine: Engine) {
	loop {
		thread::sleep(engine.shared.config.timer_tick);
		if engine.shared.stopped.load(Ordering::SeqCst) {
			return;
		}

		let snapshot: Vec<(SocketAddr, Arc<ConnEntry>)> = engine.shared.connections.lock().unwrap().iter().map(|(k, v)| (*k, v.clone())).collect();

		for (addr, entry) in snapshot {
			let now = Instant::now();
			let mut actions = {
				let mut core = entry.core.lock().unwrap();
				let mut actions = core.check_rto(now);

				match core.check_handshake(now, engine.shared.config.initial_rto) {
					HandshakeTick::Idle => {}
					HandshakeTick::Resend(syn) => actions.push(Action::Send(syn, Bytes::new())),
					HandshakeTick::TimedOut => actions.push(Action::Disconnected),
				}

				if let Some(idle) = engine.shared.config.idle_timeout {
					if core.state == ConnState::Established && elapsed_since(core.last_activity, idle) {
						log::warn!("conn {}: idle for more than {idle:?}, reaping", core.conn_id);
						core.state = ConnState::Closed;
						actions.push(Action::Disconnected);
					}
				}

				actions
			};

			// Don't double-fire on_disconnect if both RTO-death and the
			// idle reaper happened to trigger in the same tick.
			let mut seen_disconnect = false;
			actions.retain(|a| {
				if matches!(a, Action::Disconnected) {
					let first = !seen_disconnect;
					seen_disconnect = true;
					first
				} else {
					true
				}
			});

			if apply_actions_on(&engine, &entry, actions) {
				engine.shared.connections.lock().unwrap().remove(&addr);
			}
		}
	}
}
