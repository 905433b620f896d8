use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use rdt_proto::ConnState;

use crate::conn::ConnEntry;
use crate::error::TransportError;
use crate::Engine;

/// An application-facing handle to one connection. Cheap to clone; every
/// clone refers to the same underlying state.
#[derive(Clone)]
pub struct Connection {
	pub(crate) engine: Engine,
	pub(crate) entry: Arc<ConnEntry>,
}

impl Connection {
	pub(crate) fn new(engine: Engine, entry: Arc<ConnEntry>) -> Self {
		Self { engine, entry }
	}

	pub fn peer_addr(&self) -> SocketAddr {
		self.entry.peer_addr
	}

	pub fn conn_id(&self) -> u32 {
		self.entry.core.lock().unwrap().conn_id
	}

	pub fn state(&self) -> ConnState {
		self.entry.core.lock().unwrap().state
	}

	pub fn last_activity(&self) -> Instant {
		self.entry.core.lock().unwrap().last_activity
	}

	/// Register the callback invoked with each delivered message. Overwrites
	/// any previously registered callback.
	pub fn on_message(&self, cb: impl Fn(Bytes) + Send + Sync + 'static) {
		*self.entry.on_message.lock().unwrap() = Some(Box::new(cb));
	}

	/// Register the callback invoked once when this connection closes.
	pub fn on_disconnect(&self, cb: impl Fn(Connection) + Send + Sync + 'static) {
		*self.entry.on_disconnect.lock().unwrap() = Some(Box::new(cb));
	}

	pub fn send(&self, data: &[u8]) -> Result<(), TransportError> {
		self.engine.send(self, data)
	}

	pub fn close(&self) -> Result<(), TransportError> {
		self.engine.close(self)
	}
}
