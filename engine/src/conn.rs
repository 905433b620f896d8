use std::net::SocketAddr;
use std::sync::{Condvar, Mutex};

use bytes::Bytes;
use rdt_proto::Connection as ConnCore;

use crate::handle::Connection;

type MessageCb = Box<dyn Fn(Bytes) + Send + Sync>;
type DisconnectCb = Box<dyn Fn(Connection) + Send + Sync>;

/// Internal per-connection bookkeeping the engine keeps in its map; not
/// exposed directly, only through the [`Connection`] handle.
pub(crate) struct ConnEntry {
	pub peer_addr: SocketAddr,
	/// `true` for connections created by an inbound SYN, so the handshake
	/// completion action knows to fire `on_new_connection` rather than just
	/// waking a waiting `connect()` caller.
	pub inbound: bool,
	pub core: Mutex<ConnCore>,
	/// Signalled on every state transition; `connect()` waits on this.
	pub cv: Condvar,
	pub on_message: Mutex<Option<MessageCb>>,
	pub on_disconnect: Mutex<Option<DisconnectCb>>,
}

impl ConnEntry {
	pub fn new(peer_addr: SocketAddr, core: ConnCore, inbound: bool) -> Self {
		Self { peer_addr, inbound, core: Mutex::new(core), cv: Condvar::new(), on_message: Mutex::new(None), on_disconnect: Mutex::new(None) }
	}
}
