//! Wire format: a fixed 20-byte header followed by 0..MSS payload bytes.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             ver               |             flags            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            conn_id                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                              seq                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                              ack                             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              rwnd             |             length           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            checksum           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::Bytes;
use rdt_util::{Checksum, WireError, WireResult};

/// Current and only supported wire version.
pub const PROTOCOL_VERSION: u16 = 1;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 20;

/// Maximum payload bytes per segment.
pub const MSS: usize = 1400;

/// Largest datagram this protocol will accept off the wire.
pub const MAX_DATAGRAM: usize = 2048;

bitflags::bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
	pub struct Flags: u16 {
		const SYN = 0x01;
		const ACK = 0x02;
		const FIN = 0x04;
		const PSH = 0x08;
	}
}

/// A decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
	pub ver: u16,
	pub flags: Flags,
	pub conn_id: u32,
	/// Sequence number of the first byte of payload.
	pub seq: u32,
	/// Cumulative ack: next byte expected from the peer.
	pub ack: u32,
	pub rwnd: u16,
}

impl Header {
	/// Build a bare ACK header (flags=ACK, seq=0, no payload).
	pub fn ack_only(conn_id: u32, ack: u32, rwnd: u16) -> Self {
		Self { ver: PROTOCOL_VERSION, flags: Flags::ACK, conn_id, seq: 0, ack, rwnd }
	}
}

/// Serialize a header and payload into a wire packet, computing the checksum
/// over header+payload with the checksum field zeroed, as required for the
/// checksum to verify by construction on the receiving end.
pub fn serialize(header: &Header, payload: &[u8]) -> Bytes {
	debug_assert!(payload.len() <= MSS);

	let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
	buf.extend_from_slice(&header.ver.to_be_bytes());
	buf.extend_from_slice(&header.flags.bits().to_be_bytes());
	buf.extend_from_slice(&header.conn_id.to_be_bytes());
	buf.extend_from_slice(&header.seq.to_be_bytes());
	buf.extend_from_slice(&header.ack.to_be_bytes());
	buf.extend_from_slice(&header.rwnd.to_be_bytes());
	buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
	buf.extend_from_slice(&[0, 0]); // checksum, zeroed for the computation below
	buf.extend_from_slice(payload);

	let checksum = Checksum::of(&buf).end();
	buf[16..18].copy_from_slice(&checksum.to_be_bytes());

	buf.into()
}

/// Recompute the checksum over the raw wire bytes (with the transmitted
/// checksum left in place). A packet is valid iff this returns `true`.
pub fn verify(bytes: &[u8]) -> bool {
	Checksum::of(bytes).end() == 0
}

/// Decode a header and payload out of raw wire bytes. Does not check the
/// checksum — call [`verify`] first.
pub fn deserialize(bytes: &[u8]) -> WireResult<(Header, Bytes)> {
	if bytes.len() < HEADER_LEN {
		return Err(WireError::Malformed);
	}

	let ver = u16::from_be_bytes([bytes[0], bytes[1]]);
	let flags = Flags::from_bits_truncate(u16::from_be_bytes([bytes[2], bytes[3]]));
	let conn_id = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
	let seq = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
	let ack = u32::from_be_bytes(bytes[12..16].try_into().unwrap());
	let rwnd = u16::from_be_bytes(bytes[16..18].try_into().unwrap());
	let length = u16::from_be_bytes(bytes[18..20].try_into().unwrap()) as usize;

	if ver != PROTOCOL_VERSION {
		return Err(WireError::Malformed);
	}

	if length != bytes.len() - HEADER_LEN {
		return Err(WireError::Malformed);
	}

	let header = Header { ver, flags, conn_id, seq, ack, rwnd };
	let payload = Bytes::copy_from_slice(&bytes[HEADER_LEN..]);

	Ok((header, payload))
}
