use thiserror::Error;

/// Errors surfaced across the public `Engine` API. Wire-level conditions
/// (`Malformed`, `ChecksumFail`, unknown-sender datagrams, buffer overflow)
/// never reach here — they're absorbed inside the codec and the receiver.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
	#[error("connection is not yet established")]
	NotEstablished,
	#[error("operation timed out")]
	Timeout,
	#[error("connection is dead (retransmission budget exhausted)")]
	Dead,
	#[error("connection is already closed")]
	AlreadyClosed,
}
