//! Reliable, connection-oriented, message-preserving transport over UDP —
//! a simplified TCP adapted for datagram framing, minus congestion control.
//!
//! This crate is a thin facade: [`Engine`] and [`Connection`] are
//! `rdt-engine`'s public API re-exported here so applications depend on one
//! crate. The actual packet codec, receiver/sender reliability logic, and
//! connection state machine live in `rdt-proto`; the socket, threads, and
//! timer wheel live in `rdt-engine`.

pub use rdt_engine::{Connection, Engine, EngineConfig, TransportError};
pub use rdt_engine::logging::init_logging;

pub use rdt_proto::ConnState;
