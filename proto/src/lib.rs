pub mod connection;
pub mod packet;
pub mod receiver;
pub mod sender;

pub use connection::{Action, AlreadyClosed, ConnState, Connection, HandshakeTick, NotEstablished};
pub use packet::{deserialize, serialize, verify, Flags, Header, HEADER_LEN, MAX_DATAGRAM, MSS, PROTOCOL_VERSION};
pub use receiver::{AckInfo, Receiver, ReceiverEvent, MAX_BUFFER};
pub use sender::{RtoOutcome, Sender, SenderConfig};
