pub mod checksum;
pub mod error;
pub mod time;

pub use checksum::Checksum;
pub use error::{WireError, WireResult};
