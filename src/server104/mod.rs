//! A thin, synchronized facade over the external IEC 60870-5-104 server
//! library.

pub mod adapter;
pub mod ioa;

pub use adapter::{CommandCallback, CommandResult, Server104};
pub use ioa::{Asdu, IoaEntry, IoaType, Quality};
