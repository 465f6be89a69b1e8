//! IEC 61850-to-IEC 60870-5-104 protocol gateway: translates MMS reports and
//! polled reads from a fleet of substation IEDs into 104 information
//! objects, and routes inbound 104 commands back to the owning IED.

pub mod config;
pub mod context;
pub mod events;
pub mod ied;
pub mod lifecycle;
pub mod mapping;
pub mod router;
pub mod server104;
pub mod translation;
pub mod value;
