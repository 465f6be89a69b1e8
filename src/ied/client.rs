//! The native MMS client seam.
//!
//! The real client is an external, non-thread-safe FFI handle (bit-exact
//! MMS framing is out of scope for this core). [`IedClient`] is the trait
//! this core actually depends on — one instance per IED, always accessed
//! through the owning supervisor's mutex, never shared bare.

use std::sync::Arc;

use thiserror::Error;

use crate::value::Value;

/// Sentinel returned by the native client's own connection-state query;
/// only `Connected` counts as live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Connected,
  Other,
}

/// Why a `DataUpdate` arrived, preserved for logging only.
pub use crate::events::UpdateSource;

/// Errors surfaced by a native client call, mirroring the error taxonomy:
/// a failure of any kind drives the owning supervisor to FAULTED and a
/// bulk invalidation of that IED's IOAs, so the three kinds are only ever
/// distinguished in logs, not in control flow.
#[derive(Debug, Error)]
pub enum SupervisorError {
  #[error("connect failed: {0}")]
  Connect(String),
  #[error("register_read_value failed: {0}")]
  Register(String),
  #[error("transport error: {0}")]
  Transport(String),
}

/// The operations the supervisor needs from a connected IED. All of these
/// execute under the owning supervisor's mutex and may block on network
/// I/O.
pub trait IedClient: Send {
  /// Connect and discover the IED at `host:port`. Corresponds to the
  /// native `getIED` call.
  fn connect(&mut self, host: &str, port: u16) -> Result<(), SupervisorError>;

  /// Register one read URI for polling/reporting.
  fn register_read_value(&mut self, uri: &str) -> Result<(), SupervisorError>;

  /// Query the native connection state.
  fn state(&self) -> ConnectionState;

  /// Drive one polling/report cycle. Every value observed during this
  /// call is delivered through `on_update` before `poll` returns — this
  /// mirrors the native library's synchronous callback delivery without
  /// doing any translation work inside the callback itself.
  fn poll(&mut self, on_update: &mut dyn FnMut(String, Value, UpdateSource)) -> Result<(), SupervisorError>;

  /// Select-before-operate phase one.
  fn select(&mut self, uri: &str, value: bool) -> i32;

  /// Operate phase.
  fn operate(&mut self, uri: &str, value: bool) -> i32;
}

/// Constructs a fresh native client handle. A supervisor calls this once
/// per CONNECTING attempt: the previous handle, if any, was already
/// dropped on the prior FAULTED transition.
pub type ClientFactory = Arc<dyn Fn() -> Box<dyn IedClient> + Send + Sync>;
