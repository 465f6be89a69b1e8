//! The internal event type and bounded channel that decouples IED
//! supervisors from the translation worker.

use std::sync::mpsc;
use std::time::Duration;

use crate::mapping::IedId;
use crate::value::Value;

/// Where a `DataUpdate` came from. Both report-driven and polling-driven
/// updates are funneled into the same event type; the source is preserved
/// only for logging, mirroring `original_source`'s `gateway_v7.1.py`
/// `polling_entry_point`/`report_entry_point` wrappers, which log at debug
/// level before forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
  Report,
  Polling,
}

/// An event produced by an IED supervisor and consumed by the translation
/// worker.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
  DataUpdate {
    ied_id: IedId,
    key: String,
    raw: Value,
    source: UpdateSource,
  },
  Invalidate {
    ied_id: IedId,
  },
}

/// Sending half of the bounded event queue. Wraps `mpsc::SyncSender`;
/// `try_send` drops the event and logs on overflow instead of blocking the
/// supervisor that produced it — backpressure is not propagated upstream
/// since IED reports are lossy by nature.
#[derive(Clone)]
pub struct EventSender(mpsc::SyncSender<GatewayEvent>);

pub struct EventReceiver(mpsc::Receiver<GatewayEvent>);

/// Create the single bounded multi-producer queue shared by every
/// supervisor and the translation worker.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
  let (tx, rx) = mpsc::sync_channel(capacity);
  (EventSender(tx), EventReceiver(rx))
}

impl EventSender {
  /// Best-effort send. On a full queue the event is dropped and a warning
  /// is logged by the caller (callers own the `ied_id`-specific log
  /// context, so the drop is logged there, not here).
  pub fn try_send(&self, event: GatewayEvent) -> Result<(), GatewayEvent> {
    match self.0.try_send(event) {
      Ok(()) => Ok(()),
      Err(mpsc::TrySendError::Full(e)) => Err(e),
      Err(mpsc::TrySendError::Disconnected(e)) => Err(e),
    }
  }
}

impl EventReceiver {
  /// Timed receive so the translation worker can check the shutdown flag
  /// between events instead of blocking forever.
  pub fn recv_timeout(&self, timeout: Duration) -> Result<GatewayEvent, mpsc::RecvTimeoutError> {
    self.0.recv_timeout(timeout)
  }
}
