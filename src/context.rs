//! The shared, explicit context passed to every supervisor and the
//! translation worker, replacing process-global state with one value
//! every task carries a handle to.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use crate::config::GatewaySettings;
use crate::events::EventSender;
use crate::ied::client::IedClient;
use crate::mapping::{GatewayTables, IedId};
use crate::server104::Server104;

/// A single broadcast shutdown signal with interruptible waits: supervisors
/// check it at every loop boundary and use it to cut reconnect back-off
/// short instead of sleeping blindly.
#[derive(Clone)]
pub struct ShutdownSignal(Arc<(Mutex<bool>, Condvar)>);

impl ShutdownSignal {
  pub fn new() -> Self {
    ShutdownSignal(Arc::new((Mutex::new(false), Condvar::new())))
  }

  pub fn signal(&self) {
    let (lock, cvar) = &*self.0;
    *lock.lock().unwrap() = true;
    cvar.notify_all();
  }

  pub fn is_set(&self) -> bool {
    *self.0 .0.lock().unwrap()
  }

  /// Wait up to `timeout`, returning early if shutdown is signaled.
  /// Returns `true` if shutdown happened (with or without the full wait).
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let (lock, cvar) = &*self.0;
    let guard = lock.lock().unwrap();
    if *guard {
      return true;
    }
    let (guard, _result) = cvar.wait_timeout_while(guard, timeout, |shutdown| !*shutdown).unwrap();
    *guard
  }
}

impl Default for ShutdownSignal {
  fn default() -> Self {
    Self::new()
  }
}

/// `ied_id -> handle`. The map's keys are frozen at startup (one entry per
/// configured IED, inserted before any supervisor is spawned); only the
/// `Mutex<Option<Box<dyn IedClient>>>` each key points to ever changes
/// after that — the map itself holds only shared borrow pointers.
pub type ClientSlot = Arc<Mutex<Option<Box<dyn IedClient>>>>;
pub type ClientsMap = Arc<RwLock<HashMap<IedId, ClientSlot>>>;

/// Everything a supervisor or the translation worker needs, bundled into
/// one explicit value instead of process globals.
#[derive(Clone)]
pub struct GatewayContext {
  pub tables: Arc<GatewayTables>,
  pub settings: GatewaySettings,
  pub clients: ClientsMap,
  pub server: Arc<Server104>,
  pub events: EventSender,
  pub shutdown: ShutdownSignal,
}

impl GatewayContext {
  pub fn new(
    tables: Arc<GatewayTables>,
    settings: GatewaySettings,
    server: Arc<Server104>,
    events: EventSender,
  ) -> Self {
    let mut map = HashMap::new();
    for ied_id in tables.ied_data_groups.keys() {
      map.insert(ied_id.clone(), Arc::new(Mutex::new(None)));
    }
    GatewayContext {
      tables,
      settings,
      clients: Arc::new(RwLock::new(map)),
      server,
      events,
      shutdown: ShutdownSignal::new(),
    }
  }

  pub fn client_slot(&self, ied_id: &IedId) -> Option<ClientSlot> {
    self.clients.read().unwrap().get(ied_id).cloned()
  }
}
