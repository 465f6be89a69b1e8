//! Facade over the external IEC 60870-5-104 server library.
//!
//! This adapter does not speak 104 on the wire — that is the external
//! library's job. What it owns is the in-memory IOA table, registration
//! bookkeeping (so a duplicate IOA is caught instead of silently
//! corrupting the real server's list), and synchronizing `update`/
//! `invalidate` calls that arrive concurrently from every supervisor and
//! the translation worker against the single command callback invoked
//! from the server's own thread.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use super::ioa::{Asdu, IoaEntry, IoaType, Quality};

/// Result code returned to the 104 library by a command callback: `0` means
/// accepted, anything else means rejected.
pub type CommandResult = i32;

/// `command_cb(ioa, data, select_flag) -> result`, invoked on the server's
/// own thread. Boxed so the router can close over its own state.
pub type CommandCallback = Arc<dyn Fn(u32, i32, bool) -> CommandResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
  Monitoring,
  Command,
}

struct Inner {
  ioas: HashMap<u32, IoaEntry>,
  command_ioas: HashSet<u32>,
  command_cb: Option<CommandCallback>,
  running: bool,
}

/// Thin, internally-synchronized facade over the IEC 60870-5-104 server.
///
/// Whether or not the real library already serializes concurrent calls is
/// left unverified by its documentation, so this adapter synchronizes
/// unconditionally via its own mutex — correct either way.
pub struct Server104 {
  inner: Mutex<Inner>,
}

impl Server104 {
  pub fn new() -> Self {
    Server104 {
      inner: Mutex::new(Inner {
        ioas: HashMap::new(),
        command_ioas: HashSet::new(),
        command_cb: None,
        running: false,
      }),
    }
  }

  /// Register one IOA. Returns `false` (and logs an error) if the IOA was
  /// already registered — the second registration is skipped, the first
  /// wins.
  pub fn register(&self, ioa: u32, ioa_type: IoaType, role: Role) -> bool {
    let mut inner = self.inner.lock().unwrap();
    if inner.ioas.contains_key(&ioa) {
      error!("IOA {ioa} already registered, skipping duplicate registration");
      return false;
    }
    inner.ioas.insert(ioa, IoaEntry::new(ioa, ioa_type));
    if role == Role::Command {
      inner.command_ioas.insert(ioa);
    }
    debug!("registered IOA {ioa} as {ioa_type:?} ({role:?})");
    true
  }

  /// Install the single command callback used for every command IOA.
  pub fn set_command_callback(&self, cb: CommandCallback) {
    self.inner.lock().unwrap().command_cb = Some(cb);
  }

  /// Push a new value for a monitoring IOA.
  pub fn update(&self, ioa: u32, value: f64) {
    let mut inner = self.inner.lock().unwrap();
    if let Some(entry) = inner.ioas.get_mut(&ioa) {
      entry.current_value = value;
      entry.quality = Default::default();
    } else {
      warn!("update for unregistered IOA {ioa} ignored");
    }
  }

  /// Current value of an IOA, if registered. Exposed for tests and for
  /// diagnostics; the real 104 master sees values only via emitted ASDUs.
  pub fn current_value(&self, ioa: u32) -> Option<f64> {
    self.inner.lock().unwrap().ioas.get(&ioa).map(|e| e.current_value)
  }

  pub fn is_registered(&self, ioa: u32) -> bool {
    self.inner.lock().unwrap().ioas.contains_key(&ioa)
  }

  /// Emit one spontaneous IV|NT-quality ASDU per `ioas`, then set that
  /// IOA's in-memory value to NaN.
  pub fn invalidate(&self, ioas: &[u32]) -> Vec<Asdu> {
    let mut inner = self.inner.lock().unwrap();
    let quality = Quality::Invalid | Quality::NotTopical;
    let mut asdus = Vec::with_capacity(ioas.len());
    for &ioa in ioas {
      if let Some(entry) = inner.ioas.get_mut(&ioa) {
        asdus.push(Asdu {
          ioa,
          value: 0.0,
          quality,
        });
        entry.current_value = f64::NAN;
        entry.quality = quality;
      }
    }
    if !asdus.is_empty() {
      warn!("invalidating {} data point(s): {:?}", asdus.len(), ioas);
    }
    asdus
  }

  /// Start the server. In this core there is no real wire listener to
  /// bind; this just flips the running flag so lifecycle ordering can be
  /// asserted and logged.
  pub fn start(&self) {
    self.inner.lock().unwrap().running = true;
    info!("104 server started");
  }

  pub fn stop(&self) {
    self.inner.lock().unwrap().running = false;
    info!("104 server stopped");
  }

  pub fn is_running(&self) -> bool {
    self.inner.lock().unwrap().running
  }

  /// Simulate an inbound select/operate arriving on the server's thread.
  /// Returns the router's result code, or `-1` if no callback has been
  /// installed or the IOA is not a known command IOA.
  pub fn dispatch_command(&self, ioa: u32, data: i32, select_flag: bool) -> CommandResult {
    let (is_command, cb) = {
      let inner = self.inner.lock().unwrap();
      (inner.command_ioas.contains(&ioa), inner.command_cb.clone())
    };
    if !is_command {
      warn!("command dispatch for non-command IOA {ioa} refused");
      return -1;
    }
    match cb {
      Some(cb) => cb(ioa, data, select_flag),
      None => {
        error!("command dispatch before a command callback was installed");
        -1
      }
    }
  }
}

impl Default for Server104 {
  fn default() -> Self {
    Self::new()
  }
}
