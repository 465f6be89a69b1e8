//! The per-IED supervisor state machine.
//!
//! One supervisor runs per `ied_id`, on its own OS thread. All native-client
//! operations happen while holding the client slot's mutex — the same
//! mutex the command router contends for.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand::Rng;

use super::client::{ClientFactory, ConnectionState, IedClient, SupervisorError, UpdateSource};
use crate::context::{ClientSlot, GatewayContext};
use crate::events::GatewayEvent;
use crate::mapping::IedId;

/// How often the supervisor drives a polling cycle against the native
/// client, distinct from the liveness-probe cadence. This mirrors
/// `POLLING_INTERVAL = 5` in the system this core replaces
/// (`original_source/MOD_V5/gateway_v7.1.py`).
const POLL_TICK: Duration = Duration::from_secs(5);

/// The supervisor's observable state, mirrored into `SupervisorHandle` so
/// tests and diagnostics can read it without reaching into the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
  Disconnected,
  Connecting,
  Connected,
  Faulted,
  Terminated,
}

type SharedState = Arc<Mutex<SupervisorState>>;

pub struct SupervisorConfig {
  pub reconnect_delay: Duration,
  pub connection_check_interval: Duration,
}

impl Default for SupervisorConfig {
  fn default() -> Self {
    SupervisorConfig {
      reconnect_delay: Duration::from_secs(15),
      connection_check_interval: Duration::from_secs(30),
    }
  }
}

/// A running supervisor. Holds the `JoinHandle` so lifecycle shutdown can
/// join it, and a shared cell for observing the current state (tests,
/// diagnostics).
pub struct SupervisorHandle {
  ied_id: IedId,
  state: SharedState,
  join: Option<thread::JoinHandle<()>>,
}

impl SupervisorHandle {
  pub fn ied_id(&self) -> &IedId {
    &self.ied_id
  }

  /// The supervisor's current state, as last observed by its own thread.
  pub fn state(&self) -> SupervisorState {
    *self.state.lock().unwrap()
  }

  /// Block until the supervisor thread has exited.
  pub fn join(mut self) {
    if let Some(j) = self.join.take() {
      let _ = j.join();
    }
  }
}

/// Spawn the supervisor thread for one IED. `uris` is that IED's seed
/// read-URI list from `ied_data_groups`.
pub struct Supervisor {
  ied_id: IedId,
  host: String,
  port: u16,
  uris: Vec<String>,
  factory: ClientFactory,
  config: SupervisorConfig,
  state: SharedState,
}

impl Supervisor {
  pub fn new(
    ied_id: IedId,
    host: String,
    port: u16,
    uris: Vec<String>,
    factory: ClientFactory,
    config: SupervisorConfig,
  ) -> Self {
    Supervisor {
      ied_id,
      host,
      port,
      uris,
      factory,
      config,
      state: Arc::new(Mutex::new(SupervisorState::Disconnected)),
    }
  }

  pub fn spawn(self, ctx: GatewayContext) -> SupervisorHandle {
    let ied_id = self.ied_id.clone();
    let state = self.state.clone();
    let join = thread::Builder::new()
      .name(format!("ied-supervisor-{ied_id}"))
      .spawn(move || self.run(ctx))
      .expect("failed to spawn supervisor thread");
    SupervisorHandle {
      ied_id,
      state,
      join: Some(join),
    }
  }

  fn set_state(&self, state: SupervisorState) {
    *self.state.lock().unwrap() = state;
  }

  fn slot(&self, ctx: &GatewayContext) -> ClientSlot {
    ctx
      .client_slot(&self.ied_id)
      .expect("client slot must be pre-populated at startup, before any supervisor is spawned")
  }

  fn run(self, ctx: GatewayContext) {
    info!("[{}] supervisor thread started", self.ied_id);
    let slot = self.slot(&ctx);

    'outer: while !ctx.shutdown.is_set() {
      debug!("[{}] attempting to connect", self.ied_id);
      self.set_state(SupervisorState::Connecting);
      match self.try_connect_and_register(&slot) {
        Ok(()) => {
          self.set_state(SupervisorState::Connected);
          info!("[{}] connected, entering monitoring loop", self.ied_id);
        }
        Err(reason) => {
          warn!("[{}] connect failed: {reason}", self.ied_id);
          self.fault(&ctx, &slot);
          if self.back_off(&ctx) {
            break 'outer;
          }
          continue;
        }
      }

      if self.monitor_loop(&ctx, &slot) {
        break 'outer; // shutdown observed mid-loop
      }

      // monitor_loop only returns false after a fault; invalidate + back off.
      self.fault(&ctx, &slot);
      if self.back_off(&ctx) {
        break 'outer;
      }
    }

    self.set_state(SupervisorState::Terminated);
    info!("[{}] supervisor thread terminated", self.ied_id);
  }

  /// CONNECTING state: create the client under the slot's mutex, connect,
  /// register every read URI. Holding the mutex across construction
  /// mirrors `gateway_v7.1.py::ied_handler`, which builds the client
  /// object itself while holding `ied_lock`.
  fn try_connect_and_register(&self, slot: &ClientSlot) -> Result<(), SupervisorError> {
    let mut guard = slot.lock().unwrap();
    let mut client = (self.factory)();
    client.connect(&self.host, self.port)?;
    for uri in &self.uris {
      client.register_read_value(uri)?;
    }
    *guard = Some(client);
    Ok(())
  }

  /// CONNECTED state: poll/report loop + periodic liveness probe. Returns
  /// `true` if the loop exited because of shutdown, `false` if it exited
  /// because of a fault.
  fn monitor_loop(&self, ctx: &GatewayContext, slot: &ClientSlot) -> bool {
    let mut last_probe = Instant::now();
    loop {
      if ctx.shutdown.is_set() {
        return true;
      }

      let poll_result = {
        let mut guard = slot.lock().unwrap();
        match guard.as_deref_mut() {
          Some(client) => {
            let ied_id = self.ied_id.clone();
            let events = ctx.events.clone();
            client.poll(&mut |key, raw, source| {
              Self::submit_update(&events, &ied_id, key, raw, source);
            })
          }
          None => Err(SupervisorError::Transport("client handle missing".to_string())),
        }
      };
      if let Err(reason) = poll_result {
        error!("[{}] transport error during poll: {reason}", self.ied_id);
        return false;
      }

      if last_probe.elapsed() >= self.config.connection_check_interval {
        let live = {
          let guard = slot.lock().unwrap();
          match guard.as_deref() {
            Some(client) => client.state() == ConnectionState::Connected,
            None => false,
          }
        };
        last_probe = Instant::now();
        if !live {
          error!("[{}] liveness probe failed", self.ied_id);
          return false;
        }
        debug!("[{}] liveness probe OK", self.ied_id);
      }

      if ctx.shutdown.wait_timeout(POLL_TICK) {
        return true;
      }
    }
  }

  fn submit_update(
    events: &crate::events::EventSender,
    ied_id: &IedId,
    key: String,
    raw: crate::value::Value,
    source: UpdateSource,
  ) {
    match source {
      UpdateSource::Report => debug!("[{ied_id}] data received via REPORT for key: {key}"),
      UpdateSource::Polling => debug!("[{ied_id}] data received via POLLING for key: {key}"),
    }
    if events
      .try_send(GatewayEvent::DataUpdate {
        ied_id: ied_id.clone(),
        key,
        raw,
        source,
      })
      .is_err()
    {
      warn!("[{ied_id}] event queue full, dropping data update");
    }
  }

  /// FAULTED entry action: drop the handle, emit an invalidation event
  /// ordered after any already-enqueued updates for this IED.
  fn fault(&self, ctx: &GatewayContext, slot: &ClientSlot) {
    self.set_state(SupervisorState::Faulted);
    *slot.lock().unwrap() = None;
    if ctx
      .events
      .try_send(GatewayEvent::Invalidate {
        ied_id: self.ied_id.clone(),
      })
      .is_err()
    {
      warn!("[{}] event queue full, dropping invalidation event", self.ied_id);
    }
  }

  /// Interruptible reconnect back-off. Returns `true` if shutdown was
  /// observed during the wait; otherwise settles in `Disconnected` before
  /// the next `CONNECTING` attempt.
  fn back_off(&self, ctx: &GatewayContext) -> bool {
    let jitter_ms = rand::rng().random_range(0..250);
    let delay = self.config.reconnect_delay + Duration::from_millis(jitter_ms);
    debug!("[{}] backing off for {:?} before reconnecting", self.ied_id, delay);
    let shutting_down = ctx.shutdown.wait_timeout(delay);
    if !shutting_down {
      self.set_state(SupervisorState::Disconnected);
    }
    shutting_down
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::time::Duration;

  use super::*;
  use crate::config::GatewaySettings;
  use crate::events::event_channel;
  use crate::ied::client::fake::FakeIedClientControl;
  use crate::mapping::GatewayTables;
  use crate::server104::Server104;
  use crate::value::Value;

  fn test_context(ied_id: &IedId) -> (GatewayContext, crate::events::EventReceiver) {
    let mut tables = GatewayTables::new();
    tables.ied_data_groups.insert(ied_id.clone(), vec![]);
    let (tx, rx) = event_channel(16);
    let ctx = GatewayContext::new(
      Arc::new(tables),
      GatewaySettings::default(),
      Arc::new(Server104::new()),
      tx,
    );
    (ctx, rx)
  }

  #[test_log::test]
  fn successful_connect_reaches_monitor_loop_and_forwards_updates() {
    let ied_id = IedId::new("10.0.0.1", 102);
    let (ctx, rx) = test_context(&ied_id);
    let control = FakeIedClientControl::new();
    control.push_update("IED1/LD0/CSWI1.Pos.stVal", Value::Int(2), UpdateSource::Report);

    let sup = Supervisor::new(
      ied_id.clone(),
      "10.0.0.1".into(),
      102,
      vec![],
      control.factory(),
      SupervisorConfig {
        reconnect_delay: Duration::from_millis(50),
        connection_check_interval: Duration::from_secs(3600),
      },
    );
    let handle = sup.spawn(ctx.clone());

    let ev = rx.recv_timeout(Duration::from_secs(2)).expect("expected a DataUpdate");
    match ev {
      GatewayEvent::DataUpdate { ied_id: got, raw, .. } => {
        assert_eq!(got, ied_id);
        assert_eq!(raw, Value::Int(2));
      }
      other => panic!("unexpected event: {other:?}"),
    }

    ctx.shutdown.signal();
    handle.join();
  }

  #[test]
  fn connect_failure_invalidates_and_retries() {
    let ied_id = IedId::new("10.0.0.2", 102);
    let (ctx, rx) = test_context(&ied_id);
    let control = FakeIedClientControl::new();
    control.set_connect_should_fail(true);

    let sup = Supervisor::new(
      ied_id.clone(),
      "10.0.0.2".into(),
      102,
      vec![],
      control.factory(),
      SupervisorConfig {
        reconnect_delay: Duration::from_millis(30),
        connection_check_interval: Duration::from_secs(3600),
      },
    );
    let handle = sup.spawn(ctx.clone());

    let ev = rx.recv_timeout(Duration::from_secs(2)).expect("expected an Invalidate");
    assert!(matches!(ev, GatewayEvent::Invalidate { .. }));
    assert!(control.connect_calls() >= 1);

    ctx.shutdown.signal();
    handle.join();
  }

  #[test]
  fn shutdown_during_reconnect_backoff_terminates_promptly() {
    let ied_id = IedId::new("10.0.0.3", 102);
    let (ctx, _rx) = test_context(&ied_id);
    let control = FakeIedClientControl::new();
    control.set_connect_should_fail(true);

    let sup = Supervisor::new(
      ied_id.clone(),
      "10.0.0.3".into(),
      102,
      vec![],
      control.factory(),
      SupervisorConfig {
        reconnect_delay: Duration::from_secs(3600),
        connection_check_interval: Duration::from_secs(3600),
      },
    );
    let handle = sup.spawn(ctx.clone());
    thread::sleep(Duration::from_millis(100));
    let start = Instant::now();
    ctx.shutdown.signal();
    handle.join();
    assert!(start.elapsed() < Duration::from_secs(5));
  }

  /// One IED's native client hangs inside `poll`; a second IED on its own
  /// supervisor must keep delivering updates in the meantime, since each
  /// IED's mutex only ever serializes calls for that one IED.
  #[test]
  fn a_hung_ied_does_not_block_a_second_ied() {
    let ied_a = IedId::new("10.0.0.4", 102);
    let ied_b = IedId::new("10.0.0.5", 102);

    let mut tables = GatewayTables::new();
    tables.ied_data_groups.insert(ied_a.clone(), vec![]);
    tables.ied_data_groups.insert(ied_b.clone(), vec![]);
    let (tx, rx) = event_channel(16);
    let ctx = GatewayContext::new(
      Arc::new(tables),
      GatewaySettings::default(),
      Arc::new(Server104::new()),
      tx,
    );

    let control_a = FakeIedClientControl::new();
    control_a.block_poll_for(Duration::from_secs(60));

    let control_b = FakeIedClientControl::new();
    control_b.push_update("IED2/LD0/CSWI1.Pos.stVal", Value::Int(1), UpdateSource::Report);

    let fast_tick = SupervisorConfig {
      reconnect_delay: Duration::from_millis(50),
      connection_check_interval: Duration::from_secs(3600),
    };

    let sup_a = Supervisor::new(
      ied_a.clone(),
      "10.0.0.4".into(),
      102,
      vec![],
      control_a.factory(),
      SupervisorConfig {
        reconnect_delay: fast_tick.reconnect_delay,
        connection_check_interval: fast_tick.connection_check_interval,
      },
    );
    let sup_b = Supervisor::new(
      ied_b.clone(),
      "10.0.0.5".into(),
      102,
      vec![],
      control_b.factory(),
      SupervisorConfig {
        reconnect_delay: fast_tick.reconnect_delay,
        connection_check_interval: fast_tick.connection_check_interval,
      },
    );

    let handle_a = sup_a.spawn(ctx.clone());
    let handle_b = sup_b.spawn(ctx.clone());

    // IED A is stuck inside poll() for up to 60s; IED B must still report
    // its update well within that window.
    let ev = rx
      .recv_timeout(Duration::from_secs(5))
      .expect("IED B's update must not be blocked by IED A's hung poll");
    match ev {
      GatewayEvent::DataUpdate { ied_id, raw, .. } => {
        assert_eq!(ied_id, ied_b);
        assert_eq!(raw, Value::Int(1));
      }
      other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(handle_a.state(), SupervisorState::Connected);
    assert_eq!(handle_b.state(), SupervisorState::Connected);

    control_a.release();
    ctx.shutdown.signal();
    handle_a.join();
    handle_b.join();
  }
}
