//! Startup ordering and cooperative shutdown: a single struct owns
//! everything spawned at startup, and tears it down in reverse order with
//! a bounded deadline.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use crate::config::GatewaySettings;
use crate::context::GatewayContext;
use crate::events::{event_channel, EventReceiver};
use crate::ied::client::ClientFactory;
use crate::ied::supervisor::{Supervisor, SupervisorConfig, SupervisorHandle};
use crate::mapping::GatewayTables;
use crate::router;
use crate::server104::adapter::Role;
use crate::server104::Server104;
use crate::translation;

/// How long shutdown waits for supervisors and the translation worker to
/// exit before abandoning them.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

/// Everything spawned at startup that shutdown needs to tear down, in the
/// reverse of startup order.
pub struct Gateway {
  ctx: GatewayContext,
  supervisors: Vec<SupervisorHandle>,
  worker: Option<thread::JoinHandle<()>>,
}

/// Bring the gateway up in the mandated order: tables already built by the
/// caller (config parsing is a precondition, not a lifecycle step run
/// here), then register every IOA, start the server, start the translation
/// worker, and finally spawn one supervisor per configured IED.
pub fn start(tables: Arc<GatewayTables>, settings: GatewaySettings, client_factory: ClientFactory) -> Gateway {
  let server = Arc::new(Server104::new());

  for (ioa, ioa_type) in tables.all_data_ioas() {
    server.register(ioa, ioa_type, Role::Monitoring);
  }
  for (ioa, ioa_type) in tables.all_command_ioas() {
    server.register(ioa, ioa_type, Role::Command);
  }

  let (events_tx, events_rx) = event_channel(settings.queue_capacity);
  let ctx = GatewayContext::new(tables.clone(), settings, server.clone(), events_tx);

  server.set_command_callback(router::make_command_callback(ctx.clone()));
  server.start();

  let worker = spawn_translation_worker(ctx.clone(), events_rx);

  let sup_config = SupervisorConfig {
    reconnect_delay: Duration::from_secs(settings.reconnect_delay_secs),
    connection_check_interval: Duration::from_secs(settings.connection_check_interval_secs),
  };
  let mut supervisors = Vec::with_capacity(tables.ied_data_groups.len());
  for (ied_id, uris) in &tables.ied_data_groups {
    let host = host_of(ied_id);
    let port = port_of(ied_id);
    let supervisor = Supervisor::new(
      ied_id.clone(),
      host,
      port,
      uris.clone(),
      client_factory.clone(),
      SupervisorConfig {
        reconnect_delay: sup_config.reconnect_delay,
        connection_check_interval: sup_config.connection_check_interval,
      },
    );
    supervisors.push(supervisor.spawn(ctx.clone()));
  }

  info!(
    "gateway started: {} IED(s), {} data IOA(s), {} command IOA(s)",
    supervisors.len(),
    tables.all_data_ioas().len(),
    tables.all_command_ioas().len()
  );

  Gateway { ctx, supervisors, worker }
}

fn spawn_translation_worker(ctx: GatewayContext, rx: EventReceiver) -> thread::JoinHandle<()> {
  thread::Builder::new()
    .name("translation-worker".to_string())
    .spawn(move || translation::run(&ctx, &rx))
    .expect("failed to spawn translation worker thread")
}

fn host_of(ied_id: &crate::mapping::IedId) -> String {
  ied_id
    .as_str()
    .rsplit_once(':')
    .map(|(host, _)| host.to_string())
    .unwrap_or_else(|| ied_id.as_str().to_string())
}

fn port_of(ied_id: &crate::mapping::IedId) -> u16 {
  ied_id
    .as_str()
    .rsplit_once(':')
    .and_then(|(_, port)| port.parse().ok())
    .unwrap_or(102)
}

impl Gateway {
  pub fn shutdown_signal(&self) -> crate::context::ShutdownSignal {
    self.ctx.shutdown.clone()
  }

  /// Block until the SIGINT-delivered shutdown signal fires, then drive
  /// the teardown sequence: signal, supervisors exit promptly, translation
  /// worker drains or is cancelled, 104 server stopped last.
  pub fn run_until_shutdown(self) {
    while !self.ctx.shutdown.is_set() {
      if self.ctx.shutdown.wait_timeout(Duration::from_secs(1)) {
        break;
      }
    }
    self.shutdown();
  }

  fn shutdown(self) {
    info!("shutdown requested, stopping supervisors");
    self.ctx.shutdown.signal();

    let deadline = std::time::Instant::now() + SHUTDOWN_DEADLINE;
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let expected = self.supervisors.len() + self.worker.is_some() as usize;

    for handle in self.supervisors {
      let ied_id = handle.ied_id().clone();
      let done_tx = done_tx.clone();
      thread::spawn(move || {
        handle.join();
        let _ = done_tx.send(ied_id.to_string());
      });
    }
    if let Some(worker) = self.worker {
      let done_tx = done_tx.clone();
      thread::spawn(move || {
        let _ = worker.join();
        let _ = done_tx.send("translation-worker".to_string());
      });
    }
    drop(done_tx);

    let mut joined = 0;
    while joined < expected {
      let remaining = deadline.saturating_duration_since(std::time::Instant::now());
      if remaining.is_zero() {
        info!(
          "shutdown deadline exceeded with {} task(s) still running, abandoning them",
          expected - joined
        );
        break;
      }
      match done_rx.recv_timeout(remaining) {
        Ok(name) => {
          info!("'{name}' stopped");
          joined += 1;
        }
        Err(_) => {
          info!(
            "shutdown deadline exceeded with {} task(s) still running, abandoning them",
            expected - joined
          );
          break;
        }
      }
    }

    self.ctx.server.stop();
    info!("gateway stopped");
  }
}
