//! CLI entry point: `gateway [CONFIG_PATH]`.

use std::sync::Arc;

use iec_gateway::config::build_tables;
use iec_gateway::ied::client::{ConnectionState, IedClient, SupervisorError};
use iec_gateway::lifecycle;
use iec_gateway::value::Value;
use log::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config.local.ini";

/// Placeholder for the native IEC 61850 MMS client binding — implementing
/// MMS on the wire is out of scope for this core. A production deployment
/// links a real `IedClient` implementation here; this stub always refuses
/// to connect so the supervisor state machine and reconnect back-off are
/// still exercised end-to-end.
struct UnimplementedIedClient;

impl IedClient for UnimplementedIedClient {
  fn connect(&mut self, host: &str, port: u16) -> Result<(), SupervisorError> {
    Err(SupervisorError::Connect(format!(
      "no native IEC 61850 MMS client is linked into this build (tried {host}:{port})"
    )))
  }

  fn register_read_value(&mut self, _uri: &str) -> Result<(), SupervisorError> {
    Err(SupervisorError::Register(
      "no native IEC 61850 MMS client is linked into this build".to_string(),
    ))
  }

  fn state(&self) -> ConnectionState {
    ConnectionState::Other
  }

  fn poll(
    &mut self,
    _on_update: &mut dyn FnMut(String, Value, iec_gateway::ied::client::UpdateSource),
  ) -> Result<(), SupervisorError> {
    Err(SupervisorError::Transport(
      "no native IEC 61850 MMS client is linked into this build".to_string(),
    ))
  }

  fn select(&mut self, _uri: &str, _value: bool) -> i32 {
    -1
  }

  fn operate(&mut self, _uri: &str, _value: bool) -> i32 {
    -1
  }
}

fn main() {
  env_logger::init();

  let config_path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

  let (tables, settings) = match build_tables(&config_path) {
    Ok(result) => result,
    Err(e) => {
      error!("failed to start: {e}");
      std::process::exit(1);
    }
  };

  info!("loaded config from '{config_path}'");

  let client_factory: iec_gateway::ied::client::ClientFactory =
    Arc::new(|| Box::new(UnimplementedIedClient) as Box<dyn IedClient>);

  let gateway = lifecycle::start(Arc::new(tables), settings, client_factory);
  let shutdown = gateway.shutdown_signal();

  ctrlc::set_handler(move || {
    info!("SIGINT received, shutting down");
    shutdown.signal();
  })
  .expect("failed to install SIGINT handler");

  gateway.run_until_shutdown();
}
