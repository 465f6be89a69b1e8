//! Turns an inbound 104 command into a select/operate call on the owning
//! IED's client, executed synchronously on the calling (104 server) thread.

use std::sync::Arc;

use log::{error, warn};
use thiserror::Error;
use url::Url;

use crate::context::GatewayContext;
use crate::mapping::IedId;
use crate::server104::adapter::CommandResult;

/// Why a command could not be routed to an IED. Every variant yields the
/// same `-1` refusal code to the 104 library; they are only ever
/// distinguished in logs.
#[derive(Debug, Error)]
enum RouterError {
  #[error("no command mapping configured for IOA {0}")]
  NoMapping(u32),
  #[error("configured URI '{0}' is not a valid IED address")]
  InvalidUri(String),
  #[error("'{0}' is not a known IED")]
  UnknownIed(IedId),
  #[error("'{0}' is offline")]
  Offline(IedId),
}

/// Build the [`crate::server104::adapter::CommandCallback`] installed into
/// [`crate::server104::Server104`]. Never blocks on a reconnect: an
/// offline IED yields an immediate refusal instead of waiting.
pub fn make_command_callback(ctx: GatewayContext) -> Arc<dyn Fn(u32, i32, bool) -> CommandResult + Send + Sync> {
  Arc::new(move |ioa, data, select_flag| dispatch(&ctx, ioa, data, select_flag))
}

fn dispatch(ctx: &GatewayContext, ioa: u32, data: i32, select_flag: bool) -> CommandResult {
  match dispatch_inner(ctx, ioa, data, select_flag) {
    Ok(result) => result,
    Err(e @ (RouterError::NoMapping(_) | RouterError::InvalidUri(_))) => {
      error!("command for IOA {ioa} refused: {e}");
      -1
    }
    Err(e) => {
      warn!("command for IOA {ioa} refused: {e}");
      -1
    }
  }
}

fn dispatch_inner(ctx: &GatewayContext, ioa: u32, data: i32, select_flag: bool) -> Result<CommandResult, RouterError> {
  let uri = ctx
    .tables
    .ioa_to_command_uri
    .get(&ioa)
    .ok_or(RouterError::NoMapping(ioa))?;

  let ied_id = ied_id_from_uri(uri).ok_or_else(|| RouterError::InvalidUri(uri.clone()))?;

  let slot = ctx
    .client_slot(&ied_id)
    .ok_or_else(|| RouterError::UnknownIed(ied_id.clone()))?;

  let mut guard = slot.lock().unwrap();
  let client = guard.as_deref_mut().ok_or(RouterError::Offline(ied_id))?;

  let v = data == 1;
  Ok(if select_flag {
    client.select(uri, v)
  } else {
    client.operate(uri, v)
  })
}

fn ied_id_from_uri(uri: &str) -> Option<IedId> {
  let url = Url::parse(uri).ok()?;
  let host = url.host_str()?;
  let port = url.port().unwrap_or(102);
  Some(IedId::new(host, port))
}
