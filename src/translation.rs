//! The single consumer task that turns `DataUpdate`/`Invalidate` events
//! into 104 server calls.

use std::time::Duration;

use log::{debug, info, warn};
use url::Url;

use crate::context::GatewayContext;
use crate::events::{EventReceiver, GatewayEvent, UpdateSource};
use crate::mapping::{GatewayTables, IedId};
use crate::server104::ioa::IoaType;
use crate::value::Value;

/// How long the worker blocks on a `recv` before re-checking the shutdown
/// flag.
const RECV_TICK: Duration = Duration::from_millis(500);

/// Normalize a reported key to an `mms_path`: if it parses as a URI, take
/// its path with the leading slash stripped; otherwise use it verbatim.
pub fn normalize_key(key: &str) -> String {
  match Url::parse(key) {
    Ok(url) if url.host_str().is_some() => url.path().trim_start_matches('/').to_string(),
    _ => key.to_string(),
  }
}

/// Find the first `(config_path, ioa)` whose IOA is in `candidates` and
/// whose `config_path` is a prefix-match target of `reported_path` (i.e.
/// `config_path.starts_with(reported_path)`). Deterministic order: longest
/// `config_path` first, lexicographic tie-break.
pub fn find_matching_ioa<'a>(
  tables: &'a GatewayTables,
  candidates: &std::collections::HashSet<u32>,
  reported_path: &str,
) -> Option<(&'a str, u32)> {
  let mut matches: Vec<(&str, u32)> = tables
    .mms_to_ioa
    .iter()
    .filter(|(_, &ioa)| candidates.contains(&ioa))
    .filter(|(config_path, _)| config_path.starts_with(reported_path))
    .map(|(path, &ioa)| (path.as_str(), ioa))
    .collect();
  matches.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
  matches.into_iter().next()
}

/// Coerce a raw numeric value into the 104 wire value for `ioa_type`,
/// applying polarity inversion where applicable.
pub fn coerce(ioa_type: IoaType, value: f64, invert: bool) -> f64 {
  match ioa_type {
    IoaType::MeasuredValueScaled | IoaType::MeasuredValueShort => value,
    IoaType::SinglePointInformation => {
      let v = if value as i64 != 0 { 1.0 } else { 0.0 };
      if invert {
        1.0 - v
      } else {
        v
      }
    }
    IoaType::DoublePointInformation => {
      let v = if value == 1.0 {
        1.0
      } else if value == 2.0 {
        2.0
      } else {
        0.0
      };
      if invert {
        match v {
          1.0 => 2.0,
          2.0 => 1.0,
          other => other,
        }
      } else {
        v
      }
    }
    IoaType::SingleCommand | IoaType::DoubleCommand => value,
  }
}

fn process_data_update(ctx: &GatewayContext, ied_id: &IedId, key: &str, raw: &Value, source: UpdateSource) {
  let _ = source; // preserved only for logging, already logged by the supervisor
  let Some(final_value) = raw.first_float() else {
    warn!("[{ied_id}] discarding update for '{key}': no numeric value found");
    return;
  };

  let reported_path = normalize_key(key);
  let candidates = ctx.tables.ioas_for(ied_id);
  if candidates.is_empty() {
    warn!("[{ied_id}] no known IOAs for this IED, discarding update for '{key}'");
    return;
  }

  match find_matching_ioa(&ctx.tables, &candidates, &reported_path) {
    Some((config_path, ioa)) => {
      let ioa_type = ctx
        .tables
        .ioa_type(ioa)
        .expect("ioa present in mms_to_ioa must have a recorded type");
      let invert = ctx.tables.is_inverted(ioa);
      let coerced = coerce(ioa_type, final_value, invert);
      ctx.server.update(ioa, coerced);
      info!("[{ied_id}] matched '{reported_path}' (config '{config_path}') to IOA {ioa}, updated with: {coerced}");
    }
    None => {
      warn!("[{ied_id}] no matching config for key: {reported_path}");
    }
  }
}

fn process_invalidate(ctx: &GatewayContext, ied_id: &IedId) {
  let ioas = ctx.tables.ioas_for(ied_id);
  if ioas.is_empty() {
    return;
  }
  let mut ioa_vec: Vec<u32> = ioas.into_iter().collect();
  ioa_vec.sort_unstable();
  let asdus = ctx.server.invalidate(&ioa_vec);
  debug!("[{ied_id}] invalidated {} ASDU(s): {:?}", asdus.len(), ioa_vec);
}

/// Run the translation worker loop until shutdown. Consumes events from
/// `rx` in submission order: events from one IED are processed in
/// submission order, and events from different IEDs may interleave — this
/// holds automatically because there is exactly one consumer and the
/// queue is FIFO.
pub fn run(ctx: &GatewayContext, rx: &EventReceiver) {
  info!("translation worker started");
  while !ctx.shutdown.is_set() {
    match rx.recv_timeout(RECV_TICK) {
      Ok(GatewayEvent::DataUpdate { ied_id, key, raw, source }) => {
        process_data_update(ctx, &ied_id, &key, &raw, source);
      }
      Ok(GatewayEvent::Invalidate { ied_id }) => {
        process_invalidate(ctx, &ied_id);
      }
      Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
      Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
    }
  }
  info!("translation worker stopped");
}

#[cfg(test)]
mod tests {
  use std::collections::HashSet;
  use std::sync::Arc;

  use test_case::test_case;

  use super::*;
  use crate::config::GatewaySettings;
  use crate::events::event_channel;
  use crate::mapping::GatewayTables;
  use crate::server104::ioa::Role;
  use crate::server104::Server104;

  fn tables_with_double_point(ioa: u32, path: &str, ied_id: &IedId) -> GatewayTables {
    let mut t = GatewayTables::new();
    t.mms_to_ioa.insert(path.to_string(), ioa);
    t.ioa_types.insert(ioa, IoaType::DoublePointInformation);
    t.ied_to_ioas.entry(ied_id.clone()).or_default().insert(ioa);
    t
  }

  #[test]
  fn normalize_key_strips_uri_prefix() {
    assert_eq!(
      normalize_key("iec61850://10.0.0.1:102/IED1/LD0/CSWI1.Pos.stVal"),
      "IED1/LD0/CSWI1.Pos.stVal"
    );
    assert_eq!(normalize_key("IED1/LD0/CSWI1.Pos.stVal"), "IED1/LD0/CSWI1.Pos.stVal");
  }

  #[test_case(0.0, false, 0.0; "zero, no invert, stays 0")]
  #[test_case(5.0, false, 1.0; "nonzero, no invert, becomes 1")]
  #[test_case(0.0, true, 1.0; "zero, inverted, becomes 1")]
  #[test_case(5.0, true, 0.0; "nonzero, inverted, becomes 0")]
  fn single_point_coercion_and_inversion(value: f64, invert: bool, expected: f64) {
    assert_eq!(coerce(IoaType::SinglePointInformation, value, invert), expected);
  }

  #[test_case(1.0, false, 1.0; "off, no invert")]
  #[test_case(2.0, false, 2.0; "on, no invert")]
  #[test_case(3.0, false, 0.0; "garbage, no invert, becomes intermediate")]
  #[test_case(1.0, true, 2.0; "off, inverted, becomes on")]
  #[test_case(2.0, true, 1.0; "on, inverted, becomes off")]
  #[test_case(3.0, true, 0.0; "garbage, inverted, stays intermediate")]
  fn double_point_coercion_and_inversion(value: f64, invert: bool, expected: f64) {
    assert_eq!(coerce(IoaType::DoublePointInformation, value, invert), expected);
  }

  #[test]
  fn longest_prefix_wins_deterministically() {
    let ied_id = IedId::new("10.0.0.1", 102);
    let mut t = GatewayTables::new();
    t.mms_to_ioa.insert("IED1/LD0".to_string(), 1);
    t.mms_to_ioa.insert("IED1/LD0/CSWI1".to_string(), 2);
    t.ioa_types.insert(1, IoaType::DoublePointInformation);
    t.ioa_types.insert(2, IoaType::DoublePointInformation);
    let mut candidates = HashSet::new();
    candidates.insert(1);
    candidates.insert(2);
    t.ied_to_ioas.insert(ied_id.clone(), candidates.clone());

    let found = find_matching_ioa(&t, &candidates, "IED1/LD0");
    assert_eq!(found, Some(("IED1/LD0/CSWI1", 2)));
  }

  #[test]
  fn candidate_restriction_prevents_cross_ied_match() {
    let ied_a = IedId::new("10.0.0.1", 102);
    let ied_b = IedId::new("10.0.0.2", 102);
    let mut t = tables_with_double_point(1001, "SAME/PATH", &ied_a);
    // Same mms_path registered for a different IOA under IED B would be a
    // config error (duplicate path), so instead assert the candidate set
    // for IED B simply doesn't contain IOA 1001.
    t.ied_to_ioas.entry(ied_b.clone()).or_default();
    let candidates_b = t.ioas_for(&ied_b);
    assert!(find_matching_ioa(&t, &candidates_b, "SAME/PATH").is_none());
  }

  #[test]
  fn s1_happy_path_report_updates_ioa() {
    let ied_id = IedId::new("10.0.0.1", 102);
    let tables = tables_with_double_point(1001, "IED1/LD0/CSWI1.Pos.stVal", &ied_id);
    let server = Arc::new(Server104::new());
    server.register(1001, IoaType::DoublePointInformation, Role::Monitoring);
    let (tx, _rx) = event_channel(16);
    let ctx = GatewayContext::new(Arc::new(tables), GatewaySettings::default(), server.clone(), tx);

    process_data_update(
      &ctx,
      &ied_id,
      "IED1/LD0/CSWI1.Pos.stVal",
      &Value::Seq(vec![Value::Seq(vec![Value::Int(2)])]),
      UpdateSource::Report,
    );

    assert_eq!(server.current_value(1001), Some(2.0));
  }

  #[test]
  fn s3_invalidate_emits_asdu_and_sets_nan() {
    let ied_id = IedId::new("10.0.0.1", 102);
    let tables = tables_with_double_point(1001, "IED1/LD0/CSWI1.Pos.stVal", &ied_id);
    let server = Arc::new(Server104::new());
    server.register(1001, IoaType::DoublePointInformation, Role::Monitoring);
    server.update(1001, 2.0);
    let (tx, _rx) = event_channel(16);
    let ctx = GatewayContext::new(Arc::new(tables), GatewaySettings::default(), server.clone(), tx);

    process_invalidate(&ctx, &ied_id);

    assert!(server.current_value(1001).unwrap().is_nan());
  }

  #[test]
  fn no_mapping_is_logged_and_does_not_panic() {
    let ied_id = IedId::new("10.0.0.1", 102);
    let tables = tables_with_double_point(1001, "IED1/LD0/CSWI1.Pos.stVal", &ied_id);
    let server = Arc::new(Server104::new());
    server.register(1001, IoaType::DoublePointInformation, Role::Monitoring);
    let (tx, _rx) = event_channel(16);
    let ctx = GatewayContext::new(Arc::new(tables), GatewaySettings::default(), server.clone(), tx);

    process_data_update(
      &ctx,
      &ied_id,
      "IED1/LD0/UNKNOWN.stVal",
      &Value::Float(1.0),
      UpdateSource::Polling,
    );

    // unrelated IOA must be untouched
    assert_eq!(server.current_value(1001), Some(0.0));
  }
}
