//! Static routing tables, frozen after startup.
//!
//! A `GatewayTables` is built once by [`crate::config`] and then shared
//! read-only between every supervisor, the translation worker, and the
//! command router. Nothing in this module ever mutates a `GatewayTables`
//! after construction; callers hold it behind an `Arc`.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::server104::ioa::IoaType;

/// Identity of an IED, `host:port`. `port` defaults to 102 when the config
/// URI omits it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IedId(String);

impl IedId {
  pub fn new(host: &str, port: u16) -> Self {
    IedId(format!("{host}:{port}"))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for IedId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// One parsed config entry: the `mms_path` portion of a URI and whatever
/// metadata the rest of the gateway needs about it.
#[derive(Debug, Clone)]
pub struct DataPoint {
  pub ioa: u32,
  pub mms_path: String,
  pub ied_id: IedId,
  pub uri: String,
  pub ioa_type: IoaType,
  pub invert: bool,
}

/// The five immutable routing tables plus the per-IED seed URI lists.
#[derive(Debug, Default)]
pub struct GatewayTables {
  /// `mms_path -> ioa`. Last-writer-wins on duplicate paths (a warning is
  /// logged by the builder, not here).
  pub mms_to_ioa: HashMap<String, u32>,
  /// `ioa -> command URI` (command IOAs only).
  pub ioa_to_command_uri: HashMap<u32, String>,
  /// `ied_id -> {ioa}`, every IOA semantically owned by that IED.
  pub ied_to_ioas: HashMap<IedId, HashSet<u32>>,
  /// IOAs whose boolean polarity must be flipped.
  pub ioa_invert: HashSet<u32>,
  /// `ioa -> 104 type`, needed by the translation pipeline for coercion.
  pub ioa_types: HashMap<u32, IoaType>,
  /// `ied_id -> [URI]` to register for that IED's supervisor at startup.
  pub ied_data_groups: HashMap<IedId, Vec<String>>,
}

impl GatewayTables {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn ioas_for(&self, ied_id: &IedId) -> HashSet<u32> {
    self.ied_to_ioas.get(ied_id).cloned().unwrap_or_default()
  }

  pub fn ioa_type(&self, ioa: u32) -> Option<IoaType> {
    self.ioa_types.get(&ioa).copied()
  }

  pub fn is_inverted(&self, ioa: u32) -> bool {
    self.ioa_invert.contains(&ioa)
  }

  /// All data (monitoring) IOAs, across every IED.
  pub fn all_data_ioas(&self) -> Vec<(u32, IoaType)> {
    self
      .ioa_types
      .iter()
      .filter(|(ioa, _)| !self.ioa_to_command_uri.contains_key(ioa))
      .map(|(&ioa, &t)| (ioa, t))
      .collect()
  }

  /// All command IOAs, across every IED.
  pub fn all_command_ioas(&self) -> Vec<(u32, IoaType)> {
    self
      .ioa_to_command_uri
      .keys()
      .filter_map(|&ioa| self.ioa_type(ioa).map(|t| (ioa, t)))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ied_id_formats_host_colon_port() {
    assert_eq!(IedId::new("10.0.0.1", 102).as_str(), "10.0.0.1:102");
  }

  #[test]
  fn ioas_for_unknown_ied_is_empty() {
    let t = GatewayTables::new();
    assert!(t.ioas_for(&IedId::new("10.0.0.1", 102)).is_empty());
  }
}
