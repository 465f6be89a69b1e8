//! Turns an INI file into the frozen routing tables in
//! [`crate::mapping::GatewayTables`].
//!
//! Config line format: `iec61850://host[:port]/IED_NAME/LD/LN.DO[.DA]...`,
//! with an optional trailing `:invers=true` polarity flag. The flag is
//! stripped before the remainder is parsed as a URI.

use std::collections::HashSet;
use std::path::Path;

#[allow(unused_imports)]
use log::{error, info, warn};
use thiserror::Error;
use url::Url;

use crate::mapping::{GatewayTables, IedId};
use crate::server104::ioa::IoaType;

const INVERS_SUFFIX: &str = ":invers=true";

/// Default values for the tunables exposed in an optional `[gateway]`
/// section.
#[derive(Debug, Clone, Copy)]
pub struct GatewaySettings {
  pub reconnect_delay_secs: u64,
  pub connection_check_interval_secs: u64,
  pub queue_capacity: usize,
}

impl Default for GatewaySettings {
  fn default() -> Self {
    GatewaySettings {
      reconnect_delay_secs: 15,
      connection_check_interval_secs: 30,
      queue_capacity: 256,
    }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  FileNotFound(String),
  #[error("I/O error reading config: {0}")]
  Io(#[from] std::io::Error),
  #[error("failed to parse ini file: {0}")]
  IniParse(String),
  #[error("line '{0}' is not a valid URI")]
  BadUri(String),
  #[error("line '{0}' is missing a host")]
  MissingHost(String),
  #[error("line '{0}' is missing a path")]
  MissingPath(String),
  #[error("IOA '{0}' is not a valid integer")]
  BadIoa(String),
  #[error("IOA {0} is out of the valid 1..=65535 range")]
  IoaOutOfRange(u32),
}

/// `(section name, 104 type)` for the monitoring sections.
const DATA_SECTIONS: &[(&str, IoaType)] = &[
  ("measuredvaluescaled", IoaType::MeasuredValueScaled),
  ("measuredvaluefloat", IoaType::MeasuredValueShort),
  ("singlepointinformation", IoaType::SinglePointInformation),
  ("doublepointinformation", IoaType::DoublePointInformation),
];

/// `(section name, 104 type)` for the control sections.
const COMMAND_SECTIONS: &[(&str, IoaType)] = &[
  ("singlepointcommand", IoaType::SingleCommand),
  ("doublepointcommand", IoaType::DoubleCommand),
];

/// One stripped-and-parsed config line, prior to table insertion.
struct ParsedLine {
  ioa: u32,
  ied_id: IedId,
  uri_part: String,
  mms_path: String,
  invert: bool,
}

fn strip_invers_suffix(config_line: &str) -> (&str, bool) {
  match config_line.strip_suffix(INVERS_SUFFIX) {
    Some(rest) => (rest, true),
    None => (config_line, false),
  }
}

fn parse_line(ioa_key: &str, config_line: &str) -> Result<ParsedLine, ConfigError> {
  let ioa: u32 = ioa_key
    .parse()
    .map_err(|_| ConfigError::BadIoa(ioa_key.to_string()))?;
  if ioa < 1 || ioa > 65535 {
    return Err(ConfigError::IoaOutOfRange(ioa));
  }

  let (uri_part, invert) = strip_invers_suffix(config_line);
  let url = Url::parse(uri_part).map_err(|_| ConfigError::BadUri(config_line.to_string()))?;
  let host = url
    .host_str()
    .ok_or_else(|| ConfigError::MissingHost(config_line.to_string()))?;
  let port = url.port().unwrap_or(102);
  let path = url.path().trim_start_matches('/');
  if path.is_empty() {
    return Err(ConfigError::MissingPath(config_line.to_string()));
  }

  Ok(ParsedLine {
    ioa,
    ied_id: IedId::new(host, port),
    uri_part: uri_part.to_string(),
    mms_path: path.to_string(),
    invert,
  })
}

/// Build the frozen routing tables from an INI document already read into
/// a string (split out from file I/O so it is trivially unit-testable).
pub fn build_tables_from_str(contents: &str) -> Result<(GatewayTables, GatewaySettings), ConfigError> {
  let doc = ini::Ini::load_from_str(contents).map_err(|e| ConfigError::IniParse(e.to_string()))?;
  let mut tables = GatewayTables::new();
  let mut settings = GatewaySettings::default();

  if let Some(gw_section) = doc.section(Some("gateway")) {
    if let Some(v) = gw_section.get("reconnect_delay_secs") {
      if let Ok(n) = v.parse() {
        settings.reconnect_delay_secs = n;
      }
    }
    if let Some(v) = gw_section.get("connection_check_interval_secs") {
      if let Ok(n) = v.parse() {
        settings.connection_check_interval_secs = n;
      }
    }
    if let Some(v) = gw_section.get("queue_capacity") {
      if let Ok(n) = v.parse() {
        settings.queue_capacity = n;
      }
    }
  }

  for &(section_name, ioa_type) in DATA_SECTIONS.iter().chain(COMMAND_SECTIONS.iter()) {
    let Some(section) = doc.section(Some(section_name)) else {
      continue;
    };
    let is_command = ioa_type.is_command();

    for (ioa_key, config_line) in section.iter() {
      let parsed = match parse_line(ioa_key, config_line) {
        Ok(p) => p,
        Err(e) => {
          warn!("skipping [{section_name}] {ioa_key} = {config_line}: {e}");
          continue;
        }
      };

      if tables.ioa_types.contains_key(&parsed.ioa) {
        error!(
          "IOA {} already declared in config, skipping duplicate in [{section_name}]",
          parsed.ioa
        );
        continue;
      }

      tables
        .ied_to_ioas
        .entry(parsed.ied_id.clone())
        .or_insert_with(HashSet::new)
        .insert(parsed.ioa);
      tables.ioa_types.insert(parsed.ioa, ioa_type);

      if parsed.invert && ioa_type.supports_inversion() {
        tables.ioa_invert.insert(parsed.ioa);
      } else if parsed.invert {
        warn!(
          "IOA {} requested :invers=true but {:?} does not support inversion, ignoring",
          parsed.ioa, ioa_type
        );
      }

      if is_command {
        tables.ioa_to_command_uri.insert(parsed.ioa, parsed.uri_part);
      } else {
        if tables.mms_to_ioa.contains_key(&parsed.mms_path) {
          warn!(
            "duplicate mms_path '{}', IOA {} overwrites previous mapping",
            parsed.mms_path, parsed.ioa
          );
        }
        tables.mms_to_ioa.insert(parsed.mms_path.clone(), parsed.ioa);

        let group = tables.ied_data_groups.entry(parsed.ied_id.clone()).or_default();
        if !group.contains(&parsed.uri_part) {
          group.push(parsed.uri_part);
        }
      }
    }
  }

  info!(
    "config parsed: {} IED(s), {} data point(s), {} command point(s)",
    tables.ied_data_groups.len(),
    tables.mms_to_ioa.len(),
    tables.ioa_to_command_uri.len()
  );

  Ok((tables, settings))
}

/// Load and parse the config file at `path`.
pub fn build_tables(path: impl AsRef<Path>) -> Result<(GatewayTables, GatewaySettings), ConfigError> {
  let path = path.as_ref();
  if !path.exists() {
    return Err(ConfigError::FileNotFound(path.display().to_string()));
  }
  let contents = std::fs::read_to_string(path)?;
  build_tables_from_str(&contents)
}

/// First path segment of an `mms_path`, i.e. the IED name. Used by the
/// supervisor to build a fallback heartbeat-read path.
pub fn ied_name_from_path(mms_path: &str) -> Option<&str> {
  mms_path.split('/').next().filter(|s| !s.is_empty())
}
