//! Information Object Address types: the 104 value kinds, quality bits, and
//! the in-memory entry the adapter keeps per IOA.

use enumflags2::{bitflags, BitFlags};

/// The subset of IEC 60870-5-104 information object types this gateway
/// speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoaType {
  MeasuredValueScaled,
  MeasuredValueShort,
  SinglePointInformation,
  DoublePointInformation,
  SingleCommand,
  DoubleCommand,
}

impl IoaType {
  /// Command types accept inbound 104 commands; the rest are monitoring
  /// points pushed out by the translation pipeline.
  pub fn is_command(self) -> bool {
    matches!(self, IoaType::SingleCommand | IoaType::DoubleCommand)
  }

  /// Polarity inversion only makes sense for single/double point types;
  /// it is silently ignored for measurements.
  pub fn supports_inversion(self) -> bool {
    matches!(
      self,
      IoaType::SinglePointInformation | IoaType::DoublePointInformation
    )
  }
}

/// Quality bits attached to a 60870-5 value.
///
/// `Invalid | NotTopical` is the IEC 60870-5 "quality byte 48" convention:
/// `Invalid` is bit 0x10 (16), `NotTopical` is bit 0x20 (32); together they
/// sum to 48.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
  Invalid = 0x10,
  NotTopical = 0x20,
}

/// A spontaneous ASDU as emitted during invalidation.
#[derive(Debug, Clone)]
pub struct Asdu {
  pub ioa: u32,
  pub value: f64,
  pub quality: BitFlags<Quality>,
}

/// In-memory state the 104 adapter keeps for one IOA.
#[derive(Debug, Clone)]
pub struct IoaEntry {
  pub ioa: u32,
  pub ioa_type: IoaType,
  pub current_value: f64,
  pub quality: BitFlags<Quality>,
}

impl IoaEntry {
  pub fn new(ioa: u32, ioa_type: IoaType) -> Self {
    IoaEntry {
      ioa,
      ioa_type,
      current_value: 0.0,
      quality: BitFlags::empty(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn invalid_and_not_topical_sum_to_48() {
    let q = Quality::Invalid | Quality::NotTopical;
    assert_eq!(q.bits(), 48);
  }

  #[test]
  fn command_types_are_command() {
    assert!(IoaType::SingleCommand.is_command());
    assert!(IoaType::DoubleCommand.is_command());
    assert!(!IoaType::MeasuredValueScaled.is_command());
  }

  #[test]
  fn inversion_support() {
    assert!(IoaType::SinglePointInformation.supports_inversion());
    assert!(IoaType::DoublePointInformation.supports_inversion());
    assert!(!IoaType::MeasuredValueScaled.supports_inversion());
    assert!(!IoaType::MeasuredValueShort.supports_inversion());
  }
}
