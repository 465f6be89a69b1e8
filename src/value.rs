//! Runtime representation of heterogeneous IED report/poll payloads.
//!
//! The native MMS client hands back values whose shape is not known until
//! runtime: a bare float, a bare int, or an arbitrarily nested sequence of
//! either. [`Value`] is the closed sum type that stands in for that, and
//! [`Value::first_float`] is the depth-first walk that the translation
//! pipeline uses to pull a single number out of it.

/// A reported value as delivered by the native MMS client.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Float(f64),
  Int(i64),
  Seq(Vec<Value>),
}

impl Value {
  /// Depth-first search for the first floating-point value contained in
  /// `self`. Ints promote to float. Returns `None` if no numeric leaf is
  /// found anywhere in the structure.
  pub fn first_float(&self) -> Option<f64> {
    match self {
      Value::Float(f) => Some(*f),
      Value::Int(i) => Some(*i as f64),
      Value::Seq(items) => items.iter().find_map(Value::first_float),
    }
  }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self {
    Value::Float(f)
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Value::Int(i)
  }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
  fn from(items: Vec<T>) -> Self {
    Value::Seq(items.into_iter().map(Into::into).collect())
  }
}
