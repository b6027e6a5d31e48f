//! Field paths into structured responses.
//!
//! A field path is a dot-separated list of segments. Numeric segments index
//! into arrays, every other segment is a map key:
//!
//! ```text
//! Queues.0.QueueId       -> response["Queues"][0]["QueueId"]
//! Instance.InstanceAccessUrl
//! ```
//!
//! The empty path addresses the whole value.

use std::fmt;

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
  Key(String),
  Index(usize),
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath {
  segments: Vec<PathSegment>,
}

impl FieldPath {
  /// Parse a dot-separated path. Empty segments are ignored.
  pub fn parse(path: &str) -> Self {
    let segments = path
      .split('.')
      .filter(|s| !s.is_empty())
      .map(|s| match s.parse::<usize>() {
        Ok(index) => PathSegment::Index(index),
        Err(_) => PathSegment::Key(s.to_string()),
      })
      .collect();
    Self { segments }
  }

  pub fn segments(&self) -> &[PathSegment] {
    &self.segments
  }

  /// Walk the path through a JSON value.
  ///
  /// An index segment also matches a map key with the same digits, so
  /// `{"0": ..}` is reachable through `0`.
  pub fn lookup<'a>(&self, value: &'a serde_json::Value) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in &self.segments {
      current = match (segment, current) {
        (PathSegment::Index(i), serde_json::Value::Array(items)) => items.get(*i)?,
        (PathSegment::Index(i), serde_json::Value::Object(map)) => map.get(&i.to_string())?,
        (PathSegment::Key(k), serde_json::Value::Object(map)) => map.get(k)?,
        _ => return None,
      };
    }
    Some(current)
  }
}

impl fmt::Display for FieldPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, segment) in self.segments.iter().enumerate() {
      if i > 0 {
        f.write_str(".")?;
      }
      match segment {
        PathSegment::Key(k) => f.write_str(k)?,
        PathSegment::Index(n) => write!(f, "{}", n)?,
      }
    }
    Ok(())
  }
}
