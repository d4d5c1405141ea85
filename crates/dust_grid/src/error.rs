//! Error types shared by record sources, tree construction and queries.

use thiserror::Error;

/// Errors raised while importing a mesh or querying it with bad indices.
///
/// Points outside the domain are not errors: queries return `None` or zero.
#[derive(Debug, Error)]
pub enum GridError {
  /// The record stream is truncated, carries superfluous records, or holds
  /// values that cannot be parsed.
  #[error("malformed mesh input: {reason}")]
  MalformedInput { reason: String },

  /// A field, cell or distribution index that the mesh does not know about.
  #[error("{what} index {index} out of range (0..{len})")]
  IndexOutOfRange {
    what: &'static str,
    index: i64,
    len: usize,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl GridError {
  pub(crate) fn malformed(reason: impl Into<String>) -> Self {
    Self::MalformedInput {
      reason: reason.into(),
    }
  }

  pub(crate) fn out_of_range(what: &'static str, index: impl TryInto<i64>, len: usize) -> Self {
    Self::IndexOutOfRange {
      what,
      index: index.try_into().unwrap_or(i64::MAX),
      len,
    }
  }
}

pub type Result<T> = std::result::Result<T, GridError>;
