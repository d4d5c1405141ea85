//! Record sources that feed the tree builder.
//!
//! A mesh file is read as a depth-first stream of two record kinds:
//!
//! - **Subdivision**: three child-grid counts `(nx, ny, nz)`. The next
//!   `nx·ny·nz` subtrees, x fastest, fill the node's sub-boxes.
//! - **Leaf**: the field values of one cell.
//!
//! The order of the stream is the implicit cell order of the mesh: the n-th
//! leaf record becomes cell n.
//!
//! # Module Structure
//!
//! - [`text`]: line-oriented text format (`#` comments, `!` subdivisions)
//! - [`block`]: seekable binary block format with an embedded refinement
//!   forest

pub mod block;
pub mod text;

pub use block::BlockRecordSource;
pub use text::TextRecordSource;

use crate::error::Result;

/// Streaming access to the records of a mesh file.
///
/// `open` and `close` bracket the use of the underlying resource. After
/// `open`, each call to `advance` moves to the next record and reports whether
/// one exists; the introspection methods then describe that record.
pub trait RecordSource {
  /// Prepare the stream so that the next `advance` yields the first record.
  fn open(&mut self) -> Result<()>;

  /// Release the stream. Calling `close` twice is harmless.
  fn close(&mut self);

  /// Move to the next record. Returns `false` at the end of the stream.
  fn advance(&mut self) -> Result<bool>;

  /// True if the current record is a Subdivision record.
  fn is_subdivision(&self) -> bool;

  /// Child-grid counts of the current Subdivision record.
  ///
  /// Counts are returned as read; the tree builder rejects values below one.
  fn subdivision_counts(&self) -> [i64; 3];

  /// Value of the given field in the current Leaf record.
  fn field_value(&self, index: usize) -> Result<f64>;
}
