//! Traversal statistics for batches of traced rays.
//!
//! The mesh itself keeps no counters so that queries stay free of shared
//! state. Callers accumulate per-thread metrics and merge them:
//!
//! ```ignore
//! use rayon::prelude::*;
//!
//! let metrics = rays
//!   .par_iter()
//!   .map(|(origin, direction)| {
//!     let mut m = TraversalMetrics::default();
//!     m.record(&mesh.path(*origin, *direction));
//!     m
//!   })
//!   .reduce(TraversalMetrics::default, TraversalMetrics::merge);
//! ```

use crate::path::PhotonPath;

/// Aggregated statistics over traced paths.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TraversalMetrics {
  /// Number of paths recorded.
  pub paths: u64,
  /// Paths whose ray missed the domain.
  pub empty_paths: u64,
  /// Paths cut short on a wall the ray could not cross.
  pub truncated_paths: u64,
  /// Stalls on cell walls that traversal recovered from.
  pub recovered_stalls: u64,
  /// Total number of segments over all paths.
  pub segments: u64,
  /// Longest single path, in segments.
  pub max_segments: u64,
  /// Sum of all segment lengths.
  pub total_length: f64,
}

impl TraversalMetrics {
  pub fn record(&mut self, path: &PhotonPath) {
    let segments = path.len() as u64;
    self.paths += 1;
    self.empty_paths += path.is_empty() as u64;
    self.truncated_paths += path.is_truncated() as u64;
    self.recovered_stalls += path.recoveries() as u64;
    self.segments += segments;
    self.max_segments = self.max_segments.max(segments);
    self.total_length += path.total_length();
  }

  /// Combine two partial results.
  pub fn merge(self, other: Self) -> Self {
    Self {
      paths: self.paths + other.paths,
      empty_paths: self.empty_paths + other.empty_paths,
      truncated_paths: self.truncated_paths + other.truncated_paths,
      recovered_stalls: self.recovered_stalls + other.recovered_stalls,
      segments: self.segments + other.segments,
      max_segments: self.max_segments.max(other.max_segments),
      total_length: self.total_length + other.total_length,
    }
  }

  /// Mean number of segments over non-empty paths.
  pub fn average_segments(&self) -> f64 {
    let traced = self.paths - self.empty_paths;
    if traced == 0 {
      0.0
    } else {
      self.segments as f64 / traced as f64
    }
  }

  /// Fraction of recorded paths that were truncated.
  pub fn truncation_rate(&self) -> f64 {
    if self.paths == 0 {
      0.0
    } else {
      self.truncated_paths as f64 / self.paths as f64
    }
  }
}
