//! Ray marching through the mesh.
//!
//! A [`PhotonPath`] holds the origin and direction of a ray together with
//! the ordered cells it crosses. [`AdaptiveMesh::fill_path`] computes them:
//!
//! 1. A start point outside the domain is moved to just inside its entry
//!    point; a ray that misses the domain yields no segments.
//! 2. Per step the coordinate system gives the distance to the wall the ray
//!    leaves the current cell through. A segment is emitted and the position
//!    advanced by that distance plus the mesh epsilon.
//! 3. The next leaf is the cached neighbor behind that wall when it contains
//!    the new position, otherwise the result of a full tree search.
//!
//! When rounding keeps the position inside the cell it just left (a stall),
//! every coordinate is moved to the next representable value in the
//! direction of travel and the search is repeated. The budget of
//! [`MAX_STALL_RECOVERIES`] nudges applies between two segments of positive
//! length, so long rays through finely resolved regions may recover from any
//! number of isolated stalls. A ray that exhausts it without leaving the cell
//! is truncated at the current segment with a warning.

use glam::DVec3;
use tracing::warn;

use crate::geometry::CoordinateSystem;
use crate::mesh::AdaptiveMesh;
use crate::tree::NodeId;

/// Nudges a ray may take without advancing through a cell before it is
/// truncated.
pub const MAX_STALL_RECOVERIES: usize = 8;

/// One cell crossed by a ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PathSegment {
  /// Index of the crossed cell.
  pub cell: usize,
  /// Length of the ray inside the cell.
  pub length: f64,
  /// Distance from the path origin to the end of this segment, including the
  /// wall-crossing nudges and any gap outside the domain.
  pub distance: f64,
}

/// A ray and the cells it crosses until it leaves the domain.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhotonPath {
  origin: DVec3,
  direction: DVec3,
  segments: Vec<PathSegment>,
  truncated: bool,
  recoveries: usize,
}

impl PhotonPath {
  /// Create an empty path. `direction` is normalized; a zero direction
  /// produces a path without segments.
  pub fn new(origin: DVec3, direction: DVec3) -> Self {
    Self {
      origin,
      direction: direction.normalize_or_zero(),
      segments: Vec::new(),
      truncated: false,
      recoveries: 0,
    }
  }

  /// Reuse this path for another ray, keeping the segment allocation.
  pub fn reset(&mut self, origin: DVec3, direction: DVec3) {
    self.origin = origin;
    self.direction = direction.normalize_or_zero();
    self.segments.clear();
    self.truncated = false;
    self.recoveries = 0;
  }

  pub fn origin(&self) -> DVec3 {
    self.origin
  }

  pub fn direction(&self) -> DVec3 {
    self.direction
  }

  pub fn segments(&self) -> &[PathSegment] {
    &self.segments
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  /// True if traversal stopped early on a wall it could not cross.
  pub fn is_truncated(&self) -> bool {
    self.truncated
  }

  /// Stalls the traversal recovered from.
  pub fn recoveries(&self) -> usize {
    self.recoveries
  }

  /// Sum of the segment lengths.
  pub fn total_length(&self) -> f64 {
    self.segments.iter().map(|s| s.length).sum()
  }

  /// Distance from the origin to the end of the last segment.
  pub fn end_distance(&self) -> f64 {
    self.segments.last().map_or(0.0, |s| s.distance)
  }

  fn push(&mut self, cell: usize, length: f64, distance: f64) {
    self.segments.push(PathSegment {
      cell,
      length,
      distance,
    });
  }
}

/// Mutable state of one traversal.
struct Marcher {
  position: DVec3,
  distance: f64,
}

impl<C: CoordinateSystem> AdaptiveMesh<C> {
  /// Trace a ray and return the cells it crosses.
  pub fn path(&self, origin: DVec3, direction: DVec3) -> PhotonPath {
    let mut path = PhotonPath::new(origin, direction);
    self.fill_path(&mut path);
    path
  }

  /// Replace the segments of `path` with the cells crossed by its ray.
  pub fn fill_path(&self, path: &mut PhotonPath) {
    path.segments.clear();
    path.truncated = false;
    path.recoveries = 0;

    let direction = path.direction;
    if direction == DVec3::ZERO {
      return;
    }
    let mut marcher = Marcher {
      position: path.origin,
      distance: 0.0,
    };
    let Some(mut node) = self.enter(&mut marcher, direction) else {
      return;
    };
    let mut stalls = 0;

    loop {
      let extent = self.tree().node(node).extent();
      let Some((length, wall)) = self
        .coordinate_system()
        .exit_distance(extent, marcher.position, direction)
      else {
        warn!(origin = ?path.origin, ?direction, "ray cannot leave cell; path truncated");
        path.truncated = true;
        return;
      };

      let cell = self.tree().node(node).cell().unwrap_or_default();
      marcher.distance += length;
      path.push(cell, length, marcher.distance);
      if length > 0.0 {
        stalls = 0;
      }
      marcher.position += (length + self.epsilon()) * direction;
      marcher.distance += self.epsilon();

      let grid = self.coordinate_system().to_grid(marcher.position);
      let next = self
        .tree()
        .node(node)
        .neighbor(wall)
        .filter(|&n| self.tree().node(n).extent().contains(grid))
        .or_else(|| self.tree().locate(grid));

      node = match next {
        Some(next) if next != node => next,
        Some(_) => loop {
          if stalls == MAX_STALL_RECOVERIES {
            warn!(
              origin = ?path.origin,
              ?direction,
              stalls,
              segments = path.len(),
              "ray stuck on a cell wall; path truncated"
            );
            path.truncated = true;
            return;
          }
          stalls += 1;
          match self.recover(&mut marcher, direction) {
            Some(next) if next == node => continue,
            Some(next) => {
              path.recoveries += 1;
              break next;
            }
            None => match self.enter(&mut marcher, direction) {
              Some(next) => break next,
              None => return,
            },
          }
        },
        None => match self.enter(&mut marcher, direction) {
          Some(next) => next,
          None => return,
        },
      };
    }
  }

  /// Locate the leaf holding the marcher, first moving it to the domain
  /// entry point if it lies outside. `None` if the ray never (re-)enters.
  fn enter(&self, marcher: &mut Marcher, direction: DVec3) -> Option<NodeId> {
    if let Some(node) = self.locate(marcher.position) {
      return Some(node);
    }
    let distance = self
      .coordinate_system()
      .entry_distance(marcher.position, direction)?;
    let step = distance + self.epsilon();
    marcher.position += step * direction;
    marcher.distance += step;
    self.locate(marcher.position)
  }

  /// Nudge a stuck marcher by one ulp per coordinate along the direction of
  /// travel and locate it again.
  fn recover(&self, marcher: &mut Marcher, direction: DVec3) -> Option<NodeId> {
    let before = marcher.position;
    for axis in 0..3 {
      if direction[axis] != 0.0 {
        marcher.position[axis] = next_after(marcher.position[axis], direction[axis] > 0.0);
      }
    }
    marcher.distance += (marcher.position - before).dot(direction);
    self.locate(marcher.position)
  }
}

/// Next representable `f64` above (`up`) or below `x`.
pub(crate) fn next_after(x: f64, up: bool) -> f64 {
  if !x.is_finite() {
    return x;
  }
  if x == 0.0 {
    let tiny = f64::from_bits(1);
    return if up { tiny } else { -tiny };
  }
  let bits = x.to_bits();
  if (x > 0.0) == up {
    f64::from_bits(bits + 1)
  } else {
    f64::from_bits(bits - 1)
  }
}

#[cfg(test)]
#[path = "path_test.rs"]
mod path_test;
