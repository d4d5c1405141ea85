//! Axis-aligned boxes in grid space, and the six walls that bound them.

use glam::DVec3;

/// One of the six faces of a box-shaped cell.
///
/// Walls are ordered by axis, minimum face first, so `wall as usize` indexes
/// per-face arrays such as the neighbor cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wall {
  /// Minimum x face.
  Back = 0,
  /// Maximum x face.
  Front = 1,
  /// Minimum y face.
  Left = 2,
  /// Maximum y face.
  Right = 3,
  /// Minimum z face.
  Bottom = 4,
  /// Maximum z face.
  Top = 5,
}

impl Wall {
  pub const ALL: [Wall; 6] = [
    Wall::Back,
    Wall::Front,
    Wall::Left,
    Wall::Right,
    Wall::Bottom,
    Wall::Top,
  ];

  /// Wall on the given axis (0 = x, 1 = y, 2 = z) and side.
  #[inline]
  pub fn from_axis(axis: usize, max_side: bool) -> Self {
    Self::ALL[axis * 2 + max_side as usize]
  }

  #[inline]
  pub fn axis(self) -> usize {
    self as usize / 2
  }

  /// True for the faces at the maximum coordinate of their axis.
  #[inline]
  pub fn is_max(self) -> bool {
    self as usize % 2 == 1
  }
}

/// Double-precision axis-aligned box.
///
/// Used both for the domain and for every tree node. Containment is inclusive
/// on all six faces, so a point exactly on a shared wall belongs to both cells.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridBox {
  /// Minimum corner (inclusive).
  pub min: DVec3,
  /// Maximum corner (inclusive).
  pub max: DVec3,
}

impl GridBox {
  /// Create a new box from min and max corners.
  ///
  /// # Panics
  /// Debug-asserts that min <= max on all axes.
  pub fn new(min: DVec3, max: DVec3) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "box min must be <= max on all axes"
    );
    Self { min, max }
  }

  pub fn from_center_half_extents(center: DVec3, half_extents: DVec3) -> Self {
    Self {
      min: center - half_extents,
      max: center + half_extents,
    }
  }

  #[inline]
  pub fn contains(&self, point: DVec3) -> bool {
    point.x >= self.min.x
      && point.x <= self.max.x
      && point.y >= self.min.y
      && point.y <= self.max.y
      && point.z >= self.min.z
      && point.z <= self.max.z
  }

  /// Sub-box (i, j, k) of a regular `counts` grid laid over this box.
  ///
  /// Bounds are computed by linear interpolation from the integer indices, so
  /// adjacent sub-boxes share bit-identical walls.
  pub fn sub_box(&self, i: usize, j: usize, k: usize, counts: [usize; 3]) -> GridBox {
    let lerp = |axis: usize, n: usize| {
      let frac = n as f64 / counts[axis] as f64;
      self.min[axis] + frac * (self.max[axis] - self.min[axis])
    };
    let snap = |axis: usize, n: usize| {
      if n == counts[axis] {
        self.max[axis]
      } else {
        lerp(axis, n)
      }
    };
    GridBox {
      min: DVec3::new(snap(0, i), snap(1, j), snap(2, k)),
      max: DVec3::new(snap(0, i + 1), snap(1, j + 1), snap(2, k + 1)),
    }
  }

  /// Fractional position of a point relative to this box, 0 at `min` and 1
  /// at `max` on each axis.
  #[inline]
  pub fn fraction(&self, point: DVec3) -> DVec3 {
    (point - self.min) / self.size()
  }

  #[inline]
  pub fn size(&self) -> DVec3 {
    self.max - self.min
  }

  #[inline]
  pub fn center(&self) -> DVec3 {
    (self.min + self.max) * 0.5
  }

  #[inline]
  pub fn volume(&self) -> f64 {
    let size = self.size();
    size.x * size.y * size.z
  }

  /// Length of the diagonal from `min` to `max`.
  #[inline]
  pub fn diagonal(&self) -> f64 {
    self.size().length()
  }

  /// Coordinate of the given wall along its axis.
  #[inline]
  pub fn wall_coordinate(&self, wall: Wall) -> f64 {
    if wall.is_max() {
      self.max[wall.axis()]
    } else {
      self.min[wall.axis()]
    }
  }

  /// Center of the given face.
  pub fn face_center(&self, wall: Wall) -> DVec3 {
    let mut point = self.center();
    point[wall.axis()] = self.wall_coordinate(wall);
    point
  }
}
