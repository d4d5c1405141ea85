//! Coordinate systems the mesh tree can be laid out in.
//!
//! The tree always partitions an axis-aligned box in *grid space*. A
//! [`CoordinateSystem`] maps world positions into that space and supplies
//! the geometry that depends on what the grid axes mean: cell volumes,
//! uniform sampling inside a cell, and ray/wall distances.
//!
//! - [`Cartesian`]: grid space is world space.
//! - [`Spherical`]: grid axes are `(r, θ, φ)` over a shell, with
//!   `θ ∈ [0, π]` measured from +z and `φ ∈ [-π, π]` measured from +x.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt::Debug;

use glam::DVec3;
use rand::Rng;

use crate::bounds::{GridBox, Wall};

/// Scale of the mesh epsilon relative to the world diagonal.
pub const EPSILON_SCALE: f64 = 1e-12;

/// Direction components at or below this magnitude are treated as zero.
pub const DIRECTION_EPSILON: f64 = 1e-15;

/// Geometry strategy for an adaptive mesh.
pub trait CoordinateSystem: Clone + Debug + Send + Sync {
  /// Box partitioned by the root of the tree, in grid coordinates.
  fn grid_domain(&self) -> GridBox;

  /// Axis-aligned world-space box enclosing the domain.
  fn world_extent(&self) -> GridBox;

  fn to_grid(&self, position: DVec3) -> DVec3;

  fn to_world(&self, grid: DVec3) -> DVec3;

  /// Bring a grid point that crossed a periodic boundary back into range.
  fn wrap(&self, grid: DVec3) -> DVec3 {
    grid
  }

  fn cell_volume(&self, cell: &GridBox) -> f64;

  /// World position drawn uniformly (by volume) inside a grid-space cell.
  fn random_position<R: Rng + ?Sized>(&self, cell: &GridBox, rng: &mut R) -> DVec3;

  /// Per-axis grid-space offset used to probe across a cell face.
  fn probe_epsilon(&self) -> DVec3;

  /// Distance along `direction` from `position` (inside `cell`) to the
  /// cell boundary, and the wall crossed there. `None` if the ray never
  /// leaves the cell.
  fn exit_distance(&self, cell: &GridBox, position: DVec3, direction: DVec3)
    -> Option<(f64, Wall)>;

  /// Distance along `direction` until the ray enters the domain: zero if
  /// `position` is already inside, `None` if the ray never enters.
  fn entry_distance(&self, position: DVec3, direction: DVec3) -> Option<f64>;
}

// =============================================================================
// Cartesian
// =============================================================================

/// Cartesian grid over an axis-aligned world box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cartesian {
  pub domain: GridBox,
}

impl Cartesian {
  pub fn new(domain: GridBox) -> Self {
    Self { domain }
  }
}

impl CoordinateSystem for Cartesian {
  fn grid_domain(&self) -> GridBox {
    self.domain
  }

  fn world_extent(&self) -> GridBox {
    self.domain
  }

  #[inline]
  fn to_grid(&self, position: DVec3) -> DVec3 {
    position
  }

  #[inline]
  fn to_world(&self, grid: DVec3) -> DVec3 {
    grid
  }

  fn cell_volume(&self, cell: &GridBox) -> f64 {
    cell.volume()
  }

  fn random_position<R: Rng + ?Sized>(&self, cell: &GridBox, rng: &mut R) -> DVec3 {
    let u = DVec3::new(rng.random(), rng.random(), rng.random());
    cell.min + u * cell.size()
  }

  fn probe_epsilon(&self) -> DVec3 {
    DVec3::splat(EPSILON_SCALE * self.domain.diagonal())
  }

  fn exit_distance(
    &self,
    cell: &GridBox,
    position: DVec3,
    direction: DVec3,
  ) -> Option<(f64, Wall)> {
    let mut best: Option<(f64, Wall)> = None;
    for axis in 0..3 {
      let k = direction[axis];
      if k.abs() <= DIRECTION_EPSILON {
        continue;
      }
      let wall = Wall::from_axis(axis, k > 0.0);
      let distance = (cell.wall_coordinate(wall) - position[axis]) / k;
      if best.map_or(true, |(d, _)| distance < d) {
        best = Some((distance, wall));
      }
    }
    // A position rounded onto the far side of the wall gives a tiny
    // negative distance.
    best.map(|(d, wall)| (d.max(0.0), wall))
  }

  fn entry_distance(&self, position: DVec3, direction: DVec3) -> Option<f64> {
    if self.domain.contains(position) {
      return Some(0.0);
    }
    let mut t_near = f64::NEG_INFINITY;
    let mut t_far = f64::INFINITY;
    for axis in 0..3 {
      let (p, k) = (position[axis], direction[axis]);
      let (lo, hi) = (self.domain.min[axis], self.domain.max[axis]);
      if k.abs() <= DIRECTION_EPSILON {
        if p < lo || p > hi {
          return None;
        }
        continue;
      }
      let t1 = (lo - p) / k;
      let t2 = (hi - p) / k;
      t_near = t_near.max(t1.min(t2));
      t_far = t_far.min(t1.max(t2));
    }
    if t_near > t_far || t_far < 0.0 {
      None
    } else {
      Some(t_near.max(0.0))
    }
  }
}

// =============================================================================
// Spherical
// =============================================================================

/// Spherical grid over the shell `r_min ≤ r ≤ r_max`, full angular range.
///
/// Grid axes are `(r, θ, φ)`. Walls map as `Back`/`Front` = inner/outer
/// sphere, `Left`/`Right` = cones of minimum/maximum θ, `Bottom`/`Top` =
/// half-planes of minimum/maximum φ.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spherical {
  pub r_min: f64,
  pub r_max: f64,
}

impl Spherical {
  /// # Panics
  /// Debug-asserts that `0 <= r_min < r_max`.
  pub fn new(r_min: f64, r_max: f64) -> Self {
    debug_assert!(
      r_min >= 0.0 && r_min < r_max,
      "spherical shell needs 0 <= r_min < r_max"
    );
    Self { r_min, r_max }
  }

  fn world_epsilon(&self) -> f64 {
    EPSILON_SCALE * self.world_extent().diagonal()
  }
}

/// Angles closer than this to a special value are treated as equal to it.
const ANGLE_TOLERANCE: f64 = 1e-12;

impl CoordinateSystem for Spherical {
  fn grid_domain(&self) -> GridBox {
    GridBox::new(
      DVec3::new(self.r_min, 0.0, -PI),
      DVec3::new(self.r_max, PI, PI),
    )
  }

  fn world_extent(&self) -> GridBox {
    GridBox::from_center_half_extents(DVec3::ZERO, DVec3::splat(self.r_max))
  }

  fn to_grid(&self, position: DVec3) -> DVec3 {
    let r = position.length();
    let theta = if r > 0.0 {
      (position.z / r).clamp(-1.0, 1.0).acos()
    } else {
      0.0
    };
    let phi = position.y.atan2(position.x);
    DVec3::new(r, theta, phi)
  }

  fn to_world(&self, grid: DVec3) -> DVec3 {
    let (sin_theta, cos_theta) = grid.y.sin_cos();
    let (sin_phi, cos_phi) = grid.z.sin_cos();
    grid.x * DVec3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
  }

  fn wrap(&self, mut grid: DVec3) -> DVec3 {
    if grid.z > PI {
      grid.z -= TAU;
    } else if grid.z < -PI {
      grid.z += TAU;
    }
    grid
  }

  fn cell_volume(&self, cell: &GridBox) -> f64 {
    let radial = (cell.max.x.powi(3) - cell.min.x.powi(3)) / 3.0;
    let polar = cell.min.y.cos() - cell.max.y.cos();
    let azimuthal = cell.max.z - cell.min.z;
    radial * polar * azimuthal
  }

  fn random_position<R: Rng + ?Sized>(&self, cell: &GridBox, rng: &mut R) -> DVec3 {
    let (r1, r2) = (cell.min.x, cell.max.x);
    let r = (r1.powi(3) + rng.random::<f64>() * (r2.powi(3) - r1.powi(3))).cbrt();
    let (c1, c2) = (cell.min.y.cos(), cell.max.y.cos());
    let theta = (c1 - rng.random::<f64>() * (c1 - c2)).clamp(-1.0, 1.0).acos();
    let phi = cell.min.z + rng.random::<f64>() * (cell.max.z - cell.min.z);
    self.to_world(DVec3::new(r, theta, phi))
  }

  fn probe_epsilon(&self) -> DVec3 {
    DVec3::new(self.world_epsilon(), EPSILON_SCALE * PI, EPSILON_SCALE * TAU)
  }

  fn exit_distance(
    &self,
    cell: &GridBox,
    position: DVec3,
    direction: DVec3,
  ) -> Option<(f64, Wall)> {
    let mut best: Option<(f64, Wall)> = None;
    let mut consider = |distance: f64, wall: Wall| {
      if distance > 0.0 && best.map_or(true, |(d, _)| distance < d) {
        best = Some((distance, wall));
      }
    };

    // Spheres: |p + s k|^2 = R^2 with |k| = 1.
    let b = position.dot(direction);
    let pp = position.length_squared();
    let outer = b * b - (pp - cell.max.x * cell.max.x);
    if outer >= 0.0 {
      consider(-b + outer.sqrt(), Wall::Front);
    }
    if cell.min.x > 0.0 {
      let inner = b * b - (pp - cell.min.x * cell.min.x);
      if inner >= 0.0 {
        consider(-b - inner.sqrt(), Wall::Back);
      }
    }

    for (theta, wall) in [(cell.min.y, Wall::Left), (cell.max.y, Wall::Right)] {
      for distance in cone_crossings(theta, position, direction) {
        consider(distance, wall);
      }
    }

    if cell.max.z - cell.min.z < TAU - ANGLE_TOLERANCE {
      for (phi, wall) in [(cell.min.z, Wall::Bottom), (cell.max.z, Wall::Top)] {
        if let Some(distance) = half_plane_crossing(phi, position, direction) {
          consider(distance, wall);
        }
      }
    }

    best
  }

  fn entry_distance(&self, position: DVec3, direction: DVec3) -> Option<f64> {
    let r = position.length();
    if r >= self.r_min && r <= self.r_max {
      return Some(0.0);
    }
    let b = position.dot(direction);
    if r > self.r_max {
      let disc = b * b - (r * r - self.r_max * self.r_max);
      if disc < 0.0 {
        return None;
      }
      let s = -b - disc.sqrt();
      (s >= 0.0).then_some(s)
    } else {
      // Inside the central hole: leave it through the inner sphere.
      let disc = b * b - (r * r - self.r_min * self.r_min);
      Some((-b + disc.max(0.0).sqrt()).max(0.0))
    }
  }
}

/// Positive distances at which the ray crosses the cone of polar angle
/// `theta`. The cones at the poles are degenerate and never crossed.
fn cone_crossings(theta: f64, p: DVec3, k: DVec3) -> impl Iterator<Item = f64> {
  let mut roots = [f64::NAN; 2];
  if theta > ANGLE_TOLERANCE && theta < PI - ANGLE_TOLERANCE {
    if (theta - FRAC_PI_2).abs() <= ANGLE_TOLERANCE {
      if k.z.abs() > DIRECTION_EPSILON {
        roots[0] = -p.z / k.z;
      }
    } else {
      let c = theta.cos();
      let c2 = c * c;
      // (p_z + s k_z)^2 = c^2 |p + s k|^2
      let a = k.z * k.z - c2;
      let b = 2.0 * (p.z * k.z - c2 * p.dot(k));
      let cc = p.z * p.z - c2 * p.length_squared();
      roots = solve_quadratic(a, b, cc);
      // Keep only the nappe on the same side of the equator as the cone.
      for root in roots.iter_mut() {
        if (p.z + *root * k.z) * c <= 0.0 {
          *root = f64::NAN;
        }
      }
    }
  }
  roots.into_iter().filter(|s| *s > 0.0)
}

/// Positive distance at which the ray crosses the half-plane of azimuth
/// `phi` bounded by the z-axis.
fn half_plane_crossing(phi: f64, p: DVec3, k: DVec3) -> Option<f64> {
  let (sin_phi, cos_phi) = phi.sin_cos();
  let normal = DVec3::new(-sin_phi, cos_phi, 0.0);
  let denom = normal.dot(k);
  if denom.abs() <= DIRECTION_EPSILON {
    return None;
  }
  let s = -normal.dot(p) / denom;
  let hit = p + s * k;
  (s > 0.0 && cos_phi * hit.x + sin_phi * hit.y > 0.0).then_some(s)
}

/// Real roots of `a s^2 + b s + c = 0`, NaN where a root does not exist.
fn solve_quadratic(a: f64, b: f64, c: f64) -> [f64; 2] {
  if a.abs() <= DIRECTION_EPSILON {
    if b.abs() <= DIRECTION_EPSILON {
      return [f64::NAN; 2];
    }
    return [-c / b, f64::NAN];
  }
  let disc = b * b - 4.0 * a * c;
  if disc < 0.0 {
    return [f64::NAN; 2];
  }
  let q = -0.5 * (b + b.signum() * disc.sqrt());
  if q == 0.0 {
    return [0.0, f64::NAN];
  }
  [q / a, c / q]
}

#[cfg(test)]
#[path = "geometry_test.rs"]
mod geometry_test;
