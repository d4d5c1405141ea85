//! AdaptiveMesh - spatial index over an imported adaptive mesh.
//!
//! Owns the mesh tree, the imported field columns and the registered
//! density distributions. Construction and distribution registration take
//! `&mut self` and happen once during setup; every query afterwards takes
//! `&self` and may run from any number of threads.
//!
//! # Fields
//!
//! Callers request field columns by index when the mesh is built. Negative
//! indices are ignored and duplicates share storage, so each distinct
//! column is read from the record stream exactly once.
//!
//! # Densities
//!
//! A density distribution combines a density column, an optional multiplier
//! column and a constant fraction:
//!
//! ```text
//! density = max(0, field × (multiplier or 1) × fraction)
//! ```
//!
//! The total density of a cell is the sum over all distributions.

use std::collections::HashMap;

use glam::DVec3;
use rand::Rng;
use tracing::{debug, info};

use crate::bounds::{GridBox, Wall};
use crate::error::{GridError, Result};
use crate::geometry::{Cartesian, CoordinateSystem, EPSILON_SCALE};
use crate::source::RecordSource;
use crate::tree::{MeshTree, NodeId};

/// Number of quadrature samples for the axis surface densities.
pub const SIGMA_SAMPLES: usize = 10_000;

/// One registered density distribution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DensityDistribution {
  density_slot: usize,
  multiplier_slot: Option<usize>,
  fraction: f64,
  integrated: f64,
}

impl DensityDistribution {
  pub fn fraction(&self) -> f64 {
    self.fraction
  }

  /// Sum over all cells of density × cell volume.
  pub fn integrated_density(&self) -> f64 {
    self.integrated
  }
}

/// Adaptive mesh spatial index, generic over its coordinate system.
#[derive(Clone, Debug)]
pub struct AdaptiveMesh<C: CoordinateSystem = Cartesian> {
  coords: C,
  tree: MeshTree,
  /// Requested field column -> storage slot.
  slots: HashMap<usize, usize>,
  /// Per storage slot, one value per cell.
  fields: Vec<Vec<f64>>,
  volumes: Vec<f64>,
  distributions: Vec<DensityDistribution>,
  /// Running sum of total density × volume, by cell index.
  cumulative_mass: Vec<f64>,
  eps: f64,
}

impl<C: CoordinateSystem> AdaptiveMesh<C> {
  /// Import a mesh from a record source.
  ///
  /// The source is opened, read until the root node is complete, checked for
  /// superfluous records and closed again, also when an error occurs. The
  /// neighbor caches are populated before returning.
  #[tracing::instrument(skip_all, name = "mesh::build")]
  pub fn build<S: RecordSource>(source: &mut S, coords: C, field_indices: &[i32]) -> Result<Self> {
    let mut slots = HashMap::new();
    let mut columns = Vec::new();
    for &index in field_indices {
      let Ok(column) = usize::try_from(index) else {
        continue;
      };
      slots.entry(column).or_insert_with(|| {
        columns.push(column);
        columns.len() - 1
      });
    }

    source.open()?;
    let imported = Self::import(source, &coords, &columns);
    source.close();
    let (mut tree, fields) = imported?;

    tree.add_neighbors(coords.probe_epsilon(), |p| coords.wrap(p));

    let volumes = (0..tree.leaf_count())
      .filter_map(|cell| tree.leaf(cell))
      .map(|id| coords.cell_volume(tree.node(id).extent()))
      .collect();
    let eps = EPSILON_SCALE * coords.world_extent().diagonal();

    info!(
      cells = tree.leaf_count(),
      nodes = tree.node_count(),
      depth = tree.depth(),
      fields = columns.len(),
      "adaptive mesh imported"
    );
    debug!(
      boundary_faces = count_boundary_faces(&tree),
      "neighbor caches populated"
    );

    Ok(Self {
      coords,
      tree,
      slots,
      fields,
      volumes,
      distributions: Vec::new(),
      cumulative_mass: Vec::new(),
      eps,
    })
  }

  fn import<S: RecordSource>(
    source: &mut S,
    coords: &C,
    columns: &[usize],
  ) -> Result<(MeshTree, Vec<Vec<f64>>)> {
    let mut fields = vec![Vec::new(); columns.len()];
    let tree = MeshTree::build(source, coords.grid_domain(), |_cell, record| {
      for (slot, &column) in columns.iter().enumerate() {
        fields[slot].push(record.field_value(column)?);
      }
      Ok(())
    })?;
    if source.advance()? {
      return Err(GridError::malformed("superfluous data after the last mesh record"));
    }
    Ok((tree, fields))
  }

  // ===========================================================================
  // Structure
  // ===========================================================================

  pub fn coordinate_system(&self) -> &C {
    &self.coords
  }

  pub fn tree(&self) -> &MeshTree {
    &self.tree
  }

  pub fn cell_count(&self) -> usize {
    self.tree.leaf_count()
  }

  /// Offset used to push ray positions across cell walls.
  pub fn epsilon(&self) -> f64 {
    self.eps
  }

  /// World-space box enclosing the domain.
  pub fn extent(&self) -> GridBox {
    self.coords.world_extent()
  }

  /// Cell containing a world position, or `None` outside the domain.
  pub fn cell_index(&self, position: DVec3) -> Option<usize> {
    self
      .locate(position)
      .and_then(|id| self.tree.node(id).cell())
  }

  pub(crate) fn locate(&self, position: DVec3) -> Option<NodeId> {
    self.tree.locate(self.coords.to_grid(position))
  }

  fn leaf(&self, cell: usize) -> Result<NodeId> {
    self
      .tree
      .leaf(cell)
      .ok_or_else(|| GridError::out_of_range("cell", cell, self.cell_count()))
  }

  /// Grid-space box of a cell.
  pub fn cell_extent(&self, cell: usize) -> Result<GridBox> {
    Ok(*self.tree.node(self.leaf(cell)?).extent())
  }

  /// Cached neighbor cell through the given wall of a cell.
  pub fn neighbor(&self, cell: usize, wall: Wall) -> Result<Option<usize>> {
    let id = self.leaf(cell)?;
    Ok(
      self
        .tree
        .node(id)
        .neighbor(wall)
        .and_then(|n| self.tree.node(n).cell()),
    )
  }

  pub fn volume(&self, cell: usize) -> Result<f64> {
    self
      .volumes
      .get(cell)
      .copied()
      .ok_or_else(|| GridError::out_of_range("cell", cell, self.cell_count()))
  }

  /// World position drawn uniformly inside a cell.
  pub fn random_position<R: Rng + ?Sized>(&self, cell: usize, rng: &mut R) -> Result<DVec3> {
    let extent = self.cell_extent(cell)?;
    Ok(self.coords.random_position(&extent, rng))
  }

  // ===========================================================================
  // Fields
  // ===========================================================================

  fn slot(&self, field: usize) -> Result<usize> {
    self
      .slots
      .get(&field)
      .copied()
      .ok_or_else(|| GridError::out_of_range("field", field, self.slots.len()))
  }

  /// Number of distinct field columns imported.
  pub fn field_count(&self) -> usize {
    self.fields.len()
  }

  /// Value of a requested field column in a cell.
  pub fn value(&self, field: usize, cell: usize) -> Result<f64> {
    let slot = self.slot(field)?;
    self.fields[slot]
      .get(cell)
      .copied()
      .ok_or_else(|| GridError::out_of_range("cell", cell, self.cell_count()))
  }

  /// Value of a requested field column at a world position; zero outside
  /// the domain.
  pub fn value_at(&self, field: usize, position: DVec3) -> Result<f64> {
    let slot = self.slot(field)?;
    Ok(
      self
        .cell_index(position)
        .map_or(0.0, |cell| self.fields[slot][cell]),
    )
  }

  // ===========================================================================
  // Densities
  // ===========================================================================

  /// Register a density distribution and return its index.
  ///
  /// Both columns must have been requested when the mesh was built. The
  /// integrated density of the distribution and the cumulative cell masses
  /// used by [`sample_position`](Self::sample_position) are computed here.
  pub fn add_density_distribution(
    &mut self,
    density_field: usize,
    multiplier_field: Option<usize>,
    fraction: f64,
  ) -> Result<usize> {
    let density_slot = self.slot(density_field)?;
    let multiplier_slot = multiplier_field.map(|f| self.slot(f)).transpose()?;
    let mut distribution = DensityDistribution {
      density_slot,
      multiplier_slot,
      fraction,
      integrated: 0.0,
    };
    distribution.integrated = (0..self.cell_count())
      .map(|cell| self.distribution_density(&distribution, cell) * self.volumes[cell])
      .sum();
    self.distributions.push(distribution);

    let mut mass = 0.0;
    self.cumulative_mass = (0..self.cell_count())
      .map(|cell| {
        mass += self.cell_density(cell) * self.volumes[cell];
        mass
      })
      .collect();

    debug!(
      index = self.distributions.len() - 1,
      integrated = distribution.integrated,
      "density distribution registered"
    );
    Ok(self.distributions.len() - 1)
  }

  pub fn distributions(&self) -> &[DensityDistribution] {
    &self.distributions
  }

  #[inline]
  fn distribution_density(&self, distribution: &DensityDistribution, cell: usize) -> f64 {
    let mut value = self.fields[distribution.density_slot][cell];
    if let Some(slot) = distribution.multiplier_slot {
      value *= self.fields[slot][cell];
    }
    (value * distribution.fraction).max(0.0)
  }

  #[inline]
  fn cell_density(&self, cell: usize) -> f64 {
    self
      .distributions
      .iter()
      .map(|d| self.distribution_density(d, cell))
      .sum()
  }

  fn distribution(&self, index: usize) -> Result<&DensityDistribution> {
    self
      .distributions
      .get(index)
      .ok_or_else(|| GridError::out_of_range("density distribution", index, self.distributions.len()))
  }

  /// Density of one distribution in a cell.
  pub fn density_of(&self, distribution: usize, cell: usize) -> Result<f64> {
    let distribution = self.distribution(distribution)?;
    self.leaf(cell)?;
    Ok(self.distribution_density(distribution, cell))
  }

  /// Total density of a cell over all distributions.
  pub fn density(&self, cell: usize) -> Result<f64> {
    self.leaf(cell)?;
    Ok(self.cell_density(cell))
  }

  /// Total density at a world position; zero outside the domain.
  pub fn density_at(&self, position: DVec3) -> f64 {
    self
      .cell_index(position)
      .map_or(0.0, |cell| self.cell_density(cell))
  }

  pub fn integrated_density(&self, distribution: usize) -> Result<f64> {
    Ok(self.distribution(distribution)?.integrated)
  }

  /// Total mass over all distributions.
  pub fn total_integrated_density(&self) -> f64 {
    self.distributions.iter().map(|d| d.integrated).sum()
  }

  /// Surface density along the x-axis through the origin.
  pub fn sigma_x(&self) -> f64 {
    self.axis_surface_density(0)
  }

  /// Surface density along the y-axis through the origin.
  pub fn sigma_y(&self) -> f64 {
    self.axis_surface_density(1)
  }

  /// Surface density along the z-axis through the origin.
  pub fn sigma_z(&self) -> f64 {
    self.axis_surface_density(2)
  }

  /// Fixed-sample quadrature of the total density along a coordinate axis,
  /// over the world extent.
  fn axis_surface_density(&self, axis: usize) -> f64 {
    let extent = self.extent();
    let (min, max) = (extent.min[axis], extent.max[axis]);
    let step = (max - min) / SIGMA_SAMPLES as f64;
    let sum: f64 = (0..SIGMA_SAMPLES)
      .map(|k| {
        let mut position = DVec3::ZERO;
        position[axis] = min + k as f64 * step;
        self.density_at(position)
      })
      .sum();
    sum * step
  }

  /// World position drawn from the total density distribution: a cell is
  /// chosen with probability proportional to its mass, then a position
  /// uniformly inside it. `None` while the mesh holds no mass.
  pub fn sample_position<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<DVec3> {
    let total = *self.cumulative_mass.last()?;
    if total <= 0.0 {
      return None;
    }
    let target = rng.random::<f64>() * total;
    let cell = self
      .cumulative_mass
      .partition_point(|&mass| mass <= target)
      .min(self.cell_count() - 1);
    let extent = self.tree.node(self.tree.leaf(cell)?).extent();
    Some(self.coords.random_position(extent, rng))
  }
}

fn count_boundary_faces(tree: &MeshTree) -> usize {
  (0..tree.leaf_count())
    .filter_map(|cell| tree.leaf(cell))
    .map(|id| {
      Wall::ALL
        .iter()
        .filter(|&&wall| tree.node(id).neighbor(wall).is_none())
        .count()
    })
    .sum()
}

#[cfg(test)]
#[path = "mesh_test.rs"]
mod mesh_test;
