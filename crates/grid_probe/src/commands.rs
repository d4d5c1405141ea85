//! Subcommand implementations, generic over the mesh coordinate system.

use std::f64::consts::TAU;

use dust_grid::{AdaptiveMesh, CoordinateSystem, TraversalMetrics};
use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Print the mesh structure and the registered densities.
pub fn info<C: CoordinateSystem>(mesh: &AdaptiveMesh<C>) {
  let tree = mesh.tree();
  let extent = mesh.extent();

  println!("Coordinate system: {:?}", mesh.coordinate_system());
  println!("World extent: {} .. {}", extent.min, extent.max);
  println!(
    "Cells: {} ({} nodes, depth {})",
    mesh.cell_count(),
    tree.node_count(),
    tree.depth()
  );
  println!("Field columns: {}", mesh.field_count());
  println!("Epsilon: {:e}", mesh.epsilon());

  let (smallest, largest) = (0..mesh.cell_count())
    .filter_map(|cell| mesh.volume(cell).ok())
    .fold((f64::INFINITY, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
  if mesh.cell_count() > 0 {
    println!("Cell volumes: {:e} .. {:e}", smallest, largest);
  }

  for (index, distribution) in mesh.distributions().iter().enumerate() {
    println!(
      "  density {}: fraction {}, integrated {:e}",
      index,
      distribution.fraction(),
      distribution.integrated_density()
    );
  }
  if !mesh.distributions().is_empty() {
    println!("Total integrated density: {:e}", mesh.total_integrated_density());
  }
}

/// Print the surface densities along the coordinate axes.
pub fn sigma<C: CoordinateSystem>(mesh: &AdaptiveMesh<C>) {
  if mesh.distributions().is_empty() {
    log::warn!("no density distributions configured; surface densities are zero");
  }
  println!("Sigma x: {:e}", mesh.sigma_x());
  println!("Sigma y: {:e}", mesh.sigma_y());
  println!("Sigma z: {:e}", mesh.sigma_z());
}

/// Trace `rays` isotropic rays in parallel and summarize the traversals.
///
/// Origins follow the total density when one is configured, otherwise they
/// are uniform over the world extent. Each ray draws from its own generator
/// seeded with `seed + index`, so results do not depend on scheduling.
pub fn trace<C: CoordinateSystem>(mesh: &AdaptiveMesh<C>, rays: usize, seed: u64) -> TraversalMetrics {
  let extent = mesh.extent();

  let metrics = (0..rays)
    .into_par_iter()
    .map(|index| {
      let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
      let origin = mesh
        .sample_position(&mut rng)
        .unwrap_or_else(|| extent.min + random_unit_cube(&mut rng) * extent.size());
      let direction = isotropic_direction(&mut rng);

      let mut metrics = TraversalMetrics::default();
      metrics.record(&mesh.path(origin, direction));
      metrics
    })
    .reduce(TraversalMetrics::default, TraversalMetrics::merge);

  println!("Rays: {}", metrics.paths);
  println!("  missed the domain: {}", metrics.empty_paths);
  println!(
    "  truncated: {} ({:.3}%)",
    metrics.truncated_paths,
    100.0 * metrics.truncation_rate()
  );
  println!("  stalls recovered: {}", metrics.recovered_stalls);
  println!(
    "Segments: {} (mean {:.2}, max {})",
    metrics.segments,
    metrics.average_segments(),
    metrics.max_segments
  );
  println!("Total path length: {:e}", metrics.total_length);

  metrics
}

fn random_unit_cube<R: Rng>(rng: &mut R) -> DVec3 {
  DVec3::new(rng.random(), rng.random(), rng.random())
}

fn isotropic_direction<R: Rng>(rng: &mut R) -> DVec3 {
  let cos_theta: f64 = 2.0 * rng.random::<f64>() - 1.0;
  let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
  let (sin_phi, cos_phi) = (TAU * rng.random::<f64>()).sin_cos();
  DVec3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
}

#[cfg(test)]
mod tests {
  use std::io::Cursor;

  use dust_grid::{Cartesian, GridBox, TextRecordSource};

  use super::*;

  fn cube() -> AdaptiveMesh<Cartesian> {
    let mut text = String::from("! 3 3 3\n");
    for cell in 0..27 {
      text.push_str(&format!("{}\n", cell % 2));
    }
    let mut source = TextRecordSource::new(Cursor::new(text));
    let domain = GridBox::new(DVec3::ZERO, DVec3::splat(3.0));
    let mut mesh = AdaptiveMesh::build(&mut source, Cartesian::new(domain), &[0]).unwrap();
    mesh.add_density_distribution(0, None, 1.0).unwrap();
    mesh
  }

  #[test]
  fn test_isotropic_direction_is_unit() {
    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..100 {
      assert!((isotropic_direction(&mut rng).length() - 1.0).abs() < 1e-12);
    }
  }

  #[test]
  fn test_trace_is_reproducible() {
    let mesh = cube();
    let first = trace(&mesh, 200, 17);
    let second = trace(&mesh, 200, 17);

    assert_eq!(first.paths, 200);
    // Origins lie inside the mesh, so no ray misses it.
    assert_eq!(first.empty_paths, 0);
    assert_eq!(first.segments, second.segments);
    assert!((first.total_length - second.total_length).abs() < 1e-9);
  }
}
