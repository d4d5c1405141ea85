use std::io::Cursor;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use super::*;
use crate::source::{BlockRecordSource, TextRecordSource};
use crate::test_utils::{encode_block_file, refined_mesh, text_mesh, text_mesh_with};

fn try_build(text: &str, domain: GridBox, fields: &[i32]) -> Result<AdaptiveMesh<Cartesian>> {
  let mut source = TextRecordSource::new(Cursor::new(text));
  AdaptiveMesh::build(&mut source, Cartesian::new(domain), fields)
}

// =========================================================================
// Import
// =========================================================================

/// Two-level text input over (0,0,0)-(2,2,1).
#[test]
fn test_small_text_mesh() {
  let mesh = text_mesh(
    "! 2 2 1\n0\n1\n2\n3\n",
    GridBox::new(DVec3::ZERO, DVec3::new(2.0, 2.0, 1.0)),
  );

  assert_eq!(mesh.cell_count(), 4);
  assert_eq!(mesh.cell_index(DVec3::new(0.5, 0.5, 0.5)), Some(0));
  assert_eq!(mesh.cell_index(DVec3::new(1.5, 1.5, 0.5)), Some(3));
  assert_eq!(mesh.volume(0).unwrap(), 1.0);
  assert_eq!(mesh.value(0, 2).unwrap(), 2.0);
}

#[test]
fn test_superfluous_records_are_malformed() {
  let err = try_build("0\n1\n", GridBox::new(DVec3::ZERO, DVec3::ONE), &[0]).unwrap_err();
  assert!(matches!(err, GridError::MalformedInput { .. }), "{err}");
}

#[test]
fn test_missing_field_column_is_malformed() {
  let err = try_build("! 2 1 1\n1 2\n3\n", GridBox::new(DVec3::ZERO, DVec3::ONE), &[1]).unwrap_err();
  assert!(matches!(err, GridError::MalformedInput { .. }), "{err}");
}

/// Requested indices are deduplicated and negatives ignored.
#[test]
fn test_field_indices_are_deduplicated() {
  let (text, _) = crate::test_utils::refined_text();
  let mesh = text_mesh_with(
    &text,
    Cartesian::new(GridBox::new(DVec3::splat(-1.0), DVec3::ONE)),
    &[1, -1, 1, 0, -7],
  );

  assert_eq!(mesh.field_count(), 2);
  for cell in 0..mesh.cell_count() {
    assert_eq!(mesh.value(0, cell).unwrap(), cell as f64);
    assert_eq!(mesh.value(1, cell).unwrap(), 2.0 * cell as f64);
  }
}

#[test]
fn test_unknown_indices_are_out_of_range() {
  let mut mesh = refined_mesh();
  let n = mesh.cell_count();
  let out_of_range = |r: Result<f64>| matches!(r, Err(GridError::IndexOutOfRange { .. }));

  assert!(out_of_range(mesh.value(5, 0)));
  assert!(out_of_range(mesh.value(0, n)));
  assert!(out_of_range(mesh.value_at(5, DVec3::ZERO)));
  assert!(out_of_range(mesh.volume(n)));
  assert!(out_of_range(mesh.density(n)));
  assert!(out_of_range(mesh.density_of(0, 0)));
  assert!(out_of_range(mesh.integrated_density(0)));
  assert!(mesh.cell_extent(n).is_err());
  assert!(mesh.neighbor(n, Wall::Top).is_err());
  assert!(mesh
    .random_position(n, &mut StdRng::seed_from_u64(1))
    .is_err());
  assert!(matches!(
    mesh.add_density_distribution(3, None, 1.0),
    Err(GridError::IndexOutOfRange { .. })
  ));
  assert!(matches!(
    mesh.add_density_distribution(0, Some(9), 1.0),
    Err(GridError::IndexOutOfRange { .. })
  ));
  assert!(mesh.distributions().is_empty());
}

#[test]
fn test_points_outside_the_domain() {
  let mut mesh = refined_mesh();
  mesh.add_density_distribution(0, None, 1.0).unwrap();
  let outside = DVec3::new(0.0, 3.0, 0.0);

  assert_eq!(mesh.cell_index(outside), None);
  assert_eq!(mesh.value_at(0, outside).unwrap(), 0.0);
  assert_eq!(mesh.density_at(outside), 0.0);
}

/// Block input: one coarse leaf block beside one refined block.
#[test]
fn test_block_file_mesh() {
  let forest = [1, 0, 1, 1, 1, 1, 1, 1, 1, 1];
  let blocks: Vec<Vec<f64>> = (0..9).map(|b| vec![b as f64]).collect();
  let bytes = encode_block_file(1, [1, 1, 1], &forest, &blocks);
  let mut source = BlockRecordSource::new(Cursor::new(bytes), [2, 1, 1]);
  let domain = GridBox::new(DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0));
  let mesh = AdaptiveMesh::build(&mut source, Cartesian::new(domain), &[0]).unwrap();

  assert_eq!(mesh.cell_count(), 9);
  assert_eq!(mesh.volume(0).unwrap(), 1.0);
  assert_eq!(mesh.volume(8).unwrap(), 0.125);
  assert_eq!(mesh.cell_index(DVec3::new(1.75, 0.75, 0.75)), Some(8));
  assert_eq!(mesh.value_at(0, DVec3::new(1.25, 0.25, 0.75)).unwrap(), 5.0);
}

// =========================================================================
// Densities
// =========================================================================

/// Fraction 0.5 of a field value 4.0 over a cell of volume 2.0.
#[test]
fn test_single_cell_density() {
  let mut mesh = text_mesh("4.0\n", GridBox::new(DVec3::ZERO, DVec3::new(2.0, 1.0, 1.0)));
  let index = mesh.add_density_distribution(0, None, 0.5).unwrap();

  assert_eq!(index, 0);
  assert_eq!(mesh.density(0).unwrap(), 2.0);
  assert_eq!(mesh.integrated_density(0).unwrap(), 4.0);
  assert_eq!(mesh.total_integrated_density(), 4.0);
}

#[test]
fn test_multiplier_and_fraction() {
  let mut mesh = refined_mesh();
  mesh.add_density_distribution(0, Some(1), 0.25).unwrap();

  for cell in 0..mesh.cell_count() {
    let c = cell as f64;
    assert_eq!(mesh.density_of(0, cell).unwrap(), 0.5 * c * c);
  }
}

#[test]
fn test_negative_densities_are_clamped() {
  let mut mesh = refined_mesh();
  mesh.add_density_distribution(0, None, -1.0).unwrap();

  assert!((0..mesh.cell_count()).all(|cell| mesh.density(cell).unwrap() == 0.0));
  assert_eq!(mesh.integrated_density(0).unwrap(), 0.0);
}

/// Total density sums the distributions; each integral is density × volume.
#[test]
fn test_distributions_add_up() {
  let mut mesh = refined_mesh();
  let a = mesh.add_density_distribution(0, None, 1.0).unwrap();
  let b = mesh.add_density_distribution(1, None, 0.5).unwrap();
  assert_eq!((a, b), (0, 1));

  let mut expected = 0.0;
  for cell in 0..mesh.cell_count() {
    let c = cell as f64;
    assert_eq!(mesh.density(cell).unwrap(), c + c);
    expected += c * mesh.volume(cell).unwrap();
  }
  assert!((mesh.integrated_density(a).unwrap() - expected).abs() < 1e-12);
  assert!((mesh.integrated_density(b).unwrap() - expected).abs() < 1e-12);
  assert!((mesh.total_integrated_density() - 2.0 * expected).abs() < 1e-12);

  let probe = DVec3::new(0.3, -0.2, 0.9);
  let cell = mesh.cell_index(probe).unwrap();
  assert_eq!(mesh.density_at(probe), mesh.density(cell).unwrap());
}

#[test]
fn test_sigma_of_uniform_density() {
  let mut mesh = text_mesh(
    "! 2 2 2\n3\n3\n3\n3\n3\n3\n3\n3\n",
    GridBox::new(DVec3::splat(-1.0), DVec3::ONE),
  );
  mesh.add_density_distribution(0, None, 1.0).unwrap();

  for sigma in [mesh.sigma_x(), mesh.sigma_y(), mesh.sigma_z()] {
    assert!((sigma - 6.0).abs() < 1e-9, "sigma = {sigma}");
  }
}

/// The quadrature samples the left edge of each step, so a density jump at
/// the origin is resolved to within one sample.
#[test]
fn test_sigma_quadrature_sampling() {
  let mut mesh = text_mesh("! 2 1 1\n1\n3\n", GridBox::new(DVec3::splat(-1.0), DVec3::ONE));
  mesh.add_density_distribution(0, None, 1.0).unwrap();

  let step = 2.0 / SIGMA_SAMPLES as f64;
  assert!((mesh.sigma_x() - 4.0).abs() <= 2.0 * step + 1e-12);
  // Along y and z the axis runs through the shared wall at x = 0.
  assert!(mesh.sigma_y() >= 2.0 - 1e-9 && mesh.sigma_y() <= 6.0 + 1e-9);
}

// =========================================================================
// Sampling
// =========================================================================

#[test]
fn test_random_position_stays_in_cell() {
  let mesh = refined_mesh();
  let mut rng = StdRng::seed_from_u64(11);

  for cell in 0..mesh.cell_count() {
    let extent = mesh.cell_extent(cell).unwrap();
    for _ in 0..50 {
      let position = mesh.random_position(cell, &mut rng).unwrap();
      assert!(extent.contains(position), "cell {cell}: {position:?}");
    }
  }
}

#[test]
fn test_sample_position_follows_mass() {
  let mut mesh = text_mesh(
    "! 4 1 1\n0\n0\n5\n0\n",
    GridBox::new(DVec3::ZERO, DVec3::new(4.0, 1.0, 1.0)),
  );
  let mut rng = StdRng::seed_from_u64(3);
  assert!(mesh.sample_position(&mut rng).is_none());

  mesh.add_density_distribution(0, None, 1.0).unwrap();
  for _ in 0..500 {
    let position = mesh.sample_position(&mut rng).unwrap();
    assert!(position.x >= 2.0 && position.x <= 3.0, "{position:?}");
  }
}

// =========================================================================
// Concurrency
// =========================================================================

#[test]
fn test_mesh_is_send_and_sync() {
  fn assert_send_sync<T: Send + Sync>() {}
  assert_send_sync::<AdaptiveMesh<Cartesian>>();
  assert_send_sync::<AdaptiveMesh<crate::geometry::Spherical>>();
}

/// Queries from many threads agree with the sequential results.
#[test]
fn test_parallel_queries_match_sequential() {
  let mut mesh = refined_mesh();
  mesh.add_density_distribution(0, None, 1.0).unwrap();

  let rays: Vec<(DVec3, DVec3)> = (0..256)
    .map(|i| {
      let t = i as f64 * 0.37;
      (
        DVec3::new(t.sin(), t.cos(), (2.0 * t).sin()) * 0.9,
        DVec3::new((3.0 * t).cos(), (5.0 * t).sin(), 0.3).normalize(),
      )
    })
    .collect();

  let sequential: Vec<_> = rays
    .iter()
    .map(|&(origin, direction)| (mesh.path(origin, direction), mesh.density_at(origin)))
    .collect();
  let parallel: Vec<_> = rays
    .par_iter()
    .map(|&(origin, direction)| (mesh.path(origin, direction), mesh.density_at(origin)))
    .collect();

  assert_eq!(sequential, parallel);
}
