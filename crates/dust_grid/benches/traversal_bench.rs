//! Point location and ray traversal benchmarks.
//!
//! Two meshes over the unit cube:
//! - **uniform**: a single 32³ grid (depth 1)
//! - **refined**: an 8³ grid whose octant near the origin is refined twice
//!   more, so rays cross three refinement levels

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dust_grid::{AdaptiveMesh, Cartesian, GridBox, PhotonPath, TextRecordSource};
use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =============================================================================
// Fixtures
// =============================================================================

fn push_grid(text: &mut String, n: usize, refine: &dyn Fn(usize, usize, usize) -> bool, depth: usize) {
  text.push_str(&format!("! {n} {n} {n}\n"));
  for k in 0..n {
    for j in 0..n {
      for i in 0..n {
        if depth > 0 && refine(i, j, k) {
          push_grid(text, 2, &|_, _, _| true, depth - 1);
        } else {
          text.push_str("1.0\n");
        }
      }
    }
  }
}

fn build_mesh(text: &str) -> AdaptiveMesh<Cartesian> {
  let mut source = TextRecordSource::new(Cursor::new(text));
  let domain = GridBox::new(DVec3::ZERO, DVec3::ONE);
  AdaptiveMesh::build(&mut source, Cartesian::new(domain), &[0]).expect("bench mesh should import")
}

fn uniform_mesh() -> AdaptiveMesh<Cartesian> {
  let mut text = String::new();
  push_grid(&mut text, 32, &|_, _, _| false, 0);
  build_mesh(&text)
}

fn refined_mesh() -> AdaptiveMesh<Cartesian> {
  let mut text = String::new();
  push_grid(&mut text, 8, &|i, j, k| i < 4 && j < 4 && k < 4, 2);
  build_mesh(&text)
}

fn random_points(n: usize) -> Vec<DVec3> {
  let mut rng = StdRng::seed_from_u64(0xD057);
  (0..n)
    .map(|_| DVec3::new(rng.random(), rng.random(), rng.random()))
    .collect()
}

fn random_rays(n: usize) -> Vec<(DVec3, DVec3)> {
  let mut rng = StdRng::seed_from_u64(0x9A75);
  (0..n)
    .map(|_| {
      let origin = DVec3::new(rng.random(), rng.random(), rng.random());
      let direction = DVec3::new(
        rng.random_range(-1.0..1.0),
        rng.random_range(-1.0..1.0),
        rng.random_range(-1.0..1.0),
      );
      (origin, direction)
    })
    .collect()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_locate(c: &mut Criterion) {
  let mut group = c.benchmark_group("locate");
  let points = random_points(1024);

  for (name, mesh) in [("uniform", uniform_mesh()), ("refined", refined_mesh())] {
    group.bench_with_input(BenchmarkId::new("cell_index", name), &mesh, |b, mesh| {
      b.iter(|| {
        points
          .iter()
          .filter_map(|&p| mesh.cell_index(black_box(p)))
          .sum::<usize>()
      })
    });
  }

  group.finish();
}

fn bench_path(c: &mut Criterion) {
  let mut group = c.benchmark_group("path");
  let rays = random_rays(256);

  for (name, mesh) in [("uniform", uniform_mesh()), ("refined", refined_mesh())] {
    // Reuses one path buffer, as a photon loop would.
    group.bench_with_input(BenchmarkId::new("fill_path", name), &mesh, |b, mesh| {
      let mut path = PhotonPath::default();
      b.iter(|| {
        let mut segments = 0;
        for &(origin, direction) in &rays {
          path.reset(black_box(origin), black_box(direction));
          mesh.fill_path(&mut path);
          segments += path.len();
        }
        segments
      })
    });
  }

  group.finish();
}

criterion_group!(traversal, bench_locate, bench_path);
criterion_main!(traversal);
