//! Shared fixtures for unit tests.

use std::io::Cursor;

use glam::DVec3;

use crate::bounds::GridBox;
use crate::error::Result;
use crate::geometry::{Cartesian, CoordinateSystem, Spherical};
use crate::mesh::AdaptiveMesh;
use crate::source::{RecordSource, TextRecordSource};

/// A record as seen through the [`RecordSource`] interface.
#[derive(Clone, Debug, PartialEq)]
pub enum Rec {
  Sub([i64; 3]),
  Leaf(Vec<f64>),
}

/// Drain an opened source, reading `nw` values from every leaf.
pub fn collect_records<S: RecordSource>(source: &mut S, nw: usize) -> Result<Vec<Rec>> {
  let mut records = Vec::new();
  while source.advance()? {
    if source.is_subdivision() {
      records.push(Rec::Sub(source.subdivision_counts()));
    } else {
      let values = (0..nw)
        .map(|i| source.field_value(i))
        .collect::<Result<Vec<_>>>()?;
      records.push(Rec::Leaf(values));
    }
  }
  Ok(records)
}

/// Encode a block file. `forest` holds 1 for leaf blocks and 0 for refined
/// blocks; `blocks` holds one payload per leaf block, variable major.
pub fn encode_block_file(nw: i32, block_nx: [i32; 3], forest: &[i32], blocks: &[Vec<f64>]) -> Vec<u8> {
  let nleafs = forest.iter().filter(|&&f| f == 1).count() as i32;
  let nparents = forest.len() as i32 - nleafs;
  let offset_tree = crate::source::block::HEADER_BYTES as i32;
  let offset_blocks = offset_tree + 4 * forest.len() as i32;

  let mut bytes = Vec::new();
  let header = [
    1,
    offset_tree,
    offset_blocks,
    nw,
    nleafs,
    nparents,
    block_nx[0],
    block_nx[1],
    block_nx[2],
  ];
  for value in header.iter().chain(forest) {
    bytes.extend_from_slice(&value.to_le_bytes());
  }
  for value in blocks.iter().flatten() {
    bytes.extend_from_slice(&value.to_le_bytes());
  }
  bytes
}

/// Build a mesh from text with the given coordinate system and fields.
pub fn text_mesh_with<C: CoordinateSystem>(text: &str, coords: C, fields: &[i32]) -> AdaptiveMesh<C> {
  let mut source = TextRecordSource::new(Cursor::new(text));
  AdaptiveMesh::build(&mut source, coords, fields).expect("test mesh should import")
}

/// Cartesian mesh from text, importing field 0.
pub fn text_mesh(text: &str, domain: GridBox) -> AdaptiveMesh<Cartesian> {
  text_mesh_with(text, Cartesian::new(domain), &[0])
}

/// Text for a single regular grid whose leaf values count up from 0.
pub fn regular_grid_text(counts: [usize; 3]) -> String {
  let mut text = format!("! {} {} {}\n", counts[0], counts[1], counts[2]);
  for cell in 0..counts.iter().product::<usize>() {
    text.push_str(&format!("{cell}\n"));
  }
  text
}

/// `n`×`n`×`n` cells over `[0, size]^3`.
pub fn uniform_cube(n: usize, size: f64) -> AdaptiveMesh<Cartesian> {
  text_mesh(
    &regular_grid_text([n, n, n]),
    GridBox::new(DVec3::ZERO, DVec3::splat(size)),
  )
}

/// Text for an irregular three-level mesh. Leaf values equal their cell
/// index. Returns the text and the number of leaves.
pub fn refined_text() -> (String, usize) {
  let mut text = String::from("# irregular test mesh\n! 2 2 2\n");
  let mut cells = 0;
  let mut leaf = |text: &mut String| {
    text.push_str(&format!("{cells} {}\n", 2 * cells));
    cells += 1;
  };
  for child in 0..8 {
    match child {
      0 => {
        text.push_str("! 3 1 2\n");
        for _ in 0..6 {
          leaf(&mut text);
        }
      }
      5 => {
        text.push_str("! 2 2 2\n");
        for grandchild in 0..8 {
          if grandchild == 3 {
            text.push_str("! 2 2 2\n");
            for _ in 0..8 {
              leaf(&mut text);
            }
          } else {
            leaf(&mut text);
          }
        }
      }
      6 => {
        text.push_str("! 1 4 1\n");
        for _ in 0..4 {
          leaf(&mut text);
        }
      }
      _ => leaf(&mut text),
    }
  }
  (text, cells)
}

/// Irregular mesh over `[-1, 1]^3` importing fields 0 and 1.
pub fn refined_mesh() -> AdaptiveMesh<Cartesian> {
  let (text, _) = refined_text();
  text_mesh_with(
    &text,
    Cartesian::new(GridBox::new(DVec3::splat(-1.0), DVec3::ONE)),
    &[0, 1],
  )
}

/// Spherical shell with a regular `(r, θ, φ)` grid and unit field values.
pub fn spherical_shell(r_min: f64, r_max: f64, counts: [usize; 3]) -> AdaptiveMesh<Spherical> {
  let mut text = format!("! {} {} {}\n", counts[0], counts[1], counts[2]);
  for _ in 0..counts.iter().product::<usize>() {
    text.push_str("1\n");
  }
  text_mesh_with(&text, Spherical::new(r_min, r_max), &[0])
}
