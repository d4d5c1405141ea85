//! dust_grid - adaptive mesh spatial index for Monte Carlo radiative transfer
//!
//! This crate imports a non-uniform, recursively refined 3D grid from a mesh
//! file, indexes its cells, and answers the two queries photon transport
//! asks billions of times per run: which cell contains a point, and which
//! cells a ray crosses (with their path lengths) before it leaves the domain.
//!
//! # Features
//!
//! - **Streaming import**: the tree is built from a depth-first record
//!   stream whose order defines the cell indices ([`source`])
//! - **O(depth) point location** tolerant of rounding at cell walls
//! - **Neighbor caches** so ray marching usually steps to the next cell
//!   without a tree search
//! - **Densities**: imported field columns combined into per-cell densities
//!   with cached integrated masses
//! - **Coordinate systems**: cartesian boxes and spherical shells share one
//!   tree and traversal implementation ([`geometry`])
//!
//! # Example
//!
//! ```ignore
//! use dust_grid::{AdaptiveMesh, Cartesian, GridBox, TextRecordSource};
//! use glam::DVec3;
//!
//! let mut source = TextRecordSource::from_path("mesh.txt")?;
//! let domain = GridBox::new(DVec3::ZERO, DVec3::splat(10.0));
//! let mut mesh = AdaptiveMesh::build(&mut source, Cartesian::new(domain), &[0])?;
//! mesh.add_density_distribution(0, None, 1.0)?;
//!
//! let path = mesh.path(DVec3::new(-1.0, 5.0, 5.0), DVec3::X);
//! for segment in path.segments() {
//!     println!("cell {} for {}", segment.cell, segment.length);
//! }
//! ```

pub mod bounds;
pub mod error;
pub mod geometry;
pub mod mesh;
pub mod metrics;
pub mod path;
pub mod source;
pub mod tree;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used items
pub use bounds::{GridBox, Wall};
pub use error::{GridError, Result};
pub use geometry::{Cartesian, CoordinateSystem, Spherical};
pub use mesh::{AdaptiveMesh, DensityDistribution};
pub use metrics::TraversalMetrics;
pub use path::{PathSegment, PhotonPath};
pub use source::{BlockRecordSource, RecordSource, TextRecordSource};
pub use tree::{MeshTree, NodeId, TreeNode};
