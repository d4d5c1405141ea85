//! Adaptive dust grid probe.
//!
//! Imports a mesh described by a TOML config, registers its density
//! distributions and runs one of:
//! - `info`: mesh structure and integrated densities
//! - `sigma`: surface densities along the coordinate axes
//! - `trace`: random rays traced in parallel, with traversal statistics
//!
//! Set `RUST_LOG=debug` to see the import diagnostics.

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dust_grid::{
  AdaptiveMesh, BlockRecordSource, Cartesian, CoordinateSystem, GridBox, Spherical, TextRecordSource,
};
use glam::DVec3;
use std::path::PathBuf;
use std::time::Instant;

use config::{Config, GeometryConfig, MeshFormat};

/// Inspect adaptive dust grids and trace random rays through them.
#[derive(Parser, Debug)]
#[command(name = "grid_probe")]
#[command(about = "Inspect adaptive dust grids and trace random rays through them")]
struct Args {
  /// Path to configuration TOML file.
  #[arg(short, long)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Print the mesh structure and registered densities.
  Info,
  /// Print the surface densities along the x, y and z axes.
  Sigma,
  /// Trace random rays and report traversal statistics.
  Trace {
    /// Number of rays (overrides trace.rays).
    #[arg(long)]
    rays: Option<usize>,
    /// Base seed (overrides trace.seed).
    #[arg(long)]
    seed: Option<u64>,
  },
}

fn main() -> Result<()> {
  env_logger::init();
  let args = Args::parse();

  log::info!("Loading config from: {}", args.config.display());
  let config = Config::load(&args.config)?;

  match config.mesh.geometry {
    GeometryConfig::Cartesian { min, max } => {
      let domain = GridBox::new(DVec3::from_array(min), DVec3::from_array(max));
      run(&args.command, &config, Cartesian::new(domain))
    }
    GeometryConfig::Spherical { r_min, r_max } => {
      run(&args.command, &config, Spherical::new(r_min, r_max))
    }
  }
}

fn run<C: CoordinateSystem>(command: &Command, config: &Config, coords: C) -> Result<()> {
  let started = Instant::now();
  let mesh = load_mesh(config, coords)?;
  log::info!(
    "Imported {} cells from {} in {:.2?}",
    mesh.cell_count(),
    config.mesh.file.display(),
    started.elapsed()
  );

  match *command {
    Command::Info => commands::info(&mesh),
    Command::Sigma => commands::sigma(&mesh),
    Command::Trace { rays, seed } => {
      let rays = rays.unwrap_or(config.trace.rays);
      let seed = seed.unwrap_or(config.trace.seed);
      let started = Instant::now();
      let metrics = commands::trace(&mesh, rays, seed);
      log::info!("Traced {} rays in {:.2?}", metrics.paths, started.elapsed());
    }
  }
  Ok(())
}

fn load_mesh<C: CoordinateSystem>(config: &Config, coords: C) -> Result<AdaptiveMesh<C>> {
  let file = &config.mesh.file;
  let fields = &config.mesh.fields;

  let mut mesh = match config.mesh.format {
    MeshFormat::Text => {
      let mut source = TextRecordSource::from_path(file)
        .with_context(|| format!("Failed to open mesh file: {}", file.display()))?;
      AdaptiveMesh::build(&mut source, coords, fields)
    }
    MeshFormat::Block => {
      let resolution = config
        .mesh
        .coarse_resolution
        .context("Block meshes need mesh.coarse_resolution")?;
      let mut source = BlockRecordSource::from_path(file, resolution)
        .with_context(|| format!("Failed to open mesh file: {}", file.display()))?;
      AdaptiveMesh::build(&mut source, coords, fields)
    }
  }
  .with_context(|| format!("Failed to import mesh: {}", file.display()))?;

  for (index, density) in config.density.iter().enumerate() {
    mesh
      .add_density_distribution(density.field, density.multiplier, density.fraction)
      .with_context(|| format!("Failed to register density {}", index))?;
  }
  Ok(mesh)
}
