//! Configuration parsing for grid probing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
  pub mesh: MeshConfig,
  /// Density distributions registered after import, in order.
  #[serde(default)]
  pub density: Vec<DensityConfig>,
  #[serde(default)]
  pub trace: TraceConfig,
}

/// Where the mesh comes from and how to lay it out.
#[derive(Debug, Deserialize)]
pub struct MeshConfig {
  /// Mesh file, relative to the config file.
  pub file: PathBuf,
  pub format: MeshFormat,
  /// Cells of the unrefined grid per axis (block format only).
  pub coarse_resolution: Option<[usize; 3]>,
  pub geometry: GeometryConfig,
  /// Field columns to import. Negative entries are ignored.
  #[serde(default = "default_fields")]
  pub fields: Vec<i32>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
  Text,
  Block,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GeometryConfig {
  Cartesian { min: [f64; 3], max: [f64; 3] },
  Spherical { r_min: f64, r_max: f64 },
}

/// One density distribution.
#[derive(Debug, Deserialize)]
pub struct DensityConfig {
  pub field: usize,
  pub multiplier: Option<usize>,
  #[serde(default = "default_fraction")]
  pub fraction: f64,
}

/// Parameters of the `trace` command.
#[derive(Debug, Deserialize)]
pub struct TraceConfig {
  #[serde(default = "default_rays")]
  pub rays: usize,
  #[serde(default)]
  pub seed: u64,
}

impl Default for TraceConfig {
  fn default() -> Self {
    Self {
      rays: default_rays(),
      seed: 0,
    }
  }
}

fn default_fields() -> Vec<i32> {
  vec![0]
}

fn default_fraction() -> f64 {
  1.0
}

fn default_rays() -> usize {
  10_000
}

impl Config {
  /// Load configuration from a TOML file. A relative mesh path is resolved
  /// against the directory holding the config file.
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path)
      .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = Self::parse(&content)?;
    if config.mesh.file.is_relative() {
      if let Some(dir) = path.parent() {
        config.mesh.file = dir.join(&config.mesh.file);
      }
    }
    Ok(config)
  }

  /// Parse and validate configuration text.
  pub fn parse(content: &str) -> Result<Self> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config TOML")?;

    match (config.mesh.format, config.mesh.coarse_resolution) {
      (MeshFormat::Block, None) => anyhow::bail!("Block meshes need mesh.coarse_resolution"),
      (MeshFormat::Block, Some(res)) if res.contains(&0) => {
        anyhow::bail!("coarse_resolution must be positive, got {:?}", res)
      }
      _ => {}
    }
    match config.mesh.geometry {
      GeometryConfig::Cartesian { min, max } => {
        if (0..3).any(|axis| !(min[axis] < max[axis])) {
          anyhow::bail!("Cartesian domain needs min < max on every axis, got {:?} .. {:?}", min, max);
        }
      }
      GeometryConfig::Spherical { r_min, r_max } => {
        if !(r_min >= 0.0 && r_min < r_max) {
          anyhow::bail!("Spherical shell needs 0 <= r_min < r_max, got {} .. {}", r_min, r_max);
        }
      }
    }
    for (index, density) in config.density.iter().enumerate() {
      let requested = |field: usize| config.mesh.fields.iter().any(|&f| f >= 0 && f as usize == field);
      if !requested(density.field) {
        anyhow::bail!("density {} uses field {} which is not imported", index, density.field);
      }
      if let Some(multiplier) = density.multiplier.filter(|&m| !requested(m)) {
        anyhow::bail!("density {} uses multiplier field {} which is not imported", index, multiplier);
      }
    }
    if config.trace.rays == 0 {
      anyhow::bail!("trace.rays must be positive");
    }

    Ok(config)
  }
}
