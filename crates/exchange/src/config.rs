//! Configuration parsing and validation for distributed domains

use std::array;
use std::fs;
use std::path::Path;

use layout::{DimTag, Mesh, NdIndex};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Decomposition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Human-readable run name
    pub name: String,
    /// Cells per dimension; its length is the dimensionality
    pub cells: Vec<usize>,
    /// Physical bounds of the global mesh
    pub domain: DomainBounds,
    /// Parallel or serial per dimension (empty: all parallel)
    #[serde(default)]
    pub decomposition: Vec<DimTag>,
    /// Periodicity per dimension (empty: none periodic)
    #[serde(default)]
    pub periodic: Vec<bool>,
    /// Ghost layers around each subdomain
    #[serde(default = "default_ghost_width")]
    pub ghost_width: usize,
    /// Imbalance ratio that triggers a repartition (1.0 or more disables)
    #[serde(default = "default_load_balance_threshold")]
    pub load_balance_threshold: f64,
    /// Steps between imbalance checks
    #[serde(default = "default_load_balance_interval")]
    pub load_balance_interval: u64,
    /// Slack factor for reused communication buffers
    #[serde(default = "default_overallocation")]
    pub overallocation: f64,
}

/// Physical bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainBounds {
    /// Minimum corner
    pub min: Vec<f64>,
    /// Maximum corner
    pub max: Vec<f64>,
}

// Default values
fn default_ghost_width() -> usize {
    1
}

fn default_load_balance_threshold() -> f64 {
    1.0
}

fn default_load_balance_interval() -> u64 {
    1
}

fn default_overallocation() -> f64 {
    1.0
}

impl DecompositionConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: DecompositionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Number of dimensions
    pub fn dim(&self) -> usize {
        self.cells.len()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let dim = self.dim();

        // Check dimensionality
        if dim == 0 || dim > layout::MAX_DIM {
            return Err(config_error(format!(
                "cells must list 1 to {} dimensions, got {}",
                layout::MAX_DIM,
                dim
            )));
        }
        if self.cells.iter().any(|&n| n == 0) {
            return Err(config_error("Cell counts must be at least 1"));
        }

        // Check domain bounds
        if self.domain.min.len() != dim || self.domain.max.len() != dim {
            return Err(config_error(format!(
                "Domain bounds must have {} components",
                dim
            )));
        }
        for d in 0..dim {
            if !(self.domain.min[d] < self.domain.max[d]) {
                return Err(config_error(format!(
                    "Domain min must be less than max along dimension {}",
                    d
                )));
            }
        }

        // Check per-dimension flags
        if !self.decomposition.is_empty() && self.decomposition.len() != dim {
            return Err(config_error(format!(
                "decomposition must be empty or have {} entries",
                dim
            )));
        }
        if !self.periodic.is_empty() && self.periodic.len() != dim {
            return Err(config_error(format!(
                "periodic must be empty or have {} entries",
                dim
            )));
        }

        // Check ghost width against periodic extents
        for d in 0..dim {
            if self.is_periodic(d) && self.ghost_width > self.cells[d] {
                return Err(config_error(format!(
                    "ghost_width {} exceeds periodic extent {} along dimension {}",
                    self.ghost_width, self.cells[d], d
                )));
            }
        }

        // Check load balancing
        if !(self.load_balance_threshold >= 0.0) {
            return Err(config_error("load_balance_threshold must be non-negative"));
        }
        if self.load_balance_interval == 0 {
            return Err(config_error("load_balance_interval must be at least 1"));
        }

        // Check buffer slack
        if !(self.overallocation >= 1.0) {
            return Err(config_error("overallocation must be at least 1.0"));
        }

        Ok(())
    }

    fn is_periodic(&self, d: usize) -> bool {
        self.periodic.get(d).copied().unwrap_or(false)
    }

    fn check_dim<const D: usize>(&self) -> Result<()> {
        if self.dim() != D {
            return Err(config_error(format!(
                "configuration '{}' is {}-dimensional, requested {}",
                self.name,
                self.dim(),
                D
            )));
        }
        Ok(())
    }

    /// Global index box `[0, cells)`.
    pub fn global<const D: usize>(&self) -> Result<NdIndex<D>> {
        self.check_dim::<D>()?;
        let extents: [usize; D] = array::from_fn(|d| self.cells[d]);
        NdIndex::from_extents(extents)
            .ok_or_else(|| config_error("Cell counts must be at least 1"))
    }

    /// Decomposition tag per dimension.
    pub fn tags<const D: usize>(&self) -> Result<[DimTag; D]> {
        self.check_dim::<D>()?;
        Ok(array::from_fn(|d| {
            self.decomposition.get(d).copied().unwrap_or(DimTag::Parallel)
        }))
    }

    /// Periodicity per dimension.
    pub fn periodic_flags<const D: usize>(&self) -> Result<[bool; D]> {
        self.check_dim::<D>()?;
        Ok(array::from_fn(|d| self.is_periodic(d)))
    }

    /// Uniform mesh spanning the domain bounds.
    pub fn mesh<const D: usize>(&self) -> Result<Mesh<D>> {
        self.check_dim::<D>()?;
        let min = array::from_fn(|d| self.domain.min[d]);
        let max = array::from_fn(|d| self.domain.max[d]);
        let cells = array::from_fn(|d| self.cells[d]);
        Ok(Mesh::from_bounds(min, max, cells)?)
    }
}

fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube() -> DecompositionConfig {
        DecompositionConfig {
            name: "test".to_string(),
            cells: vec![8, 8, 8],
            domain: DomainBounds {
                min: vec![0.0, 0.0, 0.0],
                max: vec![1.0, 1.0, 1.0],
            },
            decomposition: Vec::new(),
            periodic: vec![true, true, true],
            ghost_width: default_ghost_width(),
            load_balance_threshold: default_load_balance_threshold(),
            load_balance_interval: default_load_balance_interval(),
            overallocation: default_overallocation(),
        }
    }

    #[test]
    fn test_defaults_from_json() {
        let config = DecompositionConfig::from_json(
            r#"{
                "name": "line",
                "cells": [16],
                "domain": { "min": [0.0], "max": [2.0] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.ghost_width, 1);
        assert_eq!(config.load_balance_threshold, 1.0);
        assert_eq!(config.load_balance_interval, 1);
        assert_eq!(config.overallocation, 1.0);
        assert_eq!(config.tags::<1>().unwrap(), [DimTag::Parallel]);
        assert_eq!(config.periodic_flags::<1>().unwrap(), [false]);
        assert_eq!(config.mesh::<1>().unwrap().spacing(), [0.125]);
    }

    #[test]
    fn test_validation_domain_bounds() {
        let mut config = cube();
        config.domain.min[1] = 2.0;
        assert!(config.validate().is_err());

        config.domain.min[1] = 0.0;
        assert!(config.validate().is_ok());

        config.domain.max.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_ghost_width() {
        let mut config = cube();
        config.ghost_width = 9;
        assert!(config.validate().is_err());

        // Non-periodic dimensions do not limit the ghost width
        config.periodic = vec![false, false, false];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_flags_and_factors() {
        let mut config = cube();
        config.periodic = vec![true];
        assert!(config.validate().is_err());

        let mut config = cube();
        config.overallocation = 0.5;
        assert!(config.validate().is_err());

        let mut config = cube();
        config.load_balance_interval = 0;
        assert!(config.validate().is_err());

        let mut config = cube();
        config.cells = vec![4, 4, 4, 4];
        config.domain.min.push(0.0);
        config.domain.max.push(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dimension_must_match_request() {
        let config = cube();
        assert!(config.global::<3>().is_ok());
        assert!(matches!(config.global::<2>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = DecompositionConfig::load("does/not/exist.json").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.to_string().contains("does/not/exist.json"));
    }

    #[test]
    fn test_serial_tags_parse() {
        let config = DecompositionConfig::from_json(
            r#"{
                "name": "slab",
                "cells": [8, 4],
                "domain": { "min": [0.0, 0.0], "max": [1.0, 0.5] },
                "decomposition": ["Parallel", "Serial"],
                "periodic": [true, false],
                "load_balance_threshold": 0.25
            }"#,
        )
        .unwrap();
        assert_eq!(
            config.tags::<2>().unwrap(),
            [DimTag::Parallel, DimTag::Serial]
        );
        assert_eq!(config.periodic_flags::<2>().unwrap(), [true, false]);
    }
}
