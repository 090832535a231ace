use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What happens to wires that already exist in the source cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingMode {
    /// Flatten existing wires into geometry and re-derive them by skeletonization.
    Skeletonize,
    /// Keep existing wires and reattach them after device extraction.
    KeepOriginal,
}

/// Extraction preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Regions smaller than this (layout units squared) are discarded.
    pub min_area: f64,
    /// Alignment grid in layout units; zero disables alignment.
    pub grid_step: f64,
    /// Accept multi-cut contacts without checking each cut position.
    pub approximate_multicut: bool,
    /// Treat N and P active as one layer.
    pub unify_active: bool,
    /// Subcells whose name matches are flattened into their parent.
    pub flatten_pattern: Option<String>,
    pub routing: RoutingMode,
    /// Regions with more holes than this are not skeletonized.
    pub max_region_holes: usize,
    /// Regions with more vertices than this are not skeletonized.
    pub max_region_vertices: usize,
    /// Appended to the source cell name to name the extracted cell.
    pub cell_suffix: String,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_area: 0.01,
            grid_step: 0.5,
            approximate_multicut: false,
            unify_active: false,
            flatten_pattern: None,
            routing: RoutingMode::Skeletonize,
            max_region_holes: 8,
            max_region_vertices: 256,
            cell_suffix: "_ext".to_string(),
        }
    }
}

impl ExtractConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Compiled flatten pattern, anchored to the whole cell name.
    pub fn flatten_matcher(&self) -> Result<Option<Regex>> {
        match &self.flatten_pattern {
            Some(pattern) => Ok(Some(Regex::new(&format!("^(?:{pattern})$"))?)),
            None => Ok(None),
        }
    }
}
