use serde::{Deserialize, Serialize};

use layex_core::{BBox, LayerId};

/// Category of a feature-level extraction problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    /// Non-Manhattan cut, region too irregular to skeletonize, discarded sliver.
    GeometryAnomaly,
    /// No device or transistor template fits the geometry.
    FitFailure,
    /// A wire could not be legalized against the original geometry.
    ConnectionFailure,
    /// A required output element could not be created.
    StructuralFailure,
    /// Extraction of the cell stopped on request.
    Cancelled,
}

/// Severity level of an extraction issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single extraction issue with location and description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub cell: String,
    pub message: String,
    pub layer_id: Option<LayerId>,
    /// Bounding box of the offending feature.
    pub bbox: Option<BBox>,
}

/// Area bookkeeping of one layer after a cell is converted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerLedger {
    pub layer: LayerId,
    /// Area present when extraction started.
    pub initial: f64,
    /// Area claimed by nodes, arcs, and leftover geometry.
    pub claimed: f64,
    /// Slivers discarded below the minimum area.
    pub discarded: f64,
    /// Unclaimed crumbs still in the working merge.
    pub remainder: f64,
}

impl LayerLedger {
    /// True if every bit of initial area is accounted for within `tolerance`.
    pub fn is_balanced(&self, tolerance: f64) -> bool {
        (self.initial - self.claimed - self.discarded - self.remainder).abs() <= tolerance
    }
}

/// Ordered record of everything that went wrong while converting one cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueLog {
    cell: String,
    issues: Vec<Issue>,
    #[serde(default)]
    ledger: Vec<LayerLedger>,
}

impl IssueLog {
    pub fn new(cell: &str) -> Self {
        Self {
            cell: cell.to_string(),
            issues: Vec::new(),
            ledger: Vec::new(),
        }
    }

    pub fn cell(&self) -> &str {
        &self.cell
    }

    pub fn record(
        &mut self,
        kind: IssueKind,
        severity: Severity,
        layer_id: Option<LayerId>,
        bbox: Option<BBox>,
        message: String,
    ) {
        match severity {
            Severity::Info => log::info!("{}: {}", self.cell, message),
            _ => log::warn!("{}: {:?}: {}", self.cell, kind, message),
        }
        self.issues.push(Issue {
            kind,
            severity,
            cell: self.cell.clone(),
            message,
            layer_id,
            bbox,
        });
    }

    pub fn error(&mut self, kind: IssueKind, layer_id: Option<LayerId>, bbox: Option<BBox>, message: String) {
        self.record(kind, Severity::Error, layer_id, bbox, message);
    }

    pub fn warning(&mut self, kind: IssueKind, layer_id: Option<LayerId>, bbox: Option<BBox>, message: String) {
        self.record(kind, Severity::Warning, layer_id, bbox, message);
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn set_ledger(&mut self, ledger: Vec<LayerLedger>) {
        self.ledger = ledger;
    }

    pub fn ledger(&self) -> &[LayerLedger] {
        &self.ledger
    }
}

/// Issues of every cell touched by one extraction run, in conversion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub cells: Vec<IssueLog>,
}

impl ExtractionReport {
    pub fn push(&mut self, log: IssueLog) {
        self.cells.push(log);
    }

    pub fn all_issues(&self) -> impl Iterator<Item = &Issue> {
        self.cells.iter().flat_map(|c| c.issues().iter())
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.cells.iter().map(|c| c.count(kind)).sum()
    }

    pub fn error_count(&self) -> usize {
        self.cells.iter().map(|c| c.error_count()).sum()
    }

    pub fn for_cell(&self, name: &str) -> Option<&IssueLog> {
        self.cells.iter().find(|c| c.cell() == name)
    }
}
