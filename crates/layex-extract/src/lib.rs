//! # Layex Extract
//!
//! Rebuilds connectivity from flat layout geometry. A cell's polygons are
//! merged per canonical layer, then recognized pass by pass: contacts and
//! vias from their cuts, transistors from poly over active, wires from the
//! centerlines of what remains. Geometry nothing claims is kept as pure
//! layer shapes, so the extracted cell always covers the source.
//!
//! Feature-level problems never stop a run. They are collected per cell in
//! an [`IssueLog`] and handed back in an [`ExtractionReport`].

pub mod bridge;
pub mod centerline;
pub mod config;
pub mod context;
pub mod cut_index;
pub mod error;
pub mod exports;
pub mod geom;
pub mod graph;
pub mod ingest;
pub mod issue;
pub mod leftover;
pub mod merge;
pub mod pipeline;
pub mod scale;
pub mod templates;
pub mod transistor;
pub mod via;
pub mod wires;

pub use config::{ExtractConfig, RoutingMode};
pub use context::{CancelToken, ExtractionContext, WellPresence};
pub use error::{ExtractError, Result};
pub use graph::{ConnectivityGraph, NodeKind, PortRef, SpatialQuery};
pub use issue::{ExtractionReport, Issue, IssueKind, IssueLog, LayerLedger, Severity};
pub use merge::{LayerMerge, Region};
pub use pipeline::{Extractor, NoStitch, Stitcher};
pub use templates::{DeviceKind, Polarity, TemplateLibrary};
