//! Per-cell extraction state shared by the passes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use layex_core::{ArcInst, BBox, LayerFunction, LayerId, NodeInst, Point};

use crate::config::ExtractConfig;
use crate::cut_index::CutIndex;
use crate::error::{ExtractError, Result};
use crate::graph::{ConnectivityGraph, Feature, NodeId, NodeKind, PortRef, SpatialQuery};
use crate::issue::{IssueKind, IssueLog, LayerLedger, Severity};
use crate::merge::LayerMerge;
use crate::scale::Grid;
use crate::templates::{DeviceKind, PlacedPort, TemplateLibrary};

/// Cooperative cancellation flag, checked between features.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Which well types occur anywhere under the cell being extracted.
///
/// A layer rule on a well type that never occurs is not enforced, so a
/// layout drawn without wells still yields devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WellPresence {
    pub n_well: bool,
    pub p_well: bool,
}

impl WellPresence {
    pub fn ignores(&self, function: LayerFunction) -> bool {
        match function {
            LayerFunction::WellN => !self.n_well,
            LayerFunction::WellP => !self.p_well,
            _ => false,
        }
    }
}

/// A source arc kept for reinsertion instead of skeletonization.
#[derive(Debug, Clone)]
pub struct HeldArc {
    pub arc: ArcInst,
    pub layer: Option<LayerId>,
}

pub struct ExtractionContext<'a> {
    pub library: &'a TemplateLibrary,
    pub config: &'a ExtractConfig,
    pub grid: Grid,
    pub wells: WellPresence,
    /// Geometry not yet claimed by any feature.
    pub working: LayerMerge,
    /// Everything the cell started with; the reference for every fit test.
    pub original: LayerMerge,
    pub cuts: CutIndex,
    pub graph: ConnectivityGraph,
    pub issues: IssueLog,
    pub held_arcs: Vec<HeldArc>,
    initial_area: BTreeMap<LayerId, f64>,
    cancel: CancelToken,
}

impl<'a> ExtractionContext<'a> {
    pub fn new(
        cell: &str,
        library: &'a TemplateLibrary,
        config: &'a ExtractConfig,
        wells: WellPresence,
        cancel: CancelToken,
    ) -> Self {
        Self {
            library,
            config,
            grid: Grid::new(config.grid_step),
            wells,
            working: LayerMerge::new(),
            original: LayerMerge::new(),
            cuts: CutIndex::new(),
            graph: ConnectivityGraph::new(),
            issues: IssueLog::new(cell),
            held_arcs: Vec::new(),
            initial_area: BTreeMap::new(),
            cancel,
        }
    }

    pub fn cell_name(&self) -> &str {
        self.issues.cell()
    }

    /// Fail with [`ExtractError::Cancelled`] once cancellation was requested.
    pub fn check_cancelled(&mut self) -> Result<()> {
        if !self.cancel.is_cancelled() {
            return Ok(());
        }
        let cell = self.cell_name().to_string();
        self.issues.record(
            IssueKind::Cancelled,
            Severity::Info,
            None,
            None,
            "extraction cancelled".to_string(),
        );
        Err(ExtractError::Cancelled { cell })
    }

    /// Remember the working area of every layer as the ledger baseline.
    pub fn snapshot_initial(&mut self) {
        self.initial_area = self
            .working
            .layers()
            .into_iter()
            .map(|l| (l, self.working.area(l)))
            .collect();
    }

    pub fn ledger(&self) -> Vec<LayerLedger> {
        self.initial_area
            .iter()
            .map(|(&layer, &initial)| LayerLedger {
                layer,
                initial,
                claimed: self.graph.claimed_area(layer),
                discarded: self.graph.discarded_area(layer),
                remainder: self.working.area(layer),
            })
            .collect()
    }

    /// Hand over the graph and the issue log, with the area ledger filled in.
    pub fn finish(self) -> (ConnectivityGraph, IssueLog) {
        let ledger = self.ledger();
        let mut issues = self.issues;
        issues.set_ledger(ledger);
        (self.graph, issues)
    }

    /// Remove an outline from the working merge and book it to `feature`.
    pub fn claim_outline(&mut self, feature: Feature, layer: LayerId, outline: &[Point]) -> f64 {
        let area = self.working.subtract_outline(layer, outline);
        self.graph.claim(feature, layer, area);
        area
    }

    /// True if the rule of this layer is enforced.
    pub fn enforced(&self, layer: LayerId) -> bool {
        !self.wells.ignores(self.library.function(layer))
    }

    /// First enforced layer of the node's footprint that the original
    /// geometry does not cover.
    pub fn blocking_layer(&self, node: &NodeInst) -> Option<LayerId> {
        self.library
            .footprint(node)
            .into_iter()
            .find(|(layer, outline)| self.enforced(*layer) && !self.original.contains(*layer, outline))
            .map(|(layer, _)| layer)
    }

    /// Place a recognized device and claim its geometry.
    pub fn commit_device(&mut self, node: NodeInst, kind: DeviceKind) -> NodeId {
        let footprint = self.library.footprint(&node);
        let ports = self.library.ports(&node);
        let boxes: Vec<(LayerId, BBox)> = footprint
            .iter()
            .filter_map(|(l, o)| BBox::from_points(o).map(|b| (*l, b)))
            .collect();
        let id = self.graph.add_node(node, NodeKind::Device(kind), ports, &boxes);
        for (layer, outline) in &footprint {
            self.claim_outline(Feature::Node(id), *layer, outline);
        }
        id
    }

    /// A pin on `layer` at `at`, reusing any port there that already
    /// connects the layer.
    pub fn pin_at(&mut self, layer: LayerId, at: Point) -> PortRef {
        if let Some(existing) = self.graph.port_at(layer, &at) {
            return existing;
        }
        let (proto, width, height) = match self.library.wire(layer) {
            Some(wire) => {
                let (w, h) = self
                    .library
                    .proto(&wire.pin)
                    .map(|p| (p.default_width, p.default_height))
                    .unwrap_or((0.0, 0.0));
                (wire.pin.clone(), w, h)
            }
            None => (format!("{}-pin", self.library.layer_name(layer)), 0.0, 0.0),
        };
        let node = NodeInst::new(&proto, at, width, height);
        let mut ports = self.library.ports(&node);
        ports.retain(|p| p.connects(layer));
        if ports.is_empty() {
            ports.push(PlacedPort {
                name: "pin".to_string(),
                layers: vec![layer],
                bbox: BBox::new(at, at),
                topology: 0,
            });
        }
        let id = self.graph.add_node(node, NodeKind::Device(DeviceKind::Pin), ports, &[]);
        PortRef { node: id, port: 0 }
    }
}
