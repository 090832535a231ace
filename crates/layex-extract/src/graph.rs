//! The output being built: nodes with ports, arcs between ports, leftover
//! geometry, and the nets they form.
//!
//! Every piece of geometry taken out of the working merge is booked as a
//! [`Claim`] against the feature that took it.

use std::collections::HashMap;

use layex_core::spatial::SpatialIndex;
use layex_core::{ArcEnd, ArcInst, BBox, Cell, CellId, CellInstance, Export, GeomPrimitive, LayerId, NodeInst, Point};

use crate::templates::{DeviceKind, PlacedPort};

pub type NodeId = usize;
pub type ArcId = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Recognized by this run.
    Device(DeviceKind),
    /// Present in the source cell and carried over.
    Copied,
    /// Stands for a subcell instance; ports are the subcell's exports.
    Instance(CellId),
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub inst: NodeInst,
    pub kind: NodeKind,
    pub ports: Vec<PlacedPort>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub node: NodeId,
    pub port: usize,
}

/// Where one end of a new arc attaches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndSpec {
    pub port: PortRef,
    pub location: Point,
    pub extended: bool,
}

#[derive(Debug, Clone)]
pub struct GraphArc {
    pub arc: ArcInst,
    /// Canonical layer; `None` for untyped connectors.
    pub layer: Option<LayerId>,
    pub head: PortRef,
    pub tail: PortRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Node(NodeId),
    Arc(ArcId),
    Leftover(usize),
    /// Discarded below the minimum area.
    Sliver,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Claim {
    pub feature: Feature,
    pub layer: LayerId,
    pub area: f64,
}

/// Ports and arcs answer point and window queries through this seam, so
/// recognizers never walk the node list themselves.
pub trait SpatialQuery {
    /// Ports on `layer` whose node geometry or port area touches the window.
    fn ports_touching(&self, layer: LayerId, window: &BBox) -> Vec<PortRef>;

    /// The first port on `layer` whose area contains the point.
    fn port_at(&self, layer: LayerId, at: &Point) -> Option<PortRef>;

    /// Typed arcs on `layer` whose span box touches the window.
    fn arcs_touching(&self, layer: LayerId, window: &BBox) -> Vec<ArcId>;
}

#[derive(Debug, Default)]
pub struct ConnectivityGraph {
    nodes: Vec<GraphNode>,
    arcs: Vec<GraphArc>,
    leftovers: Vec<GeomPrimitive>,
    instances: Vec<CellInstance>,
    exports: Vec<Export>,
    claims: Vec<Claim>,
    port_tree: SpatialIndex<PortRef>,
    footprint_tree: SpatialIndex<(NodeId, LayerId)>,
    arc_tree: SpatialIndex<ArcId>,
    port_base: Vec<usize>,
    parent: Vec<usize>,
    name_counts: HashMap<String, usize>,
}

impl ConnectivityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_name(&mut self, stem: &str) -> String {
        let n = self.name_counts.entry(stem.to_string()).or_insert(0);
        let name = format!("{stem}@{n}");
        *n += 1;
        name
    }

    /// Add a node with its ports and per-layer geometry boxes.
    pub fn add_node(
        &mut self,
        mut inst: NodeInst,
        kind: NodeKind,
        ports: Vec<PlacedPort>,
        footprint: &[(LayerId, BBox)],
    ) -> NodeId {
        let id = self.nodes.len();
        if inst.name.is_empty() {
            inst.name = self.next_name(&inst.proto);
        }
        self.port_base.push(self.parent.len());
        for (i, port) in ports.iter().enumerate() {
            let key = self.parent.len();
            self.parent.push(key);
            self.port_tree.insert(PortRef { node: id, port: i }, port.bbox);
            // ports of one topology group are one electrical point
            if let Some(j) = ports[..i].iter().position(|p| p.topology == port.topology) {
                let base = self.port_base[id];
                self.union(base + j, key);
            }
        }
        for (layer, bbox) in footprint {
            self.footprint_tree.insert((id, *layer), *bbox);
        }
        log::debug!("node {} ({}) at ({}, {})", inst.name, inst.proto, inst.center.x, inst.center.y);
        self.nodes.push(GraphNode { inst, kind, ports });
        id
    }

    pub fn add_arc(
        &mut self,
        proto: Option<&str>,
        layer: Option<LayerId>,
        width: f64,
        head: EndSpec,
        tail: EndSpec,
    ) -> ArcId {
        let id = self.arcs.len();
        let stem = proto.unwrap_or("connector");
        let name = self.next_name(stem);
        let end = |this: &Self, spec: &EndSpec| ArcEnd {
            node: spec.port.node,
            port: this.port_name(spec.port),
            location: spec.location,
            extended: spec.extended,
        };
        let arc = ArcInst {
            name,
            proto: proto.map(str::to_string),
            width,
            head: end(self, &head),
            tail: end(self, &tail),
        };
        if let Some(l) = layer {
            let half = width / 2.0;
            let span = BBox::from_points(&[head.location, tail.location])
                .unwrap_or_else(|| BBox::new(head.location, head.location))
                .expand(half, half);
            self.arc_tree.insert(id, span);
            log::debug!("arc {} on layer {} width {}", arc.name, l, width);
        }
        if let (Some(a), Some(b)) = (self.key(head.port), self.key(tail.port)) {
            self.union(a, b);
        }
        self.arcs.push(GraphArc {
            arc,
            layer,
            head: head.port,
            tail: tail.port,
        });
        id
    }

    pub fn add_leftover(&mut self, geom: GeomPrimitive) -> usize {
        self.leftovers.push(geom);
        self.leftovers.len() - 1
    }

    pub fn add_instance(&mut self, instance: CellInstance) {
        self.instances.push(instance);
    }

    pub fn add_export(&mut self, export: Export) {
        self.exports.push(export);
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e.name == name)
    }

    pub fn claim(&mut self, feature: Feature, layer: LayerId, area: f64) {
        if area > 0.0 {
            self.claims.push(Claim {
                feature,
                layer,
                area,
            });
        }
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn claimed_area(&self, layer: LayerId) -> f64 {
        self.claims
            .iter()
            .filter(|c| c.layer == layer && c.feature != Feature::Sliver)
            .map(|c| c.area)
            .sum()
    }

    pub fn discarded_area(&self, layer: LayerId) -> f64 {
        self.claims
            .iter()
            .filter(|c| c.layer == layer && c.feature == Feature::Sliver)
            .map(|c| c.area)
            .sum()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn arcs(&self) -> &[GraphArc] {
        &self.arcs
    }

    pub fn arc(&self, id: ArcId) -> Option<&GraphArc> {
        self.arcs.get(id)
    }

    pub fn leftovers(&self) -> &[GeomPrimitive] {
        &self.leftovers
    }

    pub fn port(&self, port: PortRef) -> Option<&PlacedPort> {
        self.nodes.get(port.node)?.ports.get(port.port)
    }

    pub fn port_name(&self, port: PortRef) -> String {
        self.port(port).map(|p| p.name.clone()).unwrap_or_default()
    }

    pub fn count_devices(&self, kind: DeviceKind) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Device(kind))
            .count()
    }

    fn key(&self, port: PortRef) -> Option<usize> {
        let base = *self.port_base.get(port.node)?;
        let key = base + port.port;
        (key < self.parent.len()).then_some(key)
    }

    fn find(&self, mut key: usize) -> usize {
        while self.parent[key] != key {
            key = self.parent[key];
        }
        key
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // lower root wins so net ids do not depend on union order
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }

    /// Net id of a port; ports share a net when wired together.
    pub fn net_of(&self, port: PortRef) -> Option<usize> {
        self.key(port).map(|k| self.find(k))
    }

    /// Net of an arc, taken from its head.
    pub fn net_of_arc(&self, arc: ArcId) -> Option<usize> {
        self.net_of(self.arcs.get(arc)?.head)
    }

    /// Assemble the extracted cell.
    pub fn into_cell(self, name: &str) -> Cell {
        let mut cell = Cell::new(name);
        for node in self.nodes {
            cell.add_node(node.inst);
        }
        for arc in self.arcs {
            cell.add_arc(arc.arc);
        }
        for geom in self.leftovers {
            cell.add_geometry(geom);
        }
        for instance in self.instances {
            cell.add_instance(instance);
        }
        for export in self.exports {
            cell.add_export(export);
        }
        cell
    }
}

impl SpatialQuery for ConnectivityGraph {
    fn ports_touching(&self, layer: LayerId, window: &BBox) -> Vec<PortRef> {
        let mut out: Vec<PortRef> = Vec::new();
        for entry in self.footprint_tree.query_region(window) {
            let (node, l) = entry.item;
            if l != layer {
                continue;
            }
            if let Some(n) = self.nodes.get(node) {
                for (i, p) in n.ports.iter().enumerate() {
                    if p.connects(layer) {
                        out.push(PortRef { node, port: i });
                    }
                }
            }
        }
        for entry in self.port_tree.query_region(window) {
            if self.port(entry.item).is_some_and(|p| p.connects(layer)) {
                out.push(entry.item);
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    fn port_at(&self, layer: LayerId, at: &Point) -> Option<PortRef> {
        self.port_tree
            .query_point(at)
            .into_iter()
            .map(|e| e.item)
            .filter(|r| self.port(*r).is_some_and(|p| p.connects(layer)))
            .min()
    }

    fn arcs_touching(&self, layer: LayerId, window: &BBox) -> Vec<ArcId> {
        let mut out: Vec<ArcId> = self
            .arc_tree
            .query_region(window)
            .into_iter()
            .map(|e| e.item)
            .filter(|id| self.arcs.get(*id).is_some_and(|a| a.layer == Some(layer)))
            .collect();
        out.sort_unstable();
        out
    }
}
