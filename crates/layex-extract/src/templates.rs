//! Device template library.
//!
//! Built once per technology: canonical layers, the via/contact and
//! transistor templates the recognizers try, and the wire type of every
//! routable layer. Also knows how to turn a placed node back into layer
//! geometry and ports.

use std::collections::{BTreeMap, HashMap};

use layex_core::cell::CutAlignment;
use layex_core::geometry::{segment_outline, EPSILON};
use layex_core::{BBox, Inset, LayerFunction, LayerId, MultiCut, NodeFunction, NodeInst, NodeProto, Point, Technology};

use crate::error::{ExtractError, Result};
use crate::geom::rotated_outline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Polarity {
    N,
    P,
}

/// What a recognized device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Via,
    Transistor(Polarity),
    Pin,
}

/// One required layer of a template, inset from the node bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerRule {
    pub layer: LayerId,
    pub inset: Inset,
}

#[derive(Debug, Clone)]
pub struct ViaTemplate {
    pub proto: String,
    pub cut_layer: LayerId,
    pub cut_inset: Inset,
    /// Every non-cut layer.
    pub layers: Vec<LayerRule>,
    pub multicut: Option<MultiCut>,
    pub default_width: f64,
    pub default_height: f64,
    /// Position in the technology's node list.
    pub order: usize,
}

impl ViaTemplate {
    pub fn area(&self) -> f64 {
        self.default_width * self.default_height
    }

    /// Size of one cut of this template.
    pub fn cut_size(&self) -> (f64, f64) {
        match &self.multicut {
            Some(rule) => (rule.cut_width, rule.cut_height),
            None => (
                self.default_width - self.cut_inset.horizontal(),
                self.default_height - self.cut_inset.vertical(),
            ),
        }
    }

    /// Node bounds that put exactly one cut over `cut`.
    pub fn bounds_around_cut(&self, cut: &BBox) -> BBox {
        BBox::from_corners(
            cut.min.x - self.cut_inset.left,
            cut.min.y - self.cut_inset.bottom,
            cut.max.x + self.cut_inset.right,
            cut.max.y + self.cut_inset.top,
        )
    }
}

#[derive(Debug, Clone)]
pub struct TransistorTemplate {
    pub proto: String,
    pub polarity: Polarity,
    pub poly: LayerId,
    pub active: LayerId,
    pub layers: Vec<LayerRule>,
    /// Distance from the node bounds to the gate.
    pub size_offset: Inset,
    pub serpentine: bool,
    pub order: usize,
}

#[derive(Debug, Clone)]
pub struct WireTemplate {
    pub proto: String,
    pub layer: LayerId,
    pub default_width: f64,
    pub pin: String,
}

/// Port of a placed node, in absolute coordinates on canonical layers.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedPort {
    pub name: String,
    pub layers: Vec<LayerId>,
    pub bbox: BBox,
    pub topology: u32,
}

impl PlacedPort {
    pub fn center(&self) -> Point {
        self.bbox.center()
    }

    pub fn connects(&self, layer: LayerId) -> bool {
        self.layers.contains(&layer)
    }
}

#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    canonical: HashMap<LayerId, LayerId>,
    functions: HashMap<LayerId, LayerFunction>,
    names: HashMap<LayerId, String>,
    vias: Vec<ViaTemplate>,
    transistors: Vec<TransistorTemplate>,
    wires: BTreeMap<LayerId, WireTemplate>,
    wire_layers: HashMap<String, LayerId>,
    pin_layers: HashMap<String, LayerId>,
    protos: HashMap<String, NodeProto>,
}

impl TemplateLibrary {
    pub fn build(tech: &Technology, unify_active: bool) -> Result<Self> {
        let all = tech.layers.all_layers();
        if all.is_empty() {
            return Err(ExtractError::EmptyTechnology(tech.name.clone()));
        }

        let mut canonical = HashMap::new();
        let mut functions = HashMap::new();
        let mut names = HashMap::new();
        let mut first_of: BTreeMap<LayerFunction, LayerId> = BTreeMap::new();
        for layer in all.iter().filter(|l| !l.pseudo) {
            first_of.entry(layer.function).or_insert(layer.id);
        }
        let first_poly = first_of.get(&LayerFunction::Poly(1)).copied();
        let first_active = all
            .iter()
            .find(|l| !l.pseudo && l.function.is_diffusion())
            .map(|l| l.id);
        for layer in all {
            let mut target = first_of.get(&layer.function).copied().unwrap_or(layer.id);
            if layer.function == LayerFunction::Gate {
                target = first_poly.unwrap_or(target);
            }
            if unify_active && layer.function.is_diffusion() {
                target = first_active.unwrap_or(target);
            }
            canonical.insert(layer.id, target);
        }
        for layer in all {
            if !layer.pseudo && canonical.get(&layer.id) == Some(&layer.id) {
                functions.insert(layer.id, layer.function);
                names.insert(layer.id, layer.name.clone());
            }
        }

        let mut library = Self {
            canonical,
            functions,
            names,
            vias: Vec::new(),
            transistors: Vec::new(),
            wires: BTreeMap::new(),
            wire_layers: HashMap::new(),
            pin_layers: HashMap::new(),
            protos: tech.nodes.iter().map(|n| (n.name.clone(), n.clone())).collect(),
        };

        for (order, proto) in tech.nodes.iter().enumerate() {
            match proto.function {
                NodeFunction::Contact | NodeFunction::WellContact | NodeFunction::SubstrateContact => {
                    if let Some(t) = library.via_template(proto, order) {
                        library.vias.push(t);
                    }
                }
                NodeFunction::TransistorN | NodeFunction::TransistorP => {
                    if let Some(t) = library.transistor_template(proto, order) {
                        library.transistors.push(t);
                    }
                }
                NodeFunction::Pin | NodeFunction::Node => {}
            }
        }
        // largest first, library order among equals
        library
            .vias
            .sort_by(|a, b| b.area().total_cmp(&a.area()).then(a.order.cmp(&b.order)));

        for wire in &tech.wires {
            let layer = library.canonical(wire.layer);
            library.wire_layers.insert(wire.name.clone(), layer);
            library.pin_layers.entry(wire.pin.clone()).or_insert(layer);
            library.wires.entry(layer).or_insert_with(|| WireTemplate {
                proto: wire.name.clone(),
                layer,
                default_width: wire.default_width,
                pin: wire.pin.clone(),
            });
        }

        log::debug!(
            "templates for {}: {} vias, {} transistors, {} wire layers",
            tech.name,
            library.vias.len(),
            library.transistors.len(),
            library.wires.len()
        );
        Ok(library)
    }

    fn rules(&self, proto: &NodeProto) -> Vec<LayerRule> {
        let mut rules: Vec<LayerRule> = Vec::new();
        for nl in &proto.layers {
            if self.is_pseudo_only(nl.layer) {
                continue;
            }
            let layer = self.canonical(nl.layer);
            if rules.iter().all(|r| r.layer != layer) {
                rules.push(LayerRule {
                    layer,
                    inset: nl.inset,
                });
            }
        }
        rules
    }

    fn is_pseudo_only(&self, layer: LayerId) -> bool {
        // a pseudo layer with no real counterpart folds onto itself
        !self.functions.contains_key(&self.canonical(layer))
    }

    fn via_template(&self, proto: &NodeProto, order: usize) -> Option<ViaTemplate> {
        let rules = self.rules(proto);
        let mut cuts = rules.iter().filter(|r| self.function(r.layer).is_contact());
        let cut = *cuts.next()?;
        if cuts.next().is_some() {
            log::debug!("skipping {}: more than one cut layer", proto.name);
            return None;
        }
        Some(ViaTemplate {
            proto: proto.name.clone(),
            cut_layer: cut.layer,
            cut_inset: cut.inset,
            layers: rules.into_iter().filter(|r| r.layer != cut.layer).collect(),
            multicut: proto.multicut.clone(),
            default_width: proto.default_width,
            default_height: proto.default_height,
            order,
        })
    }

    fn transistor_template(&self, proto: &NodeProto, order: usize) -> Option<TransistorTemplate> {
        let rules = self.rules(proto);
        let poly = rules.iter().find(|r| self.function(r.layer).is_poly())?.layer;
        let active = rules.iter().find(|r| self.function(r.layer).is_diffusion())?.layer;
        Some(TransistorTemplate {
            proto: proto.name.clone(),
            polarity: if proto.function == NodeFunction::TransistorP {
                Polarity::P
            } else {
                Polarity::N
            },
            poly,
            active,
            layers: rules,
            size_offset: proto.size_offset,
            serpentine: proto.serpentine,
            order,
        })
    }

    pub fn canonical(&self, layer: LayerId) -> LayerId {
        self.canonical.get(&layer).copied().unwrap_or(layer)
    }

    pub fn function(&self, layer: LayerId) -> LayerFunction {
        self.functions
            .get(&self.canonical(layer))
            .copied()
            .unwrap_or(LayerFunction::Other)
    }

    pub fn layer_name(&self, layer: LayerId) -> String {
        self.names
            .get(&self.canonical(layer))
            .cloned()
            .unwrap_or_else(|| format!("layer {layer}"))
    }

    /// Canonical layers, ascending.
    pub fn canonical_layers(&self) -> Vec<LayerId> {
        let mut ids: Vec<LayerId> = self.functions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contact_layers(&self) -> Vec<LayerId> {
        self.canonical_layers()
            .into_iter()
            .filter(|l| self.function(*l).is_contact())
            .collect()
    }

    pub fn vias(&self) -> &[ViaTemplate] {
        &self.vias
    }

    pub fn transistors(&self) -> &[TransistorTemplate] {
        &self.transistors
    }

    pub fn wire(&self, layer: LayerId) -> Option<&WireTemplate> {
        self.wires.get(&self.canonical(layer))
    }

    pub fn wires(&self) -> impl Iterator<Item = &WireTemplate> {
        self.wires.values()
    }

    /// Canonical layer of a wire type, by name.
    pub fn wire_layer(&self, name: &str) -> Option<LayerId> {
        self.wire_layers.get(name).copied()
    }

    /// Canonical layer of the wire whose pin is named `proto`.
    pub fn pin_layer(&self, proto: &str) -> Option<LayerId> {
        self.pin_layers.get(proto).copied()
    }

    pub fn proto(&self, name: &str) -> Option<&NodeProto> {
        self.protos.get(name)
    }

    /// Geometry a placed node puts on each canonical layer.
    pub fn footprint(&self, node: &NodeInst) -> Vec<(LayerId, Vec<Point>)> {
        let Some(proto) = self.proto(&node.proto) else {
            return Vec::new();
        };
        if proto.function == NodeFunction::Pin {
            return Vec::new();
        }
        if let Some(trace) = &node.trace {
            return self.serpentine_footprint(proto, node, trace);
        }
        let bounds = BBox::centered(node.center, node.width, node.height);
        let mut out = Vec::new();
        for rule in self.rules(proto) {
            if self.function(rule.layer).is_contact() {
                if let Some(cut_rule) = &proto.multicut {
                    let alignment = node.cut_alignment.unwrap_or(CutAlignment::Centered);
                    for cut in cut_boxes(cut_rule, &bounds, alignment) {
                        out.push((rule.layer, rotated_outline(&cut, node.center, node.rotation)));
                    }
                    continue;
                }
            }
            let b = rule.inset.apply(&bounds);
            if b.width() <= EPSILON || b.height() <= EPSILON {
                continue;
            }
            out.push((rule.layer, rotated_outline(&b, node.center, node.rotation)));
        }
        out
    }

    fn serpentine_footprint(&self, proto: &NodeProto, node: &NodeInst, trace: &[Point]) -> Vec<(LayerId, Vec<Point>)> {
        let so = proto.size_offset;
        let gate_width = node.height - so.vertical();
        let n = trace.len();
        let mut out = Vec::new();
        for rule in self.rules(proto) {
            let width = gate_width + so.vertical() - rule.inset.vertical();
            let start_ext = so.left - rule.inset.left;
            let end_ext = so.right - rule.inset.right;
            if width <= EPSILON {
                continue;
            }
            for i in 1..n {
                let head = if i == 1 { start_ext } else { width / 2.0 };
                let tail = if i == n - 1 { end_ext } else { width / 2.0 };
                if let Some(outline) = segment_outline(trace[i - 1], trace[i], width, head, tail) {
                    out.push((rule.layer, outline));
                }
            }
        }
        out
    }

    /// Ports of a placed node.
    pub fn ports(&self, node: &NodeInst) -> Vec<PlacedPort> {
        let Some(proto) = self.proto(&node.proto) else {
            return Vec::new();
        };
        let bounds = BBox::centered(node.center, node.width, node.height);
        proto
            .ports
            .iter()
            .map(|port| {
                let inner = port.inset.apply(&bounds);
                let outline = rotated_outline(&inner, node.center, node.rotation);
                let bbox = BBox::from_points(&outline).unwrap_or(inner);
                let mut layers: Vec<LayerId> = port.layers.iter().map(|l| self.canonical(*l)).collect();
                layers.sort_unstable();
                layers.dedup();
                PlacedPort {
                    name: port.name.clone(),
                    layers,
                    bbox,
                    topology: port.topology,
                }
            })
            .collect()
    }
}

fn cuts_along(len: f64, cut: f64, spacing: f64) -> usize {
    if len + EPSILON < cut {
        return 0;
    }
    ((len + spacing + 1e-6) / (cut + spacing)).floor() as usize
}

/// Cut columns and rows a node of the given bounds holds, with the spacing used.
pub fn cut_counts(rule: &MultiCut, bounds: &BBox) -> (usize, usize, f64) {
    let area = bounds.expand(-rule.indent, -rule.indent);
    let nx = cuts_along(area.width(), rule.cut_width, rule.spacing);
    let ny = cuts_along(area.height(), rule.cut_height, rule.spacing);
    if (nx >= 3 && ny >= 2) || (nx >= 2 && ny >= 3) {
        let ax = cuts_along(area.width(), rule.cut_width, rule.array_spacing);
        let ay = cuts_along(area.height(), rule.cut_height, rule.array_spacing);
        return (ax, ay, rule.array_spacing);
    }
    (nx, ny, rule.spacing)
}

fn axis_positions(lo: f64, len: f64, n: usize, cut: f64, spacing: f64, alignment: CutAlignment) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let centered = |spacing: f64| {
        let total = n as f64 * cut + (n as f64 - 1.0) * spacing;
        let start = lo + (len - total) / 2.0;
        (0..n).map(|i| start + i as f64 * (cut + spacing)).collect()
    };
    match alignment {
        CutAlignment::Centered => centered(spacing),
        CutAlignment::Spread if n == 1 => centered(spacing),
        CutAlignment::Spread => {
            let gap = (len - n as f64 * cut) / (n as f64 - 1.0);
            (0..n).map(|i| lo + i as f64 * (cut + gap)).collect()
        }
        CutAlignment::Corner => (0..n).map(|i| lo + i as f64 * (cut + spacing)).collect(),
    }
}

/// Cut positions of a multi-cut node, row by row from the bottom.
pub fn cut_boxes(rule: &MultiCut, bounds: &BBox, alignment: CutAlignment) -> Vec<BBox> {
    let (nx, ny, spacing) = cut_counts(rule, bounds);
    let area = bounds.expand(-rule.indent, -rule.indent);
    let xs = axis_positions(area.min.x, area.width(), nx, rule.cut_width, spacing, alignment);
    let ys = axis_positions(area.min.y, area.height(), ny, rule.cut_height, spacing, alignment);
    let mut out = Vec::with_capacity(nx * ny);
    for y in &ys {
        for x in &xs {
            out.push(BBox::from_corners(*x, *y, x + rule.cut_width, y + rule.cut_height));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use layex_core::technology::{NodeLayer, PortProto};
    use layex_core::{Layer, WireProto};

    fn tech() -> Technology {
        let mut tech = Technology::new("t");
        tech.layers.add_layer(Layer::new(1, "metal1", LayerFunction::Metal(1)));
        tech.layers.add_layer(Layer::new(2, "metal2", LayerFunction::Metal(2)));
        tech.layers.add_layer(Layer::new(3, "via1", LayerFunction::Contact(2)));
        tech.layers.add_layer(Layer::new(4, "poly", LayerFunction::Poly(1)));
        tech.layers.add_layer(Layer::new(5, "gate", LayerFunction::Gate));
        tech.layers.add_layer(Layer::new(6, "ndiff", LayerFunction::DiffN));
        tech.layers.add_layer(Layer::new(7, "pdiff", LayerFunction::DiffP));
        tech.layers.add_layer(Layer::new(8, "metal1-pin", LayerFunction::Metal(1)).as_pseudo());
        tech.wires.push(WireProto {
            name: "m1".into(),
            layer: 8,
            default_width: 3.0,
            pin: "m1pin".into(),
        });
        let layer = |layer, inset| NodeLayer { layer, inset: Inset::uniform(inset) };
        tech.nodes.push(NodeProto {
            name: "small".into(),
            function: NodeFunction::Contact,
            default_width: 4.0,
            default_height: 4.0,
            layers: vec![layer(1, 0.0), layer(2, 0.0), layer(3, 1.0)],
            ports: vec![PortProto {
                name: "via".into(),
                layers: vec![1, 2],
                inset: Inset::uniform(1.0),
                topology: 0,
            }],
            multicut: Some(MultiCut {
                cut_width: 2.0,
                cut_height: 2.0,
                indent: 1.0,
                spacing: 3.0,
                array_spacing: 4.0,
            }),
            size_offset: Inset::default(),
            serpentine: false,
        });
        tech.nodes.push(NodeProto {
            name: "big".into(),
            function: NodeFunction::Contact,
            default_width: 6.0,
            default_height: 6.0,
            layers: vec![layer(1, 0.0), layer(3, 2.0), layer(4, 0.0)],
            ports: vec![],
            multicut: None,
            size_offset: Inset::default(),
            serpentine: false,
        });
        tech
    }

    #[test]
    fn test_canonical_layers() {
        let lib = TemplateLibrary::build(&tech(), false).unwrap();
        assert_eq!(lib.canonical(5), 4);
        assert_eq!(lib.canonical(8), 1);
        assert_ne!(lib.canonical(6), lib.canonical(7));
        assert_eq!(lib.wire(1).unwrap().proto, "m1");
        assert_eq!(lib.wire_layer("m1"), Some(1));
        let unified = TemplateLibrary::build(&tech(), true).unwrap();
        assert_eq!(unified.canonical(7), 6);
    }

    #[test]
    fn test_vias_sorted_by_area() {
        let lib = TemplateLibrary::build(&tech(), false).unwrap();
        let names: Vec<&str> = lib.vias().iter().map(|v| v.proto.as_str()).collect();
        assert_eq!(names, vec!["big", "small"]);
        let small = &lib.vias()[1];
        assert_eq!(small.cut_layer, 3);
        assert_eq!(small.layers.len(), 2);
        assert_eq!(small.cut_size(), (2.0, 2.0));
        let around = small.bounds_around_cut(&BBox::from_corners(1.0, 1.0, 3.0, 3.0));
        assert!((around.width() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_cut_array_layouts() {
        let rule = MultiCut {
            cut_width: 2.0,
            cut_height: 2.0,
            indent: 1.0,
            spacing: 3.0,
            array_spacing: 4.0,
        };
        let bounds = BBox::from_corners(0.0, 0.0, 9.0, 9.0);
        assert_eq!(cut_counts(&rule, &bounds), (2, 2, 3.0));
        let centered = cut_boxes(&rule, &bounds, CutAlignment::Centered);
        assert_eq!(centered.len(), 4);
        assert!(centered[0].min.approx_eq(&Point::new(1.0, 1.0), 1e-9));
        assert!(centered[3].min.approx_eq(&Point::new(6.0, 6.0), 1e-9));

        let wide = BBox::from_corners(0.0, 0.0, 10.0, 4.0);
        let spread = cut_boxes(&rule, &wide, CutAlignment::Spread);
        assert!(spread[1].max.approx_eq(&Point::new(9.0, 3.0), 1e-9));
        let corner = cut_boxes(&rule, &wide, CutAlignment::Corner);
        assert!(corner[1].min.approx_eq(&Point::new(6.0, 1.0), 1e-9));

        // three by two switches to the array spacing
        let array = BBox::from_corners(0.0, 0.0, 16.0, 10.0);
        assert_eq!(cut_counts(&rule, &array), (3, 2, 4.0));
    }

    #[test]
    fn test_footprint_and_ports() {
        let lib = TemplateLibrary::build(&tech(), false).unwrap();
        let node = NodeInst::new("small", Point::new(4.5, 4.5), 9.0, 9.0);
        let fp = lib.footprint(&node);
        assert_eq!(fp.iter().filter(|(l, _)| *l == 3).count(), 4);
        assert_eq!(fp.iter().filter(|(l, _)| *l == 1).count(), 1);
        let ports = lib.ports(&node);
        assert_eq!(ports.len(), 1);
        assert!(ports[0].connects(2));
        assert!((ports[0].bbox.width() - 7.0).abs() < 1e-9);
    }
}
