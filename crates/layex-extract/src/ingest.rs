//! Geometry ingestion.
//!
//! Loads one source cell into the context. Pure-layer geometry goes into
//! both merges on canonical layers. Existing devices are copied through and
//! only feed the original merge. Subcells are either inlined or carried
//! over as instance nodes whose ports are the subcell's exports.

use std::collections::HashMap;

use regex::Regex;

use layex_core::cell::normalize_degrees;
use layex_core::geometry::segment_outline;
use layex_core::{
    ArcInst, BBox, Cell, CellId, CellInstance, GeomPrimitive, LayerId, LayoutDatabase, NodeFunction,
    NodeInst, Point, Transform,
};

use crate::config::RoutingMode;
use crate::context::{ExtractionContext, HeldArc};
use crate::error::{ExtractError, Result};
use crate::graph::{EndSpec, NodeId, NodeKind, PortRef};
use crate::templates::PlacedPort;

/// How the hierarchy below the cell is treated.
#[derive(Debug, Clone, Copy)]
pub struct IngestPlan<'p> {
    /// Subcells whose name matches are inlined.
    pub flatten: Option<&'p Regex>,
    /// Converted counterparts of subcells, by source id.
    pub converted: &'p HashMap<CellId, CellId>,
}

pub fn ingest(ctx: &mut ExtractionContext, db: &LayoutDatabase, cell: &Cell, plan: &IngestPlan) -> Result<()> {
    log::info!("Ingesting cell {}", cell.name);
    let mut walk = Walk {
        db,
        plan,
        stack: Vec::new(),
    };
    walk.visit(ctx, cell, &Transform::default(), 0)?;

    for layer in ctx.library.contact_layers() {
        for region in ctx.working.regions(layer) {
            ctx.cuts.insert(layer, region.outline);
        }
    }
    ctx.snapshot_initial();
    log::info!(
        "Ingested {} layers, {} cuts, {} nodes",
        ctx.working.layers().len(),
        ctx.cuts.pending_count(),
        ctx.graph.nodes().len()
    );
    Ok(())
}

struct Walk<'w> {
    db: &'w LayoutDatabase,
    plan: &'w IngestPlan<'w>,
    stack: Vec<CellId>,
}

impl Walk<'_> {
    fn visit(&mut self, ctx: &mut ExtractionContext, cell: &Cell, t: &Transform, depth: usize) -> Result<()> {
        if self.stack.contains(&cell.id) {
            return Err(ExtractError::RecursiveHierarchy(cell.name.clone()));
        }
        self.stack.push(cell.id);
        ctx.check_cancelled()?;
        let db = self.db;

        for geom in &cell.geometries {
            add_both(ctx, &t.apply_primitive(geom));
        }

        // node indices of this cell mapped to graph nodes, for connectors
        let mut copied: Vec<Option<NodeId>> = vec![None; cell.nodes.len()];
        for (i, node) in cell.nodes.iter().enumerate() {
            if node.instance.is_some() {
                continue;
            }
            let placed = transform_node(t, node, depth > 0);
            let function = ctx.library.proto(&placed.proto).map(|p| p.function);
            // wire pins may name a proto the technology does not define
            let pin_layer = ctx.library.pin_layer(&placed.proto);
            let is_pin =
                matches!(function, Some(NodeFunction::Pin)) || (function.is_none() && pin_layer.is_some());
            match function {
                Some(NodeFunction::Node) => {
                    for (layer, outline) in ctx.library.footprint(&placed) {
                        ctx.working.add_outline(layer, &outline);
                        ctx.original.add_outline(layer, &outline);
                    }
                }
                _ if is_pin && ctx.config.routing == RoutingMode::Skeletonize => {}
                _ => {
                    let id = match pin_layer.filter(|_| is_pin) {
                        Some(layer) => ctx.pin_at(layer, placed.center).node,
                        None => copy_node(ctx, placed),
                    };
                    copied[i] = Some(id);
                }
            }
        }

        for arc in &cell.arcs {
            ingest_arc(ctx, cell, arc, t, &copied);
        }

        for inst in &cell.instances {
            let Some(sub) = db.get_cell(&inst.cell_id) else {
                return Err(ExtractError::UnknownCell(inst.cell_id));
            };
            let composed = t.compose(&inst.transform);
            let inline = self.plan.flatten.is_some_and(|re| re.is_match(&sub.name));
            if inline {
                log::debug!("flattening instance {} of {}", inst.instance_name, sub.name);
                self.visit(ctx, sub, &composed, depth + 1)?;
            } else {
                self.add_instance(ctx, inst, sub, composed, depth)?;
            }
        }

        self.stack.pop();
        Ok(())
    }

    /// Carry a subcell instance into the output as an instance node.
    fn add_instance(
        &self,
        ctx: &mut ExtractionContext,
        inst: &CellInstance,
        sub: &Cell,
        composed: Transform,
        depth: usize,
    ) -> Result<()> {
        let target_id = self.plan.converted.get(&sub.id).copied().unwrap_or(sub.id);
        let target = self.db.cell(&target_id)?;

        let mut ports = Vec::new();
        let mut footprint = Vec::new();
        for (i, export) in target.exports.iter().enumerate() {
            let layer = ctx.library.canonical(export.layer_id);
            let shape = composed.apply_primitive(&export.shape).with_layer(layer);
            let Some(bbox) = shape.bbox() else {
                continue;
            };
            add_original(ctx, &shape);
            ports.push(PlacedPort {
                name: export.name.clone(),
                layers: vec![layer],
                bbox,
                topology: i as u32,
            });
            footprint.push((layer, bbox));
        }

        let mut carried = CellInstance::new(target_id, &inst.instance_name, composed);
        if depth == 0 {
            carried.id = inst.id;
        }
        let mut node = NodeInst::new(&target.name, composed.offset, 0.0, 0.0).with_rotation(composed.rotation);
        node.name = inst.instance_name.clone();
        node.instance = Some(carried.id);
        log::debug!("instance {} of {} with {} ports", inst.instance_name, target.name, ports.len());
        ctx.graph.add_node(node, NodeKind::Instance(target_id), ports, &footprint);
        ctx.graph.add_instance(carried);
        Ok(())
    }
}

fn ingest_arc(ctx: &mut ExtractionContext, cell: &Cell, arc: &ArcInst, t: &Transform, copied: &[Option<NodeId>]) {
    let head = t.apply(&arc.head.location);
    let tail = t.apply(&arc.tail.location);
    let width = arc.width * t.scale;
    let layer = arc.proto.as_deref().and_then(|p| ctx.library.wire_layer(p));

    let Some(layer) = layer else {
        // untyped connectors survive only between copied nodes
        let ends = (copied.get(arc.head.node).copied().flatten(), copied.get(arc.tail.node).copied().flatten());
        match (ends, ctx.config.routing) {
            ((Some(h), Some(tl)), RoutingMode::Skeletonize) => {
                let spec = |node: NodeId, name: &str, location: Point| EndSpec {
                    port: PortRef {
                        node,
                        port: port_index(ctx, node, name),
                    },
                    location,
                    extended: false,
                };
                let head = spec(h, &arc.head.port, head);
                let tail = spec(tl, &arc.tail.port, tail);
                ctx.graph.add_arc(None, None, 0.0, head, tail);
            }
            (_, RoutingMode::KeepOriginal) => ctx.held_arcs.push(HeldArc {
                arc: moved_arc(arc, head, tail, width),
                layer: None,
            }),
            _ => log::debug!("dropping connector {} in {}", arc.name, cell.name),
        }
        return;
    };

    let ext = |on: bool| if on { width / 2.0 } else { 0.0 };
    let outline = segment_outline(head, tail, width, ext(arc.head.extended), ext(arc.tail.extended));
    match ctx.config.routing {
        RoutingMode::Skeletonize => {
            if let Some(o) = outline {
                ctx.working.add_outline(layer, &o);
                ctx.original.add_outline(layer, &o);
            }
        }
        RoutingMode::KeepOriginal => {
            if let Some(o) = outline {
                ctx.original.add_outline(layer, &o);
            }
            ctx.held_arcs.push(HeldArc {
                arc: moved_arc(arc, head, tail, width),
                layer: Some(layer),
            });
        }
    }
}

fn add_both(ctx: &mut ExtractionContext, geom: &GeomPrimitive) {
    let layer = ctx.library.canonical(geom.layer_id());
    ctx.working.add_primitive(layer, geom);
    ctx.original.add_primitive(layer, geom);
}

fn add_original(ctx: &mut ExtractionContext, geom: &GeomPrimitive) {
    let layer = ctx.library.canonical(geom.layer_id());
    ctx.original.add_primitive(layer, geom);
}

/// Copy an existing device or pin through unchanged.
fn copy_node(ctx: &mut ExtractionContext, node: NodeInst) -> NodeId {
    let footprint = ctx.library.footprint(&node);
    let ports = ctx.library.ports(&node);
    for (layer, outline) in &footprint {
        ctx.original.add_outline(*layer, outline);
    }
    let boxes: Vec<(LayerId, BBox)> = footprint
        .iter()
        .filter_map(|(l, o)| BBox::from_points(o).map(|b| (*l, b)))
        .collect();
    if ports.is_empty() {
        log::debug!("copied node {} of {} has no ports", node.name, node.proto);
    }
    ctx.graph.add_node(node, NodeKind::Copied, ports, &boxes)
}

fn port_index(ctx: &ExtractionContext, node: NodeId, name: &str) -> usize {
    ctx.graph
        .node(node)
        .and_then(|n| n.ports.iter().position(|p| p.name == name))
        .unwrap_or(0)
}

fn moved_arc(arc: &ArcInst, head: Point, tail: Point, width: f64) -> ArcInst {
    let mut moved = arc.clone();
    moved.head.location = head;
    moved.tail.location = tail;
    moved.width = width;
    moved
}

/// A node placed through an instance transform. Mirroring only flips the
/// sense of the rotation.
fn transform_node(t: &Transform, node: &NodeInst, nested: bool) -> NodeInst {
    if t.is_identity() {
        return node.clone();
    }
    let mut placed = node.clone();
    placed.center = t.apply(&node.center);
    let r = if t.mirror_x { -node.rotation } else { node.rotation };
    placed.rotation = normalize_degrees(t.rotation + r);
    placed.width *= t.scale;
    placed.height *= t.scale;
    placed.trace = node.trace.as_ref().map(|trace| t.apply_all(trace));
    if nested {
        // let the graph name it; names from different instances collide
        placed.name.clear();
    }
    placed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::context::{CancelToken, WellPresence};
    use crate::templates::TemplateLibrary;
    use layex_core::{
        ArcEnd, Export, Inset, Layer, LayerFunction, NodeProto, PinDirection, PortProto, Rect, Technology,
        WireProto,
    };

    fn technology() -> Technology {
        let mut tech = Technology::new("t");
        tech.layers.add_layer(Layer::new(1, "metal1", LayerFunction::Metal(1)));
        tech.layers.add_layer(Layer::new(2, "cut", LayerFunction::Contact(1)));
        tech.wires.push(WireProto {
            name: "m1".into(),
            layer: 1,
            default_width: 2.0,
            pin: "m1pin".into(),
        });
        tech.nodes.push(NodeProto {
            name: "m1pin".into(),
            function: NodeFunction::Pin,
            default_width: 0.0,
            default_height: 0.0,
            layers: vec![],
            ports: vec![PortProto {
                name: "m1".into(),
                layers: vec![1],
                inset: Inset::default(),
                topology: 0,
            }],
            multicut: None,
            size_offset: Inset::default(),
            serpentine: false,
        });
        tech
    }

    fn rect(layer: LayerId, x1: f64, y1: f64, x2: f64, y2: f64) -> GeomPrimitive {
        GeomPrimitive::Rect(Rect::new(layer, x1, y1, x2, y2))
    }

    fn wired_cell() -> Cell {
        let mut cell = Cell::new("leaf");
        let a = cell.add_node(NodeInst::new("m1pin", Point::new(1.0, 1.0), 0.0, 0.0));
        let b = cell.add_node(NodeInst::new("m1pin", Point::new(9.0, 1.0), 0.0, 0.0));
        let end = |node, x| ArcEnd {
            node,
            port: "m1".into(),
            location: Point::new(x, 1.0),
            extended: true,
        };
        cell.add_arc(ArcInst {
            name: "w".into(),
            proto: Some("m1".into()),
            width: 2.0,
            head: end(a, 1.0),
            tail: end(b, 9.0),
        });
        cell.add_geometry(rect(2, 20.0, 0.0, 21.0, 1.0));
        cell
    }

    #[test]
    fn test_skeletonize_flattens_wires_into_geometry() {
        let tech = technology();
        let lib = TemplateLibrary::build(&tech, false).unwrap();
        let config = ExtractConfig::default();
        let db = LayoutDatabase::new("lib", tech);
        let cell = wired_cell();
        let converted = HashMap::new();
        let plan = IngestPlan {
            flatten: None,
            converted: &converted,
        };
        let mut ctx = ExtractionContext::new("leaf", &lib, &config, WellPresence::default(), CancelToken::new());
        ingest(&mut ctx, &db, &cell, &plan).unwrap();
        // pins are dropped and the wire becomes a 10x2 bar
        assert!(ctx.graph.nodes().is_empty());
        assert!((ctx.working.area(1) - 20.0).abs() < 1e-6);
        assert_eq!(ctx.cuts.pending_count(), 1);
    }

    #[test]
    fn test_keep_original_holds_arcs_and_copies_pins() {
        let tech = technology();
        let lib = TemplateLibrary::build(&tech, false).unwrap();
        let config = ExtractConfig {
            routing: RoutingMode::KeepOriginal,
            ..ExtractConfig::default()
        };
        let db = LayoutDatabase::new("lib", tech);
        let cell = wired_cell();
        let converted = HashMap::new();
        let plan = IngestPlan {
            flatten: None,
            converted: &converted,
        };
        let mut ctx = ExtractionContext::new("leaf", &lib, &config, WellPresence::default(), CancelToken::new());
        ingest(&mut ctx, &db, &cell, &plan).unwrap();
        assert_eq!(ctx.graph.nodes().len(), 2);
        assert_eq!(ctx.held_arcs.len(), 1);
        assert!(ctx.working.area(1) < 1e-9);
        assert!((ctx.original.area(1) - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_instances_are_inlined_or_carried() {
        let tech = technology();
        let lib = TemplateLibrary::build(&tech, false).unwrap();
        let config = ExtractConfig::default();
        let mut db = LayoutDatabase::new("lib", tech);

        let mut leaf = Cell::new("leaf");
        leaf.add_geometry(rect(1, 0.0, 0.0, 4.0, 2.0));
        leaf.add_export(Export::new("a", rect(1, 0.0, 0.0, 2.0, 2.0), PinDirection::InOut));
        let leaf_id = db.add_cell(leaf);

        let mut top = Cell::new("top");
        top.add_instance(CellInstance::new(leaf_id, "u0", Transform::translate(10.0, 0.0)));
        let top_id = db.add_cell(top);
        let top = db.cell(&top_id).unwrap().clone();
        let converted = HashMap::new();

        let inline = Regex::new("^leaf$").unwrap();
        let plan = IngestPlan {
            flatten: Some(&inline),
            converted: &converted,
        };
        let mut ctx = ExtractionContext::new("top", &lib, &config, WellPresence::default(), CancelToken::new());
        ingest(&mut ctx, &db, &top, &plan).unwrap();
        assert_eq!(ctx.working.bbox(1).unwrap().min.x, 10.0);
        assert!(ctx.graph.nodes().is_empty());

        let plan = IngestPlan {
            flatten: None,
            converted: &converted,
        };
        let mut ctx = ExtractionContext::new("top", &lib, &config, WellPresence::default(), CancelToken::new());
        ingest(&mut ctx, &db, &top, &plan).unwrap();
        assert!(ctx.working.is_empty());
        let node = &ctx.graph.nodes()[0];
        assert_eq!(node.kind, NodeKind::Instance(leaf_id));
        assert_eq!(node.inst.name, "u0");
        assert!(node.ports[0].bbox.center().approx_eq(&Point::new(11.0, 1.0), 1e-9));
        assert!(ctx.original.contains_point(1, &Point::new(11.0, 1.0)));
    }

    #[test]
    fn test_self_instantiation_is_rejected() {
        let tech = technology();
        let lib = TemplateLibrary::build(&tech, false).unwrap();
        let config = ExtractConfig::default();
        let mut db = LayoutDatabase::new("lib", tech);
        let mut cell = Cell::new("loop");
        let id = cell.id;
        cell.add_instance(CellInstance::new(id, "self", Transform::default()));
        db.add_cell(cell);
        let cell = db.cell(&id).unwrap().clone();
        let converted = HashMap::new();
        let inline = Regex::new(".*").unwrap();
        let plan = IngestPlan {
            flatten: Some(&inline),
            converted: &converted,
        };
        let mut ctx = ExtractionContext::new("loop", &lib, &config, WellPresence::default(), CancelToken::new());
        assert!(matches!(
            ingest(&mut ctx, &db, &cell, &plan),
            Err(ExtractError::RecursiveHierarchy(_))
        ));
    }
}
