//! Wire realization.
//!
//! Remaining routable geometry is skeletonized region by region and every
//! centerline becomes an arc. An end touching an existing port connects to
//! it; a hub end shares a pin with the other lines meeting there; a free
//! end gets a pin pulled in by half the width so the extended arc stops at
//! the drawn edge.

use layex_core::geometry::{segment_outline, EPSILON};
use layex_core::{BBox, LayerId, Point};

use crate::centerline::{Centerline, Deferral, Skeletonizer};
use crate::context::ExtractionContext;
use crate::error::Result;
use crate::geom::{position_along, project_onto_line};
use crate::graph::{EndSpec, Feature, PortRef, SpatialQuery};
use crate::issue::IssueKind;
use crate::scale::snap;
use crate::templates::WireTemplate;

const TOUCH: f64 = 0.001;

pub fn extract_wires(ctx: &mut ExtractionContext) -> Result<usize> {
    let library = ctx.library;
    let templates: Vec<&WireTemplate> = library.wires().collect();
    log::info!("Extracting wires on {} layers", templates.len());
    let mut made = 0;
    for wire in templates {
        for region in ctx.working.regions(wire.layer) {
            ctx.check_cancelled()?;
            if region.area() < ctx.config.min_area {
                continue;
            }
            let lines = {
                let original = &ctx.original;
                let fits = |o: &[Point]| original.contains(wire.layer, o);
                Skeletonizer::new(&fits, ctx.config, ctx.grid).run(&region)
            };
            match lines {
                Ok(lines) => {
                    for line in &lines {
                        if realize(ctx, wire, line) {
                            made += 1;
                        }
                    }
                }
                Err(Deferral::NoCenterline) => {
                    log::debug!("no centerline in {} region at {:?}", wire.proto, region.bbox().min);
                }
                Err(deferral) => {
                    ctx.issues.warning(
                        IssueKind::GeometryAnomaly,
                        Some(wire.layer),
                        Some(region.bbox()),
                        format!("{} region left as geometry: {deferral}", library.layer_name(wire.layer)),
                    );
                }
            }
        }
    }
    log::info!("Created {made} wires");
    Ok(made)
}

/// Turn one centerline into an arc between two ports.
fn realize(ctx: &mut ExtractionContext, wire: &WireTemplate, line: &Centerline) -> bool {
    let Some(dir) = line.dir() else {
        return false;
    };
    let len = line.length();
    let head = end_plan(ctx, wire.layer, line.start, line.start_hub, dir * -1.0, line.width, len);
    let tail = end_plan(ctx, wire.layer, line.end, line.end_hub, dir, line.width, len);
    realize_span(ctx, wire, line.width, head, tail)
}

/// One end of a span before its pin exists. `port` is set when the end
/// lands on a port already in the graph.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EndPlan {
    pub port: Option<PortRef>,
    pub location: Point,
    pub extended: bool,
}

impl EndPlan {
    pub fn free(location: Point, extended: bool) -> Self {
        EndPlan {
            port: None,
            location,
            extended,
        }
    }
}

/// Materialize the pins of a span and connect it. Pins are only created
/// once the span is known to become an arc. A span whose ends coincide
/// becomes a single zero-length extended arc on one pin.
pub(crate) fn realize_span(
    ctx: &mut ExtractionContext,
    wire: &WireTemplate,
    width: f64,
    head: EndPlan,
    tail: EndPlan,
) -> bool {
    let degenerate = head.location.approx_eq(&tail.location, EPSILON);
    if !degenerate && head.port.is_some() && head.port == tail.port {
        log::debug!("skipping wire looping back to one port at {:?}", head.location);
        return false;
    }
    let head_port = match head.port.or(if degenerate { tail.port } else { None }) {
        Some(port) => port,
        None => ctx.pin_at(wire.layer, head.location),
    };
    let tail_port = match tail.port {
        Some(port) => port,
        None if degenerate => head_port,
        None => ctx.pin_at(wire.layer, tail.location),
    };
    if !degenerate && head_port == tail_port {
        log::debug!("skipping wire looping back to one port at {:?}", head.location);
        return false;
    }
    let spec = |port, plan: EndPlan| EndSpec {
        port,
        location: plan.location,
        extended: plan.extended || degenerate,
    };
    connect(ctx, Some(wire), wire.layer, width, spec(head_port, head), spec(tail_port, tail))
}

fn end_plan(
    ctx: &ExtractionContext,
    layer: LayerId,
    at: Point,
    hub: bool,
    outward: Point,
    width: f64,
    len: f64,
) -> EndPlan {
    if hub {
        return EndPlan::free(at, true);
    }
    if let Some(plan) = touching_port(ctx, layer, at, outward, len) {
        return plan;
    }
    let pull = (width / 2.0).min(len / 2.0);
    let inner = at - outward * pull;
    EndPlan::free(Point::new(snap(inner.x), snap(inner.y)), true)
}

/// The nearest existing port touching a line end, with the arc end placed
/// where the port center projects onto the line.
fn touching_port(ctx: &ExtractionContext, layer: LayerId, at: Point, outward: Point, len: f64) -> Option<EndPlan> {
    let window = BBox::new(at, at).expand(TOUCH, TOUCH);
    ctx.graph
        .ports_touching(layer, &window)
        .into_iter()
        .filter_map(|r| {
            let center = ctx.graph.port(r)?.center();
            let foot = project_onto_line(center, at, outward);
            // not behind the far end of the line
            if position_along(foot, at, outward) <= -len + EPSILON {
                return None;
            }
            Some((center.distance_to(&at), r, foot))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, port, foot)| EndPlan {
            port: Some(port),
            location: Point::new(snap(foot.x), snap(foot.y)),
            extended: false,
        })
}

/// Legalize an arc against the original geometry, narrowing it in grid
/// steps when it does not fit. Falls back to a zero-width connector.
pub(crate) fn connect(
    ctx: &mut ExtractionContext,
    wire: Option<&WireTemplate>,
    layer: LayerId,
    width: f64,
    head: EndSpec,
    tail: EndSpec,
) -> bool {
    let step = ctx.grid.step_len();
    let mut w = width;
    while w > EPSILON {
        let (mut h, mut t) = (head.extended, tail.extended);
        if ctx
            .original
            .candidate_fits(layer, head.location, tail.location, w, &mut h, &mut t)
        {
            let head = EndSpec { extended: h, ..head };
            let tail = EndSpec { extended: t, ..tail };
            let proto = wire.map(|wt| wt.proto.as_str());
            let id = ctx.graph.add_arc(proto, Some(layer), w, head, tail);
            let ext = |on: bool| if on { w / 2.0 } else { 0.0 };
            if let Some(outline) = segment_outline(head.location, tail.location, w, ext(h), ext(t)) {
                ctx.claim_outline(Feature::Arc(id), layer, &outline);
            }
            return true;
        }
        w -= step;
    }
    ctx.issues.error(
        IssueKind::ConnectionFailure,
        Some(layer),
        BBox::from_points(&[head.location, tail.location]),
        format!(
            "{} wire from ({:.3}, {:.3}) to ({:.3}, {:.3}) does not fit",
            ctx.library.layer_name(layer),
            head.location.x,
            head.location.y,
            tail.location.x,
            tail.location.y
        ),
    );
    let loose = |spec: EndSpec| EndSpec { extended: false, ..spec };
    ctx.graph.add_arc(None, None, 0.0, loose(head), loose(tail));
    false
}

/// Reconnect source arcs held back at ingestion to the ports at their ends.
/// A typed arc end with no port there gets a new pin; an untyped connector
/// needs ports at both ends.
pub fn reinsert_routing(ctx: &mut ExtractionContext) -> Result<usize> {
    let held = std::mem::take(&mut ctx.held_arcs);
    log::info!("Reinserting {} arcs", held.len());
    let layers = ctx.library.canonical_layers();
    let mut made = 0;
    for held_arc in held {
        ctx.check_cancelled()?;
        let arc = &held_arc.arc;
        let ends = match held_arc.layer {
            Some(layer) => Some((
                ctx.pin_at(layer, arc.head.location),
                ctx.pin_at(layer, arc.tail.location),
            )),
            None => {
                let find = |at: &Point| layers.iter().find_map(|l| ctx.graph.port_at(*l, at));
                find(&arc.head.location).zip(find(&arc.tail.location))
            }
        };
        let Some((head, tail)) = ends else {
            ctx.issues.error(
                IssueKind::ConnectionFailure,
                held_arc.layer,
                BBox::from_points(&[arc.head.location, arc.tail.location]),
                format!("no port at an end of connector {}", arc.name),
            );
            continue;
        };
        let spec = |port, end: &layex_core::ArcEnd| EndSpec {
            port,
            location: end.location,
            extended: end.extended,
        };
        ctx.graph.add_arc(
            arc.proto.as_deref(),
            held_arc.layer,
            arc.width,
            spec(head, &arc.head),
            spec(tail, &arc.tail),
        );
        made += 1;
    }
    Ok(made)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::context::{CancelToken, WellPresence};
    use crate::templates::TemplateLibrary;
    use layex_core::{Layer, LayerFunction, Technology, WireProto};

    fn library() -> TemplateLibrary {
        let mut tech = Technology::new("t");
        tech.layers.add_layer(Layer::new(1, "metal1", LayerFunction::Metal(1)));
        tech.wires.push(WireProto {
            name: "m1".into(),
            layer: 1,
            default_width: 3.0,
            pin: "m1pin".into(),
        });
        TemplateLibrary::build(&tech, false).unwrap()
    }

    fn loaded<'a>(lib: &'a TemplateLibrary, config: &'a ExtractConfig, boxes: &[BBox]) -> ExtractionContext<'a> {
        let mut ctx = ExtractionContext::new("top", lib, config, WellPresence::default(), CancelToken::new());
        for b in boxes {
            ctx.working.add_bbox(1, b);
            ctx.original.add_bbox(1, b);
        }
        ctx.snapshot_initial();
        ctx
    }

    #[test]
    fn test_bar_becomes_extended_wire() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(&lib, &config, &[BBox::from_corners(0.0, 0.0, 10.0, 2.0)]);
        assert_eq!(extract_wires(&mut ctx).unwrap(), 1);
        let arc = &ctx.graph.arcs()[0].arc;
        assert_eq!(arc.proto.as_deref(), Some("m1"));
        assert!((arc.width - 2.0).abs() < 1e-9);
        assert!(arc.head.location.approx_eq(&Point::new(1.0, 1.0), 1e-9));
        assert!(arc.tail.location.approx_eq(&Point::new(9.0, 1.0), 1e-9));
        assert!(arc.head.extended && arc.tail.extended);
        assert!(ctx.working.area(1) < 1e-6);
        assert!(ctx.ledger()[0].is_balanced(1e-6));
    }

    #[test]
    fn test_l_shares_hub_pin() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(
            &lib,
            &config,
            &[
                BBox::from_corners(0.0, 0.0, 10.0, 2.0),
                BBox::from_corners(0.0, 0.0, 2.0, 10.0),
            ],
        );
        assert_eq!(extract_wires(&mut ctx).unwrap(), 2);
        assert_eq!(ctx.graph.nodes().len(), 3);
        let arcs = ctx.graph.arcs();
        assert_eq!(arcs[0].head, arcs[1].head);
        assert!(arcs[0].arc.head.location.approx_eq(&Point::new(1.0, 1.0), 1e-9));
        assert_eq!(ctx.graph.net_of_arc(0), ctx.graph.net_of_arc(1));
        assert!(ctx.working.area(1) < 1e-6);
    }

    #[test]
    fn test_square_pad_becomes_zero_length_wire() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(&lib, &config, &[BBox::from_corners(0.0, 0.0, 2.0, 2.0)]);
        assert_eq!(extract_wires(&mut ctx).unwrap(), 1);
        assert_eq!(ctx.graph.nodes().len(), 1);
        let arc = &ctx.graph.arcs()[0];
        assert_eq!(arc.head, arc.tail);
        assert!(arc.arc.head.location.approx_eq(&Point::new(1.0, 1.0), 1e-9));
        assert!(arc.arc.tail.location.approx_eq(&Point::new(1.0, 1.0), 1e-9));
        assert!(arc.arc.head.extended && arc.arc.tail.extended);
        assert!(ctx.working.area(1) < 1e-6);
        assert!(ctx.ledger()[0].is_balanced(1e-6));
    }

    #[test]
    fn test_span_back_to_one_port_makes_no_pin() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(&lib, &config, &[BBox::from_corners(0.0, 0.0, 10.0, 2.0)]);
        let port = ctx.pin_at(1, Point::new(5.0, 1.0));
        let at = |x| EndPlan {
            port: Some(port),
            location: Point::new(x, 1.0),
            extended: false,
        };
        let wire = lib.wire(1).unwrap();
        assert!(!realize_span(&mut ctx, wire, 2.0, at(1.0), at(9.0)));
        assert_eq!(ctx.graph.nodes().len(), 1);
        assert!(ctx.graph.arcs().is_empty());
    }

    #[test]
    fn test_unfit_span_becomes_connector() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(&lib, &config, &[BBox::from_corners(0.0, 0.0, 4.0, 2.0)]);
        let a = ctx.pin_at(1, Point::new(1.0, 1.0));
        let b = ctx.pin_at(1, Point::new(8.0, 1.0));
        let end = |port, x| EndSpec {
            port,
            location: Point::new(x, 1.0),
            extended: false,
        };
        assert!(!connect(&mut ctx, None, 1, 2.0, end(a, 1.0), end(b, 8.0)));
        assert_eq!(ctx.issues.count(IssueKind::ConnectionFailure), 1);
        let arc = &ctx.graph.arcs()[0];
        assert_eq!(arc.arc.proto, None);
        assert_eq!(arc.arc.width, 0.0);
    }
}
