//! Transistor recognition.
//!
//! Gates are where poly crosses active in the original geometry. A
//! rectangular gate is oriented by which sides the poly and active tabs
//! leave from; any other gate shape is skeletonized against the gate area
//! itself and becomes an angled or serpentine transistor. Templates of a
//! poly/active pair are tried in technology order.

use layex_core::{BBox, LayerId, NodeInst, Point};

use crate::centerline::{chain, Centerline, Skeletonizer};
use crate::context::ExtractionContext;
use crate::error::Result;
use crate::geom::{angle_degrees, rotate_about};
use crate::issue::IssueKind;
use crate::merge::{LayerMerge, Region};
use crate::templates::{DeviceKind, TransistorTemplate};

/// Step past a gate edge: one scaled unit.
const NUDGE: f64 = 0.001;

/// Scratch layer the gate area is built on.
const GATE: LayerId = LayerId::MAX;

/// Direction the poly runs through a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tabs {
    /// Poly leaves left and right, active top and bottom.
    Horizontal,
    Vertical,
}

pub fn extract_transistors(ctx: &mut ExtractionContext) -> Result<usize> {
    let library = ctx.library;
    let mut pairs: Vec<(LayerId, LayerId)> = Vec::new();
    for t in library.transistors() {
        if !pairs.contains(&(t.poly, t.active)) {
            pairs.push((t.poly, t.active));
        }
    }
    log::info!("Extracting transistors: {} poly/active pairs", pairs.len());

    let mut placed = 0;
    for (poly, active) in pairs {
        let templates: Vec<&TransistorTemplate> = library
            .transistors()
            .iter()
            .filter(|t| t.poly == poly && t.active == active)
            .collect();
        let gates = ctx.original.intersect(&[poly, active], GATE);
        for region in gates.regions(GATE) {
            ctx.check_cancelled()?;
            if region.area() < ctx.config.min_area || !unclaimed(ctx, &region, poly, active) {
                continue;
            }
            if recognize(ctx, &region, poly, active, &templates) {
                placed += 1;
            }
        }
    }
    log::info!("Placed {placed} transistors");
    Ok(placed)
}

/// Gate area still present on both layers of the working merge.
fn unclaimed(ctx: &ExtractionContext, region: &Region, poly: LayerId, active: LayerId) -> bool {
    let need = region.area() - ctx.config.min_area;
    ctx.working.overlap_area(poly, &region.outline) >= need && ctx.working.overlap_area(active, &region.outline) >= need
}

fn recognize(
    ctx: &mut ExtractionContext,
    region: &Region,
    poly: LayerId,
    active: LayerId,
    templates: &[&TransistorTemplate],
) -> bool {
    let bbox = region.bbox();
    if let Some(gate) = region.as_rect() {
        if let Some(tabs) = rect_tabs(&ctx.original, &gate, poly, active) {
            let (rotation, w, h) = match tabs {
                Tabs::Horizontal => (0.0, gate.width(), gate.height()),
                Tabs::Vertical => (90.0, gate.height(), gate.width()),
            };
            return place(ctx, templates, &bbox, |t| {
                Some(oriented_node(t, gate.center(), w, h, rotation))
            });
        }
    }

    let mut gate_merge = LayerMerge::new();
    gate_merge.add_region(region);
    let fits = |o: &[Point]| gate_merge.contains(region.layer, o);
    let lines = match Skeletonizer::new(&fits, ctx.config, ctx.grid).run(region) {
        Ok(lines) => lines,
        Err(deferral) => {
            anomaly(ctx, poly, bbox, format!("gate cannot be decomposed: {deferral}"));
            return false;
        }
    };

    if let [line] = lines.as_slice() {
        let Some(dir) = line.dir() else {
            anomaly(ctx, poly, bbox, "degenerate gate".to_string());
            return false;
        };
        let past = line.end + dir * NUDGE;
        let center = line.start.midpoint(&line.end);
        let (rotation, w, h) = if ctx.original.contains_point(poly, &past) {
            (angle_degrees(dir), line.length(), line.width)
        } else {
            (angle_degrees(dir) + 90.0, line.width, line.length())
        };
        return place(ctx, templates, &bbox, |t| Some(oriented_node(t, center, w, h, rotation)));
    }

    serpentine(ctx, &lines, poly, templates, &bbox)
}

/// Which way the tabs of a rectangular gate leave it, if unambiguous.
fn rect_tabs(original: &LayerMerge, gate: &BBox, poly: LayerId, active: LayerId) -> Option<Tabs> {
    let c = gate.center();
    let left = Point::new(gate.min.x - NUDGE, c.y);
    let right = Point::new(gate.max.x + NUDGE, c.y);
    let bottom = Point::new(c.x, gate.min.y - NUDGE);
    let top = Point::new(c.x, gate.max.y + NUDGE);
    let on = |layer: LayerId, a: &Point, b: &Point| original.contains_point(layer, a) && original.contains_point(layer, b);
    if on(poly, &left, &right) && on(active, &bottom, &top) {
        Some(Tabs::Horizontal)
    } else if on(poly, &bottom, &top) && on(active, &left, &right) {
        Some(Tabs::Vertical)
    } else {
        None
    }
}

/// Node whose size offset, rotated about the gate, surrounds a gate of
/// `w` by `h` in node coordinates.
fn oriented_node(t: &TransistorTemplate, gate_center: Point, w: f64, h: f64, rotation: f64) -> NodeInst {
    let so = t.size_offset;
    let shift = Point::new((so.right - so.left) / 2.0, (so.top - so.bottom) / 2.0);
    let center = rotate_about(gate_center + shift, gate_center, rotation);
    NodeInst::new(&t.proto, center, w + so.horizontal(), h + so.vertical()).with_rotation(rotation)
}

fn serpentine(
    ctx: &mut ExtractionContext,
    lines: &[Centerline],
    poly: LayerId,
    templates: &[&TransistorTemplate],
    bbox: &BBox,
) -> bool {
    let width = lines[0].width;
    if lines.iter().any(|l| (l.width - width).abs() > NUDGE) {
        anomaly(ctx, poly, *bbox, "serpentine gate of uneven length".to_string());
        return false;
    }
    let Some(trace) = chain(lines) else {
        anomaly(ctx, poly, *bbox, "gate does not form one open chain".to_string());
        return false;
    };
    let (first, second) = (trace[0], trace[1]);
    let along_poly = (first - second)
        .unit()
        .is_some_and(|d| ctx.original.contains_point(poly, &(first + d * NUDGE)));
    if !along_poly {
        anomaly(ctx, poly, *bbox, "serpentine gate does not follow the poly".to_string());
        return false;
    }
    let length: f64 = trace.windows(2).map(|w| w[0].distance_to(&w[1])).sum();
    let Some(trace_box) = BBox::from_points(&trace) else {
        return false;
    };
    place(ctx, templates, bbox, |t| {
        if !t.serpentine {
            return None;
        }
        let so = t.size_offset;
        let mut node = NodeInst::new(
            &t.proto,
            trace_box.center(),
            length + so.horizontal(),
            width + so.vertical(),
        );
        node.trace = Some(trace.clone());
        Some(node)
    })
}

/// Commit the first template whose node fits the original geometry.
fn place<F>(ctx: &mut ExtractionContext, templates: &[&TransistorTemplate], bbox: &BBox, node_for: F) -> bool
where
    F: Fn(&TransistorTemplate) -> Option<NodeInst>,
{
    let mut blocking = None;
    for t in templates {
        let Some(node) = node_for(t) else {
            continue;
        };
        match ctx.blocking_layer(&node) {
            None => {
                ctx.commit_device(node, DeviceKind::Transistor(t.polarity));
                return true;
            }
            Some(layer) => {
                log::debug!("{} blocked by {}", t.proto, ctx.library.layer_name(layer));
                blocking.get_or_insert(layer);
            }
        }
    }
    let reason = match blocking {
        Some(l) => format!("blocked by {}", ctx.library.layer_name(l)),
        None => "no serpentine template".to_string(),
    };
    let c = bbox.center();
    ctx.issues.error(
        IssueKind::FitFailure,
        blocking,
        Some(*bbox),
        format!("no transistor fits gate at ({:.3}, {:.3}): {reason}", c.x, c.y),
    );
    false
}

fn anomaly(ctx: &mut ExtractionContext, layer: LayerId, bbox: BBox, message: String) {
    ctx.issues.warning(IssueKind::GeometryAnomaly, Some(layer), Some(bbox), message);
}
