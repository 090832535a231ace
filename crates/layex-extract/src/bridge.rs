//! Bridging connections.
//!
//! Routable geometry the skeletonizer left behind is often a short stub
//! hanging off one object or a patch joining two. Such a region is turned
//! into wires by looking at the nets touching it.

use std::collections::BTreeMap;

use layex_core::{BBox, LayerId, Point};

use crate::context::ExtractionContext;
use crate::error::Result;
use crate::graph::{EndSpec, PortRef, SpatialQuery};
use crate::merge::Region;
use crate::scale::snap;
use crate::templates::WireTemplate;
use crate::wires::{connect, realize_span, EndPlan};

pub fn extract_bridges(ctx: &mut ExtractionContext) -> Result<usize> {
    let library = ctx.library;
    let mut made = 0;
    log::info!("Extracting bridging connections");
    for wire in library.wires() {
        for region in ctx.working.regions(wire.layer) {
            ctx.check_cancelled()?;
            if region.area() < ctx.config.min_area {
                continue;
            }
            let bbox = region.bbox();
            if region.as_rect().is_none() && !ctx.original.contains_bbox(wire.layer, &bbox) {
                continue;
            }
            let nets = touching_nets(ctx, wire.layer, &bbox);
            let bridged = match nets.as_slice() {
                [one] => extend(ctx, wire, &region, *one),
                [a, b] => join(ctx, wire, &region, *a, *b),
                _ => false,
            };
            if bridged {
                made += 1;
            }
        }
    }
    log::info!("Created {made} bridging connections");
    Ok(made)
}

/// One representative port per distinct net touching the box.
fn touching_nets(ctx: &ExtractionContext, layer: LayerId, bbox: &BBox) -> Vec<PortRef> {
    let center = bbox.center();
    let mut nets: BTreeMap<usize, (f64, PortRef)> = BTreeMap::new();
    let mut offer = |port: PortRef| {
        let (Some(net), Some(p)) = (ctx.graph.net_of(port), ctx.graph.port(port)) else {
            return;
        };
        let d = p.center().distance_to(&center);
        let entry = nets.entry(net).or_insert((d, port));
        if d < entry.0 {
            *entry = (d, port);
        }
    };
    for port in ctx.graph.ports_touching(layer, bbox) {
        offer(port);
    }
    for arc in ctx.graph.arcs_touching(layer, bbox) {
        if let Some(a) = ctx.graph.arc(arc) {
            offer(a.head);
            offer(a.tail);
        }
    }
    nets.into_values().map(|(_, port)| port).collect()
}

/// Cover the region with a straight wire from the port to the far side.
fn extend(ctx: &mut ExtractionContext, wire: &WireTemplate, region: &Region, port: PortRef) -> bool {
    let Some(p) = ctx.graph.port(port).cloned() else {
        return false;
    };
    let bbox = region.bbox();
    let c = p.center();
    let mid = bbox.center();
    let in_row = p.bbox.min.y <= mid.y && mid.y <= p.bbox.max.y;
    let in_column = p.bbox.min.x <= mid.x && mid.x <= p.bbox.max.x;
    let (start, far, width) = if in_row && bbox.width() >= bbox.height() {
        let far_x = if (bbox.max.x - c.x).abs() >= (c.x - bbox.min.x).abs() {
            bbox.max.x
        } else {
            bbox.min.x
        };
        (Point::new(c.x, mid.y), Point::new(far_x, mid.y), bbox.height())
    } else if in_column {
        let far_y = if (bbox.max.y - c.y).abs() >= (c.y - bbox.min.y).abs() {
            bbox.max.y
        } else {
            bbox.min.y
        };
        (Point::new(mid.x, c.y), Point::new(mid.x, far_y), bbox.width())
    } else {
        return false;
    };
    let Some(dir) = (far - start).unit() else {
        return false;
    };
    let reach = start.distance_to(&far);
    let (location, extended) = if reach < width {
        (far, false)
    } else {
        (far - dir * (width / 2.0), true)
    };
    let location = Point::new(snap(location.x), snap(location.y));
    let head = EndPlan {
        port: Some(port),
        location: start,
        extended: false,
    };
    log::debug!("extending net at {:?} across {:?}", start, bbox.min);
    realize_span(ctx, wire, width, head, EndPlan::free(location, extended))
}

/// Join two nets through the region, straight if their ports line up and
/// through a corner pin otherwise.
fn join(ctx: &mut ExtractionContext, wire: &WireTemplate, region: &Region, a: PortRef, b: PortRef) -> bool {
    let (Some(pa), Some(pb)) = (ctx.graph.port(a).cloned(), ctx.graph.port(b).cloned()) else {
        return false;
    };
    let bbox = region.bbox();
    let width = bbox.width().min(bbox.height());
    let (ca, cb) = (pa.center(), pb.center());
    let end = |port, location: Point| EndSpec {
        port,
        location,
        extended: false,
    };

    let x_lo = pa.bbox.min.x.max(pb.bbox.min.x);
    let x_hi = pa.bbox.max.x.min(pb.bbox.max.x);
    if x_lo <= x_hi {
        let x = snap((x_lo + x_hi) / 2.0);
        return connect(ctx, Some(wire), wire.layer, width, end(a, Point::new(x, ca.y)), end(b, Point::new(x, cb.y)));
    }
    let y_lo = pa.bbox.min.y.max(pb.bbox.min.y);
    let y_hi = pa.bbox.max.y.min(pb.bbox.max.y);
    if y_lo <= y_hi {
        let y = snap((y_lo + y_hi) / 2.0);
        return connect(ctx, Some(wire), wire.layer, width, end(a, Point::new(ca.x, y)), end(b, Point::new(cb.x, y)));
    }

    let corners = [Point::new(ca.x, cb.y), Point::new(cb.x, ca.y)];
    let Some(corner) = corners
        .into_iter()
        .find(|p| ctx.working.contains_point(wire.layer, p))
    else {
        log::debug!("no corner inside region at {:?} to join two nets", bbox.min);
        return false;
    };
    let pin = ctx.pin_at(wire.layer, corner);
    let bend = EndSpec {
        port: pin,
        location: corner,
        extended: true,
    };
    let first = connect(ctx, Some(wire), wire.layer, width, end(a, ca), bend);
    let second = connect(ctx, Some(wire), wire.layer, width, bend, end(b, cb));
    first && second
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::context::{CancelToken, WellPresence};
    use crate::graph::NodeKind;
    use crate::issue::IssueKind;
    use crate::templates::{DeviceKind, PlacedPort, TemplateLibrary};
    use layex_core::{Layer, LayerFunction, NodeInst, Technology, WireProto};

    fn library() -> TemplateLibrary {
        let mut tech = Technology::new("t");
        tech.layers.add_layer(Layer::new(1, "metal1", LayerFunction::Metal(1)));
        tech.wires.push(WireProto {
            name: "m1".into(),
            layer: 1,
            default_width: 2.0,
            pin: "m1pin".into(),
        });
        TemplateLibrary::build(&tech, false).unwrap()
    }

    /// A square device on metal1 whose port is its whole area.
    fn pad(ctx: &mut ExtractionContext, bbox: BBox) -> PortRef {
        let node = ctx.graph.add_node(
            NodeInst::new("pad", bbox.center(), bbox.width(), bbox.height()),
            NodeKind::Device(DeviceKind::Via),
            vec![PlacedPort {
                name: "p".into(),
                layers: vec![1],
                bbox,
                topology: 0,
            }],
            &[(1, bbox)],
        );
        ctx.original.add_bbox(1, &bbox);
        PortRef { node, port: 0 }
    }

    #[test]
    fn test_stub_extends_single_net() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = ExtractionContext::new("top", &lib, &config, WellPresence::default(), CancelToken::new());
        let port = pad(&mut ctx, BBox::from_corners(0.0, 0.0, 4.0, 4.0));
        let stub = BBox::from_corners(4.0, 1.0, 10.0, 3.0);
        ctx.working.add_bbox(1, &stub);
        ctx.original.add_bbox(1, &stub);

        assert_eq!(extract_bridges(&mut ctx).unwrap(), 1);
        let arc = &ctx.graph.arcs()[0];
        assert_eq!(arc.head, port);
        assert!(arc.arc.head.location.approx_eq(&Point::new(2.0, 2.0), 1e-9));
        assert!(arc.arc.tail.location.approx_eq(&Point::new(9.0, 2.0), 1e-9));
        assert!(ctx.working.area(1) < 1e-6);
    }

    #[test]
    fn test_patch_joins_aligned_nets() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = ExtractionContext::new("top", &lib, &config, WellPresence::default(), CancelToken::new());
        let a = pad(&mut ctx, BBox::from_corners(0.0, 0.0, 4.0, 4.0));
        let b = pad(&mut ctx, BBox::from_corners(8.0, 0.0, 12.0, 4.0));
        let patch = BBox::from_corners(4.0, 1.0, 8.0, 3.0);
        ctx.working.add_bbox(1, &patch);
        ctx.original.add_bbox(1, &patch);

        assert_eq!(extract_bridges(&mut ctx).unwrap(), 1);
        assert_eq!(ctx.graph.net_of(a), ctx.graph.net_of(b));
        assert_eq!(ctx.issues.count(IssueKind::ConnectionFailure), 0);
    }
}
