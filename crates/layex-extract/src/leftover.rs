//! Leftover geometry.
//!
//! Whatever the recognizers did not claim ends up here. Slivers are
//! discarded, plain rectangles on routable layers still become wires, and
//! the rest is kept as pure-layer polygons so no drawn metal is lost.

use layex_core::{BBox, Point};

use crate::context::ExtractionContext;
use crate::error::Result;
use crate::graph::Feature;
use crate::issue::IssueKind;
use crate::merge::Region;
use crate::scale::snap;
use crate::wires::{realize_span, EndPlan};

pub fn convert_leftovers(ctx: &mut ExtractionContext) -> Result<usize> {
    let layers = ctx.working.layers();
    log::info!("Converting leftover geometry on {} layers", layers.len());
    let mut kept = 0;
    for layer in layers {
        for region in ctx.working.regions(layer) {
            ctx.check_cancelled()?;
            if region.area() < ctx.config.min_area {
                ctx.issues.warning(
                    IssueKind::GeometryAnomaly,
                    Some(layer),
                    Some(region.bbox()),
                    format!(
                        "{} sliver of {:.4} discarded",
                        ctx.library.layer_name(layer),
                        region.area()
                    ),
                );
                let area = ctx.working.subtract_region(&region);
                ctx.graph.claim(Feature::Sliver, layer, area);
                continue;
            }
            if rectangle_wire(ctx, &region) {
                kept += 1;
                continue;
            }
            let id = ctx.graph.add_leftover(region.to_primitive());
            let area = ctx.working.subtract_region(&region);
            ctx.graph.claim(Feature::Leftover(id), layer, area);
            kept += 1;
        }
        // boundary crumbs of earlier subtractions
        let crumbs = ctx.working.area(layer);
        if crumbs > 0.0 {
            log::debug!("dropping {crumbs:.6} of crumbs on layer {layer}");
            ctx.graph.claim(Feature::Sliver, layer, crumbs);
        }
        ctx.working.clear_layer(layer);
    }
    log::info!("Kept {kept} leftover regions");
    Ok(kept)
}

/// A rectangle at least as wide as the layer's wire becomes one wire along
/// its long axis.
fn rectangle_wire(ctx: &mut ExtractionContext, region: &Region) -> bool {
    let library = ctx.library;
    let Some(wire) = library.wire(region.layer) else {
        return false;
    };
    let Some(rect) = region.as_rect() else {
        return false;
    };
    let width = rect.width().min(rect.height());
    if width + layex_core::geometry::EPSILON < wire.default_width {
        return false;
    }
    let (a, b) = long_axis_ends(&rect, width);
    log::debug!("leftover rectangle at {:?} becomes a wire", rect.min);
    realize_span(ctx, wire, width, EndPlan::free(a, true), EndPlan::free(b, true))
}

fn long_axis_ends(rect: &BBox, width: f64) -> (Point, Point) {
    let c = rect.center();
    let half = width / 2.0;
    if rect.width() >= rect.height() {
        (
            Point::new(snap(rect.min.x + half), c.y),
            Point::new(snap(rect.max.x - half), c.y),
        )
    } else {
        (
            Point::new(c.x, snap(rect.min.y + half)),
            Point::new(c.x, snap(rect.max.y - half)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractConfig;
    use crate::context::{CancelToken, WellPresence};
    use crate::templates::TemplateLibrary;
    use layex_core::{GeomPrimitive, Layer, LayerFunction, Technology, WireProto};

    fn library() -> TemplateLibrary {
        let mut tech = Technology::new("t");
        tech.layers.add_layer(Layer::new(1, "metal1", LayerFunction::Metal(1)));
        tech.layers.add_layer(Layer::new(9, "marker", LayerFunction::Other));
        tech.wires.push(WireProto {
            name: "m1".into(),
            layer: 1,
            default_width: 2.0,
            pin: "m1pin".into(),
        });
        TemplateLibrary::build(&tech, false).unwrap()
    }

    fn loaded<'a>(lib: &'a TemplateLibrary, config: &'a ExtractConfig, shapes: &[(u32, BBox)]) -> ExtractionContext<'a> {
        let mut ctx = ExtractionContext::new("top", lib, config, WellPresence::default(), CancelToken::new());
        for (layer, b) in shapes {
            ctx.working.add_bbox(*layer, b);
            ctx.original.add_bbox(*layer, b);
        }
        ctx.snapshot_initial();
        ctx
    }

    #[test]
    fn test_sliver_is_discarded_with_warning() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(&lib, &config, &[(1, BBox::from_corners(0.0, 0.0, 0.05, 0.05))]);
        assert_eq!(convert_leftovers(&mut ctx).unwrap(), 0);
        assert_eq!(ctx.issues.count(IssueKind::GeometryAnomaly), 1);
        assert!(ctx.graph.leftovers().is_empty());
        let ledger = ctx.ledger();
        assert!(ledger[0].is_balanced(1e-6));
        assert!((ledger[0].discarded - 0.0025).abs() < 1e-6);
    }

    #[test]
    fn test_wide_rectangle_becomes_wire() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(&lib, &config, &[(1, BBox::from_corners(0.0, 0.0, 3.0, 8.0))]);
        assert_eq!(convert_leftovers(&mut ctx).unwrap(), 1);
        let arc = &ctx.graph.arcs()[0].arc;
        assert!((arc.width - 3.0).abs() < 1e-9);
        assert!(arc.head.location.approx_eq(&Point::new(1.5, 1.5), 1e-9));
        assert!(arc.tail.location.approx_eq(&Point::new(1.5, 6.5), 1e-9));
        assert!(ctx.ledger()[0].is_balanced(1e-6));
    }

    #[test]
    fn test_square_becomes_one_pin_wire() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(&lib, &config, &[(1, BBox::from_corners(0.0, 0.0, 3.0, 3.0))]);
        assert_eq!(convert_leftovers(&mut ctx).unwrap(), 1);
        assert_eq!(ctx.graph.nodes().len(), 1);
        let arc = &ctx.graph.arcs()[0];
        assert_eq!(arc.head, arc.tail);
        assert!(arc.arc.head.location.approx_eq(&Point::new(1.5, 1.5), 1e-9));
        assert!(ctx.graph.leftovers().is_empty());
        assert!(ctx.working.is_empty());
        assert!(ctx.ledger()[0].is_balanced(1e-6));
    }

    #[test]
    fn test_unroutable_shape_is_kept_as_geometry() {
        let lib = library();
        let config = ExtractConfig::default();
        let mut ctx = loaded(&lib, &config, &[(9, BBox::from_corners(0.0, 0.0, 5.0, 5.0))]);
        assert_eq!(convert_leftovers(&mut ctx).unwrap(), 1);
        assert!(matches!(ctx.graph.leftovers()[0], GeomPrimitive::Rect(_)));
        assert!(ctx.working.is_empty());
        let ledger = ctx.ledger();
        assert!((ledger[0].claimed - 25.0).abs() < 1e-6);
        assert!(ledger[0].is_balanced(1e-6));
    }
}
