//! Export restoration.

use layex_core::{BBox, Cell, Export, LayerId, PortAttachment};

use crate::context::ExtractionContext;
use crate::error::Result;
use crate::graph::{PortRef, SpatialQuery};
use crate::issue::IssueKind;

/// Re-attach every export of `source` to a port of the extracted cell.
pub fn restore_exports(ctx: &mut ExtractionContext, source: &Cell) -> Result<usize> {
    log::info!("Restoring {} exports", source.exports.len());
    let mut restored = 0;
    for export in &source.exports {
        ctx.check_cancelled()?;
        let layer = ctx.library.canonical(export.layer_id);
        let Some(bbox) = export.shape.bbox() else {
            continue;
        };
        let Some(port) = attach_point(ctx, layer, &bbox) else {
            ctx.issues.error(
                IssueKind::StructuralFailure,
                Some(layer),
                Some(bbox),
                format!("export {} has nothing to attach to", export.name),
            );
            continue;
        };
        let name = unique_name(ctx, &export.name);
        if name != export.name {
            log::info!("Export {} renamed to {name}", export.name);
        }
        ctx.graph.add_export(Export {
            name,
            layer_id: layer,
            shape: export.shape.clone().with_layer(layer),
            direction: export.direction,
            attachment: Some(PortAttachment {
                node: port.node,
                port: ctx.graph.port_name(port),
            }),
        });
        restored += 1;
    }
    Ok(restored)
}

/// The port at the shape center, else the nearest port touching the shape,
/// else a new pin when the layer carries wires.
fn attach_point(ctx: &mut ExtractionContext, layer: LayerId, bbox: &BBox) -> Option<PortRef> {
    let center = bbox.center();
    if let Some(port) = ctx.graph.port_at(layer, &center) {
        return Some(port);
    }
    let nearest = ctx
        .graph
        .ports_touching(layer, bbox)
        .into_iter()
        .filter_map(|r| Some((ctx.graph.port(r)?.center().distance_to(&center), r)))
        .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)))
        .map(|(_, r)| r);
    if nearest.is_some() {
        return nearest;
    }
    ctx.library
        .wire(layer)
        .is_some()
        .then(|| ctx.pin_at(layer, center))
}

fn unique_name(ctx: &ExtractionContext, name: &str) -> String {
    if !ctx.graph.has_export(name) {
        return name.to_string();
    }
    (1..)
        .map(|n| format!("{name}_{n}"))
        .find(|candidate| !ctx.graph.has_export(candidate))
        .unwrap_or_else(|| name.to_string())
}
