//! Via and contact recognition.
//!
//! Cuts are visited per cut layer from the top of the layout down. Each seed
//! tries the via templates of its cut layer, largest first: first as the
//! seed of a multi-cut array, then as a single-cut contact. A cut no
//! template fits is rejected and left for leftover conversion.

use layex_core::cell::CutAlignment;
use layex_core::{BBox, LayerId, MultiCut, NodeInst};

use crate::context::ExtractionContext;
use crate::cut_index::{Cut, CutCluster, CutId};
use crate::error::Result;
use crate::graph::Feature;
use crate::issue::IssueKind;
use crate::merge::LayerMerge;
use crate::scale::from_units;
use crate::templates::{cut_boxes, cut_counts, DeviceKind, ViaTemplate};

/// Tolerance when matching computed cut positions to drawn cuts.
const CUT_MATCH: f64 = 0.001;

/// Doublings before node growth gives up looking for an upper bound.
const MAX_GROWTH_DOUBLINGS: u32 = 24;

const ALIGNMENTS: [CutAlignment; 3] = [CutAlignment::Centered, CutAlignment::Spread, CutAlignment::Corner];

/// A via placement ready to commit.
struct Placement {
    bounds: BBox,
    alignment: Option<CutAlignment>,
    cuts: Vec<CutId>,
}

pub fn extract_vias(ctx: &mut ExtractionContext) -> Result<usize> {
    log::info!("Extracting vias: {} cuts", ctx.cuts.pending_count());
    let mut placed = 0;
    for layer in ctx.cuts.layers() {
        while let Some(seed) = ctx.cuts.next_pending(layer) {
            ctx.check_cancelled()?;
            if extract_seed(ctx, seed) {
                placed += 1;
            }
        }
    }
    log::info!(
        "Placed {} vias, {} cuts unextracted",
        placed,
        ctx.cuts.unextracted().len()
    );
    Ok(placed)
}

fn extract_seed(ctx: &mut ExtractionContext, seed: CutId) -> bool {
    let Some(cut) = ctx.cuts.get(seed).cloned() else {
        return false;
    };
    if !cut.manhattan {
        ctx.issues.warning(
            IssueKind::GeometryAnomaly,
            Some(cut.layer),
            Some(cut.bbox),
            format!("non-Manhattan cut on {}", ctx.library.layer_name(cut.layer)),
        );
        ctx.cuts.reject(seed);
        return false;
    }

    let center = cut.center();
    let library = ctx.library;
    let mut blocking = None;
    for template in library.vias().iter().filter(|t| t.cut_layer == cut.layer) {
        let missing = template
            .layers
            .iter()
            .find(|r| ctx.enforced(r.layer) && !ctx.original.contains_point(r.layer, &center));
        if let Some(rule) = missing {
            blocking.get_or_insert(rule.layer);
            continue;
        }
        let attempt = match &template.multicut {
            Some(rule) => place_multicut(ctx, &cut, template, rule).or_else(|_| place_single(ctx, &cut, template)),
            None => place_single(ctx, &cut, template),
        };
        match attempt {
            Ok(placement) => {
                commit(ctx, template, placement);
                return true;
            }
            Err(layer) => {
                if let Some(l) = layer {
                    blocking.get_or_insert(l);
                }
            }
        }
    }

    let reason = match blocking {
        Some(l) => format!("blocked by {}", ctx.library.layer_name(l)),
        None => "no template for this cut layer".to_string(),
    };
    ctx.issues.error(
        IssueKind::FitFailure,
        blocking.or(Some(cut.layer)),
        Some(cut.bbox),
        format!(
            "no contact fits cut at ({:.3}, {:.3}): {}",
            center.x, center.y, reason
        ),
    );
    ctx.cuts.reject(seed);
    false
}

/// Layer rules of a template hold for node bounds.
fn layers_fit(original: &LayerMerge, template: &ViaTemplate, bounds: &BBox, enforced: &dyn Fn(LayerId) -> bool) -> bool {
    template
        .layers
        .iter()
        .filter(|r| enforced(r.layer))
        .all(|r| original.contains_bbox(r.layer, &r.inset.apply(bounds)))
}

fn place_multicut(
    ctx: &ExtractionContext,
    seed: &Cut,
    template: &ViaTemplate,
    rule: &MultiCut,
) -> std::result::Result<Placement, Option<LayerId>> {
    let (w, h) = (seed.bbox.width(), seed.bbox.height());
    if (w - rule.cut_width).abs() > CUT_MATCH || (h - rule.cut_height).abs() > CUT_MATCH {
        return Err(None);
    }
    let enforced = |l: LayerId| ctx.enforced(l);
    let limit = rule.cut_width.max(rule.cut_height) + rule.spacing.max(rule.array_spacing);
    let cluster = ctx
        .cuts
        .grow_cluster(seed.id, limit, |b| {
            layers_fit(&ctx.original, template, &b.expand(rule.indent, rule.indent), &enforced)
        })
        .ok_or(None)?;
    if cluster.cuts.len() < 2 {
        return Err(None);
    }

    let initial = cluster.bbox.expand(rule.indent, rule.indent);
    let holds = |b: &BBox| {
        let (nx, ny, _) = cut_counts(rule, b);
        (nx, ny) == (cluster.cols, cluster.rows) && layers_fit(&ctx.original, template, b, &enforced)
    };
    if !holds(&initial) {
        return Err(None);
    }
    let grown = grow_axis(ctx, initial, true, &holds);
    let grown = grow_axis(ctx, grown, false, &holds);
    log::debug!(
        "{}x{} cut array at ({:.3}, {:.3}) grown to {:.3}x{:.3}",
        cluster.cols,
        cluster.rows,
        grown.center().x,
        grown.center().y,
        grown.width(),
        grown.height()
    );

    if ctx.config.approximate_multicut {
        return Ok(Placement {
            bounds: grown,
            alignment: Some(CutAlignment::Centered),
            cuts: cluster.cuts,
        });
    }
    let actual = cluster_boxes(ctx, &cluster);
    for bounds in [grown, initial] {
        for alignment in ALIGNMENTS {
            if cuts_match(&cut_boxes(rule, &bounds, alignment), &actual) {
                return Ok(Placement {
                    bounds,
                    alignment: Some(alignment),
                    cuts: cluster.cuts,
                });
            }
        }
    }
    log::debug!("cut array at seed {} matches no alignment", seed.id);
    Err(None)
}

/// Grow a box symmetrically along one axis in whole grid steps while
/// `holds` accepts it: doubling to find a bound, then bisecting.
fn grow_axis(ctx: &ExtractionContext, start: BBox, horizontal: bool, holds: &dyn Fn(&BBox) -> bool) -> BBox {
    let step = ctx.grid.step();
    let at = |k: i64| {
        let d = from_units(k * step);
        if horizontal {
            start.expand(d, 0.0)
        } else {
            start.expand(0.0, d)
        }
    };
    let mut good = 0i64;
    let mut bad = None;
    let mut k = 1i64;
    for _ in 0..MAX_GROWTH_DOUBLINGS {
        if holds(&at(k)) {
            good = k;
            k *= 2;
        } else {
            bad = Some(k);
            break;
        }
    }
    if let Some(mut hi) = bad {
        let mut lo = good;
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if holds(&at(mid)) {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        good = lo;
    }
    at(good)
}

fn cluster_boxes(ctx: &ExtractionContext, cluster: &CutCluster) -> Vec<BBox> {
    cluster
        .cuts
        .iter()
        .filter_map(|id| ctx.cuts.get(*id).map(|c| c.bbox))
        .collect()
}

fn cuts_match(expected: &[BBox], actual: &[BBox]) -> bool {
    expected.len() == actual.len()
        && expected.iter().all(|e| {
            actual
                .iter()
                .any(|a| a.min.approx_eq(&e.min, CUT_MATCH) && a.max.approx_eq(&e.max, CUT_MATCH))
        })
}

fn place_single(
    ctx: &ExtractionContext,
    cut: &Cut,
    template: &ViaTemplate,
) -> std::result::Result<Placement, Option<LayerId>> {
    let (cw, ch) = template.cut_size();
    if (cut.bbox.width() - cw).abs() > CUT_MATCH || (cut.bbox.height() - ch).abs() > CUT_MATCH {
        return Err(None);
    }
    let bounds = template.bounds_around_cut(&cut.bbox);
    let blocking = template
        .layers
        .iter()
        .find(|r| ctx.enforced(r.layer) && !ctx.original.contains_bbox(r.layer, &r.inset.apply(&bounds)));
    match blocking {
        Some(rule) => Err(Some(rule.layer)),
        None => Ok(Placement {
            bounds,
            alignment: None,
            cuts: vec![cut.id],
        }),
    }
}

fn commit(ctx: &mut ExtractionContext, template: &ViaTemplate, placement: Placement) {
    let mut node = NodeInst::new(
        &template.proto,
        placement.bounds.center(),
        placement.bounds.width(),
        placement.bounds.height(),
    );
    node.cut_alignment = placement.alignment;
    let id = ctx.commit_device(node, DeviceKind::Via);
    for cut_id in placement.cuts {
        if let Some(cut) = ctx.cuts.get(cut_id).cloned() {
            ctx.claim_outline(Feature::Node(id), cut.layer, &cut.outline);
        }
        ctx.cuts.remove(cut_id);
    }
}
