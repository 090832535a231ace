//! Centerline decomposition of polygon regions.
//!
//! A region is described by the strips between pairs of anti-parallel
//! edges that face each other. Each strip becomes a centerline with a
//! width; the strips are then chosen greedily, longest first, until the
//! region is covered, and lines that cross are stitched at shared hub
//! points. The fit test is supplied by the caller so the same code serves
//! wires (against the original layer) and gates (against the gate area).

use std::fmt;

use layex_core::geometry::segment_outline;
use layex_core::Point;

use crate::config::ExtractConfig;
use crate::geom::{is_axis_aligned, line_intersection, position_along};
use crate::merge::{LayerMerge, Region};
use crate::scale::{snap, Grid};

const TOL: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct Centerline {
    pub start: Point,
    pub end: Point,
    pub width: f64,
    /// The start was moved onto an intersection with another line.
    pub start_hub: bool,
    pub end_hub: bool,
}

impl Centerline {
    pub fn new(start: Point, end: Point, width: f64) -> Self {
        // lower-left end first
        let (start, end) = if (end.x, end.y) < (start.x, start.y) {
            (end, start)
        } else {
            (start, end)
        };
        Self {
            start,
            end,
            width,
            start_hub: false,
            end_hub: false,
        }
    }

    pub fn length(&self) -> f64 {
        self.start.distance_to(&self.end)
    }

    pub fn dir(&self) -> Option<Point> {
        (self.end - self.start).unit()
    }

    pub fn outline(&self, start_ext: f64, end_ext: f64) -> Option<Vec<Point>> {
        segment_outline(self.start, self.end, self.width, start_ext, end_ext)
    }

    /// Outline with hub ends reaching half the width past their point.
    pub fn hub_outline(&self) -> Option<Vec<Point>> {
        let ext = |hub: bool| if hub { self.width / 2.0 } else { 0.0 };
        self.outline(ext(self.start_hub), ext(self.end_hub))
    }
}

/// Why a region produced no centerlines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferral {
    TooManyHoles(usize),
    TooManyVertices(usize),
    NoCenterline,
}

impl fmt::Display for Deferral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferral::TooManyHoles(n) => write!(f, "{n} holes"),
            Deferral::TooManyVertices(n) => write!(f, "{n} vertices"),
            Deferral::NoCenterline => write!(f, "no centerline found"),
        }
    }
}

pub struct Skeletonizer<'f> {
    fits: &'f dyn Fn(&[Point]) -> bool,
    grid: Grid,
    min_area: f64,
    max_holes: usize,
    max_vertices: usize,
}

impl<'f> Skeletonizer<'f> {
    pub fn new(fits: &'f dyn Fn(&[Point]) -> bool, config: &ExtractConfig, grid: Grid) -> Self {
        Self {
            fits,
            grid,
            min_area: config.min_area,
            max_holes: config.max_region_holes,
            max_vertices: config.max_region_vertices,
        }
    }

    pub fn run(&self, region: &Region) -> Result<Vec<Centerline>, Deferral> {
        if region.holes.len() > self.max_holes {
            return Err(Deferral::TooManyHoles(region.holes.len()));
        }
        if region.vertex_count() > self.max_vertices {
            return Err(Deferral::TooManyVertices(region.vertex_count()));
        }
        let candidates = self.decompose(region);
        let chosen = self.select(region, candidates);
        if chosen.is_empty() {
            return Err(Deferral::NoCenterline);
        }
        Ok(self.stitch(merge_colinear(chosen)))
    }

    fn fits(&self, outline: Option<Vec<Point>>) -> bool {
        outline.is_some_and(|o| (self.fits)(&o))
    }

    /// Candidate strips between facing anti-parallel edge pairs.
    fn decompose(&self, region: &Region) -> Vec<Centerline> {
        let mut edges = Vec::new();
        for ring in region.rings() {
            let n = ring.len();
            for i in 0..n {
                edges.push((ring[i], ring[(i + 1) % n]));
            }
        }

        let mut out: Vec<Centerline> = Vec::new();
        for i in 0..edges.len() {
            for j in (i + 1)..edges.len() {
                let (a0, a1) = edges[i];
                let (b0, b1) = edges[j];
                let (Some(da), Some(db)) = ((a1 - a0).unit(), (b1 - b0).unit()) else {
                    continue;
                };
                if da.cross(&db).abs() > TOL || da.dot(&db) >= 0.0 {
                    continue;
                }
                // interior lies left of every edge, so b must be on a's left
                let width = da.cross(&(b0 - a0));
                if width <= TOL {
                    continue;
                }
                let a_range = (0.0_f64, a0.distance_to(&a1));
                let (pb0, pb1) = (position_along(b0, a0, da), position_along(b1, a0, da));
                let b_range = (pb0.min(pb1), pb0.max(pb1));
                let overlap = (a_range.0.max(b_range.0), a_range.1.min(b_range.1));
                if overlap.1 - overlap.0 <= TOL {
                    continue;
                }
                let union = (a_range.0.min(b_range.0), a_range.1.max(b_range.1));
                let base = a0 + da.perp() * (width / 2.0);
                let ranges = [
                    union,
                    (union.0, overlap.1),
                    (overlap.0, union.1),
                    overlap,
                ];
                for (lo, hi) in ranges {
                    let start = base + da * lo;
                    let end = base + da * hi;
                    let line = Centerline::new(
                        Point::new(snap(start.x), snap(start.y)),
                        Point::new(snap(end.x), snap(end.y)),
                        snap(width),
                    );
                    if self.fits(line.outline(0.0, 0.0)) {
                        if !out.iter().any(|l| same_line(l, &line)) {
                            out.push(line);
                        }
                        break;
                    }
                }
            }
        }
        out
    }

    /// Longest (then widest) strips first, each kept only if it covers a
    /// meaningful area of the region not yet covered.
    fn select(&self, region: &Region, mut candidates: Vec<Centerline>) -> Vec<Centerline> {
        candidates.sort_by(|a, b| {
            b.length()
                .total_cmp(&a.length())
                .then(b.width.total_cmp(&a.width))
                .then(a.start.x.total_cmp(&b.start.x))
                .then(a.start.y.total_cmp(&b.start.y))
        });
        let mut remaining = LayerMerge::new();
        remaining.add_region(region);
        let threshold = self.min_area.max(TOL);
        let mut chosen = Vec::new();
        for line in candidates {
            let Some(outline) = line.outline(0.0, 0.0) else {
                continue;
            };
            if remaining.overlap_area(region.layer, &outline) >= threshold {
                remaining.subtract_outline(region.layer, &outline);
                chosen.push(line);
            }
        }
        chosen
    }

    /// Join lines whose extensions meet within the reach of the other
    /// line's half width.
    fn stitch(&self, mut lines: Vec<Centerline>) -> Vec<Centerline> {
        let mut i = 0;
        while i < lines.len() {
            let mut j = i + 1;
            while j < lines.len() {
                if let Some((a, b)) = self.stitch_pair(&lines[i], &lines[j]) {
                    let mut a = a.into_iter();
                    let mut b = b.into_iter();
                    if let Some(first) = a.next() {
                        lines[i] = first;
                    }
                    if let Some(first) = b.next() {
                        lines[j] = first;
                    }
                    lines.extend(a);
                    lines.extend(b);
                }
                j += 1;
            }
            i += 1;
        }
        lines.retain(|l| l.length() > TOL);
        lines
    }

    fn stitch_pair(&self, a: &Centerline, b: &Centerline) -> Option<(Vec<Centerline>, Vec<Centerline>)> {
        let (da, db) = (a.dir()?, b.dir()?);
        let x = line_intersection(a.start, da, b.start, db)?;
        let (ta, tb) = (position_along(x, a.start, da), position_along(x, b.start, db));
        let (reach_a, reach_b) = (b.width / 2.0, a.width / 2.0);
        if ta < -reach_a - TOL || ta > a.length() + reach_a + TOL {
            return None;
        }
        if tb < -reach_b - TOL || tb > b.length() + reach_b + TOL {
            return None;
        }

        // grid-aligned hubs first, the exact intersection last
        let mut hubs = Vec::new();
        if self.grid.is_enabled() && !(is_axis_aligned(da) && is_axis_aligned(db)) {
            let g = &self.grid;
            hubs.push(Point::new(g.align_nearest(x.x), g.align_nearest(x.y)));
            hubs.push(Point::new(g.align_up(x.x), g.align_up(x.y)));
            hubs.push(Point::new(g.align_down(x.x), g.align_down(x.y)));
        }
        hubs.push(Point::new(snap(x.x), snap(x.y)));
        for hub in hubs {
            let na = attach(a, hub, position_along(hub, a.start, da), reach_a);
            let nb = attach(b, hub, position_along(hub, b.start, db), reach_b);
            if na.len() == 1 && nb.len() == 1 && na[0] == *a && nb[0] == *b {
                return None;
            }
            if na.iter().chain(nb.iter()).all(|l| self.fits(l.hub_outline())) {
                return Some((na, nb));
            }
        }
        None
    }
}

/// Move the nearer end of `line` onto `hub`, or split it there when the hub
/// is interior.
fn attach(line: &Centerline, hub: Point, t: f64, reach: f64) -> Vec<Centerline> {
    let len = line.length();
    let near_start = t <= reach + TOL;
    let near_end = t >= len - reach - TOL;
    let use_start = match (near_start, near_end) {
        (true, true) => t <= len / 2.0,
        (true, false) => true,
        (false, true) => false,
        (false, false) => {
            let mut first = line.clone();
            first.end = hub;
            first.end_hub = true;
            let mut second = line.clone();
            second.start = hub;
            second.start_hub = true;
            return vec![first, second];
        }
    };
    let mut moved = line.clone();
    if use_start {
        moved.start = hub;
        moved.start_hub = true;
    } else {
        moved.end = hub;
        moved.end_hub = true;
    }
    vec![moved]
}

fn same_line(a: &Centerline, b: &Centerline) -> bool {
    a.start.approx_eq(&b.start, TOL) && a.end.approx_eq(&b.end, TOL) && (a.width - b.width).abs() <= TOL
}

/// Fuse lines of equal width that lie on one axis and overlap or touch.
pub fn merge_colinear(mut lines: Vec<Centerline>) -> Vec<Centerline> {
    loop {
        let mut merged = None;
        'search: for i in 0..lines.len() {
            for j in (i + 1)..lines.len() {
                if let Some(line) = fuse(&lines[i], &lines[j]) {
                    merged = Some((i, j, line));
                    break 'search;
                }
            }
        }
        match merged {
            Some((i, j, line)) => {
                lines[i] = line;
                lines.remove(j);
            }
            None => return lines,
        }
    }
}

fn fuse(a: &Centerline, b: &Centerline) -> Option<Centerline> {
    if (a.width - b.width).abs() > TOL {
        return None;
    }
    let (da, db) = (a.dir()?, b.dir()?);
    if da.cross(&db).abs() > TOL || da.cross(&(b.start - a.start)).abs() > TOL {
        return None;
    }
    let (t0, t1) = (position_along(b.start, a.start, da), position_along(b.end, a.start, da));
    let (lo, hi) = (t0.min(t1), t0.max(t1));
    if lo > a.length() + TOL || hi < -TOL {
        return None;
    }
    let start = a.start + da * lo.min(0.0);
    let end = a.start + da * hi.max(a.length());
    Some(Centerline::new(start, end, a.width))
}

/// The points of a single open chain formed by the lines, in walking order.
pub fn chain(lines: &[Centerline]) -> Option<Vec<Point>> {
    let same = |a: &Point, b: &Point| a.approx_eq(b, TOL);
    let degree = |p: &Point| {
        lines
            .iter()
            .filter(|l| same(&l.start, p) || same(&l.end, p))
            .count()
    };
    if lines
        .iter()
        .any(|l| degree(&l.start) > 2 || degree(&l.end) > 2)
    {
        return None;
    }
    let first = lines
        .iter()
        .position(|l| degree(&l.start) == 1 || degree(&l.end) == 1)?;
    let line = &lines[first];
    let (a, b) = if degree(&line.start) == 1 {
        (line.start, line.end)
    } else {
        (line.end, line.start)
    };
    let mut used = vec![false; lines.len()];
    used[first] = true;
    let mut points = vec![a, b];
    loop {
        let Some(&cur) = points.last() else {
            break;
        };
        let next = lines
            .iter()
            .enumerate()
            .find(|(i, l)| !used[*i] && (same(&l.start, &cur) || same(&l.end, &cur)));
        match next {
            Some((i, l)) => {
                used[i] = true;
                points.push(if same(&l.start, &cur) { l.end } else { l.start });
            }
            None => break,
        }
    }
    used.iter().all(|u| *u).then_some(points)
}
