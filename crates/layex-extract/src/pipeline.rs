//! Pass orchestration and hierarchical conversion.
//!
//! Each cell runs the passes in a fixed order over one
//! [`ExtractionContext`]:
//!
//! ingest, vias, transistors, wires (or original routing), bridges,
//! leftovers, exports, stitching.
//!
//! In recursive mode the subcells are converted bottom-up first and every
//! conversion is cached by source cell id, so a subcell placed many times
//! is converted once.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use layex_core::{Cell, CellId, LayerFunction, LayoutDatabase};

use crate::bridge::extract_bridges;
use crate::config::{ExtractConfig, RoutingMode};
use crate::context::{CancelToken, ExtractionContext, WellPresence};
use crate::error::{ExtractError, Result};
use crate::exports::restore_exports;
use crate::ingest::{ingest, IngestPlan};
use crate::issue::ExtractionReport;
use crate::leftover::convert_leftovers;
use crate::templates::TemplateLibrary;
use crate::transistor::extract_transistors;
use crate::via::extract_vias;
use crate::wires::{extract_wires, reinsert_routing};

/// Final pass over an extracted cell, run after exports are restored.
///
/// Routing legalization lives outside the engine; plugging it in here lets
/// it see the finished graph before the cell is written.
pub trait Stitcher {
    fn stitch(&self, ctx: &mut ExtractionContext) -> Result<()>;
}

/// Leaves the extracted cell as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStitch;

impl Stitcher for NoStitch {
    fn stitch(&self, _ctx: &mut ExtractionContext) -> Result<()> {
        Ok(())
    }
}

pub struct Extractor {
    config: ExtractConfig,
    flatten: Option<Regex>,
    cancel: CancelToken,
    stitcher: Box<dyn Stitcher>,
    converted: HashMap<CellId, CellId>,
    report: ExtractionReport,
}

impl Extractor {
    /// Fails if the flatten pattern does not compile.
    pub fn new(config: ExtractConfig) -> Result<Self> {
        let flatten = config.flatten_matcher()?;
        Ok(Self {
            config,
            flatten,
            cancel: CancelToken::new(),
            stitcher: Box::new(NoStitch),
            converted: HashMap::new(),
            report: ExtractionReport::default(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_stitcher(mut self, stitcher: impl Stitcher + 'static) -> Self {
        self.stitcher = Box::new(stitcher);
        self
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn report(&self) -> &ExtractionReport {
        &self.report
    }

    pub fn into_report(self) -> ExtractionReport {
        self.report
    }

    /// Converted cell ids by source cell id.
    pub fn converted(&self) -> &HashMap<CellId, CellId> {
        &self.converted
    }

    /// Extract one cell, and with `recursive` every subcell below it that
    /// is not flattened. Returns the id of the extracted cell.
    pub fn extract(&mut self, db: &mut LayoutDatabase, cell: CellId, recursive: bool) -> Result<CellId> {
        let library = TemplateLibrary::build(&db.technology, self.config.unify_active)?;
        let wells = scan_wells(db, &library, cell);
        log::info!(
            "Extracting {} (recursive: {recursive}, n-well: {}, p-well: {})",
            db.cell(&cell)?.name,
            wells.n_well,
            wells.p_well
        );
        let mut run = Run {
            config: &self.config,
            flatten: self.flatten.as_ref(),
            cancel: &self.cancel,
            stitcher: self.stitcher.as_ref(),
            library: &library,
            wells,
            converted: &mut self.converted,
            report: &mut self.report,
            stack: Vec::new(),
        };
        run.convert(db, cell, recursive)
    }
}

/// Borrowed state of one `extract` call.
struct Run<'r> {
    config: &'r ExtractConfig,
    flatten: Option<&'r Regex>,
    cancel: &'r CancelToken,
    stitcher: &'r dyn Stitcher,
    library: &'r TemplateLibrary,
    wells: WellPresence,
    converted: &'r mut HashMap<CellId, CellId>,
    report: &'r mut ExtractionReport,
    stack: Vec<CellId>,
}

impl Run<'_> {
    fn convert(&mut self, db: &mut LayoutDatabase, id: CellId, recursive: bool) -> Result<CellId> {
        if let Some(done) = self.converted.get(&id) {
            log::debug!("reusing conversion of {id}");
            return Ok(*done);
        }
        let source = db.get_cell(&id).ok_or(ExtractError::UnknownCell(id))?.clone();
        if self.stack.contains(&id) {
            return Err(ExtractError::RecursiveHierarchy(source.name));
        }

        if recursive {
            self.stack.push(id);
            let mut seen = HashSet::new();
            for sub in self.subcells(db, &source, &mut seen) {
                match self.convert(db, sub, true) {
                    Ok(_) => {}
                    Err(e @ (ExtractError::Cancelled { .. } | ExtractError::RecursiveHierarchy(_))) => {
                        self.stack.pop();
                        return Err(e);
                    }
                    // the parent keeps referencing the unconverted subcell
                    Err(e) => log::warn!("Subcell of {} not converted: {e}", source.name),
                }
            }
            self.stack.pop();
        }

        let extracted = self.extract_cell(db, &source)?;
        self.converted.insert(id, extracted);
        Ok(extracted)
    }

    /// Subcells the cell instantiates as instances, looking through the
    /// ones that get flattened into it.
    fn subcells(&self, db: &LayoutDatabase, cell: &Cell, seen: &mut HashSet<CellId>) -> Vec<CellId> {
        let mut out = Vec::new();
        for inst in &cell.instances {
            let Some(sub) = db.get_cell(&inst.cell_id) else {
                continue;
            };
            if !seen.insert(sub.id) {
                continue;
            }
            if self.flatten.is_some_and(|re| re.is_match(&sub.name)) {
                out.extend(self.subcells(db, sub, seen));
            } else {
                out.push(sub.id);
            }
        }
        out
    }

    fn extract_cell(&mut self, db: &mut LayoutDatabase, source: &Cell) -> Result<CellId> {
        let (library, config) = (self.library, self.config);
        let mut ctx = ExtractionContext::new(&source.name, library, config, self.wells, self.cancel.clone());
        let outcome = self.passes(&mut ctx, db, source);
        let (graph, issues) = ctx.finish();
        log::info!(
            "Cell {}: {} nodes, {} arcs, {} issues",
            source.name,
            graph.nodes().len(),
            graph.arcs().len(),
            issues.issues().len()
        );
        self.report.push(issues);
        outcome?;

        let name = format!("{}{}", source.name, config.cell_suffix);
        let mut cell = graph.into_cell(&name);
        // replace an earlier extraction of the same cell
        if let Some(existing) = db.find_cell_by_name(&name) {
            cell.id = existing.id;
        }
        Ok(db.add_cell(cell))
    }

    fn passes(&self, ctx: &mut ExtractionContext, db: &LayoutDatabase, source: &Cell) -> Result<()> {
        let plan = IngestPlan {
            flatten: self.flatten,
            converted: &*self.converted,
        };
        ingest(ctx, db, source, &plan)?;
        extract_vias(ctx)?;
        extract_transistors(ctx)?;
        match self.config.routing {
            RoutingMode::Skeletonize => extract_wires(ctx)?,
            RoutingMode::KeepOriginal => reinsert_routing(ctx)?,
        };
        extract_bridges(ctx)?;
        convert_leftovers(ctx)?;
        restore_exports(ctx, source)?;
        self.stitcher.stitch(ctx)
    }
}

/// Well types drawn anywhere below the cell.
fn scan_wells(db: &LayoutDatabase, library: &TemplateLibrary, root: CellId) -> WellPresence {
    let mut wells = WellPresence::default();
    let mut seen = HashSet::new();
    let mut todo = vec![root];
    while let Some(id) = todo.pop() {
        if !seen.insert(id) {
            continue;
        }
        let Some(cell) = db.get_cell(&id) else {
            continue;
        };
        let geometry = cell.geometries.iter().map(|g| g.layer_id());
        let nodes = cell
            .nodes
            .iter()
            .flat_map(|n| library.footprint(n).into_iter().map(|(l, _)| l));
        for layer in geometry.chain(nodes) {
            match library.function(layer) {
                LayerFunction::WellN => wells.n_well = true,
                LayerFunction::WellP => wells.p_well = true,
                _ => {}
            }
        }
        todo.extend(cell.instances.iter().map(|i| i.cell_id));
    }
    wells
}
