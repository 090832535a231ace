use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cell::{Cell, CellId};
use crate::technology::Technology;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cell {0} is not in the database")]
    UnknownCell(CellId),

    #[error("Cell '{0}' is not in the database")]
    UnknownCellName(String),
}

/// The central layout database that holds all cells and the technology.
#[derive(Debug, Serialize, Deserialize)]
pub struct LayoutDatabase {
    /// Database identifier.
    pub id: Uuid,
    /// Project name.
    pub name: String,
    pub technology: Technology,
    /// All cells indexed by ID.
    cells: HashMap<CellId, Cell>,
    /// Top-level cell (entry point for hierarchy).
    pub top_cell: Option<CellId>,
}

impl LayoutDatabase {
    pub fn new(name: &str, technology: Technology) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            technology,
            cells: HashMap::new(),
            top_cell: None,
        }
    }

    // ── Cell management ──────────────────────────────────────────────

    pub fn add_cell(&mut self, cell: Cell) -> CellId {
        let id = cell.id;
        self.cells.insert(id, cell);
        if self.top_cell.is_none() {
            self.top_cell = Some(id);
        }
        id
    }

    pub fn get_cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn cell(&self, id: &CellId) -> Result<&Cell, DatabaseError> {
        self.cells.get(id).ok_or(DatabaseError::UnknownCell(*id))
    }

    pub fn find_cell_by_name(&self, name: &str) -> Option<&Cell> {
        // several cells may share a name; pick the lexically smallest id so the
        // answer does not depend on hash order
        self.cells
            .values()
            .filter(|c| c.name == name)
            .min_by_key(|c| c.id)
    }

    pub fn cell_id_by_name(&self, name: &str) -> Result<CellId, DatabaseError> {
        self.find_cell_by_name(name)
            .map(|c| c.id)
            .ok_or_else(|| DatabaseError::UnknownCellName(name.to_string()))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    // ── Serialization ────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String, DatabaseError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DatabaseError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_create() {
        let db = LayoutDatabase::new("test_project", Technology::new("cmos"));
        assert_eq!(db.name, "test_project");
        assert_eq!(db.cell_count(), 0);
        assert!(db.top_cell.is_none());
    }

    #[test]
    fn test_add_and_find_cell() {
        let mut db = LayoutDatabase::new("test", Technology::new("cmos"));
        let cell = Cell::new("inverter");
        let id = db.add_cell(cell);
        assert_eq!(db.cell_count(), 1);
        assert!(db.get_cell(&id).is_some());
        assert_eq!(db.find_cell_by_name("inverter").unwrap().name, "inverter");
        assert!(db.cell_id_by_name("nand2").is_err());
    }

    #[test]
    fn test_top_cell_auto_set() {
        let mut db = LayoutDatabase::new("test", Technology::new("cmos"));
        let cell = Cell::new("top");
        let id = db.add_cell(cell);
        assert_eq!(db.top_cell, Some(id));
    }

    #[test]
    fn test_json_roundtrip_keeps_cells() {
        let mut db = LayoutDatabase::new("test", Technology::new("cmos"));
        let id = db.add_cell(Cell::new("top"));
        let json = db.to_json().unwrap();
        let back = LayoutDatabase::from_json(&json).unwrap();
        assert_eq!(back.cell(&id).unwrap().name, "top");
    }
}
