//! # Layex Core
//!
//! Layout database with hierarchical cells, geometric primitives, the
//! technology description (layers, wires, primitive nodes), and R-tree
//! spatial indexing.
//!
//! This crate is the data model the Layex extractor reads from and writes to.

pub mod geometry;
pub mod cell;
pub mod database;
pub mod layer;
pub mod spatial;
pub mod technology;

pub use database::{DatabaseError, LayoutDatabase};
pub use cell::{
    ArcEnd, ArcInst, Cell, CellId, CellInstance, CutAlignment, Export, NodeInst, PinDirection,
    PortAttachment, Transform,
};
pub use layer::{Layer, LayerFunction, LayerId, LayerStack};
pub use geometry::{BBox, GeomPrimitive, Path, Point, Polygon, Rect};
pub use technology::{Inset, MultiCut, NodeFunction, NodeProto, PortProto, Technology, WireProto};
