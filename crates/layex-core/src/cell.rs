use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{BBox, GeomPrimitive, Path, Point, Polygon, Rect};
use crate::LayerId;

/// Unique cell identifier.
pub type CellId = Uuid;

/// A transformation for placing subcell instances.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Translation offset.
    pub offset: Point,
    /// Rotation in degrees, counter-clockwise.
    pub rotation: f64,
    /// Mirror about X axis (applied before rotation).
    pub mirror_x: bool,
    /// Uniform scale factor (typically 1.0).
    pub scale: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            offset: Point::new(0.0, 0.0),
            rotation: 0.0,
            mirror_x: false,
            scale: 1.0,
        }
    }
}

impl Transform {
    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            offset: Point::new(x, y),
            ..Default::default()
        }
    }

    pub fn rotate(degrees: f64, about: Point) -> Self {
        let r = Self {
            rotation: degrees,
            ..Default::default()
        };
        let moved = r.apply(&about);
        Self {
            offset: Point::new(about.x - moved.x, about.y - moved.y),
            ..r
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, point: &Point) -> Point {
        let mut p = *point;

        p.x *= self.scale;
        p.y *= self.scale;

        if self.mirror_x {
            p.y = -p.y;
        }

        let (sin_r, cos_r) = sin_cos_degrees(self.rotation);
        let rx = p.x * cos_r - p.y * sin_r;
        let ry = p.x * sin_r + p.y * cos_r;

        Point::new(rx + self.offset.x, ry + self.offset.y)
    }

    pub fn apply_all(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply(p)).collect()
    }

    /// Bounding box of a transformed box.
    pub fn apply_bbox(&self, bbox: &BBox) -> BBox {
        let corners = self.apply_all(&bbox.outline());
        BBox::from_points(&corners).unwrap_or(*bbox)
    }

    /// A transformed copy of a primitive. Rectangles stay rectangles under
    /// quarter turns; otherwise they become polygons.
    pub fn apply_primitive(&self, geom: &GeomPrimitive) -> GeomPrimitive {
        match geom {
            GeomPrimitive::Rect(r) if self.rotation % 90.0 == 0.0 => {
                let b = self.apply_bbox(&r.bbox());
                GeomPrimitive::Rect(Rect::new(r.layer_id, b.min.x, b.min.y, b.max.x, b.max.y))
            }
            GeomPrimitive::Rect(r) => {
                GeomPrimitive::Polygon(Polygon::new(r.layer_id, self.apply_all(&r.bbox().outline())))
            }
            GeomPrimitive::Polygon(p) => GeomPrimitive::Polygon(
                Polygon::new(p.layer_id, self.apply_all(&p.vertices))
                    .with_holes(p.holes.iter().map(|h| self.apply_all(h)).collect()),
            ),
            GeomPrimitive::Path(p) => GeomPrimitive::Path(Path {
                layer_id: p.layer_id,
                points: self.apply_all(&p.points),
                width: p.width * self.scale,
                extended: p.extended,
            }),
        }
    }

    /// The transform equivalent to applying `inner` first and then `self`.
    pub fn compose(&self, inner: &Transform) -> Transform {
        // mirroring about X before a rotation flips the sense of the inner rotation
        let inner_rotation = if self.mirror_x {
            -inner.rotation
        } else {
            inner.rotation
        };
        Transform {
            offset: self.apply(&inner.offset),
            rotation: normalize_degrees(self.rotation + inner_rotation),
            mirror_x: self.mirror_x != inner.mirror_x,
            scale: self.scale * inner.scale,
        }
    }
}

/// Sine and cosine of an angle in degrees, exact at multiples of 90.
pub fn sin_cos_degrees(degrees: f64) -> (f64, f64) {
    let d = normalize_degrees(degrees);
    if d == 0.0 {
        (0.0, 1.0)
    } else if d == 90.0 {
        (1.0, 0.0)
    } else if d == 180.0 {
        (0.0, -1.0)
    } else if d == 270.0 {
        (-1.0, 0.0)
    } else {
        d.to_radians().sin_cos()
    }
}

/// Map an angle onto `[0, 360)`.
pub fn normalize_degrees(degrees: f64) -> f64 {
    let d = degrees % 360.0;
    if d < 0.0 {
        d + 360.0
    } else {
        d
    }
}

/// A reference to a subcell placed within a parent cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellInstance {
    pub id: Uuid,
    pub cell_id: CellId,
    pub instance_name: String,
    pub transform: Transform,
}

impl CellInstance {
    pub fn new(cell_id: CellId, instance_name: &str, transform: Transform) -> Self {
        Self {
            id: Uuid::new_v4(),
            cell_id,
            instance_name: instance_name.to_string(),
            transform,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
    InOut,
    Power,
    Ground,
}

/// Where an export is attached in an extracted cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortAttachment {
    /// Index into [`Cell::nodes`].
    pub node: usize,
    pub port: String,
}

/// An exported connection point of a cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub layer_id: LayerId,
    pub shape: GeomPrimitive,
    pub direction: PinDirection,
    #[serde(default)]
    pub attachment: Option<PortAttachment>,
}

impl Export {
    pub fn new(name: &str, shape: GeomPrimitive, direction: PinDirection) -> Self {
        Self {
            name: name.to_string(),
            layer_id: shape.layer_id(),
            shape,
            direction,
            attachment: None,
        }
    }
}

/// How the cuts of a multi-cut contact are distributed in the cut area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CutAlignment {
    /// Minimum spacing, array centered.
    Centered,
    /// Outer cuts touch the cut area, spacing stretched.
    Spread,
    /// Minimum spacing, packed from the lower-left corner.
    Corner,
}

/// An instance of a primitive node (device or pin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInst {
    pub name: String,
    /// Name of the technology node prototype.
    pub proto: String,
    pub center: Point,
    pub width: f64,
    pub height: f64,
    /// Rotation in degrees, counter-clockwise about the center.
    pub rotation: f64,
    /// Serpentine gate path, absolute coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut_alignment: Option<CutAlignment>,
    /// Set when the node stands for a subcell instance; `proto` is then the subcell name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<Uuid>,
}

impl NodeInst {
    pub fn new(proto: &str, center: Point, width: f64, height: f64) -> Self {
        Self {
            name: String::new(),
            proto: proto.to_string(),
            center,
            width,
            height,
            rotation: 0.0,
            trace: None,
            cut_alignment: None,
            instance: None,
        }
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = normalize_degrees(rotation);
        self
    }

    pub fn bbox(&self) -> BBox {
        let unrotated = BBox::centered(self.center, self.width, self.height);
        Transform::rotate(self.rotation, self.center).apply_bbox(&unrotated)
    }
}

/// One end of an arc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcEnd {
    /// Index into [`Cell::nodes`].
    pub node: usize,
    pub port: String,
    pub location: Point,
    /// The arc extends half its width past this end.
    pub extended: bool,
}

/// A wire between two node ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcInst {
    pub name: String,
    /// Wire prototype name; `None` for an untyped zero-width connector.
    pub proto: Option<String>,
    pub width: f64,
    pub head: ArcEnd,
    pub tail: ArcEnd,
}

impl ArcInst {
    pub fn length(&self) -> f64 {
        self.head.location.distance_to(&self.tail.location)
    }
}

/// A layout cell containing geometry, devices, wires, and subcell references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub name: String,
    /// Pure-layer geometry.
    pub geometries: Vec<GeomPrimitive>,
    pub instances: Vec<CellInstance>,
    #[serde(default)]
    pub nodes: Vec<NodeInst>,
    #[serde(default)]
    pub arcs: Vec<ArcInst>,
    #[serde(default)]
    pub exports: Vec<Export>,
    #[serde(skip)]
    pub modified: bool,
}

impl Cell {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            geometries: Vec::new(),
            instances: Vec::new(),
            nodes: Vec::new(),
            arcs: Vec::new(),
            exports: Vec::new(),
            modified: false,
        }
    }

    pub fn add_geometry(&mut self, geom: GeomPrimitive) {
        self.geometries.push(geom);
        self.modified = true;
    }

    pub fn remove_geometry(&mut self, index: usize) -> Option<GeomPrimitive> {
        if index < self.geometries.len() {
            self.modified = true;
            Some(self.geometries.remove(index))
        } else {
            None
        }
    }

    pub fn add_instance(&mut self, instance: CellInstance) {
        self.instances.push(instance);
        self.modified = true;
    }

    /// Add a node and return its index.
    pub fn add_node(&mut self, node: NodeInst) -> usize {
        self.nodes.push(node);
        self.modified = true;
        self.nodes.len() - 1
    }

    pub fn add_arc(&mut self, arc: ArcInst) {
        self.arcs.push(arc);
        self.modified = true;
    }

    pub fn add_export(&mut self, export: Export) {
        self.exports.push(export);
        self.modified = true;
    }

    pub fn find_export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// Compute the bounding box of all geometry and nodes in this cell (not including subcells).
    pub fn local_bbox(&self) -> Option<BBox> {
        let bboxes: Vec<BBox> = self
            .geometries
            .iter()
            .filter_map(|g| g.bbox())
            .chain(self.nodes.iter().map(|n| n.bbox()))
            .collect();

        if bboxes.is_empty() {
            return None;
        }

        let mut result = bboxes[0];
        for bb in &bboxes[1..] {
            result = result.union(bb);
        }
        Some(result)
    }

    /// Get all geometries on a specific layer.
    pub fn geometries_on_layer(&self, layer_id: LayerId) -> Vec<&GeomPrimitive> {
        self.geometries
            .iter()
            .filter(|g| g.layer_id() == layer_id)
            .collect()
    }

    pub fn geometry_count(&self) -> usize {
        self.geometries.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    #[test]
    fn test_cell_add_geometry() {
        let mut cell = Cell::new("test_cell");
        let rect = GeomPrimitive::Rect(Rect::new(0, 0.0, 0.0, 100.0, 50.0));
        cell.add_geometry(rect);
        assert_eq!(cell.geometry_count(), 1);
        assert!(cell.modified);
    }

    #[test]
    fn test_cell_bbox() {
        let mut cell = Cell::new("test_cell");
        cell.add_geometry(GeomPrimitive::Rect(Rect::new(0, 0.0, 0.0, 100.0, 50.0)));
        cell.add_geometry(GeomPrimitive::Rect(Rect::new(1, 50.0, 25.0, 200.0, 75.0)));
        let bb = cell.local_bbox().unwrap();
        assert!((bb.min.x - 0.0).abs() < 1e-10);
        assert!((bb.min.y - 0.0).abs() < 1e-10);
        assert!((bb.max.x - 200.0).abs() < 1e-10);
        assert!((bb.max.y - 75.0).abs() < 1e-10);
    }

    #[test]
    fn test_quarter_turn_keeps_rectangles() {
        let t = Transform::rotate(90.0, Point::new(0.0, 0.0));
        let moved = t.apply_primitive(&GeomPrimitive::Rect(Rect::new(3, 0.0, 0.0, 4.0, 2.0)));
        let GeomPrimitive::Rect(r) = moved else {
            panic!("expected a rectangle");
        };
        assert_eq!(r.layer_id, 3);
        assert!((r.width() - 2.0).abs() < 1e-10);
        assert!((r.height() - 4.0).abs() < 1e-10);
        let tilted = Transform::rotate(45.0, Point::new(0.0, 0.0));
        assert!(matches!(
            tilted.apply_primitive(&GeomPrimitive::Rect(Rect::new(3, 0.0, 0.0, 4.0, 2.0))),
            GeomPrimitive::Polygon(_)
        ));
    }

    #[test]
    fn test_transform_translate() {
        let t = Transform::translate(10.0, 20.0);
        let p = Point::new(5.0, 5.0);
        let result = t.apply(&p);
        assert!((result.x - 15.0).abs() < 1e-10);
        assert!((result.y - 25.0).abs() < 1e-10);
    }

    #[test]
    fn test_transform_compose_matches_sequential_apply() {
        let outer = Transform {
            offset: Point::new(100.0, 0.0),
            rotation: 90.0,
            mirror_x: true,
            scale: 1.0,
        };
        let inner = Transform {
            offset: Point::new(3.0, 4.0),
            rotation: 90.0,
            mirror_x: false,
            scale: 1.0,
        };
        let p = Point::new(1.0, 2.0);
        let sequential = outer.apply(&inner.apply(&p));
        let composed = outer.compose(&inner).apply(&p);
        assert!(sequential.approx_eq(&composed, 1e-9));
    }

    #[test]
    fn test_rotated_node_bbox() {
        let node = NodeInst::new("nmos", Point::new(0.0, 0.0), 6.0, 2.0).with_rotation(90.0);
        let bb = node.bbox();
        assert!((bb.width() - 2.0).abs() < 1e-10);
        assert!((bb.height() - 6.0).abs() < 1e-10);
    }
}
