#![allow(dead_code)]

use layex_core::technology::{NodeLayer, PortProto};
use layex_core::{
    BBox, Cell, CellId, GeomPrimitive, Inset, Layer, LayerFunction, LayoutDatabase, MultiCut, NodeFunction,
    NodeProto, Point, Polygon, Rect, Technology, WireProto,
};

pub const METAL1: u32 = 1;
pub const METAL2: u32 = 2;
pub const VIA1: u32 = 3;
pub const POLY: u32 = 4;
pub const NACTIVE: u32 = 5;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two metals joined by a multi-cut via, plus poly over n-active.
pub fn technology() -> Technology {
    let mut tech = Technology::new("fixture");
    tech.layers.add_layer(Layer::new(METAL1, "metal1", LayerFunction::Metal(1)));
    tech.layers.add_layer(Layer::new(METAL2, "metal2", LayerFunction::Metal(2)));
    tech.layers.add_layer(Layer::new(VIA1, "via1", LayerFunction::Contact(2)));
    tech.layers.add_layer(Layer::new(POLY, "poly", LayerFunction::Poly(1)));
    tech.layers.add_layer(Layer::new(NACTIVE, "nactive", LayerFunction::DiffN));

    for (name, layer, pin) in [("m1", METAL1, "m1pin"), ("m2", METAL2, "m2pin")] {
        tech.wires.push(WireProto {
            name: name.into(),
            layer,
            default_width: 2.0,
            pin: pin.into(),
        });
    }

    let uniform = |layer, inset| NodeLayer {
        layer,
        inset: Inset::uniform(inset),
    };
    tech.nodes.push(NodeProto {
        name: "m1m2".into(),
        function: NodeFunction::Contact,
        default_width: 4.0,
        default_height: 4.0,
        layers: vec![uniform(METAL1, 0.0), uniform(METAL2, 0.0), uniform(VIA1, 1.0)],
        ports: vec![PortProto {
            name: "via".into(),
            layers: vec![METAL1, METAL2],
            inset: Inset::uniform(1.0),
            topology: 0,
        }],
        multicut: Some(MultiCut {
            cut_width: 2.0,
            cut_height: 2.0,
            indent: 1.0,
            spacing: 3.0,
            array_spacing: 3.0,
        }),
        size_offset: Inset::default(),
        serpentine: false,
    });
    tech.nodes.push(NodeProto {
        name: "nmos".into(),
        function: NodeFunction::TransistorN,
        default_width: 6.0,
        default_height: 8.0,
        layers: vec![
            NodeLayer {
                layer: POLY,
                inset: Inset::new(0.0, 3.0, 0.0, 3.0),
            },
            NodeLayer {
                layer: NACTIVE,
                inset: Inset::new(2.0, 0.0, 2.0, 0.0),
            },
        ],
        ports: vec![PortProto {
            name: "g".into(),
            layers: vec![POLY],
            inset: Inset::new(0.0, 3.0, 0.0, 3.0),
            topology: 0,
        }],
        multicut: None,
        size_offset: Inset::new(2.0, 3.0, 2.0, 3.0),
        serpentine: false,
    });
    tech
}

pub fn database() -> LayoutDatabase {
    LayoutDatabase::new("fixture", technology())
}

pub fn rect(cell: &mut Cell, layer: u32, x1: f64, y1: f64, x2: f64, y2: f64) {
    cell.add_geometry(GeomPrimitive::Rect(Rect::new(layer, x1, y1, x2, y2)));
}

pub fn polygon(cell: &mut Cell, layer: u32, points: &[(f64, f64)]) {
    let points = points.iter().map(|&(x, y)| Point::new(x, y)).collect();
    cell.add_geometry(GeomPrimitive::Polygon(Polygon::new(layer, points)));
}

/// 9x9 pads on both metals with a 2x2 cut grid at the given lower-left corners.
pub fn via_stack(cell: &mut Cell, corners: &[(f64, f64)]) {
    rect(cell, METAL1, 0.0, 0.0, 9.0, 9.0);
    rect(cell, METAL2, 0.0, 0.0, 9.0, 9.0);
    for &(x, y) in corners {
        rect(cell, VIA1, x, y, x + 2.0, y + 2.0);
    }
}

/// Add `cell` and return its id.
pub fn add(db: &mut LayoutDatabase, cell: Cell) -> CellId {
    db.add_cell(cell)
}

pub fn bbox(x1: f64, y1: f64, x2: f64, y2: f64) -> BBox {
    BBox::from_corners(x1, y1, x2, y2)
}
