//! Technology description: the read-only query surface the extractor derives
//! its device templates and wire types from.

use serde::{Deserialize, Serialize};

use crate::geometry::BBox;
use crate::layer::{LayerFunction, LayerId, LayerStack};

/// Distances from each side of a node's bounds to a layer or port edge.
/// Positive values move the edge inward, negative values outward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Inset {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Inset {
    pub fn uniform(amount: f64) -> Self {
        Self {
            left: amount,
            bottom: amount,
            right: amount,
            top: amount,
        }
    }

    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Apply the inset to a box.
    pub fn apply(&self, bounds: &BBox) -> BBox {
        BBox::from_corners(
            bounds.min.x + self.left,
            bounds.min.y + self.bottom,
            bounds.max.x - self.right,
            bounds.max.y - self.top,
        )
    }

    pub fn horizontal(&self) -> f64 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f64 {
        self.bottom + self.top
    }
}

/// What a primitive node is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeFunction {
    Pin,
    Contact,
    WellContact,
    SubstrateContact,
    TransistorN,
    TransistorP,
    /// Pure-layer node.
    Node,
}

/// One layer of a primitive node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLayer {
    pub layer: LayerId,
    pub inset: Inset,
}

/// A connection point on a primitive node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortProto {
    pub name: String,
    /// Layers this port connects to.
    pub layers: Vec<LayerId>,
    pub inset: Inset,
    /// Ports sharing a topology group are electrically the same.
    #[serde(default)]
    pub topology: u32,
}

/// Multi-cut array rule for contacts and vias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiCut {
    pub cut_width: f64,
    pub cut_height: f64,
    /// Distance from the node edge to the nearest cut.
    pub indent: f64,
    /// Spacing when every cut has at most two neighbors.
    pub spacing: f64,
    /// Spacing once some cut has three or more neighbors.
    pub array_spacing: f64,
}

/// A primitive node (device or pin) of the technology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProto {
    pub name: String,
    pub function: NodeFunction,
    pub default_width: f64,
    pub default_height: f64,
    pub layers: Vec<NodeLayer>,
    #[serde(default)]
    pub ports: Vec<PortProto>,
    #[serde(default)]
    pub multicut: Option<MultiCut>,
    /// For transistors: distance from the node bounds to the gate area.
    #[serde(default)]
    pub size_offset: Inset,
    #[serde(default)]
    pub serpentine: bool,
}

impl NodeProto {
    pub fn default_area(&self) -> f64 {
        self.default_width * self.default_height
    }
}

/// A wire (arc) type that runs on one routable layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireProto {
    pub name: String,
    pub layer: LayerId,
    pub default_width: f64,
    /// Name of the pin node used at free wire ends.
    pub pin: String,
}

/// A complete technology: layers, wires, and primitive nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Technology {
    pub name: String,
    pub layers: LayerStack,
    #[serde(default)]
    pub wires: Vec<WireProto>,
    #[serde(default)]
    pub nodes: Vec<NodeProto>,
}

impl Technology {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn find_node(&self, name: &str) -> Option<&NodeProto> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn find_wire(&self, name: &str) -> Option<&WireProto> {
        self.wires.iter().find(|w| w.name == name)
    }

    pub fn layer_function(&self, id: LayerId) -> LayerFunction {
        self.layers.function_of(id)
    }

    /// The pure-layer node for a layer, if the technology declares one.
    pub fn pure_layer_node(&self, layer: LayerId) -> Option<&NodeProto> {
        self.nodes.iter().find(|n| {
            n.function == NodeFunction::Node && n.layers.len() == 1 && n.layers[0].layer == layer
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    #[test]
    fn test_inset_apply() {
        let bounds = BBox::new(Point::new(0.0, 0.0), Point::new(10.0, 6.0));
        let inner = Inset::new(1.0, 2.0, 3.0, 1.0).apply(&bounds);
        assert!((inner.min.x - 1.0).abs() < 1e-10);
        assert!((inner.min.y - 2.0).abs() < 1e-10);
        assert!((inner.max.x - 7.0).abs() < 1e-10);
        assert!((inner.max.y - 5.0).abs() < 1e-10);
        let outer = Inset::uniform(-1.0).apply(&bounds);
        assert!((outer.width() - 12.0).abs() < 1e-10);
    }
}
