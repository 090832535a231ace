use serde::{Deserialize, Serialize};

/// A unique layer identifier (typically GDS layer number).
pub type LayerId = u32;

/// What a layer is made of, which drives every recognition rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LayerFunction {
    Metal(u8),
    Poly(u8),
    /// Transistor gate poly, folded onto poly before merging.
    Gate,
    Diff,
    DiffN,
    DiffP,
    /// Cut between conductors; the level counts up from the active/poly contact.
    Contact(u8),
    ImplantN,
    ImplantP,
    WellN,
    WellP,
    Other,
}

impl LayerFunction {
    pub fn is_metal(&self) -> bool {
        matches!(self, LayerFunction::Metal(_))
    }

    pub fn is_poly(&self) -> bool {
        matches!(self, LayerFunction::Poly(_) | LayerFunction::Gate)
    }

    pub fn is_diffusion(&self) -> bool {
        matches!(self, LayerFunction::Diff | LayerFunction::DiffN | LayerFunction::DiffP)
    }

    pub fn is_contact(&self) -> bool {
        matches!(self, LayerFunction::Contact(_))
    }

    pub fn is_well(&self) -> bool {
        matches!(self, LayerFunction::WellN | LayerFunction::WellP)
    }

    pub fn is_implant(&self) -> bool {
        matches!(self, LayerFunction::ImplantN | LayerFunction::ImplantP)
    }

    /// Layers that can carry a wire.
    pub fn is_routable(&self) -> bool {
        self.is_metal() || self.is_poly() || self.is_diffusion()
    }

    pub fn level(&self) -> Option<u8> {
        match self {
            LayerFunction::Metal(l) | LayerFunction::Poly(l) | LayerFunction::Contact(l) => Some(*l),
            _ => None,
        }
    }
}

/// Represents a technology layer in the layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub function: LayerFunction,
    /// Pseudo layers only exist for pins; their geometry belongs to the real layer.
    #[serde(default)]
    pub pseudo: bool,
    #[serde(default)]
    pub gds_layer: u16,
    #[serde(default)]
    pub gds_datatype: u16,
    #[serde(default)]
    pub description: String,
}

impl Layer {
    pub fn new(id: LayerId, name: &str, function: LayerFunction) -> Self {
        Self {
            id,
            name: name.to_string(),
            function,
            pseudo: false,
            gds_layer: id as u16,
            gds_datatype: 0,
            description: String::new(),
        }
    }

    pub fn as_pseudo(mut self) -> Self {
        self.pseudo = true;
        self
    }
}

/// A collection of layers representing a technology stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn add_layer(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    pub fn get_layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn function_of(&self, id: LayerId) -> LayerFunction {
        self.get_layer(id)
            .map(|l| l.function)
            .unwrap_or(LayerFunction::Other)
    }

    pub fn all_layers(&self) -> &[Layer] {
        &self.layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_predicates() {
        assert!(LayerFunction::Gate.is_poly());
        assert!(LayerFunction::DiffN.is_diffusion());
        assert!(LayerFunction::DiffP.is_routable());
        assert!(!LayerFunction::Contact(1).is_routable());
        assert_eq!(LayerFunction::Metal(2).level(), Some(2));
        assert_eq!(LayerFunction::WellN.level(), None);
    }

    #[test]
    fn test_layer_lookup() {
        let mut stack = LayerStack::new();
        stack.add_layer(Layer::new(1, "pseudo-metal-1", LayerFunction::Metal(1)).as_pseudo());
        stack.add_layer(Layer::new(2, "metal-1", LayerFunction::Metal(1)));
        assert!(stack.get_layer(1).unwrap().pseudo);
        assert_eq!(stack.function_of(2), LayerFunction::Metal(1));
        assert_eq!(stack.function_of(99), LayerFunction::Other);
    }
}
