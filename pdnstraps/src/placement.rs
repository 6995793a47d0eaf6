//! Hard macro placement and obstruction inventory.
//!
//! Read-only inputs resolved from floorplan constraints before a generation
//! run starts.

use arcstr::ArcStr;
use derive_builder::Builder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::geom::{Orientation, Rect};

/// A placed hard macro instance.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct HardmacroInstance {
    /// Hierarchical instance path.
    #[builder(setter(into))]
    path: ArcStr,
    /// Master (module) name; instances without one are skipped.
    #[builder(default, setter(strip_option, into))]
    master: Option<ArcStr>,
    /// Lower-left placement coordinates.
    x: Decimal,
    y: Decimal,
    #[builder(default)]
    orientation: Orientation,
    #[builder(default, setter(strip_option))]
    width: Option<Decimal>,
    #[builder(default, setter(strip_option))]
    height: Option<Decimal>,
    /// The highest metal layer of the macro's internal power grid.
    #[builder(default, setter(strip_option, into))]
    top_layer: Option<ArcStr>,
    /// Physical-only cells carry no power connectivity.
    #[builder(default)]
    physical_only: bool,
}

impl HardmacroInstance {
    pub fn builder() -> HardmacroInstanceBuilder {
        HardmacroInstanceBuilder::default()
    }

    #[inline]
    pub fn path(&self) -> &ArcStr {
        &self.path
    }

    #[inline]
    pub fn master(&self) -> Option<&ArcStr> {
        self.master.as_ref()
    }

    #[inline]
    pub fn x(&self) -> Decimal {
        self.x
    }

    #[inline]
    pub fn y(&self) -> Decimal {
        self.y
    }

    #[inline]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    #[inline]
    pub fn top_layer(&self) -> Option<&ArcStr> {
        self.top_layer.as_ref()
    }

    #[inline]
    pub fn physical_only(&self) -> bool {
        self.physical_only
    }

    /// The orientation-adjusted (width, height) extent, if both dimensions
    /// are known.
    pub fn extent(&self) -> Option<(Decimal, Decimal)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if self.orientation.swaps_extent() => Some((h, w)),
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }
}

/// The kind of keep-out a blockage declares.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObstructionKind {
    Place,
    Route,
    Power,
}

/// A declared keep-out region.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct Obstruction {
    #[builder(setter(into))]
    path: ArcStr,
    rect: Rect,
    /// Layers the obstruction applies to; empty means all.
    #[builder(default)]
    layers: Vec<ArcStr>,
    kinds: Vec<ObstructionKind>,
}

impl Obstruction {
    pub fn builder() -> ObstructionBuilder {
        ObstructionBuilder::default()
    }

    #[inline]
    pub fn path(&self) -> &ArcStr {
        &self.path
    }

    #[inline]
    pub fn rect(&self) -> &Rect {
        &self.rect
    }

    #[inline]
    pub fn blocks_power(&self) -> bool {
        self.kinds.contains(&ObstructionKind::Power)
    }

    pub fn on_layer(&self, layer: &str) -> bool {
        self.layers.iter().any(|l| l.as_str() == layer)
    }
}

/// All placement data a generation run reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlacementInventory {
    pub hardmacros: Vec<HardmacroInstance>,
    pub obstructions: Vec<Obstruction>,
}

impl PlacementInventory {
    /// Power-kind obstructions declared on `layer`.
    pub fn power_obstructions_on<'a>(
        &'a self,
        layer: &'a str,
    ) -> impl Iterator<Item = &'a Obstruction> {
        self.obstructions
            .iter()
            .filter(move |o| o.blocks_power() && o.on_layer(layer))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn rotated_instances_swap_extent() {
        let inst = HardmacroInstance::builder()
            .path("top/sram0")
            .master("sram")
            .x(dec!(10))
            .y(dec!(20))
            .orientation(Orientation::R90)
            .width(dec!(30))
            .height(dec!(40))
            .build()
            .unwrap();
        assert_eq!(inst.extent(), Some((dec!(40), dec!(30))));
    }

    #[test]
    fn extent_requires_both_dimensions() {
        let inst = HardmacroInstance::builder()
            .path("top/sram0")
            .x(dec!(0))
            .y(dec!(0))
            .width(dec!(30))
            .build()
            .unwrap();
        assert_eq!(inst.extent(), None);
    }

    #[test]
    fn power_obstruction_filtering() {
        let inventory = PlacementInventory {
            hardmacros: vec![],
            obstructions: vec![
                Obstruction::builder()
                    .path("obs_power")
                    .rect(Rect::new(dec!(0), dec!(0), dec!(5), dec!(5)))
                    .layers(vec![arcstr::literal!("M4")])
                    .kinds(vec![ObstructionKind::Power, ObstructionKind::Route])
                    .build()
                    .unwrap(),
                Obstruction::builder()
                    .path("obs_route")
                    .rect(Rect::new(dec!(0), dec!(0), dec!(5), dec!(5)))
                    .layers(vec![arcstr::literal!("M4")])
                    .kinds(vec![ObstructionKind::Route])
                    .build()
                    .unwrap(),
            ],
        };
        let on_m4: Vec<_> = inventory.power_obstructions_on("M4").collect();
        assert_eq!(on_m4.len(), 1);
        assert_eq!(on_m4[0].path().as_str(), "obs_power");
        assert_eq!(inventory.power_obstructions_on("M5").count(), 0);
    }
}
