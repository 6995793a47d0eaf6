//! Metal stackup data and the width-spacing solvers used by the by-tracks
//! strap generation method.

use arcstr::ArcStr;
use derive_builder::Builder;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geom::{snap_down, Dir};

/// An error type for stackup lookups and quantization.
#[derive(Debug, Error)]
pub enum StackupError {
    #[error("no such metal layer: {0}")]
    LayerNotFound(String),

    #[error("value {value} cannot be quantized to grid unit {grid}")]
    Unquantizable { value: Decimal, grid: Decimal },
}

/// One row of a layer's design-rule table: wires at least `width_at_least`
/// wide require at least `min_spacing` to their neighbors.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct WidthSpacingTuple {
    pub width_at_least: Decimal,
    pub min_spacing: Decimal,
}

/// A single routing metal layer.
///
/// `index` is the stacking order key: larger indices are physically higher in
/// the interconnect stack. Adjacent routing layers alternate direction.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct MetalLayer {
    #[builder(setter(into))]
    name: ArcStr,
    index: usize,
    direction: Dir,
    /// Center-to-center routing track pitch.
    pitch: Decimal,
    /// Offset of the first routing track from the origin.
    offset: Decimal,
    min_width: Decimal,
    min_spacing: Decimal,
    /// Manufacturing grid; all resolved widths and spacings land on it.
    grid_unit: Decimal,
    /// Width-dependent spacing rules, sorted by `width_at_least`.
    #[builder(default)]
    width_spacing: Vec<WidthSpacingTuple>,
}

impl MetalLayer {
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn direction(&self) -> Dir {
        self.direction
    }

    #[inline]
    pub fn pitch(&self) -> Decimal {
        self.pitch
    }

    #[inline]
    pub fn offset(&self) -> Decimal {
        self.offset
    }

    #[inline]
    pub fn min_width(&self) -> Decimal {
        self.min_width
    }

    #[inline]
    pub fn grid_unit(&self) -> Decimal {
        self.grid_unit
    }

    /// The minimum spacing required next to a wire of width `width`.
    pub fn spacing_for_width(&self, width: Decimal) -> Decimal {
        self.width_spacing
            .iter()
            .filter(|wst| width >= wst.width_at_least)
            .map(|wst| wst.min_spacing)
            .fold(self.min_spacing, Decimal::max)
    }

    /// The minimum spacing and maximum wire width that exactly fill `pitch`.
    ///
    /// Used for 100%-utilization layers, where a uniform strap pattern
    /// repeats at `pitch` with no signal tracks in between. The returned
    /// pair satisfies `width + spacing == pitch` exactly, with `width` on
    /// the manufacturing grid.
    pub fn min_spacing_and_max_width_from_pitch(&self, pitch: Decimal) -> (Decimal, Decimal) {
        let mut width = snap_down(pitch - self.min_spacing, self.grid_unit);
        let mut spacing = self.spacing_for_width(width);
        while width + spacing > pitch {
            width = snap_down(pitch - spacing, self.grid_unit);
            spacing = self.spacing_for_width(width);
        }
        (pitch - width, width)
    }

    /// Solves the track-width-track (`T W T`) pattern.
    ///
    /// Returns `(width, spacing, start)` for the widest strap that consumes
    /// `tracks` routing tracks while keeping the required spacing to
    /// min-width signal wires centered on the bounding tracks. `start` is
    /// the offset of the strap's lower edge from the track line at the
    /// strap's starting track index; the strap is centered on its consumed
    /// track span, so grid snapping shifts `start` by half the remainder.
    pub fn width_spacing_start_twt(&self, tracks: u64) -> (Decimal, Decimal, Decimal) {
        let span = self.pitch * Decimal::from(tracks + 1) - self.min_width;
        let mut spacing = self.min_spacing;
        let mut width = span - spacing * dec!(2);
        for wst in &self.width_spacing {
            if width >= wst.width_at_least {
                spacing = spacing.max(wst.min_spacing);
                width = span - spacing * dec!(2);
            }
        }
        let snapped = snap_down(width, self.grid_unit);
        let start = self.min_width / dec!(2) + spacing + (width - snapped) / dec!(2);
        (snapped, spacing, start)
    }

    /// Solves the track-width-width-track (`T W W T`) pattern.
    ///
    /// Two straps of equal width share the span between two signal tracks,
    /// separated from each other and from the bounding min-width signal
    /// wires by the same table spacing. `force_even` drops a width that
    /// resolves to an odd number of grid units down by one unit, which keeps
    /// via enclosures symmetric; the half-unit centering shift is folded
    /// into `start`.
    pub fn width_spacing_start_twwt(
        &self,
        tracks: u64,
        force_even: bool,
    ) -> (Decimal, Decimal, Decimal) {
        let span = self.pitch * Decimal::from(2 * tracks + 1) - self.min_width;
        let mut spacing = self.min_spacing;
        let mut width = (span - spacing * dec!(3)) / dec!(2);
        for wst in &self.width_spacing {
            if width >= wst.width_at_least {
                spacing = spacing.max(wst.min_spacing);
                width = (span - spacing * dec!(3)) / dec!(2);
            }
        }
        let mut snapped = snap_down(width, self.grid_unit);
        if force_even && (snapped / self.grid_unit) % dec!(2) != Decimal::ZERO {
            snapped -= self.grid_unit;
        }
        let start = self.min_width / dec!(2) + spacing + (width - snapped);
        (snapped, spacing, start)
    }
}

/// An ordered interconnect stackup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stackup {
    /// Database unit used when quantizing report geometry.
    grid_unit: Decimal,
    /// Layers sorted by stacking index, bottom first.
    layers: Vec<MetalLayer>,
}

impl Stackup {
    pub fn new(grid_unit: Decimal, mut layers: Vec<MetalLayer>) -> Self {
        layers.sort_by_key(|l| l.index);
        Self { grid_unit, layers }
    }

    #[inline]
    pub fn grid_unit(&self) -> Decimal {
        self.grid_unit
    }

    #[inline]
    pub fn layers(&self) -> &[MetalLayer] {
        &self.layers
    }

    /// Looks up a metal layer by name.
    pub fn metal(&self, name: &str) -> Result<&MetalLayer, StackupError> {
        self.layers
            .iter()
            .find(|l| l.name.as_str() == name)
            .ok_or_else(|| StackupError::LayerNotFound(name.to_string()))
    }

    /// Converts a micron value to integer database units, truncating toward
    /// zero as the report format requires.
    pub fn quantize(&self, value: Decimal) -> Result<i64, StackupError> {
        (value / self.grid_unit)
            .trunc()
            .to_i64()
            .ok_or(StackupError::Unquantizable {
                value,
                grid: self.grid_unit,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(pitch: Decimal, min_width: Decimal, min_spacing: Decimal) -> MetalLayer {
        MetalLayerBuilder::default()
            .name("M4")
            .index(4)
            .direction(Dir::Vert)
            .pitch(pitch)
            .offset(Decimal::ZERO)
            .min_width(min_width)
            .min_spacing(min_spacing)
            .grid_unit(dec!(0.001))
            .width_spacing(vec![
                WidthSpacingTuple {
                    width_at_least: Decimal::ZERO,
                    min_spacing,
                },
                WidthSpacingTuple {
                    width_at_least: dec!(1.0),
                    min_spacing: dec!(0.25),
                },
            ])
            .build()
            .unwrap()
    }

    #[test]
    fn spacing_table_lookup() {
        let l = layer(dec!(0.2), dec!(0.1), dec!(0.1));
        assert_eq!(l.spacing_for_width(dec!(0.5)), dec!(0.1));
        assert_eq!(l.spacing_for_width(dec!(1.0)), dec!(0.25));
        assert_eq!(l.spacing_for_width(dec!(3.0)), dec!(0.25));
    }

    #[test]
    fn max_width_from_pitch_fills_pitch_exactly() {
        let l = layer(dec!(0.2), dec!(0.1), dec!(0.1));
        for pitch in [dec!(0.4), dec!(2.0), dec!(3.7)] {
            let (spacing, width) = l.min_spacing_and_max_width_from_pitch(pitch);
            assert_eq!(width + spacing, pitch);
            assert_eq!(width, snap_down(width, l.grid_unit()));
            assert!(spacing >= l.min_spacing);
        }
    }

    #[test]
    fn max_width_from_pitch_respects_wide_wire_spacing() {
        let l = layer(dec!(0.2), dec!(0.1), dec!(0.1));
        // A 2.0um pitch yields a wire above the 1.0um table threshold, so the
        // 0.25um spacing applies rather than the 0.1um minimum.
        let (spacing, width) = l.min_spacing_and_max_width_from_pitch(dec!(2.0));
        assert_eq!(spacing, dec!(0.25));
        assert_eq!(width, dec!(1.75));
    }

    #[test]
    fn twt_consumes_tracks() {
        let l = layer(dec!(1.0), dec!(0.1), dec!(0.1));
        let (width, spacing, start) = l.width_spacing_start_twt(1);
        // Space between bounding signal wires is 2*1.0 - 0.1 = 1.9; the
        // resulting wire is above the 1.0um table threshold, so the 0.25um
        // spacing applies on both sides.
        assert_eq!(width, dec!(1.4));
        assert_eq!(spacing, dec!(0.25));
        assert_eq!(start, dec!(0.30));
    }

    #[test]
    fn twwt_force_even_drops_odd_widths() {
        let l = layer(dec!(0.056), dec!(0.028), dec!(0.028));
        let (width, _, _) = l.width_spacing_start_twwt(2, true);
        assert_eq!((width / l.grid_unit()) % dec!(2), Decimal::ZERO);
    }

    #[test]
    fn metal_lookup_by_name() {
        let s = Stackup::new(dec!(0.001), vec![layer(dec!(0.2), dec!(0.1), dec!(0.1))]);
        assert_eq!(s.metal("M4").unwrap().index(), 4);
        assert!(matches!(
            s.metal("M9"),
            Err(StackupError::LayerNotFound(_))
        ));
    }

    #[test]
    fn quantize_truncates_to_dbu() {
        let s = Stackup::new(dec!(0.001), vec![]);
        assert_eq!(s.quantize(dec!(1.7)).unwrap(), 1700);
        assert_eq!(s.quantize(dec!(0.0005)).unwrap(), 0);
    }
}
