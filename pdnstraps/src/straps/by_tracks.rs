//! The by-tracks strap generation method.
//!
//! Sizes straps in units of each layer's native routing track pitch rather
//! than absolute dimensions, walking the stackup bottom-up so every layer
//! can via down to the one resolved before it.

use arcstr::ArcStr;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use super::hardmacro::{self, HardmacroStrapRecords, StrapGroupGeometry};
use super::{
    abutment, Diagnostic, PdnRun, PowerStrapGenerator, StdCellRailSpec, StrapEmitter, StrapSpec,
};
use crate::config::{ConfigError, Pattern};
use crate::error::Result;
use crate::geom::snap_down;
use crate::stackup::MetalLayer;

/// An error type for violations of the bottom-up layer discipline.
#[derive(Debug, Error)]
pub enum OrderingError {
    #[error(
        "power straps must be constructed bottom-up: layer {layer} (index {index}) \
         does not lie above {last} (index {last_index})"
    )]
    OutOfOrder {
        layer: ArcStr,
        index: usize,
        last: ArcStr,
        last_index: usize,
    },

    #[error(
        "layers {a} and {b} run in the same direction, but have no power straps \
         between them"
    )]
    SameDirection { a: ArcStr, b: ArcStr },

    #[error(
        "power strap emission for layer {layer} (index {index}) would fall below \
         the last emitted layer (index {last_index})"
    )]
    NonMonotonicEmission {
        layer: ArcStr,
        index: usize,
        last_index: usize,
    },
}

/// Per-group inputs for the track-to-geometry conversion.
struct GroupParams {
    bottom_via_layer: ArcStr,
    blockage_spacing: Decimal,
    /// Pitch between repetitions of this group, in routing tracks.
    group_track_pitch: u64,
    track_width: u64,
    track_spacing: u64,
    track_start: u64,
    /// Absolute offset of this group's track grid.
    track_offset: Decimal,
    nets: Vec<ArcStr>,
    add_pins: bool,
    layer_is_all_power: bool,
    pattern: Pattern,
    antenna_trim_shape: crate::config::AntennaTrimShape,
}

/// One by-tracks generation run.
///
/// Owns the run-scoped hard macro record accumulator and the collected
/// diagnostics; both live exactly as long as one invocation.
pub(crate) struct ByTracksRun<'a> {
    gen: &'a PowerStrapGenerator<'a>,
    ground_net: ArcStr,
    power_nets: Vec<ArcStr>,
    power_weights: Vec<u64>,
    bottom_via_layer: ArcStr,
    records: HardmacroStrapRecords,
    diagnostics: Vec<Diagnostic>,
    /// Stacking index of the last layer handed to the emitter.
    last_emitted: Option<usize>,
}

impl<'a> ByTracksRun<'a> {
    pub(crate) fn new(
        gen: &'a PowerStrapGenerator<'a>,
        ground_net: ArcStr,
        power_nets: Vec<ArcStr>,
        power_weights: Vec<u64>,
        bottom_via_layer: ArcStr,
    ) -> Self {
        Self {
            gen,
            ground_net,
            power_nets,
            power_weights,
            bottom_via_layer,
            records: HardmacroStrapRecords::default(),
            diagnostics: Vec::new(),
            last_emitted: None,
        }
    }

    /// Builds the full strap sequence bottom-up and aggregates the abutment
    /// report.
    pub(crate) fn run(mut self, emitter: &mut dyn StrapEmitter) -> Result<PdnRun> {
        let stackup = self.gen.stackup();
        let config = self.gen.config();
        let bt = &config.by_tracks;

        if self.power_nets.len() != self.power_weights.len() {
            return Err(ConfigError::NetWeightMismatch {
                nets: self.power_nets.len(),
                weights: self.power_weights.len(),
            }
            .into());
        }
        for pin_layer in &bt.pin_layers {
            if !bt.strap_layers.contains(pin_layer) {
                return Err(ConfigError::PinLayerNotStrapLayer(pin_layer.clone()).into());
            }
        }

        let mut commands = Vec::new();

        if bt.generate_rail_layer {
            let rail_name = config.std_cell_rail_layer.clone();
            let rail_layer = stackup.metal(&rail_name)?;
            let opts = bt.options_for(&rail_name);
            let mut nets = vec![self.ground_net.clone()];
            nets.extend(self.power_nets.iter().cloned());
            let rails = StdCellRailSpec {
                layer: rail_name,
                blockage_spacing: snap_down(opts.blockage_spacing, rail_layer.grid_unit()),
                bbox: self.gen.bbox(),
                nets,
            };
            self.check_emission_order(rail_layer)?;
            commands.extend(emitter.emit_std_cell_rails(&rails));
        }

        let mut last = stackup.metal(&self.bottom_via_layer)?;

        // Each power net repeats `weight` consecutive positions within the
        // striping period, e.g. weights [2, 1] on [A, B] yield A A B.
        let striped: Vec<ArcStr> = self
            .power_nets
            .iter()
            .zip(&self.power_weights)
            .flat_map(|(net, &w)| std::iter::repeat(net.clone()).take(w as usize))
            .collect();
        let sum_weights = striped.len() as u64;

        for layer_name in &bt.strap_layers {
            let layer = stackup.metal(layer_name)?;
            if layer.index() <= last.index() {
                return Err(OrderingError::OutOfOrder {
                    layer: layer.name().clone(),
                    index: layer.index(),
                    last: last.name().clone(),
                    last_index: last.index(),
                }
                .into());
            }
            // Adjacent same-direction layers would have no via path between
            // their straps.
            if layer.direction() == last.direction() {
                return Err(OrderingError::SameDirection {
                    a: last.name().clone(),
                    b: layer.name().clone(),
                }
                .into());
            }

            let opts = bt.options_for(layer_name);
            let track_pitch = bt.group_track_pitch(layer_name)?;
            let blockage_spacing = snap_down(opts.blockage_spacing, layer.grid_unit());
            let add_pins = bt.pin_layers.contains(layer_name);
            // If the power and ground tracks consume the entire pitch, the
            // layer carries no signals.
            let layer_is_all_power = 2 * opts.track_width == track_pitch;
            let group_pitch = sum_weights * track_pitch;

            for (i, power_net) in striped.iter().enumerate() {
                let group_offset = layer.offset()
                    + opts.track_offset
                    + Decimal::from(track_pitch * i as u64) * layer.pitch();
                let params = GroupParams {
                    bottom_via_layer: last.name().clone(),
                    blockage_spacing,
                    group_track_pitch: group_pitch,
                    track_width: opts.track_width,
                    track_spacing: opts.track_spacing,
                    track_start: opts.track_start,
                    track_offset: group_offset,
                    nets: vec![self.ground_net.clone(), power_net.clone()],
                    add_pins,
                    layer_is_all_power,
                    pattern: opts.pattern,
                    antenna_trim_shape: opts.antenna_trim_shape,
                };
                let spec = self.strap_spec_by_tracks(layer, params)?;
                self.check_emission_order(layer)?;
                commands.extend(emitter.emit_straps(&spec));
            }

            last = layer;
        }

        let report = abutment::aggregate(
            &mut self.records,
            config.abutment,
            &mut self.diagnostics,
        )?;

        Ok(PdnRun {
            commands,
            report,
            diagnostics: self.diagnostics,
        })
    }

    /// Converts one group's track settings into exact strap geometry.
    ///
    /// Forwards the resolved group to the hard macro conflict recorder
    /// before returning the spec.
    fn strap_spec_by_tracks(
        &mut self,
        layer: &MetalLayer,
        params: GroupParams,
    ) -> Result<StrapSpec> {
        let pitch = Decimal::from(params.group_track_pitch) * layer.pitch();
        if pitch <= Decimal::ZERO {
            return Err(ConfigError::NonPositivePitch(layer.name().clone()).into());
        }

        // Mesh straps are sized as if one signal track separated them, so
        // the TWT rule applies; the final spacing is overridden below.
        let track_spacing = match params.pattern {
            Pattern::Mesh => 1,
            Pattern::Uniform => params.track_spacing,
        };

        let (width, spacing, strap_start);
        if track_spacing == 0 {
            if params.layer_is_all_power {
                // Uniform duty cycle: derive the maximum width and minimum
                // spacing directly from one strap pitch.
                let one_strap_pitch = Decimal::from(params.track_width) * layer.pitch();
                let (s, w) = layer.min_spacing_and_max_width_from_pitch(one_strap_pitch);
                width = w;
                spacing = s;
                strap_start = s / dec!(2) + layer.offset();
            } else {
                let (w, s, start) = layer.width_spacing_start_twwt(params.track_width, true);
                width = w;
                spacing = s;
                strap_start = start;
            }
        } else {
            let (w, s, start) = layer.width_spacing_start_twt(params.track_width);
            width = w;
            strap_start = start;
            spacing = match params.pattern {
                Pattern::Mesh => pitch / dec!(2) - width,
                Pattern::Uniform => {
                    s * dec!(2)
                        + Decimal::from(track_spacing - 1) * layer.pitch()
                        + layer.min_width()
                }
            };
        }

        let offset =
            params.track_offset + Decimal::from(params.track_start) * layer.pitch() + strap_start;

        if width <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveWidth(layer.name().clone()).into());
        }
        if spacing <= Decimal::ZERO {
            return Err(ConfigError::NonPositiveSpacing(layer.name().clone()).into());
        }

        let density = Decimal::from(params.nets.len() as u64) * width / pitch * dec!(100);
        if density > dec!(85) {
            self.diag(Diagnostic::Density {
                layer: layer.name().clone(),
                density,
            });
        }

        let bbox = self.gen.bbox();
        hardmacro::record_straps_for_hardmacros(
            self.gen.stackup(),
            self.gen.config(),
            self.gen.placement(),
            &StrapGroupGeometry {
                layer,
                pitch,
                width,
                spacing,
                offset,
                bbox,
                nets: &params.nets,
            },
            &mut self.records,
            &mut self.diagnostics,
        )?;

        Ok(StrapSpec {
            layer: layer.name().clone(),
            direction: layer.direction(),
            bottom_via_layer: params.bottom_via_layer,
            blockage_spacing: params.blockage_spacing,
            pitch,
            width,
            spacing,
            offset,
            bbox,
            nets: params.nets,
            add_pins: params.add_pins,
            all_power: params.layer_is_all_power,
            antenna_trim_shape: params.antenna_trim_shape,
        })
    }

    /// Precondition for every emitter call: stacking indices never decrease.
    fn check_emission_order(&mut self, layer: &MetalLayer) -> Result<()> {
        if let Some(last_index) = self.last_emitted {
            if layer.index() < last_index {
                return Err(OrderingError::NonMonotonicEmission {
                    layer: layer.name().clone(),
                    index: layer.index(),
                    last_index,
                }
                .into());
            }
        }
        self.last_emitted = Some(layer.index());
        Ok(())
    }

    fn diag(&mut self, diag: Diagnostic) {
        diag.log();
        self.diagnostics.push(diag);
    }
}
