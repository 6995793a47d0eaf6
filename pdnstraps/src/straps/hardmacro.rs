//! Hard macro conflict detection for generated power straps.
//!
//! Every resolved strap group is checked against the placed hard macro
//! inventory: instances that cannot make electrical contact with the straps
//! are reported before any vendor tool runs. Findings never abort
//! generation; a quantized record is kept for every eligible instance so the
//! abutment aggregator can reconstruct each master's strap interface.

use arcstr::ArcStr;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Diagnostic;
use crate::config::PowerStrapsConfig;
use crate::error::Result;
use crate::geom::{rem_euclid, Dir, Orientation, Rect};
use crate::placement::PlacementInventory;
use crate::stackup::{MetalLayer, Stackup};

/// One eligible (instance, strap group) pairing, with geometry quantized to
/// database units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardmacroStrapRecord {
    pub master: ArcStr,
    pub top_layer: ArcStr,
    pub path: ArcStr,
    pub orientation: Orientation,
    pub layer: ArcStr,
    pub direction: Dir,
    pub net_order: Vec<ArcStr>,
    pub width: i64,
    pub spacing: i64,
    pub group_pitch: i64,
    /// Group offset translated into the macro's local origin, modulo the
    /// group pitch.
    pub offset: i64,
}

/// The run-scoped record accumulator.
///
/// Created by the caller for each generation run, written only by the
/// conflict recorder, and drained exactly once by the abutment aggregator.
/// Sharing one accumulator across independent runs is a correctness bug;
/// owning it per run makes that impossible to do by accident.
#[derive(Debug, Default)]
pub struct HardmacroStrapRecords {
    records: Vec<HardmacroStrapRecord>,
}

impl HardmacroStrapRecords {
    pub fn push(&mut self, record: HardmacroStrapRecord) {
        self.records.push(record);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HardmacroStrapRecord> {
        self.records.iter()
    }

    /// Removes and returns all accumulated records.
    pub fn take(&mut self) -> Vec<HardmacroStrapRecord> {
        std::mem::take(&mut self.records)
    }
}

/// Resolved geometry of one strap group, as seen by the recorder.
pub struct StrapGroupGeometry<'a> {
    pub layer: &'a MetalLayer,
    /// Pitch between repetitions of the group.
    pub pitch: Decimal,
    pub width: Decimal,
    pub spacing: Decimal,
    /// Absolute offset of the first strap's lower edge.
    pub offset: Decimal,
    pub bbox: Option<Rect>,
    pub nets: &'a [ArcStr],
}

/// Evaluates every placed hard macro against one strap group.
///
/// Eligibility (instances failing any are silently skipped): a master is
/// set and allowed, the instance is not physical-only, a top layer is set,
/// and the strap layer is the top layer or the one immediately above it.
/// Eligible instances are then checked for bounding-box containment,
/// power-obstruction overlap, and group fit; failures are logged as
/// diagnostics, and a record is appended regardless of any raised.
pub fn record_straps_for_hardmacros(
    stackup: &Stackup,
    config: &PowerStrapsConfig,
    placement: &PlacementInventory,
    geometry: &StrapGroupGeometry,
    records: &mut HardmacroStrapRecords,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<()> {
    let check_abut = config.abutment;
    let layer = geometry.layer;

    for inst in &placement.hardmacros {
        let Some(master) = inst.master() else {
            continue;
        };
        if let Some(allowed) = &config.abutment_macros {
            if !allowed.contains(master) {
                continue;
            }
        }
        if inst.physical_only() {
            continue;
        }
        let Some(top_layer) = inst.top_layer() else {
            continue;
        };
        let top_index = stackup.metal(top_layer)?.index();
        if layer.index() < top_index || layer.index() > top_index + 1 {
            continue;
        }

        let extent = inst.extent();

        // Skip instances placed outside the generation area; straps will
        // never reach them.
        if let Some(bbox) = &geometry.bbox {
            let mut oob = inst.x() > bbox.x1 || inst.y() > bbox.y1;
            if let Some((ew, eh)) = extent {
                oob = oob || inst.x() + ew < bbox.x0 || inst.y() + eh < bbox.y0;
            }
            if oob {
                push(
                    diagnostics,
                    Diagnostic::OutOfBounds {
                        path: inst.path().clone(),
                        layer: layer.name().clone(),
                    },
                );
                continue;
            }
        }

        // The layer the macro actually connects through: its top layer when
        // abutting, otherwise the one above.
        let check_index = top_index + usize::from(!check_abut);

        if layer.index() == check_index {
            if let Some((ew, eh)) = extent {
                let inst_rect = Rect::new(inst.x(), inst.y(), inst.x() + ew, inst.y() + eh);
                for obs in placement.power_obstructions_on(layer.name()) {
                    if inst_rect.overlaps(obs.rect()) {
                        push(
                            diagnostics,
                            Diagnostic::Obstructed {
                                path: inst.path().clone(),
                                layer: layer.name().clone(),
                                obstruction: obs.path().clone(),
                            },
                        );
                    }
                }
            }
        }

        // Translate the group offset into the macro's local origin.
        let origin = match layer.direction() {
            Dir::Vert => inst.x(),
            Dir::Horiz => inst.y(),
        };
        let offset_trans = rem_euclid(geometry.offset - origin, geometry.pitch);

        // If the translated offset plus the group extent overruns the macro,
        // at least the last strap of the group misses it.
        let last_edge = offset_trans
            + Decimal::from(geometry.nets.len() as u64 - 1) * (geometry.width + geometry.spacing)
            + geometry.width;
        if let Some((ew, eh)) = extent {
            let span = match layer.direction() {
                Dir::Vert => ew,
                Dir::Horiz => eh,
            };
            if last_edge > span && layer.index() == check_index {
                let diag = if check_abut {
                    Diagnostic::CannotAbut {
                        path: inst.path().clone(),
                        layer: layer.name().clone(),
                    }
                } else {
                    Diagnostic::CannotViaDown {
                        path: inst.path().clone(),
                        layer: layer.name().clone(),
                    }
                };
                push(diagnostics, diag);
            }
        }

        records.push(HardmacroStrapRecord {
            master: master.clone(),
            top_layer: top_layer.clone(),
            path: inst.path().clone(),
            orientation: inst.orientation(),
            layer: layer.name().clone(),
            direction: layer.direction(),
            net_order: geometry.nets.to_vec(),
            width: stackup.quantize(geometry.width)?,
            spacing: stackup.quantize(geometry.spacing)?,
            group_pitch: stackup.quantize(geometry.pitch)?,
            offset: stackup.quantize(offset_trans)?,
        });
    }

    Ok(())
}

fn push(diagnostics: &mut Vec<Diagnostic>, diag: Diagnostic) {
    diag.log();
    diagnostics.push(diag);
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::geom::Dir;
    use crate::placement::{HardmacroInstance, Obstruction, ObstructionKind};
    use crate::stackup::{MetalLayerBuilder, Stackup};

    fn test_stackup() -> Stackup {
        let m4 = MetalLayerBuilder::default()
            .name("M4")
            .index(4)
            .direction(Dir::Vert)
            .pitch(dec!(1.0))
            .offset(dec!(0.0))
            .min_width(dec!(0.1))
            .min_spacing(dec!(0.1))
            .grid_unit(dec!(0.001))
            .build()
            .unwrap();
        let m5 = MetalLayerBuilder::default()
            .name("M5")
            .index(5)
            .direction(Dir::Horiz)
            .pitch(dec!(1.0))
            .offset(dec!(0.0))
            .min_width(dec!(0.1))
            .min_spacing(dec!(0.1))
            .grid_unit(dec!(0.001))
            .build()
            .unwrap();
        Stackup::new(dec!(0.001), vec![m4, m5])
    }

    fn geometry<'a>(
        stackup: &'a Stackup,
        layer: &str,
        nets: &'a [ArcStr],
        bbox: Option<Rect>,
    ) -> StrapGroupGeometry<'a> {
        StrapGroupGeometry {
            layer: stackup.metal(layer).unwrap(),
            pitch: dec!(10.0),
            width: dec!(1.0),
            spacing: dec!(0.5),
            offset: dec!(0.25),
            bbox,
            nets,
        }
    }

    fn macro_at(x: Decimal, y: Decimal) -> HardmacroInstance {
        HardmacroInstance::builder()
            .path("top/inst0")
            .master("sram")
            .x(x)
            .y(y)
            .width(dec!(20.0))
            .height(dec!(20.0))
            .top_layer("M4")
            .build()
            .unwrap()
    }

    #[test]
    fn eligible_instance_is_recorded_and_quantized() {
        let stackup = test_stackup();
        let config = PowerStrapsConfig::default();
        let placement = PlacementInventory {
            hardmacros: vec![macro_at(dec!(0), dec!(0))],
            obstructions: vec![],
        };
        let nets = [arcstr::literal!("VSS"), arcstr::literal!("VDD")];
        let mut records = HardmacroStrapRecords::default();
        let mut diagnostics = Vec::new();
        record_straps_for_hardmacros(
            &stackup,
            &config,
            &placement,
            &geometry(&stackup, "M4", &nets, None),
            &mut records,
            &mut diagnostics,
        )
        .unwrap();

        assert_eq!(records.len(), 1);
        assert!(diagnostics.is_empty());
        let record = records.iter().next().unwrap();
        assert_eq!(record.width, 1000);
        assert_eq!(record.spacing, 500);
        assert_eq!(record.group_pitch, 10000);
        assert_eq!(record.offset, 250);
        assert_eq!(record.direction, Dir::Vert);
    }

    #[test]
    fn physical_only_and_unset_masters_are_skipped() {
        let stackup = test_stackup();
        let config = PowerStrapsConfig::default();
        let placement = PlacementInventory {
            hardmacros: vec![
                HardmacroInstance::builder()
                    .path("top/phys")
                    .master("sram")
                    .x(dec!(0))
                    .y(dec!(0))
                    .top_layer("M4")
                    .physical_only(true)
                    .build()
                    .unwrap(),
                HardmacroInstance::builder()
                    .path("top/anon")
                    .x(dec!(0))
                    .y(dec!(0))
                    .top_layer("M4")
                    .build()
                    .unwrap(),
            ],
            obstructions: vec![],
        };
        let nets = [arcstr::literal!("VSS"), arcstr::literal!("VDD")];
        let mut records = HardmacroStrapRecords::default();
        let mut diagnostics = Vec::new();
        record_straps_for_hardmacros(
            &stackup,
            &config,
            &placement,
            &geometry(&stackup, "M4", &nets, None),
            &mut records,
            &mut diagnostics,
        )
        .unwrap();
        assert!(records.is_empty());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn out_of_bounds_instance_warns_and_is_skipped() {
        let stackup = test_stackup();
        let config = PowerStrapsConfig::default();
        let placement = PlacementInventory {
            hardmacros: vec![macro_at(dec!(100.0), dec!(0))],
            obstructions: vec![],
        };
        let nets = [arcstr::literal!("VSS"), arcstr::literal!("VDD")];
        let bbox = Some(Rect::new(dec!(0), dec!(0), dec!(50), dec!(50)));
        let mut records = HardmacroStrapRecords::default();
        let mut diagnostics = Vec::new();
        record_straps_for_hardmacros(
            &stackup,
            &config,
            &placement,
            &geometry(&stackup, "M4", &nets, bbox),
            &mut records,
            &mut diagnostics,
        )
        .unwrap();
        assert!(records.is_empty());
        assert!(matches!(
            diagnostics.as_slice(),
            [Diagnostic::OutOfBounds { .. }]
        ));
    }

    #[test]
    fn obstruction_overlap_logs_but_still_records() {
        let stackup = test_stackup();
        let config = PowerStrapsConfig::default();
        let placement = PlacementInventory {
            hardmacros: vec![macro_at(dec!(0), dec!(0))],
            obstructions: vec![Obstruction::builder()
                .path("obs0")
                .rect(Rect::new(dec!(5), dec!(5), dec!(15), dec!(15)))
                .layers(vec![arcstr::literal!("M4")])
                .kinds(vec![ObstructionKind::Power])
                .build()
                .unwrap()],
        };
        let nets = [arcstr::literal!("VSS"), arcstr::literal!("VDD")];
        let mut records = HardmacroStrapRecords::default();
        let mut diagnostics = Vec::new();
        record_straps_for_hardmacros(
            &stackup,
            &config,
            &placement,
            &geometry(&stackup, "M4", &nets, None),
            &mut records,
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(
            diagnostics.as_slice(),
            [Diagnostic::Obstructed { .. }]
        ));
    }

    #[test]
    fn group_overrun_reports_cannot_abut() {
        let stackup = test_stackup();
        let config = PowerStrapsConfig::default();
        // The group's last edge lands at 0.25 + 1.5 + 1.0 = 2.75, past the
        // 2.0um extent of this macro along the strap axis.
        let placement = PlacementInventory {
            hardmacros: vec![HardmacroInstance::builder()
                .path("top/narrow")
                .master("sram")
                .x(dec!(0))
                .y(dec!(0))
                .width(dec!(2.0))
                .height(dec!(20.0))
                .top_layer("M4")
                .build()
                .unwrap()],
            obstructions: vec![],
        };
        let nets = [arcstr::literal!("VSS"), arcstr::literal!("VDD")];
        let mut records = HardmacroStrapRecords::default();
        let mut diagnostics = Vec::new();
        record_straps_for_hardmacros(
            &stackup,
            &config,
            &placement,
            &geometry(&stackup, "M4", &nets, None),
            &mut records,
            &mut diagnostics,
        )
        .unwrap();
        // Recorded anyway: fit failures are advisory.
        assert_eq!(records.len(), 1);
        assert!(matches!(
            diagnostics.as_slice(),
            [Diagnostic::CannotAbut { .. }]
        ));
    }

    #[test]
    fn layers_above_the_connection_window_are_ignored() {
        let stackup = test_stackup();
        let config = PowerStrapsConfig {
            abutment: false,
            ..Default::default()
        };
        // With abutment off the checked layer is top + 1 = M5; straps on M4
        // are recorded but not fit-checked.
        let placement = PlacementInventory {
            hardmacros: vec![HardmacroInstance::builder()
                .path("top/narrow")
                .master("sram")
                .x(dec!(0))
                .y(dec!(0))
                .width(dec!(2.0))
                .height(dec!(20.0))
                .top_layer("M4")
                .build()
                .unwrap()],
            obstructions: vec![],
        };
        let nets = [arcstr::literal!("VSS"), arcstr::literal!("VDD")];
        let mut records = HardmacroStrapRecords::default();
        let mut diagnostics = Vec::new();
        record_straps_for_hardmacros(
            &stackup,
            &config,
            &placement,
            &geometry(&stackup, "M4", &nets, None),
            &mut records,
            &mut diagnostics,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert!(diagnostics.is_empty());
    }
}
