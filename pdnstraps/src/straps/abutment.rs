//! Abutment aggregation and the `power_straps.json` report.
//!
//! Drains the hard macro strap records accumulated over one generation run
//! and folds them into a per-master report: for each master, the strap
//! parameters on its top layer (grouped by the majority-aligned offset) and,
//! when present, on the layer above. Instances that do not share the
//! majority offset or sit in a non-abutting orientation become numbered
//! variants of the master.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use arcstr::ArcStr;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use thiserror::Error;

use super::hardmacro::{HardmacroStrapRecord, HardmacroStrapRecords};
use super::Diagnostic;
use crate::error::Result;
use crate::geom::{Dir, Orientation};

/// An error type for abutment aggregation.
#[derive(Debug, Error)]
pub enum AbutmentError {
    #[error(
        "abutment checking is enabled, but multiple instances of the same hardmacro \
         are not placed on its top-layer power strap pitch or are mirrored across \
         the axis parallel to that layer's direction; adjust them for proper power \
         strap abutment or generate alternate versions of your hardmacros with \
         different top layer power patterns; offending masters and instances: {}",
        misaligned_summary(.0)
    )]
    Misaligned(Vec<(ArcStr, Vec<ArcStr>)>),
}

impl AbutmentError {
    /// The offending masters and their instance paths.
    pub fn misaligned(&self) -> &[(ArcStr, Vec<ArcStr>)] {
        match self {
            Self::Misaligned(m) => m,
        }
    }
}

pub(crate) fn misaligned_summary(masters: &[(ArcStr, Vec<ArcStr>)]) -> String {
    masters
        .iter()
        .map(|(master, paths)| format!("{master} [{}]", paths.iter().join(", ")))
        .join("; ")
}

/// The strap interface of one master on one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub layer: ArcStr,
    pub direction: Dir,
    pub net_order: Vec<ArcStr>,
    pub width: i64,
    pub spacing: i64,
    pub group_pitch: i64,
    /// Offset of the first strap from the macro origin. Absent on
    /// above-top-layer descriptors, where alignment is irrelevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    pub inst_paths: Vec<ArcStr>,
    pub inst_orientations: Vec<Orientation>,
}

impl GroupDescriptor {
    fn from_record(record: &HardmacroStrapRecord) -> Self {
        Self {
            layer: record.layer.clone(),
            direction: record.direction,
            net_order: record.net_order.clone(),
            width: record.width,
            spacing: record.spacing,
            group_pitch: record.group_pitch,
            offset: None,
            inst_paths: Vec::new(),
            inst_orientations: Vec::new(),
        }
    }
}

/// One report entry: a single master (possibly variant-suffixed) mapped to
/// its group descriptors, top layer first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MacroStraps {
    config: HashMap<ArcStr, Vec<GroupDescriptor>>,
}

impl MacroStraps {
    fn new(master: ArcStr, groups: Vec<GroupDescriptor>) -> Self {
        let mut config = HashMap::with_capacity(1);
        config.insert(master, groups);
        Self { config }
    }

    pub fn get(&self, master: &str) -> Option<&[GroupDescriptor]> {
        self.config.get(master).map(Vec::as_slice)
    }

    pub fn master(&self) -> Option<&ArcStr> {
        self.config.keys().next()
    }
}

/// The serialized abutment report, a list of single-entry master maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PowerStrapsReport {
    macros: Vec<MacroStraps>,
}

impl PowerStrapsReport {
    #[inline]
    pub fn len(&self) -> usize {
        self.macros.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &MacroStraps> {
        self.macros.iter()
    }

    /// The group descriptors for `master`, if it appears in the report.
    pub fn get_macro(&self, master: &str) -> Option<&[GroupDescriptor]> {
        self.macros.iter().find_map(|m| m.get(master))
    }

    /// Serializes the report with 4-space indentation, the format the
    /// downstream macro-integration tooling consumes.
    pub fn to_json_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        String::from_utf8(buf).map_err(|e| crate::error::Error::Internal(e.to_string()))
    }

    /// Writes `power_straps.json` to `path`.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Drains `records` and produces the per-master abutment report.
///
/// With `check_abut` set, any misaligned variant is fatal; otherwise the
/// misalignment is reported as a warning diagnostic and the report still
/// contains the variant entries.
pub(crate) fn aggregate(
    records: &mut HardmacroStrapRecords,
    check_abut: bool,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<PowerStrapsReport> {
    let records = records.take();
    let mut macros = Vec::new();
    let mut misaligned: Vec<(ArcStr, Vec<ArcStr>)> = Vec::new();

    // First-appearance order keeps reports byte-identical across reruns.
    let mut masters = Vec::new();
    let mut seen = HashSet::new();
    for record in &records {
        if seen.insert(record.master.clone()) {
            masters.push(record.master.clone());
        }
    }

    for master in masters {
        let insts: Vec<&HardmacroStrapRecord> =
            records.iter().filter(|r| r.master == master).collect();

        if insts.iter().map(|r| &r.top_layer).unique().count() > 1 {
            push(
                diagnostics,
                Diagnostic::InconsistentTopLayer {
                    master: master.clone(),
                },
            );
        }

        // Straps on the layer above the top layer: parameters only, offset
        // alignment does not apply.
        let above: Vec<&HardmacroStrapRecord> = insts
            .iter()
            .copied()
            .filter(|r| r.top_layer != r.layer)
            .collect();
        let above_template = above.first().map(|r| GroupDescriptor::from_record(r));
        if above.is_empty() && !insts.is_empty() && !check_abut {
            push(
                diagnostics,
                Diagnostic::SameLayerStraps {
                    master: master.clone(),
                    layer: insts[0].layer.clone(),
                },
            );
        }

        let mut abut: Vec<&HardmacroStrapRecord> = insts
            .iter()
            .copied()
            .filter(|r| r.top_layer == r.layer && r.orientation.abuts(r.direction))
            .collect();
        let mut bad_orient: Vec<&HardmacroStrapRecord> = insts
            .iter()
            .copied()
            .filter(|r| r.top_layer == r.layer && !r.orientation.abuts(r.direction))
            .collect();

        let mut variant = 0usize;
        while !abut.is_empty() || !bad_orient.is_empty() {
            // Majority offset among well-oriented instances first; once
            // those are exhausted, fall back to the badly oriented ones.
            let pool = if !abut.is_empty() {
                &mut abut
            } else {
                &mut bad_orient
            };
            let offset = mode_offset(pool);
            let (matched, rest): (Vec<_>, Vec<_>) =
                pool.iter().copied().partition(|r| r.offset == offset);
            *pool = rest;

            let paths: Vec<ArcStr> = matched.iter().map(|r| r.path.clone()).collect();
            let orientations: Vec<Orientation> =
                matched.iter().map(|r| r.orientation).collect();

            let name = if variant > 0 {
                match misaligned.iter_mut().find(|(m, _)| *m == master) {
                    Some((_, entry)) => entry.extend(paths.iter().cloned()),
                    None => misaligned.push((master.clone(), paths.clone())),
                }
                ArcStr::from(format!("{master}_{variant}"))
            } else {
                master.clone()
            };

            let mut desc = GroupDescriptor::from_record(matched[0]);
            desc.offset = Some(offset);
            desc.inst_paths = paths.clone();
            desc.inst_orientations = orientations.clone();

            let mut groups = vec![desc];
            if let Some(template) = &above_template {
                let mut above_desc = template.clone();
                above_desc.inst_paths = paths;
                above_desc.inst_orientations = orientations;
                groups.push(above_desc);
            }
            macros.push(MacroStraps::new(name, groups));

            variant += 1;
        }
    }

    if !misaligned.is_empty() {
        if check_abut {
            return Err(AbutmentError::Misaligned(misaligned).into());
        }
        push(diagnostics, Diagnostic::Misaligned { masters: misaligned });
    }

    Ok(PowerStrapsReport { macros })
}

/// The most frequent offset among `records`, breaking ties toward the
/// earliest-seen offset.
fn mode_offset(records: &[&HardmacroStrapRecord]) -> i64 {
    let mut counts: Vec<(i64, usize)> = Vec::new();
    for record in records {
        match counts.iter_mut().find(|(o, _)| *o == record.offset) {
            Some((_, count)) => *count += 1,
            None => counts.push((record.offset, 1)),
        }
    }
    let mut best = counts[0];
    for &(offset, count) in &counts[1..] {
        if count > best.1 {
            best = (offset, count);
        }
    }
    best.0
}

fn push(diagnostics: &mut Vec<Diagnostic>, diag: Diagnostic) {
    diag.log();
    diagnostics.push(diag);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        master: &str,
        path: &str,
        layer: &str,
        top_layer: &str,
        orientation: Orientation,
        offset: i64,
    ) -> HardmacroStrapRecord {
        HardmacroStrapRecord {
            master: ArcStr::from(master),
            top_layer: ArcStr::from(top_layer),
            path: ArcStr::from(path),
            orientation,
            layer: ArcStr::from(layer),
            direction: Dir::Vert,
            net_order: vec![arcstr::literal!("VSS"), arcstr::literal!("VDD")],
            width: 864,
            spacing: 288,
            group_pitch: 10752,
            offset,
        }
    }

    fn majority_records() -> HardmacroStrapRecords {
        let mut records = HardmacroStrapRecords::default();
        for i in 0..5 {
            records.push(record("X", &format!("top/a{i}"), "M4", "M4", Orientation::R0, 10));
        }
        for i in 0..3 {
            records.push(record("X", &format!("top/b{i}"), "M4", "M4", Orientation::R0, 20));
        }
        records
    }

    #[test]
    fn majority_offset_wins_and_minority_becomes_variant() {
        let mut records = majority_records();
        let mut diagnostics = Vec::new();
        let report = aggregate(&mut records, false, &mut diagnostics).unwrap();

        assert_eq!(report.len(), 2);
        let x = report.get_macro("X").unwrap();
        assert_eq!(x.len(), 1);
        assert_eq!(x[0].offset, Some(10));
        assert_eq!(x[0].inst_paths.len(), 5);

        let x1 = report.get_macro("X_1").unwrap();
        assert_eq!(x1[0].offset, Some(20));
        assert_eq!(x1[0].inst_paths.len(), 3);

        // Non-strict: the misalignment surfaces as a warning diagnostic.
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Misaligned { .. })));
        // The accumulator is drained.
        assert!(records.is_empty());
    }

    #[test]
    fn strict_checking_raises_aggregate_error_naming_offenders() {
        let mut records = majority_records();
        let mut diagnostics = Vec::new();
        let err = aggregate(&mut records, true, &mut diagnostics).unwrap_err();
        match err {
            crate::error::Error::Abutment(AbutmentError::Misaligned(masters)) => {
                assert_eq!(masters.len(), 1);
                assert_eq!(masters[0].0.as_str(), "X");
                assert_eq!(
                    masters[0].1,
                    vec![
                        ArcStr::from("top/b0"),
                        ArcStr::from("top/b1"),
                        ArcStr::from("top/b2")
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_orientation_instances_partition_after_aligned_ones() {
        let mut records = HardmacroStrapRecords::default();
        records.push(record("Y", "top/good", "M4", "M4", Orientation::R0, 10));
        // MY mirrors across the axis parallel to vertical straps.
        records.push(record("Y", "top/flipped", "M4", "M4", Orientation::MY, 10));
        let mut diagnostics = Vec::new();
        let report = aggregate(&mut records, false, &mut diagnostics).unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report.get_macro("Y").unwrap()[0].inst_paths[0].as_str(), "top/good");
        assert_eq!(
            report.get_macro("Y_1").unwrap()[0].inst_paths[0].as_str(),
            "top/flipped"
        );
    }

    #[test]
    fn above_layer_descriptor_is_appended() {
        let mut records = HardmacroStrapRecords::default();
        records.push(record("Z", "top/z0", "M4", "M4", Orientation::R0, 10));
        records.push(record("Z", "top/z0", "M5", "M4", Orientation::R0, 40));
        let mut diagnostics = Vec::new();
        let report = aggregate(&mut records, true, &mut diagnostics).unwrap();

        let z = report.get_macro("Z").unwrap();
        assert_eq!(z.len(), 2);
        assert_eq!(z[0].layer.as_str(), "M4");
        assert_eq!(z[0].offset, Some(10));
        assert_eq!(z[1].layer.as_str(), "M5");
        // Above-top-layer alignment is irrelevant, so no offset is reported.
        assert_eq!(z[1].offset, None);
    }

    #[test]
    fn inconsistent_top_layers_are_reported() {
        let mut records = HardmacroStrapRecords::default();
        records.push(record("W", "top/w0", "M4", "M4", Orientation::R0, 10));
        records.push(record("W", "top/w1", "M4", "M3", Orientation::R0, 10));
        let mut diagnostics = Vec::new();
        aggregate(&mut records, true, &mut diagnostics).unwrap();
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::InconsistentTopLayer { .. })));
    }

    #[test]
    fn same_layer_straps_without_abutment_checking_warns() {
        let mut records = HardmacroStrapRecords::default();
        records.push(record("V", "top/v0", "M4", "M4", Orientation::R0, 10));
        let mut diagnostics = Vec::new();
        aggregate(&mut records, false, &mut diagnostics).unwrap();
        assert!(diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::SameLayerStraps { .. })));
    }

    #[test]
    fn report_round_trips_through_json() {
        let mut records = majority_records();
        let mut diagnostics = Vec::new();
        let report = aggregate(&mut records, false, &mut diagnostics).unwrap();
        let json = report.to_json_string().unwrap();
        let parsed = PowerStrapsReport::from_json(&json).unwrap();
        assert_eq!(parsed, report);

        // Spot-check the consumer-facing shape: a list of single-entry maps
        // with snake_case strap fields.
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["X"][0]["group_pitch"], 10752);
        assert_eq!(value[0]["X"][0]["direction"], "vertical");
        assert_eq!(value[0]["X"][0]["inst_orientations"][0], "r0");
    }
}
