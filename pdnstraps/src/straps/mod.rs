//! Power strap synthesis.
//!
//! # Structure
//!
//! Straps are composed of repeating **groups**. Each group pairs the ground
//! net with one power net; multi-domain designs stripe their domains across
//! consecutive groups according to integer weights, so nets `[A, B]` with
//! weights `[2, 1]` produce the repeating pattern `[G,A], [G,A], [G,B]`.
//!
//! The [`by_tracks`] module sizes groups in units of each layer's routing
//! track pitch, walking the stackup bottom-up. As each group is resolved it
//! is checked against hard macro placement ([`hardmacro`]), and after all
//! layers the accumulated records are folded into the abutment report
//! ([`abutment`]).
//!
//! # Emission
//!
//! Resolved geometry is handed to a [`StrapEmitter`], which renders opaque
//! instruction strings for a downstream script emitter; vendor syntax is out
//! of scope here. The builder validates layer ordering itself before
//! delegating, so an emitter cannot bypass the bottom-up invariant.

use arcstr::ArcStr;
use derive_builder::Builder;
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use self::abutment::PowerStrapsReport;
use self::by_tracks::ByTracksRun;
use crate::config::{AntennaTrimShape, PowerStrapsConfig};
use crate::error::Result;
use crate::geom::{Dir, Rect};
use crate::placement::PlacementInventory;
use crate::stackup::Stackup;

pub mod abutment;
pub mod by_tracks;
pub mod hardmacro;

/// A power supply net.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct PowerNet {
    #[builder(setter(into))]
    name: ArcStr,
    /// Relative share of strap groups in multi-domain striping.
    #[builder(default = "1")]
    weight: u64,
    #[builder(default, setter(strip_option))]
    voltage: Option<Decimal>,
    #[builder(default)]
    pins: Vec<ArcStr>,
}

impl PowerNet {
    pub fn builder() -> PowerNetBuilder {
        PowerNetBuilder::default()
    }

    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    #[inline]
    pub fn weight(&self) -> u64 {
        self.weight
    }

    #[inline]
    pub fn voltage(&self) -> Option<Decimal> {
        self.voltage
    }

    #[inline]
    pub fn pins(&self) -> &[ArcStr] {
        &self.pins
    }
}

/// A ground net.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct GroundNet {
    #[builder(setter(into))]
    name: ArcStr,
    #[builder(default)]
    pins: Vec<ArcStr>,
}

impl GroundNet {
    pub fn builder() -> GroundNetBuilder {
        GroundNetBuilder::default()
    }

    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    #[inline]
    pub fn pins(&self) -> &[ArcStr] {
        &self.pins
    }
}

/// Fully resolved geometry for one strap group on one layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrapSpec {
    pub layer: ArcStr,
    pub direction: Dir,
    /// Lowest layer this group's straps via down to.
    pub bottom_via_layer: ArcStr,
    pub blockage_spacing: Decimal,
    /// Pitch between repetitions of this group.
    pub pitch: Decimal,
    pub width: Decimal,
    /// Spacing between adjacent straps within the group.
    pub spacing: Decimal,
    /// Absolute offset of the first strap's lower edge.
    pub offset: Decimal,
    pub bbox: Option<Rect>,
    /// Nets in lower-edge-first order.
    pub nets: Vec<ArcStr>,
    pub add_pins: bool,
    /// Whether this layer carries no signal routing.
    pub all_power: bool,
    pub antenna_trim_shape: AntennaTrimShape,
}

/// Resolved parameters for the standard cell rail straps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdCellRailSpec {
    pub layer: ArcStr,
    pub blockage_spacing: Decimal,
    pub bbox: Option<Rect>,
    /// Ground net first, then all power nets.
    pub nets: Vec<ArcStr>,
}

/// Emission strategy turning resolved strap geometry into instruction
/// strings.
///
/// The strap builder checks the bottom-up layer ordering before every call,
/// so implementations can assume specs arrive in non-decreasing stacking
/// order.
pub trait StrapEmitter {
    /// Renders commands realizing one strap group.
    fn emit_straps(&mut self, spec: &StrapSpec) -> Vec<String>;

    /// Renders commands building the standard cell power rails.
    fn emit_std_cell_rails(&mut self, rails: &StdCellRailSpec) -> Vec<String>;
}

/// The default tool-neutral emitter.
#[derive(Debug, Default)]
pub struct ScriptEmitter;

impl StrapEmitter for ScriptEmitter {
    fn emit_straps(&mut self, spec: &StrapSpec) -> Vec<String> {
        let mut cmd = format!(
            "add_power_straps -layer {} -direction {} -nets {{{}}} \
             -width {} -spacing {} -group_pitch {} -offset {} \
             -bottom_via_layer {} -blockage_spacing {} -antenna_trim {}",
            spec.layer,
            spec.direction,
            spec.nets.iter().join(" "),
            spec.width,
            spec.spacing,
            spec.pitch,
            spec.offset,
            spec.bottom_via_layer,
            spec.blockage_spacing,
            spec.antenna_trim_shape,
        );
        if spec.add_pins {
            cmd.push_str(" -pins");
        }
        if let Some(bbox) = &spec.bbox {
            cmd.push_str(&format!(
                " -area {{{} {} {} {}}}",
                bbox.x0, bbox.y0, bbox.x1, bbox.y1
            ));
        }
        vec![cmd]
    }

    fn emit_std_cell_rails(&mut self, rails: &StdCellRailSpec) -> Vec<String> {
        let mut cmd = format!(
            "add_std_cell_rails -layer {} -nets {{{}}} -blockage_spacing {}",
            rails.layer,
            rails.nets.iter().join(" "),
            rails.blockage_spacing,
        );
        if let Some(bbox) = &rails.bbox {
            cmd.push_str(&format!(
                " -area {{{} {} {} {}}}",
                bbox.x0, bbox.y0, bbox.x1, bbox.y1
            ));
        }
        vec![cmd]
    }
}

/// The severity of a collected diagnostic.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Severity {
    Warning,
    Error,
}

/// A non-fatal finding raised during generation.
///
/// Diagnostics are logged as they are raised and collected on the run
/// result; none of them abort generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// Strap density on a layer exceeds 85%.
    Density { layer: ArcStr, density: Decimal },
    /// A hard macro falls outside the strap bounding box.
    OutOfBounds { path: ArcStr, layer: ArcStr },
    /// A power obstruction overlaps a hard macro on the checked layer.
    Obstructed {
        path: ArcStr,
        layer: ArcStr,
        obstruction: ArcStr,
    },
    /// A full strap group does not fit on the macro's top layer.
    CannotAbut { path: ArcStr, layer: ArcStr },
    /// A full strap group does not fit on the layer above the macro.
    CannotViaDown { path: ArcStr, layer: ArcStr },
    /// Instances of one master disagree on their top layer.
    InconsistentTopLayer { master: ArcStr },
    /// Straps land on a macro's top layer with abutment checking disabled.
    SameLayerStraps { master: ArcStr, layer: ArcStr },
    /// Misaligned instances found with abutment checking disabled.
    Misaligned { masters: Vec<(ArcStr, Vec<ArcStr>)> },
    /// Unrecognized power straps mode; a blank script is used instead.
    InvalidMode { mode: String },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Density { .. } | Self::Misaligned { .. } | Self::InvalidMode { .. } => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }

    pub(crate) fn log(&self) {
        match self.severity() {
            Severity::Warning => log::warn!("{self}"),
            Severity::Error => log::error!("{self}"),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Density { layer, density } => write!(
                f,
                "{layer} power strap density is {density}%; check your technology's DRM \
                 to see if this violates maximum density rules"
            ),
            Self::OutOfBounds { path, layer } => write!(
                f,
                "hardmacro instance `{path}` is not placed within the power strap bounding \
                 box for layer {layer}; double check that you will supply power to it"
            ),
            Self::Obstructed {
                path,
                layer,
                obstruction,
            } => write!(
                f,
                "hardmacro instance `{path}` is partially or fully obstructed on layer \
                 {layer} by power obstruction `{obstruction}`; double check that you will \
                 supply power to it"
            ),
            Self::CannotAbut { path, layer } => write!(
                f,
                "hardmacro instance `{path}` is placed such that a full group of power \
                 straps on layer {layer} cannot abut it; double check your macro placement \
                 and size against the power strap group pitch"
            ),
            Self::CannotViaDown { path, layer } => write!(
                f,
                "hardmacro instance `{path}` is placed such that a full group of power \
                 straps on layer {layer} cannot via down to it; double check your macro \
                 placement and size against the power strap group pitch"
            ),
            Self::InconsistentTopLayer { master } => write!(
                f,
                "some instances of hardmacro {master} have conflicting top layer fields; \
                 check your placement constraints"
            ),
            Self::SameLayerStraps { master, layer } => write!(
                f,
                "abutment checking is disabled, but power straps for instances of module \
                 {master} are being generated on layer {layer}, which is the module's top \
                 layer; double check that you will supply power to these instances"
            ),
            Self::Misaligned { masters } => {
                write!(
                    f,
                    "instances of the following hardmacros are not placed on their top-layer \
                     power strap pitch or are mirrored across the axis parallel to that \
                     layer's direction: {}",
                    abutment::misaligned_summary(masters)
                )
            }
            Self::InvalidMode { mode } => write!(
                f,
                "invalid power straps mode `{mode}`; using a blank power straps script"
            ),
        }
    }
}

/// The outcome of one generation run.
#[derive(Debug, Clone)]
pub struct PdnRun {
    /// Ordered instruction strings for the downstream script emitter.
    pub commands: Vec<String>,
    /// The hard macro abutment report (`power_straps.json`).
    pub report: PowerStrapsReport,
    pub diagnostics: Vec<Diagnostic>,
}

impl PdnRun {
    fn script_only(commands: Vec<String>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            commands,
            report: PowerStrapsReport::default(),
            diagnostics,
        }
    }
}

/// Synthesizes the PDN for one block.
///
/// Owns no cross-run state: the hard macro record accumulator is created
/// inside each [`generate_power_straps`](Self::generate_power_straps) call,
/// so concurrent runs over different blocks cannot contaminate each other's
/// reports.
#[derive(Debug, Clone, Builder)]
pub struct PowerStrapGenerator<'a> {
    stackup: &'a Stackup,
    config: &'a PowerStrapsConfig,
    placement: &'a PlacementInventory,
    /// Independent power nets of the design.
    #[builder(default)]
    power_nets: Vec<PowerNet>,
    /// Independent ground nets; exactly one is supported.
    #[builder(default)]
    ground_nets: Vec<GroundNet>,
    /// Restricts generation to this area; absent means the entire core.
    #[builder(default)]
    bbox: Option<Rect>,
}

impl<'a> PowerStrapGenerator<'a> {
    pub fn builder() -> PowerStrapGeneratorBuilder<'a> {
        PowerStrapGeneratorBuilder::default()
    }

    /// Creates the power straps script for the configured mode.
    ///
    /// `"manual"` passes the configured script contents through verbatim,
    /// `"generate"` runs strap synthesis, and `"empty"` produces a blank
    /// script. Unknown modes warn and fall back to a blank script.
    pub fn create_power_straps(&self, emitter: &mut dyn StrapEmitter) -> Result<PdnRun> {
        match self.config.mode.as_str() {
            "manual" => {
                let mut commands = vec!["# Power straps script manually specified".to_string()];
                commands.extend(self.config.script_contents.lines().map(str::to_string));
                Ok(PdnRun::script_only(commands, Vec::new()))
            }
            "generate" => self.generate_power_straps(emitter),
            other => {
                let mut diagnostics = Vec::new();
                if other != "empty" {
                    let diag = Diagnostic::InvalidMode {
                        mode: other.to_string(),
                    };
                    diag.log();
                    diagnostics.push(diag);
                }
                Ok(PdnRun::script_only(
                    vec!["# Blank power straps script".to_string()],
                    diagnostics,
                ))
            }
        }
    }

    /// Runs strap synthesis with the configured generation method.
    pub fn generate_power_straps(&self, emitter: &mut dyn StrapEmitter) -> Result<PdnRun> {
        match self.config.method.as_str() {
            "by_tracks" => self.generate_by_tracks(emitter),
            other => Err(crate::config::ConfigError::UnsupportedMethod(other.to_string()).into()),
        }
    }

    fn generate_by_tracks(&self, emitter: &mut dyn StrapEmitter) -> Result<PdnRun> {
        use crate::config::ConfigError;

        let bt = &self.config.by_tracks;
        if self.ground_nets.len() != 1 {
            return Err(ConfigError::GroundNetCount(self.ground_nets.len()).into());
        }
        let ground = self.ground_nets[0].name.clone();

        let mut names: Vec<ArcStr> = self.power_nets.iter().map(|n| n.name.clone()).collect();
        if !bt.power_nets.is_empty() {
            for name in &bt.power_nets {
                if !names.contains(name) {
                    return Err(ConfigError::UnknownPowerNet(name.clone()).into());
                }
            }
            names = bt.power_nets.clone();
        }
        let weights = names
            .iter()
            .map(|name| {
                self.power_nets
                    .iter()
                    .find(|n| &n.name == name)
                    .map(|n| n.weight)
                    .ok_or_else(|| ConfigError::UnknownPowerNet(name.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let bottom_via_layer = if bt.bottom_via_layer.as_str() == "rail" {
            self.config.std_cell_rail_layer.clone()
        } else {
            bt.bottom_via_layer.clone()
        };

        ByTracksRun::new(self, ground, names, weights, bottom_via_layer).run(emitter)
    }

    #[inline]
    pub(crate) fn stackup(&self) -> &Stackup {
        self.stackup
    }

    #[inline]
    pub(crate) fn config(&self) -> &PowerStrapsConfig {
        self.config
    }

    #[inline]
    pub(crate) fn placement(&self) -> &PlacementInventory {
        self.placement
    }

    #[inline]
    pub(crate) fn bbox(&self) -> Option<Rect> {
        self.bbox
    }
}
