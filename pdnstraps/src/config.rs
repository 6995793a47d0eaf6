//! Power strap generation settings.
//!
//! Settings mirror the flow orchestrator's `par.power_straps` namespace:
//! a generation mode and method selector, the `by_tracks` options, and the
//! abutment-checking knobs. Per-layer values follow the override convention
//! of the settings resolver: a base value plus an optional per-metal-layer
//! override.

use std::collections::HashMap;
use std::fmt::Display;

use arcstr::ArcStr;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An error type for strap generation settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("power strap generation method `{0}` is not implemented")]
    UnsupportedMethod(String),

    #[error("number of power nets ({nets}) does not match number of weights ({weights})")]
    NetWeightMismatch { nets: usize, weights: usize },

    #[error("pin layer {0} must be in the power strap layers list")]
    PinLayerNotStrapLayer(ArcStr),

    #[error("power net `{0}` is not an independent power net of this design")]
    UnknownPowerNet(ArcStr),

    #[error("expected exactly one ground net, found {0}")]
    GroundNetCount(usize),

    #[error("power utilization for layer {layer} must be in (0, 1], got {value}")]
    InvalidUtilization { layer: ArcStr, value: Decimal },

    #[error("computed power strap track pitch for layer {0} is not a positive integer")]
    InvalidTrackPitch(ArcStr),

    #[error("resolved strap pitch must be greater than zero on layer {0}")]
    NonPositivePitch(ArcStr),

    #[error(
        "resolved strap width must be greater than zero on layer {0}; \
         you probably have a malformed width-spacing table for this layer"
    )]
    NonPositiveWidth(ArcStr),

    #[error(
        "resolved strap spacing must be greater than zero on layer {0}; \
         you probably have a malformed width-spacing table for this layer"
    )]
    NonPositiveSpacing(ArcStr),
}

/// The repeating arrangement of straps on one layer.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pattern {
    /// Parallel straps at a fixed group pitch.
    #[default]
    Uniform,
    /// Straps sized for a 50% duty-cycle mesh with the layers above/below.
    Mesh,
}

/// Strategy for trimming strap antennae.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntennaTrimShape {
    #[default]
    None,
    Stripe,
}

impl Display for AntennaTrimShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Stripe => write!(f, "stripe"),
        }
    }
}

/// Per-layer by-tracks options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerOptions {
    pub pattern: Pattern,
    /// Minimum spacing between a strap end and a macro or blockage.
    pub blockage_spacing: Decimal,
    /// Number of routing tracks a single strap consumes.
    pub track_width: u64,
    /// Number of usable routing tracks left between straps of a group.
    pub track_spacing: u64,
    /// Index of the first track to use for straps.
    pub track_start: u64,
    /// Absolute offset added on top of the track-derived position.
    pub track_offset: Decimal,
    /// Fraction of routing tracks consumed by power straps, in (0, 1].
    pub power_utilization: Decimal,
    pub antenna_trim_shape: AntennaTrimShape,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            pattern: Pattern::Uniform,
            blockage_spacing: Decimal::ZERO,
            track_width: 5,
            track_spacing: 0,
            track_start: 0,
            track_offset: Decimal::ZERO,
            power_utilization: dec!(0.1),
            antenna_trim_shape: AntennaTrimShape::None,
        }
    }
}

/// A partial [`LayerOptions`]; set fields replace the base value for one
/// specific metal layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerOptionsOverride {
    pub pattern: Option<Pattern>,
    pub blockage_spacing: Option<Decimal>,
    pub track_width: Option<u64>,
    pub track_spacing: Option<u64>,
    pub track_start: Option<u64>,
    pub track_offset: Option<Decimal>,
    pub power_utilization: Option<Decimal>,
    pub antenna_trim_shape: Option<AntennaTrimShape>,
}

impl LayerOptionsOverride {
    fn apply(&self, base: &LayerOptions) -> LayerOptions {
        LayerOptions {
            pattern: self.pattern.unwrap_or(base.pattern),
            blockage_spacing: self.blockage_spacing.unwrap_or(base.blockage_spacing),
            track_width: self.track_width.unwrap_or(base.track_width),
            track_spacing: self.track_spacing.unwrap_or(base.track_spacing),
            track_start: self.track_start.unwrap_or(base.track_start),
            track_offset: self.track_offset.unwrap_or(base.track_offset),
            power_utilization: self.power_utilization.unwrap_or(base.power_utilization),
            antenna_trim_shape: self.antenna_trim_shape.unwrap_or(base.antenna_trim_shape),
        }
    }
}

/// Options for the by-tracks generation method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ByTracksConfig {
    /// Strap layers, ordered bottom to top.
    pub strap_layers: Vec<ArcStr>,
    /// Layers on which straps also expose pins.
    pub pin_layers: Vec<ArcStr>,
    /// Whether to synthesize the standard cell rail group first.
    pub generate_rail_layer: bool,
    /// Restrict generation to these power nets; empty means all independent
    /// power nets.
    pub power_nets: Vec<ArcStr>,
    /// The layer the lowest strap layer vias down to: a metal layer name, or
    /// `"rail"` for the standard cell rail layer.
    pub bottom_via_layer: ArcStr,
    pub defaults: LayerOptions,
    /// Per-layer overrides, keyed by metal layer name.
    pub overrides: HashMap<ArcStr, LayerOptionsOverride>,
}

impl Default for ByTracksConfig {
    fn default() -> Self {
        Self {
            strap_layers: Vec::new(),
            pin_layers: Vec::new(),
            generate_rail_layer: true,
            power_nets: Vec::new(),
            bottom_via_layer: arcstr::literal!("rail"),
            defaults: LayerOptions::default(),
            overrides: HashMap::new(),
        }
    }
}

impl ByTracksConfig {
    /// Resolves the options for `layer`, applying any per-layer override.
    pub fn options_for(&self, layer: &str) -> LayerOptions {
        match self.overrides.get(layer) {
            Some(ovr) => ovr.apply(&self.defaults),
            None => self.defaults.clone(),
        }
    }

    /// The per-domain group pitch for `layer`, in routing tracks.
    ///
    /// Each power/ground pair consumes `2 * track_width + track_spacing`
    /// tracks (mesh sizing ignores the spacing); the pitch spreads that
    /// consumption to meet the requested utilization.
    pub fn group_track_pitch(&self, layer: &ArcStr) -> Result<u64, ConfigError> {
        let opts = self.options_for(layer);
        if opts.power_utilization <= Decimal::ZERO || opts.power_utilization > Decimal::ONE {
            return Err(ConfigError::InvalidUtilization {
                layer: layer.clone(),
                value: opts.power_utilization,
            });
        }
        let consumed = match opts.pattern {
            Pattern::Mesh => 2 * opts.track_width,
            Pattern::Uniform => 2 * opts.track_width + opts.track_spacing,
        };
        let pitch = (Decimal::from(consumed) / opts.power_utilization).round();
        pitch
            .to_u64()
            .filter(|&p| p > 0)
            .ok_or_else(|| ConfigError::InvalidTrackPitch(layer.clone()))
    }
}

/// Top-level power strap settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerStrapsConfig {
    /// `"empty"`, `"manual"`, or `"generate"`.
    pub mode: ArcStr,
    /// Script contents used verbatim under `"manual"` mode.
    pub script_contents: String,
    /// Generation method selector; only `"by_tracks"` is implemented.
    pub method: ArcStr,
    pub by_tracks: ByTracksConfig,
    /// Whether hard macro power straps must abut on the macro's top layer.
    pub abutment: bool,
    /// If set, only these masters participate in abutment recording.
    pub abutment_macros: Option<Vec<ArcStr>>,
    /// Highest metal layer of the standard cell rails.
    pub std_cell_rail_layer: ArcStr,
}

impl Default for PowerStrapsConfig {
    fn default() -> Self {
        Self {
            mode: arcstr::literal!("generate"),
            script_contents: String::new(),
            method: arcstr::literal!("by_tracks"),
            by_tracks: ByTracksConfig::default(),
            abutment: true,
            abutment_macros: None,
            std_cell_rail_layer: arcstr::literal!("M1"),
        }
    }
}

impl PowerStrapsConfig {
    /// Parses settings from TOML.
    pub fn from_toml(s: &str) -> crate::error::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}
