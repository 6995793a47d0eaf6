//! Geometric primitives for strap placement.
//!
//! All coordinates are exact decimal microns; conversion to integer database
//! units happens only at the report boundary.

use std::fmt::Display;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The routing direction of a metal layer or strap.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Dir {
    #[serde(rename = "horizontal")]
    Horiz,
    #[serde(rename = "vertical")]
    Vert,
}

/// Error from parsing a routing direction from a string.
#[derive(Debug, Error)]
#[error("error parsing direction `{0}`; expected `horizontal` or `vertical`")]
pub struct DirParseError(String);

impl FromStr for Dir {
    type Err = DirParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().trim() {
            "horiz" | "horizontal" => Ok(Self::Horiz),
            "vert" | "vertical" => Ok(Self::Vert),
            _ => Err(DirParseError(s.to_string())),
        }
    }
}

impl Display for Dir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Horiz => write!(f, "horizontal"),
            Self::Vert => write!(f, "vertical"),
        }
    }
}

/// The placed orientation of a hard macro instance.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    R0,
    R90,
    R180,
    R270,
    MX,
    MY,
}

/// Error from parsing an orientation from a string.
#[derive(Debug, Error)]
#[error("error parsing orientation `{0}`")]
pub struct OrientationParseError(String);

impl FromStr for Orientation {
    type Err = OrientationParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().trim() {
            "r0" => Ok(Self::R0),
            "r90" => Ok(Self::R90),
            "r180" => Ok(Self::R180),
            "r270" => Ok(Self::R270),
            "mx" => Ok(Self::MX),
            "my" => Ok(Self::MY),
            _ => Err(OrientationParseError(s.to_string())),
        }
    }
}

impl Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::R0 => "r0",
            Self::R90 => "r90",
            Self::R180 => "r180",
            Self::R270 => "r270",
            Self::MX => "mx",
            Self::MY => "my",
        };
        write!(f, "{s}")
    }
}

impl Orientation {
    /// Whether this orientation swaps an instance's width and height.
    #[inline]
    pub fn swaps_extent(&self) -> bool {
        matches!(self, Self::R90 | Self::R270)
    }

    /// Whether an instance in this orientation preserves the internal power
    /// grid of its master along straps running in direction `dir`.
    ///
    /// A mirror across the axis parallel to the strap direction flips the
    /// net ordering and breaks abutment; a mirror across the perpendicular
    /// axis does not.
    pub fn abuts(&self, dir: Dir) -> bool {
        match dir {
            Dir::Vert => matches!(self, Self::R0 | Self::MX),
            Dir::Horiz => matches!(self, Self::R0 | Self::MY),
        }
    }
}

/// An axis-aligned rectangle in micron space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: Decimal,
    pub y0: Decimal,
    pub x1: Decimal,
    pub y1: Decimal,
}

impl Rect {
    pub fn new(x0: Decimal, y0: Decimal, x1: Decimal, y1: Decimal) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Whether this rectangle overlaps `other` with nonzero area.
    pub fn overlaps(&self, other: &Rect) -> bool {
        !(self.x1 <= other.x0
            || other.x1 <= self.x0
            || self.y1 <= other.y0
            || other.y1 <= self.y0)
    }
}

/// Snaps `value` down to the nearest multiple of `grid`.
pub fn snap_down(value: Decimal, grid: Decimal) -> Decimal {
    (value / grid).floor() * grid
}

/// The non-negative remainder of `value` modulo `modulus`.
///
/// `modulus` must be positive.
pub fn rem_euclid(value: Decimal, modulus: Decimal) -> Decimal {
    let r = value % modulus;
    if r < Decimal::ZERO {
        r + modulus
    } else {
        r
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parse_and_display_directions() {
        assert_eq!("vertical".parse::<Dir>().unwrap(), Dir::Vert);
        assert_eq!("Horizontal".parse::<Dir>().unwrap(), Dir::Horiz);
        assert_eq!(Dir::Vert.to_string(), "vertical");
        assert!("diagonal".parse::<Dir>().is_err());
    }

    #[test]
    fn orientation_abutment_validity() {
        assert!(Orientation::R0.abuts(Dir::Vert));
        assert!(Orientation::MX.abuts(Dir::Vert));
        assert!(!Orientation::MY.abuts(Dir::Vert));
        assert!(Orientation::MY.abuts(Dir::Horiz));
        assert!(!Orientation::MX.abuts(Dir::Horiz));
        assert!(!Orientation::R90.abuts(Dir::Vert));
    }

    #[test]
    fn rect_overlap() {
        let a = Rect::new(dec!(0), dec!(0), dec!(10), dec!(10));
        let b = Rect::new(dec!(9), dec!(9), dec!(12), dec!(12));
        let c = Rect::new(dec!(10), dec!(0), dec!(20), dec!(10));
        assert!(a.overlaps(&b));
        // Shared edges do not count as overlap.
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn euclidean_remainder_is_nonnegative() {
        assert_eq!(rem_euclid(dec!(7.5), dec!(2.0)), dec!(1.5));
        assert_eq!(rem_euclid(dec!(-0.5), dec!(2.0)), dec!(1.5));
        assert_eq!(rem_euclid(dec!(-4.0), dec!(2.0)), dec!(0.0));
    }

    #[test]
    fn snap_down_to_grid() {
        assert_eq!(snap_down(dec!(1.2345), dec!(0.001)), dec!(1.234));
        assert_eq!(snap_down(dec!(1.234), dec!(0.001)), dec!(1.234));
    }
}
