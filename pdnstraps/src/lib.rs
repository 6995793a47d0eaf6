//! Power distribution network (PDN) strap synthesis.
//!
//! Converts coarse track-count directives ("use N routing tracks, domains
//! weighted X:Y") into exact strap geometry across a metal stackup, and
//! cross-checks the result against hard macro placement so power-delivery
//! failures are caught before they reach a vendor tool.

pub mod config;
pub mod error;
pub mod geom;
pub mod placement;
pub mod stackup;
pub mod straps;
