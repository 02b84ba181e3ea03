//! Shared data structures for the fetch attribution pipeline
//!
//! - `Coordinate`, `SiteKey`: where a measurement is taken and which
//!   sector set applies to it
//! - `Sample`: one measurement epoch handed over by the acquisition layer
//! - `CropLabel`, `FetchQc`: the two per-sample outcomes
//! - `AttributedSample`, `AttributedSeries`: pipeline output

mod coordinate;
mod site;
mod sample;
mod attributed;

pub use coordinate::*;
pub use site::*;
pub use sample::*;
pub use attributed::*;
