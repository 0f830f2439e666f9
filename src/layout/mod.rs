//! Placement and routing services used by the block generators.
//!
//! Geometry here is abstract: wires sit on tracks and instances sit on
//! tiles. Nothing is checked against design rules.

pub mod cell;
pub mod context;
pub mod db;
pub mod grid;
pub mod track;
pub mod wire;

pub use cell::{Cell, Instance, PinMode, Port};
pub use context::LayoutCtx;
pub use db::{Component, TemplateDb};
pub use grid::{LayerId, PlacementGrid, TilePattern, TrackLocator, WireClass};
pub use track::TrackId;
pub use wire::WireArray;
