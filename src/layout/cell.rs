use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use subgeom::{Rect, Span};

use super::grid::{LayerId, TilePattern};
use super::wire::WireArray;
use crate::error::{Error, Result};

/// Maps child coordinates into parent coordinates.
///
/// Mirroring happens within the child's own bounding box, so a flipped
/// instance occupies the same region as an unflipped one.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Transform {
    pub dx: i64,
    pub dy: i64,
    pub width: i64,
    pub height: i64,
    pub flip_lr: bool,
    pub flip_ud: bool,
}

impl Transform {
    #[inline]
    pub fn x(&self, x: i64) -> i64 {
        if self.flip_lr {
            self.dx + self.width - x
        } else {
            self.dx + x
        }
    }

    #[inline]
    pub fn y(&self, y: i64) -> i64 {
        if self.flip_ud {
            self.dy + self.height - y
        } else {
            self.dy + y
        }
    }

    pub fn hspan(&self, span: Span) -> Span {
        Span::new(self.x(span.start()), self.x(span.stop()))
    }

    pub fn vspan(&self, span: Span) -> Span {
        Span::new(self.y(span.start()), self.y(span.stop()))
    }
}

/// Which part of a wire is marked as a pin.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    #[default]
    All,
    Lower,
    Upper,
    Middle,
}

impl PinMode {
    /// The pin shape of `wire` under this mode.
    pub fn pin_of(&self, wire: &WireArray) -> WireArray {
        let (lo, hi, mid) = (wire.lower(), wire.upper(), wire.middle());
        let quarter = (hi - lo) / 4;
        match self {
            PinMode::All => *wire,
            PinMode::Lower => wire.with_span(Span::new(lo, mid)),
            PinMode::Upper => wire.with_span(Span::new(mid, hi)),
            PinMode::Middle => wire.with_span(Span::new(mid - quarter, mid + quarter)),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Port {
    pub name: ArcStr,
    pub pins: Vec<WireArray>,
    /// Hidden ports are kept for connectivity but are not part of the
    /// public pin surface.
    pub hidden: bool,
    pub mode: PinMode,
}

impl Port {
    pub fn pins_on(&self, layer: LayerId) -> impl Iterator<Item = &WireArray> {
        self.pins.iter().filter(move |w| w.layer() == layer)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TapKind {
    /// A vertical supply tap column.
    Column,
    /// A substrate contact row spanning part of a supply tile.
    Contact,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tap {
    pub kind: TapKind,
    pub tile: usize,
    pub col: usize,
    pub ncols: usize,
}

/// A finished layout template.
pub struct Cell {
    pub(crate) name: ArcStr,
    pub(crate) num_cols: usize,
    pub(crate) width: i64,
    pub(crate) height: i64,
    pub(crate) tiles: TilePattern,
    pub(crate) ports: BTreeMap<ArcStr, Port>,
    pub(crate) instances: Vec<Instance>,
    pub(crate) wires: Vec<WireArray>,
    pub(crate) taps: Vec<Tap>,
    pub(crate) sch_params: serde_json::Value,
    pub(crate) metadata: Option<Arc<dyn Any + Send + Sync>>,
}

impl Cell {
    #[inline]
    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    #[inline]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    #[inline]
    pub fn width(&self) -> i64 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> i64 {
        self.height
    }

    #[inline]
    pub fn tiles(&self) -> &TilePattern {
        &self.tiles
    }

    pub fn port(&self, name: &str) -> Result<&Port> {
        self.ports
            .get(name)
            .ok_or_else(|| Error::PortNotFound(name.into()))
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.ports.contains_key(name)
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    /// Ports that are part of the public pin surface.
    pub fn visible_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values().filter(|p| !p.hidden)
    }

    #[inline]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    #[inline]
    pub fn wires(&self) -> &[WireArray] {
        &self.wires
    }

    #[inline]
    pub fn taps(&self) -> &[Tap] {
        &self.taps
    }

    /// The parameter record handed to the paired schematic generator.
    #[inline]
    pub fn sch_params(&self) -> &serde_json::Value {
        &self.sch_params
    }

    pub fn get_metadata<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.metadata.as_ref()?.downcast_ref::<T>()
    }

    pub fn bbox(&self) -> Rect {
        Rect::from_spans(Span::new(0, self.width), Span::new(0, self.height))
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("name", &self.name)
            .field("num_cols", &self.num_cols)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("ports", &self.ports.keys().collect::<Vec<_>>())
            .field("instances", &self.instances.len())
            .finish()
    }
}

/// A placed occurrence of a template.
#[derive(Debug, Clone)]
pub struct Instance {
    pub(crate) cell: Arc<Cell>,
    pub(crate) tile: usize,
    pub(crate) col: usize,
    pub(crate) xform: Transform,
}

impl Instance {
    #[inline]
    pub fn cell(&self) -> &Arc<Cell> {
        &self.cell
    }

    #[inline]
    pub fn tile(&self) -> usize {
        self.tile
    }

    #[inline]
    pub fn col(&self) -> usize {
        self.col
    }

    #[inline]
    pub fn num_cols(&self) -> usize {
        self.cell.num_cols
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.xform
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.cell.has_port(name)
    }

    pub fn port_names(&self) -> impl Iterator<Item = &ArcStr> {
        self.cell.ports.keys()
    }

    /// Gets a port, with its pins translated into parent coordinates.
    pub fn port(&self, name: &str) -> Result<Port> {
        let port = self.cell.port(name)?;
        Ok(Port {
            name: port.name.clone(),
            pins: port
                .pins
                .iter()
                .map(|w| w.transform(&self.xform))
                .collect(),
            hidden: port.hidden,
            mode: port.mode,
        })
    }

    pub fn pins(&self, name: &str) -> Result<Vec<WireArray>> {
        Ok(self.port(name)?.pins)
    }

    pub fn pins_on(&self, name: &str, layer: LayerId) -> Result<Vec<WireArray>> {
        Ok(self
            .pins(name)?
            .into_iter()
            .filter(|w| w.layer() == layer)
            .collect())
    }

    /// The first pin of a port.
    pub fn pin(&self, name: &str) -> Result<WireArray> {
        self.pins(name)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::PortNotFound(name.into()))
    }

    #[inline]
    pub fn left(&self) -> i64 {
        self.xform.dx
    }

    #[inline]
    pub fn right(&self) -> i64 {
        self.xform.dx + self.xform.width
    }

    pub fn bbox(&self) -> Rect {
        Rect::from_spans(
            Span::new(self.xform.dx, self.xform.dx + self.xform.width),
            Span::new(self.xform.dy, self.xform.dy + self.xform.height),
        )
    }
}
