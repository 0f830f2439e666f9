//! Placement grids: tiles, routing layers and track numbering.

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};
use subgeom::Dir;

use crate::error::{Error, Result};

pub type LayerId = i32;

/// The preferred routing direction of a layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDir {
    Horiz,
    Vert,
}

impl RoutingDir {
    #[inline]
    pub fn dir(&self) -> Dir {
        match self {
            RoutingDir::Horiz => Dir::Horiz,
            RoutingDir::Vert => Dir::Vert,
        }
    }
}

/// The purpose of a horizontal wire within a tile.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireClass {
    Sup,
    Sig,
    Clk,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TrackLocator {
    /// The track nearest a position.
    Nearest,
    /// The nearest track whose center lies strictly beyond a position.
    StartsBeyond,
    /// The nearest track whose center lies strictly before a position.
    EndsBefore,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LayerInfo {
    pub id: LayerId,
    pub dir: RoutingDir,
    /// Center-to-center distance between adjacent tracks.
    pub pitch: i64,
    /// Width of a single-track wire.
    pub line: i64,
    /// Minimum number of tracks between two signal wires.
    #[serde(default = "default_sep")]
    pub sep: i64,
}

fn default_sep() -> i64 {
    1
}

/// Number of horizontal wires of each class that a tile provides on one layer.
///
/// Wires are numbered from the bottom of an unflipped tile: the first supply
/// wire, then signal wires, then clock wires, then the remaining supply wires.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WireLookup {
    pub layer: LayerId,
    #[serde(default)]
    pub sup: usize,
    #[serde(default)]
    pub sig: usize,
    #[serde(default)]
    pub clk: usize,
}

impl WireLookup {
    pub fn num_wires(&self, class: WireClass) -> usize {
        match class {
            WireClass::Sup => self.sup,
            WireClass::Sig => self.sig,
            WireClass::Clk => self.clk,
        }
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.sup + self.sig + self.clk
    }

    /// The tile-local track index of the `idx`-th wire of the given class.
    pub fn local_index(&self, class: WireClass, idx: usize) -> Option<usize> {
        if idx >= self.num_wires(class) {
            return None;
        }
        let bot_sup = self.sup.min(1);
        Some(match class {
            WireClass::Sup if idx == 0 => 0,
            WireClass::Sup => bot_sup + self.sig + self.clk + idx - 1,
            WireClass::Sig => bot_sup + idx,
            WireClass::Clk => bot_sup + self.sig + idx,
        })
    }

    /// Local index of the `idx`-th signal wire counted from the bottom (nmos side).
    pub fn n_sig(&self, idx: usize) -> Option<usize> {
        self.local_index(WireClass::Sig, idx)
    }

    /// Local index of the `idx`-th signal wire counted from the top (pmos side).
    pub fn p_sig(&self, idx: usize) -> Option<usize> {
        if idx >= self.sig {
            return None;
        }
        self.local_index(WireClass::Sig, self.sig - 1 - idx)
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileKind {
    #[default]
    Logic,
    Ptap,
    Ntap,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TileInfo {
    pub name: ArcStr,
    #[serde(default)]
    pub kind: TileKind,
    pub height: i64,
    #[serde(default)]
    pub wires: Vec<WireLookup>,
}

impl TileInfo {
    pub fn wires(&self, layer: LayerId) -> WireLookup {
        self.wires
            .iter()
            .find(|w| w.layer == layer)
            .copied()
            .unwrap_or(WireLookup {
                layer,
                ..Default::default()
            })
    }
}

/// One row of a tile pattern.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TileSlot {
    pub name: ArcStr,
    #[serde(default)]
    pub flip: bool,
}

/// An ordered stack of tiles, bottom to top.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TilePattern(pub Vec<TileSlot>);

impl TilePattern {
    pub fn single(name: impl Into<ArcStr>) -> Self {
        Self(vec![TileSlot {
            name: name.into(),
            flip: false,
        }])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn slots(&self) -> &[TileSlot] {
        &self.0
    }

    /// The tiles `start..end`, with flips made relative to the first tile.
    ///
    /// The flip of the first tile is carried by the instance instead, so
    /// slices that only differ in orientation compare equal.
    pub fn sub_pattern(&self, start: usize, end: usize) -> Result<TilePattern> {
        if start >= end || end > self.len() {
            return Err(Error::TileIndex(end));
        }
        let base = self.0[start].flip;
        Ok(TilePattern(
            self.0[start..end]
                .iter()
                .map(|slot| TileSlot {
                    name: slot.name.clone(),
                    flip: slot.flip ^ base,
                })
                .collect(),
        ))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|slot| slot.name == name)
    }
}

/// The placement surface shared by every template of a compilation.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PlacementGrid {
    /// Width of one placement column.
    pub col_pitch: i64,
    /// The lowest (vertical) routing layer.
    pub conn_layer: LayerId,
    pub layers: Vec<LayerInfo>,
    pub tiles: Vec<TileInfo>,
    /// Columns between adjacent blocks.
    #[serde(default = "default_min_sep")]
    pub min_sep_col: usize,
    /// Columns between a block and a tap.
    #[serde(default = "default_min_sep")]
    pub sub_sep_col: usize,
    /// Width of a tap column.
    #[serde(default = "default_tap_ncols")]
    pub tap_ncols: usize,
}

fn default_min_sep() -> usize {
    2
}

fn default_tap_ncols() -> usize {
    4
}

impl PlacementGrid {
    pub fn validate(&self) -> Result<()> {
        if self.col_pitch <= 0 {
            return Err(Error::InvalidGrid("column pitch must be positive".into()));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            let expected = self.conn_layer + i as LayerId;
            if layer.id != expected {
                return Err(Error::InvalidGrid(format!(
                    "layers must be contiguous from layer {}, found layer {} at position {i}",
                    self.conn_layer, layer.id
                )));
            }
            let dir = if i % 2 == 0 {
                RoutingDir::Vert
            } else {
                RoutingDir::Horiz
            };
            if layer.dir != dir {
                return Err(Error::InvalidGrid(format!(
                    "layer {} must be {dir:?}; directions alternate starting with a vertical connection layer",
                    layer.id
                )));
            }
            if layer.pitch <= 0 || layer.line <= 0 || layer.sep <= 0 {
                return Err(Error::InvalidGrid(format!(
                    "layer {} must have positive pitch, line and separation",
                    layer.id
                )));
            }
        }
        for tile in self.tiles.iter() {
            for layer in self.layers.iter().filter(|l| l.dir == RoutingDir::Horiz) {
                if tile.height % layer.pitch != 0 {
                    return Err(Error::InvalidGrid(format!(
                        "height of tile `{}` is not a multiple of the pitch of layer {}",
                        tile.name, layer.id
                    )));
                }
            }
            for lookup in tile.wires.iter() {
                let layer = self.layer(lookup.layer)?;
                if layer.dir != RoutingDir::Horiz {
                    return Err(Error::InvalidGrid(format!(
                        "tile `{}` declares wires on vertical layer {}",
                        tile.name, layer.id
                    )));
                }
                if lookup.total() as i64 * layer.pitch > tile.height {
                    return Err(Error::InvalidGrid(format!(
                        "tile `{}` declares {} wires on layer {}, which do not fit",
                        tile.name,
                        lookup.total(),
                        layer.id
                    )));
                }
            }
        }
        Ok(())
    }

    #[inline]
    pub fn conn_layer(&self) -> LayerId {
        self.conn_layer
    }

    #[inline]
    pub fn col_pitch(&self) -> i64 {
        self.col_pitch
    }

    pub fn layer(&self, id: LayerId) -> Result<&LayerInfo> {
        self.layers
            .iter()
            .find(|l| l.id == id)
            .ok_or(Error::LayerNotFound(id))
    }

    pub fn is_horizontal(&self, id: LayerId) -> bool {
        match self.layer(id) {
            Ok(layer) => layer.dir == RoutingDir::Horiz,
            Err(_) => (id - self.conn_layer).rem_euclid(2) == 1,
        }
    }

    pub fn tile(&self, name: &str) -> Result<&TileInfo> {
        self.tiles
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::TileNotFound(name.into()))
    }

    /// The center coordinate of track `idx` on the given layer.
    pub fn track_coord(&self, id: LayerId, idx: i64) -> Result<i64> {
        let pitch = self.layer(id)?.pitch;
        Ok(idx * pitch + pitch / 2)
    }

    /// Gets the index of the track on the given layer nearest to `coord`.
    pub fn coord_to_track(&self, id: LayerId, coord: i64, loc: TrackLocator) -> Result<i64> {
        let pitch = self.layer(id)?.pitch;
        let rel = coord - pitch / 2;
        let q = rel.div_euclid(pitch);
        let r = rel.rem_euclid(pitch);
        Ok(match loc {
            TrackLocator::Nearest => {
                if 2 * r > pitch {
                    q + 1
                } else {
                    q
                }
            }
            TrackLocator::StartsBeyond => q + 1,
            TrackLocator::EndsBefore => {
                if r == 0 {
                    q - 1
                } else {
                    q
                }
            }
        })
    }

    /// Number of columns needed to clear `num_tracks` signal separations on a layer.
    ///
    /// Rounded up to an even number of columns.
    pub fn sep_cols(&self, id: LayerId, num_tracks: i64) -> Result<usize> {
        let layer = self.layer(id)?;
        let delta = layer.sep * layer.pitch * num_tracks;
        let cols = (delta + self.col_pitch - 1) / self.col_pitch;
        Ok((cols + cols % 2) as usize)
    }
}
