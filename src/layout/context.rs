use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use arcstr::ArcStr;
use itertools::Itertools;
use subgeom::{Rect, Span};

use super::cell::{Cell, Instance, PinMode, Port, Tap, TapKind, Transform};
use super::db::{Component, TemplateDb};
use super::grid::{
    LayerId, PlacementGrid, RoutingDir, TileInfo, TilePattern, TrackLocator, WireClass,
};
use super::track::TrackId;
use super::wire::WireArray;
use crate::error::{Error, Result};

/// A tile of the base pattern, resolved against the grid.
#[derive(Debug, Clone)]
pub struct PlacedTile {
    pub info: TileInfo,
    pub flip: bool,
    /// Bottom edge of the tile.
    pub y0: i64,
}

/// Supply pins of a tap column.
#[derive(Debug, Clone)]
pub struct TapPins {
    pub vdd: Vec<WireArray>,
    pub vss: Vec<WireArray>,
    pub vdd_hm: WireArray,
    pub vss_hm: WireArray,
}

pub struct LayoutCtx<'a> {
    db: &'a mut TemplateDb,
    grid: Arc<PlacementGrid>,
    name: ArcStr,
    pattern: TilePattern,
    tiles: Vec<PlacedTile>,
    num_cols: usize,
    instances: Vec<Instance>,
    wires: Vec<WireArray>,
    ports: BTreeMap<ArcStr, Port>,
    taps: Vec<Tap>,
    sch_params: serde_json::Value,
    metadata: Option<Arc<dyn Any + Send + Sync>>,
}

impl<'a> LayoutCtx<'a> {
    pub(crate) fn new(db: &'a mut TemplateDb, name: ArcStr) -> Self {
        let grid = db.grid().clone();
        Self {
            db,
            grid,
            name,
            pattern: TilePattern::default(),
            tiles: Vec::new(),
            num_cols: 0,
            instances: Vec::new(),
            wires: Vec::new(),
            ports: BTreeMap::new(),
            taps: Vec::new(),
            sch_params: serde_json::Value::Null,
            metadata: None,
        }
    }

    #[inline]
    pub fn grid(&self) -> &PlacementGrid {
        &self.grid
    }

    #[inline]
    pub fn conn_layer(&self) -> LayerId {
        self.grid.conn_layer()
    }

    /// Sets up the tile stack of this cell.
    pub fn draw_base(&mut self, pattern: &TilePattern) -> Result<()> {
        if pattern.is_empty() {
            return Err(Error::InvalidParam(format!(
                "cell `{}` needs at least one tile",
                self.name
            )));
        }
        let mut y0 = 0;
        let mut tiles = Vec::with_capacity(pattern.len());
        for slot in pattern.slots() {
            let info = self.grid.tile(&slot.name)?.clone();
            let height = info.height;
            tiles.push(PlacedTile {
                info,
                flip: slot.flip,
                y0,
            });
            y0 += height;
        }
        self.pattern = pattern.clone();
        self.tiles = tiles;
        Ok(())
    }

    #[inline]
    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile(&self, idx: usize) -> Result<&PlacedTile> {
        self.tiles.get(idx).ok_or(Error::TileIndex(idx))
    }

    pub fn sub_pattern(&self, start: usize, end: usize) -> Result<TilePattern> {
        self.pattern.sub_pattern(start, end)
    }

    pub fn instantiate<C: Component>(&mut self, params: &C::Params) -> Result<Arc<Cell>> {
        self.db.instantiate::<C>(params)
    }

    /// Places `cell` with its left edge at column `col` and its bottom tile on
    /// tile `tile_idx`. The instance inherits the flip of that tile.
    pub fn add_tile(
        &mut self,
        cell: Arc<Cell>,
        tile_idx: usize,
        col: usize,
        flip_lr: bool,
    ) -> Result<Instance> {
        let end = tile_idx + cell.tiles().len();
        if end > self.tiles.len() {
            return Err(Error::TileIndex(end));
        }
        let tile = self.tile(tile_idx)?;
        let xform = Transform {
            dx: col as i64 * self.grid.col_pitch(),
            dy: tile.y0,
            width: cell.width(),
            height: cell.height(),
            flip_lr,
            flip_ud: tile.flip,
        };
        self.num_cols = self.num_cols.max(col + cell.num_cols());
        let inst = Instance {
            cell,
            tile: tile_idx,
            col,
            xform,
        };
        self.instances.push(inst.clone());
        Ok(inst)
    }

    #[inline]
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Grows the cell to at least `num_cols` columns.
    pub fn set_num_cols(&mut self, num_cols: usize) {
        self.num_cols = self.num_cols.max(num_cols);
    }

    #[inline]
    pub fn width(&self) -> i64 {
        self.num_cols as i64 * self.grid.col_pitch()
    }

    pub fn height(&self) -> i64 {
        self.tiles.iter().map(|t| t.info.height).sum()
    }

    pub fn bound_box(&self) -> Rect {
        Rect::from_spans(Span::new(0, self.width()), Span::new(0, self.height()))
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// The global track of a tile-local wire on a horizontal layer.
    pub fn local_track(&self, layer: LayerId, local: i64, tile_idx: usize) -> Result<TrackId> {
        let info = self.grid.layer(layer)?;
        if info.dir != RoutingDir::Horiz {
            return Err(Error::InvalidParam(format!(
                "tile tracks only exist on horizontal layers, layer {layer} is vertical"
            )));
        }
        let tile = self.tile(tile_idx)?;
        let index = if tile.flip {
            (tile.y0 + tile.info.height) / info.pitch - 1 - local
        } else {
            tile.y0 / info.pitch + local
        };
        Ok(TrackId::new(layer, index))
    }

    /// The track of the `idx`-th wire of a class in a tile.
    pub fn track_id(
        &self,
        layer: LayerId,
        class: WireClass,
        idx: usize,
        tile_idx: usize,
    ) -> Result<TrackId> {
        let lookup = self.tile(tile_idx)?.info.wires(layer);
        let local = lookup
            .local_index(class, idx)
            .ok_or(Error::ResourceExhausted {
                required: idx + 1,
                available: lookup.num_wires(class),
            })?;
        self.local_track(layer, local as i64, tile_idx)
    }

    pub fn num_wires(&self, layer: LayerId, class: WireClass, tile_idx: usize) -> Result<usize> {
        Ok(self.tile(tile_idx)?.info.wires(layer).num_wires(class))
    }

    pub fn coord_to_track(&self, layer: LayerId, coord: i64, loc: TrackLocator) -> Result<TrackId> {
        Ok(TrackId::new(
            layer,
            self.grid.coord_to_track(layer, coord, loc)?,
        ))
    }

    /// The track a wire is centered on.
    pub fn track_of(&self, wire: &WireArray) -> Result<TrackId> {
        self.coord_to_track(wire.layer(), wire.center(), TrackLocator::Nearest)
    }

    /// The next track one signal separation away, in the direction of `dir`.
    pub fn next_track(&self, tid: TrackId, dir: i64) -> Result<TrackId> {
        let sep = self.grid.layer(tid.layer)?.sep;
        Ok(tid.offset(dir.signum() * sep))
    }

    /// Connects wires on an adjacent layer to a track, returning the new wire.
    ///
    /// The input wires are extended to reach the track.
    pub fn connect_to_tracks(&mut self, wires: &[WireArray], tid: TrackId) -> Result<WireArray> {
        let layer = self.grid.layer(tid.layer)?.clone();
        let first = wires
            .first()
            .ok_or_else(|| Error::InvalidParam("no wires to connect".into()))?;
        for w in wires {
            if (w.layer() - tid.layer).abs() != 1 {
                return Err(Error::LayerMismatch {
                    from: w.layer(),
                    to: tid.layer,
                });
            }
        }
        let pad = self.grid.layer(first.layer())?.pitch / 2;
        let center = self.grid.track_coord(tid.layer, tid.index)?;
        let (lo, hi) = wires
            .iter()
            .map(|w| w.center())
            .minmax()
            .into_option()
            .unwrap_or((first.center(), first.center()));

        for w in wires {
            self.wires.push(w.covering(center));
        }
        let wire = WireArray::new(
            tid.layer,
            layer.dir,
            center,
            layer.line * tid.width as i64,
            Span::new(lo - pad, hi + pad),
        );
        self.wires.push(wire);
        Ok(wire)
    }

    /// Connects wires onto an existing orthogonal wire, extending it as needed.
    pub fn connect_to_track_wires(
        &mut self,
        wires: &[WireArray],
        target: &WireArray,
    ) -> Result<WireArray> {
        if wires.is_empty() {
            return Ok(*target);
        }
        let tid = self.track_of(target)?;
        let bridge = self.connect_to_tracks(wires, tid)?;
        let merged = target.extended(Some(bridge.lower()), Some(bridge.upper()));
        self.wires.push(merged);
        Ok(merged)
    }

    /// Merges collinear wires, optionally extending each result to `lower` and `upper`.
    ///
    /// Returns one wire per distinct (layer, track center), sorted by layer then center.
    pub fn connect_wires(
        &mut self,
        wires: &[WireArray],
        lower: Option<i64>,
        upper: Option<i64>,
    ) -> Vec<WireArray> {
        let merged = wires
            .iter()
            .sorted_by_key(|w| (w.layer(), w.center()))
            .group_by(|w| (w.layer(), w.center()))
            .into_iter()
            .map(|(_, group)| {
                let group = group.collect::<Vec<_>>();
                let lo = group.iter().map(|w| w.lower()).min();
                let hi = group.iter().map(|w| w.upper()).max();
                group[0]
                    .extended(lo, hi)
                    .extended(lower, upper)
            })
            .collect::<Vec<_>>();
        self.wires.extend(merged.iter().copied());
        merged
    }

    /// Draws a single-width wire on a track.
    pub fn add_wire(&mut self, tid: TrackId, span: Span) -> Result<WireArray> {
        let layer = self.grid.layer(tid.layer)?;
        let wire = WireArray::new(
            tid.layer,
            layer.dir,
            self.grid.track_coord(tid.layer, tid.index)?,
            layer.line * tid.width as i64,
            span,
        );
        self.wires.push(wire);
        Ok(wire)
    }

    pub fn extend_wire(&mut self, wire: &WireArray, lower: Option<i64>, upper: Option<i64>) -> WireArray {
        let out = wire.extended(lower, upper);
        self.wires.push(out);
        out
    }

    /// Stacks a wire through vias up to `target`, returning the top wire.
    ///
    /// Layers parallel to `wire` carry its full extent; perpendicular layers
    /// get a short stub at its midpoint.
    pub fn connect_via_stack(&mut self, wire: &WireArray, target: LayerId) -> Result<WireArray> {
        let mut cur = *wire;
        for id in (wire.layer() + 1)..=target {
            let layer = self.grid.layer(id)?.clone();
            let prev_pad = self.grid.layer(id - 1)?.pitch / 2;
            let next = if layer.dir == wire.dir() {
                let index = self
                    .grid
                    .coord_to_track(id, wire.center(), TrackLocator::Nearest)?;
                WireArray::new(
                    id,
                    layer.dir,
                    self.grid.track_coord(id, index)?,
                    layer.line,
                    wire.span(),
                )
            } else {
                let index = self
                    .grid
                    .coord_to_track(id, wire.middle(), TrackLocator::Nearest)?;
                WireArray::new(
                    id,
                    layer.dir,
                    self.grid.track_coord(id, index)?,
                    layer.line,
                    Span::new(cur.center() - prev_pad, cur.center() + prev_pad),
                )
            };
            self.wires.push(next);
            cur = next;
        }
        Ok(cur)
    }

    pub fn add_pin(&mut self, name: impl Into<ArcStr>, wires: impl IntoIterator<Item = WireArray>) {
        self.add_pin_with(name, wires, false, PinMode::All);
    }

    /// Adds pins to a port, creating it if necessary.
    ///
    /// A port stays hidden only if every contribution to it is hidden.
    pub fn add_pin_with(
        &mut self,
        name: impl Into<ArcStr>,
        wires: impl IntoIterator<Item = WireArray>,
        hidden: bool,
        mode: PinMode,
    ) {
        let name = name.into();
        let pins = wires.into_iter().map(|w| mode.pin_of(&w));
        match self.ports.get_mut(&name) {
            Some(port) => {
                port.pins.extend(pins);
                port.hidden &= hidden;
            }
            None => {
                self.ports.insert(
                    name.clone(),
                    Port {
                        name,
                        pins: pins.collect(),
                        hidden,
                        mode,
                    },
                );
            }
        }
    }

    /// Re-exports a child port, optionally under a new name or visibility.
    pub fn reexport(&mut self, port: Port, net_name: Option<&str>, hidden: Option<bool>) {
        let name = net_name.map(ArcStr::from).unwrap_or(port.name);
        let hidden = hidden.unwrap_or(port.hidden);
        self.add_pin_with(name, port.pins, hidden, port.mode);
    }

    pub fn has_port(&self, name: &str) -> bool {
        self.ports.contains_key(name)
    }

    fn sup_tracks(&self, tile_idx: usize) -> Result<(TrackId, TrackId)> {
        let hm = self.conn_layer() + 1;
        let lookup = self.tile(tile_idx)?.info.wires(hm);
        if lookup.sup < 2 {
            return Err(Error::ResourceExhausted {
                required: 2,
                available: lookup.sup,
            });
        }
        Ok((
            self.track_id(hm, WireClass::Sup, 1, tile_idx)?,
            self.track_id(hm, WireClass::Sup, 0, tile_idx)?,
        ))
    }

    fn conn_stub(&self, col: usize, tile_idx: usize) -> Result<WireArray> {
        let conn = self.conn_layer();
        let layer = self.grid.layer(conn)?;
        let tile = self.tile(tile_idx)?;
        let x = col as i64 * self.grid.col_pitch() + self.grid.col_pitch() / 2;
        let index = self.grid.coord_to_track(conn, x, TrackLocator::Nearest)?;
        Ok(WireArray::new(
            conn,
            RoutingDir::Vert,
            self.grid.track_coord(conn, index)?,
            layer.line,
            Span::new(tile.y0, tile.y0 + tile.info.height),
        ))
    }

    fn hm_stub(&self, tid: TrackId, col: usize, ncols: usize) -> Result<WireArray> {
        let layer = self.grid.layer(tid.layer)?;
        let cp = self.grid.col_pitch();
        Ok(WireArray::new(
            tid.layer,
            RoutingDir::Horiz,
            self.grid.track_coord(tid.layer, tid.index)?,
            layer.line,
            Span::new(col as i64 * cp, (col + ncols) as i64 * cp),
        ))
    }

    /// Adds a vertical supply tap column at `col` in a tile.
    pub fn add_tap(&mut self, col: usize, tile_idx: usize) -> Result<TapPins> {
        let ncols = self.grid.tap_ncols;
        let (vdd_tid, vss_tid) = self.sup_tracks(tile_idx)?;
        let vss = self.conn_stub(col, tile_idx)?;
        let vdd = self.conn_stub(col + ncols.saturating_sub(1), tile_idx)?;
        let vdd_hm = self.hm_stub(vdd_tid, col, ncols)?;
        let vss_hm = self.hm_stub(vss_tid, col, ncols)?;

        self.wires.extend([vdd, vss, vdd_hm, vss_hm]);
        self.taps.push(Tap {
            kind: TapKind::Column,
            tile: tile_idx,
            col,
            ncols,
        });
        self.num_cols = self.num_cols.max(col + ncols);
        Ok(TapPins {
            vdd: vec![vdd],
            vss: vec![vss],
            vdd_hm,
            vss_hm,
        })
    }

    /// Adds a substrate contact row across `ncols` columns of a supply tile.
    ///
    /// Returns the contact stubs on the connection layer.
    pub fn add_substrate_contact(
        &mut self,
        tile_idx: usize,
        col: usize,
        ncols: usize,
    ) -> Result<Vec<WireArray>> {
        let stubs = (col..col + ncols)
            .step_by(2)
            .map(|c| self.conn_stub(c, tile_idx))
            .collect::<Result<Vec<_>>>()?;
        self.wires.extend(stubs.iter().copied());
        self.taps.push(Tap {
            kind: TapKind::Contact,
            tile: tile_idx,
            col,
            ncols,
        });
        Ok(stubs)
    }

    pub fn set_sch_params(&mut self, params: serde_json::Value) {
        self.sch_params = params;
    }

    pub fn set_metadata<T: Any + Send + Sync>(&mut self, metadata: T) {
        self.metadata = Some(Arc::new(metadata));
    }

    pub(crate) fn finish(self) -> Cell {
        let width = self.width();
        let height = self.height();
        Cell {
            name: self.name,
            num_cols: self.num_cols,
            width,
            height,
            tiles: self.pattern,
            ports: self.ports,
            instances: self.instances,
            wires: self.wires,
            taps: self.taps,
            sch_params: self.sch_params,
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::grid::TileSlot;
    use crate::tests::test_grid;

    use super::*;

    fn two_tiles() -> TilePattern {
        TilePattern(vec![
            TileSlot {
                name: "logic".into(),
                flip: false,
            },
            TileSlot {
                name: "logic".into(),
                flip: true,
            },
        ])
    }

    #[test]
    fn test_track_id_respects_flip() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let mut ctx = LayoutCtx::new(&mut db, arcstr::literal!("test"));
        ctx.draw_base(&two_tiles()).unwrap();
        let hm = ctx.conn_layer() + 1;

        // 48 hm tracks per logic tile; the second tile is mirrored.
        let bot = ctx.track_id(hm, WireClass::Sig, 0, 0).unwrap();
        let top = ctx.track_id(hm, WireClass::Sig, 0, 1).unwrap();
        assert_eq!(bot.index, 1);
        assert_eq!(top.index, 96 - 1 - 1);

        let err = ctx.track_id(hm, WireClass::Clk, 0, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::ResourceExhausted {
                required: 1,
                available: 0
            }
        ));
    }

    #[test]
    fn test_connect_rejects_non_adjacent_layers() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let mut ctx = LayoutCtx::new(&mut db, arcstr::literal!("test"));
        ctx.draw_base(&TilePattern::single("logic")).unwrap();
        let conn = ctx.conn_layer();
        let vm = WireArray::new(conn + 2, RoutingDir::Vert, 250, 40, Span::new(0, 4_800));
        let err = ctx
            .connect_to_tracks(&[vm], TrackId::new(conn + 5, 3))
            .unwrap_err();
        assert!(matches!(err, Error::LayerMismatch { .. }));
    }

    #[test]
    fn test_connect_to_tracks_spans_wires() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let mut ctx = LayoutCtx::new(&mut db, arcstr::literal!("test"));
        ctx.draw_base(&TilePattern::single("logic")).unwrap();
        let vm = ctx.conn_layer() + 2;
        let wires = [
            WireArray::new(vm, RoutingDir::Vert, 250, 40, Span::new(0, 1_000)),
            WireArray::new(vm, RoutingDir::Vert, 850, 40, Span::new(0, 1_000)),
        ];
        let xm = ctx.track_id(vm + 1, WireClass::Sig, 0, 0).unwrap();
        let wire = ctx.connect_to_tracks(&wires, xm).unwrap();
        assert_eq!(wire.layer(), vm + 1);
        assert_eq!(wire.lower(), 200);
        assert_eq!(wire.upper(), 900);

        let merged = ctx.connect_wires(
            &[wire, wire.with_span(Span::new(1_000, 1_200))],
            Some(0),
            None,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].span(), Span::new(0, 1_200));
    }

    #[test]
    fn test_via_stack() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let mut ctx = LayoutCtx::new(&mut db, arcstr::literal!("test"));
        ctx.draw_base(&TilePattern::single("logic")).unwrap();
        let xm = ctx.conn_layer() + 3;
        let wire = WireArray::new(xm, RoutingDir::Horiz, 300, 100, Span::new(0, 2_000));
        let top = ctx.connect_via_stack(&wire, xm + 2).unwrap();
        assert_eq!(top.layer(), xm + 2);
        assert_eq!(top.span(), wire.span());
        // xxm pitch 400: tracks at 200, 600, ...
        assert_eq!(top.center(), 200);
    }
}
