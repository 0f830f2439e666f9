use subgeom::Span;

use crate::error::{Error, Result};
use crate::layout::{LayoutCtx, TrackId, TrackLocator, WireClass};

pub mod array;
pub mod demux;
pub mod inv_chain;
pub mod latch;
pub mod tree;

/// Draws the supply pins of a single-tile leaf cell.
///
/// Supplies sit on the `hm` supply tracks of tile 0 (`VSS` at the bottom,
/// `VDD` at the top), or on connection-layer stubs every other column when
/// `vertical_sup` is set.
pub(crate) fn draw_leaf_supplies(ctx: &mut LayoutCtx, vertical_sup: bool) -> Result<()> {
    let hm = ctx.conn_layer() + 1;
    let width = ctx.width();
    if vertical_sup {
        let conn = ctx.conn_layer();
        let cp = ctx.grid().col_pitch();
        let height = ctx.height();
        for (i, col) in (0..ctx.num_cols()).step_by(2).enumerate() {
            let tid =
                ctx.coord_to_track(conn, col as i64 * cp + cp / 2, TrackLocator::Nearest)?;
            let stub = ctx.add_wire(tid, Span::new(0, height))?;
            ctx.add_pin(if i % 2 == 0 { "VSS" } else { "VDD" }, [stub]);
        }
    } else {
        if ctx.num_wires(hm, WireClass::Sup, 0)? < 2 {
            return Err(Error::ResourceExhausted {
                required: 2,
                available: ctx.num_wires(hm, WireClass::Sup, 0)?,
            });
        }
        let vss = ctx.track_id(hm, WireClass::Sup, 0, 0)?;
        let vdd = ctx.track_id(hm, WireClass::Sup, 1, 0)?;
        let vss = ctx.add_wire(vss, Span::new(0, width))?;
        let vdd = ctx.add_wire(vdd, Span::new(0, width))?;
        ctx.add_pin("VSS", [vss]);
        ctx.add_pin("VDD", [vdd]);
    }
    Ok(())
}

/// The `n`-th of `count` evenly spread `vm` tracks inside a leaf cell.
pub(crate) fn leaf_vm_track(ctx: &LayoutCtx, n: usize, count: usize) -> Result<TrackId> {
    let vm = ctx.conn_layer() + 2;
    let pitch = ctx.grid().layer(vm)?.pitch;
    let avail = (ctx.width() / pitch) as usize;
    if avail < count {
        return Err(Error::ResourceExhausted {
            required: count,
            available: avail,
        });
    }
    let index = if n + 1 == count {
        avail - 1
    } else {
        n * avail / count
    };
    Ok(TrackId::new(vm, index as i64))
}
