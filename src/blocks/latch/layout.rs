use arcstr::ArcStr;
use subgeom::Span;

use super::{FlopCore, LatchCore, StorageParams};
use crate::blocks::{draw_leaf_supplies, leaf_vm_track};
use crate::error::{Error, Result};
use crate::layout::grid::WireLookup;
use crate::layout::{LayoutCtx, TilePattern};

/// Which signal wire of a tile a pin defaults to.
#[derive(Debug, Copy, Clone)]
enum SigLoc {
    /// Counted from the nmos (bottom) side.
    N(usize),
    /// Counted from the pmos (top) side.
    P(usize),
}

const LATCH_HM_PINS: [(&str, SigLoc); 6] = [
    ("nclkb", SigLoc::N(0)),
    ("nclk", SigLoc::N(1)),
    ("nin", SigLoc::N(2)),
    ("pclkb", SigLoc::P(0)),
    ("pclk", SigLoc::P(1)),
    ("pin", SigLoc::P(2)),
];

const FLOP_SLAVE_HM_PINS: [(&str, SigLoc); 2] =
    [("nclkb_s", SigLoc::N(0)), ("pclk_s", SigLoc::P(1))];

const VM_PINS: [&str; 4] = ["in", "clk", "clkb", "out"];

fn hm_local(params: &StorageParams, lookup: &WireLookup, name: &str, loc: SigLoc) -> Result<i64> {
    if let Some(&idx) = params.sig_locs.get(name) {
        return Ok(idx);
    }
    let local = match loc {
        SigLoc::N(i) => lookup.n_sig(i),
        SigLoc::P(i) => lookup.p_sig(i),
    };
    local.map(|l| l as i64).ok_or(Error::ResourceExhausted {
        required: 3,
        available: lookup.sig,
    })
}

fn draw_hm_pins(
    ctx: &mut LayoutCtx,
    params: &StorageParams,
    pins: &[(&str, SigLoc)],
    span: Span,
) -> Result<()> {
    let hm = ctx.conn_layer() + 1;
    let lookup = ctx.tile(0)?.info.wires(hm);
    for &(name, loc) in pins {
        let local = hm_local(params, &lookup, name, loc)?;
        let tid = ctx.local_track(hm, local, 0)?;
        let wire = ctx.add_wire(tid, span)?;
        ctx.add_pin(ArcStr::from(name), [wire]);
    }
    Ok(())
}

fn draw_vm_pins(ctx: &mut LayoutCtx) -> Result<()> {
    let height = ctx.height();
    for (i, name) in VM_PINS.iter().enumerate() {
        let tid = leaf_vm_track(ctx, i, VM_PINS.len())?;
        let wire = ctx.add_wire(tid, Span::new(0, height))?;
        ctx.add_pin(*name, [wire]);
    }
    Ok(())
}

fn sch_params(params: &StorageParams) -> serde_json::Value {
    serde_json::json!({
        "seg_in": params.sizing.seg_in,
        "seg_fb": params.sizing.seg_fb,
        "seg_ck": params.sizing.seg_ck,
    })
}

impl LatchCore {
    pub(crate) fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        ctx.draw_base(&TilePattern::single(self.params.tile.clone()))?;
        ctx.set_num_cols(self.params.sizing.num_cols());

        let width = ctx.width();
        draw_hm_pins(ctx, &self.params, &LATCH_HM_PINS, Span::new(0, width))?;
        draw_vm_pins(ctx)?;
        draw_leaf_supplies(ctx, self.params.vertical_sup)?;
        ctx.set_sch_params(sch_params(&self.params));
        Ok(())
    }
}

impl FlopCore {
    pub(crate) fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        ctx.draw_base(&TilePattern::single(self.params.tile.clone()))?;
        ctx.set_num_cols(2 * self.params.sizing.num_cols());

        // Master latch on the left half, slave on the right.
        let width = ctx.width();
        draw_hm_pins(ctx, &self.params, &LATCH_HM_PINS, Span::new(0, width / 2))?;
        draw_hm_pins(
            ctx,
            &self.params,
            &FLOP_SLAVE_HM_PINS,
            Span::new(width / 2, width),
        )?;
        draw_vm_pins(ctx)?;
        draw_leaf_supplies(ctx, self.params.vertical_sup)?;
        ctx.set_sch_params(sch_params(&self.params));
        Ok(())
    }
}
