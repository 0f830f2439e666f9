use subgeom::Span;

use super::InvChain;
use crate::blocks::{draw_leaf_supplies, leaf_vm_track};
use crate::error::{Error, Result};
use crate::layout::{LayoutCtx, TilePattern, WireClass};

impl InvChain {
    pub(crate) fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        let params = &self.params;
        ctx.draw_base(&TilePattern::single(params.tile.clone()))?;
        ctx.set_num_cols(params.sizing.num_cols());

        let hm = ctx.conn_layer() + 1;
        let width = ctx.width();
        let height = ctx.height();

        let in_local = match params.sig_locs.get("nin0") {
            Some(&idx) => idx,
            None => {
                let lookup = ctx.tile(0)?.info.wires(hm);
                lookup.n_sig(0).ok_or(Error::ResourceExhausted {
                    required: 1,
                    available: lookup.num_wires(WireClass::Sig),
                })? as i64
            }
        };
        let in_tid = ctx.local_track(hm, in_local, 0)?;
        let in_hm = ctx.add_wire(in_tid, Span::new(0, width))?;
        ctx.add_pin("in", [in_hm]);

        let out_tid = leaf_vm_track(ctx, 1, 2)?;
        let out = ctx.add_wire(out_tid, Span::new(0, height))?;
        ctx.add_pin("out", [out]);
        if params.dual_output {
            let outb = if self.num_stages() > 1 {
                let tid = leaf_vm_track(ctx, 0, 2)?;
                ctx.add_wire(tid, Span::new(0, height))?
            } else {
                out
            };
            ctx.add_pin("outb", [outb]);
        }

        draw_leaf_supplies(ctx, params.vertical_sup)?;
        ctx.set_sch_params(serde_json::json!({
            "seg_list": params.sizing.seg_list,
            "dual_output": params.dual_output,
        }));
        Ok(())
    }
}
