use std::collections::BTreeMap;
use std::sync::Arc;

use arcstr::ArcStr;
use log::{debug, trace};
use serde_json::json;
use subgeom::Span;

use super::routing::{plan_slots, pool_size, split_pool, stage_of, RiserClaims};
use super::{BitHop, BitPath, DesBinaryTree, SignalRoute, TreeMetadata};
use crate::blocks::demux::{Demux1To2, DemuxMetadata, DemuxParams};
use crate::blocks::inv_chain::{InvChain, InvChainParams};
use crate::error::{Error, Result};
use crate::layout::{Cell, Instance, LayoutCtx, PinMode, TrackId, TrackLocator, WireArray, WireClass};

/// Connects vertical wires of net `net` to a horizontal signal track.
///
/// Tracks above `xm` are reached through the hand-off track on `xm` and a
/// `ym` riser next to each wire. Risers are claimed in `claims` so that no
/// two nets share a `ym` track or overlap on the hand-off track.
fn connect_sig_to_tid(
    ctx: &mut LayoutCtx,
    wires: &[WireArray],
    tid: TrackId,
    handoff: Option<TrackId>,
    claims: &mut RiserClaims,
    net: &str,
) -> Result<WireArray> {
    let xm_layer = ctx.conn_layer() + 3;
    if tid.layer <= xm_layer {
        return ctx.connect_to_tracks(wires, tid);
    }
    let handoff = handoff.ok_or_else(|| {
        Error::InvalidParam(format!(
            "track on layer {} needs a hand-off track on layer {xm_layer}",
            tid.layer
        ))
    })?;
    let ym_layer = xm_layer + 1;
    let width = ctx.width();
    let mut risers = Vec::with_capacity(wires.len());
    for w in wires {
        let pad = ctx.grid().layer(w.layer())?.pitch / 2;
        let stub_span = Span::new(w.center() - pad, w.center() + pad);
        let ym_idx = claims.claim(ctx.grid(), ym_layer, net, stub_span, width)?;
        let stub = ctx.connect_to_tracks(&[*w], handoff)?;
        risers.push(ctx.connect_to_tracks(&[stub], TrackId::new(ym_layer, ym_idx))?);
    }
    ctx.connect_to_tracks(&risers, tid)
}

/// Merges wires that share a track into one.
fn merge_on_track(
    ctx: &mut LayoutCtx,
    wires: &[WireArray],
    lower: Option<i64>,
    upper: Option<i64>,
) -> Result<WireArray> {
    let merged = ctx.connect_wires(wires, lower, upper);
    match merged.as_slice() {
        [wire] => Ok(*wire),
        _ => Err(Error::StructuralMismatch(format!(
            "expected wires on one track, found {} tracks",
            merged.len()
        ))),
    }
}

/// Name of output `bit` of stage `stage`.
fn stage_net(stage: usize, bit: usize, num_stages: usize) -> String {
    if stage + 1 == num_stages {
        format!("dout<{bit}>")
    } else {
        format!("dmid_{stage}<{bit}>")
    }
}

fn route(ctx: &LayoutCtx, net: impl Into<ArcStr>, slot: usize, wire: &WireArray) -> Result<SignalRoute> {
    Ok(SignalRoute {
        net: net.into(),
        slot,
        layer: wire.layer(),
        track: ctx.track_of(wire)?.index,
        lower: wire.lower(),
        upper: wire.upper(),
    })
}

impl DesBinaryTree {
    pub(crate) fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        let params = &self.params;
        let tree = &params.tree;
        ctx.draw_base(&params.pinfo)?;

        let num_stages = tree.num_stages;
        let ratio = self.ratio();
        let conn_layer = ctx.conn_layer();
        let hm_layer = conn_layer + 1;
        let vm_layer = hm_layer + 1;
        let xm_layer = vm_layer + 1;
        let xxm_layer = xm_layer + 2;
        let logic_tidx = params.logic_tidx;
        let export_nets = tree.export_nets;
        let sup_tiles = params.ptap_tidx.zip(params.ntap_tidx);
        let draw_rows = params.draw_taps && sup_tiles.is_some();
        let draw_cols = params.draw_taps && sup_tiles.is_none();
        let tap_sep_unit = match tree.tap_sep_unit {
            Some(n) if n > 0 => n,
            _ => (ratio >> 1).max(1),
        };

        // --- Create templates --- //
        let din_buf_master = match &tree.din_buf {
            Some(sizing) => Some(ctx.instantiate::<InvChain>(&InvChainParams {
                tile: self.logic_tile.clone(),
                sizing: sizing.clone(),
                dual_output: false,
                sig_locs: BTreeMap::new(),
                vertical_sup: sup_tiles.is_some(),
            })?),
            None => None,
        };
        let mut demux_masters: BTreeMap<bool, Arc<Cell>> = BTreeMap::new();
        for &use_ff in self.use_ff.iter() {
            if demux_masters.contains_key(&use_ff) {
                continue;
            }
            let master = ctx.instantiate::<Demux1To2>(&DemuxParams {
                tile: self.logic_tile.clone(),
                sizing: tree.demux.clone(),
                use_ff,
                is_big_endian: tree.is_big_endian,
                export_nets,
                connect_in: false,
                vertical_sup: sup_tiles.is_some(),
            })?;
            demux_masters.insert(use_ff, master);
        }

        // --- Placement --- //
        let blk_sp = ctx.grid().min_sep_col;
        let sub_sep = ctx.grid().sub_sep_col;
        let tap_ncols = ctx.grid().tap_ncols;
        let mut vdd_conn = Vec::new();
        let mut vss_conn = Vec::new();
        let mut vdd_hm = Vec::new();
        let mut vss_hm = Vec::new();
        let mut cur_col = 0;

        let mut add_tap = |ctx: &mut LayoutCtx, col: usize| -> Result<()> {
            let tap = ctx.add_tap(col, logic_tidx)?;
            vdd_conn.extend(tap.vdd);
            vss_conn.extend(tap.vss);
            vdd_hm.push(tap.vdd_hm);
            vss_hm.push(tap.vss_hm);
            Ok(())
        };

        if draw_cols {
            add_tap(ctx, cur_col)?;
            cur_col += tap_ncols + sub_sep;
        }

        let din_buf_inst = match din_buf_master {
            Some(master) => {
                // Leave room for the input track left of the buffer.
                cur_col += ctx.grid().sep_cols(vm_layer, 1)?;
                let ncols = master.num_cols();
                let inst = ctx.add_tile(master, logic_tidx, cur_col, false)?;
                cur_col += ncols;
                Some(inst)
            }
            None => None,
        };

        // Units in breadth-first order, so each stage occupies a contiguous range.
        let mut demux_insts: Vec<Instance> = Vec::with_capacity(ratio - 1);
        for unit_idx in 0..ratio - 1 {
            if unit_idx > 0 && unit_idx % tap_sep_unit == 0 && draw_cols {
                cur_col += sub_sep;
                add_tap(ctx, cur_col)?;
                cur_col += tap_ncols + sub_sep;
            } else {
                cur_col += blk_sp;
            }
            let use_ff = self.use_ff[stage_of(unit_idx)];
            let master = demux_masters
                .get(&use_ff)
                .cloned()
                .ok_or_else(|| Error::StructuralMismatch("missing demux template".into()))?;
            let ncols = master.num_cols();
            demux_insts.push(ctx.add_tile(master, logic_tidx, cur_col, false)?);
            cur_col += ncols;
        }

        if draw_cols {
            cur_col += sub_sep;
            add_tap(ctx, cur_col)?;
        }

        if let (true, Some((ptap, ntap))) = (draw_rows, sup_tiles) {
            let ncols = ctx.num_cols();
            vss_conn.extend(ctx.add_substrate_contact(ptap, 0, ncols)?);
            vdd_conn.extend(ctx.add_substrate_contact(ntap, 0, ncols)?);
        }
        let width = ctx.width();

        // --- Routing --- //
        let required = pool_size(num_stages);
        let n_xm = ctx.num_wires(xm_layer, WireClass::Sig, logic_tidx)?;
        let n_xxm = if tree.num_sig_hor_layers == 2 {
            ctx.num_wires(xxm_layer, WireClass::Sig, logic_tidx)?
        } else {
            0
        };
        let pool = split_pool(required, n_xm, n_xxm, tree.num_sig_hor_layers)?;
        debug!(
            "ratio {ratio} tree uses {} xm and {} xxm data tracks (hand-off: {})",
            pool.xm, pool.xxm, pool.handoff
        );

        let mut sig_tids = (0..pool.xm)
            .map(|i| ctx.track_id(xm_layer, WireClass::Sig, i, logic_tidx))
            .collect::<Result<Vec<_>>>()?;
        let handoff = if pool.handoff {
            Some(ctx.track_id(xm_layer, WireClass::Sig, n_xm - 1, logic_tidx)?)
        } else {
            None
        };
        for i in 0..pool.xxm {
            sig_tids.push(ctx.track_id(xxm_layer, WireClass::Sig, i, logic_tidx)?);
        }
        let clk_tid = ctx.track_id(xm_layer, WireClass::Clk, 0, logic_tidx)?;
        let plan = plan_slots(num_stages, pool.size())?;
        let mut routes = Vec::new();
        let mut claims = RiserClaims::default();

        // Input
        let in_tid = sig_tids[plan.input];
        let root = &demux_insts[0];
        let root_net = if din_buf_inst.is_some() { "din_buf" } else { "din" };
        let root_in = connect_sig_to_tid(
            ctx,
            &root.pins("in")?,
            in_tid,
            handoff,
            &mut claims,
            root_net,
        )?;
        let din = match &din_buf_inst {
            Some(buf) => {
                let buf_out = connect_sig_to_tid(
                    ctx,
                    &[buf.pin("out")?],
                    in_tid,
                    handoff,
                    &mut claims,
                    "din_buf",
                )?;
                let din_buf = merge_on_track(ctx, &[root_in, buf_out], None, None)?;
                ctx.add_pin_with("din_buf", [din_buf], !export_nets, PinMode::All);
                routes.push(route(ctx, "din_buf", plan.input, &din_buf)?);

                let vm_tid = ctx.coord_to_track(vm_layer, buf.left(), TrackLocator::Nearest)?;
                let vm_tid = ctx.next_track(vm_tid, -1)?;
                let din_vm = ctx.connect_to_tracks(&[buf.pin("in")?], vm_tid)?;
                ctx.add_pin_with("din_vm", [din_vm], true, PinMode::All);
                connect_sig_to_tid(ctx, &[din_vm], in_tid, handoff, &mut claims, "din")?
            }
            None => {
                ctx.reexport(root.port("in")?, Some("din_vm"), Some(true));
                root_in
            }
        };
        let din = ctx.extend_wire(&din, Some(0), None);
        ctx.add_pin("din", [din]);
        routes.push(route(ctx, "din", plan.input, &din)?);

        // Stages
        let mut prev_out: Vec<WireArray> = Vec::new();
        let mut prev_slots: Vec<usize> = Vec::new();
        let mut unit_start = 0;
        for (stage, out_slots) in plan.stages.iter().enumerate() {
            let num_units = 1 << stage;
            let units = &demux_insts[unit_start..unit_start + num_units];
            let mut out_warrs = vec![None; 2 * num_units];
            let mut out_bit_slots = vec![0; 2 * num_units];

            for (idx, inst) in units.iter().enumerate() {
                for side in 0..2 {
                    let bit = idx + side * num_units;
                    let slot = out_slots[2 * idx + side];
                    let pin = inst.pin(&format!("out<{side}>"))?;
                    let net = stage_net(stage, bit, num_stages);
                    out_warrs[bit] = Some(connect_sig_to_tid(
                        ctx,
                        &[pin],
                        sig_tids[slot],
                        handoff,
                        &mut claims,
                        &net,
                    )?);
                    out_bit_slots[bit] = slot;
                }

                if stage > 0 {
                    let prev = prev_out[idx];
                    let prev_tid = ctx.track_of(&prev)?;
                    let in_pins = inst.pins("in")?;
                    let net = stage_net(stage - 1, idx, num_stages);
                    let in_warr =
                        connect_sig_to_tid(ctx, &in_pins, prev_tid, handoff, &mut claims, &net)?;
                    prev_out[idx] = merge_on_track(ctx, &[prev, in_warr], None, None)?;
                    ctx.add_pin_with(
                        format!("dmid_{}<{idx}>", stage - 1),
                        in_pins,
                        !export_nets,
                        PinMode::All,
                    );
                }

                if inst.has_port("clk_buf") {
                    let name = format!("clk_div_buf_{stage}_{idx}");
                    ctx.reexport(inst.port("clk_buf")?, Some(name.as_str()), None);
                }
                if inst.has_port("clkb_buf") {
                    let name = format!("clk_divb_buf_{stage}_{idx}");
                    ctx.reexport(inst.port("clkb_buf")?, Some(name.as_str()), None);
                }
            }

            if stage > 0 {
                for (bit, wire) in prev_out.iter().enumerate() {
                    routes.push(route(
                        ctx,
                        format!("dmid_{}<{bit}>", stage - 1),
                        prev_slots[bit],
                        wire,
                    )?);
                }
            }

            // One clock per stage, shared by its units.
            let clk_vm = units
                .iter()
                .map(|inst| inst.pin("clk"))
                .collect::<Result<Vec<_>>>()?;
            ctx.add_pin_with(format!("clk_div_{stage}_vm"), clk_vm.clone(), true, PinMode::All);
            let mut clk = ctx.connect_to_tracks(&clk_vm, clk_tid)?;
            if self.clk_layer > clk.layer() {
                clk = ctx.connect_via_stack(&clk, self.clk_layer)?;
            }
            ctx.add_pin(format!("clk_div_{stage}"), [clk]);
            trace!("stage {stage}: {num_units} units, outputs on slots {out_slots:?}");

            prev_out = out_warrs.into_iter().flatten().collect();
            prev_slots = out_bit_slots;
            unit_start += num_units;
        }

        // Outputs
        for (bit, wire) in prev_out.iter().enumerate() {
            let dout = ctx.extend_wire(wire, None, Some(width));
            ctx.add_pin(format!("dout<{bit}>"), [dout]);
            routes.push(route(ctx, format!("dout<{bit}>"), prev_slots[bit], &dout)?);
        }

        if tree.export_unit_sup {
            for inst in demux_insts.iter() {
                ctx.reexport(inst.port("VDD")?, None, None);
                ctx.reexport(inst.port("VSS")?, None, None);
            }
        }

        // Supplies
        let mut all_insts = demux_insts.clone();
        all_insts.extend(din_buf_inst.iter().cloned());
        let (vdd, vss) = match sup_tiles {
            Some((ptap, ntap)) => {
                let unit_sup = |name: &str| -> Result<Vec<WireArray>> {
                    Ok(all_insts
                        .iter()
                        .map(|inst| inst.pins_on(name, conn_layer))
                        .collect::<Result<Vec<_>>>()?
                        .concat())
                };
                let (vdd_units, vss_units) = (unit_sup("VDD")?, unit_sup("VSS")?);
                let vdd_tid = ctx.track_id(hm_layer, WireClass::Sup, 0, ntap)?;
                let vss_tid = ctx.track_id(hm_layer, WireClass::Sup, 0, ptap)?;
                let vdd = ctx.connect_to_tracks(&vdd_units, vdd_tid)?;
                let vss = ctx.connect_to_tracks(&vss_units, vss_tid)?;
                (
                    ctx.extend_wire(&vdd, Some(0), Some(width)),
                    ctx.extend_wire(&vss, Some(0), Some(width)),
                )
            }
            None => {
                let mut vdd_pins = all_insts
                    .iter()
                    .map(|inst| inst.pin("VDD"))
                    .collect::<Result<Vec<_>>>()?;
                let mut vss_pins = all_insts
                    .iter()
                    .map(|inst| inst.pin("VSS"))
                    .collect::<Result<Vec<_>>>()?;
                vdd_pins.extend(vdd_hm);
                vss_pins.extend(vss_hm);
                (
                    merge_on_track(ctx, &vdd_pins, Some(0), Some(width))?,
                    merge_on_track(ctx, &vss_pins, Some(0), Some(width))?,
                )
            }
        };
        let vdd = ctx.connect_to_track_wires(&vdd_conn, &vdd)?;
        let vss = ctx.connect_to_track_wires(&vss_conn, &vss)?;
        ctx.add_pin("VDD", [vdd]);
        ctx.add_pin("VSS", [vss]);

        // --- Bookkeeping --- //
        let bit_paths = (0..ratio)
            .map(|bit| {
                let hops = (0..num_stages)
                    .map(|stage| {
                        let unit = bit % (1 << stage);
                        let side = (bit >> stage) & 1;
                        let inst = &demux_insts[(1 << stage) - 1 + unit];
                        let meta = inst
                            .cell()
                            .get_metadata::<DemuxMetadata>()
                            .ok_or_else(|| Error::StructuralMismatch("demux metadata missing".into()))?;
                        Ok(BitHop {
                            stage,
                            unit,
                            side,
                            late: side == meta.late_bit,
                            storage: meta.out_paths[side].clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(BitPath { bit, hops })
            })
            .collect::<Result<Vec<_>>>()?;

        ctx.set_sch_params(json!({
            "num_stages": num_stages,
            "demux_params": demux_masters
                .values()
                .map(|m| m.sch_params().clone())
                .collect::<Vec<_>>(),
            "use_ff_list": self.use_ff,
            "din_buf_params": din_buf_inst.as_ref().map(|i| i.cell().sch_params().clone()),
            "is_big_endian": tree.is_big_endian,
            "export_nets": export_nets,
        }));
        ctx.set_metadata(TreeMetadata {
            ratio,
            bit_paths,
            pool,
            routes,
            risers: claims.risers().to_vec(),
        });

        Ok(())
    }
}
