use std::collections::BTreeMap;

use serde_json::json;

use super::{ClockBuffering, Demux1To2, DemuxMetadata, StorageKind};
use crate::blocks::inv_chain::{InvChain, InvChainParams};
use crate::blocks::latch::{FlopCore, LatchCore, LatchSizing, StorageParams};
use crate::error::{Error, Result};
use crate::layout::{Instance, LayoutCtx, PinMode, TilePattern, TrackLocator, WireClass};

impl Demux1To2 {
    pub(crate) fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        let params = &self.params;
        let topo = self.topology;
        ctx.draw_base(&TilePattern::single(params.tile.clone()))?;

        let conn_layer = ctx.conn_layer();
        let hm_layer = conn_layer + 1;
        let vm_layer = hm_layer + 1;
        let clk_on_right = params.sizing.clk_on_right;
        let hide = Some(!params.export_nets);

        // --- Create templates --- //
        let lookup = ctx.tile(0)?.info.wires(hm_layer);
        let sig_track = |local: Option<usize>| {
            local.map(|l| l as i64).ok_or(Error::ResourceExhausted {
                required: 2,
                available: lookup.sig,
            })
        };
        let nclkb_tidx = sig_track(lookup.n_sig(0))?;
        let nclk_tidx = sig_track(lookup.n_sig(1))?;
        let pclkb_tidx = sig_track(lookup.p_sig(0))?;
        let pclk_tidx = sig_track(lookup.p_sig(1))?;

        let dlatch_sig_locs = BTreeMap::from([
            (arcstr::literal!("nclk"), nclk_tidx),
            (arcstr::literal!("nclkb"), nclkb_tidx),
            (arcstr::literal!("pclk"), pclk_tidx),
            (arcstr::literal!("pclkb"), pclkb_tidx),
        ]);
        let dlatch_master = ctx.instantiate::<LatchCore>(&StorageParams {
            tile: params.tile.clone(),
            sizing: params.sizing.dlatch,
            sig_locs: dlatch_sig_locs,
            vertical_sup: params.vertical_sup,
        })?;
        let dff_master = ctx.instantiate::<FlopCore>(&StorageParams {
            tile: params.tile.clone(),
            sizing: LatchSizing {
                seg_ck: 0,
                ..params.sizing.dlatch
            },
            sig_locs: BTreeMap::new(),
            vertical_sup: params.vertical_sup,
        })?;

        let in_buf_master = match &params.sizing.in_buf {
            Some(sizing) => Some(ctx.instantiate::<InvChain>(&InvChainParams {
                tile: params.tile.clone(),
                sizing: sizing.clone(),
                dual_output: false,
                sig_locs: BTreeMap::new(),
                vertical_sup: params.vertical_sup,
            })?),
            None => None,
        };
        // The buffer input lines up with the storage clock it drives.
        let clk_in_tidx = if clk_on_right { pclk_tidx } else { nclk_tidx };
        let clk_buf_master = match &params.sizing.clk_buf {
            Some(sizing) => Some(ctx.instantiate::<InvChain>(&InvChainParams {
                tile: params.tile.clone(),
                sizing: sizing.clone(),
                dual_output: true,
                sig_locs: BTreeMap::from([
                    (arcstr::literal!("nin0"), clk_in_tidx),
                    (arcstr::literal!("nin1"), nclkb_tidx),
                ]),
                vertical_sup: params.vertical_sup,
            })?),
            None => None,
        };

        // --- Place instances --- //
        let min_sep = ctx.grid().min_sep_col;
        let clk_space = match topo.clock {
            ClockBuffering::MultiStage(_) => ctx.grid().sep_cols(vm_layer, 1)?,
            _ => 0,
        };
        let mut cur_col = 0;

        let in_buf_inst = match in_buf_master {
            Some(master) => {
                let ncols = master.num_cols();
                let inst = ctx.add_tile(master, 0, cur_col, false)?;
                cur_col += ncols + min_sep;
                Some(inst)
            }
            None => None,
        };

        let mut clk_buf_inst = None;
        if let (Some(master), false) = (&clk_buf_master, clk_on_right) {
            cur_col += clk_space;
            clk_buf_inst = Some(ctx.add_tile(master.clone(), 0, cur_col, false)?);
            cur_col += master.num_cols() + min_sep;
        }

        let dlatch_inst = ctx.add_tile(dlatch_master.clone(), 0, cur_col, false)?;
        cur_col += dlatch_master.num_cols() + min_sep;
        let dff_inst = ctx.add_tile(dff_master.clone(), 0, cur_col, false)?;
        cur_col += dff_master.num_cols() + min_sep;

        if let (Some(master), true) = (&clk_buf_master, clk_on_right) {
            cur_col += clk_space;
            clk_buf_inst = Some(ctx.add_tile(master.clone(), 0, cur_col, true)?);
            cur_col += master.num_cols() + min_sep;
        }

        let mut all_insts: Vec<Instance> = [&in_buf_inst, &clk_buf_inst]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        all_insts.push(dlatch_inst.clone());
        all_insts.push(dff_inst.clone());

        let (in_early, out_early, in_late, out_late) = if topo.use_ff {
            let late = ctx.add_tile(dff_master, 0, cur_col, false)?;
            all_insts.push(late.clone());
            (dlatch_inst.clone(), dff_inst.clone(), late.clone(), late)
        } else {
            (
                dff_inst.clone(),
                dff_inst.clone(),
                dlatch_inst.clone(),
                dlatch_inst.clone(),
            )
        };

        // --- Routing --- //
        // Supplies
        for name in ["VDD", "VSS"] {
            let pins = if params.vertical_sup {
                all_insts
                    .iter()
                    .map(|inst| inst.pins_on(name, conn_layer))
                    .collect::<Result<Vec<_>>>()?
                    .concat()
            } else {
                all_insts
                    .iter()
                    .map(|inst| inst.pin(name))
                    .collect::<Result<Vec<_>>>()?
            };
            let merged = ctx.connect_wires(&pins, None, None);
            ctx.add_pin(name, merged);
        }

        // Clock signals
        match (topo.clock, &clk_buf_inst) {
            (ClockBuffering::None, _) => {
                ctx.reexport(dlatch_inst.port("clkb")?, None, None);
                ctx.reexport(dlatch_inst.port("clk")?, None, None);
            }
            (clock, Some(buf)) if !clk_on_right => {
                if clock == ClockBuffering::SingleStage {
                    ctx.connect_wires(&[buf.pin("in")?, dlatch_inst.pin("nclk")?], None, None);
                    ctx.reexport(dlatch_inst.port("clk")?, None, None);
                } else {
                    ctx.connect_to_track_wires(&[dlatch_inst.pin("nclk")?], &buf.pin("out")?)?;
                    ctx.reexport(dlatch_inst.port("clk")?, Some("clk_buf"), hide);
                    let vm_tid =
                        ctx.coord_to_track(vm_layer, buf.left(), TrackLocator::StartsBeyond)?;
                    let vm_tid = ctx.next_track(vm_tid, -1)?;
                    let clk = ctx.connect_to_tracks(&[buf.pin("in")?], vm_tid)?;
                    ctx.add_pin("clk", [clk]);
                }
                ctx.connect_to_track_wires(&[dlatch_inst.pin("nclkb")?], &buf.pin("outb")?)?;
                ctx.reexport(dlatch_inst.port("clkb")?, Some("clkb_buf"), hide);
            }
            (clock, Some(buf)) => {
                if clock == ClockBuffering::SingleStage {
                    ctx.connect_wires(&[buf.pin("in")?, dff_inst.pin("pclk")?], None, None);
                    ctx.reexport(dlatch_inst.port("clk")?, None, None);
                } else {
                    ctx.connect_to_track_wires(&[dff_inst.pin("pclk_s")?], &buf.pin("out")?)?;
                    ctx.reexport(dff_inst.port("clk")?, Some("clk_buf"), hide);
                    let vm_tid =
                        ctx.coord_to_track(vm_layer, buf.right(), TrackLocator::EndsBefore)?;
                    let vm_tid = ctx.next_track(vm_tid, 1)?;
                    let clk = ctx.connect_to_tracks(&[buf.pin("in")?], vm_tid)?;
                    ctx.add_pin("clk", [clk]);
                }
                ctx.connect_to_track_wires(&[dff_inst.pin("nclkb_s")?], &buf.pin("outb")?)?;
                ctx.reexport(dff_inst.port("clkb")?, Some("clkb_buf"), hide);
            }
            (_, None) => return Err(Error::MissingParam("clk_buf")),
        }

        // Share clock routes
        ctx.connect_wires(
            &[dlatch_inst.pin("nclkb")?, dff_inst.pin("nclkb")?],
            None,
            None,
        );
        ctx.connect_to_track_wires(&[dlatch_inst.pin("pclk")?], &dff_inst.pin("clk")?)?;

        if topo.use_ff {
            ctx.connect_wires(
                &[dff_inst.pin("nclkb_s")?, out_late.pin("nclkb")?],
                None,
                None,
            );
            ctx.connect_wires(&[dff_inst.pin("pclk_s")?, out_late.pin("pclk")?], None, None);
            // Latch to register hand-off on the early path.
            ctx.connect_to_track_wires(&[dlatch_inst.pin("out")?], &dff_inst.pin("nin")?)?;
        }

        // Outputs
        let late_bit = usize::from(!params.is_big_endian);
        let late_name = format!("out<{late_bit}>");
        let early_name = format!("out<{}>", 1 - late_bit);
        ctx.reexport(out_late.port("out")?, Some(late_name.as_str()), None);
        ctx.reexport(out_early.port("out")?, Some(early_name.as_str()), None);

        // Inputs
        if let Some(buf) = &in_buf_inst {
            ctx.reexport(buf.port("in")?, None, None);
        }
        if params.connect_in {
            let mut in_warrs = [in_early.pins("in")?, in_late.pins("in")?].concat();
            if let Some(buf) = &in_buf_inst {
                in_warrs.push(buf.pin("out")?);
            }
            let in_tid = ctx.track_id(hm_layer, WireClass::Sig, 2, 0)?;
            let in_hm = ctx.connect_to_tracks(&in_warrs, in_tid)?;
            if in_buf_inst.is_some() {
                ctx.add_pin_with("in_buf", [in_hm], !params.export_nets, PinMode::All);
            } else {
                ctx.add_pin("in", [in_hm]);
            }
        } else {
            let mut in_warrs = Vec::with_capacity(2);
            for inst in [&in_early, &in_late] {
                let in_hm = inst.pin("pin")?;
                let in_coord = inst.pin("in")?.center();
                let vm_tid = ctx.coord_to_track(vm_layer, in_coord, TrackLocator::Nearest)?;
                in_warrs.push(ctx.connect_to_tracks(&[in_hm], vm_tid)?);
            }
            ctx.add_pin("in", in_warrs);
        }

        let (early_path, late_path) = if topo.use_ff {
            (
                vec![StorageKind::Latch, StorageKind::Flop],
                vec![StorageKind::Flop],
            )
        } else {
            (vec![StorageKind::Flop], vec![StorageKind::Latch])
        };
        let mut out_paths = [Vec::new(), Vec::new()];
        out_paths[late_bit] = late_path;
        out_paths[1 - late_bit] = early_path;
        ctx.set_metadata(DemuxMetadata {
            out_paths,
            late_bit,
        });

        ctx.set_sch_params(json!({
            "dlatch_params": dlatch_master.sch_params(),
            "in_buf_params": in_buf_inst.as_ref().map(|i| i.cell().sch_params().clone()),
            "clk_buf_params": clk_buf_inst.as_ref().map(|i| i.cell().sch_params().clone()),
            "is_big_endian": params.is_big_endian,
            "export_nets": params.export_nets,
            "use_ff": topo.use_ff,
        }));

        Ok(())
    }
}

