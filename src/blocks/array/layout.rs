use log::debug;
use serde_json::json;

use super::{ArrayMetadata, ArrayRow, DesArray};
use crate::blocks::tree::{DesBinaryTree, DesTreeParams};
use crate::error::{Error, Result};
use crate::layout::{Instance, LayoutCtx, PinMode, TrackId, TrackLocator, WireArray, WireClass};

/// The array-level name of a unit port, or `None` if the port stays internal.
fn unit_port_name(name: &str, arr: usize, bit: usize, in_width: usize) -> Result<Option<String>> {
    let internal_clk = name.starts_with("clk_div_") && !name.starts_with("clk_div_buf");
    if internal_clk || name.starts_with("VDD") || name.starts_with("VSS") {
        return Ok(None);
    }
    let (base, sfx) = name.split_at(name.find('<').unwrap_or(name.len()));
    Ok(Some(match base {
        "din" if in_width > 1 => format!("din_{arr}<{bit}>"),
        "din" => format!("din_{arr}"),
        "dout" => {
            let k = sfx
                .strip_prefix('<')
                .and_then(|s| s.strip_suffix('>'))
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| Error::InvalidParam(format!("malformed output port `{name}`")))?;
            format!("dout_{arr}<{}>", in_width * k + bit)
        }
        _ => format!("{base}_{arr}_{bit}{sfx}"),
    }))
}

impl DesArray {
    fn reexport_unit(&self, ctx: &mut LayoutCtx, inst: &Instance, arr: usize, bit: usize) -> Result<()> {
        for port_name in inst.port_names() {
            if let Some(name) = unit_port_name(port_name, arr, bit, self.params.in_width)? {
                ctx.reexport(inst.port(port_name)?, Some(name.as_str()), None);
            }
        }
        Ok(())
    }

    pub(crate) fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        let params = &self.params;
        let pattern = self.pattern();
        ctx.draw_base(&pattern)?;

        let conn_layer = ctx.conn_layer();
        let hm_layer = conn_layer + 1;
        let xm_layer = hm_layer + 2;
        let clk_layer = params.clk_layer.unwrap_or(xm_layer);
        let sup_layer = params.sup_layer.unwrap_or(xm_layer + 2);
        let is_hor_clk = ctx.grid().is_horizontal(clk_layer);
        let clk_hor_layer = if is_hor_clk { clk_layer } else { clk_layer - 1 };
        let num_stages = params.unit.num_stages;
        let tiles_per_row = self.tiles_per_row();
        let tap_ncols = ctx.grid().tap_ncols;
        let sub_sep = ctx.grid().sub_sep_col;
        // The left tap column abuts the units; the right one sits `sub_sep` away.
        let col_idx = match self.sup_tiles {
            Some(_) => 0,
            None => tap_ncols,
        };

        let mut unit_tree = params.unit.clone();
        unit_tree.export_nets |= params.export_nets;

        // --- Place instances --- //
        let mut unit_insts = Vec::new();
        let mut all_insts = Vec::with_capacity(self.rows.len());
        let mut dum_vss_vms = Vec::new();
        for (row, kind) in self.rows.iter().enumerate() {
            let tidx = row * tiles_per_row;
            let pinfo = ctx.sub_pattern(tidx, tidx + tiles_per_row)?;
            let find = |name: &arcstr::ArcStr| {
                pinfo
                    .index_of(name)
                    .ok_or_else(|| Error::TileNotFound(name.clone()))
            };
            let tree_params = DesTreeParams {
                logic_tidx: find(&params.logic_tile)?,
                ptap_tidx: self.sup_tiles.as_ref().map(|(p, _)| find(p)).transpose()?,
                ntap_tidx: self.sup_tiles.as_ref().map(|(_, n)| find(n)).transpose()?,
                pinfo: pinfo.clone(),
                tree: unit_tree.clone(),
                // Dummies keep their clocks on the native layer.
                clk_layer: match kind {
                    ArrayRow::Dummy => None,
                    ArrayRow::Unit { .. } => Some(clk_hor_layer),
                },
                draw_taps: false,
            };
            let master = ctx.instantiate::<DesBinaryTree>(&tree_params)?;
            let inst = ctx.add_tile(master, tidx, col_idx, false)?;

            match *kind {
                ArrayRow::Dummy => {
                    let mut ties = inst.pins("din_vm")?;
                    for stage in 0..num_stages {
                        ties.extend(inst.pins(&format!("clk_div_{stage}_vm"))?);
                    }
                    ctx.connect_to_track_wires(&ties, &inst.pin("VSS")?)?;
                    dum_vss_vms.extend(ties);
                }
                ArrayRow::Unit { arr, bit } => {
                    self.reexport_unit(ctx, &inst, arr, bit)?;
                    unit_insts.push(inst.clone());
                }
            }
            all_insts.push(inst);
        }
        debug!(
            "array of {} rows ({} dummies) placed at column {col_idx}",
            self.rows.len(),
            self.rows.len() - unit_insts.len()
        );

        // --- Taps --- //
        let unit_ncols = all_insts.iter().map(|i| i.num_cols()).max().unwrap_or(0);
        let mut vdd_warrs: Vec<WireArray> = Vec::new();
        let mut vss_warrs: Vec<WireArray> = Vec::new();
        match &self.sup_tiles {
            Some((ptap, ntap)) => {
                let ncols = ctx.num_cols();
                for (tidx, slot) in pattern.slots().iter().enumerate() {
                    let is_ptap = &slot.name == ptap;
                    if !is_ptap && &slot.name != ntap {
                        continue;
                    }
                    let stubs = ctx.add_substrate_contact(tidx, 0, ncols)?;
                    let tid = ctx.track_id(hm_layer, WireClass::Sup, 0, tidx)?;
                    let warr = ctx.connect_to_tracks(&stubs, tid)?;
                    if is_ptap {
                        vss_warrs.push(warr);
                    } else {
                        vdd_warrs.push(warr);
                    }
                }
            }
            None => {
                let right_col = col_idx + unit_ncols + sub_sep;
                for tidx in 0..pattern.len() {
                    for col in [0, right_col] {
                        let tap = ctx.add_tap(col, tidx)?;
                        vdd_warrs.push(ctx.connect_to_track_wires(&tap.vdd, &tap.vdd_hm)?);
                        vss_warrs.push(ctx.connect_to_track_wires(&tap.vss, &tap.vss_hm)?);
                    }
                }
            }
        }
        let width = ctx.width();

        // --- Routing --- //
        // Supplies
        for inst in all_insts.iter() {
            vdd_warrs.push(inst.pin("VDD")?);
            vss_warrs.push(inst.pin("VSS")?);
        }
        for (name, warrs) in [("VDD", vdd_warrs), ("VSS", vss_warrs)] {
            let rows = ctx.connect_wires(&warrs, Some(0), Some(width));
            let pins = if sup_layer > hm_layer {
                rows.iter()
                    .map(|w| ctx.connect_via_stack(w, sup_layer))
                    .collect::<Result<Vec<_>>>()?
            } else {
                rows
            };
            ctx.add_pin(name, pins);
        }
        if !dum_vss_vms.is_empty() {
            ctx.add_pin_with("VSS_vm", dum_vss_vms, true, PinMode::All);
        }
        if params.export_unit_sup {
            for inst in all_insts.iter() {
                ctx.reexport(inst.port("VDD")?, None, None);
                ctx.reexport(inst.port("VSS")?, None, None);
            }
        }

        // Clocks
        let mut clk_div_tidx = Vec::new();
        for stage in 0..num_stages {
            let name = format!("clk_div_{stage}");
            let pins = unit_insts
                .iter()
                .map(|inst| inst.pins(&name))
                .collect::<Result<Vec<_>>>()?
                .concat();
            let merged = ctx.connect_wires(&pins, None, None);
            if is_hor_clk {
                ctx.add_pin(name, merged);
                continue;
            }
            let first = merged
                .first()
                .ok_or_else(|| Error::PortNotFound(name.as_str().into()))?;
            let index = match params.sig_locs.get(name.as_str()) {
                Some(&index) => index,
                None => {
                    ctx.coord_to_track(clk_layer, first.middle(), TrackLocator::Nearest)?
                        .index
                }
            };
            let clk = ctx.connect_to_tracks(&merged, TrackId::new(clk_layer, index))?;
            ctx.add_pin_with(name, [clk], false, params.clk_pinmode);
            clk_div_tidx.push(index);
        }

        ctx.set_sch_params(json!({
            "in_width": params.in_width,
            "narr": params.narr,
            "ndum": self.rows.len() - unit_insts.len(),
            "unit_params": unit_insts.first().map(|i| i.cell().sch_params().clone()),
            "export_nets": params.export_nets,
        }));
        ctx.set_metadata(ArrayMetadata {
            rows: self.rows.clone(),
            clk_div_tidx,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_port_names() {
        let name = |port, in_width| unit_port_name(port, 1, 1, in_width).unwrap();
        assert_eq!(name("din", 1).as_deref(), Some("din_1"));
        assert_eq!(name("din", 2).as_deref(), Some("din_1<1>"));
        assert_eq!(name("dout<3>", 2).as_deref(), Some("dout_1<7>"));
        assert_eq!(name("dmid_0<1>", 2).as_deref(), Some("dmid_0_1_1<1>"));
        assert_eq!(name("din_vm", 1).as_deref(), Some("din_vm_1_1"));
        assert_eq!(
            name("clk_div_buf_1_0", 1).as_deref(),
            Some("clk_div_buf_1_0_1_1")
        );
        assert_eq!(name("clk_div_0", 1), None);
        assert_eq!(name("clk_div_1_vm", 1), None);
        assert_eq!(name("VSS", 1), None);
        assert!(unit_port_name("dout<x>", 0, 0, 1).is_err());
    }
}
