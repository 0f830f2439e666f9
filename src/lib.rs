pub use anyhow::{anyhow, Result};

pub mod blocks;
pub mod cli;
pub mod config;
pub mod error;
pub mod layout;
pub mod paths;
pub mod plan;

pub fn bus_bit(name: &str, index: usize) -> String {
    format!("{name}<{index}>")
}

#[cfg(test)]
pub mod tests {
    use arcstr::ArcStr;

    use crate::blocks::demux::DemuxSizing;
    use crate::blocks::inv_chain::InvChainSizing;
    use crate::blocks::latch::LatchSizing;
    use crate::blocks::tree::TreeSizing;
    use crate::layout::grid::{LayerInfo, RoutingDir, TileInfo, TileKind, WireLookup};
    use crate::layout::PlacementGrid;

    pub(crate) const LOGIC: ArcStr = arcstr::literal!("logic");

    fn layer(id: i32, dir: RoutingDir, pitch: i64, line: i64) -> LayerInfo {
        LayerInfo {
            id,
            dir,
            pitch,
            line,
            sep: 1,
        }
    }

    fn wires(layer: i32, sup: usize, sig: usize, clk: usize) -> WireLookup {
        WireLookup {
            layer,
            sup,
            sig,
            clk,
        }
    }

    /// A placement grid with `n_xm` data tracks on `xm` in the logic tile.
    pub(crate) fn overflow_grid(n_xm: usize) -> PlacementGrid {
        sized_grid(4_800, n_xm, 6)
    }

    /// A placement grid with a logic tile of the given height and data track counts.
    pub(crate) fn sized_grid(logic_height: i64, n_xm: usize, n_xxm: usize) -> PlacementGrid {
        use RoutingDir::*;
        PlacementGrid {
            col_pitch: 100,
            conn_layer: 1,
            layers: vec![
                layer(1, Vert, 100, 40),
                layer(2, Horiz, 100, 40),
                layer(3, Vert, 100, 40),
                layer(4, Horiz, 200, 100),
                layer(5, Vert, 200, 100),
                layer(6, Horiz, 400, 200),
            ],
            tiles: vec![
                TileInfo {
                    name: LOGIC,
                    kind: TileKind::Logic,
                    height: logic_height,
                    wires: vec![
                        wires(2, 2, 6, 0),
                        wires(4, 0, n_xm, 1),
                        wires(6, 0, n_xxm, 0),
                    ],
                },
                TileInfo {
                    name: arcstr::literal!("ptap"),
                    kind: TileKind::Ptap,
                    height: 800,
                    wires: vec![wires(2, 1, 0, 0)],
                },
                TileInfo {
                    name: arcstr::literal!("ntap"),
                    kind: TileKind::Ntap,
                    height: 800,
                    wires: vec![wires(2, 1, 0, 0)],
                },
            ],
            min_sep_col: 2,
            sub_sep_col: 2,
            tap_ncols: 4,
        }
    }

    pub(crate) fn test_grid() -> PlacementGrid {
        overflow_grid(14)
    }

    pub(crate) fn demux_sizing() -> DemuxSizing {
        DemuxSizing {
            dlatch: LatchSizing {
                seg_in: 2,
                seg_fb: 1,
                seg_ck: 1,
            },
            in_buf: None,
            clk_buf: Some(InvChainSizing {
                seg_list: vec![1, 2],
            }),
            clk_on_right: false,
        }
    }

    pub(crate) fn tree_sizing(num_stages: usize) -> TreeSizing {
        TreeSizing::builder()
            .num_stages(num_stages)
            .demux(demux_sizing())
            .build()
            .unwrap()
    }
}
