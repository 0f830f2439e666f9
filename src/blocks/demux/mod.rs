use arcstr::ArcStr;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use super::inv_chain::InvChainSizing;
use super::latch::LatchSizing;
use crate::error::{Error, Result};
use crate::layout::{Component, LayoutCtx, PlacementGrid};

pub mod layout;

#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct DemuxSizing {
    pub dlatch: LatchSizing,
    /// Input data buffer. Omitted if `None`.
    #[serde(default)]
    pub in_buf: Option<InvChainSizing>,
    /// Clock buffer chain generating `clkb`. If `None`, `clkb` is an input pin.
    #[serde(default)]
    pub clk_buf: Option<InvChainSizing>,
    /// Place the clock buffer to the right of the storage elements.
    #[serde(default)]
    pub clk_on_right: bool,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Builder, Serialize, Deserialize)]
#[builder(derive(Debug))]
pub struct DemuxParams {
    #[builder(setter(into))]
    pub tile: ArcStr,
    pub sizing: DemuxSizing,
    /// Put registers on both outputs.
    #[builder(default)]
    #[serde(default)]
    pub use_ff: bool,
    #[builder(default)]
    #[serde(default)]
    pub is_big_endian: bool,
    /// Expose the buffered clock and input nets as visible ports.
    #[builder(default)]
    #[serde(default)]
    pub export_nets: bool,
    /// Tie both storage inputs together. Otherwise `in` is left as two stubs.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub connect_in: bool,
    #[builder(default)]
    #[serde(default)]
    pub vertical_sup: bool,
}

fn default_true() -> bool {
    true
}

impl DemuxParams {
    #[inline]
    pub fn builder() -> DemuxParamsBuilder {
        DemuxParamsBuilder::default()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ClockBuffering {
    /// `clk` and `clkb` are both inputs.
    None,
    /// `clk` drives the storage elements directly; the buffer makes `clkb`.
    SingleStage,
    /// Both phases are regenerated by a chain of this many stages.
    MultiStage(usize),
}

/// The structural variant of a demux unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DemuxTopology {
    pub input_buffered: bool,
    pub clock: ClockBuffering,
    pub use_ff: bool,
}

impl DemuxTopology {
    pub fn from_params(params: &DemuxParams) -> Result<Self> {
        let clock = match &params.sizing.clk_buf {
            None => ClockBuffering::None,
            Some(buf) => match buf.num_stages() {
                0 => {
                    return Err(Error::InvalidParam(
                        "clock buffer needs at least one stage".into(),
                    ))
                }
                1 => ClockBuffering::SingleStage,
                n => ClockBuffering::MultiStage(n),
            },
        };
        let input_buffered = params.sizing.in_buf.is_some();
        if input_buffered && !params.connect_in {
            return Err(Error::Unsupported(
                "an input buffer requires the storage inputs to be connected".into(),
            ));
        }
        Ok(Self {
            input_buffered,
            clock,
            use_ff: params.use_ff,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Latch,
    Flop,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DemuxMetadata {
    /// Storage elements between `in` and `out<i>`, in order.
    pub out_paths: [Vec<StorageKind>; 2],
    /// The output index carrying the late sample.
    pub late_bit: usize,
}

/// A 1:2 demux unit cell used in binary-tree deserializers.
pub struct Demux1To2 {
    params: DemuxParams,
    topology: DemuxTopology,
}

impl Demux1To2 {
    #[inline]
    pub fn topology(&self) -> &DemuxTopology {
        &self.topology
    }
}

impl Component for Demux1To2 {
    type Params = DemuxParams;

    fn new(params: &Self::Params, _grid: &PlacementGrid) -> Result<Self> {
        Ok(Self {
            topology: DemuxTopology::from_params(params)?,
            params: params.clone(),
        })
    }

    fn name(&self) -> ArcStr {
        arcstr::literal!("demux_1to2")
    }

    fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        self.layout(ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::{Cell, TemplateDb, WireArray};
    use crate::tests::{demux_sizing, test_grid, LOGIC};

    use super::*;

    fn params() -> DemuxParamsBuilder {
        let mut builder = DemuxParams::builder();
        builder.tile(LOGIC).sizing(demux_sizing());
        builder
    }

    fn storage_out(cell: &Cell, kind: &str) -> Vec<WireArray> {
        cell.instances()
            .iter()
            .filter(|inst| inst.cell().name().starts_with(kind))
            .map(|inst| inst.pin("out").unwrap())
            .collect()
    }

    #[test]
    fn test_demux_little_endian() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let demux = db
            .instantiate::<Demux1To2>(&params().build().unwrap())
            .unwrap();

        let visible = demux
            .visible_ports()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(visible, vec!["VDD", "VSS", "clk", "in", "out<0>", "out<1>"]);
        assert!(demux.port("clk_buf").unwrap().hidden);
        assert!(demux.port("clkb_buf").unwrap().hidden);

        // The late sample comes from the latch.
        assert_eq!(
            demux.port("out<1>").unwrap().pins,
            storage_out(&demux, "latch_core")
        );
        assert_eq!(
            demux.port("out<0>").unwrap().pins,
            storage_out(&demux, "flop_core")
        );

        let meta = demux.get_metadata::<DemuxMetadata>().unwrap();
        assert_eq!(meta.late_bit, 1);
        assert_eq!(meta.out_paths[1], vec![StorageKind::Latch]);
        assert_eq!(meta.out_paths[0], vec![StorageKind::Flop]);
    }

    #[test]
    fn test_demux_big_endian_swaps_outputs() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let demux = db
            .instantiate::<Demux1To2>(&params().is_big_endian(true).build().unwrap())
            .unwrap();
        assert_eq!(
            demux.port("out<0>").unwrap().pins,
            storage_out(&demux, "latch_core")
        );
        let meta = demux.get_metadata::<DemuxMetadata>().unwrap();
        assert_eq!(meta.late_bit, 0);
        assert_eq!(meta.out_paths[0], vec![StorageKind::Latch]);
    }

    #[test]
    fn test_demux_dual_register() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let demux = db
            .instantiate::<Demux1To2>(&params().use_ff(true).build().unwrap())
            .unwrap();
        assert_eq!(storage_out(&demux, "latch_core").len(), 1);
        let flops = storage_out(&demux, "flop_core");
        assert_eq!(flops.len(), 2);

        let meta = demux.get_metadata::<DemuxMetadata>().unwrap();
        assert_eq!(
            meta.out_paths[0],
            vec![StorageKind::Latch, StorageKind::Flop]
        );
        assert_eq!(meta.out_paths[1], vec![StorageKind::Flop]);
        // The late output comes from the extra register on the far right.
        assert_eq!(demux.port("out<1>").unwrap().pins[0], flops[1]);
    }

    #[test]
    fn test_demux_clock_variants() {
        let mut db = TemplateDb::new(test_grid()).unwrap();

        let mut sizing = demux_sizing();
        sizing.clk_buf = None;
        let unbuffered = db
            .instantiate::<Demux1To2>(&params().sizing(sizing).build().unwrap())
            .unwrap();
        assert!(!unbuffered.port("clk").unwrap().hidden);
        assert!(!unbuffered.port("clkb").unwrap().hidden);
        assert!(!unbuffered.has_port("clkb_buf"));

        let mut sizing = demux_sizing();
        sizing.clk_buf = Some(InvChainSizing { seg_list: vec![2] });
        let single = db
            .instantiate::<Demux1To2>(&params().sizing(sizing).build().unwrap())
            .unwrap();
        assert!(single.has_port("clk"));
        assert!(!single.has_port("clkb"));
        assert!(!single.has_port("clk_buf"));
        assert!(single.port("clkb_buf").unwrap().hidden);

        let exported = db
            .instantiate::<Demux1To2>(&params().export_nets(true).build().unwrap())
            .unwrap();
        assert!(!exported.port("clk_buf").unwrap().hidden);
    }

    #[test]
    fn test_demux_clk_track_outside_buffer() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let demux = db
            .instantiate::<Demux1To2>(&params().build().unwrap())
            .unwrap();
        let buf = demux
            .instances()
            .iter()
            .find(|inst| inst.cell().name().starts_with("inv_chain"))
            .unwrap();
        let clk = demux.port("clk").unwrap().pins[0];
        assert!(clk.center() < buf.left());

        let mut sizing = demux_sizing();
        sizing.clk_on_right = true;
        let right = db
            .instantiate::<Demux1To2>(&params().sizing(sizing).build().unwrap())
            .unwrap();
        let buf = right
            .instances()
            .iter()
            .find(|inst| inst.cell().name().starts_with("inv_chain"))
            .unwrap();
        assert!(buf.transform().flip_lr);
        let clk = right.port("clk").unwrap().pins[0];
        assert!(clk.center() > buf.right());
        assert!(right
            .instances()
            .iter()
            .filter(|inst| inst.cell().name().starts_with("flop_core"))
            .all(|flop| flop.right() <= buf.left()));
    }

    #[test]
    fn test_demux_right_single_stage_clock() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let mut sizing = demux_sizing();
        sizing.clk_on_right = true;
        sizing.clk_buf = Some(InvChainSizing { seg_list: vec![2] });
        let demux = db
            .instantiate::<Demux1To2>(&params().sizing(sizing).build().unwrap())
            .unwrap();

        let find = |kind: &str| {
            demux
                .instances()
                .iter()
                .find(|inst| inst.cell().name().starts_with(kind))
                .unwrap()
        };
        let buf = find("inv_chain");
        let flop = find("flop_core");
        let buf_in = buf.pin("in").unwrap();
        let pclk = flop.pin("pclk").unwrap();
        let nclk = flop.pin("nclk").unwrap();

        // The buffer input and the flop's pclk merge into one wire.
        assert_eq!(buf_in.center(), pclk.center());
        assert_ne!(buf_in.center(), nclk.center());
        let merged = demux
            .wires()
            .iter()
            .find(|w| {
                w.center() == pclk.center()
                    && w.lower() <= pclk.lower()
                    && w.upper() >= buf_in.upper()
            });
        assert!(merged.is_some());
    }

    #[test]
    fn test_demux_input_stubs() {
        let grid = test_grid();
        let vm = grid.conn_layer() + 2;
        let mut db = TemplateDb::new(grid).unwrap();
        let demux = db
            .instantiate::<Demux1To2>(&params().connect_in(false).build().unwrap())
            .unwrap();
        let pins = demux.port("in").unwrap().pins.clone();
        assert_eq!(pins.len(), 2);
        assert!(pins.iter().all(|w| w.layer() == vm));
        assert_ne!(pins[0].center(), pins[1].center());
    }

    #[test]
    fn test_demux_input_buffer() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let mut sizing = demux_sizing();
        sizing.in_buf = Some(InvChainSizing { seg_list: vec![1] });

        let demux = db
            .instantiate::<Demux1To2>(&params().sizing(sizing.clone()).build().unwrap())
            .unwrap();
        assert!(demux.port("in_buf").unwrap().hidden);
        assert!(!demux.port("in").unwrap().hidden);

        let err = db
            .instantiate::<Demux1To2>(
                &params()
                    .sizing(sizing)
                    .connect_in(false)
                    .build()
                    .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
