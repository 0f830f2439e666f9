use arcstr::ArcStr;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use super::demux::{DemuxSizing, StorageKind};
use super::inv_chain::InvChainSizing;
use crate::error::{Error, Result};
use crate::layout::{Component, LayerId, LayoutCtx, PlacementGrid, TilePattern};

pub mod layout;
pub mod routing;

pub use routing::{PoolSplit, Riser};

/// Largest supported tree depth.
pub const MAX_STAGES: usize = 16;

/// Register both outputs of each demux unit, for all stages or per stage.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UseFf {
    All(bool),
    PerStage(Vec<bool>),
}

impl Default for UseFf {
    fn default() -> Self {
        UseFf::All(false)
    }
}

impl UseFf {
    pub fn per_stage(&self, num_stages: usize) -> Result<Vec<bool>> {
        match self {
            UseFf::All(v) => Ok(vec![*v; num_stages]),
            UseFf::PerStage(list) if list.len() == num_stages => Ok(list.clone()),
            UseFf::PerStage(list) => Err(Error::StructuralMismatch(format!(
                "use_ff lists {} stages but the tree has {num_stages}",
                list.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Builder, Serialize, Deserialize)]
#[builder(derive(Debug))]
pub struct TreeSizing {
    /// The tree deserializes by a ratio of `2^num_stages`.
    pub num_stages: usize,
    pub demux: DemuxSizing,
    #[builder(default)]
    #[serde(default)]
    pub use_ff: UseFf,
    /// Buffer in front of the root demux.
    #[builder(default)]
    #[serde(default)]
    pub din_buf: Option<InvChainSizing>,
    #[builder(default)]
    #[serde(default)]
    pub is_big_endian: bool,
    /// Expose intermediate nets as visible ports.
    #[builder(default)]
    #[serde(default)]
    pub export_nets: bool,
    /// Horizontal layers available for data routing (`xm`, then `xxm`).
    #[builder(default = "1")]
    #[serde(default = "default_sig_layers")]
    pub num_sig_hor_layers: usize,
    /// Units between tap columns. Defaults to half the ratio.
    #[builder(default)]
    #[serde(default)]
    pub tap_sep_unit: Option<usize>,
    /// Re-export the supply pins of every unit.
    #[builder(default)]
    #[serde(default)]
    pub export_unit_sup: bool,
}

fn default_sig_layers() -> usize {
    1
}

impl TreeSizing {
    #[inline]
    pub fn builder() -> TreeSizingBuilder {
        TreeSizingBuilder::default()
    }

    #[inline]
    pub fn ratio(&self) -> usize {
        routing::ratio(self.num_stages)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Builder, Serialize, Deserialize)]
#[builder(derive(Debug))]
pub struct DesTreeParams {
    pub pinfo: TilePattern,
    pub tree: TreeSizing,
    /// Layer the stage clocks are exported on. Defaults to `xm`.
    #[builder(default)]
    #[serde(default)]
    pub clk_layer: Option<LayerId>,
    #[builder(default)]
    #[serde(default)]
    pub logic_tidx: usize,
    /// Supply tiles. Both or neither must be given.
    #[builder(default)]
    #[serde(default)]
    pub ptap_tidx: Option<usize>,
    #[builder(default)]
    #[serde(default)]
    pub ntap_tidx: Option<usize>,
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub draw_taps: bool,
}

fn default_true() -> bool {
    true
}

impl DesTreeParams {
    #[inline]
    pub fn builder() -> DesTreeParamsBuilder {
        DesTreeParamsBuilder::default()
    }
}

/// One demux unit on the path from `din` to an output bit.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct BitHop {
    pub stage: usize,
    /// Index of the unit within its stage.
    pub unit: usize,
    /// The unit output taken.
    pub side: usize,
    pub late: bool,
    pub storage: Vec<StorageKind>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct BitPath {
    pub bit: usize,
    pub hops: Vec<BitHop>,
}

impl BitPath {
    /// Whether each hop takes the late sample, from the root down.
    pub fn late_sequence(&self) -> Vec<bool> {
        self.hops.iter().map(|h| h.late).collect()
    }
}

/// A data net routed on a horizontal pool track.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct SignalRoute {
    pub net: ArcStr,
    pub slot: usize,
    pub layer: LayerId,
    pub track: i64,
    pub lower: i64,
    pub upper: i64,
}

impl SignalRoute {
    pub fn overlaps(&self, other: &SignalRoute) -> bool {
        self.layer == other.layer
            && self.track == other.track
            && self.lower < other.upper
            && other.lower < self.upper
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct TreeMetadata {
    pub ratio: usize,
    pub bit_paths: Vec<BitPath>,
    pub pool: PoolSplit,
    pub routes: Vec<SignalRoute>,
    /// `ym` risers onto `xxm`, one track per net.
    pub risers: Vec<Riser>,
}

/// A binary tree of 1:2 demux units.
pub struct DesBinaryTree {
    params: DesTreeParams,
    use_ff: Vec<bool>,
    logic_tile: ArcStr,
    clk_layer: LayerId,
}

impl DesBinaryTree {
    #[inline]
    pub fn ratio(&self) -> usize {
        self.params.tree.ratio()
    }

    fn check_tile(pinfo: &TilePattern, idx: usize) -> Result<ArcStr> {
        pinfo
            .slots()
            .get(idx)
            .map(|slot| slot.name.clone())
            .ok_or(Error::TileIndex(idx))
    }
}

impl Component for DesBinaryTree {
    type Params = DesTreeParams;

    fn new(params: &Self::Params, grid: &PlacementGrid) -> Result<Self> {
        let tree = &params.tree;
        if tree.num_stages == 0 || tree.num_stages > MAX_STAGES {
            return Err(Error::InvalidParam(format!(
                "num_stages must be between 1 and {MAX_STAGES}, got {}",
                tree.num_stages
            )));
        }
        if params.ptap_tidx.is_some() != params.ntap_tidx.is_some() {
            return Err(Error::StructuralMismatch(
                "ptap_tidx and ntap_tidx must be given together".into(),
            ));
        }
        let use_ff = tree.use_ff.per_stage(tree.num_stages)?;
        if tree.demux.clk_buf.is_none() {
            return Err(Error::MissingParam("clk_buf"));
        }
        if tree.demux.in_buf.is_some() {
            return Err(Error::Unsupported(
                "demux units in a tree cannot have an input buffer".into(),
            ));
        }
        if !(1..=2).contains(&tree.num_sig_hor_layers) {
            return Err(Error::Unsupported(format!(
                "{} horizontal signal layers; only 1 or 2 are supported",
                tree.num_sig_hor_layers
            )));
        }

        let logic_tile = Self::check_tile(&params.pinfo, params.logic_tidx)?;
        for idx in [params.ptap_tidx, params.ntap_tidx].into_iter().flatten() {
            Self::check_tile(&params.pinfo, idx)?;
        }

        let xm_layer = grid.conn_layer() + 3;
        let clk_layer = params.clk_layer.unwrap_or(xm_layer);
        if clk_layer < xm_layer {
            return Err(Error::InvalidParam(format!(
                "clock layer {clk_layer} is below the clock routing layer {xm_layer}"
            )));
        }
        grid.layer(clk_layer)?;

        Ok(Self {
            params: params.clone(),
            use_ff,
            logic_tile,
            clk_layer,
        })
    }

    fn name(&self) -> ArcStr {
        arcstr::format!("des_tree_1to{}", self.ratio())
    }

    fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        self.layout(ctx)
    }
}
