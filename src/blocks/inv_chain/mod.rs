use std::collections::BTreeMap;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::{Component, LayoutCtx, PlacementGrid};

pub mod layout;

#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct InvChainSizing {
    /// Fingers of each inverter, input first.
    pub seg_list: Vec<usize>,
}

impl InvChainSizing {
    #[inline]
    pub fn num_stages(&self) -> usize {
        self.seg_list.len()
    }

    pub fn num_cols(&self) -> usize {
        self.seg_list.iter().map(|&seg| 2 * seg.max(1)).sum()
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct InvChainParams {
    pub tile: ArcStr,
    pub sizing: InvChainSizing,
    /// Also expose the complement output `outb`.
    #[serde(default)]
    pub dual_output: bool,
    #[serde(default)]
    pub sig_locs: BTreeMap<ArcStr, i64>,
    #[serde(default)]
    pub vertical_sup: bool,
}

/// A chain of inverters.
///
/// `in` is an `hm` pin on the `nin0` track; `out` (and `outb` when dual
/// output) are `vm` pins. With a single stage, both outputs are the
/// inverter output.
pub struct InvChain {
    params: InvChainParams,
}

impl InvChain {
    #[inline]
    pub fn num_stages(&self) -> usize {
        self.params.sizing.num_stages()
    }
}

impl Component for InvChain {
    type Params = InvChainParams;

    fn new(params: &Self::Params, _grid: &PlacementGrid) -> Result<Self> {
        if params.sizing.seg_list.is_empty() {
            return Err(Error::InvalidParam(
                "inverter chain needs at least one stage".into(),
            ));
        }
        Ok(Self {
            params: params.clone(),
        })
    }

    fn name(&self) -> ArcStr {
        arcstr::format!("inv_chain_{}", self.num_stages())
    }

    fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        self.layout(ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::layout::TemplateDb;
    use crate::tests::{test_grid, LOGIC};

    use super::*;

    fn params(seg_list: Vec<usize>, dual_output: bool) -> InvChainParams {
        InvChainParams {
            tile: LOGIC,
            sizing: InvChainSizing { seg_list },
            dual_output,
            ..Default::default()
        }
    }

    #[test]
    fn test_inv_chain_ports() {
        let grid = test_grid();
        let mut db = TemplateDb::new(grid.clone()).unwrap();
        let chain = db.instantiate::<InvChain>(&params(vec![1, 2], true)).unwrap();
        assert_eq!(chain.num_cols(), 6);
        assert_eq!(
            chain.port("in").unwrap().pins[0].layer(),
            grid.conn_layer() + 1
        );
        let out = chain.port("out").unwrap().pins[0];
        let outb = chain.port("outb").unwrap().pins[0];
        assert_ne!(out.center(), outb.center());

        let single = db.instantiate::<InvChain>(&params(vec![2], false)).unwrap();
        assert!(!single.has_port("outb"));
    }

    #[test]
    fn test_single_stage_outputs_coincide() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let chain = db.instantiate::<InvChain>(&params(vec![2], true)).unwrap();
        assert_eq!(
            chain.port("out").unwrap().pins,
            chain.port("outb").unwrap().pins
        );
    }

    #[test]
    fn test_rejects_empty_chain() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        assert!(db.instantiate::<InvChain>(&params(vec![], false)).is_err());
    }
}
