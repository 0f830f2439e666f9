use std::collections::BTreeMap;

use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::layout::{Component, LayoutCtx, PlacementGrid};

pub mod layout;

/// Finger counts of a latch.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LatchSizing {
    pub seg_in: usize,
    pub seg_fb: usize,
    /// Clocked-device fingers. Zero lets the latch share clocks with a
    /// neighbor.
    #[serde(default)]
    pub seg_ck: usize,
}

impl LatchSizing {
    pub fn num_cols(&self) -> usize {
        2 * (self.seg_in + self.seg_fb + self.seg_ck.max(1))
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StorageParams {
    /// Name of the tile the cell is drawn in.
    pub tile: ArcStr,
    pub sizing: LatchSizing,
    /// Overrides of the tile-local horizontal track of each `hm` pin.
    #[serde(default)]
    pub sig_locs: BTreeMap<ArcStr, i64>,
    /// Leave the supplies on the connection layer instead of `hm`.
    #[serde(default)]
    pub vertical_sup: bool,
}

/// A transparent latch.
///
/// Ports: `in`, `out`, `clk` and `clkb` on `vm`; `pin`, `nin`, `nclk`,
/// `nclkb`, `pclk` and `pclkb` on `hm`; `VDD` and `VSS`.
pub struct LatchCore {
    params: StorageParams,
}

/// An edge-triggered register built from a master and a slave latch.
///
/// Adds the slave clock pins `nclkb_s` and `pclk_s` to the latch ports.
pub struct FlopCore {
    params: StorageParams,
}

fn check_sizing(sizing: &LatchSizing) -> Result<()> {
    if sizing.seg_in == 0 || sizing.seg_fb == 0 {
        return Err(Error::InvalidParam(format!(
            "latch needs at least one input and one feedback finger, got {sizing:?}"
        )));
    }
    Ok(())
}

impl Component for LatchCore {
    type Params = StorageParams;

    fn new(params: &Self::Params, _grid: &PlacementGrid) -> Result<Self> {
        check_sizing(&params.sizing)?;
        Ok(Self {
            params: params.clone(),
        })
    }

    fn name(&self) -> ArcStr {
        arcstr::literal!("latch_core")
    }

    fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        self.layout(ctx)
    }
}

impl Component for FlopCore {
    type Params = StorageParams;

    fn new(params: &Self::Params, _grid: &PlacementGrid) -> Result<Self> {
        check_sizing(&params.sizing)?;
        Ok(Self {
            params: params.clone(),
        })
    }

    fn name(&self) -> ArcStr {
        arcstr::literal!("flop_core")
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

    fn params() -> StorageParams {
        StorageParams {
            tile: LOGIC,
            sizing: LatchSizing {
                seg_in: 2,
                seg_fb: 1,
                seg_ck: 1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_latch_ports() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let latch = db.instantiate::<LatchCore>(&params()).unwrap();
        assert_eq!(latch.num_cols(), 8);
        for name in [
            "in", "out", "clk", "clkb", "pin", "nin", "nclk", "nclkb", "pclk", "pclkb", "VDD",
            "VSS",
        ] {
            assert!(latch.has_port(name), "missing port {name}");
        }
        assert!(!latch.has_port("pclk_s"));

        let vm = test_grid().conn_layer() + 2;
        assert_eq!(latch.port("out").unwrap().pins[0].layer(), vm);
        assert_eq!(latch.port("nclk").unwrap().pins[0].layer(), vm - 1);
    }

    #[test]
    fn test_flop_is_two_latches_wide() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let flop = db.instantiate::<FlopCore>(&params()).unwrap();
        assert_eq!(flop.num_cols(), 16);
        assert!(flop.has_port("nclkb_s"));
        assert!(flop.has_port("pclk_s"));
    }

    #[test]
    fn test_sig_locs_and_vertical_supplies() {
        let grid = test_grid();
        let hm = grid.conn_layer() + 1;
        let mut db = TemplateDb::new(grid.clone()).unwrap();
        let mut p = params();
        p.sig_locs.insert(arcstr::literal!("nclk"), 4);
        p.vertical_sup = true;
        let latch = db.instantiate::<LatchCore>(&p).unwrap();

        let nclk = &latch.port("nclk").unwrap().pins[0];
        assert_eq!(nclk.center(), grid.track_coord(hm, 4).unwrap());
        let vdd = latch.port("VDD").unwrap();
        assert!(vdd.pins.iter().all(|w| w.layer() == grid.conn_layer()));
    }

    #[test]
    fn test_rejects_empty_sizing() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let mut p = params();
        p.sizing.seg_fb = 0;
        assert!(matches!(
            db.instantiate::<LatchCore>(&p),
            Err(Error::InvalidParam(_))
        ));
    }
}
