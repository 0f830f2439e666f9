use std::collections::{BTreeMap, BTreeSet};

use arcstr::ArcStr;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use super::tree::TreeSizing;
use crate::error::{Error, Result};
use crate::layout::grid::TileSlot;
use crate::layout::{Component, LayerId, LayoutCtx, PinMode, PlacementGrid, TilePattern};

pub mod layout;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Builder, Serialize, Deserialize)]
#[builder(derive(Debug))]
pub struct DesArrayParams {
    /// Bits per input word.
    #[builder(default = "1")]
    #[serde(default = "default_one")]
    pub in_width: usize,
    /// Number of words.
    #[builder(default = "1")]
    #[serde(default = "default_one")]
    pub narr: usize,
    /// Dummy units, split evenly between both ends of the column.
    #[builder(default)]
    #[serde(default)]
    pub ndum: usize,
    /// Explicit dummy rows. Takes precedence over `ndum`.
    #[builder(default)]
    #[serde(default)]
    pub dum_unit_locs: Option<Vec<usize>>,
    /// The (word, bit) carried by each real unit, bottom to top.
    #[builder(default)]
    #[serde(default)]
    pub in_order: Option<Vec<(usize, usize)>>,
    pub unit: TreeSizing,
    #[builder(setter(into), default = "arcstr::literal!(\"logic\")")]
    #[serde(default = "default_logic_tile")]
    pub logic_tile: ArcStr,
    /// Substrate rows. Both or neither must be given.
    #[builder(default)]
    #[serde(default)]
    pub ptap_tile: Option<ArcStr>,
    #[builder(default)]
    #[serde(default)]
    pub ntap_tile: Option<ArcStr>,
    #[builder(default)]
    #[serde(default)]
    pub export_nets: bool,
    #[builder(default)]
    #[serde(default)]
    pub export_unit_sup: bool,
    /// Layer the merged stage clocks are exported on. Defaults to `xm`.
    #[builder(default)]
    #[serde(default)]
    pub clk_layer: Option<LayerId>,
    #[builder(default)]
    #[serde(default)]
    pub clk_pinmode: PinMode,
    /// Track overrides for vertical clock pins, keyed by net name.
    #[builder(default)]
    #[serde(default)]
    pub sig_locs: BTreeMap<ArcStr, i64>,
    /// Layer the supplies are stacked to. Defaults to `xxm`.
    #[builder(default)]
    #[serde(default)]
    pub sup_layer: Option<LayerId>,
}

fn default_one() -> usize {
    1
}

fn default_logic_tile() -> ArcStr {
    arcstr::literal!("logic")
}

impl DesArrayParams {
    #[inline]
    pub fn builder() -> DesArrayParamsBuilder {
        DesArrayParamsBuilder::default()
    }
}

/// What a physical row of the array holds.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayRow {
    Dummy,
    Unit { arr: usize, bit: usize },
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ArrayMetadata {
    /// Rows from the bottom of the column.
    pub rows: Vec<ArrayRow>,
    /// Tracks of the stage clocks, when exported on a vertical layer.
    pub clk_div_tidx: Vec<i64>,
}

/// A column of deserializer trees.
pub struct DesArray {
    params: DesArrayParams,
    rows: Vec<ArrayRow>,
    /// Supply tile names, ptap then ntap.
    sup_tiles: Option<(ArcStr, ArcStr)>,
}

impl DesArray {
    #[inline]
    pub fn rows(&self) -> &[ArrayRow] {
        &self.rows
    }

    /// Number of tiles in each unit slot.
    #[inline]
    pub fn tiles_per_row(&self) -> usize {
        if self.sup_tiles.is_some() {
            3
        } else {
            1
        }
    }

    /// The base tile stack of the column.
    pub fn pattern(&self) -> TilePattern {
        let logic = |flip| TileSlot {
            name: self.params.logic_tile.clone(),
            flip,
        };
        let tap = |name: &ArcStr| TileSlot {
            name: name.clone(),
            flip: false,
        };
        let slots = (0..self.rows.len()).flat_map(|row| match &self.sup_tiles {
            None => vec![logic(row % 2 == 0)],
            Some((ptap, ntap)) if row % 2 == 0 => vec![tap(ptap), logic(false), tap(ntap)],
            Some((ptap, ntap)) => vec![tap(ntap), logic(true), tap(ptap)],
        });
        TilePattern(slots.collect())
    }
}

/// Maps each physical row to a dummy or a (word, bit) address.
fn plan_rows(params: &DesArrayParams) -> Result<Vec<ArrayRow>> {
    let num_units = params.narr * params.in_width;
    if num_units == 0 {
        return Err(Error::InvalidParam(
            "an array needs at least one word of at least one bit".into(),
        ));
    }

    let default_order = (0..params.narr)
        .flat_map(|arr| (0..params.in_width).map(move |bit| (arr, bit)))
        .collect::<Vec<_>>();
    let in_order = match &params.in_order {
        None => default_order,
        Some(order) => {
            let given = order.iter().copied().collect::<BTreeSet<_>>();
            let expected = default_order.into_iter().collect::<BTreeSet<_>>();
            if order.len() != num_units || given != expected {
                return Err(Error::StructuralMismatch(format!(
                    "in_order must list every (word, bit) pair of a {}x{} array exactly once",
                    params.narr, params.in_width
                )));
            }
            order.clone()
        }
    };

    let dummies = match &params.dum_unit_locs {
        Some(locs) if !locs.is_empty() => {
            let set = locs.iter().copied().collect::<BTreeSet<_>>();
            let num_rows = num_units + locs.len();
            if set.len() != locs.len() {
                return Err(Error::StructuralMismatch(format!(
                    "dum_unit_locs {locs:?} contains duplicates"
                )));
            }
            if let Some(&loc) = set.iter().find(|&&loc| loc >= num_rows) {
                return Err(Error::StructuralMismatch(format!(
                    "dummy location {loc} is outside the {num_rows} rows of the array"
                )));
            }
            set
        }
        _ => {
            if params.ndum % 2 != 0 {
                return Err(Error::StructuralMismatch(format!(
                    "ndum = {} must be even",
                    params.ndum
                )));
            }
            let half = params.ndum / 2;
            (0..half)
                .chain(num_units + half..num_units + params.ndum)
                .collect()
        }
    };

    let num_rows = num_units + dummies.len();
    let mut units = in_order.into_iter();
    (0..num_rows)
        .map(|row| {
            if dummies.contains(&row) {
                Ok(ArrayRow::Dummy)
            } else {
                units
                    .next()
                    .map(|(arr, bit)| ArrayRow::Unit { arr, bit })
                    .ok_or_else(|| Error::StructuralMismatch("ran out of units".into()))
            }
        })
        .collect()
}

impl Component for DesArray {
    type Params = DesArrayParams;

    fn new(params: &Self::Params, grid: &PlacementGrid) -> Result<Self> {
        let sup_tiles = match (&params.ptap_tile, &params.ntap_tile) {
            (Some(p), Some(n)) => Some((p.clone(), n.clone())),
            (None, None) => None,
            _ => {
                return Err(Error::StructuralMismatch(
                    "ptap_tile and ntap_tile must be given together".into(),
                ))
            }
        };
        let rows = plan_rows(params)?;
        grid.tile(&params.logic_tile)?;
        if let Some((ptap, ntap)) = &sup_tiles {
            grid.tile(ptap)?;
            grid.tile(ntap)?;
        }
        Ok(Self {
            params: params.clone(),
            rows,
            sup_tiles,
        })
    }

    fn name(&self) -> ArcStr {
        arcstr::format!(
            "des_array_{}x{}_1to{}",
            self.params.narr,
            self.params.in_width,
            self.params.unit.ratio()
        )
    }

    fn layout(&self, ctx: &mut LayoutCtx) -> Result<()> {
        self.layout(ctx)
    }
}

#[cfg(test)]
mod tests {
    use crate::blocks::tree::DesBinaryTree;
    use crate::layout::cell::TapKind;
    use crate::layout::{Cell, TemplateDb};
    use crate::tests::{test_grid, tree_sizing};

    use super::*;

    fn params() -> DesArrayParamsBuilder {
        let mut builder = DesArrayParams::builder();
        builder.unit(tree_sizing(2));
        builder
    }

    fn visible(cell: &Cell) -> Vec<&str> {
        cell.visible_ports().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_array_with_end_dummies() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let array = db
            .instantiate::<DesArray>(&params().narr(2).ndum(2).build().unwrap())
            .unwrap();

        let meta = array.get_metadata::<ArrayMetadata>().unwrap();
        assert_eq!(
            meta.rows,
            vec![
                ArrayRow::Dummy,
                ArrayRow::Unit { arr: 0, bit: 0 },
                ArrayRow::Unit { arr: 1, bit: 0 },
                ArrayRow::Dummy,
            ]
        );
        assert_eq!(array.tiles().len(), 4);
        assert!(meta.clk_div_tidx.is_empty());

        let ports = visible(&array);
        let din = ports
            .iter()
            .filter(|p| p.starts_with("din"))
            .collect::<Vec<_>>();
        assert_eq!(din, vec![&"din_0", &"din_1"]);
        assert_eq!(ports.iter().filter(|p| p.starts_with("dout_0<")).count(), 4);
        assert!(ports.contains(&"dout_1<3>"));
        assert!(ports.contains(&"clk_div_0"));
        assert!(ports.contains(&"clk_div_1"));
        assert!(ports.contains(&"VDD"));
        assert!(!ports.iter().any(|p| p.starts_with("clk_div_0_vm")));

        // Dummy inputs and clocks are tied off.
        let ties = array.port("VSS_vm").unwrap();
        assert!(ties.hidden);
        // Two input stubs and one clock pin per unit, in each dummy.
        assert_eq!(ties.pins.len(), 2 * (2 + 1 + 2));
        assert!(array.port("din_vm_0_0").unwrap().hidden);

        // Supply columns on both edges of every row.
        assert_eq!(array.taps().len(), 8);
        assert!(array.taps().iter().all(|t| t.kind == TapKind::Column));

        // The left tap column abuts the trees.
        let grid = test_grid();
        let unit_ncols = array.instances()[0].num_cols();
        assert!(array.instances().iter().all(|i| i.col() == grid.tap_ncols));
        let right_col = grid.tap_ncols + unit_ncols + grid.sub_sep_col;
        assert!(array
            .taps()
            .iter()
            .all(|t| t.col == 0 || t.col == right_col));
        assert_eq!(
            array.num_cols(),
            unit_ncols + 2 * grid.tap_ncols + grid.sub_sep_col
        );

        // Real and dummy trees use separate templates.
        assert_eq!(db.num_templates::<DesBinaryTree>(), 2);
    }

    #[test]
    fn test_dummy_rows_are_tied_off() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let array = db
            .instantiate::<DesArray>(&params().narr(2).ndum(2).build().unwrap())
            .unwrap();

        let dummies = array
            .instances()
            .iter()
            .filter(|inst| inst.tile() == 0 || inst.tile() == 3)
            .collect::<Vec<_>>();
        assert_eq!(dummies.len(), 2);
        assert_ne!(dummies[0].cell().name(), array.instances()[1].cell().name());

        // Only the two real rows surface data ports.
        for port in array.visible_ports() {
            if !port.name.starts_with("din") && !port.name.starts_with("dout") {
                continue;
            }
            let arr = port
                .name
                .split(['_', '<'])
                .nth(1)
                .and_then(|arr| arr.parse::<usize>().ok());
            if let Some(arr) = arr {
                assert!(arr < 2, "{}", port.name);
            }
        }

        let ties = &array.port("VSS_vm").unwrap().pins;
        for inst in dummies {
            let mut tied = inst.pins("din_vm").unwrap();
            for stage in 0..2 {
                tied.extend(inst.pins(&format!("clk_div_{stage}_vm")).unwrap());
            }
            for pin in tied.iter() {
                assert!(ties.contains(pin), "dummy pin {pin:?} is not tied to VSS");
                for port in array.ports().filter(|p| p.name != "VSS_vm") {
                    assert!(
                        !port.pins.contains(pin),
                        "dummy pin {pin:?} is part of `{}`",
                        port.name
                    );
                }
            }
        }
    }

    #[test]
    fn test_bit_order_and_templates() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let array = db
            .instantiate::<DesArray>(&params().narr(4).in_width(2).build().unwrap())
            .unwrap();
        assert_eq!(db.num_templates::<DesBinaryTree>(), 1);

        let meta = array.get_metadata::<ArrayMetadata>().unwrap();
        assert_eq!(meta.rows[1], ArrayRow::Unit { arr: 0, bit: 1 });
        assert_eq!(meta.rows[2], ArrayRow::Unit { arr: 1, bit: 0 });
        // Bit 1 of word 0 carries output bits 1, 3, 5, 7.
        assert!(array.has_port("din_0<1>"));
        assert!(array.has_port("dout_0<7>"));
        assert!(!array.has_port("dout_0<8>"));

        let mut db = TemplateDb::new(test_grid()).unwrap();
        db.instantiate::<DesArray>(&params().narr(4).in_width(2).ndum(2).build().unwrap())
            .unwrap();
        assert_eq!(db.num_templates::<DesBinaryTree>(), 2);
    }

    #[test]
    fn test_input_permutation() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let order = vec![(1, 1), (0, 0), (1, 0), (0, 1)];
        let array = db
            .instantiate::<DesArray>(
                &params()
                    .narr(2)
                    .in_width(2)
                    .in_order(Some(order.clone()))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let meta = array.get_metadata::<ArrayMetadata>().unwrap();
        let placed = meta
            .rows
            .iter()
            .map(|row| match row {
                ArrayRow::Unit { arr, bit } => (*arr, *bit),
                ArrayRow::Dummy => panic!("unexpected dummy"),
            })
            .collect::<Vec<_>>();
        assert_eq!(placed, order);

        for bad in [
            vec![(0, 0), (0, 0), (1, 0), (1, 1)],
            vec![(0, 0), (0, 1), (1, 0)],
            vec![(0, 0), (0, 1), (1, 0), (2, 1)],
        ] {
            let err = db
                .instantiate::<DesArray>(
                    &params()
                        .narr(2)
                        .in_width(2)
                        .in_order(Some(bad))
                        .build()
                        .unwrap(),
                )
                .unwrap_err();
            assert!(matches!(err, Error::StructuralMismatch(_)));
        }
    }

    #[test]
    fn test_interior_dummies() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let array = db
            .instantiate::<DesArray>(
                &params()
                    .narr(2)
                    .dum_unit_locs(Some(vec![1]))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let meta = array.get_metadata::<ArrayMetadata>().unwrap();
        assert_eq!(
            meta.rows,
            vec![
                ArrayRow::Unit { arr: 0, bit: 0 },
                ArrayRow::Dummy,
                ArrayRow::Unit { arr: 1, bit: 0 },
            ]
        );

        for locs in [vec![3], vec![1, 1]] {
            let err = db
                .instantiate::<DesArray>(
                    &params()
                        .narr(2)
                        .dum_unit_locs(Some(locs))
                        .build()
                        .unwrap(),
                )
                .unwrap_err();
            assert!(matches!(err, Error::StructuralMismatch(_)));
        }
    }

    #[test]
    fn test_rejects_bad_structure() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let err = db
            .instantiate::<DesArray>(&params().ndum(3).build().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::StructuralMismatch(_)));

        let err = db
            .instantiate::<DesArray>(
                &params()
                    .ptap_tile(Some(arcstr::literal!("ptap")))
                    .build()
                    .unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::StructuralMismatch(_)));

        let err = db
            .instantiate::<DesArray>(&params().narr(0).build().unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParam(_)));
        assert!(db.is_empty());
    }

    #[test]
    fn test_supply_rows() {
        let mut db = TemplateDb::new(test_grid()).unwrap();
        let array = db
            .instantiate::<DesArray>(
                &params()
                    .narr(3)
                    .ptap_tile(Some(arcstr::literal!("ptap")))
                    .ntap_tile(Some(arcstr::literal!("ntap")))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(array.tiles().len(), 9);
        assert_eq!(db.num_templates::<DesBinaryTree>(), 2);
        assert_eq!(array.taps().len(), 6);
        assert!(array.taps().iter().all(|t| t.kind == TapKind::Contact));
        assert!(array
            .instances()
            .iter()
            .all(|inst| inst.tile() % 3 == 0));
    }

    #[test]
    fn test_vertical_clock_and_supply_layers() {
        let grid = test_grid();
        let hm = grid.conn_layer() + 1;
        let ym = grid.conn_layer() + 4;
        let xxm = grid.conn_layer() + 5;
        let mut db = TemplateDb::new(grid).unwrap();

        let array = db
            .instantiate::<DesArray>(&params().narr(2).clk_layer(Some(ym)).build().unwrap())
            .unwrap();
        let meta = array.get_metadata::<ArrayMetadata>().unwrap();
        assert_eq!(meta.clk_div_tidx.len(), 2);
        let clk = array.port("clk_div_0").unwrap();
        assert_eq!(clk.pins.len(), 1);
        assert_eq!(clk.pins[0].layer(), ym);
        assert!(array
            .port("VDD")
            .unwrap()
            .pins
            .iter()
            .all(|w| w.layer() == xxm));

        let array = db
            .instantiate::<DesArray>(
                &params()
                    .narr(2)
                    .clk_layer(Some(ym))
                    .clk_pinmode(PinMode::Upper)
                    .sig_locs(BTreeMap::from([(arcstr::literal!("clk_div_1"), 5)]))
                    .sup_layer(Some(hm))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let meta = array.get_metadata::<ArrayMetadata>().unwrap();
        assert_eq!(meta.clk_div_tidx[1], 5);
        assert_eq!(array.port("clk_div_1").unwrap().mode, PinMode::Upper);
        assert!(array
            .port("VDD")
            .unwrap()
            .pins
            .iter()
            .all(|w| w.layer() == hm));
    }
}
