use std::collections::BTreeMap;
use std::path::Path;

use anyhow::bail;
use arcstr::ArcStr;
use log::info;
use serde::Serialize;

use crate::blocks::array::{ArrayMetadata, DesArray, DesArrayParams};
use crate::blocks::demux::Demux1To2;
use crate::blocks::inv_chain::InvChain;
use crate::blocks::latch::{FlopCore, LatchCore};
use crate::blocks::tree::DesBinaryTree;
use crate::cli::progress::StepContext;
use crate::config::DesConfig;
use crate::layout::grid::RoutingDir;
use crate::layout::{Cell, Component, LayerId, PinMode, PlacementGrid, TemplateDb, WireArray};
use crate::paths::out_json;
use crate::Result;

/// A validated deserializer array compilation.
pub struct DesPlan {
    pub name: ArcStr,
    pub grid: PlacementGrid,
    pub array: DesArrayParams,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    GeneratePlan,
    GenerateLayout,
    WriteReport,
}

pub struct ExecutePlanParams<'a> {
    pub work_dir: &'a Path,
    pub plan: &'a DesPlan,
    pub ctx: Option<&'a mut StepContext>,
}

pub fn generate_plan(config: &DesConfig) -> Result<DesPlan> {
    if config.name.is_empty() {
        bail!("The output name must not be empty");
    }
    config.grid.validate()?;
    if config.array.unit.num_stages == 0 {
        bail!("The deserializer tree must have at least one stage");
    }
    // Surfaces structural errors before any layout is generated.
    DesArray::new(&config.array, &config.grid)?;

    Ok(DesPlan {
        name: config.name.clone(),
        grid: config.grid.clone(),
        array: config.array.clone(),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PinReport {
    pub layer: LayerId,
    pub dir: RoutingDir,
    pub center: i64,
    pub lower: i64,
    pub upper: i64,
    pub line: i64,
}

impl From<&WireArray> for PinReport {
    fn from(wire: &WireArray) -> Self {
        Self {
            layer: wire.layer(),
            dir: wire.dir(),
            center: wire.center(),
            lower: wire.lower(),
            upper: wire.upper(),
            line: wire.line(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PortReport {
    pub name: ArcStr,
    pub hidden: bool,
    pub mode: PinMode,
    pub pins: Vec<PinReport>,
}

/// Summary of a compiled array, written next to the other artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct LayoutReport {
    pub name: ArcStr,
    pub cell: ArcStr,
    pub num_cols: usize,
    pub width: i64,
    pub height: i64,
    pub ports: Vec<PortReport>,
    /// Distinct templates generated per component kind.
    pub templates: BTreeMap<&'static str, usize>,
    pub metadata: Option<ArrayMetadata>,
    pub sch_params: serde_json::Value,
}

impl LayoutReport {
    fn new(name: &ArcStr, cell: &Cell, db: &TemplateDb) -> Self {
        let ports = cell
            .ports()
            .map(|port| PortReport {
                name: port.name.clone(),
                hidden: port.hidden,
                mode: port.mode,
                pins: port.pins.iter().map(PinReport::from).collect(),
            })
            .collect();
        let templates = BTreeMap::from([
            ("inv_chain", db.num_templates::<InvChain>()),
            ("latch_core", db.num_templates::<LatchCore>()),
            ("flop_core", db.num_templates::<FlopCore>()),
            ("demux_1to2", db.num_templates::<Demux1To2>()),
            ("des_tree", db.num_templates::<DesBinaryTree>()),
            ("des_array", db.num_templates::<DesArray>()),
        ]);
        Self {
            name: name.clone(),
            cell: cell.name().clone(),
            num_cols: cell.num_cols(),
            width: cell.width(),
            height: cell.height(),
            ports,
            templates,
            metadata: cell.get_metadata::<ArrayMetadata>().cloned(),
            sch_params: cell.sch_params().clone(),
        }
    }
}

macro_rules! try_finish_task {
    ( $ctx:expr, $task:expr ) => {
        if let Some(ctx) = $ctx.as_mut() {
            ctx.finish($task);
        }
    };
}

pub fn execute_plan(params: ExecutePlanParams) -> Result<LayoutReport> {
    let ExecutePlanParams {
        work_dir,
        plan,
        mut ctx,
    } = params;

    std::fs::create_dir_all(work_dir)?;

    info!("compiling deserializer array `{}`", plan.name);
    let mut db = TemplateDb::new(plan.grid.clone())?;
    let cell = db.instantiate::<DesArray>(&plan.array)?;
    info!(
        "generated `{}`: {} x {} with {} templates",
        cell.name(),
        cell.width(),
        cell.height(),
        db.len()
    );
    try_finish_task!(ctx, TaskKey::GenerateLayout);

    let report = LayoutReport::new(&plan.name, &cell, &db);
    let report_path = out_json(work_dir, &plan.name);
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
    try_finish_task!(ctx, TaskKey::WriteReport);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use crate::config::parse_config;
    use crate::tests::{test_grid, tree_sizing};

    use super::*;

    fn config(array: DesArrayParams) -> DesConfig {
        DesConfig {
            name: arcstr::literal!("des_test"),
            grid: test_grid(),
            array,
        }
    }

    #[test]
    fn test_execute_plan() -> Result<()> {
        let array = DesArrayParams::builder()
            .narr(2)
            .ndum(2)
            .unit(tree_sizing(2))
            .build()?;
        let plan = generate_plan(&config(array))?;

        let work_dir = tempfile::tempdir()?;
        let report = execute_plan(ExecutePlanParams {
            work_dir: work_dir.path(),
            plan: &plan,
            ctx: None,
        })?;
        assert_eq!(report.templates["des_tree"], 2);
        assert_eq!(report.templates["des_array"], 1);
        assert!(report.ports.iter().any(|p| p.name == "dout_1<3>" && !p.hidden));

        let written = std::fs::read_to_string(out_json(work_dir.path(), "des_test"))?;
        let value: serde_json::Value = serde_json::from_str(&written)?;
        assert_eq!(value["name"], "des_test");
        assert_eq!(value["metadata"]["rows"][0], "dummy");
        Ok(())
    }

    #[test]
    fn test_plan_rejects_bad_config() {
        let array = DesArrayParams::builder()
            .ndum(1)
            .unit(tree_sizing(2))
            .build()
            .unwrap();
        assert!(generate_plan(&config(array)).is_err());

        let mut cfg = config(
            DesArrayParams::builder()
                .unit(tree_sizing(2))
                .build()
                .unwrap(),
        );
        cfg.grid.col_pitch = 0;
        assert!(generate_plan(&cfg).is_err());
    }

    #[test]
    fn test_default_config() -> Result<()> {
        let cfg = parse_config(concat!(env!("CARGO_MANIFEST_DIR"), "/destree.toml"))?;
        assert_eq!(cfg.grid, test_grid());
        assert_eq!(cfg.array.narr, 4);
        assert_eq!(cfg.array.unit, tree_sizing(2));
        generate_plan(&cfg)?;
        Ok(())
    }
}
