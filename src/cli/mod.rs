use std::fs::canonicalize;
use std::path::PathBuf;

use clap::Parser;

use crate::cli::args::Args;
use crate::cli::progress::StepContext;
use crate::config::parse_config;
use crate::plan::{execute_plan, generate_plan, ExecutePlanParams, TaskKey};
use crate::Result;

pub mod args;
pub mod progress;

pub const BANNER: &str = r"
     _           _
  __| | ___  ___| |_ _ __ ___  ___
 / _` |/ _ \/ __| __| '__/ _ \/ _ \
| (_| |  __/\__ \ |_| | |  __/  __/
 \__,_|\___||___/\__|_|  \___|\___|

destree v0.1
";

pub fn run() -> Result<()> {
    let args = Args::parse();

    let config_path = canonicalize(&args.config)?;

    println!("{BANNER}");

    println!("Reading configuration file...\n");
    let config = parse_config(&config_path)?;
    let array = &config.array;

    println!("Configuration file: {:?}", &config_path);
    println!("Deserializer parameters:");
    println!("\tNumber of words: {}", array.narr);
    println!("\tInput width: {}", array.in_width);
    println!("\tDeserialization ratio: 1:{}", array.unit.ratio());
    println!("\tDummy units: {}", array.ndum);
    println!();

    let mut ctx = StepContext::new();

    let plan = ctx.check(generate_plan(&config))?;
    ctx.finish(TaskKey::GeneratePlan);

    let work_dir = if let Some(output_dir) = args.output_dir {
        output_dir
    } else {
        PathBuf::from(plan.name.as_str())
    };
    std::fs::create_dir_all(&work_dir)?;
    let work_dir = canonicalize(work_dir)?;

    let res = execute_plan(ExecutePlanParams {
        work_dir: &work_dir,
        plan: &plan,
        ctx: Some(&mut ctx),
    });

    ctx.check(res)?;
    println!("Artifacts saved to: {:?}\n", &work_dir);

    Ok(())
}
