//! Build the anatomical preprocessing plan for one subject
//!
//! Usage: `anat-graph <config.json> [--dry-run]`
//!
//! Prints the execution plan as JSON. With `--dry-run` the plan is also run
//! against placeholder executors and the exposed outputs are printed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anat_workflows::{anat_preproc_graph, dry_run_registry, JsonVolumeLoader, PipelineConfig};
use pipeline_engine::{validate_graph, ExecutionPlan, GraphExecutor, UnitRegistry};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut config_path: Option<PathBuf> = None;
    let mut dry_run = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }
    let Some(config_path) = config_path else {
        eprintln!("usage: anat-graph <config.json> [--dry-run]");
        return ExitCode::from(2);
    };

    match run(config_path, dry_run).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: PathBuf, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig::load(&config_path)?;
    log::info!(
        "Loaded {} ({} T2w image(s), {} template(s))",
        config_path.display(),
        config.t2w.len(),
        config.templates.len()
    );

    let mut graph = anat_preproc_graph(&config, &JsonVolumeLoader)?;
    graph.bind_input("t2w", serde_json::json!(config.t2w))?;

    let problems = validate_graph(&graph, Some(&UnitRegistry::with_builtins()));
    for problem in &problems {
        log::warn!("{}", problem);
    }

    let plan = ExecutionPlan::build(&graph)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);

    if dry_run {
        let executor = GraphExecutor::new(Arc::new(dry_run_registry()));
        let report = executor.execute(&plan).await?;
        if !report.is_success() {
            log::warn!(
                "{} node(s) failed, {} skipped",
                report.failed().len(),
                report.skipped().len()
            );
        }
        let outputs = report.exposed_outputs(plan.graph());
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    }
    Ok(())
}
