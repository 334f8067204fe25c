//! The `madats` CLI (spec §6, ADDED per SPEC_FULL.md component #13): parses a
//! workflow description, runs the configured policy, builds the DAG, and
//! either prints the plan (`madats plan`) or executes it (`madats run`).
//! Builder-style `clap::App`/`Arg`/`SubCommand`, matching the teacher's
//! `bin/main.rs`.

use clap::{App, Arg, ArgMatches, SubCommand};
use madats::config::MadatsConfig;
use madats::dag::{self, Dag};
use madats::executor::{ExecutionMode, Executor};
use madats::logging::{setup_logging, LoggingConfiguration};
use madats::metrics::ExecutorMetrics;
use madats::policy::{self, Policy};
use madats::scheduler::SchedulerAdapter;
use madats::status_db::{SqliteStatusStore, StatusStore};
use madats::storage::{StorageCatalog, YamlStorageCatalog};
use madats::vds::VirtualDataSpace;
use madats::workflow::Workflow;
use madats::Error;
use slog::Logger;
use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;
use std::sync::Arc;

fn policy_validator(s: String) -> Result<(), String> {
    Policy::from_str(&s).map(|_| ())
}

fn mode_validator(s: String) -> Result<(), String> {
    match s.as_str() {
        "dag" | "bin" => Ok(()),
        other => Err(format!("unknown execution mode {:?}", other)),
    }
}

fn workflow_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("workflow")
            .long("workflow")
            .short("w")
            .value_name("PATH")
            .required(true)
            .help("Path to the workflow description YAML file"),
        Arg::with_name("policy")
            .long("policy")
            .value_name("POLICY")
            .default_value("none")
            .validator(policy_validator)
            .help("Data-management policy: none, workflow-aware, or storage-aware"),
        Arg::with_name("auto-cleanup")
            .long("auto-cleanup")
            .help("Synthesize cleanup tasks for non-persistent temporary VDOs"),
        Arg::with_name("workflow-id")
            .long("workflow-id")
            .value_name("ID")
            .help("Identifier recorded for this run; a UUID is generated if omitted"),
        Arg::with_name("mode")
            .long("mode")
            .value_name("MODE")
            .default_value("dag")
            .validator(mode_validator)
            .help("dag (topological order) or bin (level order)"),
    ]
}

fn resolve_config(matches: &ArgMatches) -> Result<MadatsConfig, Error> {
    match matches.value_of("madats-home") {
        Some(home) => Ok(MadatsConfig::from_home(PathBuf::from(home))?),
        None => Ok(MadatsConfig::from_env()?),
    }
}

fn build_vds_from_args(
    logger: &Logger,
    matches: &ArgMatches,
    config: &MadatsConfig,
) -> Result<VirtualDataSpace, Error> {
    let catalog: Arc<dyn StorageCatalog> = Arc::new(YamlStorageCatalog::from_path(&config.storage_catalog_path())?);
    let workflow_path = Path::new(matches.value_of("workflow").expect("required"));
    let workflow = Workflow::from_path(workflow_path)?;

    let mut vds = madats::workflow::build_vds(logger.clone(), catalog, &workflow);
    let policy: Policy = matches.value_of("policy").unwrap_or("none").parse().unwrap_or_default();
    vds.set_strategy(policy);
    vds.set_auto_cleanup(matches.is_present("auto-cleanup"));
    Ok(vds)
}

/// Builds the DAG, lets the configured policy see a stable predecessor/
/// successor view, applies it, then rebuilds the DAG over whatever data
/// movement the policy wired in (spec §4.4: policy mutation happens before
/// the DAG is frozen for the executor).
fn plan(vds: &mut VirtualDataSpace) -> Result<Dag, Error> {
    let initial = dag::build(vds)?;
    dag::materialize_edges(vds, &initial)?;
    policy::apply(vds)?;
    Ok(dag::build(vds)?)
}

fn cmd_plan(logger: &Logger, matches: &ArgMatches) -> Result<i32, Error> {
    let config = resolve_config(matches)?;
    let mut vds = build_vds_from_args(logger, matches, &config)?;
    let dag = plan(&mut vds)?;

    match matches.value_of("mode").unwrap_or("dag") {
        "bin" => {
            for (i, bin) in dag.bin_execution_order()?.iter().enumerate() {
                println!("bin {}:", i);
                for &task_id in bin {
                    let task = vds.task(task_id)?;
                    println!("  {} [{}] {}", task.name, task_id, task.command);
                }
            }
        }
        _ => {
            for &task_id in dag.batch_execution_order()?.iter() {
                let task = vds.task(task_id)?;
                println!("{} [{}] {}", task.name, task_id, task.command);
            }
        }
    }
    Ok(0)
}

fn cmd_run(logger: &Logger, matches: &ArgMatches) -> Result<i32, Error> {
    let config = resolve_config(matches)?;
    let mut vds = build_vds_from_args(logger, matches, &config)?;
    let dag = plan(&mut vds)?;

    let scheduler = SchedulerAdapter::from_config(&config)?;
    let workflow_id = matches
        .value_of("workflow-id")
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mode = match matches.value_of("mode").unwrap_or("dag") {
        "bin" => ExecutionMode::Bin,
        _ => ExecutionMode::Dag,
    };

    let mut executor = Executor::new(logger.clone(), config, scheduler, workflow_id).with_mode(mode);

    if let Some(path) = matches.value_of("status-db") {
        let store: Arc<dyn StatusStore> =
            Arc::new(SqliteStatusStore::open(Path::new(path)).map_err(|e| Error::Executor(e.into()))?);
        executor = executor.with_status_store(store);
    }

    let metrics = if matches.is_present("metrics-out") {
        Some(Arc::new(ExecutorMetrics::new().map_err(Error::AnyhowError)?))
    } else {
        None
    };
    if let Some(m) = &metrics {
        executor = executor.with_metrics(m.clone());
    }
    if matches.is_present("keep-scripts") {
        executor = executor.with_keep_scripts(true);
    }

    let report = executor.execute(&vds, &dag)?;

    if let Some(path) = matches.value_of("metrics-out") {
        let text = madats::metrics::gather_text().map_err(Error::AnyhowError)?;
        std::fs::write(path, text).map_err(|e| Error::AnyhowError(e.into()))?;
    }

    for result in report.failed() {
        eprintln!("task {} failed: {:?}", result.task_id, result.outcome);
    }
    Ok(report.exit_code())
}

fn main() {
    let matches = App::new("madats")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Virtual Data Space planner and concurrent task executor for multi-tier scientific workflows")
        .arg(
            Arg::with_name("madats-home")
                .long("madats-home")
                .value_name("DIR")
                .global(true)
                .help("Overrides MADATS_HOME for this invocation"),
        )
        .arg(
            Arg::with_name("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .default_value("info")
                .global(true)
                .help("Minimum slog level to emit (critical, error, warning, info, debug, trace)"),
        )
        .subcommand(
            SubCommand::with_name("plan")
                .about("Prints the planned task order without executing anything")
                .args(&workflow_args()),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Executes a workflow")
                .args(&workflow_args())
                .arg(
                    Arg::with_name("keep-scripts")
                        .long("keep-scripts")
                        .help("Keep synthesized submission scripts after the run completes"),
                )
                .arg(
                    Arg::with_name("status-db")
                        .long("status-db")
                        .value_name("PATH")
                        .help("Persist task status records to a SQLite database at this path"),
                )
                .arg(
                    Arg::with_name("metrics-out")
                        .long("metrics-out")
                        .value_name("PATH")
                        .help("Write Prometheus text-format metrics to this path on completion"),
                ),
        )
        .get_matches();

    let logging = setup_logging(&LoggingConfiguration {
        force_json_output: false,
        version_string: env!("CARGO_PKG_VERSION"),
        log_level: matches.value_of("log-level").unwrap_or("info"),
    });
    // Keep the scope guard alive for the process lifetime; dropping it early
    // would tear down the global logger registration mid-run.
    let (logger, _guard) = match logging {
        Ok(pair) => pair,
        Err(e) => {
            eprintln!("failed to initialize logging: {}", e);
            process::exit(3);
        }
    };

    let outcome = match matches.subcommand() {
        ("plan", Some(sub)) => cmd_plan(&logger, sub),
        ("run", Some(sub)) => cmd_run(&logger, sub),
        _ => {
            eprintln!("a subcommand is required (run, plan); see --help");
            process::exit(2);
        }
    };

    match outcome {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {}", e);
            let code = match &e {
                Error::Workflow(_) | Error::Dag(madats::dag::DagError::UnmappedVdo { .. }) => 2,
                Error::Config(_) | Error::Storage(_) => 3,
                _ => 1,
            };
            process::exit(code);
        }
    }
}
