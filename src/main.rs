use nfsbench::{
    clap_args,
    config::{Config, EngineKind, NfsVersion, StorageType},
    driver::CommandDriver,
    execution_plan::{build_execution_plan, PlanFilters},
    infrastructure::InfrastructureManager,
    results::ResultsStore,
    runner::BenchmarkRunner,
};

use anyhow::{bail, Context};
use colored::Colorize;
use nanoid::nanoid;
use std::{fs, path::Path, str::FromStr};
use term_table::{
    row,
    row::Row,
    rows,
    table_cell::TableCell,
    Table, TableStyle,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, subscriber::set_global_default, Subscriber};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = clap_args::parse();

    match args.command {
        clap_args::Commands::Run {
            config,
            output,
            databases,
            scenarios,
            storage_types,
            nfs_versions,
            resume,
            dry_run,
        } => {
            let config = load_config(&config, args.verbose)?;
            let config = apply_overrides(
                config,
                output.as_deref(),
                &databases,
                &scenarios,
                &storage_types,
                &nfs_versions,
            )?;
            let code = run(config, resume.as_deref(), dry_run).await?;
            std::process::exit(code);
        }

        clap_args::Commands::Start { config, services } => {
            let config = load_config(&config, args.verbose)?;
            let infra = InfrastructureManager::new(&config);
            if services.is_empty() {
                infra.start_all().await?;
                println!("{}", "started all services".green());
            } else {
                for name in services {
                    infra.start_service(&name).await?;
                    println!("{} {}", "started".green(), name);
                }
            }
            Ok(())
        }

        clap_args::Commands::Stop { config, services } => {
            let config = load_config(&config, args.verbose)?;
            let infra = InfrastructureManager::new(&config);
            // a fresh process has no recorded lifecycle state, so stop must
            // issue the down commands unconditionally
            if services.is_empty() {
                infra.force_stop_all().await;
                println!("{}", "stopped all services".green());
            } else {
                for name in services {
                    infra.force_stop_service(&name).await?;
                    println!("{} {}", "stopped".green(), name);
                }
            }
            for warning in infra.take_warnings().await {
                println!("{} {}", "warning:".yellow(), warning);
            }
            Ok(())
        }

        clap_args::Commands::Status { config } => {
            let config = load_config(&config, args.verbose)?;
            let infra = InfrastructureManager::new(&config);
            print!("{}", render_status(&infra.status().await));
            Ok(())
        }

        clap_args::Commands::ConfigTemplate { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                bail!("{} already exists, pass --force to overwrite", path.display());
            }
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("unable to create {}", parent.display()))?;
            }
            fs::write(path, CONFIG_TEMPLATE)
                .with_context(|| format!("unable to write {}", path.display()))?;
            println!("{} {}", "wrote".green(), path.display());
            Ok(())
        }
    }
}

const CONFIG_TEMPLATE: &str = include_str!("../config/default.yaml");

async fn run(config: Config, resume: Option<&str>, dry_run: bool) -> anyhow::Result<i32> {
    let filters = match resume {
        Some(dir) => PlanFilters {
            exclude_run_ids: ResultsStore::recorded_run_ids(Path::new(dir))?,
        },
        None => PlanFilters::default(),
    };

    let plan = build_execution_plan(&config, &filters);
    if dry_run {
        println!("{}", plan.render());
        return Ok(0);
    }
    if plan.is_empty() {
        println!("{}", "nothing to run, every unit is already recorded".green());
        return Ok(0);
    }
    if plan.excluded > 0 {
        println!(
            "resuming: {} unit(s) already recorded, {} remaining",
            plan.excluded,
            plan.len()
        );
    }

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        println!("{}", "interrupt received, finishing the current unit".yellow());
        handler_token.cancel();
    })
    .context("unable to install the interrupt handler")?;

    let session_id = nanoid!(5, &nanoid::alphabet::SAFE);
    info!("starting session {} with {} unit(s)", session_id, plan.len());

    let infra = InfrastructureManager::new(&config);
    let driver = CommandDriver::new(config.global.driver.clone());
    let runner = BenchmarkRunner::new(&config, &infra, &driver, cancel);

    let mut store = ResultsStore::create(&config.global.output_dir, &session_id, plan.len())?;
    println!("writing results to {}", store.output_dir().display());

    let outcome = runner.run(&plan, &mut store).await;
    let manifest = store.finalize()?;

    if let Err(err) = outcome {
        eprintln!("{} {}", "session aborted:".red(), err);
        return Ok(1);
    }

    println!(
        "session {} finished: {} succeeded, {} failed, {} skipped, {} timed out",
        manifest.session_id,
        manifest.counts.success.to_string().green(),
        manifest.counts.failed.to_string().red(),
        manifest.counts.skipped.to_string().yellow(),
        manifest.counts.timed_out.to_string().red(),
    );
    for warning in manifest.warnings.iter() {
        println!("{} {}", "warning:".yellow(), warning);
    }

    if manifest.fully_successful() {
        Ok(0)
    } else {
        Ok(2)
    }
}

fn load_config(path: &str, verbose: bool) -> anyhow::Result<Config> {
    let config = Config::try_from_path(Path::new(path))
        .with_context(|| format!("unable to load config from {}", path))?;

    let level = if verbose {
        "debug".to_string()
    } else {
        config
            .global
            .log_level
            .clone()
            .unwrap_or_else(|| "info".to_string())
    };
    init_subscriber(get_subscriber(level));

    Ok(config)
}

fn apply_overrides(
    config: Config,
    output: Option<&str>,
    databases: &[String],
    scenarios: &[String],
    storage_types: &[String],
    nfs_versions: &[String],
) -> anyhow::Result<Config> {
    let mut config = config;

    if let Some(output) = output {
        config = config.set_output_dir(Path::new(output))?;
    }
    if !databases.is_empty() {
        let engines = databases
            .iter()
            .map(|name| EngineKind::from_str(name))
            .collect::<Result<Vec<_>, _>>()?;
        config = config.disable_all_databases_except(&engines)?;
    }
    if !scenarios.is_empty() {
        config = config.filter_scenarios(scenarios)?;
    }
    if !storage_types.is_empty() {
        let types = storage_types
            .iter()
            .map(|name| StorageType::from_str(name))
            .collect::<Result<Vec<_>, _>>()?;
        config = config.filter_storage_types(&types)?;
    }
    if !nfs_versions.is_empty() {
        let versions = nfs_versions
            .iter()
            .map(|name| NfsVersion::from_str(name))
            .collect::<Result<Vec<_>, _>>()?;
        config = config.set_nfs_versions(versions)?;
    }

    Ok(config)
}

fn render_status(statuses: &[nfsbench::infrastructure::ServiceStatus]) -> String {
    let mut rows = rows![row![
        TableCell::builder("service").build(),
        TableCell::builder("state").build(),
        TableCell::builder("health").build()
    ]];
    for status in statuses {
        rows.push(Row::new(vec![
            TableCell::new(&status.name),
            TableCell::new(status.state.to_string()),
            TableCell::new(status.health.to_string()),
        ]));
    }

    Table::builder()
        .rows(rows)
        .style(TableStyle::rounded())
        .build()
        .render()
}

fn get_subscriber(env_filter: String) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .pretty()
        .finish()
}

fn init_subscriber(subscriber: impl Subscriber + Sync + Send) {
    set_global_default(subscriber).expect("Failed to set subscriber");
}
