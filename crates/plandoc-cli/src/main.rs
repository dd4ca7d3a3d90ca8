//! `plandoc` command line

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use plandoc_batch::{BatchEngine, BatchOperation, BatchOptions};
use plandoc_lock::scan_lock_dir;
use plandoc_store::{NewPlan, PlanStore, RepositoryFactory, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

fn cli() -> Command {
    Command::new("plandoc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect and populate a plandoc store")
        .arg_required_else_help(true)
        .arg(
            Arg::new("root")
                .long("root")
                .global(true)
                .default_value(".plandoc")
                .value_parser(value_parser!(PathBuf))
                .help("Store root directory"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML file with lock, write and cache settings"),
        )
        .subcommand(
            Command::new("init-plan")
                .about("Create an empty plan and print its id")
                .arg(Arg::new("name").long("name").required(true).help("Plan name"))
                .arg(Arg::new("description").long("description").help("Plan description")),
        )
        .subcommand(Command::new("list-plans").about("List every plan manifest"))
        .subcommand(
            Command::new("show-plan")
                .about("Print one plan manifest")
                .arg(Arg::new("plan").required(true).help("Plan id")),
        )
        .subcommand(Command::new("locks").about("List lock artifacts with holder and age"))
        .subcommand(
            Command::new("batch")
                .about("Run a batch file against a plan and print the result")
                .arg(Arg::new("plan").required(true).help("Plan id"))
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of operations"),
                )
                .arg(
                    Arg::new("atomic")
                        .long("atomic")
                        .action(ArgAction::SetTrue)
                        .help("Roll everything back on the first failure"),
                ),
        )
        .subcommand(
            Command::new("stats")
                .about("Recompute and print plan statistics")
                .arg(Arg::new("plan").required(true).help("Plan id")),
        )
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn load_config(matches: &ArgMatches) -> Result<StoreConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => StoreConfig::load(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(StoreConfig::default()),
    }
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a String> {
    args.get_one::<String>(name)
        .with_context(|| format!("missing <{name}>"))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(matches: &ArgMatches, plans: &PlanStore) -> Result<()> {
    match matches.subcommand() {
        Some(("init-plan", args)) => {
            let mut plan = NewPlan::named(required(args, "name")?.as_str());
            if let Some(description) = args.get_one::<String>("description") {
                plan.description.clone_from(description);
            }
            let manifest = plans.create_plan(plan).await?;
            println!("{}", manifest.id);
        }
        Some(("list-plans", _)) => {
            for plan in plans.list_plans().await? {
                println!("{}\t{}\t{:?}", plan.id, plan.name, plan.status);
            }
        }
        Some(("show-plan", args)) => {
            print_json(&plans.get_plan(required(args, "plan")?).await?)?;
        }
        Some(("locks", _)) => {
            let factory = plans.factory();
            let threshold = factory.config().lock.stale_threshold();
            for lock in scan_lock_dir(&factory.layout().lock_dir(), threshold)? {
                let holder = lock
                    .record
                    .as_ref()
                    .map_or_else(|| "<unreadable>".to_string(), |r| format!("{} (pid {})", r.holder, r.pid));
                let stale = if lock.stale { " stale" } else { "" };
                println!("{}\t{}\t{}ms{}", lock.resource, holder, lock.age.as_millis(), stale);
            }
        }
        Some(("batch", args)) => {
            let plan_id = required(args, "plan")?;
            let file = args.get_one::<PathBuf>("file").context("missing <file>")?;
            let text = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
            let operations: Vec<BatchOperation> =
                serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
            let options = BatchOptions {
                atomic: args.get_flag("atomic"),
            };

            let engine = BatchEngine::new(Arc::clone(plans.factory()));
            let result = engine.execute_batch(plan_id, operations, options).await?;
            print_json(&result)?;
        }
        Some(("stats", args)) => {
            let manifest = plans.refresh_statistics(required(args, "plan")?).await?;
            print_json(&manifest.statistics)?;
        }
        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let matches = cli().get_matches();

    let root = matches
        .get_one::<PathBuf>("root")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(".plandoc"));
    let config = load_config(&matches)?;
    let factory = Arc::new(
        RepositoryFactory::open(&root, config)
            .await
            .with_context(|| format!("opening store at {}", root.display()))?,
    );
    info!(root = %root.display(), "store opened");

    let plans = PlanStore::new(Arc::clone(&factory));
    let outcome = run(&matches, &plans).await;

    factory.dispose().await;
    factory.lock_manager().dispose().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn global_flags_reach_subcommands() {
        let matches = cli()
            .try_get_matches_from(["plandoc", "--root", "/tmp/s", "batch", "plan-1", "ops.json", "--atomic"])
            .unwrap();
        assert_eq!(matches.get_one::<PathBuf>("root"), Some(&PathBuf::from("/tmp/s")));
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "batch");
        assert!(args.get_flag("atomic"));
        assert_eq!(args.get_one::<String>("plan").map(String::as_str), Some("plan-1"));
    }
}
