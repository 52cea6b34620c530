use clap::{Arg, ArgAction, Command};
use tiermover::{
    commands,
    config::Config,
    dispatcher::{Dispatcher, ProcessSpawner},
    logging,
    metadata::RemoteMetadataClient,
    notify::ArrNotifier,
    Result,
};
use tracing::{info, warn};

fn build_cli() -> Command {
    Command::new("tiermover")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Two-tier storage cache manager for completed download items")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("Path to YAML configuration file")
                .global(true),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Perform all reads and checks but skip writes, metadata updates, and notifications")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("process")
                .about("Migrate one finished item from the fast tier to the slow tier")
                .arg(Arg::new("id").value_name("IDENTIFIER").required(true)),
        )
        .subcommand(Command::new("sweep").about("Reclaim fast-tier space by evicting the oldest archived items"))
        .subcommand(Command::new("status").about("Show live workers, queued requests, and sweep-lock state"))
        .subcommand(Command::new("drain-queue").about("Hand queued requests to free worker slots"))
        .subcommand(Command::new("clear-queue").about("Remove all queued requests unconditionally"))
        .subcommand(
            Command::new("worker")
                .hide(true)
                .arg(Arg::new("target").value_name("TARGET").required(true)),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let config_path = matches.get_one::<String>("config").cloned();
    let dry_run = matches.get_flag("dry-run");

    let config = Config::load(config_path.as_deref())?;
    let _log_guard = logging::init(&config.logging)?;

    info!(
        "tiermover v{} (built: {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIMESTAMP")
    );
    if dry_run {
        warn!("===== DRY RUN MODE - NO CHANGES WILL BE MADE =====");
    }
    config.log_summary();

    let metadata = RemoteMetadataClient::new(&config.metadata.base_url, config.metadata.timeout)?;
    let notifier = ArrNotifier::new(config.notify.clone())?;
    let dispatcher = Dispatcher::new(
        &config.dispatcher.workers_dir,
        &config.dispatcher.queue_dir,
        &config.dispatcher.locks_dir,
        config.dispatcher.max_workers,
        ProcessSpawner {
            config_path: config_path.clone(),
        },
    );

    match matches.subcommand() {
        Some(("process", sub)) => {
            let raw_id = sub
                .get_one::<String>("id")
                .expect("clap enforces the identifier argument");
            commands::process(&config, &dispatcher, &metadata, &notifier, raw_id, dry_run).await
        }
        Some(("sweep", _)) => {
            commands::sweep(&config, &dispatcher, &metadata, &notifier, dry_run).await
        }
        Some(("status", _)) => commands::status(&dispatcher),
        Some(("drain-queue", _)) => commands::drain_queue(&dispatcher, dry_run),
        Some(("clear-queue", _)) => commands::clear_queue(&dispatcher, dry_run),
        Some(("worker", sub)) => {
            let target = sub
                .get_one::<String>("target")
                .expect("clap enforces the target argument");
            commands::run_worker(&config, &dispatcher, &metadata, &notifier, target).await
        }
        _ => unreachable!("subcommand_required guarantees a subcommand"),
    }
}
