use clap::Parser;
use hanoi_backup::backup::backup_config::{BackupConfig, DEFAULT_CONFIG_PATH};
use hanoi_backup::backup::command::{CommandRunner, DryRunner, SystemRunner};
use hanoi_backup::backup::lock::PidLock;
use hanoi_backup::backup::notifications::smtp::SmtpNotification;
use hanoi_backup::backup::orchestrator::{Orchestrator, RunOptions};
use hanoi_backup::backup::run_state::{FileRunStateStore, MemoryRunStateStore, RunStateStore};
use std::path::PathBuf;
use std::process::exit;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// Rotating backups driven by rsync or rclone, meant to be run from cron
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Location of config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Run state directory, overrides the config
    #[arg(short = 'a', long)]
    cache_dir: Option<PathBuf>,
    /// Pid file, overrides the config
    #[arg(short, long)]
    pidfile: Option<PathBuf>,
    /// Ignore interval and runtime window
    #[arg(short, long)]
    force: bool,
    /// Only print errors
    #[arg(short, long, conflicts_with = "debug")]
    quiet: bool,
    /// Print debug messages
    #[arg(short, long)]
    debug: bool,
    /// Exit silently if another instance is running
    #[arg(short, long)]
    batch: bool,
    /// Dry run: print what would be done, change nothing
    #[arg(short, long)]
    safe: bool,
    /// Backup sets to run, all when empty
    #[arg(value_name = "SET")]
    sets: Vec<String>,
}

impl Args {
    fn level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::ERROR
        } else if self.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        }
    }
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.level())
        .with_writer(std::io::stderr)
        .init();

    let config = match BackupConfig::load(&args.config) {
        Ok(config) => config.with_overrides(args.pidfile.clone(), args.cache_dir.clone()),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    };

    let runner: &dyn CommandRunner = if args.safe { &DryRunner } else { &SystemRunner };
    let file_store;
    let memory_store;
    let store: &dyn RunStateStore = if args.safe {
        memory_store = MemoryRunStateStore::default();
        &memory_store
    } else {
        file_store = FileRunStateStore::new(config.global().cache_dir());
        &file_store
    };

    let options = RunOptions::builder()
        .force(args.force)
        .safe(args.safe)
        .batch(args.batch)
        .only_sets(args.sets)
        .build();
    let orchestrator = Orchestrator::builder()
        .config(&config)
        .runner(runner)
        .notifier(&SmtpNotification)
        .store(store)
        .lock(PidLock::new(config.global().pidfile()))
        .options(options)
        .build();

    match orchestrator.run(chrono::Local::now().fixed_offset()) {
        Ok(report) => exit(report.exit_code()),
        Err(e) => {
            error!("{e}");
            exit(1);
        }
    }
}
