//! # hanoi-backup
//!
//! Rotation-based backup orchestrator that drives an external sync tool
//! (rsync or rclone) once per invocation, typically from cron.
//!
//! ## Features
//!
//! - **Scheduling**: Per-set minimum interval and daily runtime window
//! - **Hanoi Rotation**: Binary backup rotation over a fixed number of slots
//! - **Hardlink Incrementals**: Links against the newest completed backup
//! - **Pre/Post Tasks**: Ordered shell commands around each backup
//! - **Notifications**: SMTP reports for soft errors and completed backups
//! - **Single Instance**: Pid-file lock, stale locks are recovered
//!
//! ## Quick Start
//!
//! ```no_run
//! use hanoi_backup::backup::backup_config::BackupConfig;
//! use hanoi_backup::backup::command::SystemRunner;
//! use hanoi_backup::backup::lock::PidLock;
//! use hanoi_backup::backup::notifications::smtp::SmtpNotification;
//! use hanoi_backup::backup::orchestrator::{Orchestrator, RunOptions};
//! use hanoi_backup::backup::run_state::FileRunStateStore;
//!
//! let config = BackupConfig::load("/etc/hanoi-backup/hanoi-backup.yml")?;
//! let store = FileRunStateStore::new(config.global().cache_dir());
//! let orchestrator = Orchestrator::builder()
//!     .config(&config)
//!     .runner(&SystemRunner)
//!     .notifier(&SmtpNotification)
//!     .store(&store)
//!     .lock(PidLock::new(config.global().pidfile()))
//!     .options(RunOptions::default())
//!     .build();
//! let report = orchestrator.run(chrono::Local::now().fixed_offset())?;
//! std::process::exit(report.exit_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
