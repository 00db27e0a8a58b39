//! Command line front-end.

use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use link_to_the_past::backup::Backup;
use link_to_the_past::compare;
use link_to_the_past::config;
use link_to_the_past::create::{Create, CreateOptions};
use link_to_the_past::error::{BackupError, Result};
use link_to_the_past::restore::{self, Restore};
use log::{error, info, Level, LevelFilter};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// link-to-the-past — incremental backups with hard links into the past
#[derive(Parser, Debug)]
#[command(
    name = "lttp",
    version,
    about = "Incremental snapshot backups that hard-link unchanged files",
    long_about = "link-to-the-past creates point-in-time snapshots of a set of \
                  directories. Unchanged files are hard-linked against the \
                  previous snapshot, so each snapshot looks like a full copy \
                  but only costs the space of what changed. Snapshots are \
                  plain directory trees, browsable with standard tools."
)]
struct Cli {
    #[command(subcommand)]
    action: Action,

    /// Load control file at given path
    #[arg(short, long, global = true, value_name = "FILE", conflicts_with = "profile")]
    control: Option<PathBuf>,

    /// Load named profile (located in the default config directory)
    #[arg(short, long, global = true, value_name = "NAME")]
    profile: Option<String>,

    /// Increase level of messages (can be applied multiple times)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Disable messages (opposite of --verbose)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Show technical details
    #[arg(long, global = true)]
    develop: bool,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Create a new snapshot
    Create {
        /// Enforce certain operations (e.g. backup even without changes)
        #[arg(short, long)]
        force: bool,

        /// Always create a copy (do not hard link to the previous snapshot)
        #[arg(long)]
        full: bool,

        /// Do not actually create a backup, only scan the source
        #[arg(long)]
        dry_run: bool,

        /// After scanning, wait for confirmation by the user
        #[arg(long)]
        confirm: bool,
    },

    /// List all available snapshots
    List,

    /// Print the absolute path to a snapshot directory
    Path {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,
    },

    /// List files or directories contained in a snapshot
    Ls {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,

        /// Apply operation recursively to all subdirectories
        #[arg(short, long)]
        recursive: bool,

        paths: Vec<PathBuf>,
    },

    /// Copy (extract) files or directories from a snapshot
    Cp {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,

        /// Apply operation recursively to all subdirectories
        #[arg(short, long)]
        recursive: bool,

        src: PathBuf,
        dst: PathBuf,
    },

    /// Copy the contents of a stored file to stdout (binary)
    Cat {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,

        src: PathBuf,
    },

    /// Compare the live sources against the file list of a snapshot
    Verify {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,

        /// Show detailed file info
        #[arg(short, long)]
        long: bool,
    },

    /// Check a snapshot's files against the checksums in its file list
    Integrity {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,
    },

    /// Show changes between a snapshot and another one (or "now")
    Changes {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,

        /// Show detailed file info
        #[arg(short, long)]
        long: bool,

        /// Also show unchanged items
        #[arg(short, long)]
        all: bool,

        /// Other snapshot, or "now" for the current files
        timespec2: String,
    },

    /// Remove files or directories from a snapshot
    Rm {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,

        /// Apply operation recursively to all subdirectories
        #[arg(short, long)]
        recursive: bool,

        /// Enforce certain operations
        #[arg(short, long)]
        force: bool,

        src: PathBuf,
    },

    /// Remove an entire snapshot
    Purge {
        #[arg(short = 't', long = "time-spec", value_name = "TIMESPEC")]
        timespec: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if cli.develop {
        info!("command line arguments are {cli:?}");
    }

    let started = std::time::Instant::now();
    let outcome = run(&cli);
    info!("action took {:.1} seconds", started.elapsed().as_secs_f64());

    if let Err(e) = outcome {
        if cli.develop {
            error!("{e:?}");
        } else {
            error!("{e}");
        }
        std::process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let verbosity = if cli.quiet { 0 } else { 1 + cli.verbose };
    let level = match verbosity {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            let prefix = match record.level() {
                Level::Error => "ERROR: ".red().bold().to_string(),
                Level::Warn => "WARNING: ".yellow().bold().to_string(),
                Level::Info => "• ".dimmed().to_string(),
                _ => "⋅ ".dimmed().to_string(),
            };
            writeln!(buf, "{}{}", prefix, record.args())
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let backup = Backup::load(&control_file(cli)?)?;
    match &cli.action {
        Action::Create {
            force,
            full,
            dry_run,
            confirm,
        } => {
            let mut create = Create::new(backup)?;
            create.create(&CreateOptions {
                force: *force,
                full: *full,
                dry_run: *dry_run,
                confirm: *confirm,
            })?;
            Ok(())
        }
        Action::List => restore::list_backups(&backup, &mut std::io::stdout().lock()),
        Action::Path { timespec } => {
            let restore = Restore::open(backup, timespec.as_deref())?;
            println!("{}", restore.current_backup_path.display());
            Ok(())
        }
        Action::Ls {
            timespec,
            recursive,
            paths,
        } => {
            let restore = Restore::open(backup, timespec.as_deref())?;
            let paths = if paths.is_empty() {
                vec![PathBuf::from(".")]
            } else {
                paths.clone()
            };
            let paths: Vec<PathBuf> = paths.iter().map(|p| absolute(p)).collect();
            restore.ls(&paths, *recursive, &mut std::io::stdout().lock())
        }
        Action::Cp {
            timespec,
            recursive,
            src,
            dst,
        } => {
            let restore = Restore::open(backup, timespec.as_deref())?;
            restore.cp(&absolute(src), dst, *recursive)
        }
        Action::Cat { timespec, src } => {
            let restore = Restore::open(backup, timespec.as_deref())?;
            restore.cat(&absolute(src), &mut std::io::stdout().lock())
        }
        Action::Verify { timespec, long } => compare::verify(
            backup,
            timespec.as_deref(),
            *long,
            &mut std::io::stdout().lock(),
        ),
        Action::Integrity { timespec } => {
            let restore = Restore::open(backup, timespec.as_deref())?;
            compare::integrity(&restore, &mut std::io::stdout().lock())
        }
        Action::Changes {
            timespec,
            long,
            all,
            timespec2,
        } => compare::changes(
            backup,
            timespec.as_deref(),
            timespec2,
            *long,
            *all,
            &mut std::io::stdout().lock(),
        ),
        Action::Rm {
            timespec,
            recursive,
            force,
            src,
        } => {
            let mut restore = Restore::open(backup, timespec.as_deref())?;
            let src = absolute(src);
            let id = restore.root.lookup(&src)?;
            eprintln!(
                "Going to remove {}",
                restore.root.node(id).path.display()
            );
            ask_the_question()?;
            restore.rm(&src, *recursive, *force)
        }
        Action::Purge { timespec } => {
            let mut restore = Restore::open(backup, timespec.as_deref())?;
            eprintln!(
                "Going to remove the entire backup: {}",
                restore.name
            );
            ask_the_question()?;
            restore.purge()
        }
    }
}

fn control_file(cli: &Cli) -> Result<PathBuf> {
    if let Some(name) = &cli.profile {
        config::named_profile(name)
    } else if let Some(path) = &cli.control {
        Ok(path.clone())
    } else {
        config::default_profile()
    }
}

/// Absolutize a user-supplied path against the current directory.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        config::normalize_path(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        config::normalize_path(&cwd.join(path))
    }
}

/// Altering a backup needs an explicit yes.
fn ask_the_question() -> Result<()> {
    eprintln!("This alters the backup. The file(s) will be lost forever!");
    eprint!("Continue? [y/N] ");
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    if answer.trim().eq_ignore_ascii_case("y") {
        Ok(())
    } else {
        eprintln!("Aborted");
        Err(BackupError::Aborted)
    }
}
