//! verdigris-migrate CLI
//!
//! Compares a SQLite database against a JSON schema spec and, on request,
//! upgrades it in place or through a backup-and-rebuild.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use verdigris_migrate::error::MigrateError;
use verdigris_migrate::prelude::*;

/// Spec-driven schema migration for SQLite databases.
#[derive(Parser)]
#[command(name = "verdigris-migrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database file to compare or upgrade. When omitted, only the
    /// spec is parsed.
    #[arg(env = "DATABASE_PATH")]
    database: Option<PathBuf>,

    /// JSON spec file mapping table names to definition lists.
    #[arg(short, long)]
    schema: PathBuf,

    /// Apply the changes instead of only reporting them.
    #[arg(short, long)]
    upgrade: bool,

    /// Treat column order as significant when comparing.
    #[arg(short, long)]
    order_matters: bool,

    /// Answer the rebuild confirmation up front (y or n).
    #[arg(short, long, value_name = "ANSWER")]
    force: Option<String>,

    /// Rebuild even when every change could be applied in place.
    #[arg(short = 'F', long, requires = "upgrade")]
    force_rebuild: bool,

    /// Drop tables the spec does not mention instead of carrying them over.
    #[arg(short, long, requires = "upgrade")]
    drop_unspecified: bool,

    /// Directory backup copies are written to.
    #[arg(short, long, default_value = "./backups")]
    backup_dir: PathBuf,

    /// strftime prefix for backup file names.
    #[arg(short = 'p', long, default_value = "%Y-%m-%d-%H-%M-%S-")]
    backup_prefix: String,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.quiet {
        Level::WARN
    } else {
        match cli.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let force = match cli.force.as_deref() {
        Some(text) => Some(
            parse_confirmation(text)
                .ok_or_else(|| MigrateError::BadForcedResponse(text.to_owned()))?,
        ),
        None => None,
    };

    let spec = DatabaseSpec::from_path(&cli.schema)?;
    let Some(database) = cli.database else {
        let parsed = SpecParser::new().parse_spec(&spec)?;
        println!("{}: {} tables parsed.", cli.schema.display(), parsed.len());
        return Ok(());
    };

    let options = UpgradeOptions {
        apply: cli.upgrade,
        order_matters: cli.order_matters,
        force,
        force_rebuild: cli.force_rebuild,
        drop_unspecified: cli.drop_unspecified,
        backup_dir: cli.backup_dir,
        backup_prefix: cli.backup_prefix,
    };

    match compare_and_upgrade(&database, &spec, &options).await? {
        UpgradeOutcome::UpToDate => println!("{} is up to date.", database.display()),
        UpgradeOutcome::Created => println!("Created {}.", database.display()),
        UpgradeOutcome::ReportOnly => println!("Run again with --upgrade to apply."),
        UpgradeOutcome::Altered => println!("{} upgraded in place.", database.display()),
        UpgradeOutcome::Rebuilt { backup } => println!(
            "{} rebuilt; previous file kept at {}.",
            database.display(),
            backup.display()
        ),
        UpgradeOutcome::Declined => println!("Declined; no changes made."),
    }

    Ok(())
}
