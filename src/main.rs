mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use keg::{Config, InstallOptions, KegError, PackageManager};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Exit code for a failing formula test
const TEST_FAILED: u8 = 70;

#[derive(Parser)]
#[command(name = "keg")]
#[command(author, version, about = "Resolve, fetch, verify and install pre-built tools from formulas", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Install prefix [env: KEG_PREFIX] [default: /usr/local]
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,

    /// Directory of formula files; repeatable [env: KEG_FORMULA_PATH] [default: ./Formula]
    #[arg(long = "formula-dir", global = true)]
    formula_dirs: Vec<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a formula and its dependencies
    Install {
        /// Formula name
        formula: String,

        /// Show what would be installed without installing
        #[arg(long)]
        dry_run: bool,

        /// Seconds allowed for each download and for the test
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,

        /// Retry failed downloads (network and server errors only)
        #[arg(long, default_value_t = 0)]
        retries: u32,

        /// Don't run the formula's test after installing
        #[arg(long)]
        skip_test: bool,

        /// Don't read or write the download cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Run the test of an installed formula
    Test {
        /// Formula name
        formula: String,

        /// Seconds allowed for the test
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },

    /// Show the install plan for a formula
    Deps {
        /// Formula name
        formula: String,
    },

    /// Show information about a formula
    Info {
        /// Formula name
        formula: String,
    },

    /// List installed packages
    List,

    /// Remove cached downloads
    Cleanup,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    keg::colors::init_colors();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let code = match e.downcast_ref::<KegError>() {
                Some(err) => {
                    report_error(err);
                    err.exit_code()
                }
                None => {
                    eprintln!("{} {:#}", "Error:".red().bold(), e);
                    1
                }
            };
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = Config::from_env();
    if let Some(prefix) = cli.prefix {
        config.prefix = prefix;
    }
    if !cli.formula_dirs.is_empty() {
        config.formula_dirs = cli.formula_dirs;
    }
    config.progress = std::io::stderr().is_terminal() && !cli.verbose;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let outcome = match cli.command {
        Commands::Install {
            formula,
            dry_run,
            timeout,
            retries,
            skip_test,
            no_cache,
        } => {
            config.retries = retries;
            config.use_cache = !no_cache;
            let opts = options(&config, timeout, skip_test, cancel);
            let pm = PackageManager::new(config).await?;
            commands::install(&pm, &formula, dry_run, &opts).await?
        }
        Commands::Test { formula, timeout } => {
            let opts = options(&config, timeout, false, cancel);
            let pm = PackageManager::new(config).await?;
            commands::test(&pm, &formula, &opts).await?
        }
        Commands::Deps { formula } => {
            let pm = PackageManager::new(config).await?;
            commands::deps(&pm, &formula)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Info { formula } => {
            let pm = PackageManager::new(config).await?;
            commands::info(&pm, &formula)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::List => {
            let pm = PackageManager::new(config).await?;
            commands::list(&pm)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Cleanup => {
            let pm = PackageManager::new(config).await?;
            commands::cleanup(&pm)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "keg", &mut std::io::stdout());
            return Ok(ExitCode::SUCCESS);
        }
    };

    if outcome.is_failure() {
        return Ok(ExitCode::from(TEST_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}

fn options(
    config: &Config,
    timeout: Option<u64>,
    skip_test: bool,
    cancel: CancellationToken,
) -> InstallOptions {
    InstallOptions {
        timeout: timeout.map(Duration::from_secs).unwrap_or(config.timeout),
        skip_test,
        cancel,
    }
}

fn report_error(err: &KegError) {
    eprintln!("{} {}", "Error:".red().bold(), err);
    if let Some(stage) = err.stage() {
        let formula = err.formula().unwrap_or("-");
        eprintln!("  {} {}, {} {}", "formula:".dimmed(), formula, "stage:".dimmed(), stage);
    }
}
