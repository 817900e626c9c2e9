mod config;
mod phases_cmd;
mod run_cmd;
mod selector;
mod ui;

#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use anyhow::Context;
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use config::{CliOverrides, MasonConfig};

const EXAMPLES: &str = "\
Examples:
  mason test                      Run the test phase
  mason lint test -l os=linux     Run lint then test for linux bricks only
  mason ci                        Run the phases of the `ci` alias
  mason -v package --keep-work-dir";

#[derive(Parser)]
#[command(
    name = "mason",
    version,
    about = "Declarative build tool driving Dagger modules",
    long_about = "Mason reads bricks from the .mason directory, asks each brick's Dagger \
                  module to render script fragments for a phase, merges them into one \
                  script, and runs it with Dagger, followed by post-run scripts.",
    after_help = EXAMPLES,
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Phases or aliases to run, in order
    #[arg(value_name = "PHASES")]
    phases: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config file (default: <root>/.mason/config.toml, then ~/.config/mason/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory to search for the .mason directory (env: MASON_ROOT_PATH)
    #[arg(long, global = true)]
    root_path: Option<PathBuf>,

    /// Directory names skipped while searching (repeatable)
    #[arg(long = "ignored-dirs", global = true)]
    ignored_dirs: Vec<String>,

    /// Keep work directories after a successful run (env: MASON_KEEP_WORK_DIR)
    #[arg(long, global = true)]
    keep_work_dir: bool,

    /// Label selector applied to every phase, e.g. `os=linux,kind in (GoBinary)`
    #[arg(short = 'l', long, global = true)]
    selector: Option<String>,

    /// Dagger binary (env: MASON_DAGGER_BINARY)
    #[arg(long, global = true)]
    dagger_binary: Option<String>,

    /// Environment for Dagger, as KEY=VALUE (repeatable)
    #[arg(long = "dagger-env", global = true)]
    dagger_env: Vec<String>,

    /// Extra argument for Dagger (repeatable)
    #[arg(long = "dagger-args", global = true, allow_hyphen_values = true)]
    dagger_args: Vec<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only write Dagger's progress output to log files
    #[arg(short, long, global = true)]
    quiet: bool,
}

impl GlobalArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            config: self.config.clone(),
            root_path: self.root_path.clone(),
            ignored_dirs: self.ignored_dirs.clone(),
            keep_work_dir: self.keep_work_dir,
            selector: self.selector.clone(),
            dagger_binary: self.dagger_binary.clone(),
            dagger_env: self.dagger_env.clone(),
            dagger_args: self.dagger_args.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the well-known phases and the configured aliases
    Phases,
    /// Print the mason and Dagger versions
    Version,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
    /// Print the resolved configuration as TOML
    Config,
}

fn init_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    if let Some(Commands::Completions { shell }) = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "mason", &mut std::io::stdout());
        return Ok(());
    }

    if cli.command.is_none() && cli.phases.is_empty() {
        Cli::command().print_help()?;
        return Ok(());
    }

    let mut resolved = MasonConfig::resolve(&cli.global.overrides())?;
    resolved.dagger.add_default_quiet(cli.global.verbose);

    match cli.command {
        Some(Commands::Phases) => phases_cmd::run_phases(&resolved)?,
        Some(Commands::Version) => {
            println!("mason {}", env!("CARGO_PKG_VERSION"));
            match mason_core::dagger::dagger_version(&resolved.dagger.binary).await {
                Ok(version) => println!("{version}"),
                Err(err) => println!("dagger: unavailable ({err:#})"),
            }
        }
        Some(Commands::Config) => {
            let text = toml::to_string_pretty(&resolved)
                .context("failed to serialize configuration")?;
            print!("{text}");
        }
        Some(Commands::Completions { .. }) => {}
        None => {
            run_cmd::run_phases(
                &resolved,
                &cli.phases,
                cli.global.verbose,
                cli.global.quiet,
            )
            .await?;
        }
    }

    Ok(())
}
