use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use toolsmith_app::bootstrap;
use toolsmith_app::commands::{self, Outcome};
use toolsmith_app::config::Config;
use tracing_subscriber::EnvFilter;

/// Toolsmith -- validate, test, register and run self-authored tools.
#[derive(Parser, Debug)]
#[command(name = "toolsmith", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the static validator over a source file
    Validate { file: PathBuf },
    /// Submit a YAML tool manifest and drive it through validation, self-test and registration
    Author { manifest: PathBuf },
    /// Invoke the registered version of a tool
    Invoke {
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// List every known tool with its registered version
    List,
    /// Show every version of a tool
    History { name: String },
    /// Print the active validator policy
    Policy {
        /// Also save it as YAML to this path
        #[arg(long)]
        write: Option<PathBuf>,
    },
    /// Verify the audit trail
    Audit,
    /// Serve one sandboxed execution over stdin/stdout
    #[command(hide = true)]
    Worker,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Runs under rlimits that forbid threads; no runtime, no logging.
    if matches!(cli.command, Commands::Worker) {
        return toolsmith_executor::worker::run();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("❌ Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.command)) {
        Ok(outcome) => outcome.into(),
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<Outcome> {
    let config = Config::load()?;
    let mut out = std::io::stdout().lock();

    match command {
        Commands::Validate { file } => {
            let policy = bootstrap::load_policy(&config).await?;
            commands::validate::run(policy.into(), &file, &mut out)
        }
        Commands::Policy { write } => {
            let policy = bootstrap::load_policy(&config).await?;
            commands::policy::run(&policy, write.as_deref(), &mut out).await
        }
        Commands::Audit => commands::audit::run(&config.audit_log, &mut out),
        Commands::Author { manifest } => {
            let services = bootstrap::build(&config).await?;
            commands::author::run(&services, &manifest, &mut out).await
        }
        Commands::Invoke { name, arguments } => {
            let services = bootstrap::build(&config).await?;
            commands::invoke::run(&services, &name, &arguments, &mut out).await
        }
        Commands::List => {
            let services = bootstrap::build(&config).await?;
            commands::registry::list(&services, &mut out)
        }
        Commands::History { name } => {
            let services = bootstrap::build(&config).await?;
            commands::registry::history(&services, &name, &mut out)
        }
        Commands::Worker => Ok(Outcome::Success),
    }
}
