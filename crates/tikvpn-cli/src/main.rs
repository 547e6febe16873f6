mod commands;

use clap::{Parser, Subcommand};
use commands::ServerArgs;
use console::style;
use std::process::ExitCode;
use tikvpn_core::PipelineError;

#[derive(Parser)]
#[command(
    name = "tikvpn",
    version,
    about = "Provision an OpenVPN server that MikroTik RouterOS clients can connect to"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    server: ServerArgs,

    /// Log filter (e.g. warn, info, tikvpn_provision=debug)
    #[arg(long, global = true, env = "TIKVPN_LOG", default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Install, configure and start the server, then export a client bundle (default)
    Provision,

    /// Issue another client certificate under the existing CA and export its bundle
    AddClient {
        /// Client certificate name, also used as the RouterOS user name
        name: String,
    },

    /// Show service, firewall, forwarding and certificate state
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    // Dropping the command future kills running child processes and aborts
    // DH generation.
    let result = tokio::select! {
        result = dispatch(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n{}", style("Interrupted.").yellow());
            return ExitCode::from(130);
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<PipelineError>() {
            Some(e) if e.is_cancelled() => ExitCode::from(130),
            Some(e) => {
                tikvpn_ui::print_failure(e);
                ExitCode::FAILURE
            }
            None => {
                eprintln!("{} {err:#}", style("error:").red().bold());
                ExitCode::FAILURE
            }
        },
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Provision) {
        Commands::Provision => commands::provision::run(cli.server).await,
        Commands::AddClient { name } => commands::add_client::run(cli.server, name).await,
        Commands::Status => commands::status::run(cli.server).await,
    }
}
