use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use temp_dir::TempDir;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use chain_it_common::types::parse_address;
use chain_it_config::Arguments;
use chain_it_core::{Scenario, TestContext, run_suite};
use chain_it_node_interaction::NonceClient;

/// Drives the node and its cli client through the transaction and contract lifecycle.
#[derive(Debug, Parser)]
#[command(name = "chain-it")]
struct Cli {
    #[command(flatten)]
    arguments: Arguments,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the node and run the scenarios one after the other.
    Run {
        /// The scenarios to run. Runs all of them if none is given.
        #[arg(long = "scenario", value_enum)]
        scenarios: Vec<Scenario>,
    },
    /// List the available scenarios.
    List,
    /// Print the nonce of an account as reported by an already running node.
    Nonce { address: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.arguments.log_json);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed building the runtime")?
        .block_on(run(cli))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    result.expect("Failed to set tracing subscriber");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let Cli {
        mut arguments,
        command,
    } = cli;

    match command {
        Command::List => {
            for scenario in Scenario::ALL {
                println!("{:<20}{}", scenario.name(), scenario.description());
            }
            Ok(())
        }
        Command::Nonce { address } => {
            let address = parse_address(&address)?;
            let nonce = NonceClient::new(arguments.query_endpoint.clone())
                .get_nonce(address)
                .await?;
            println!("{nonce}");
            Ok(())
        }
        Command::Run { scenarios } => {
            let scenarios = if scenarios.is_empty() {
                Scenario::ALL.to_vec()
            } else {
                scenarios
            };

            let temporary_directory = match arguments.working_directory {
                Some(_) => None,
                None => {
                    let directory = TempDir::new()?;
                    arguments.working_directory = Some(directory.path().into());
                    Some(directory)
                }
            };

            // Nothing can run without the node, so this aborts the run.
            let mut context = match TestContext::start(arguments).await {
                Ok(context) => context,
                Err(error) => {
                    tracing::error!(error = %format!("{error:#}"), "Failed to start the suite");
                    eprintln!("{error:?}");
                    std::process::exit(-1);
                }
            };

            let report = run_suite(&mut context, &scenarios).await;
            report.print_summary();

            // Stops the node so its logs are complete before the directory is kept or removed.
            let working_directory = context.working_directory().to_path_buf();
            drop(context);

            if let Some(path) = report.persist(&working_directory, temporary_directory)? {
                tracing::info!(report = %path.display(), "Wrote the suite report");
            }

            if report.failed() > 0 {
                bail!(
                    "{} of {} scenarios failed",
                    report.failed(),
                    report.scenarios.len()
                );
            }
            Ok(())
        }
    }
}
