use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use tee_verifier::cli::{self, Cli, Command};
use tee_verifier::{LocalCrypto, Outcome, VerificationFlow, VerifierConfig, registry};

/// Exit status for a REJECTED verdict, distinct from failure.
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tee_verifier=info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "✗ Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = VerifierConfig::from_env().context("configuration error")?;

    cli::banner("TEE Agent Verification", "Starting verification flow");
    cli::kv("registry", &config.registry_address.to_string());
    cli::kv("registry_kind", &config.registry_kind.to_string());
    println!();

    if let Command::ZkVerifier = cli.command {
        let registry = registry::KeyRegistry::connect(&config)?;
        let address = registry.zk_verifier_address().await?;
        cli::kv("zk_verifier", &address.to_string());
        return Ok(ExitCode::SUCCESS);
    }

    let registry: Arc<dyn registry::RegistryClient> =
        Arc::from(registry::connect(&config).context("failed to set up registry client")?);

    let Some((agent_id, request)) = cli.command.flow_request().map_err(anyhow::Error::msg)? else {
        return query(&cli.command, registry.as_ref()).await;
    };

    let flow = VerificationFlow::new(
        registry,
        Arc::new(LocalCrypto::generate()),
        config.http_timeout,
    )?;
    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        tracing::warn!("Interrupt received, aborting verification");
    };

    let report = flow.run_until(agent_id, request, interrupt).await;
    cli::print_report(&report);

    Ok(match report.outcome {
        Outcome::Verified => ExitCode::SUCCESS,
        Outcome::Rejected => ExitCode::from(EXIT_REJECTED),
        Outcome::Failed { .. } => ExitCode::FAILURE,
    })
}

/// Registry-only commands.
async fn query(
    command: &Command,
    registry: &dyn registry::RegistryClient,
) -> anyhow::Result<ExitCode> {
    match command {
        Command::Agent { agent_id } => {
            cli::banner("Query agent on-chain", "Fetching agent data from registry");
            let record = registry.resolve(*agent_id).await?;
            cli::print_record(&record);
        }
        Command::Count => {
            let count = registry.count().await?;
            cli::kv("registered_agents", &count.to_string());
        }
        other => anyhow::bail!("{other:?} is not a registry query"),
    }
    Ok(ExitCode::SUCCESS)
}
